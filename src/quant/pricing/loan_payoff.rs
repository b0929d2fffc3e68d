//! # Loan Payoff
//!
//! $$
//! L = F\,\Phi(-a) + \mathbb E\!\left[A_T\mid f_{1j}\right]\Phi(a-s),\qquad
//! a=\frac{\ln F-m}{s},\qquad s=\sigma\sqrt{T}\sqrt{1-\rho^2}
//! $$
//!
//! Expected payoff at maturity of a zero-coupon loan with face value `F`,
//! conditional on a realization `f1j` of the systematic asset index.
//!
//! The index starts at `ival` and carries the firm's total volatility:
//! `ln f1j = ln ival - sig^2 T / 2 + sig sqrt(T) Z`. The firm loads `rho` on `Z`
//! and `sqrt(1 - rho^2)` on an independent shock, which is integrated out in
//! closed form, so the conditional log asset value is normal with mean
//! `m = (1 - rho) ln ival + rho ln f1j - (1 - rho) sig^2 T / 2` and standard
//! deviation `s`. The payoff is the face value less a zero-rate Black-Scholes
//! put on the conditional asset value struck at `F`.
use impl_new_derive::ImplNew;
use ndarray::Array;
use ndarray::ArrayBase;
use ndarray::ArrayD;
use ndarray::Data;
use ndarray::Dimension;
use ndarray::Zip;

use crate::error::PayoffError;
use crate::quant::broadcast::broadcast_shape;
use crate::quant::broadcast::Operand;

/// `ln sqrt(2 pi)`
const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// Standard normal CDF through `erfc`, accurate to a few ulp in both tails.
fn norm_cdf(x: f64) -> f64 {
  0.5 * libm::erfc(-x / std::f64::consts::SQRT_2)
}

/// `ln Phi(x)`. Once `Phi(x)` leaves the normal `f64` range (`x < -37.5`) the
/// Mills-ratio series is used, truncated after the `x^-8` term.
fn ln_norm_cdf(x: f64) -> f64 {
  let p = norm_cdf(x);
  if p >= f64::MIN_POSITIVE {
    return p.ln();
  }

  let u = -x;
  let v = 1.0 / (u * u);
  let series = 1.0 - v * (1.0 - 3.0 * v * (1.0 - 5.0 * v * (1.0 - 7.0 * v)));
  -0.5 * x * x - u.ln() - LN_SQRT_2PI + series.ln()
}

/// `weight * Phi(x)`, formed in log space when the weight overflows or the
/// probability underflows.
fn weighted_cdf(weight: f64, log_weight: f64, x: f64) -> f64 {
  let p = norm_cdf(x);
  if weight.is_finite() && p >= f64::MIN_POSITIVE {
    weight * p
  } else {
    (log_weight + ln_norm_cdf(x)).exp()
  }
}

/// Runtime configuration for [`LoanPayoffEngine`].
#[derive(Clone, Copy, Debug)]
pub struct LoanPayoffConfig {
  /// At or below this idiosyncratic standard deviation the payoff is the
  /// deterministic `min(exp(m), F)`.
  pub min_idiosyncratic_std: f64,
  /// Grids with at least this many scenarios are evaluated on the rayon pool.
  pub parallel_threshold: usize,
}

impl Default for LoanPayoffConfig {
  fn default() -> Self {
    Self {
      min_idiosyncratic_std: 1e-10,
      parallel_threshold: 100_000,
    }
  }
}

/// Distribution of the log asset value at maturity given one systematic scenario.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConditionalMoments {
  /// Conditional mean of `ln A_T`
  pub log_mean: f64,
  /// Standard deviation of the idiosyncratic part of `ln A_T`
  pub idiosyncratic_std: f64,
}

impl ConditionalMoments {
  /// `E[A_T | f1j]`
  pub fn expected_asset_value(&self) -> f64 {
    (self.log_mean + 0.5 * self.idiosyncratic_std.powi(2)).exp()
  }
}

/// Conditional moments of the firm's log asset value for a single scenario.
pub fn conditional_moments(f1j: f64, ival: f64, rho: f64, sig: f64, t: f64) -> ConditionalMoments {
  let total_var = sig * sig * t;

  ConditionalMoments {
    log_mean: (1.0 - rho) * ival.ln() + rho * f1j.ln() - 0.5 * (1.0 - rho) * total_var,
    idiosyncratic_std: ((1.0 - rho * rho) * total_var).max(0.0).sqrt(),
  }
}

/// The six model inputs, each a scalar or an array broadcastable against the others.
#[derive(Debug)]
pub struct LoanInputs<'a> {
  /// Face value due at maturity
  pub face: Operand<'a>,
  /// Systematic asset value scenarios
  pub f1j: Operand<'a>,
  /// Initial asset value
  pub ival: Operand<'a>,
  /// Loading on the systematic factor
  pub rho: Operand<'a>,
  /// Asset volatility
  pub sig: Operand<'a>,
  /// Time to maturity in years
  pub t: Operand<'a>,
}

impl<'a> LoanInputs<'a> {
  pub fn new(
    face: impl Into<Operand<'a>>,
    f1j: impl Into<Operand<'a>>,
    ival: impl Into<Operand<'a>>,
    rho: impl Into<Operand<'a>>,
    sig: impl Into<Operand<'a>>,
    t: impl Into<Operand<'a>>,
  ) -> Self {
    Self {
      face: face.into(),
      f1j: f1j.into(),
      ival: ival.into(),
      rho: rho.into(),
      sig: sig.into(),
      t: t.into(),
    }
  }

  /// Check every entry of every input against its domain.
  pub fn validate(&self) -> Result<(), PayoffError> {
    self.face.ensure_positive("face")?;
    self.f1j.ensure_positive("f1j")?;
    self.ival.ensure_positive("ival")?;
    self.rho.ensure_unit_interval("rho")?;
    self.sig.ensure_positive("sig")?;
    self.t.ensure_positive("t")
  }

  /// Broadcast shape of the output grid.
  pub fn shape(&self) -> Result<Vec<usize>, PayoffError> {
    broadcast_shape(&[
      ("face", self.face.shape()),
      ("f1j", self.f1j.shape()),
      ("ival", self.ival.shape()),
      ("rho", self.rho.shape()),
      ("sig", self.sig.shape()),
      ("t", self.t.shape()),
    ])
  }
}

#[derive(Clone, Copy, Debug)]
struct Scenario {
  face: f64,
  t: f64,
  moments: ConditionalMoments,
}

/// Vectorized evaluator of the loan payoff and the quantities derived from it.
#[derive(Clone, Debug)]
pub struct LoanPayoffEngine {
  config: LoanPayoffConfig,
}

impl Default for LoanPayoffEngine {
  fn default() -> Self {
    Self::new(LoanPayoffConfig::default())
  }
}

impl LoanPayoffEngine {
  pub fn new(config: LoanPayoffConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &LoanPayoffConfig {
    &self.config
  }

  /// Expected lender payoff per scenario, `0 <= L <= F`.
  pub fn payoff(&self, inputs: &LoanInputs<'_>) -> Result<ArrayD<f64>, PayoffError> {
    self.evaluate(inputs, |engine, sc| {
      engine.payoff_kernel(sc.face, &sc.moments)
    })
  }

  /// Probability, given the scenario, that assets end below the face value.
  pub fn default_probability(&self, inputs: &LoanInputs<'_>) -> Result<ArrayD<f64>, PayoffError> {
    self.evaluate(inputs, |engine, sc| {
      engine.default_probability_kernel(sc.face, &sc.moments)
    })
  }

  /// `F - L` per scenario.
  pub fn expected_loss(&self, inputs: &LoanInputs<'_>) -> Result<ArrayD<f64>, PayoffError> {
    self.evaluate(inputs, |engine, sc| {
      sc.face - engine.payoff_kernel(sc.face, &sc.moments)
    })
  }

  /// Continuously compounded spread `ln(F / L) / T` implied by the payoff.
  pub fn yield_spread(&self, inputs: &LoanInputs<'_>) -> Result<ArrayD<f64>, PayoffError> {
    self.evaluate(inputs, |engine, sc| {
      let payoff = engine
        .payoff_kernel(sc.face, &sc.moments)
        .max(f64::MIN_POSITIVE);
      (sc.face / payoff).ln() / sc.t
    })
  }

  fn is_degenerate(&self, moments: &ConditionalMoments) -> bool {
    moments.idiosyncratic_std <= self.config.min_idiosyncratic_std
  }

  fn payoff_kernel(&self, face: f64, moments: &ConditionalMoments) -> f64 {
    if self.is_degenerate(moments) {
      return moments.log_mean.exp().min(face);
    }

    let s = moments.idiosyncratic_std;
    let a = (face.ln() - moments.log_mean) / s;
    let repaid = weighted_cdf(face, face.ln(), -a);
    let recovery = weighted_cdf(
      moments.expected_asset_value(),
      moments.log_mean + 0.5 * s * s,
      a - s,
    );

    (repaid + recovery).clamp(0.0, face)
  }

  fn default_probability_kernel(&self, face: f64, moments: &ConditionalMoments) -> f64 {
    if self.is_degenerate(moments) {
      return if moments.log_mean < face.ln() { 1.0 } else { 0.0 };
    }

    norm_cdf((face.ln() - moments.log_mean) / moments.idiosyncratic_std)
  }

  fn evaluate<K>(&self, inputs: &LoanInputs<'_>, kernel: K) -> Result<ArrayD<f64>, PayoffError>
  where
    K: Fn(&Self, &Scenario) -> f64 + Send + Sync,
  {
    inputs.validate()?;
    let shape = inputs.shape()?;

    let face = inputs.face.broadcast_to("face", &shape)?;
    let f1j = inputs.f1j.broadcast_to("f1j", &shape)?;
    let ival = inputs.ival.broadcast_to("ival", &shape)?;
    let rho = inputs.rho.broadcast_to("rho", &shape)?;
    let sig = inputs.sig.broadcast_to("sig", &shape)?;
    let t = inputs.t.broadcast_to("t", &shape)?;

    let scenarios = shape.iter().product::<usize>();
    let parallel = scenarios >= self.config.parallel_threshold;
    tracing::debug!(?shape, scenarios, parallel, "evaluating loan grid");

    let moments_zip = Zip::from(&f1j).and(&ival).and(&rho).and(&sig).and(&t);
    let moments = if parallel {
      moments_zip.par_map_collect(|&f1j, &ival, &rho, &sig, &t| {
        conditional_moments(f1j, ival, rho, sig, t)
      })
    } else {
      moments_zip.map_collect(|&f1j, &ival, &rho, &sig, &t| {
        conditional_moments(f1j, ival, rho, sig, t)
      })
    };

    if scenarios > 0 && moments.iter().all(|m| self.is_degenerate(m)) {
      tracing::trace!("no idiosyncratic risk left, payoff is deterministic");
    }

    let payoff_zip = Zip::from(&moments).and(&face).and(&t);
    let out = if parallel {
      payoff_zip.par_map_collect(|&moments, &face, &t| kernel(self, &Scenario { face, t, moments }))
    } else {
      payoff_zip.map_collect(|&moments, &face, &t| kernel(self, &Scenario { face, t, moments }))
    };

    if let Some(index) = out.iter().position(|v| !v.is_finite()) {
      tracing::warn!(index, "non-finite loan payoff");
      return Err(PayoffError::NumericalInstability { index });
    }

    Ok(out)
  }
}

/// Expected lender payoff at maturity for every scenario in `f1j`.
///
/// Each argument is an `f64` or a borrowed array; all are broadcast together
/// and the result has the broadcast shape.
pub fn loan_payoff<'a>(
  face: impl Into<Operand<'a>>,
  f1j: impl Into<Operand<'a>>,
  ival: impl Into<Operand<'a>>,
  rho: impl Into<Operand<'a>>,
  sig: impl Into<Operand<'a>>,
  t: impl Into<Operand<'a>>,
) -> Result<ArrayD<f64>, PayoffError> {
  LoanPayoffEngine::default().payoff(&LoanInputs::new(face, f1j, ival, rho, sig, t))
}

/// A loan with scalar parameters, priced over a scenario grid of any rank.
#[derive(ImplNew, Clone, Copy, Debug)]
pub struct LoanPayoff {
  /// Face value due at maturity
  pub face: f64,
  /// Initial asset value
  pub ival: f64,
  /// Loading on the systematic factor
  pub rho: f64,
  /// Asset volatility
  pub sig: f64,
  /// Time to maturity in years
  pub t: f64,
}

impl LoanPayoff {
  pub fn validate(&self) -> Result<(), PayoffError> {
    for (name, value) in [
      ("face", self.face),
      ("ival", self.ival),
      ("sig", self.sig),
      ("t", self.t),
    ] {
      Operand::from(value).ensure_positive(name)?;
    }
    Operand::from(self.rho).ensure_unit_interval("rho")
  }

  /// Payoff over `f1j`, keeping its dimensionality.
  pub fn payoff<S, D>(&self, f1j: &ArrayBase<S, D>) -> Result<Array<f64, D>, PayoffError>
  where
    S: Data<Elem = f64>,
    D: Dimension,
  {
    self.payoff_with(&LoanPayoffEngine::default(), f1j)
  }

  pub fn payoff_with<S, D>(
    &self,
    engine: &LoanPayoffEngine,
    f1j: &ArrayBase<S, D>,
  ) -> Result<Array<f64, D>, PayoffError>
  where
    S: Data<Elem = f64>,
    D: Dimension,
  {
    let grid = engine.payoff(&self.inputs(f1j))?;
    Self::restore_dim(grid, f1j)
  }

  pub fn default_probability<S, D>(&self, f1j: &ArrayBase<S, D>) -> Result<Array<f64, D>, PayoffError>
  where
    S: Data<Elem = f64>,
    D: Dimension,
  {
    let grid = LoanPayoffEngine::default().default_probability(&self.inputs(f1j))?;
    Self::restore_dim(grid, f1j)
  }

  fn inputs<'a, S, D>(&self, f1j: &'a ArrayBase<S, D>) -> LoanInputs<'a>
  where
    S: Data<Elem = f64>,
    D: Dimension,
  {
    LoanInputs::new(self.face, f1j, self.ival, self.rho, self.sig, self.t)
  }

  fn restore_dim<S, D>(grid: ArrayD<f64>, f1j: &ArrayBase<S, D>) -> Result<Array<f64, D>, PayoffError>
  where
    S: Data<Elem = f64>,
    D: Dimension,
  {
    let shape = grid.shape().to_vec();
    grid
      .into_dimensionality::<D>()
      .map_err(|_| PayoffError::ShapeMismatch {
        name: "f1j",
        shape: f1j.shape().to_vec(),
        target: shape,
      })
  }
}
