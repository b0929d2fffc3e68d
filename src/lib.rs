//! # modified-merton
//!
//! $$
//! L_j = \mathbb E\!\left[\min(A_T, F)\mid f_{1j}\right]
//! $$
//!
//! Closed-form expected lender payoff of a zero-coupon loan in a single-factor
//! structural credit model, evaluated elementwise over a grid of systematic
//! asset value scenarios. Distance-to-default, implied asset volatility and
//! capital shortfall measures of the modified Merton family are built by
//! calling [`loan_payoff`] inside their own loops.
//!
//! ```ignore
//! use ndarray::Array1;
//! use modified_merton::loan_payoff;
//!
//! let f1j = Array1::linspace(10.0, 300.0, 50);
//! let payoff = loan_payoff(100.0, &f1j, 100.0, 0.3, 0.25, 1.0)?;
//! ```

pub mod error;
pub mod quant;

pub use error::PayoffError;
pub use quant::broadcast::Operand;
pub use quant::pricing::loan_payoff::conditional_moments;
pub use quant::pricing::loan_payoff::loan_payoff;
pub use quant::pricing::loan_payoff::ConditionalMoments;
pub use quant::pricing::loan_payoff::LoanInputs;
pub use quant::pricing::loan_payoff::LoanPayoff;
pub use quant::pricing::loan_payoff::LoanPayoffConfig;
pub use quant::pricing::loan_payoff::LoanPayoffEngine;
