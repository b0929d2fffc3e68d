//! # Errors
//!
//! $$
//! F,\ \text{ival},\ \sigma,\ T,\ f_{1j} > 0,\qquad 0\le\rho\le 1
//! $$
//!
use thiserror::Error;

/// Failure modes of the loan payoff engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PayoffError {
  /// An input value violates its domain.
  #[error("invalid parameter `{name}`: {value} (must be {requirement})")]
  InvalidParameter {
    /// Parameter name (`face`, `f1j`, `ival`, `rho`, `sig`, `t`)
    name: &'static str,
    /// Offending value
    value: f64,
    /// Human readable domain
    requirement: &'static str,
  },

  /// An input array cannot be broadcast against the others.
  #[error("parameter `{name}` with shape {shape:?} does not broadcast to {target:?}")]
  ShapeMismatch {
    /// Parameter name
    name: &'static str,
    /// Shape of the offending operand
    shape: Vec<usize>,
    /// Shape it had to broadcast to
    target: Vec<usize>,
  },

  /// The closed form produced a non-finite value at the given flat index.
  #[error("numerical instability at scenario {index}")]
  NumericalInstability {
    /// Row-major index into the output grid
    index: usize,
  },
}

impl PayoffError {
  pub(crate) fn positive(name: &'static str, value: f64) -> Self {
    Self::InvalidParameter {
      name,
      value,
      requirement: "finite and > 0",
    }
  }

  pub(crate) fn unit_interval(name: &'static str, value: f64) -> Self {
    Self::InvalidParameter {
      name,
      value,
      requirement: "within [0, 1]",
    }
  }
}
