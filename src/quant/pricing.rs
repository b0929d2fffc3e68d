//! # Pricing
//!
//! $$
//! V_0=\mathbb E^{\mathbb Q}\!\left[\Pi(A_T)\mid f_{1j}\right]
//! $$
//!
pub mod loan_payoff;
