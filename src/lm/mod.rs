//! Levenberg-Marquardt algorithm implementation.
//!
//! The gradient based minimiser of the dispersion fits. It works on the scaled
//! parameter vector of a [`Problem`](crate::problem::Problem) and has no notion
//! of constraints; constrained fits go through the log barrier simplex in
//! [`crate::minimise`].

pub mod algorithm;
pub mod config;
pub mod convergence;

pub use algorithm::{LevenbergMarquardt, LmResult};
pub use config::{DecompositionMethod, LmConfig};
pub use convergence::{ConvergenceCriteria, ConvergenceStatus};
