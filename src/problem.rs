//! Problem definition trait.
//!
//! This module defines the `Problem` trait, which represents a weighted
//! least-squares target function. The chi-squared value of a fit is the sum of
//! the squared residuals returned by [`Problem::eval`].

use ndarray::{Array1, Array2};

use crate::error::Result;

/// A trait representing a weighted nonlinear least squares problem.
///
/// This trait defines the interface for target functions that can be optimised
/// by the Levenberg-Marquardt, simplex and grid search algorithms.
pub trait Problem {
    /// Evaluate the residuals at the given parameters.
    ///
    /// Each residual is the difference between the back-calculated and the
    /// measured value, divided by the measurement error.
    ///
    /// # Arguments
    ///
    /// * `params` - The parameter values at which to evaluate the residuals
    ///
    /// # Returns
    ///
    /// * A vector of residuals, or an error if the evaluation fails
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>>;

    /// Get the number of parameters in the problem.
    fn parameter_count(&self) -> usize;

    /// Get the number of residuals in the problem.
    fn residual_count(&self) -> usize;

    /// Evaluate the Jacobian matrix at the given parameters.
    ///
    /// The Jacobian is the matrix of partial derivatives of the residuals with respect
    /// to the parameters.
    ///
    /// # Default Implementation
    ///
    /// Forward finite differences.
    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>>
    where
        Self: Sized,
    {
        crate::utils::finite_difference::jacobian(self, params, None)
    }

    /// Check if this problem provides a custom Jacobian implementation.
    fn has_custom_jacobian(&self) -> bool {
        false
    }

    /// Evaluate the chi-squared value, the sum of squared residuals.
    fn eval_cost(&self, params: &Array1<f64>) -> Result<f64> {
        let residuals = self.eval(params)?;
        Ok(residuals.iter().map(|r| r.powi(2)).sum())
    }

    /// The gradient of the chi-squared value, `2 J^T r`.
    fn gradient(&self, params: &Array1<f64>) -> Result<Array1<f64>>
    where
        Self: Sized,
    {
        let residuals = self.eval(params)?;
        let jacobian = self.jacobian(params)?;
        Ok(jacobian.t().dot(&residuals) * 2.0)
    }
}
