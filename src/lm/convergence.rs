//! Convergence criteria shared by the minimisers.
//!
//! The Levenberg-Marquardt minimiser tests parameter, chi-squared and gradient
//! changes; the simplex tests the chi-squared spread over its vertices. Both
//! report through [`ConvergenceStatus`].

use std::fmt;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Possible convergence states of a minimisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceStatus {
    /// The algorithm is still running.
    Running,

    /// Converged due to a small parameter change.
    ParameterConvergence,

    /// Converged due to a small chi-squared change.
    FunctionValueConvergence,

    /// Converged due to a small gradient.
    GradientConvergence,

    /// Terminated due to reaching the maximum number of iterations.
    MaxIterationsReached,

    /// Terminated due to a numerical error.
    NumericalError,
}

impl ConvergenceStatus {
    /// Returns true if the minimisation has terminated (either converged or failed).
    pub fn is_terminated(&self) -> bool {
        !matches!(self, ConvergenceStatus::Running)
    }

    /// Returns true if the minimisation has converged.
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            ConvergenceStatus::ParameterConvergence
                | ConvergenceStatus::FunctionValueConvergence
                | ConvergenceStatus::GradientConvergence
        )
    }

    /// The warning stored on the spins after a fit, if any.
    pub fn warning(&self) -> Option<&'static str> {
        match self {
            ConvergenceStatus::MaxIterationsReached => Some("Maximum number of iterations reached"),
            ConvergenceStatus::NumericalError => Some("Numerical error"),
            _ => None,
        }
    }

    /// Returns a description of the convergence status.
    pub fn description(&self) -> &'static str {
        match self {
            ConvergenceStatus::Running => "Minimisation is still running",
            ConvergenceStatus::ParameterConvergence => "Converged: small parameter change",
            ConvergenceStatus::FunctionValueConvergence => "Converged: small chi-squared change",
            ConvergenceStatus::GradientConvergence => "Converged: small gradient",
            ConvergenceStatus::MaxIterationsReached => "Terminated: maximum iterations reached",
            ConvergenceStatus::NumericalError => "Terminated: numerical error",
        }
    }
}

impl fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Criteria for determining when a minimisation has converged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceCriteria {
    /// Tolerance for the relative change in parameter values.
    pub xtol: f64,

    /// Tolerance for the relative change in chi-squared.
    pub ftol: f64,

    /// Tolerance for the gradient norm.
    pub gtol: f64,

    /// Maximum number of iterations.
    pub max_iterations: usize,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            xtol: 1e-8,
            ftol: 1e-8,
            gtol: 1e-8,
            max_iterations: 100,
        }
    }
}

impl ConvergenceCriteria {
    pub fn new(xtol: f64, ftol: f64, gtol: f64, max_iterations: usize) -> Self {
        Self {
            xtol,
            ftol,
            gtol,
            max_iterations,
        }
    }

    /// Check an accepted step.
    ///
    /// # Arguments
    ///
    /// * `params` - The parameter values before the step
    /// * `new_params` - The parameter values after the step
    /// * `cost` - The chi-squared value before the step
    /// * `new_cost` - The chi-squared value after the step
    /// * `gradient_norm` - The norm of the gradient
    /// * `iterations` - The number of iterations so far
    pub fn check(
        &self,
        params: &Array1<f64>,
        new_params: &Array1<f64>,
        cost: f64,
        new_cost: f64,
        gradient_norm: f64,
        iterations: usize,
    ) -> ConvergenceStatus {
        if !new_cost.is_finite() {
            return ConvergenceStatus::NumericalError;
        }

        if iterations >= self.max_iterations {
            return ConvergenceStatus::MaxIterationsReached;
        }

        if gradient_norm < self.gtol {
            return ConvergenceStatus::GradientConvergence;
        }

        let param_change = new_params
            .iter()
            .zip(params.iter())
            .map(|(a, b)| (a - b).abs() / b.abs().max(1.0))
            .fold(0.0, f64::max);
        if param_change < self.xtol {
            return ConvergenceStatus::ParameterConvergence;
        }

        let cost_change = (cost - new_cost).abs() / cost.max(1e-10);
        if cost_change < self.ftol {
            return ConvergenceStatus::FunctionValueConvergence;
        }

        ConvergenceStatus::Running
    }

    /// Check the chi-squared spread of a simplex, `f_worst - f_best`.
    pub fn check_spread(&self, f_best: f64, f_worst: f64, iterations: usize) -> ConvergenceStatus {
        if !f_best.is_finite() {
            return ConvergenceStatus::NumericalError;
        }
        if (f_worst - f_best).abs() <= self.ftol {
            return ConvergenceStatus::FunctionValueConvergence;
        }
        if iterations >= self.max_iterations {
            return ConvergenceStatus::MaxIterationsReached;
        }
        ConvergenceStatus::Running
    }
}
