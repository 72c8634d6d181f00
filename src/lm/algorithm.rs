//! Implementation of the Levenberg-Marquardt algorithm.

use std::fmt;

use ndarray::{s, Array1, Array2};
use tracing::trace;

use crate::error::{DispError, Result};
use crate::problem::Problem;

use super::config::{DecompositionMethod, LmConfig};
use super::convergence::{ConvergenceCriteria, ConvergenceStatus};

/// Result of the Levenberg-Marquardt optimization.
#[derive(Debug, Clone)]
pub struct LmResult {
    /// Optimized parameter values
    pub params: Array1<f64>,

    /// Residuals at the solution
    pub residuals: Array1<f64>,

    /// Chi-squared value at the solution
    pub cost: f64,

    /// Number of accepted steps
    pub iterations: usize,

    /// Number of function evaluations
    pub func_evals: usize,

    /// Number of Jacobian evaluations
    pub jac_evals: usize,

    /// How the minimisation terminated
    pub status: ConvergenceStatus,

    /// Whether the optimization converged
    pub success: bool,

    /// A message describing the result
    pub message: String,

    /// The Jacobian matrix at the solution (if requested)
    pub jacobian: Option<Array2<f64>>,
}

impl fmt::Display for LmResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optimization Result:")?;
        writeln!(f, "  Success: {}", self.success)?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Chi2: {:.6e}", self.cost)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        writeln!(f, "  Parameters: {:?}", self.params)?;
        Ok(())
    }
}

/// The Levenberg-Marquardt optimizer.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    config: LmConfig,
}

impl LevenbergMarquardt {
    /// Create a new Levenberg-Marquardt optimizer with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new Levenberg-Marquardt optimizer with the given configuration.
    pub fn with_config(config: LmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Set the tolerance for the relative change in chi-squared.
    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.config.ftol = ftol;
        self
    }

    /// Set the tolerance for the relative change in parameter values.
    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.config.xtol = xtol;
        self
    }

    /// Set the tolerance for gradient norm.
    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.config.gtol = gtol;
        self
    }

    /// Set the initial value for the damping parameter.
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.config.initial_lambda = lambda;
        self
    }

    /// Set the method used for solving the linear system.
    pub fn with_decomposition_method(mut self, method: DecompositionMethod) -> Self {
        self.config.decomposition_method = method;
        self
    }

    /// Set whether to calculate and return the Jacobian at the solution.
    pub fn with_calc_jacobian(mut self, calc_jacobian: bool) -> Self {
        self.config.calc_jacobian = calc_jacobian;
        self
    }

    fn criteria(&self) -> ConvergenceCriteria {
        ConvergenceCriteria::new(
            self.config.xtol,
            self.config.ftol,
            self.config.gtol,
            self.config.max_iterations,
        )
    }

    /// Minimize the chi-squared value of the given problem.
    ///
    /// # Arguments
    ///
    /// * `problem` - The problem to solve
    /// * `initial_params` - Initial guess for the parameter values
    ///
    /// # Returns
    ///
    /// * `Result<LmResult>` - The result of the optimization
    pub fn minimize<P: Problem>(&self, problem: &P, initial_params: Array1<f64>) -> Result<LmResult> {
        let n_params = problem.parameter_count();
        if initial_params.len() != n_params {
            return Err(DispError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                n_params,
                initial_params.len()
            )));
        }

        let criteria = self.criteria();
        let mut params = initial_params;
        let mut lambda = self.config.initial_lambda;

        let mut residuals = problem.eval(&params)?;
        let mut cost: f64 = residuals.iter().map(|r| r.powi(2)).sum();
        let mut func_evals = 1;
        let mut jac_evals = 0;
        let mut iterations = 0;

        let status = 'outer: loop {
            let jacobian = problem.jacobian(&params)?;
            jac_evals += 1;
            if !problem.has_custom_jacobian() {
                func_evals += n_params + 1;
            }

            let gradient_norm = jacobian.t().dot(&residuals).iter().map(|g| g * g).sum::<f64>().sqrt();
            if gradient_norm < self.config.gtol {
                break ConvergenceStatus::GradientConvergence;
            }
            if iterations >= self.config.max_iterations {
                break ConvergenceStatus::MaxIterationsReached;
            }

            loop {
                let Some(step) = self.calculate_step(&jacobian, &residuals, lambda) else {
                    lambda = (lambda * self.config.lambda_up_factor).min(self.config.max_lambda);
                    if lambda >= self.config.max_lambda {
                        break 'outer ConvergenceStatus::NumericalError;
                    }
                    continue;
                };

                let new_params = &params + &step;
                let new_residuals = problem.eval(&new_params)?;
                func_evals += 1;
                let new_cost: f64 = new_residuals.iter().map(|r| r.powi(2)).sum();

                if new_cost.is_finite() && new_cost < cost {
                    iterations += 1;
                    let status =
                        criteria.check(&params, &new_params, cost, new_cost, gradient_norm, iterations);
                    trace!(iterations, chi2 = new_cost, lambda, "Accepted step");

                    params = new_params;
                    residuals = new_residuals;
                    cost = new_cost;
                    lambda = (lambda * self.config.lambda_down_factor).max(self.config.min_lambda);

                    if status.is_terminated() {
                        break 'outer status;
                    }
                    break;
                }

                lambda = (lambda * self.config.lambda_up_factor).min(self.config.max_lambda);
                if lambda >= self.config.max_lambda {
                    // No damped step decreases chi-squared any further.
                    break 'outer ConvergenceStatus::FunctionValueConvergence;
                }
            }
        };

        let jacobian = if self.config.calc_jacobian {
            Some(problem.jacobian(&params)?)
        } else {
            None
        };

        Ok(LmResult {
            params,
            residuals,
            cost,
            iterations,
            func_evals,
            jac_evals,
            status,
            success: status.is_converged(),
            message: status.description().to_string(),
            jacobian,
        })
    }

    /// Calculate the Levenberg-Marquardt step.
    ///
    /// This method solves `(J^T J + lambda I) delta = -J^T r`. Returns `None` if
    /// the system could not be solved.
    fn calculate_step(&self, j: &Array2<f64>, r: &Array1<f64>, lambda: f64) -> Option<Array1<f64>> {
        let jtj = j.t().dot(j);
        let jtr = j.t().dot(r);
        let mut a = jtj;
        for i in 0..a.nrows() {
            a[[i, i]] += lambda;
        }

        let solution = match self.config.decomposition_method {
            DecompositionMethod::Cholesky => cholesky_solve(&a, &jtr)?,
            DecompositionMethod::QR => solve_qr(j, r, lambda)?,
            DecompositionMethod::Auto => {
                cholesky_solve(&a, &jtr).or_else(|| solve_qr(j, r, lambda))?
            }
        };

        if solution.iter().all(|x| x.is_finite()) {
            Some(-solution)
        } else {
            None
        }
    }
}

/// Solve `A x = b` for a symmetric positive definite `A` via its Cholesky factor.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut l = a.clone();

    for k in 0..n {
        for j in 0..k {
            l[[k, k]] -= l[[k, j]] * l[[k, j]];
        }
        if l[[k, k]] <= 0.0 || !l[[k, k]].is_finite() {
            return None;
        }
        let lkk = l[[k, k]].sqrt();
        l[[k, k]] = lkk;
        for i in k + 1..n {
            for j in 0..k {
                l[[i, k]] -= l[[i, j]] * l[[k, j]];
            }
            l[[i, k]] /= lkk;
        }
    }

    // Forward substitution (L y = b)
    let mut y = b.clone();
    for i in 0..n {
        for j in 0..i {
            y[i] -= l[[i, j]] * y[j];
        }
        y[i] /= l[[i, i]];
    }

    // Backward substitution (L^T x = y)
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        x[i] = y[i];
        for j in (i + 1)..n {
            x[i] -= l[[j, i]] * x[j];
        }
        x[i] /= l[[i, i]];
    }

    Some(x)
}

/// Solve the damped least squares problem `[J; sqrt(lambda) I] x = [r; 0]` by
/// Gram-Schmidt QR decomposition.
fn solve_qr(j: &Array2<f64>, r: &Array1<f64>, lambda: f64) -> Option<Array1<f64>> {
    let (m, n) = j.dim();
    let mut aug = Array2::zeros((m + n, n));
    aug.slice_mut(s![..m, ..]).assign(j);
    let damping = lambda.max(0.0).sqrt();
    for i in 0..n {
        aug[[m + i, i]] = damping;
    }
    let mut rhs = Array1::zeros(m + n);
    rhs.slice_mut(s![..m]).assign(r);

    let rows = m + n;
    let mut q = aug;
    let mut rmat = Array2::zeros((n, n));

    for col in 0..n {
        for k in 0..col {
            let dot = (0..rows).map(|i| q[[i, k]] * q[[i, col]]).sum::<f64>();
            rmat[[k, col]] = dot;
            for i in 0..rows {
                q[[i, col]] -= dot * q[[i, k]];
            }
        }

        let norm = (0..rows).map(|i| q[[i, col]] * q[[i, col]]).sum::<f64>().sqrt();
        if norm <= 1e-14 {
            return None;
        }
        rmat[[col, col]] = norm;
        for i in 0..rows {
            q[[i, col]] /= norm;
        }
    }

    let qtb: Array1<f64> = (0..n)
        .map(|col| (0..rows).map(|i| q[[i, col]] * rhs[i]).sum::<f64>())
        .collect();

    let mut x = Array1::zeros(n);
    for row in (0..n).rev() {
        let mut value = qtb[row];
        for k in (row + 1)..n {
            value -= rmat[[row, k]] * x[k];
        }
        x[row] = value / rmat[[row, row]];
    }

    Some(x)
}
