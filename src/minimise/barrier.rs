//! Logarithmic barrier method for linearly constrained minimisation.
//!
//! The constrained problem `min f(x)` subject to `A.x >= b` is replaced by a
//! sequence of unconstrained problems
//!
//! ```text
//! phi(x, mu) = f(x) - mu * sum(ln(A.x - b))
//! ```
//!
//! each minimised by the simplex from the solution of the previous one, with
//! `mu` decreasing towards zero. The barrier is infinite outside the feasible
//! region, so every iterate stays strictly inside it.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DispError, Result};
use crate::lm::ConvergenceStatus;
use crate::parameters::LinearConstraints;

use super::simplex::{nelder_mead, SimplexConfig, SimplexResult};

/// Configuration options for the log barrier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarrierConfig {
    /// Barrier weight of the first outer iteration. Default: 1.0
    pub initial_mu: f64,

    /// Factor applied to the barrier weight after each outer iteration. Default: 0.1
    pub reduction: f64,

    /// Number of outer iterations. Default: 8
    pub outer_iterations: usize,

    /// Relative distance by which infeasible start points are moved inside. Default: 1e-6
    pub interior_offset: f64,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            initial_mu: 1.0,
            reduction: 0.1,
            outer_iterations: 8,
            interior_offset: 1e-6,
        }
    }
}

/// Move a start point strictly inside the feasible region.
///
/// Every violated or active row is satisfied by adjusting the parameter with
/// the largest coefficient in that row. Returns an error if the point cannot
/// be made interior.
pub fn make_interior(x: &Array1<f64>, constraints: &LinearConstraints, offset: f64) -> Result<Array1<f64>> {
    let mut x = x.clone();

    // Each pass fixes one bound of a pair; the second pass catches the other.
    for _ in 0..2 {
        let slack = constraints.slack(&x);
        for (row, &s) in slack.iter().enumerate() {
            if s > 0.0 {
                continue;
            }
            let coefficients = constraints.a.row(row);
            let Some((col, &a)) = coefficients
                .iter()
                .enumerate()
                .max_by(|(_, p), (_, q)| p.abs().total_cmp(&q.abs()))
            else {
                continue;
            };
            if a == 0.0 {
                continue;
            }
            let b = constraints.b[row];
            let delta = offset * b.abs().max(1.0);
            // Solve a.x_col = b + delta with the rest of the row held fixed.
            let rest: f64 = coefficients
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != col)
                .map(|(j, c)| c * x[j])
                .sum();
            x[col] = (b + delta - rest) / a;
        }
    }

    if constraints.is_interior(&x) {
        Ok(x)
    } else {
        Err(DispError::Optimisation(
            "No strictly feasible starting point could be found for the constrained minimisation".to_string(),
        ))
    }
}

/// The barrier penalised function value, infinite outside the feasible region.
pub fn barrier_value(f_value: f64, x: &Array1<f64>, constraints: &LinearConstraints, mu: f64) -> f64 {
    let slack = constraints.slack(x);
    if slack.iter().any(|&s| s <= 0.0) {
        return f64::INFINITY;
    }
    f_value - mu * slack.iter().map(|s| s.ln()).sum::<f64>()
}

/// Minimise `f` subject to `constraints` with a log barrier simplex.
///
/// The reported cost is the unpenalised value of `f` at the solution.
pub fn log_barrier_minimise<F>(
    f: F,
    constraints: &LinearConstraints,
    x0: &Array1<f64>,
    barrier: &BarrierConfig,
    simplex: &SimplexConfig,
) -> Result<SimplexResult>
where
    F: Fn(&Array1<f64>) -> Result<f64>,
{
    if constraints.is_empty() {
        return nelder_mead(f, x0.clone(), simplex);
    }

    let mut x = make_interior(x0, constraints, barrier.interior_offset)?;
    let mut mu = barrier.initial_mu;
    let mut iterations = 0;
    let mut func_evals = 0;
    let mut status = ConvergenceStatus::Running;

    for outer in 0..barrier.outer_iterations.max(1) {
        let penalised = |p: &Array1<f64>| -> Result<f64> {
            if !constraints.is_interior(p) {
                return Ok(f64::INFINITY);
            }
            Ok(barrier_value(f(p)?, p, constraints, mu))
        };
        let result = nelder_mead(penalised, x.clone(), simplex)?;
        iterations += result.iterations;
        func_evals += result.func_evals;
        status = result.status;
        x = result.params;
        debug!(outer, mu, penalised = result.cost, "Barrier iteration");
        mu *= barrier.reduction;
    }

    let cost = f(&x)?;
    func_evals += 1;

    Ok(SimplexResult {
        params: x,
        cost,
        iterations,
        func_evals,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};

    fn lower_bound(value: f64) -> LinearConstraints {
        LinearConstraints {
            a: Array2::from_shape_vec((1, 2), vec![1.0, 0.0]).unwrap(),
            b: array![value],
        }
    }

    #[test]
    fn test_make_interior() {
        let constraints = lower_bound(1.0);
        let x = make_interior(&array![-5.0, 3.0], &constraints, 1e-6).unwrap();
        assert!(constraints.is_interior(&x));
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-5);
        assert_eq!(x[1], 3.0);

        // 0.5 <= p <= 1, starting on the upper bound.
        let pair = LinearConstraints {
            a: Array2::from_shape_vec((2, 1), vec![1.0, -1.0]).unwrap(),
            b: array![0.5, -1.0],
        };
        let x = make_interior(&array![1.0], &pair, 1e-6).unwrap();
        assert!(x[0] < 1.0 && x[0] > 0.5);
    }

    #[test]
    fn test_constrained_minimum_on_boundary() {
        // Unconstrained minimum at (0, 2), constrained to x >= 1.
        let f = |p: &Array1<f64>| -> Result<f64> { Ok(p[0].powi(2) + (p[1] - 2.0).powi(2)) };
        let constraints = lower_bound(1.0);
        let result = log_barrier_minimise(
            f,
            &constraints,
            &array![3.0, 0.0],
            &BarrierConfig::default(),
            &SimplexConfig::default(),
        )
        .unwrap();

        assert!(result.params[0] >= 1.0);
        assert_abs_diff_eq!(result.params[0], 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(result.params[1], 2.0, epsilon = 1e-3);
        assert_abs_diff_eq!(result.cost, 1.0, epsilon = 1e-2);
    }

    #[test]
    fn test_interior_minimum_unaffected() {
        let f = |p: &Array1<f64>| -> Result<f64> { Ok((p[0] - 4.0).powi(2) + (p[1] - 2.0).powi(2)) };
        let result = log_barrier_minimise(
            f,
            &lower_bound(1.0),
            &array![2.0, 0.0],
            &BarrierConfig::default(),
            &SimplexConfig::default(),
        )
        .unwrap();
        assert_abs_diff_eq!(result.params[0], 4.0, epsilon = 1e-3);
        assert_abs_diff_eq!(result.params[1], 2.0, epsilon = 1e-3);
    }

    #[test]
    fn test_barrier_value() {
        let constraints = lower_bound(1.0);
        assert_eq!(barrier_value(5.0, &array![0.5, 0.0], &constraints, 1.0), f64::INFINITY);
        assert_abs_diff_eq!(barrier_value(5.0, &array![2.0, 0.0], &constraints, 1.0), 5.0, epsilon = 1e-12);
    }
}
