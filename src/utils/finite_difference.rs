//! Finite difference methods for numerical differentiation.
//!
//! The dispersion targets without analytic derivatives rely on these to supply
//! the Jacobian to the Levenberg-Marquardt minimiser.

use ndarray::{Array1, Array2};

use crate::error::{DispError, Result};
use crate::problem::Problem;

/// Default step size for finite differences.
const DEFAULT_EPSILON: f64 = 1e-8;

/// The step for one parameter, relative to its magnitude.
fn step_size(value: f64, eps: f64) -> f64 {
    if value.abs() > eps {
        value.abs() * eps
    } else {
        eps
    }
}

/// Compute the Jacobian matrix using forward finite differences.
///
/// The Jacobian is the matrix of partial derivatives of the residuals with
/// respect to the parameters: J[i,j] = d residual[i] / d param[j].
///
/// # Arguments
///
/// * `problem` - The problem to evaluate
/// * `params` - The parameter values at which to evaluate the Jacobian
/// * `epsilon` - The step size for finite differences (optional)
///
/// # Returns
///
/// * `Result<Array2<f64>>` - The Jacobian matrix
pub fn jacobian(
    problem: &dyn Problem,
    params: &Array1<f64>,
    epsilon: Option<f64>,
) -> Result<Array2<f64>> {
    let eps = epsilon.unwrap_or(DEFAULT_EPSILON);
    let n_params = params.len();
    let n_residuals = problem.residual_count();

    let residuals = problem.eval(params)?;
    if residuals.len() != n_residuals {
        return Err(DispError::DimensionMismatch(format!(
            "Expected {} residuals, got {}",
            n_residuals,
            residuals.len()
        )));
    }

    let mut jac = Array2::zeros((n_residuals, n_params));
    for j in 0..n_params {
        let eps_j = step_size(params[j], eps);
        let mut params_perturbed = params.clone();
        params_perturbed[j] += eps_j;

        let residuals_perturbed = problem.eval(&params_perturbed)?;
        for i in 0..n_residuals {
            jac[[i, j]] = (residuals_perturbed[i] - residuals[i]) / eps_j;
        }
    }

    Ok(jac)
}

/// Compute the gradient of a scalar function using central finite differences.
///
/// # Arguments
///
/// * `f` - The function to differentiate
/// * `params` - The parameter values at which to evaluate the gradient
/// * `epsilon` - The step size for finite differences (optional)
#[cfg(test)]
pub fn gradient<F>(f: F, params: &Array1<f64>, epsilon: Option<f64>) -> Result<Array1<f64>>
where
    F: Fn(&Array1<f64>) -> Result<f64>,
{
    let eps = epsilon.unwrap_or(DEFAULT_EPSILON);
    let mut grad = Array1::zeros(params.len());

    for j in 0..params.len() {
        let eps_j = step_size(params[j], eps);

        let mut params_forward = params.clone();
        params_forward[j] += eps_j;
        let mut params_backward = params.clone();
        params_backward[j] -= eps_j;

        grad[j] = (f(&params_forward)? - f(&params_backward)?) / (2.0 * eps_j);
    }

    Ok(grad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    // r1 = x^2 - 1, r2 = y^2 - 2
    struct Quadratic;

    impl Problem for Quadratic {
        fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
            Ok(array![params[0].powi(2) - 1.0, params[1].powi(2) - 2.0])
        }

        fn parameter_count(&self) -> usize {
            2
        }

        fn residual_count(&self) -> usize {
            2
        }
    }

    #[test]
    fn test_jacobian() {
        let jac = jacobian(&Quadratic, &array![2.0, 3.0], None).unwrap();
        assert_eq!(jac.shape(), &[2, 2]);
        assert_relative_eq!(jac[[0, 0]], 4.0, epsilon = 1e-5);
        assert_relative_eq!(jac[[0, 1]], 0.0, epsilon = 1e-5);
        assert_relative_eq!(jac[[1, 1]], 6.0, epsilon = 1e-5);
    }

    #[test]
    fn test_gradient() {
        // f(x, y) = x^2 + 2y^2 + xy, grad at (2, 3) = [7, 14]
        let f = |p: &Array1<f64>| -> Result<f64> {
            Ok(p[0].powi(2) + 2.0 * p[1].powi(2) + p[0] * p[1])
        };
        let grad = gradient(f, &array![2.0, 3.0], None).unwrap();
        assert_relative_eq!(grad[0], 7.0, epsilon = 1e-4);
        assert_relative_eq!(grad[1], 14.0, epsilon = 1e-4);
    }
}
