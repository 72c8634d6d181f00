//! Integration tests for the Levenberg-Marquardt minimiser on plain problems.

use approx::assert_relative_eq;
use dispfit_rs::lm::{DecompositionMethod, LevenbergMarquardt};
use dispfit_rs::{DispError, Problem, Result};
use ndarray::{array, Array1, Array2};

/// f(x) = a * x + b
struct LinearModel {
    x_data: Array1<f64>,
    y_data: Array1<f64>,
}

impl Problem for LinearModel {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        if params.len() != 2 {
            return Err(DispError::DimensionMismatch(format!(
                "Expected 2 parameters, got {}",
                params.len()
            )));
        }
        let (a, b) = (params[0], params[1]);
        Ok(self
            .x_data
            .iter()
            .zip(&self.y_data)
            .map(|(x, y)| a * x + b - y)
            .collect())
    }

    fn parameter_count(&self) -> usize {
        2
    }

    fn residual_count(&self) -> usize {
        self.x_data.len()
    }

    fn jacobian(&self, _params: &Array1<f64>) -> Result<Array2<f64>> {
        let mut jac = Array2::zeros((self.x_data.len(), 2));
        for (i, &x) in self.x_data.iter().enumerate() {
            jac[[i, 0]] = x;
            jac[[i, 1]] = 1.0;
        }
        Ok(jac)
    }

    fn has_custom_jacobian(&self) -> bool {
        true
    }
}

/// f(x) = a * exp(-b * x), with the finite difference Jacobian.
struct ExponentialModel {
    x_data: Array1<f64>,
    y_data: Array1<f64>,
}

impl Problem for ExponentialModel {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        let (a, b) = (params[0], params[1]);
        Ok(self
            .x_data
            .iter()
            .zip(&self.y_data)
            .map(|(x, y)| a * (-b * x).exp() - y)
            .collect())
    }

    fn parameter_count(&self) -> usize {
        2
    }

    fn residual_count(&self) -> usize {
        self.x_data.len()
    }
}

/// Rosenbrock's function as the residuals `1 - x` and `10 (y - x^2)`.
struct RosenbrockProblem;

impl Problem for RosenbrockProblem {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        let (x, y) = (params[0], params[1]);
        Ok(array![1.0 - x, 10.0 * (y - x.powi(2))])
    }

    fn parameter_count(&self) -> usize {
        2
    }

    fn residual_count(&self) -> usize {
        2
    }

    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        Ok(array![[-1.0, 0.0], [-20.0 * params[0], 10.0]])
    }

    fn has_custom_jacobian(&self) -> bool {
        true
    }
}

fn noisy_line() -> LinearModel {
    LinearModel {
        x_data: array![0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
        y_data: array![3.1, 4.9, 7.1, 8.9, 11.1, 12.9],
    }
}

#[test]
fn test_linear_fit_matches_least_squares() {
    let result = LevenbergMarquardt::new()
        .minimize(&noisy_line(), array![1.0, 1.0])
        .unwrap();

    assert!(result.success);
    // Closed form: slope Sxy / Sxx = 34.7 / 17.5.
    let slope = 34.7 / 17.5;
    assert_relative_eq!(result.params[0], slope, epsilon = 1e-4);
    assert_relative_eq!(result.params[1], 8.0 - 2.5 * slope, epsilon = 1e-4);
    assert!(result.cost < 0.1);
}

#[test]
fn test_decomposition_methods_agree() {
    let mut fits = Vec::new();
    for method in [DecompositionMethod::Cholesky, DecompositionMethod::QR, DecompositionMethod::Auto] {
        let result = LevenbergMarquardt::new()
            .with_decomposition_method(method)
            .minimize(&noisy_line(), array![0.0, 0.0])
            .unwrap();
        assert!(result.success, "{:?}: {}", method, result.message);
        fits.push(result.params);
    }
    for params in &fits[1..] {
        assert_relative_eq!(params[0], fits[0][0], epsilon = 1e-4);
        assert_relative_eq!(params[1], fits[0][1], epsilon = 1e-4);
    }
}

#[test]
fn test_exponential_fit_with_numerical_jacobian() {
    let model = ExponentialModel {
        x_data: array![0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.5, 4.0],
        y_data: array![2.02, 1.67, 1.21, 0.98, 0.81, 0.62, 0.45, 0.39, 0.29],
    };
    assert!(!model.has_custom_jacobian());

    let lm = LevenbergMarquardt::new()
        .with_ftol(1e-6)
        .with_xtol(1e-6)
        .with_gtol(1e-6);
    let result = lm.minimize(&model, array![1.0, 0.1]).unwrap();

    assert!(result.success);
    assert_relative_eq!(result.params[0], 2.0, epsilon = 0.1);
    assert_relative_eq!(result.params[1], 0.5, epsilon = 0.1);
    assert!(result.cost < 0.02);

    // The default Jacobian follows the analytic derivatives.
    let p = array![2.0, 0.5];
    let jac = model.jacobian(&p).unwrap();
    for (i, &x) in model.x_data.iter().enumerate() {
        let e = (-0.5 * x).exp();
        assert_relative_eq!(jac[[i, 0]], e, epsilon = 1e-5);
        assert_relative_eq!(jac[[i, 1]], -2.0 * x * e, epsilon = 1e-5);
    }
}

#[test]
fn test_rosenbrock() {
    let lm = LevenbergMarquardt::new()
        .with_max_iterations(200)
        .with_ftol(1e-12)
        .with_xtol(1e-12)
        .with_gtol(1e-12);
    let result = lm.minimize(&RosenbrockProblem, array![-1.2, 1.0]).unwrap();

    assert!(result.success);
    assert_relative_eq!(result.params[0], 1.0, epsilon = 1e-4);
    assert_relative_eq!(result.params[1], 1.0, epsilon = 1e-4);
    assert!(result.cost < 1e-8);
}

#[test]
fn test_multiple_starting_points() {
    let model = LinearModel {
        x_data: array![0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
        y_data: array![3.0, 5.0, 7.0, 9.0, 11.0, 13.0],
    };
    let lm = LevenbergMarquardt::new();

    for start in [array![1.0, 1.0], array![0.0, 0.0], array![10.0, 10.0], array![-5.0, -5.0]] {
        let result = lm.minimize(&model, start.clone()).unwrap();
        assert!(result.success, "start {:?}: {}", start, result.message);
        assert_relative_eq!(result.params[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(result.params[1], 3.0, epsilon = 1e-4);
    }
}

#[test]
fn test_wrong_parameter_count() {
    let err = LevenbergMarquardt::new()
        .minimize(&noisy_line(), array![1.0, 1.0, 1.0])
        .unwrap_err();
    assert!(matches!(err, DispError::DimensionMismatch(_)));
}
