//! Nelder-Mead downhill simplex minimisation.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{DispError, Result};
use crate::lm::{ConvergenceCriteria, ConvergenceStatus};

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Configuration options for the simplex algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimplexConfig {
    /// Maximum number of iterations. Default: 1000
    pub max_iterations: usize,

    /// Convergence threshold on the chi-squared spread over the vertices. Default: 1e-12
    pub func_tol: f64,

    /// Convergence threshold on the largest vertex distance from the best vertex. Default: 1e-12
    pub param_tol: f64,

    /// Relative perturbation of each coordinate for the initial simplex. Default: 0.05
    pub initial_step: f64,

    /// Absolute perturbation of zero valued coordinates. Default: 0.001
    pub zero_step: f64,
}

impl Default for SimplexConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            func_tol: 1e-12,
            param_tol: 1e-12,
            initial_step: 0.05,
            zero_step: 0.001,
        }
    }
}

impl SimplexConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_func_tol(mut self, func_tol: f64) -> Self {
        self.func_tol = func_tol;
        self
    }
}

/// Result of a simplex minimisation.
#[derive(Debug, Clone)]
pub struct SimplexResult {
    pub params: Array1<f64>,
    pub cost: f64,
    pub iterations: usize,
    pub func_evals: usize,
    pub status: ConvergenceStatus,
}

/// Build the initial simplex: the start point plus one vertex per dimension,
/// each offset along its own axis.
pub fn initial_simplex(x0: &Array1<f64>, config: &SimplexConfig) -> Vec<Array1<f64>> {
    let mut vertices = Vec::with_capacity(x0.len() + 1);
    vertices.push(x0.clone());
    for i in 0..x0.len() {
        let step = if x0[i] == 0.0 {
            config.zero_step
        } else {
            config.initial_step * x0[i].abs()
        };
        let mut vertex = x0.clone();
        vertex[i] += step;
        vertices.push(vertex);
    }
    vertices
}

/// Minimise `f` from `x0` with the Nelder-Mead algorithm.
///
/// Non-finite function values are treated as infinitely bad, which lets an
/// outer barrier reject infeasible vertices.
pub fn nelder_mead<F>(f: F, x0: Array1<f64>, config: &SimplexConfig) -> Result<SimplexResult>
where
    F: Fn(&Array1<f64>) -> Result<f64>,
{
    let n = x0.len();
    if n == 0 {
        return Err(DispError::InvalidInput(
            "The simplex needs at least one parameter".to_string(),
        ));
    }

    let eval = |x: &Array1<f64>| -> Result<f64> {
        let value = f(x)?;
        Ok(if value.is_nan() { f64::INFINITY } else { value })
    };

    let criteria = ConvergenceCriteria::new(config.param_tol, config.func_tol, 0.0, config.max_iterations);

    let mut vertices = initial_simplex(&x0, config);
    let mut values = vertices.iter().map(|v| eval(v)).collect::<Result<Vec<f64>>>()?;
    let mut func_evals = n + 1;
    let mut iterations = 0;

    let status = loop {
        // Sort the vertices from best to worst.
        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        vertices = order.iter().map(|&i| vertices[i].clone()).collect();
        values = order.iter().map(|&i| values[i]).collect();

        let status = criteria.check_spread(values[0], values[n], iterations);
        if status.is_terminated() {
            break status;
        }
        let spread = vertices[1..]
            .iter()
            .map(|v| (v - &vertices[0]).iter().fold(0.0f64, |m, x| m.max(x.abs())))
            .fold(0.0f64, f64::max);
        if spread <= config.param_tol {
            break ConvergenceStatus::ParameterConvergence;
        }

        iterations += 1;

        let mut centroid = Array1::zeros(n);
        for v in &vertices[..n] {
            centroid += v;
        }
        centroid /= n as f64;

        let reflected = &centroid + &((&centroid - &vertices[n]) * REFLECTION);
        let f_reflected = eval(&reflected)?;
        func_evals += 1;

        if f_reflected < values[0] {
            let expanded = &centroid + &((&reflected - &centroid) * EXPANSION);
            let f_expanded = eval(&expanded)?;
            func_evals += 1;
            if f_expanded < f_reflected {
                vertices[n] = expanded;
                values[n] = f_expanded;
            } else {
                vertices[n] = reflected;
                values[n] = f_reflected;
            }
            continue;
        }

        if f_reflected < values[n - 1] {
            vertices[n] = reflected;
            values[n] = f_reflected;
            continue;
        }

        // Contract towards the better of the worst and the reflected vertex.
        let (towards, f_towards) = if f_reflected < values[n] {
            (reflected, f_reflected)
        } else {
            (vertices[n].clone(), values[n])
        };
        let contracted = &centroid + &((&towards - &centroid) * CONTRACTION);
        let f_contracted = eval(&contracted)?;
        func_evals += 1;
        if f_contracted < f_towards {
            vertices[n] = contracted;
            values[n] = f_contracted;
            continue;
        }

        // Shrink every vertex towards the best one.
        for i in 1..=n {
            let shrunk = &vertices[0] + &((&vertices[i] - &vertices[0]) * SHRINK);
            values[i] = eval(&shrunk)?;
            vertices[i] = shrunk;
        }
        func_evals += n;
        trace!(iterations, best = values[0], "Simplex shrink");
    };

    let best = (0..=n)
        .min_by(|&a, &b| values[a].total_cmp(&values[b]))
        .unwrap_or(0);

    Ok(SimplexResult {
        params: vertices[best].clone(),
        cost: values[best],
        iterations,
        func_evals,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn rosenbrock(p: &Array1<f64>) -> Result<f64> {
        Ok((1.0 - p[0]).powi(2) + 100.0 * (p[1] - p[0].powi(2)).powi(2))
    }

    #[test]
    fn test_initial_simplex() {
        let vertices = initial_simplex(&array![2.0, 0.0], &SimplexConfig::default());
        assert_eq!(vertices.len(), 3);
        assert_abs_diff_eq!(vertices[1][0], 2.1, epsilon = 1e-12);
        assert_abs_diff_eq!(vertices[2][1], 0.001, epsilon = 1e-12);
    }

    #[test]
    fn test_rosenbrock() {
        let config = SimplexConfig::default().with_max_iterations(5000);
        let result = nelder_mead(rosenbrock, array![-1.2, 1.0], &config).unwrap();
        assert!(result.status.is_converged(), "{:?}", result.status);
        assert_abs_diff_eq!(result.params[0], 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(result.params[1], 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_infinite_region_avoided() {
        // Minimum at x = -1 lies outside the finite region x > 0.
        let f = |p: &Array1<f64>| -> Result<f64> {
            if p[0] <= 0.0 {
                Ok(f64::INFINITY)
            } else {
                Ok((p[0] + 1.0).powi(2))
            }
        };
        let result = nelder_mead(f, array![2.0], &SimplexConfig::default()).unwrap();
        assert!(result.params[0] > 0.0);
        assert!(result.params[0] < 1e-3);
    }

    #[test]
    fn test_iteration_cap() {
        let config = SimplexConfig::default().with_max_iterations(3);
        let result = nelder_mead(rosenbrock, array![-1.2, 1.0], &config).unwrap();
        assert_eq!(result.status, ConvergenceStatus::MaxIterationsReached);
        assert_eq!(result.iterations, 3);
    }
}
