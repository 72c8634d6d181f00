//! Grid search over a regular parameter lattice.
//!
//! Every lattice point is evaluated and the one with the lowest chi-squared is
//! returned as the starting point of the subsequent minimisation. Points that
//! violate the linear constraints are excluded rather than treated as errors.

use ndarray::Array1;
use tracing::debug;

use crate::error::{DispError, Result};
use crate::parameters::{Bounds, LinearConstraints};

/// Largest lattice the grid search will walk.
pub const MAX_GRID_POINTS: usize = 100_000_000;

/// The best point of a grid search.
#[derive(Debug, Clone)]
pub struct GridResult {
    pub params: Array1<f64>,
    pub cost: f64,
    /// Number of lattice points evaluated.
    pub func_evals: usize,
    /// Number of lattice points skipped for violating the constraints.
    pub excluded: usize,
}

/// Total number of lattice points, or an error if the lattice is too large.
pub fn grid_size(inc: &[usize]) -> Result<usize> {
    inc.iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n.max(1)))
        .filter(|&total| total <= MAX_GRID_POINTS)
        .ok_or_else(|| {
            DispError::InvalidInput(format!(
                "The grid with increments {:?} exceeds {} points",
                inc, MAX_GRID_POINTS
            ))
        })
}

/// Evaluate `f` over the lattice spanned by `bounds` and `inc`.
///
/// `bounds` and the constraints are in the same (scaled) coordinates as the
/// vector passed to `f`. A dimension with a single increment is held at its
/// lower bound.
pub fn grid_search<F>(
    f: F,
    bounds: &[Bounds],
    inc: &[usize],
    constraints: Option<&LinearConstraints>,
) -> Result<GridResult>
where
    F: Fn(&Array1<f64>) -> Result<f64>,
{
    if bounds.len() != inc.len() {
        return Err(DispError::DimensionMismatch(format!(
            "{} grid bounds for {} increments",
            bounds.len(),
            inc.len()
        )));
    }
    let total = grid_size(inc)?;
    let n = bounds.len();

    let mut counter = vec![0usize; n];
    let mut point = Array1::zeros(n);
    let mut best: Option<(Array1<f64>, f64)> = None;
    let mut func_evals = 0;
    let mut excluded = 0;

    for _ in 0..total {
        for j in 0..n {
            point[j] = bounds[j].grid_value(counter[j], inc[j]);
        }

        if constraints.map_or(true, |c| c.is_feasible(&point)) {
            let cost = f(&point)?;
            func_evals += 1;
            let better = match &best {
                None => true,
                Some((_, best_cost)) => cost < *best_cost,
            };
            if better && !cost.is_nan() {
                best = Some((point.clone(), cost));
            }
        } else {
            excluded += 1;
        }

        // Odometer increment, last dimension fastest.
        for j in (0..n).rev() {
            counter[j] += 1;
            if counter[j] < inc[j].max(1) {
                break;
            }
            counter[j] = 0;
        }
    }

    debug!(func_evals, excluded, "Grid search complete");

    let (params, cost) = best.ok_or_else(|| {
        DispError::Optimisation(format!(
            "All {} grid points violate the parameter constraints",
            excluded
        ))
    })?;

    Ok(GridResult {
        params,
        cost,
        func_evals,
        excluded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    fn paraboloid(p: &Array1<f64>) -> Result<f64> {
        Ok((p[0] - 2.0).powi(2) + (p[1] + 1.0).powi(2))
    }

    #[test]
    fn test_finds_lattice_minimum() {
        let bounds = [Bounds::new(0.0, 4.0).unwrap(), Bounds::new(-2.0, 2.0).unwrap()];
        let result = grid_search(paraboloid, &bounds, &[5, 5], None).unwrap();
        assert_eq!(result.func_evals, 25);
        assert_relative_eq!(result.params[0], 2.0);
        assert_relative_eq!(result.params[1], -1.0);
        assert_relative_eq!(result.cost, 0.0);
    }

    #[test]
    fn test_single_increment_uses_lower_bound() {
        let bounds = [Bounds::new(1.0, 4.0).unwrap(), Bounds::new(-2.0, 2.0).unwrap()];
        let result = grid_search(paraboloid, &bounds, &[1, 5], None).unwrap();
        assert_eq!(result.func_evals, 5);
        assert_eq!(result.params[0], 1.0);
    }

    #[test]
    fn test_infeasible_points_excluded() {
        // x >= 3
        let constraints = LinearConstraints {
            a: Array2::from_shape_vec((1, 2), vec![1.0, 0.0]).unwrap(),
            b: array![3.0],
        };
        let bounds = [Bounds::new(0.0, 4.0).unwrap(), Bounds::new(-2.0, 2.0).unwrap()];
        let result = grid_search(paraboloid, &bounds, &[5, 5], Some(&constraints)).unwrap();
        assert_eq!(result.excluded, 15);
        assert_eq!(result.params[0], 3.0);
    }

    #[test]
    fn test_all_points_infeasible() {
        let constraints = LinearConstraints {
            a: Array2::from_shape_vec((1, 2), vec![1.0, 0.0]).unwrap(),
            b: array![10.0],
        };
        let bounds = [Bounds::new(0.0, 4.0).unwrap(), Bounds::new(-2.0, 2.0).unwrap()];
        assert!(grid_search(paraboloid, &bounds, &[3, 3], Some(&constraints)).is_err());
    }

    #[test]
    fn test_oversized_grid_rejected() {
        assert!(grid_size(&[1000, 1000, 1000]).is_err());
        assert_eq!(grid_size(&[3, 4, 1]).unwrap(), 12);
    }
}
