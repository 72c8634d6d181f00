//! Linear inequality constraints of the form `A.x >= b`.
//!
//! The constraints are expressed in the scaled coordinates the optimisers work
//! in, so a row entry for parameter `i` carries the scaling factor of `i`.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::parameters::{Param, ParamInfo};

/// Upper limit of the R20 rates.
pub const R20_MAX: f64 = 200.0;

/// Upper limit of the exchange rate.
pub const KEX_MAX: f64 = 1e6;

/// A set of linear inequality constraints `A.x >= b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearConstraints {
    pub a: Array2<f64>,
    pub b: Array1<f64>,
}

impl LinearConstraints {
    /// No constraints for a vector of `n` parameters.
    pub fn empty(n: usize) -> Self {
        Self {
            a: Array2::zeros((0, n)),
            b: Array1::zeros(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.b.is_empty()
    }

    /// The number of constraint rows.
    pub fn len(&self) -> usize {
        self.b.len()
    }

    /// The slack `A.x - b` of every row. Feasible points have no negative slack.
    pub fn slack(&self, x: &Array1<f64>) -> Array1<f64> {
        self.a.dot(x) - &self.b
    }

    /// Whether `x` satisfies every constraint.
    pub fn is_feasible(&self, x: &Array1<f64>) -> bool {
        self.is_empty() || self.slack(x).iter().all(|&s| s >= 0.0)
    }

    /// Whether `x` lies strictly inside the feasible region.
    pub fn is_interior(&self, x: &Array1<f64>) -> bool {
        self.is_empty() || self.slack(x).iter().all(|&s| s > 0.0)
    }
}

/// Build the linear constraints of a parameter vector layout.
///
/// `scaling` holds the diagonal of the scaling matrix. The limits are:
///
/// * `r2eff`, `i0`, `iinf`, `phi_ex`, `k_AB` >= 0
/// * 0 <= `r2`, `r2a`, `r2b` <= 200
/// * 0.5 <= `pA` <= 1
/// * 0 <= `kex` <= 1e6
///
/// The chemical shift difference is unconstrained.
pub fn linear_constraints(infos: &[ParamInfo], scaling: &Array1<f64>) -> LinearConstraints {
    let n = infos.len();
    let mut rows: Vec<(usize, f64, f64)> = Vec::new();

    for (i, info) in infos.iter().enumerate() {
        let s = scaling.get(i).copied().unwrap_or(1.0);
        match info.param {
            Param::R2eff | Param::I0 | Param::Iinf | Param::PhiEx | Param::KAb => {
                rows.push((i, s, 0.0));
            }
            Param::R2 | Param::R2a | Param::R2b => {
                rows.push((i, s, 0.0));
                rows.push((i, -s, -R20_MAX));
            }
            Param::Pa => {
                rows.push((i, s, 0.5));
                rows.push((i, -s, -1.0));
            }
            Param::Kex => {
                rows.push((i, s, 0.0));
                rows.push((i, -s, -KEX_MAX));
            }
            Param::Dw | Param::Pb | Param::Tex => {}
        }
    }

    let mut a = Array2::zeros((rows.len(), n));
    let mut b = Array1::zeros(rows.len());
    for (row, (col, coeff, bound)) in rows.into_iter().enumerate() {
        a[[row, col]] = coeff;
        b[row] = bound;
    }
    LinearConstraints { a, b }
}
