//! Minimisation of a single target: algorithm selection, options and the fit
//! state machine.
//!
//! Every fit walks through
//!
//! ```text
//! Uninitialized -> Scaled -> [Searching] -> [Descending] -> Converged | Failed
//! ```
//!
//! where the grid search and the descent are each optional depending on the
//! chosen algorithm.

pub mod barrier;
pub mod grid;
pub mod simplex;

use std::fmt;
use std::str::FromStr;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DispError, Result};
use crate::lm::{ConvergenceStatus, LevenbergMarquardt, LmConfig};
use crate::parameters::{Bounds, LinearConstraints};
use crate::problem::Problem;

pub use barrier::{log_barrier_minimise, make_interior, BarrierConfig};
pub use grid::{grid_search, grid_size, GridResult};
pub use simplex::{nelder_mead, SimplexConfig, SimplexResult};

/// The minimisation algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MinAlgorithm {
    /// Grid search only; the best lattice point is the result.
    Grid,
    /// Levenberg-Marquardt. Unconstrained only.
    Lm,
    /// Nelder-Mead simplex, wrapped in a log barrier when constrained.
    Simplex,
}

impl fmt::Display for MinAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MinAlgorithm::Grid => write!(f, "grid"),
            MinAlgorithm::Lm => write!(f, "Levenberg-Marquardt"),
            MinAlgorithm::Simplex => write!(f, "simplex"),
        }
    }
}

impl FromStr for MinAlgorithm {
    type Err = DispError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "grid" | "grid_search" => Ok(MinAlgorithm::Grid),
            "lm" | "levenberg-marquardt" => Ok(MinAlgorithm::Lm),
            "simplex" | "nelder-mead" => Ok(MinAlgorithm::Simplex),
            _ => Err(DispError::Configuration(format!(
                "Unknown minimisation algorithm '{}'",
                s
            ))),
        }
    }
}

/// Grid search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridOptions {
    /// Increments per parameter. A single value applies to every parameter.
    pub inc: Vec<usize>,
    /// Unscaled bounds per parameter. `None` uses the default bounds.
    pub bounds: Option<Vec<Bounds>>,
}

impl GridOptions {
    pub fn new(inc: usize) -> Self {
        Self {
            inc: vec![inc],
            bounds: None,
        }
    }

    pub fn with_bounds(mut self, bounds: Vec<Bounds>) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// The increments expanded to `n` parameters.
    pub fn increments(&self, n: usize) -> Result<Vec<usize>> {
        match self.inc.len() {
            1 => Ok(vec![self.inc[0]; n]),
            len if len == n => Ok(self.inc.clone()),
            len => Err(DispError::DimensionMismatch(format!(
                "{} grid increments supplied for {} parameters",
                len, n
            ))),
        }
    }
}

/// Options of a minimisation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimiseOptions {
    pub algorithm: MinAlgorithm,
    /// Chi-squared tolerance of the descent.
    pub func_tol: f64,
    /// Gradient tolerance of the Levenberg-Marquardt descent.
    pub grad_tol: f64,
    pub max_iterations: usize,
    /// Enforce the linear parameter constraints.
    pub constraints: bool,
    /// Optimise on the diagonally scaled parameter vector.
    pub scaling: bool,
    /// Fit a Monte Carlo replicate instead of the measured data.
    pub sim_index: Option<usize>,
    /// Grid search settings. Required for [`MinAlgorithm::Grid`]; for the other
    /// algorithms a grid search seeds the descent.
    pub grid: Option<GridOptions>,
    pub lm: LmConfig,
    pub simplex: SimplexConfig,
    pub barrier: BarrierConfig,
}

impl Default for MinimiseOptions {
    fn default() -> Self {
        Self {
            algorithm: MinAlgorithm::Simplex,
            func_tol: 1e-12,
            grad_tol: 1e-8,
            max_iterations: 10_000,
            constraints: true,
            scaling: true,
            sim_index: None,
            grid: None,
            lm: LmConfig::default(),
            simplex: SimplexConfig::default(),
            barrier: BarrierConfig::default(),
        }
    }
}

impl MinimiseOptions {
    pub fn new(algorithm: MinAlgorithm) -> Self {
        Self {
            algorithm,
            ..Self::default()
        }
    }

    /// Grid search only, with the given increments per parameter.
    pub fn grid_search(inc: usize) -> Self {
        Self {
            algorithm: MinAlgorithm::Grid,
            grid: Some(GridOptions::new(inc)),
            ..Self::default()
        }
    }

    pub fn with_algorithm(mut self, algorithm: MinAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_func_tol(mut self, func_tol: f64) -> Self {
        self.func_tol = func_tol;
        self
    }

    pub fn with_grad_tol(mut self, grad_tol: f64) -> Self {
        self.grad_tol = grad_tol;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_constraints(mut self, constraints: bool) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_scaling(mut self, scaling: bool) -> Self {
        self.scaling = scaling;
        self
    }

    pub fn with_sim_index(mut self, sim_index: Option<usize>) -> Self {
        self.sim_index = sim_index;
        self
    }

    pub fn with_grid(mut self, grid: GridOptions) -> Self {
        self.grid = Some(grid);
        self
    }

    /// Reject option combinations that cannot be run.
    pub fn validate(&self) -> Result<()> {
        if self.algorithm == MinAlgorithm::Grid && self.grid.is_none() {
            return Err(DispError::Configuration(
                "The grid search requires the grid increments".to_string(),
            ));
        }
        if self.algorithm == MinAlgorithm::Lm && self.constraints {
            return Err(DispError::Configuration(
                "Constraints are not supported by the Levenberg-Marquardt algorithm, use the simplex instead"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn lm_config(&self) -> LmConfig {
        LmConfig {
            max_iterations: self.max_iterations,
            ftol: self.func_tol,
            gtol: self.grad_tol,
            ..self.lm
        }
    }

    fn simplex_config(&self) -> SimplexConfig {
        SimplexConfig {
            max_iterations: self.max_iterations,
            func_tol: self.func_tol,
            ..self.simplex
        }
    }
}

/// Stages of a single fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitState {
    Uninitialized,
    Scaled,
    Searching,
    Descending,
    Converged,
    Failed,
}

/// The outcome of a single fit, in scaled coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOutcome {
    pub params: Vec<f64>,
    pub chi2: f64,
    pub iterations: usize,
    pub func_evals: usize,
    pub grad_evals: usize,
    /// How the descent terminated; `None` for a pure grid search.
    pub status: Option<ConvergenceStatus>,
    /// Every state the fit passed through, in order.
    pub states: Vec<FitState>,
    pub warning: Option<String>,
}

impl FitOutcome {
    pub fn state(&self) -> FitState {
        self.states.last().copied().unwrap_or(FitState::Uninitialized)
    }

    pub fn converged(&self) -> bool {
        self.state() == FitState::Converged
    }
}

/// Post-fit limits outside which a cluster fit is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EliminationLimits {
    /// Lowest accepted pA.
    pub pa_min: f64,
    /// Highest accepted pA.
    pub pa_max: f64,
    /// Highest accepted exchange lifetime tex = 1/kex (s).
    pub tex_max: f64,
}

impl Default for EliminationLimits {
    fn default() -> Self {
        Self {
            pa_min: 0.501,
            pa_max: 0.999,
            tex_max: 1.0,
        }
    }
}

/// Minimise a target from a scaled starting point.
///
/// `grid_bounds` must be in scaled coordinates and is only used when a grid
/// search is requested. `constraints` is ignored when the options disable
/// constraints.
pub fn minimise_target<P: Problem>(
    problem: &P,
    x0: Array1<f64>,
    grid_bounds: &[Bounds],
    constraints: &LinearConstraints,
    options: &MinimiseOptions,
) -> Result<FitOutcome> {
    options.validate()?;
    let mut states = vec![FitState::Uninitialized, FitState::Scaled];
    let constraints = options.constraints.then_some(constraints);

    let mut x = x0;
    let mut chi2 = problem.eval_cost(&x)?;
    let mut func_evals = 1;
    let mut iterations = 0;
    let mut grad_evals = 0;
    let mut status = None;

    if let Some(grid) = &options.grid {
        states.push(FitState::Searching);
        let inc = grid.increments(x.len())?;
        let result = grid_search(|p| problem.eval_cost(p), grid_bounds, &inc, constraints)?;
        func_evals += result.func_evals;
        x = result.params;
        chi2 = result.cost;
    }

    match options.algorithm {
        MinAlgorithm::Grid => {}
        MinAlgorithm::Lm => {
            states.push(FitState::Descending);
            let lm = LevenbergMarquardt::with_config(options.lm_config());
            let result = lm.minimize(problem, x)?;
            x = result.params;
            chi2 = result.cost;
            iterations = result.iterations;
            func_evals += result.func_evals;
            grad_evals = result.jac_evals;
            status = Some(result.status);
        }
        MinAlgorithm::Simplex => {
            states.push(FitState::Descending);
            let simplex = options.simplex_config();
            let f = |p: &Array1<f64>| problem.eval_cost(p);
            let result = match constraints {
                Some(c) => log_barrier_minimise(f, c, &x, &options.barrier, &simplex)?,
                None => nelder_mead(f, x, &simplex)?,
            };
            x = result.params;
            chi2 = result.cost;
            iterations = result.iterations;
            func_evals += result.func_evals;
            status = Some(result.status);
        }
    }

    let failed = !chi2.is_finite() || status == Some(ConvergenceStatus::NumericalError);
    let warning = status.and_then(|s| s.warning()).map(str::to_string);
    if failed {
        warn!(chi2, "The minimisation failed");
        states.push(FitState::Failed);
    } else {
        if let Some(w) = &warning {
            debug!(warning = %w, "Minimisation terminated without converging");
        }
        states.push(FitState::Converged);
    }

    Ok(FitOutcome {
        params: x.to_vec(),
        chi2,
        iterations,
        func_evals,
        grad_evals,
        status,
        states,
        warning,
    })
}

/// Convert unscaled bounds into the scaled coordinates of the optimisers.
pub fn scale_bounds(bounds: &[Bounds], scaling: &Array1<f64>) -> Result<Vec<Bounds>> {
    if bounds.len() != scaling.len() {
        return Err(DispError::DimensionMismatch(format!(
            "{} grid bounds supplied for {} parameters",
            bounds.len(),
            scaling.len()
        )));
    }
    bounds
        .iter()
        .zip(scaling.iter())
        .map(|(b, &s)| Bounds::new(b.min / s, b.max / s))
        .collect()
}
