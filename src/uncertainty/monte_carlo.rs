//! Monte Carlo simulation of the fitted data.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::data::{AnalysisSession, PointKey};
use crate::driver::{FittingApi, McData};
use crate::error::{DispError, Result};
use crate::minimise::MinimiseOptions;
use crate::parameters::aux_params;
use crate::processor::Processor;

/// Source of the replicate data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum McMethod {
    /// Noise added to the data back-calculated from the best fit.
    #[default]
    BackCalc,
    /// Noise added to the measured data.
    Direct,
}

impl fmt::Display for McMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McMethod::BackCalc => write!(f, "back_calc"),
            McMethod::Direct => write!(f, "direct"),
        }
    }
}

impl FromStr for McMethod {
    type Err = DispError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "back_calc" | "back-calc" => Ok(McMethod::BackCalc),
            "direct" => Ok(McMethod::Direct),
            other => Err(DispError::Configuration(format!(
                "Unknown Monte Carlo simulation method '{}'",
                other
            ))),
        }
    }
}

/// Replicate statistics of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamStatistics {
    pub name: String,
    /// Number of selected replicates.
    pub n: usize,
    pub mean: f64,
    /// Sample standard deviation, `None` with fewer than two replicates.
    pub std: Option<f64>,
    pub median: f64,
}

impl ParamStatistics {
    pub fn from_values(name: impl Into<String>, values: &[f64]) -> Self {
        let n = values.len();
        let mean = if n == 0 {
            f64::NAN
        } else {
            values.iter().sum::<f64>() / n as f64
        };
        let std = (n > 1).then(|| {
            let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (n - 1) as f64).sqrt()
        });

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = match n {
            0 => f64::NAN,
            _ if n % 2 == 0 => 0.5 * (sorted[n / 2 - 1] + sorted[n / 2]),
            _ => sorted[n / 2],
        };

        Self {
            name: name.into(),
            n,
            mean,
            std,
            median,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatistics {
    pub id: String,
    /// Model parameters in vector order, then the auxiliary parameters.
    pub params: Vec<ParamStatistics>,
}

/// Result of a Monte Carlo error analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloResult {
    pub sim_number: usize,
    pub clusters: Vec<ClusterStatistics>,
}

impl MonteCarloResult {
    pub fn cluster(&self, id: &str) -> Option<&ClusterStatistics> {
        self.clusters.iter().find(|c| c.id == id)
    }
}

/// Draw one replicate of `data` with Gaussian noise of width `errors`.
///
/// Values with a zero or missing error are copied unchanged.
pub fn perturb<R: Rng + ?Sized>(data: &McData, errors: &McData, rng: &mut R) -> Result<McData> {
    match (data, errors) {
        (McData::Intensities(values), McData::Intensities(errs)) => {
            if values.len() != errs.len() {
                return Err(DispError::DimensionMismatch(format!(
                    "{} intensities with {} errors",
                    values.len(),
                    errs.len()
                )));
            }
            let noisy = values
                .iter()
                .zip(errs)
                .map(|(&value, &error)| add_noise(value, error, &mut *rng))
                .collect::<Result<Vec<f64>>>()?;
            Ok(McData::Intensities(noisy))
        }
        (McData::Rates(values), McData::Rates(errs)) => {
            let noisy = values
                .iter()
                .map(|(point, &value)| {
                    let error = errs.get(point).copied().unwrap_or(f64::NAN);
                    Ok((*point, add_noise(value, error, &mut *rng)?))
                })
                .collect::<Result<BTreeMap<PointKey, f64>>>()?;
            Ok(McData::Rates(noisy))
        }
        _ => Err(DispError::InvalidInput(
            "The data and errors of a Monte Carlo replicate differ in kind".to_string(),
        )),
    }
}

fn add_noise<R: Rng + ?Sized>(value: f64, error: f64, rng: &mut R) -> Result<f64> {
    if error < 0.0 {
        return Err(DispError::InvalidInput(format!("Negative measurement error {}", error)));
    }
    if !value.is_finite() || !error.is_finite() || error == 0.0 {
        return Ok(value);
    }
    let normal = Normal::new(value, error)
        .map_err(|e| DispError::InvalidInput(format!("Invalid measurement error {}: {}", error, e)))?;
    Ok(normal.sample(rng))
}

/// Fix the simulation count and initialise every replicate slot from the best fit.
///
/// Replicate data of a previous run is discarded.
pub fn monte_carlo_setup<A: FittingApi>(api: &A, session: &mut AnalysisSession, n: usize) -> Result<()> {
    session.set_sim_number(n)?;
    for spin in session.spins_mut() {
        spin.peak_intensity_sim.clear();
        spin.r2eff_sim.clear();
    }
    api.sim_init_values(session)
}

/// Create and store the replicate data sets. Returns the number of base data units.
pub fn create_data<A: FittingApi, R: Rng + ?Sized>(
    api: &A,
    session: &mut AnalysisSession,
    method: McMethod,
    rng: &mut R,
) -> Result<usize> {
    let n = session.sim_number()?;
    let ids = api.base_data_loop(session)?;

    for id in &ids {
        let data = match method {
            McMethod::BackCalc => api.create_mc_data(session, id)?,
            McMethod::Direct => api.return_data(session, id)?,
        };
        let errors = api.return_error(session, id)?;
        let replicates = (0..n)
            .map(|_| perturb(&data, &errors, &mut *rng))
            .collect::<Result<Vec<_>>>()?;
        api.sim_pack_data(session, id, replicates)?;
    }

    info!(units = ids.len(), sims = n, method = %method, "Created the Monte Carlo data");
    Ok(ids.len())
}

/// Refit every replicate.
pub fn run_simulations<A: FittingApi, P: Processor>(
    api: &A,
    session: &mut AnalysisSession,
    options: &MinimiseOptions,
    processor: &P,
) -> Result<()> {
    let n = session.sim_number()?;
    for sim in 0..n {
        let options = options.clone().with_sim_index(Some(sim));
        api.minimise(session, &options, processor)?;
        debug!(sim, "Simulation complete");
    }
    info!(sims = n, processor = processor.name(), "Finished the Monte Carlo simulations");
    Ok(())
}

/// Set the parameter errors to the standard deviation of the selected replicates.
pub fn error_analysis<A: FittingApi>(api: &A, session: &mut AnalysisSession) -> Result<MonteCarloResult> {
    let sim_number = session.sim_number()?;
    let model = session.model()?;
    let aux: Vec<String> = aux_params(model).iter().map(|p| p.name().to_string()).collect();
    let mut clusters = Vec::new();

    for cluster in session.cluster_loop(true) {
        let Some(mut names) = api.get_param_names(session, &cluster)? else {
            continue;
        };
        names.extend(aux.iter().cloned());
        let select_sim = api.sim_return_selected(session, &cluster)?;

        let mut params = Vec::new();
        let mut index = 0;
        while let Some(values) = api.sim_return_param(session, &cluster, index)? {
            let selected: Vec<f64> = values
                .iter()
                .enumerate()
                .filter(|(i, _)| select_sim.get(*i).copied().unwrap_or(true))
                .map(|(_, &v)| v)
                .collect();
            let name = names.get(index).cloned().unwrap_or_default();
            let stats = ParamStatistics::from_values(name, &selected);

            match stats.std {
                Some(sd) => api.set_error(session, &cluster, index, sd)?,
                None => warn!(
                    cluster = %cluster.id,
                    param = %stats.name,
                    "Fewer than two selected simulations, no error can be calculated"
                ),
            }
            params.push(stats);
            index += 1;
        }

        clusters.push(ClusterStatistics {
            id: cluster.id.clone(),
            params,
        });
    }

    Ok(MonteCarloResult {
        sim_number,
        clusters,
    })
}

/// Run the complete Monte Carlo error analysis with `n` simulations.
pub fn monte_carlo<A, P, R>(
    api: &A,
    session: &mut AnalysisSession,
    n: usize,
    method: McMethod,
    options: &MinimiseOptions,
    processor: &P,
    rng: &mut R,
) -> Result<MonteCarloResult>
where
    A: FittingApi,
    P: Processor,
    R: Rng + ?Sized,
{
    monte_carlo_setup(api, session, n)?;
    create_data(api, session, method, rng)?;
    run_simulations(api, session, options, processor)?;
    error_analysis(api, session)
}
