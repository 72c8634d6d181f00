//! The optimisation driver of a dispersion analysis.
//!
//! [`FittingApi`] is the capability interface the analysis front end talks to:
//! calculation, minimisation, model elimination, statistics and the Monte Carlo
//! bookkeeping. [`DispersionApi`] implements it over an [`AnalysisSession`].
//!
//! Every minimisation is split into one [`MinimiseCommand`] per cluster. The
//! commands own copies of everything they need, so a [`Processor`] can run them
//! anywhere; the paired [`FitMemo`] writes the outcome back onto the spins.

use std::collections::BTreeMap;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::data::{
    AnalysisSession, ClusterDescriptor, ClusterIter, CurveShape, CurveType, IntensityKey, MinStats, PointKey, Spin,
};
use crate::dispersion::exponential::{exponential, exponential_inv};
use crate::dispersion::DispModel;
use crate::error::{DispError, Result};
use crate::minimise::{
    minimise_target, scale_bounds, EliminationLimits, FitOutcome, GridOptions, MinAlgorithm, MinimiseOptions,
};
use crate::parameters::{
    assemble_param_vector, aux_params, disassemble_param_vector, grid_bounds, linear_constraints, loop_parameters,
    param_names, param_num, scaling_factors, Bounds, LinearConstraints, Param, ParamInfo, ParamSlot, SlotIndex,
};
use crate::problem::Problem;
use crate::processor::{run_queue, Command, Memo, Processor};
use crate::target::{DispersionTarget, RelaxFitTarget};

/// The k, n and chi2 statistics of one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelStatistics {
    /// Number of parameters.
    pub k: usize,
    /// Number of data points.
    pub n: usize,
    pub chi2: Option<f64>,
}

/// The base data unit of the Monte Carlo simulations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataId {
    /// The peak intensity curve of one dispersion point, for the R2eff model.
    Curve { spin: usize, point: PointKey },
    /// The R2eff/R1rho values of one spin, for every other model.
    Spin { spin: usize },
}

/// Observable data of one [`DataId`], measured, back-calculated or simulated.
#[derive(Debug, Clone, PartialEq)]
pub enum McData {
    /// Peak intensities, one per relaxation delay.
    Intensities(Vec<f64>),
    /// R2eff/R1rho values keyed by dispersion point.
    Rates(BTreeMap<PointKey, f64>),
}

/// The fitting operations of an analysis.
pub trait FittingApi {
    /// Calculate the chi-squared value of every fitting unit at the current
    /// parameter values, storing it with the back-calculated data on the spins.
    ///
    /// For the R2eff model with fixed time data, the R2eff values are instead
    /// calculated directly from the peak intensities.
    fn calculate(
        &self,
        session: &mut AnalysisSession,
        spin_id: Option<&str>,
        sim: Option<usize>,
    ) -> Result<BTreeMap<String, f64>>;

    /// Optimise every selected cluster.
    fn minimise<P: Processor>(
        &self,
        session: &mut AnalysisSession,
        options: &MinimiseOptions,
        processor: &P,
    ) -> Result<()>;

    /// A pure grid search, leaving every cluster at its best lattice point.
    fn grid_search<P: Processor>(
        &self,
        session: &mut AnalysisSession,
        grid: GridOptions,
        constraints: bool,
        sim: Option<usize>,
        processor: &P,
    ) -> Result<()> {
        let options = MinimiseOptions::new(MinAlgorithm::Grid)
            .with_grid(grid)
            .with_constraints(constraints)
            .with_sim_index(sim);
        self.minimise(session, &options, processor)
    }

    /// Whether a parameter value is outside the sane range, rejecting the model.
    fn eliminate(&self, param: Param, value: f64, cluster: &ClusterDescriptor, sim: Option<usize>) -> bool;

    /// Deselect spins that cannot support a fit. Returns the number deselected.
    fn overfit_deselect(&self, session: &mut AnalysisSession) -> Result<usize>;

    fn model_statistics(&self, session: &AnalysisSession, cluster: &ClusterDescriptor) -> Result<ModelStatistics>;

    /// Parameter names in vector order, `None` if no spin is selected.
    fn get_param_names(&self, session: &AnalysisSession, cluster: &ClusterDescriptor) -> Result<Option<Vec<String>>>;

    /// Parameter values in vector order, `None` if no spin is selected.
    fn get_param_values(
        &self,
        session: &AnalysisSession,
        cluster: &ClusterDescriptor,
        sim: Option<usize>,
    ) -> Result<Option<Vec<f64>>>;

    /// Deselect a cluster, or a single simulation of it.
    fn deselect(&self, session: &mut AnalysisSession, cluster: &ClusterDescriptor, sim: Option<usize>) -> Result<()>;

    fn model_desc(&self, cluster: &ClusterDescriptor) -> String;

    /// Loop over every cluster, selected or not.
    fn model_loop(&self, session: &AnalysisSession) -> ClusterIter;

    /// Set the error of the parameter at `index`. Indices past the model
    /// parameters address the auxiliary parameters.
    fn set_error(
        &self,
        session: &mut AnalysisSession,
        cluster: &ClusterDescriptor,
        index: usize,
        error: f64,
    ) -> Result<()>;

    /// The simulation ensemble of the parameter at `index`, `None` past the end.
    fn sim_return_param(
        &self,
        session: &AnalysisSession,
        cluster: &ClusterDescriptor,
        index: usize,
    ) -> Result<Option<Vec<f64>>>;

    fn sim_return_selected(&self, session: &AnalysisSession, cluster: &ClusterDescriptor) -> Result<Vec<bool>>;

    fn set_selected_sim(
        &self,
        session: &mut AnalysisSession,
        cluster: &ClusterDescriptor,
        select_sim: &[bool],
    ) -> Result<()>;

    /// Copy the best fit values into every simulation slot.
    fn sim_init_values(&self, session: &mut AnalysisSession) -> Result<()>;

    fn base_data_loop(&self, session: &AnalysisSession) -> Result<Vec<DataId>>;

    /// The measured data of a base data unit.
    fn return_data(&self, session: &AnalysisSession, data_id: &DataId) -> Result<McData>;

    /// The measurement errors of a base data unit, in the shape of its data.
    fn return_error(&self, session: &AnalysisSession, data_id: &DataId) -> Result<McData>;

    /// The back-calculated data of a base data unit.
    fn create_mc_data(&self, session: &AnalysisSession, data_id: &DataId) -> Result<McData>;

    /// Store one replicate data set per simulation on the spins.
    fn sim_pack_data(&self, session: &mut AnalysisSession, data_id: &DataId, sim_data: Vec<McData>) -> Result<()>;
}

/// The relaxation dispersion implementation of [`FittingApi`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DispersionApi {
    pub limits: EliminationLimits,
}

impl DispersionApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(mut self, limits: EliminationLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Apply the elimination limits to every selected cluster and, when
    /// simulations exist, to every selected simulation.
    ///
    /// Returns the number of eliminated fits.
    pub fn run_elimination(&self, session: &mut AnalysisSession) -> Result<usize> {
        let sim_number = session.sim_number().ok();
        let mut eliminated = 0;

        for cluster in session.cluster_loop(true) {
            let values = elimination_values(session, &cluster, None)?;
            if values.iter().any(|&(p, v)| self.eliminate(p, v, &cluster, None)) {
                self.deselect(session, &cluster, None)?;
                eliminated += 1;
                continue;
            }

            let Some(n) = sim_number else { continue };
            for sim in 0..n {
                if !self.sim_return_selected(session, &cluster)?.get(sim).copied().unwrap_or(true) {
                    continue;
                }
                let values = elimination_values(session, &cluster, Some(sim))?;
                if values.iter().any(|&(p, v)| self.eliminate(p, v, &cluster, Some(sim))) {
                    self.deselect(session, &cluster, Some(sim))?;
                    eliminated += 1;
                }
            }
        }

        Ok(eliminated)
    }

    /// Collect the fit results of every selected cluster.
    pub fn report(&self, session: &AnalysisSession) -> Result<FitReport> {
        let model = session.model()?;
        let mut clusters = Vec::new();

        for cluster in session.cluster_loop(true) {
            let spins = selected_spins(session, &cluster);
            let infos = cluster_layout(session, model, spins.len());
            let values = assemble_param_vector(&spins, &infos, None)?;
            let errors = infos
                .iter()
                .map(|info| {
                    spins
                        .get(info.spin_index)
                        .and_then(|spin| spin.errors.get(&info.slot).copied())
                })
                .collect();
            let statistics = self.model_statistics(session, &cluster)?;
            let stats = spins.first().map(|s| s.min_stats.clone()).unwrap_or_default();

            clusters.push(ClusterReport {
                id: cluster.id.clone(),
                spin_ids: spins.iter().map(|s| s.id.clone()).collect(),
                params: param_names(&infos),
                values: values.to_vec(),
                errors,
                statistics,
                iterations: stats.iterations,
                func_evals: stats.func_evals,
                warning: stats.warning,
            });
        }

        Ok(FitReport {
            model: model.name().to_string(),
            clusters,
        })
    }

    fn dispersion_job(
        &self,
        session: &AnalysisSession,
        model: DispModel,
        cluster: &ClusterDescriptor,
        options: &MinimiseOptions,
    ) -> Result<Option<(MinimiseCommand, FitMemo)>> {
        let selected = selected_descriptor(session, cluster);
        let spins = session.cluster_spins(&selected);
        if spins.is_empty() {
            return Ok(None);
        }

        let infos = cluster_layout(session, model, spins.len());
        let scaling = scaling_factors(&spins, &infos, options.scaling);
        let target = DispersionTarget::new(
            model,
            session.integration,
            &session.design,
            &spins,
            infos.clone(),
            scaling.clone(),
            options.sim_index,
        )?;

        let k = param_num(&infos);
        let n = target.data_count();
        if n <= k {
            warn!(cluster = %cluster.id, k, n, "Insufficient data, skipping the spin cluster");
            return Ok(None);
        }

        let x0 = assemble_param_vector(&spins, &infos, options.sim_index)? / &scaling;
        let job = FitJob {
            grid_bounds: job_grid_bounds(&spins, &infos, &scaling, options)?,
            constraints: linear_constraints(&infos, &scaling),
            target: FitTarget::Dispersion(target),
            x0,
        };

        Ok(Some((
            MinimiseCommand {
                cluster_id: cluster.id.clone(),
                jobs: vec![job],
                options: options.clone(),
            },
            FitMemo {
                cluster: selected,
                model,
                layouts: vec![infos],
                scalings: vec![scaling],
                sim: options.sim_index,
            },
        )))
    }

    fn curve_job(
        &self,
        session: &AnalysisSession,
        cluster: &ClusterDescriptor,
        options: &MinimiseOptions,
    ) -> Result<Option<(MinimiseCommand, FitMemo)>> {
        let selected = selected_descriptor(session, cluster);
        let spins = session.cluster_spins(&selected);
        let Some(&spin) = spins.first() else {
            return Ok(None);
        };
        if spin.peak_intensity.is_empty() {
            return Ok(None);
        }

        let infos = cluster_layout(session, DispModel::R2eff, 1);
        let per_point = curve_param_count(session.design.curve_shape);

        let mut jobs = Vec::new();
        let mut layouts = Vec::new();
        let mut scalings = Vec::new();
        for chunk in infos.chunks(per_point) {
            let SlotIndex::Point(point) = chunk[0].slot.index else {
                continue;
            };
            let scaling = scaling_factors(&[spin], chunk, options.scaling);
            let target = RelaxFitTarget::from_spin(&session.design, spin, &point, scaling.clone(), options.sim_index)?;
            if target.data_count() <= chunk.len() {
                debug!(spin = %spin.id, ?point, "Too few intensities, skipping the curve");
                continue;
            }
            let x0 = assemble_param_vector(&[spin], chunk, options.sim_index)? / &scaling;
            jobs.push(FitJob {
                grid_bounds: job_grid_bounds(&[spin], chunk, &scaling, options)?,
                constraints: linear_constraints(chunk, &scaling),
                target: FitTarget::Curve(target),
                x0,
            });
            layouts.push(chunk.to_vec());
            scalings.push(scaling);
        }

        if jobs.is_empty() {
            return Ok(None);
        }

        Ok(Some((
            MinimiseCommand {
                cluster_id: cluster.id.clone(),
                jobs,
                options: options.clone(),
            },
            FitMemo {
                cluster: selected,
                model: DispModel::R2eff,
                layouts,
                scalings,
                sim: options.sim_index,
            },
        )))
    }

    /// R2eff = -ln(I1/I0) / T from the reference and the relaxation period spectra.
    fn calculate_fixed_r2eff(
        &self,
        session: &mut AnalysisSession,
        spin_id: Option<&str>,
    ) -> Result<BTreeMap<String, f64>> {
        let mut updates = Vec::new();

        for (index, spin) in session.spins().iter().enumerate() {
            if !spin.select || spin_id.is_some_and(|id| id != spin.id) {
                continue;
            }
            for (key, curve) in session.design.curves() {
                let Some(relax_time) = curve.relax_time else {
                    continue;
                };
                for p in 0..curve.points.len() {
                    let point = PointKey { key: *key, point: p };
                    let reference = IntensityKey { point, time: 0 };
                    let relaxed = IntensityKey { point, time: 1 };
                    let (Some(&i0), Some(&i1)) =
                        (spin.peak_intensity.get(&reference), spin.peak_intensity.get(&relaxed))
                    else {
                        continue;
                    };
                    if i0 <= 0.0 || i1 <= 0.0 {
                        debug!(spin = %spin.id, ?point, "Non-positive intensity, skipping the point");
                        continue;
                    }
                    let s0 = spin.peak_intensity_err.get(&reference).copied().unwrap_or(0.0);
                    let s1 = spin.peak_intensity_err.get(&relaxed).copied().unwrap_or(0.0);
                    let r2eff = -(i1 / i0).ln() / relax_time;
                    let error = ((s1 / i1).powi(2) + (s0 / i0).powi(2)).sqrt() / relax_time;
                    updates.push((index, point, r2eff, error));
                }
            }
        }

        let mut chi2s = BTreeMap::new();
        for (index, point, r2eff, error) in updates {
            let spin = session.spin_mut(index)?;
            spin.set_r2eff(point, r2eff, error);
            chi2s.insert(spin.id.clone(), 0.0);
        }
        Ok(chi2s)
    }

    /// The summed chi-squared of the exponential curves of each spin.
    fn calculate_curves(
        &self,
        session: &mut AnalysisSession,
        spin_id: Option<&str>,
        sim: Option<usize>,
    ) -> Result<BTreeMap<String, f64>> {
        let infos = cluster_layout(session, DispModel::R2eff, 1);
        let per_point = curve_param_count(session.design.curve_shape);
        let mut results = Vec::new();

        for (index, spin) in session.spins().iter().enumerate() {
            if !spin.select || spin.peak_intensity.is_empty() || spin_id.is_some_and(|id| id != spin.id) {
                continue;
            }
            let mut chi2 = 0.0;
            for chunk in infos.chunks(per_point) {
                let SlotIndex::Point(point) = chunk[0].slot.index else {
                    continue;
                };
                let target =
                    RelaxFitTarget::from_spin(&session.design, spin, &point, Array1::ones(chunk.len()), sim)?;
                let x = assemble_param_vector(&[spin], chunk, sim)?;
                chi2 += target.eval_cost(&x)?;
            }
            results.push((index, chi2));
        }

        let mut chi2s = BTreeMap::new();
        for (index, chi2) in results {
            let spin = session.spin_mut(index)?;
            store_chi2(spin, sim, chi2);
            chi2s.insert(spin.id.clone(), chi2);
        }
        Ok(chi2s)
    }
}

impl FittingApi for DispersionApi {
    fn calculate(
        &self,
        session: &mut AnalysisSession,
        spin_id: Option<&str>,
        sim: Option<usize>,
    ) -> Result<BTreeMap<String, f64>> {
        let model = session.model()?;
        if let Some(id) = spin_id {
            session.spin_index(id)?;
        }
        if let Some(i) = sim {
            check_sim_index(session, i)?;
        }

        if model == DispModel::R2eff {
            return match session.design.curve_type {
                CurveType::Fixed => self.calculate_fixed_r2eff(session, spin_id),
                CurveType::Exponential => self.calculate_curves(session, spin_id, sim),
            };
        }

        let mut chi2s = BTreeMap::new();
        for cluster in session.cluster_loop(true) {
            if let Some(id) = spin_id {
                if !cluster.spin_ids.iter().any(|s| s == id) {
                    continue;
                }
            }

            let spins = session.cluster_spins(&cluster);
            let infos = cluster_layout(session, model, spins.len());
            let scaling = Array1::ones(infos.len());
            let target = DispersionTarget::new(
                model,
                session.integration,
                &session.design,
                &spins,
                infos.clone(),
                scaling,
                sim,
            )?;
            let x = assemble_param_vector(&spins, &infos, sim)?;
            let chi2 = target.eval_cost(&x)?;
            let back_calc = target.back_calc(&x)?;

            for (spin, values) in session.cluster_spins_mut(&cluster).into_iter().zip(back_calc) {
                store_chi2(spin, sim, chi2);
                if sim.is_none() {
                    spin.r2eff_bc = values;
                }
            }
            debug!(cluster = %cluster.id, chi2, "Calculated the chi-squared value");
            chi2s.insert(cluster.id, chi2);
        }

        Ok(chi2s)
    }

    fn minimise<P: Processor>(
        &self,
        session: &mut AnalysisSession,
        options: &MinimiseOptions,
        processor: &P,
    ) -> Result<()> {
        let model = session.model()?;
        options.validate()?;
        if let Some(sim) = options.sim_index {
            check_sim_index(session, sim)?;
        }
        if model == DispModel::R2eff && session.design.curve_type == CurveType::Fixed {
            return Err(DispError::Configuration(
                "The R2eff model with the fixed time period dispersion experiments cannot be optimised.".to_string(),
            ));
        }

        let mut queue = Vec::new();
        for cluster in session.cluster_loop(true) {
            if let Some(sim) = options.sim_index {
                let selected = selected_spins(session, &cluster)
                    .first()
                    .map_or(true, |spin| spin.sim_selected(sim));
                if !selected {
                    continue;
                }
            }

            let job = if model == DispModel::R2eff {
                self.curve_job(session, &cluster, options)?
            } else {
                self.dispersion_job(session, model, &cluster, options)?
            };
            if let Some(job) = job {
                queue.push(job);
            }
        }

        info!(
            model = %model,
            algorithm = %options.algorithm,
            clusters = queue.len(),
            sim = ?options.sim_index,
            "Minimising"
        );
        run_queue(processor, session, queue)
    }

    fn eliminate(&self, param: Param, value: f64, cluster: &ClusterDescriptor, sim: Option<usize>) -> bool {
        let limits = &self.limits;
        let reason = match param {
            Param::Pa if value < limits.pa_min => format!("less than {:.5}", limits.pa_min),
            Param::Pa if value > limits.pa_max => format!("greater than {:.5}", limits.pa_max),
            Param::Tex if value > limits.tex_max => format!("greater than {:.5}", limits.tex_max),
            _ => return false,
        };
        let subject = match sim {
            None => format!("the spin cluster {}", cluster.id),
            Some(i) => format!("simulation {} of the spin cluster {}", i, cluster.id),
        };
        info!("The {} parameter of {:.5} is {}, eliminating {}.", param, value, reason, subject);
        true
    }

    fn overfit_deselect(&self, session: &mut AnalysisSession) -> Result<usize> {
        let model = session.model()?;
        let mut deselected = 0;

        for spin in session.spins_mut().iter_mut().filter(|s| s.select) {
            if model == DispModel::R2eff {
                if spin.peak_intensity.is_empty() {
                    info!("No peak intensity data could be found, deselecting the '{}' spin.", spin.id);
                    spin.select = false;
                    deselected += 1;
                }
            } else if !spin.has_r2eff() {
                info!("No R2eff data could be found, deselecting the '{}' spin.", spin.id);
                spin.select = false;
                deselected += 1;
            }
        }

        if model != DispModel::R2eff {
            for cluster in session.cluster_loop(true) {
                let stats = self.model_statistics(session, &cluster)?;
                if stats.n > stats.k {
                    continue;
                }
                info!(
                    "Only {} data points for the {} parameters of the spin cluster {}, deselecting it.",
                    stats.n, stats.k, cluster.id
                );
                deselected += cluster.len();
                self.deselect(session, &cluster, None)?;
            }
        }

        Ok(deselected)
    }

    fn model_statistics(&self, session: &AnalysisSession, cluster: &ClusterDescriptor) -> Result<ModelStatistics> {
        let model = session.model()?;
        let spins = selected_spins(session, cluster);
        Ok(ModelStatistics {
            k: param_num(&cluster_layout(session, model, spins.len())),
            n: spins.iter().map(|s| s.r2eff.len()).sum(),
            chi2: spins.iter().find_map(|s| s.chi2),
        })
    }

    fn get_param_names(&self, session: &AnalysisSession, cluster: &ClusterDescriptor) -> Result<Option<Vec<String>>> {
        let model = session.model()?;
        let spins = selected_spins(session, cluster);
        if spins.is_empty() {
            return Ok(None);
        }
        Ok(Some(param_names(&cluster_layout(session, model, spins.len()))))
    }

    fn get_param_values(
        &self,
        session: &AnalysisSession,
        cluster: &ClusterDescriptor,
        sim: Option<usize>,
    ) -> Result<Option<Vec<f64>>> {
        let model = session.model()?;
        let spins = selected_spins(session, cluster);
        if spins.is_empty() {
            return Ok(None);
        }
        let infos = cluster_layout(session, model, spins.len());
        Ok(Some(assemble_param_vector(&spins, &infos, sim)?.to_vec()))
    }

    fn deselect(&self, session: &mut AnalysisSession, cluster: &ClusterDescriptor, sim: Option<usize>) -> Result<()> {
        for &index in &cluster.spin_indices {
            let spin = session.spin_mut(index)?;
            match sim {
                None => spin.select = false,
                Some(i) => {
                    let n = spin.select_sim.len();
                    let flag = spin.select_sim.get_mut(i).ok_or_else(|| {
                        DispError::InvalidInput(format!(
                            "Simulation index {} exceeds the {} simulations of the spin '{}'",
                            i, n, spin.id
                        ))
                    })?;
                    *flag = false;
                }
            }
        }
        Ok(())
    }

    fn model_desc(&self, cluster: &ClusterDescriptor) -> String {
        format!("The spin cluster {:?}.", cluster.spin_ids)
    }

    fn model_loop(&self, session: &AnalysisSession) -> ClusterIter {
        session.cluster_loop(false)
    }

    fn set_error(
        &self,
        session: &mut AnalysisSession,
        cluster: &ClusterDescriptor,
        index: usize,
        error: f64,
    ) -> Result<()> {
        let model = session.model()?;
        let selected = selected_descriptor(session, cluster);
        let infos = cluster_layout(session, model, selected.len());
        let aux = aux_params(model);
        let mut spins = session.cluster_spins_mut(&selected);

        let Some(info) = infos.get(index) else {
            let param = aux.get(index - infos.len()).ok_or_else(|| {
                DispError::InvalidInput(format!(
                    "Parameter index {} is out of range for {} model and {} auxiliary parameters",
                    index,
                    infos.len(),
                    aux.len()
                ))
            })?;
            for spin in spins.iter_mut() {
                spin.errors.insert(ParamSlot::single(*param), error);
            }
            return Ok(());
        };

        if info.is_shared() {
            for spin in spins.iter_mut() {
                spin.errors.insert(info.slot, error);
            }
            return Ok(());
        }

        let n_spins = spins.len();
        let spin = spins.get_mut(info.spin_index).ok_or_else(|| {
            DispError::DimensionMismatch(format!(
                "Parameter {} refers to spin {} of a {} spin cluster",
                info.param, info.spin_index, n_spins
            ))
        })?;
        if let (Param::R2eff, SlotIndex::Point(point)) = (info.param, info.slot.index) {
            spin.r2eff_err.insert(point, error);
        }
        spin.errors.insert(info.slot, error);
        Ok(())
    }

    fn sim_return_param(
        &self,
        session: &AnalysisSession,
        cluster: &ClusterDescriptor,
        index: usize,
    ) -> Result<Option<Vec<f64>>> {
        let model = session.model()?;
        let spins = selected_spins(session, cluster);
        let infos = cluster_layout(session, model, spins.len());
        let aux = aux_params(model);

        let (spin, slot) = if let Some(info) = infos.get(index) {
            let si = if info.is_shared() { 0 } else { info.spin_index };
            (spins.get(si), info.slot)
        } else if let Some(param) = aux.get(index - infos.len()) {
            (spins.first(), ParamSlot::single(*param))
        } else {
            return Ok(None);
        };

        let spin = spin.ok_or_else(|| {
            DispError::NotFound(format!("The spin cluster {} has no selected spins", cluster.id))
        })?;
        let ensemble = spin.sims.ensemble(&slot).ok_or_else(|| {
            DispError::NotFound(format!(
                "No simulation values exist for the {} parameter of the spin '{}'",
                slot.param, spin.id
            ))
        })?;
        Ok(Some(ensemble.to_vec()))
    }

    fn sim_return_selected(&self, session: &AnalysisSession, cluster: &ClusterDescriptor) -> Result<Vec<bool>> {
        session
            .cluster_spins(cluster)
            .first()
            .map(|spin| spin.select_sim.clone())
            .ok_or_else(|| DispError::NotFound(format!("The spin cluster {} is empty", cluster.id)))
    }

    fn set_selected_sim(
        &self,
        session: &mut AnalysisSession,
        cluster: &ClusterDescriptor,
        select_sim: &[bool],
    ) -> Result<()> {
        for spin in session.cluster_spins_mut(cluster) {
            spin.select_sim = select_sim.to_vec();
        }
        Ok(())
    }

    fn sim_init_values(&self, session: &mut AnalysisSession) -> Result<()> {
        let model = session.model()?;
        let n = session.sim_number()?;

        let mut slots: Vec<ParamSlot> = cluster_layout(session, model, 1).iter().map(|info| info.slot).collect();
        slots.extend(aux_params(model).into_iter().map(ParamSlot::single));

        for spin in session.spins_mut().iter_mut().filter(|s| s.select) {
            spin.sims.clear();
            for slot in &slots {
                let value = spin.param(slot)?.unwrap_or_else(|| slot.param.default_value());
                spin.sims.init(*slot, value, n);
            }
            spin.chi2_sim = vec![spin.chi2.unwrap_or(f64::NAN); n];
            if spin.select_sim.len() != n {
                spin.select_sim = vec![true; n];
            }
        }

        debug!(sims = n, params = slots.len(), "Initialised the simulation values");
        Ok(())
    }

    fn base_data_loop(&self, session: &AnalysisSession) -> Result<Vec<DataId>> {
        let model = session.model()?;
        let points = session.design.point_keys();
        let mut ids = Vec::new();

        for (index, spin) in session.spins().iter().enumerate() {
            if !spin.select {
                continue;
            }
            if model == DispModel::R2eff {
                if spin.peak_intensity.is_empty() {
                    continue;
                }
                ids.extend(points.iter().map(|&point| DataId::Curve { spin: index, point }));
            } else if spin.has_r2eff() {
                ids.push(DataId::Spin { spin: index });
            }
        }

        Ok(ids)
    }

    fn return_data(&self, session: &AnalysisSession, data_id: &DataId) -> Result<McData> {
        match *data_id {
            DataId::Curve { spin, point } => {
                let spin = session.spin(spin)?;
                Ok(McData::Intensities(
                    session
                        .design
                        .intensity_keys(&point)
                        .iter()
                        .map(|key| spin.observed_intensity(key, None).unwrap_or(f64::NAN))
                        .collect(),
                ))
            }
            DataId::Spin { spin } => Ok(McData::Rates(session.spin(spin)?.r2eff.clone())),
        }
    }

    fn return_error(&self, session: &AnalysisSession, data_id: &DataId) -> Result<McData> {
        match *data_id {
            DataId::Curve { spin, point } => {
                let spin = session.spin(spin)?;
                Ok(McData::Intensities(
                    session
                        .design
                        .intensity_keys(&point)
                        .iter()
                        .map(|key| spin.peak_intensity_err.get(key).copied().unwrap_or(f64::NAN))
                        .collect(),
                ))
            }
            DataId::Spin { spin } => Ok(McData::Rates(session.spin(spin)?.r2eff_err.clone())),
        }
    }

    fn create_mc_data(&self, session: &AnalysisSession, data_id: &DataId) -> Result<McData> {
        let model = session.model()?;
        match *data_id {
            DataId::Curve { spin, point } => {
                let spin = session.spin(spin)?;
                let curve = session.design.curve(&point.key).ok_or_else(|| {
                    DispError::NotFound(format!("No experiment is defined for {:?}", point.key))
                })?;
                let value = |param: Param| -> Result<f64> {
                    spin.param(&ParamSlot::point(param, point))?.ok_or_else(|| {
                        DispError::InsufficientData(format!(
                            "The spin '{}' has no fitted {} value for {:?}",
                            spin.id, param, point
                        ))
                    })
                };

                let mut back_calc = vec![0.0; curve.times.len()];
                match session.design.curve_shape {
                    CurveShape::Decay => exponential(value(Param::R2eff)?, value(Param::I0)?, &curve.times, &mut back_calc),
                    CurveShape::InversionRecovery => exponential_inv(
                        value(Param::R2eff)?,
                        value(Param::I0)?,
                        value(Param::Iinf)?,
                        &curve.times,
                        &mut back_calc,
                    ),
                }
                Ok(McData::Intensities(back_calc))
            }
            DataId::Spin { spin } => {
                let spin = session.spin(spin)?;
                let spins = [spin];
                let infos = cluster_layout(session, model, 1);
                let target = DispersionTarget::new(
                    model,
                    session.integration,
                    &session.design,
                    &spins,
                    infos.clone(),
                    Array1::ones(infos.len()),
                    None,
                )?;
                let x = assemble_param_vector(&spins, &infos, None)?;
                let back_calc = target.back_calc(&x)?.into_iter().next().unwrap_or_default();
                Ok(McData::Rates(
                    back_calc
                        .into_iter()
                        .filter(|(point, _)| spin.r2eff.contains_key(point))
                        .collect(),
                ))
            }
        }
    }

    fn sim_pack_data(&self, session: &mut AnalysisSession, data_id: &DataId, sim_data: Vec<McData>) -> Result<()> {
        let n = session.sim_number()?;
        if sim_data.len() != n {
            return Err(DispError::DimensionMismatch(format!(
                "{} simulated data sets supplied for {} simulations",
                sim_data.len(),
                n
            )));
        }

        match *data_id {
            DataId::Curve { spin, point } => {
                let keys = session.design.intensity_keys(&point);
                let spin = session.spin_mut(spin)?;
                for (ti, key) in keys.iter().enumerate() {
                    if spin.peak_intensity_sim.contains_key(key) {
                        return Err(DispError::InvalidInput(format!(
                            "Monte Carlo simulation data for the key {:?} already exists",
                            key
                        )));
                    }
                    let values = sim_data
                        .iter()
                        .map(|data| match data {
                            McData::Intensities(v) => v.get(ti).copied().ok_or_else(|| {
                                DispError::DimensionMismatch(format!(
                                    "{} simulated intensities for {} relaxation delays",
                                    v.len(),
                                    keys.len()
                                ))
                            }),
                            McData::Rates(_) => Err(DispError::InvalidInput(
                                "R2eff data supplied for a peak intensity curve".to_string(),
                            )),
                        })
                        .collect::<Result<Vec<f64>>>()?;
                    spin.peak_intensity_sim.insert(*key, values);
                }
            }
            DataId::Spin { spin } => {
                let rates = sim_data
                    .into_iter()
                    .map(|data| match data {
                        McData::Rates(values) => Ok(values),
                        McData::Intensities(_) => Err(DispError::InvalidInput(
                            "Peak intensities supplied for R2eff data".to_string(),
                        )),
                    })
                    .collect::<Result<Vec<_>>>()?;
                session.spin_mut(spin)?.r2eff_sim = rates;
            }
        }
        Ok(())
    }
}

/// The fit results of one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterReport {
    pub id: String,
    pub spin_ids: Vec<String>,
    pub params: Vec<String>,
    pub values: Vec<f64>,
    pub errors: Vec<Option<f64>>,
    pub statistics: ModelStatistics,
    pub iterations: usize,
    pub func_evals: usize,
    pub warning: Option<String>,
}

/// The fit results of an analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub model: String,
    pub clusters: Vec<ClusterReport>,
}

impl FitReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone)]
enum FitTarget {
    Dispersion(DispersionTarget),
    Curve(RelaxFitTarget),
}

/// One minimisation of a command, in scaled coordinates.
#[derive(Debug, Clone)]
struct FitJob {
    target: FitTarget,
    x0: Array1<f64>,
    grid_bounds: Vec<Bounds>,
    constraints: LinearConstraints,
}

/// The self-contained minimisation of one cluster.
///
/// Dispersion models fit the whole cluster at once; the R2eff model fits each
/// dispersion point curve of its single spin independently.
#[derive(Debug, Clone)]
pub struct MinimiseCommand {
    cluster_id: String,
    jobs: Vec<FitJob>,
    options: MinimiseOptions,
}

impl Command for MinimiseCommand {
    type Output = Vec<FitOutcome>;

    fn run(self) -> Result<Vec<FitOutcome>> {
        debug!(cluster = %self.cluster_id, fits = self.jobs.len(), "Minimising the spin cluster");
        self.jobs
            .iter()
            .map(|job| match &job.target {
                FitTarget::Dispersion(target) => {
                    minimise_target(target, job.x0.clone(), &job.grid_bounds, &job.constraints, &self.options)
                }
                FitTarget::Curve(target) => {
                    minimise_target(target, job.x0.clone(), &job.grid_bounds, &job.constraints, &self.options)
                }
            })
            .collect()
    }
}

/// Writes the outcome of a [`MinimiseCommand`] back onto the cluster spins.
#[derive(Debug, Clone)]
pub struct FitMemo {
    cluster: ClusterDescriptor,
    model: DispModel,
    layouts: Vec<Vec<ParamInfo>>,
    scalings: Vec<Array1<f64>>,
    sim: Option<usize>,
}

impl Memo for FitMemo {
    type Output = Vec<FitOutcome>;

    fn merge(self, session: &mut AnalysisSession, result: Result<Vec<FitOutcome>>) -> Result<()> {
        let outcomes = match result {
            Ok(outcomes) => outcomes,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(cluster = %self.cluster.id, error = %e, "The minimisation of the spin cluster failed");
                return Ok(());
            }
        };

        let mut spins = session.cluster_spins_mut(&self.cluster);
        let mut chi2 = 0.0;
        let mut stats = MinStats::default();

        for ((outcome, infos), scaling) in outcomes.iter().zip(&self.layouts).zip(&self.scalings) {
            let values = Array1::from(outcome.params.clone()) * scaling;
            disassemble_param_vector(&mut spins[..], infos, &values, self.sim)?;
            chi2 += outcome.chi2;
            stats.iterations += outcome.iterations;
            stats.func_evals += outcome.func_evals;
            stats.grad_evals += outcome.grad_evals;
            if stats.warning.is_none() {
                stats.warning = outcome.warning.clone();
            }
        }

        for spin in spins.iter_mut() {
            store_chi2(spin, self.sim, chi2);
            match self.sim {
                None => spin.min_stats = stats.clone(),
                Some(i) => update_aux_sims(spin, self.model, i)?,
            }
        }

        debug!(cluster = %self.cluster.id, chi2, iterations = stats.iterations, "Stored the fit");
        Ok(())
    }
}

fn curve_param_count(shape: CurveShape) -> usize {
    match shape {
        CurveShape::Decay => 2,
        CurveShape::InversionRecovery => 3,
    }
}

/// The parameter vector layout of a cluster of `n_spins` selected spins.
fn cluster_layout(session: &AnalysisSession, model: DispModel, n_spins: usize) -> Vec<ParamInfo> {
    let points = if model == DispModel::R2eff {
        session.design.point_keys()
    } else {
        Vec::new()
    };
    loop_parameters(
        model,
        n_spins,
        session.design.n_fields(),
        session.design.curve_shape,
        &points,
    )
}

/// The descriptor restricted to its selected spins.
fn selected_descriptor(session: &AnalysisSession, cluster: &ClusterDescriptor) -> ClusterDescriptor {
    let (spin_indices, spin_ids) = cluster
        .spin_indices
        .iter()
        .zip(&cluster.spin_ids)
        .filter(|(&i, _)| session.spins().get(i).is_some_and(|s| s.select))
        .map(|(&i, id)| (i, id.clone()))
        .unzip();
    ClusterDescriptor {
        id: cluster.id.clone(),
        spin_indices,
        spin_ids,
    }
}

fn selected_spins<'a>(session: &'a AnalysisSession, cluster: &ClusterDescriptor) -> Vec<&'a Spin> {
    session
        .cluster_spins(cluster)
        .into_iter()
        .filter(|s| s.select)
        .collect()
}

fn job_grid_bounds(
    spins: &[&Spin],
    infos: &[ParamInfo],
    scaling: &Array1<f64>,
    options: &MinimiseOptions,
) -> Result<Vec<Bounds>> {
    let Some(grid) = &options.grid else {
        return Ok(Vec::new());
    };
    let bounds = match &grid.bounds {
        Some(bounds) => bounds.clone(),
        None => grid_bounds(spins, infos),
    };
    scale_bounds(&bounds, scaling)
}

fn check_sim_index(session: &AnalysisSession, sim: usize) -> Result<()> {
    let n = session.sim_number()?;
    if sim >= n {
        return Err(DispError::InvalidInput(format!(
            "Simulation index {} exceeds the {} simulations",
            sim, n
        )));
    }
    Ok(())
}

fn store_chi2(spin: &mut Spin, sim: Option<usize>, chi2: f64) {
    match sim {
        None => spin.chi2 = Some(chi2),
        Some(i) => {
            if spin.chi2_sim.len() <= i {
                spin.chi2_sim.resize(i + 1, f64::NAN);
            }
            spin.chi2_sim[i] = chi2;
        }
    }
}

/// Refresh the pB and tex replicate values from the fitted pA and kex.
fn update_aux_sims(spin: &mut Spin, model: DispModel, sim: usize) -> Result<()> {
    for aux in aux_params(model) {
        let Some(conjugate) = aux.conjugate() else {
            continue;
        };
        let slot = ParamSlot::single(aux);
        let Some(value) = spin.sims.get(&ParamSlot::single(conjugate), sim) else {
            continue;
        };
        if spin.sims.ensemble(&slot).is_none() {
            continue;
        }
        let derived = match aux {
            Param::Pb => 1.0 - value,
            Param::Tex => 1.0 / value,
            _ => continue,
        };
        spin.sims.set(slot, sim, derived)?;
    }
    Ok(())
}

/// The model and auxiliary values of a cluster checked by the elimination.
fn elimination_values(
    session: &AnalysisSession,
    cluster: &ClusterDescriptor,
    sim: Option<usize>,
) -> Result<Vec<(Param, f64)>> {
    let model = session.model()?;
    let spins = selected_spins(session, cluster);
    let Some(&first) = spins.first() else {
        return Ok(Vec::new());
    };

    let mut values = Vec::new();
    for info in cluster_layout(session, model, spins.len()) {
        if let Some(spin) = spins.get(info.spin_index) {
            if let Some(value) = spin.param_or_sim(&info.slot, sim)? {
                values.push((info.param, value));
            }
        }
    }
    for aux in aux_params(model) {
        if let Some(value) = first.param_or_sim(&ParamSlot::single(aux), sim)? {
            values.push((aux, value));
        }
    }
    Ok(values)
}
