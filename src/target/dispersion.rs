//! The chi-squared target of a spin cluster fitted with a dispersion model.

use std::collections::BTreeMap;

use ndarray::Array1;

use crate::data::{DataKey, ExperimentalDesign, PointKey, Spin};
use crate::dispersion::{
    self, phi_ex_to_rad, ppm_to_rad, Applicability, DispModel, ExchangeParams, Integration, PointInputs,
};
use crate::error::{DispError, Result};
use crate::parameters::{Param, ParamInfo, SlotIndex};
use crate::problem::Problem;

/// The design of one experiment, copied out of the session.
#[derive(Debug, Clone)]
struct Experiment {
    key: DataKey,
    points: Vec<f64>,
    relax_time: Option<f64>,
}

/// The measured data of one spin, per experiment and dispersion point.
#[derive(Debug, Clone)]
struct SpinData {
    values: Vec<Vec<f64>>,
    errors: Vec<Vec<f64>>,
    present: Vec<Vec<bool>>,
    /// R1 per field.
    r1: Vec<f64>,
    tilt_angles: Vec<Option<Vec<f64>>>,
}

/// Per-spin model values unpacked from the parameter vector.
#[derive(Debug, Clone)]
struct SpinValues {
    r20a: Vec<f64>,
    r20b: Vec<f64>,
    dw: f64,
    phi_ex: f64,
}

/// The chi-squared target of one cluster.
///
/// The parameter vector is in scaled coordinates; the unscaled value of element
/// `i` is `params[i] * scaling[i]`. Residuals are ordered by spin, experiment
/// and dispersion point, and missing points contribute a zero residual.
#[derive(Debug, Clone)]
pub struct DispersionTarget {
    model: DispModel,
    integration: Integration,
    fields: Vec<f64>,
    experiments: Vec<Experiment>,
    spins: Vec<SpinData>,
    infos: Vec<ParamInfo>,
    scaling: Array1<f64>,
    n_residuals: usize,
}

impl DispersionTarget {
    /// Set up the target of a cluster.
    ///
    /// With a simulation index, the replicate R2eff values are fitted instead of
    /// the measured ones.
    pub fn new(
        model: DispModel,
        integration: Integration,
        design: &ExperimentalDesign,
        spins: &[&Spin],
        infos: Vec<ParamInfo>,
        scaling: Array1<f64>,
        sim: Option<usize>,
    ) -> Result<Self> {
        if model == DispModel::R2eff {
            return Err(DispError::Configuration(
                "The R2eff model is fitted through the exponential curve target".to_string(),
            ));
        }
        if scaling.len() != infos.len() {
            return Err(DispError::DimensionMismatch(format!(
                "The scaling vector has {} elements for {} parameters",
                scaling.len(),
                infos.len()
            )));
        }

        let mut experiments = Vec::new();
        for (key, curve) in design.curves() {
            if !model.supports(key.exp_type) {
                return Err(DispError::Configuration(format!(
                    "The {} model cannot be used for {:?} experiments",
                    model, key.exp_type
                )));
            }
            if model == DispModel::NsCpmg2Site && curve.relax_time.is_none() {
                return Err(DispError::Configuration(format!(
                    "The {} model requires the constant relaxation time of {:?}",
                    model, key
                )));
            }
            experiments.push(Experiment {
                key: *key,
                points: curve.points.clone(),
                relax_time: curve.relax_time,
            });
        }

        let spin_data = spins
            .iter()
            .map(|spin| collect_spin_data(model, spin, &experiments, design, sim))
            .collect::<Result<Vec<SpinData>>>()?;

        let n_points: usize = experiments.iter().map(|e| e.points.len()).sum();

        Ok(Self {
            model,
            integration,
            fields: design.fields.clone(),
            n_residuals: n_points * spin_data.len(),
            experiments,
            spins: spin_data,
            infos,
            scaling,
        })
    }

    pub fn model(&self) -> DispModel {
        self.model
    }

    pub fn scaling(&self) -> &Array1<f64> {
        &self.scaling
    }

    pub fn infos(&self) -> &[ParamInfo] {
        &self.infos
    }

    /// The number of data points that contribute to chi-squared.
    pub fn data_count(&self) -> usize {
        self.spins
            .iter()
            .flat_map(|s| s.present.iter().flatten())
            .filter(|&&p| p)
            .count()
    }

    /// Split the scaled parameter vector into per-spin and shared exchange values.
    fn unpack(&self, params: &Array1<f64>) -> Result<(Vec<SpinValues>, ExchangeParams)> {
        if params.len() != self.infos.len() {
            return Err(DispError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                self.infos.len(),
                params.len()
            )));
        }

        let n_fields = self.fields.len();
        let mut values = vec![
            SpinValues {
                r20a: vec![0.0; n_fields],
                r20b: vec![0.0; n_fields],
                dw: 0.0,
                phi_ex: 0.0,
            };
            self.spins.len()
        ];
        let mut shared = ExchangeParams::default();

        for (i, info) in self.infos.iter().enumerate() {
            let value = params[i] * self.scaling[i];
            let field = match info.slot.index {
                SlotIndex::Field(f) => f,
                _ => 0,
            };
            let spin = values.get_mut(info.spin_index).ok_or_else(|| {
                DispError::DimensionMismatch(format!(
                    "Parameter {} refers to spin {} of a {} spin cluster",
                    info.param,
                    info.spin_index,
                    self.spins.len()
                ))
            })?;
            match info.param {
                Param::R2 => {
                    spin.r20a[field] = value;
                    spin.r20b[field] = value;
                }
                Param::R2a => spin.r20a[field] = value,
                Param::R2b => spin.r20b[field] = value,
                Param::Dw => spin.dw = value,
                Param::PhiEx => spin.phi_ex = value,
                Param::Pa => shared.pa = value,
                Param::Kex => shared.kex = value,
                Param::KAb => shared.k_ab = value,
                other => {
                    return Err(DispError::ParameterNotInModel {
                        param: other.name().to_string(),
                        model: self.model.to_string(),
                    })
                }
            }
        }

        Ok((values, shared))
    }

    /// Back-calculate every experiment of every spin.
    ///
    /// The result is indexed by spin, experiment and dispersion point.
    fn back_calc_all(&self, params: &Array1<f64>) -> Result<Vec<Vec<Vec<f64>>>> {
        let (values, shared) = self.unpack(params)?;
        let mut out = Vec::with_capacity(self.spins.len());

        for (data, spin) in self.spins.iter().zip(values.iter()) {
            let mut per_exp = Vec::with_capacity(self.experiments.len());
            for (e, exp) in self.experiments.iter().enumerate() {
                let field = exp.key.field;
                let frq = self.fields[field];
                let exchange = ExchangeParams {
                    r20a: spin.r20a[field],
                    r20b: spin.r20b[field],
                    dw: ppm_to_rad(spin.dw, frq),
                    phi_ex: phi_ex_to_rad(spin.phi_ex, frq),
                    ..shared
                };
                let inputs = PointInputs {
                    exp_type: exp.key.exp_type,
                    points: &exp.points,
                    relax_time: exp.relax_time,
                    r1: data.r1[field],
                    tilt_angles: data.tilt_angles[e].as_deref(),
                };
                let mut buffer = vec![0.0; exp.points.len()];
                let applicability =
                    dispersion::back_calc(self.model, self.integration, &exchange, &inputs, &mut buffer);
                if applicability == Applicability::NotApplicable {
                    return Err(DispError::Configuration(format!(
                        "The {} model cannot back-calculate the experiment {:?}",
                        self.model, exp.key
                    )));
                }
                per_exp.push(buffer);
            }
            out.push(per_exp);
        }

        Ok(out)
    }

    /// The back-calculated R2eff/R1rho values of every spin, keyed by point.
    pub fn back_calc(&self, params: &Array1<f64>) -> Result<Vec<BTreeMap<PointKey, f64>>> {
        let values = self.back_calc_all(params)?;
        Ok(values
            .into_iter()
            .map(|per_exp| {
                per_exp
                    .into_iter()
                    .zip(self.experiments.iter())
                    .flat_map(|(buffer, exp)| {
                        buffer
                            .into_iter()
                            .enumerate()
                            .map(move |(point, value)| (PointKey { key: exp.key, point }, value))
                    })
                    .collect()
            })
            .collect())
    }
}

/// Gather the data of one spin.
///
/// Off-resonance DPL94 fits need every tilt angle of a curve and the R1 value
/// of its field; a curve without any tilt angle is on resonance.
fn collect_spin_data(
    model: DispModel,
    spin: &Spin,
    experiments: &[Experiment],
    design: &ExperimentalDesign,
    sim: Option<usize>,
) -> Result<SpinData> {
    let n_fields = design.n_fields();
    let mut data = SpinData {
        values: Vec::with_capacity(experiments.len()),
        errors: Vec::with_capacity(experiments.len()),
        present: Vec::with_capacity(experiments.len()),
        r1: (0..n_fields).map(|f| spin.r1.get(&f).copied().unwrap_or(0.0)).collect(),
        tilt_angles: Vec::with_capacity(experiments.len()),
    };

    for exp in experiments {
        let keys: Vec<PointKey> = (0..exp.points.len())
            .map(|point| PointKey { key: exp.key, point })
            .collect();

        let mut values = Vec::with_capacity(keys.len());
        let mut errors = Vec::with_capacity(keys.len());
        let mut present = Vec::with_capacity(keys.len());
        for point in &keys {
            let value = spin.observed_r2eff(point, sim);
            let error = spin.r2eff_err.get(point).copied();
            match (value, error) {
                (Some(v), Some(e)) if v.is_finite() && e > 0.0 => {
                    values.push(v);
                    errors.push(e);
                    present.push(true);
                }
                _ => {
                    values.push(0.0);
                    errors.push(1.0);
                    present.push(false);
                }
            }
        }

        let tilt: Option<Vec<f64>> = keys.iter().map(|p| spin.tilt_angles.get(p).copied()).collect();
        if model == DispModel::Dpl94 {
            let n_tilted = keys.iter().filter(|p| spin.tilt_angles.contains_key(p)).count();
            if n_tilted > 0 && tilt.is_none() {
                return Err(DispError::Configuration(format!(
                    "Only {} of the {} tilt angles of the {:?} experiment are set for the spin '{}'",
                    n_tilted,
                    keys.len(),
                    exp.key,
                    spin.id
                )));
            }
            if tilt.is_some() && !spin.r1.contains_key(&exp.key.field) {
                return Err(DispError::Configuration(format!(
                    "The {} model requires the R1 value of the spin '{}' at the {} MHz field",
                    model,
                    spin.id,
                    design.fields[exp.key.field] / 1e6
                )));
            }
        }

        data.values.push(values);
        data.errors.push(errors);
        data.present.push(present);
        data.tilt_angles.push(tilt);
    }

    Ok(data)
}

impl Problem for DispersionTarget {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        let back_calc = self.back_calc_all(params)?;
        let mut residuals = Array1::zeros(self.n_residuals);
        let mut i = 0;

        for (data, per_exp) in self.spins.iter().zip(back_calc.iter()) {
            for (e, buffer) in per_exp.iter().enumerate() {
                for (p, &predicted) in buffer.iter().enumerate() {
                    if data.present[e][p] {
                        residuals[i] = (predicted - data.values[e][p]) / data.errors[e][p];
                    }
                    i += 1;
                }
            }
        }

        Ok(residuals)
    }

    fn parameter_count(&self) -> usize {
        self.infos.len()
    }

    fn residual_count(&self) -> usize {
        self.n_residuals
    }
}
