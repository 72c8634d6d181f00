//! Spin containers: measured data, fitted parameters and Monte Carlo ensembles.

use std::collections::BTreeMap;

use crate::data::{IntensityKey, PointKey};
use crate::dispersion::DispModel;
use crate::error::{DispError, Result};
use crate::parameters::{Param, ParamSlot, SlotIndex};

/// The model parameter values of a spin. Absent values are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelValues {
    pub r2: BTreeMap<usize, f64>,
    pub r2a: BTreeMap<usize, f64>,
    pub r2b: BTreeMap<usize, f64>,
    /// ppm
    pub dw: Option<f64>,
    /// ppm^2
    pub phi_ex: Option<f64>,
    pub pa: Option<f64>,
    pub kex: Option<f64>,
    pub k_ab: Option<f64>,
}

impl ModelValues {
    fn field_map(&self, param: Param) -> Option<&BTreeMap<usize, f64>> {
        match param {
            Param::R2 => Some(&self.r2),
            Param::R2a => Some(&self.r2a),
            Param::R2b => Some(&self.r2b),
            _ => None,
        }
    }

    fn field_map_mut(&mut self, param: Param) -> Option<&mut BTreeMap<usize, f64>> {
        match param {
            Param::R2 => Some(&mut self.r2),
            Param::R2a => Some(&mut self.r2a),
            Param::R2b => Some(&mut self.r2b),
            _ => None,
        }
    }

    fn scalar(&self, param: Param) -> Option<f64> {
        match param {
            Param::Dw => self.dw,
            Param::PhiEx => self.phi_ex,
            Param::Pa => self.pa,
            Param::Pb => self.pa.map(|pa| 1.0 - pa),
            Param::Kex => self.kex,
            Param::Tex => self.kex.map(|kex| 1.0 / kex),
            Param::KAb => self.k_ab,
            _ => None,
        }
    }

    fn scalar_mut(&mut self, param: Param) -> Option<&mut Option<f64>> {
        match param {
            Param::Dw => Some(&mut self.dw),
            Param::PhiEx => Some(&mut self.phi_ex),
            Param::Pa => Some(&mut self.pa),
            Param::Kex => Some(&mut self.kex),
            Param::KAb => Some(&mut self.k_ab),
            _ => None,
        }
    }
}

/// Monte Carlo ensembles, one vector of replicate values per parameter slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationStore {
    values: BTreeMap<ParamSlot, Vec<f64>>,
}

impl SimulationStore {
    /// Fill the ensemble of a slot with `n` copies of a value.
    pub fn init(&mut self, slot: ParamSlot, value: f64, n: usize) {
        self.values.insert(slot, vec![value; n]);
    }

    pub fn get(&self, slot: &ParamSlot, sim: usize) -> Option<f64> {
        self.values.get(slot).and_then(|v| v.get(sim).copied())
    }

    pub fn set(&mut self, slot: ParamSlot, sim: usize, value: f64) -> Result<()> {
        let ensemble = self.values.get_mut(&slot).ok_or_else(|| {
            DispError::Configuration(format!(
                "No simulation values have been initialised for {:?}",
                slot
            ))
        })?;
        let len = ensemble.len();
        let entry = ensemble.get_mut(sim).ok_or_else(|| {
            DispError::InvalidInput(format!("Simulation index {} exceeds the {} simulations", sim, len))
        })?;
        *entry = value;
        Ok(())
    }

    pub fn ensemble(&self, slot: &ParamSlot) -> Option<&[f64]> {
        self.values.get(slot).map(|v| v.as_slice())
    }

    pub fn slots(&self) -> impl Iterator<Item = &ParamSlot> {
        self.values.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Minimisation statistics stored by the last fit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinStats {
    pub iterations: usize,
    pub func_evals: usize,
    pub grad_evals: usize,
    pub warning: Option<String>,
}

/// A single spin system and everything the fitting core reads or writes on it.
#[derive(Debug, Clone, PartialEq)]
pub struct Spin {
    pub id: String,
    pub select: bool,
    pub model: Option<DispModel>,
    pub values: ModelValues,
    pub errors: BTreeMap<ParamSlot, f64>,

    /// Measured (or fitted, for the R2eff model) R2eff/R1rho values.
    pub r2eff: BTreeMap<PointKey, f64>,
    pub r2eff_err: BTreeMap<PointKey, f64>,
    /// Back-calculated R2eff/R1rho values of the last `calculate`.
    pub r2eff_bc: BTreeMap<PointKey, f64>,
    pub i0: BTreeMap<PointKey, f64>,
    pub iinf: BTreeMap<PointKey, f64>,

    pub peak_intensity: BTreeMap<IntensityKey, f64>,
    pub peak_intensity_err: BTreeMap<IntensityKey, f64>,

    /// R1 per field, used by the off-resonance R1rho models.
    pub r1: BTreeMap<usize, f64>,
    /// Rotating frame tilt angles (rad).
    pub tilt_angles: BTreeMap<PointKey, f64>,

    pub chi2: Option<f64>,
    pub min_stats: MinStats,

    pub select_sim: Vec<bool>,
    pub sims: SimulationStore,
    pub chi2_sim: Vec<f64>,
    pub peak_intensity_sim: BTreeMap<IntensityKey, Vec<f64>>,
    pub r2eff_sim: Vec<BTreeMap<PointKey, f64>>,
}

impl Spin {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            select: true,
            model: None,
            values: ModelValues::default(),
            errors: BTreeMap::new(),
            r2eff: BTreeMap::new(),
            r2eff_err: BTreeMap::new(),
            r2eff_bc: BTreeMap::new(),
            i0: BTreeMap::new(),
            iinf: BTreeMap::new(),
            peak_intensity: BTreeMap::new(),
            peak_intensity_err: BTreeMap::new(),
            r1: BTreeMap::new(),
            tilt_angles: BTreeMap::new(),
            chi2: None,
            min_stats: MinStats::default(),
            select_sim: Vec::new(),
            sims: SimulationStore::default(),
            chi2_sim: Vec::new(),
            peak_intensity_sim: BTreeMap::new(),
            r2eff_sim: Vec::new(),
        }
    }

    /// Store a measured R2eff/R1rho value and its error.
    pub fn set_r2eff(&mut self, point: PointKey, value: f64, error: f64) {
        self.r2eff.insert(point, value);
        self.r2eff_err.insert(point, error);
    }

    /// Store a peak intensity and its error.
    pub fn set_intensity(&mut self, key: IntensityKey, value: f64, error: f64) {
        self.peak_intensity.insert(key, value);
        self.peak_intensity_err.insert(key, error);
    }

    pub fn has_r2eff(&self) -> bool {
        !self.r2eff.is_empty()
    }

    /// The R2eff value of a point, from the measured data or a simulation replicate.
    pub fn observed_r2eff(&self, point: &PointKey, sim: Option<usize>) -> Option<f64> {
        match sim {
            None => self.r2eff.get(point).copied(),
            Some(i) => self.r2eff_sim.get(i).and_then(|m| m.get(point).copied()),
        }
    }

    /// A peak intensity, from the measured data or a simulation replicate.
    pub fn observed_intensity(&self, key: &IntensityKey, sim: Option<usize>) -> Option<f64> {
        match sim {
            None => self.peak_intensity.get(key).copied(),
            Some(i) => self.peak_intensity_sim.get(key).and_then(|v| v.get(i).copied()),
        }
    }

    /// The largest absolute peak intensity of the spin, if any intensity exists.
    pub fn max_intensity(&self) -> Option<f64> {
        self.peak_intensity
            .values()
            .map(|v| v.abs())
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
    }

    /// Read the current value of a parameter.
    pub fn param(&self, slot: &ParamSlot) -> Result<Option<f64>> {
        slot.validate()?;
        let value = match slot.index {
            SlotIndex::Point(point) => match slot.param {
                Param::R2eff => self.r2eff.get(&point).copied(),
                Param::I0 => self.i0.get(&point).copied(),
                Param::Iinf => self.iinf.get(&point).copied(),
                _ => None,
            },
            SlotIndex::Field(field) => self
                .values
                .field_map(slot.param)
                .and_then(|m| m.get(&field).copied()),
            SlotIndex::Single => self.values.scalar(slot.param),
        };
        Ok(value)
    }

    /// Write a parameter value. Auxiliary parameters are derived and cannot be set.
    pub fn set_param(&mut self, slot: &ParamSlot, value: f64) -> Result<()> {
        slot.validate()?;
        match slot.index {
            SlotIndex::Point(point) => {
                let map = match slot.param {
                    Param::R2eff => &mut self.r2eff,
                    Param::I0 => &mut self.i0,
                    _ => &mut self.iinf,
                };
                map.insert(point, value);
            }
            SlotIndex::Field(field) => {
                if let Some(map) = self.values.field_map_mut(slot.param) {
                    map.insert(field, value);
                }
            }
            SlotIndex::Single => {
                let entry = self.values.scalar_mut(slot.param).ok_or_else(|| {
                    DispError::InvalidInput(format!(
                        "The auxiliary parameter '{}' is derived and cannot be set",
                        slot.param
                    ))
                })?;
                *entry = Some(value);
            }
        }
        Ok(())
    }

    /// Read a parameter, from the best fit or from a simulation replicate.
    pub fn param_or_sim(&self, slot: &ParamSlot, sim: Option<usize>) -> Result<Option<f64>> {
        match sim {
            None => self.param(slot),
            Some(i) => Ok(self.sims.get(slot, i)),
        }
    }

    /// Write a parameter, to the best fit or to a simulation replicate.
    pub fn set_param_or_sim(&mut self, slot: &ParamSlot, sim: Option<usize>, value: f64) -> Result<()> {
        match sim {
            None => self.set_param(slot, value),
            Some(i) => self.sims.set(*slot, i, value),
        }
    }

    /// Whether a simulation replicate is selected. Missing flags count as selected.
    pub fn sim_selected(&self, sim: usize) -> bool {
        self.select_sim.get(sim).copied().unwrap_or(true)
    }
}
