//! The experimental design: fields, dispersion points, offsets and relaxation delays.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DispError, Result};

/// The dispersion experiment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ExpType {
    /// Single quantum CPMG, dispersion points are nu_CPMG in Hz.
    CpmgSq,
    /// R1rho spin-lock, dispersion points are nu1 in Hz.
    R1rho,
}

/// How each dispersion point was measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurveType {
    /// A constant relaxation time period with a single reference spectrum.
    Fixed,
    /// A full exponential decay over a relaxation delay series.
    Exponential,
}

/// The shape of exponential curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CurveShape {
    /// I(t) = I0 exp(-R t)
    #[default]
    Decay,
    /// I(t) = Iinf - (Iinf - I0) exp(-R t)
    InversionRecovery,
}

/// Identifies one experiment at one field and offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataKey {
    pub exp_type: ExpType,
    pub field: usize,
    pub offset: usize,
}

impl DataKey {
    pub fn new(exp_type: ExpType, field: usize, offset: usize) -> Self {
        Self { exp_type, field, offset }
    }
}

/// One dispersion point of one experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PointKey {
    pub key: DataKey,
    pub point: usize,
}

/// One peak intensity: a relaxation delay of one dispersion point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntensityKey {
    pub point: PointKey,
    pub time: usize,
}

/// The independent variables of a single experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveDesign {
    /// Dispersion points in Hz.
    pub points: Vec<f64>,
    /// The constant relaxation time period, for fixed time experiments.
    pub relax_time: Option<f64>,
    /// The relaxation delays of the intensity series (s).
    pub times: Vec<f64>,
}

impl CurveDesign {
    pub fn fixed(points: Vec<f64>, relax_time: f64) -> Self {
        Self {
            points,
            relax_time: Some(relax_time),
            times: vec![0.0, relax_time],
        }
    }

    pub fn exponential(points: Vec<f64>, times: Vec<f64>) -> Self {
        Self { points, relax_time: None, times }
    }
}

/// The full experimental design shared by all spins of an analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentalDesign {
    /// Spectrometer 1H frequencies in Hz.
    pub fields: Vec<f64>,
    /// Spin-lock offsets in ppm.
    pub offsets: Vec<f64>,
    pub curve_type: CurveType,
    pub curve_shape: CurveShape,
    curves: BTreeMap<DataKey, CurveDesign>,
}

impl ExperimentalDesign {
    pub fn new(fields: Vec<f64>, curve_type: CurveType) -> Self {
        Self {
            fields,
            offsets: vec![0.0],
            curve_type,
            curve_shape: CurveShape::default(),
            curves: BTreeMap::new(),
        }
    }

    pub fn with_offsets(mut self, offsets: Vec<f64>) -> Self {
        self.offsets = offsets;
        self
    }

    pub fn with_curve_shape(mut self, shape: CurveShape) -> Self {
        self.curve_shape = shape;
        self
    }

    /// Register the design of one experiment.
    pub fn add_curve(&mut self, key: DataKey, curve: CurveDesign) -> Result<()> {
        if key.field >= self.fields.len() {
            return Err(DispError::Configuration(format!(
                "Field index {} is out of range, only {} fields are defined",
                key.field,
                self.fields.len()
            )));
        }
        if key.offset >= self.offsets.len() {
            return Err(DispError::Configuration(format!(
                "Offset index {} is out of range, only {} offsets are defined",
                key.offset,
                self.offsets.len()
            )));
        }
        if curve.points.is_empty() {
            return Err(DispError::Configuration(format!(
                "The experiment {:?} has no dispersion points",
                key
            )));
        }
        if curve.points.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(DispError::Configuration(format!(
                "The experiment {:?} has non-positive dispersion points",
                key
            )));
        }
        if self.curve_type == CurveType::Exponential && curve.times.len() < 2 {
            return Err(DispError::Configuration(format!(
                "The exponential experiment {:?} needs at least two relaxation delays",
                key
            )));
        }
        self.curves.insert(key, curve);
        Ok(())
    }

    pub fn n_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn curve(&self, key: &DataKey) -> Option<&CurveDesign> {
        self.curves.get(key)
    }

    /// Loop over the experiments in (type, field, offset) order.
    pub fn keys(&self) -> impl Iterator<Item = &DataKey> {
        self.curves.keys()
    }

    pub fn curves(&self) -> impl Iterator<Item = (&DataKey, &CurveDesign)> {
        self.curves.iter()
    }

    /// Every dispersion point, in experiment then point order.
    pub fn point_keys(&self) -> Vec<PointKey> {
        self.curves
            .iter()
            .flat_map(|(key, curve)| {
                (0..curve.points.len()).map(move |point| PointKey { key: *key, point })
            })
            .collect()
    }

    /// The intensity keys of the relaxation delay series of one point.
    pub fn intensity_keys(&self, point: &PointKey) -> Vec<IntensityKey> {
        self.curves
            .get(&point.key)
            .map(|curve| {
                (0..curve.times.len())
                    .map(|time| IntensityKey { point: *point, time })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn n_points(&self) -> usize {
        self.curves.values().map(|c| c.points.len()).sum()
    }

    /// The dispersion point value (Hz) addressed by a point key.
    pub fn point_value(&self, point: &PointKey) -> Option<f64> {
        self.curves.get(&point.key).and_then(|c| c.points.get(point.point).copied())
    }

    pub fn has_exp_type(&self, exp_type: ExpType) -> bool {
        self.curves.keys().any(|k| k.exp_type == exp_type)
    }
}
