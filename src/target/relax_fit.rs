//! The chi-squared target of a single exponential relaxation curve.
//!
//! Used by the R2eff model, where every dispersion point of every spin is an
//! independent fit of `r2eff` and `i0` (plus `iinf` for inversion recovery).

use ndarray::{Array1, Array2};

use crate::data::{CurveShape, ExperimentalDesign, PointKey, Spin};
use crate::dispersion::exponential::{d_exponential, d_exponential_inv, exponential, exponential_inv};
use crate::error::{DispError, Result};
use crate::problem::Problem;

/// The exponential curve target of one dispersion point.
///
/// Parameters are `[r2eff, i0]` or `[r2eff, i0, iinf]` in scaled coordinates.
#[derive(Debug, Clone)]
pub struct RelaxFitTarget {
    shape: CurveShape,
    times: Vec<f64>,
    values: Vec<f64>,
    errors: Vec<f64>,
    present: Vec<bool>,
    scaling: Array1<f64>,
}

impl RelaxFitTarget {
    /// Build a target from raw curve data. `None` marks a missing intensity.
    pub fn new(
        shape: CurveShape,
        times: Vec<f64>,
        data: Vec<Option<(f64, f64)>>,
        scaling: Array1<f64>,
    ) -> Result<Self> {
        let n_params = Self::param_count_for(shape);
        if scaling.len() != n_params {
            return Err(DispError::DimensionMismatch(format!(
                "The scaling vector has {} elements for {} curve parameters",
                scaling.len(),
                n_params
            )));
        }
        if times.len() != data.len() {
            return Err(DispError::DimensionMismatch(format!(
                "{} relaxation delays for {} intensities",
                times.len(),
                data.len()
            )));
        }

        let mut values = Vec::with_capacity(data.len());
        let mut errors = Vec::with_capacity(data.len());
        let mut present = Vec::with_capacity(data.len());
        for entry in data {
            match entry {
                Some((value, error)) if value.is_finite() && error > 0.0 => {
                    values.push(value);
                    errors.push(error);
                    present.push(true);
                }
                _ => {
                    values.push(0.0);
                    errors.push(1.0);
                    present.push(false);
                }
            }
        }

        Ok(Self {
            shape,
            times,
            values,
            errors,
            present,
            scaling,
        })
    }

    /// Collect the intensities of one dispersion point of a spin.
    pub fn from_spin(
        design: &ExperimentalDesign,
        spin: &Spin,
        point: &PointKey,
        scaling: Array1<f64>,
        sim: Option<usize>,
    ) -> Result<Self> {
        let curve = design.curve(&point.key).ok_or_else(|| {
            DispError::NotFound(format!("No experiment is defined for {:?}", point.key))
        })?;

        let data = design
            .intensity_keys(point)
            .iter()
            .map(|key| {
                let value = spin.observed_intensity(key, sim)?;
                let error = spin.peak_intensity_err.get(key).copied()?;
                Some((value, error))
            })
            .collect();

        Self::new(design.curve_shape, curve.times.clone(), data, scaling)
    }

    fn param_count_for(shape: CurveShape) -> usize {
        match shape {
            CurveShape::Decay => 2,
            CurveShape::InversionRecovery => 3,
        }
    }

    pub fn data_count(&self) -> usize {
        self.present.iter().filter(|&&p| p).count()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    fn unscale(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        if params.len() != self.scaling.len() {
            return Err(DispError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                self.scaling.len(),
                params.len()
            )));
        }
        Ok(params * &self.scaling)
    }

    /// The back-calculated intensities at every relaxation delay.
    pub fn back_calc(&self, params: &Array1<f64>) -> Result<Vec<f64>> {
        let p = self.unscale(params)?;
        let mut out = vec![0.0; self.times.len()];
        match self.shape {
            CurveShape::Decay => exponential(p[0], p[1], &self.times, &mut out),
            CurveShape::InversionRecovery => exponential_inv(p[0], p[1], p[2], &self.times, &mut out),
        }
        Ok(out)
    }
}

impl Problem for RelaxFitTarget {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        let back_calc = self.back_calc(params)?;
        Ok(back_calc
            .iter()
            .enumerate()
            .map(|(i, &predicted)| {
                if self.present[i] {
                    (predicted - self.values[i]) / self.errors[i]
                } else {
                    0.0
                }
            })
            .collect())
    }

    fn parameter_count(&self) -> usize {
        self.scaling.len()
    }

    fn residual_count(&self) -> usize {
        self.times.len()
    }

    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        let p = self.unscale(params)?;
        let n = self.parameter_count();
        let mut jac = Array2::zeros((self.times.len(), n));

        let rows: Vec<Vec<f64>> = match self.shape {
            CurveShape::Decay => d_exponential(p[0], p[1], &self.times)
                .into_iter()
                .map(|row| row.to_vec())
                .collect(),
            CurveShape::InversionRecovery => d_exponential_inv(p[0], p[1], p[2], &self.times)
                .into_iter()
                .map(|row| row.to_vec())
                .collect(),
        };

        for (i, row) in rows.iter().enumerate() {
            if !self.present[i] {
                continue;
            }
            for j in 0..n {
                jac[[i, j]] = row[j] * self.scaling[j] / self.errors[i];
            }
        }
        Ok(jac)
    }

    fn has_custom_jacobian(&self) -> bool {
        true
    }
}
