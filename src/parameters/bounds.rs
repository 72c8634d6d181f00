//! Parameter bounds for grid searches.
//!
//! The grid search needs a finite lower and upper value for every element of
//! the parameter vector. The defaults below cover the physically sensible range
//! of each parameter and can be overridden per element by the caller.

use serde::{Deserialize, Serialize};

use crate::data::Spin;
use crate::error::{DispError, Result};
use crate::parameters::{Param, ParamInfo};

/// Intensity upper bound used when a spin has no peak intensities.
const FALLBACK_INTENSITY: f64 = 1e5;

/// A closed interval of allowed parameter values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Minimum allowed value for the parameter
    pub min: f64,

    /// Maximum allowed value for the parameter
    pub max: f64,
}

impl Bounds {
    /// Create new bounds.
    ///
    /// # Arguments
    ///
    /// * `min` - Minimum allowed value for the parameter
    /// * `max` - Maximum allowed value for the parameter
    ///
    /// # Returns
    ///
    /// The bounds if both values are finite and `min <= max`, or an error otherwise
    ///
    /// # Examples
    ///
    /// ```
    /// use dispfit_rs::parameters::Bounds;
    ///
    /// let bounds = Bounds::new(0.5, 1.0).unwrap();
    /// assert!(bounds.contains(0.8));
    /// assert!(Bounds::new(2.0, 1.0).is_err());
    /// ```
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if !min.is_finite() || !max.is_finite() {
            return Err(DispError::InvalidInput(format!(
                "Grid bounds must be finite, got [{}, {}]",
                min, max
            )));
        }
        if min > max {
            return Err(DispError::InvalidInput(format!(
                "Invalid bounds: min ({}) must be less than max ({})",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    /// Check if a value is within the bounds.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// The width of the interval.
    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// The `i`-th of `inc` evenly spaced values spanning the interval.
    ///
    /// A single increment places the only grid point on the lower bound.
    pub fn grid_value(&self, i: usize, inc: usize) -> f64 {
        if inc <= 1 {
            return self.min;
        }
        self.min + self.width() * i as f64 / (inc - 1) as f64
    }
}

/// The default grid bounds of one parameter.
///
/// `max_intensity` is the largest peak intensity of the owning spin and only
/// affects the intensity parameters.
pub fn default_bounds(param: Param, max_intensity: Option<f64>) -> Bounds {
    let (min, max) = match param {
        Param::R2eff | Param::R2 | Param::R2a | Param::R2b => (1.0, 40.0),
        Param::Dw | Param::PhiEx => (0.0, 10.0),
        Param::Pa => (0.5, 1.0),
        Param::Pb => (0.0, 0.5),
        Param::Kex | Param::KAb => (1.0, 1e5),
        Param::Tex => (1e-5, 1.0),
        Param::I0 | Param::Iinf => (0.0, 2.0 * max_intensity.unwrap_or(FALLBACK_INTENSITY)),
    };
    Bounds { min, max }
}

/// The default grid bounds of every element of a parameter vector layout.
pub fn grid_bounds(spins: &[&Spin], infos: &[ParamInfo]) -> Vec<Bounds> {
    infos
        .iter()
        .map(|info| {
            let max_intensity = spins.get(info.spin_index).and_then(|s| s.max_intensity());
            default_bounds(info.param, max_intensity)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CurveShape;
    use crate::dispersion::DispModel;
    use crate::parameters::loop_parameters;

    #[test]
    fn test_bounds_validation() {
        assert!(Bounds::new(0.0, 10.0).is_ok());
        assert!(Bounds::new(1.0, 1.0).is_ok());
        assert!(Bounds::new(10.0, 0.0).is_err());
        assert!(Bounds::new(f64::NEG_INFINITY, 0.0).is_err());
    }

    #[test]
    fn test_grid_values() {
        let bounds = Bounds::new(1.0, 5.0).unwrap();
        assert_eq!(bounds.grid_value(0, 5), 1.0);
        assert_eq!(bounds.grid_value(2, 5), 3.0);
        assert_eq!(bounds.grid_value(4, 5), 5.0);
        assert_eq!(bounds.grid_value(0, 1), 1.0);
        assert!(bounds.contains(5.0));
        assert!(!bounds.contains(5.1));
    }

    #[test]
    fn test_default_grid_bounds() {
        let spin = Spin::new(":1@N");
        let infos = loop_parameters(DispModel::Lm63, 1, 1, CurveShape::Decay, &[]);
        let bounds = grid_bounds(&[&spin], &infos);
        assert_eq!(bounds.len(), 3);
        assert_eq!(bounds[0], Bounds { min: 1.0, max: 40.0 });
        assert_eq!(bounds[2].max, 1e5);
        assert_eq!(default_bounds(Param::I0, None).max, 2e5);
    }
}
