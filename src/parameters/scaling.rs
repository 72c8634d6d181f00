//! Diagonal scaling matrices for conditioning the optimisation.

use ndarray::{Array1, Array2};

use crate::data::Spin;
use crate::parameters::{Param, ParamInfo};

/// Scaling of the R20 rates of the dispersion models.
pub const R20_SCALING: f64 = 10.0;

/// Scaling of the exchange rates.
pub const RATE_SCALING: f64 = 10000.0;

/// Round a value up to the next power of ten: 10^ceil(log10(|x|)).
///
/// Zero and non-finite values give 1.0.
pub fn round_to_next_order(x: f64) -> f64 {
    if x == 0.0 || !x.is_finite() {
        return 1.0;
    }
    10f64.powf(x.abs().log10().ceil())
}

/// The scaling factor of each element of the parameter vector.
///
/// Without scaling all factors are 1.0. Intensity parameters are scaled to the
/// next order of magnitude of the largest peak intensity of the owning spin.
pub fn scaling_factors(spins: &[&Spin], infos: &[ParamInfo], scaling: bool) -> Array1<f64> {
    if !scaling {
        return Array1::ones(infos.len());
    }

    infos
        .iter()
        .map(|info| match info.param {
            Param::R2 | Param::R2a | Param::R2b => R20_SCALING,
            Param::Kex | Param::KAb => RATE_SCALING,
            Param::I0 | Param::Iinf => spins
                .get(info.spin_index)
                .and_then(|spin| spin.max_intensity())
                .map(round_to_next_order)
                .unwrap_or(1.0),
            _ => 1.0,
        })
        .collect()
}

/// The diagonal scaling matrix of a cluster.
pub fn assemble_scaling_matrix(spins: &[&Spin], infos: &[ParamInfo], scaling: bool) -> Array2<f64> {
    Array2::from_diag(&scaling_factors(spins, infos, scaling))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CurveShape, DataKey, ExpType, IntensityKey, PointKey};
    use crate::dispersion::DispModel;
    use crate::parameters::loop_parameters;

    #[test]
    fn test_round_to_next_order() {
        assert_eq!(round_to_next_order(1000.0), 1000.0);
        assert_eq!(round_to_next_order(1001.0), 10000.0);
        assert_eq!(round_to_next_order(0.02), 0.1);
        assert_eq!(round_to_next_order(-350.0), 1000.0);
        assert_eq!(round_to_next_order(0.0), 1.0);
    }

    #[test]
    fn test_dispersion_scaling() {
        let spin = Spin::new(":1@N");
        let infos = loop_parameters(DispModel::Cr72, 1, 2, CurveShape::Decay, &[]);
        let diag = scaling_factors(&[&spin], &infos, true);
        assert_eq!(diag.to_vec(), vec![10.0, 10.0, 1.0, 1.0, 10000.0]);

        let identity = assemble_scaling_matrix(&[&spin], &infos, false);
        assert_eq!(identity, Array2::<f64>::eye(5));
    }

    #[test]
    fn test_intensity_scaling() {
        let point = PointKey {
            key: DataKey::new(ExpType::CpmgSq, 0, 0),
            point: 0,
        };
        let mut spin = Spin::new(":1@N");
        spin.set_intensity(IntensityKey { point, time: 0 }, 1000.0, 10.0);
        spin.set_intensity(IntensityKey { point, time: 1 }, 367.9, 10.0);

        let infos = loop_parameters(DispModel::R2eff, 1, 1, CurveShape::Decay, &[point]);
        let matrix = assemble_scaling_matrix(&[&spin], &infos, true);
        assert_eq!(matrix[[0, 0]], 1.0);
        assert_eq!(matrix[[1, 1]], 1000.0);
        assert_eq!(matrix[[0, 1]], 0.0);
    }
}
