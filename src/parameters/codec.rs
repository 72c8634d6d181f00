//! Conversion between flat parameter vectors and per-spin named values.
//!
//! The vector layout is fixed by [`loop_parameters`] and shared by the
//! optimisers, the scaling matrix, the constraint matrices and the grid bounds:
//!
//! 1. per spin, the R20 parameters with an inner loop over the fields,
//! 2. per spin, the chemical shift type parameters,
//! 3. once per cluster, the populations and exchange rates.
//!
//! The R2eff model instead lays out `r2eff, i0 (, iinf)` per spin and point.

use ndarray::Array1;

use crate::data::{CurveShape, PointKey, Spin};
use crate::dispersion::DispModel;
use crate::error::{DispError, Result};
use crate::parameters::{Param, ParamScope, ParamSlot};

/// The meaning of one element of the parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamInfo {
    pub param: Param,
    /// Position of the owning spin within the cluster, 0 for shared parameters.
    pub spin_index: usize,
    pub slot: ParamSlot,
}

impl ParamInfo {
    pub fn is_shared(&self) -> bool {
        self.param.scope() == ParamScope::PerCluster
    }
}

/// Generate the parameter vector layout of a cluster.
///
/// `points` is only used by the R2eff model, where it lists the dispersion
/// points whose curves are fitted.
pub fn loop_parameters(
    model: DispModel,
    n_spins: usize,
    n_fields: usize,
    shape: CurveShape,
    points: &[PointKey],
) -> Vec<ParamInfo> {
    let mut infos = Vec::new();

    if model == DispModel::R2eff {
        let mut curve_params = vec![Param::R2eff, Param::I0];
        if shape == CurveShape::InversionRecovery {
            curve_params.push(Param::Iinf);
        }
        for spin_index in 0..n_spins {
            for point in points {
                for &param in &curve_params {
                    infos.push(ParamInfo {
                        param,
                        spin_index,
                        slot: ParamSlot::point(param, *point),
                    });
                }
            }
        }
        return infos;
    }

    let params = model.params();

    for spin_index in 0..n_spins {
        for &param in params.iter().filter(|p| p.scope() == ParamScope::PerField) {
            for field in 0..n_fields {
                infos.push(ParamInfo {
                    param,
                    spin_index,
                    slot: ParamSlot::field(param, field),
                });
            }
        }
    }

    for spin_index in 0..n_spins {
        for &param in params.iter().filter(|p| p.scope() == ParamScope::PerSpin) {
            infos.push(ParamInfo {
                param,
                spin_index,
                slot: ParamSlot::single(param),
            });
        }
    }

    for &param in params.iter().filter(|p| p.scope() == ParamScope::PerCluster) {
        infos.push(ParamInfo {
            param,
            spin_index: 0,
            slot: ParamSlot::single(param),
        });
    }

    infos
}

/// The total number of optimised parameters.
pub fn param_num(infos: &[ParamInfo]) -> usize {
    infos.len()
}

/// Convert a parameter vector index into its meaning.
pub fn param_index_to_param_info(index: usize, infos: &[ParamInfo]) -> Result<ParamInfo> {
    infos.get(index).copied().ok_or_else(|| {
        DispError::InvalidInput(format!(
            "Parameter index {} is out of range for {} parameters",
            index,
            infos.len()
        ))
    })
}

/// The auxiliary parameters appended after the model parameters for error and
/// simulation bookkeeping.
///
/// These are the conjugates of the shared parameters: `pB` for `pA` and `tex` for
/// `kex`. `k_AB` has no conjugate, so models fitted with `k_AB` (TSMFK01) carry no
/// auxiliary parameters and `kex` is not derived for them.
pub fn aux_params(model: DispModel) -> Vec<Param> {
    let mut aux = Vec::new();
    for param in model.params() {
        if let Some(conjugate) = param.conjugate() {
            if param.scope() == ParamScope::PerCluster {
                aux.push(conjugate);
            }
        }
    }
    aux
}

/// Assemble the parameter vector from the spin values.
///
/// Missing values are replaced by the parameter defaults. With a simulation
/// index, the replicate values are read instead.
pub fn assemble_param_vector(
    spins: &[&Spin],
    infos: &[ParamInfo],
    sim: Option<usize>,
) -> Result<Array1<f64>> {
    let mut values = Array1::zeros(infos.len());
    for (i, info) in infos.iter().enumerate() {
        let spin = spins.get(info.spin_index).ok_or_else(|| {
            DispError::DimensionMismatch(format!(
                "Parameter {} refers to spin {} of a {} spin cluster",
                info.param,
                info.spin_index,
                spins.len()
            ))
        })?;
        values[i] = spin
            .param_or_sim(&info.slot, sim)?
            .unwrap_or_else(|| info.param.default_value());
    }
    Ok(values)
}

/// Write a parameter vector back onto the spins.
///
/// Shared cluster parameters are written to every spin of the cluster.
pub fn disassemble_param_vector(
    spins: &mut [&mut Spin],
    infos: &[ParamInfo],
    values: &Array1<f64>,
    sim: Option<usize>,
) -> Result<()> {
    if values.len() != infos.len() {
        return Err(DispError::DimensionMismatch(format!(
            "Expected {} parameter values, got {}",
            infos.len(),
            values.len()
        )));
    }

    for (info, &value) in infos.iter().zip(values.iter()) {
        if info.is_shared() {
            for spin in spins.iter_mut() {
                spin.set_param_or_sim(&info.slot, sim, value)?;
            }
        } else {
            let n_spins = spins.len();
            let spin = spins.get_mut(info.spin_index).ok_or_else(|| {
                DispError::DimensionMismatch(format!(
                    "Parameter {} refers to spin {} of a {} spin cluster",
                    info.param, info.spin_index, n_spins
                ))
            })?;
            spin.set_param_or_sim(&info.slot, sim, value)?;
        }
    }
    Ok(())
}

/// The parameter names of a layout, in vector order.
pub fn param_names(infos: &[ParamInfo]) -> Vec<String> {
    infos.iter().map(|info| info.param.name().to_string()).collect()
}
