//! The relaxation dispersion model function library.
//!
//! Every model maps a set of physical exchange parameters plus the dispersion
//! points of one experiment to a same-shaped array of back-calculated R2eff or
//! R1rho values. The functions write into a caller supplied buffer and never
//! fail: degenerate parameter combinations collapse to the no-exchange line and
//! non-finite results are replaced by [`BLOWUP_SENTINEL`].

pub mod cr72;
pub mod dpl94;
pub mod exponential;
pub mod lm63;
pub mod m61;
pub mod ns_cpmg_2site;
pub mod tsmfk01;

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data::ExpType;
use crate::error::{DispError, Result};
use crate::parameters::Param;

pub use ns_cpmg_2site::Integration;

/// The value written over a whole back-calculation when it overflows.
pub const BLOWUP_SENTINEL: f64 = 1e100;

/// The 1H gyromagnetic ratio (rad.s^-1.T^-1).
pub const G1H: f64 = 26.7522212e7;

/// The 15N gyromagnetic ratio (rad.s^-1.T^-1).
pub const G15N: f64 = -2.7126e7;

pub(crate) fn fill(back_calc: &mut [f64], value: f64) {
    back_calc.iter_mut().for_each(|v| *v = value);
}

/// Replace the entire array with the sentinel if any element is NaN or infinite.
pub(crate) fn catch_blowup(back_calc: &mut [f64]) {
    let total: f64 = back_calc.iter().sum();
    if !total.is_finite() {
        fill(back_calc, BLOWUP_SENTINEL);
    }
}

/// The relaxation dispersion models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DispModel {
    /// Per-point exponential curve fitting of the raw peak intensities.
    R2eff,
    /// No chemical exchange, R2eff = R20.
    NoRex,
    /// Luz and Meiboom (1963) 2-site fast exchange CPMG model.
    Lm63,
    /// Carver and Richards (1972) 2-site CPMG model with R20A = R20B.
    Cr72,
    /// Carver and Richards (1972) 2-site CPMG model with independent R20A and R20B.
    Cr72Full,
    /// Tollinger et al. (2001) 2-site very slow exchange CPMG model.
    Tsmfk01,
    /// Meiboom (1961) on-resonance 2-site fast exchange R1rho model.
    M61,
    /// Davis et al. (1994) off-resonance 2-site fast exchange R1rho model.
    Dpl94,
    /// 2-site numerical Bloch-McConnell propagation through the CPMG train.
    NsCpmg2Site,
}

const PARAMS_R2EFF: &[Param] = &[Param::R2eff, Param::I0];
const PARAMS_NOREX: &[Param] = &[Param::R2];
const PARAMS_FAST: &[Param] = &[Param::R2, Param::PhiEx, Param::Kex];
const PARAMS_CR72: &[Param] = &[Param::R2, Param::Dw, Param::Pa, Param::Kex];
const PARAMS_CR72_FULL: &[Param] = &[Param::R2a, Param::R2b, Param::Dw, Param::Pa, Param::Kex];
const PARAMS_TSMFK01: &[Param] = &[Param::R2a, Param::Dw, Param::KAb];

impl DispModel {
    /// All models, in the order they are usually presented.
    pub const ALL: [DispModel; 9] = [
        DispModel::R2eff,
        DispModel::NoRex,
        DispModel::Lm63,
        DispModel::Cr72,
        DispModel::Cr72Full,
        DispModel::Tsmfk01,
        DispModel::M61,
        DispModel::Dpl94,
        DispModel::NsCpmg2Site,
    ];

    /// The model name as used in analysis scripts.
    pub fn name(&self) -> &'static str {
        match self {
            DispModel::R2eff => "R2eff",
            DispModel::NoRex => "No Rex",
            DispModel::Lm63 => "LM63",
            DispModel::Cr72 => "CR72",
            DispModel::Cr72Full => "CR72 full",
            DispModel::Tsmfk01 => "TSMFK01",
            DispModel::M61 => "M61",
            DispModel::Dpl94 => "DPL94",
            DispModel::NsCpmg2Site => "NS CPMG 2-site expanded",
        }
    }

    /// The model parameters, excluding the inversion recovery Iinf of the R2eff model.
    pub fn params(&self) -> &'static [Param] {
        match self {
            DispModel::R2eff => PARAMS_R2EFF,
            DispModel::NoRex => PARAMS_NOREX,
            DispModel::Lm63 | DispModel::M61 | DispModel::Dpl94 => PARAMS_FAST,
            DispModel::Cr72 | DispModel::NsCpmg2Site => PARAMS_CR72,
            DispModel::Cr72Full => PARAMS_CR72_FULL,
            DispModel::Tsmfk01 => PARAMS_TSMFK01,
        }
    }

    /// Whether the parameter belongs to this model.
    pub fn has_param(&self, param: Param) -> bool {
        self.params().contains(&param)
            || (*self == DispModel::R2eff && param == Param::Iinf)
    }

    /// Whether this model can back-calculate data of the given experiment type.
    pub fn supports(&self, exp_type: ExpType) -> bool {
        match self {
            DispModel::R2eff | DispModel::NoRex => true,
            DispModel::M61 | DispModel::Dpl94 => exp_type == ExpType::R1rho,
            _ => exp_type == ExpType::CpmgSq,
        }
    }
}

impl fmt::Display for DispModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DispModel {
    type Err = DispError;

    fn from_str(s: &str) -> Result<Self> {
        DispModel::ALL
            .iter()
            .find(|m| m.name().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| DispError::Configuration(format!("Unknown dispersion model '{}'", s)))
    }
}

/// Outcome of asking a model to back-calculate an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applicability {
    /// The buffer holds the back-calculated values.
    Applicable,
    /// The model has no formula for this experiment; the buffer is untouched.
    NotApplicable,
}

/// Physical exchange parameters for one spin at one field, already in rad/s units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExchangeParams {
    pub r20a: f64,
    pub r20b: f64,
    /// Chemical shift difference (rad/s).
    pub dw: f64,
    /// phi_ex = pA.pB.dw^2 in (rad/s)^2.
    pub phi_ex: f64,
    pub pa: f64,
    pub kex: f64,
    pub k_ab: f64,
}

/// The experimental variables for one (experiment, field, offset) combination.
#[derive(Debug, Clone, Copy)]
pub struct PointInputs<'a> {
    pub exp_type: ExpType,
    /// The dispersion points: nu_CPMG or spin-lock nu1, in Hz.
    pub points: &'a [f64],
    /// The constant relaxation time period of the experiment (s).
    pub relax_time: Option<f64>,
    /// The longitudinal relaxation rate at this field.
    pub r1: f64,
    /// The rotating frame tilt angle per dispersion point (rad), `None` on resonance.
    pub tilt_angles: Option<&'a [f64]>,
}

/// Back-calculate the R2eff/R1rho values of one experiment with the given model.
pub fn back_calc(
    model: DispModel,
    integration: Integration,
    params: &ExchangeParams,
    inputs: &PointInputs<'_>,
    back_calc: &mut [f64],
) -> Applicability {
    if !model.supports(inputs.exp_type) {
        return Applicability::NotApplicable;
    }

    match model {
        DispModel::R2eff => return Applicability::NotApplicable,
        DispModel::NoRex => fill(back_calc, params.r20a),
        DispModel::Lm63 => {
            lm63::r2eff_lm63(params.r20a, params.phi_ex, params.kex, inputs.points, back_calc)
        }
        DispModel::Cr72 | DispModel::Cr72Full => cr72::r2eff_cr72(
            params.r20a,
            params.r20b,
            params.pa,
            params.dw,
            params.kex,
            inputs.points,
            back_calc,
        ),
        DispModel::Tsmfk01 => {
            let tcp: Vec<f64> = inputs.points.iter().map(|&nu| tau_cp(nu)).collect();
            tsmfk01::r2eff_tsmfk01(params.r20a, params.dw, params.k_ab, &tcp, back_calc)
        }
        DispModel::M61 => {
            let w1: Vec<f64> = inputs.points.iter().map(|&nu| spin_lock_omega1_squared(nu)).collect();
            m61::r1rho_m61(params.r20a, params.phi_ex, params.kex, &w1, back_calc)
        }
        DispModel::Dpl94 => {
            let w1: Vec<f64> = inputs.points.iter().map(|&nu| spin_lock_omega1_squared(nu)).collect();
            let on_resonance = vec![PI / 2.0; inputs.points.len()];
            let theta = inputs.tilt_angles.unwrap_or(&on_resonance);
            dpl94::r1rho_dpl94(
                params.r20a,
                params.phi_ex,
                params.kex,
                theta,
                inputs.r1,
                &w1,
                back_calc,
            )
        }
        DispModel::NsCpmg2Site => {
            let Some(relax_time) = inputs.relax_time else {
                return Applicability::NotApplicable;
            };
            ns_cpmg_2site::r2eff_ns_cpmg_2site(
                params.r20a,
                params.pa,
                params.dw,
                params.kex,
                relax_time,
                inputs.points,
                integration,
                back_calc,
            )
        }
    }

    Applicability::Applicable
}

/// Convert a chemical shift difference from ppm to rad/s at the given 1H frequency.
///
/// The 1H frequency (Hz) is scaled by the 15N to 1H gyromagnetic ratio to give the
/// heteronuclear Larmor frequency.
pub fn ppm_to_rad(dw_ppm: f64, frq_1h: f64) -> f64 {
    dw_ppm * 2.0 * PI * frq_1h * (G15N / G1H).abs() / 1e6
}

/// Convert phi_ex from ppm^2 to (rad/s)^2 at the given 1H frequency.
pub fn phi_ex_to_rad(phi_ex_ppm2: f64, frq_1h: f64) -> f64 {
    let scale = 2.0 * PI * frq_1h * (G15N / G1H).abs() / 1e6;
    phi_ex_ppm2 * scale * scale
}

/// The squared spin-lock field strength omega1^2 from nu1 in Hz.
pub fn spin_lock_omega1_squared(nu1: f64) -> f64 {
    let w1 = 2.0 * PI * nu1;
    w1 * w1
}

/// The CPMG delay tau_CP = 1 / (4 nu_CPMG).
pub fn tau_cp(nu_cpmg: f64) -> f64 {
    1.0 / (4.0 * nu_cpmg)
}
