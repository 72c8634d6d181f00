//! The parameter vocabulary of the dispersion models.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data::PointKey;
use crate::error::{DispError, Result};

/// How many values of a parameter exist within a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamScope {
    /// One value per spin per dispersion point (exponential curve parameters).
    PerPoint,
    /// One value per spin per spectrometer field.
    PerField,
    /// One value per spin.
    PerSpin,
    /// A single value shared by every spin of the cluster.
    PerCluster,
    /// Derived from a model parameter, never optimised directly.
    Auxiliary,
}

/// A named dispersion model parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Param {
    R2eff,
    I0,
    Iinf,
    R2,
    R2a,
    R2b,
    Dw,
    PhiEx,
    Pa,
    Pb,
    Kex,
    Tex,
    KAb,
}

impl Param {
    pub const ALL: [Param; 13] = [
        Param::R2eff,
        Param::I0,
        Param::Iinf,
        Param::R2,
        Param::R2a,
        Param::R2b,
        Param::Dw,
        Param::PhiEx,
        Param::Pa,
        Param::Pb,
        Param::Kex,
        Param::Tex,
        Param::KAb,
    ];

    /// The name used in scripts and result files.
    pub fn name(&self) -> &'static str {
        match self {
            Param::R2eff => "r2eff",
            Param::I0 => "i0",
            Param::Iinf => "iinf",
            Param::R2 => "r2",
            Param::R2a => "r2a",
            Param::R2b => "r2b",
            Param::Dw => "dw",
            Param::PhiEx => "phi_ex",
            Param::Pa => "pA",
            Param::Pb => "pB",
            Param::Kex => "kex",
            Param::Tex => "tex",
            Param::KAb => "k_AB",
        }
    }

    pub fn scope(&self) -> ParamScope {
        match self {
            Param::R2eff | Param::I0 | Param::Iinf => ParamScope::PerPoint,
            Param::R2 | Param::R2a | Param::R2b => ParamScope::PerField,
            Param::Dw | Param::PhiEx => ParamScope::PerSpin,
            Param::Pa | Param::Kex | Param::KAb => ParamScope::PerCluster,
            Param::Pb | Param::Tex => ParamScope::Auxiliary,
        }
    }

    /// The starting value used when a spin has no value for the parameter.
    pub fn default_value(&self) -> f64 {
        match self {
            Param::R2eff | Param::R2 | Param::R2a | Param::R2b => 15.0,
            Param::I0 => 10000.0,
            Param::Iinf => 0.0,
            Param::Dw => 0.0,
            Param::PhiEx => 5.0,
            Param::Pa | Param::Pb => 0.5,
            Param::Kex | Param::KAb => 10000.0,
            Param::Tex => 1.0 / 10000.0,
        }
    }

    /// The auxiliary conjugate of a model parameter, if any.
    pub fn conjugate(&self) -> Option<Param> {
        match self {
            Param::Pa => Some(Param::Pb),
            Param::Pb => Some(Param::Pa),
            Param::Kex => Some(Param::Tex),
            Param::Tex => Some(Param::Kex),
            _ => None,
        }
    }

    /// Relaxation rates in the absence of exchange.
    pub fn is_r20(&self) -> bool {
        matches!(self, Param::R2 | Param::R2a | Param::R2b)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Param::R2eff => "The effective transversal relaxation rate",
            Param::I0 => "The initial intensity",
            Param::Iinf => "The intensity at infinity",
            Param::R2 => "The transversal relaxation rate",
            Param::R2a => "The transversal relaxation rate for state A in the absence of exchange",
            Param::R2b => "The transversal relaxation rate for state B in the absence of exchange",
            Param::Dw => "The chemical shift difference between states A and B (in ppm)",
            Param::PhiEx => "The phi_ex = pA.pB.dw**2 value (ppm^2)",
            Param::Pa => "The population for state A",
            Param::Pb => "The population for state B",
            Param::Kex => "The exchange rate",
            Param::Tex => "The time of exchange (tex = 1/kex)",
            Param::KAb => "The exchange rate from state A to state B",
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Param {
    type Err = DispError;

    fn from_str(s: &str) -> Result<Self> {
        Param::ALL
            .iter()
            .find(|p| p.name() == s)
            .copied()
            .ok_or_else(|| DispError::UnknownParameter(s.to_string()))
    }
}

/// Which instance of a parameter a slot refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotIndex {
    /// Spin and cluster level parameters.
    Single,
    /// Field index for the per-field R20 parameters.
    Field(usize),
    /// Dispersion point for the exponential curve parameters.
    Point(PointKey),
}

/// The address of one stored parameter value on a spin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParamSlot {
    pub param: Param,
    pub index: SlotIndex,
}

impl ParamSlot {
    pub fn single(param: Param) -> Self {
        Self { param, index: SlotIndex::Single }
    }

    pub fn field(param: Param, field: usize) -> Self {
        Self { param, index: SlotIndex::Field(field) }
    }

    pub fn point(param: Param, point: PointKey) -> Self {
        Self { param, index: SlotIndex::Point(point) }
    }

    /// Check that the index kind matches the parameter scope.
    pub fn validate(&self) -> Result<()> {
        let ok = match (self.param.scope(), self.index) {
            (ParamScope::PerPoint, SlotIndex::Point(_)) => true,
            (ParamScope::PerField, SlotIndex::Field(_)) => true,
            (ParamScope::PerSpin | ParamScope::PerCluster | ParamScope::Auxiliary, SlotIndex::Single) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(DispError::InvalidInput(format!(
                "The slot {:?} does not match the scope of the '{}' parameter",
                self.index, self.param
            )))
        }
    }
}
