//! The data model of a dispersion analysis.
//!
//! [`AnalysisSession`] replaces any notion of a global current data store: it is
//! created at the start of an analysis and passed explicitly into every fitting
//! operation.

pub mod cluster;
pub mod design;
pub mod session;
pub mod spin;

pub use cluster::{Cluster, ClusterDescriptor, ClusterIter};
pub use design::{
    CurveDesign, CurveShape, CurveType, DataKey, ExpType, ExperimentalDesign, IntensityKey, PointKey,
};
pub use session::AnalysisSession;
pub use spin::{MinStats, ModelValues, SimulationStore, Spin};
