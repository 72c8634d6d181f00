//! # dispfit-rs
//!
//! `dispfit-rs` fits NMR relaxation dispersion data to chemical exchange models.
//!
//! The library provides:
//! - The dispersion model functions (LM63, CR72, TSMFK01, M61, DPL94 and the
//!   numerical 2-site CPMG propagation) and the exponential curve models
//! - A parameter vector codec with scaling and linear constraints for clusters
//!   of spins sharing exchange parameters
//! - Grid search, Levenberg-Marquardt and log barrier simplex minimisation
//! - Serial or thread pool dispatch of independent cluster fits
//! - Monte Carlo simulation of the parameter errors
//!
//! ## Basic Usage
//!
//! ```
//! use dispfit_rs::data::{AnalysisSession, CurveDesign, CurveType, DataKey, ExpType, ExperimentalDesign, Spin};
//! use dispfit_rs::{DispModel, DispersionApi, FittingApi, MinAlgorithm, MinimiseOptions, SerialProcessor};
//!
//! let mut design = ExperimentalDesign::new(vec![600e6], CurveType::Fixed);
//! design.add_curve(
//!     DataKey::new(ExpType::CpmgSq, 0, 0),
//!     CurveDesign::fixed(vec![100.0, 200.0, 400.0, 800.0], 0.04),
//! )?;
//!
//! let mut spin = Spin::new(":10@N");
//! for point in design.point_keys() {
//!     spin.set_r2eff(point, 12.0, 0.3);
//! }
//!
//! let mut session = AnalysisSession::new(design);
//! session.add_spin(spin)?;
//! session.set_model(DispModel::NoRex)?;
//!
//! let api = DispersionApi::new();
//! let options = MinimiseOptions::new(MinAlgorithm::Lm).with_constraints(false);
//! api.minimise(&mut session, &options, &SerialProcessor)?;
//! assert!(session.spin(0)?.chi2.unwrap() < 1e-6);
//! # Ok::<(), dispfit_rs::DispError>(())
//! ```

pub mod error;

pub mod data;
pub mod dispersion;
pub mod parameters;

pub mod lm;
pub mod minimise;
pub mod problem;
pub mod target;
mod utils;

pub mod driver;
pub mod processor;
pub mod uncertainty;

pub use error::{DispError, Result};

pub use data::AnalysisSession;
pub use dispersion::DispModel;
pub use driver::{DispersionApi, FitReport, FittingApi};
pub use lm::LevenbergMarquardt;
pub use minimise::{FitOutcome, FitState, MinAlgorithm, MinimiseOptions};
pub use problem::Problem;
pub use processor::{Processor, SerialProcessor, ThreadPoolProcessor};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
