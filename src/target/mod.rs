//! Chi-squared target functions.
//!
//! Each target implements [`Problem`](crate::problem::Problem) over a scaled
//! parameter vector: [`DispersionTarget`] for a spin cluster under one of the
//! dispersion models, and [`RelaxFitTarget`] for the exponential curve of one
//! dispersion point under the R2eff model.

pub mod dispersion;
pub mod relax_fit;

pub use dispersion::DispersionTarget;
pub use relax_fit::RelaxFitTarget;
