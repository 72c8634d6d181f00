//! # Monte Carlo Error Analysis
//!
//! Parameter errors are estimated by refitting synthetic data replicates:
//!
//! 1. [`monte_carlo_setup`] fixes the simulation count and copies the best fit
//!    into every replicate slot.
//! 2. [`create_data`] draws one noisy replicate per simulation from either the
//!    back-calculated or the measured data of every base data unit.
//! 3. [`run_simulations`] refits every replicate through the driver.
//! 4. [`error_analysis`] turns the replicate ensembles into standard deviations
//!    and stores them as the parameter errors.
//!
//! [`monte_carlo`] runs all four steps.

mod monte_carlo;

pub use monte_carlo::{
    create_data, error_analysis, monte_carlo, monte_carlo_setup, perturb, run_simulations, ClusterStatistics,
    McMethod, MonteCarloResult, ParamStatistics,
};
