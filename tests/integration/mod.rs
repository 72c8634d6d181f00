//! Integration tests, grouped by area.

mod cluster_fitting;
mod codec;
mod dispatch;
mod lm_optimization;
mod monte_carlo;
