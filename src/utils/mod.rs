//! Utility functions shared by the targets and the optimisers.

pub mod finite_difference;
