//! # Parameter System
//!
//! The dispersion parameters, and the machinery that maps them onto the flat
//! vectors the optimisers work on.
//!
//! ## Core Components
//!
//! - [`Param`] and [`ParamSlot`]: named parameters and the per-spin storage slot they address
//! - [`loop_parameters`]: the stable vector layout of a cluster
//! - [`assemble_param_vector`] and [`disassemble_param_vector`]: spins to vector and back
//! - [`assemble_scaling_matrix`]: diagonal conditioning of the vector
//! - [`linear_constraints`]: `A.x >= b` limits in scaled coordinates
//! - [`Bounds`] and [`grid_bounds`]: lattice limits for grid searches

pub mod bounds;
pub mod codec;
pub mod constraints;
pub mod names;
pub mod scaling;

pub use bounds::{default_bounds, grid_bounds, Bounds};
pub use codec::{
    assemble_param_vector, aux_params, disassemble_param_vector, loop_parameters,
    param_index_to_param_info, param_names, param_num, ParamInfo,
};
pub use constraints::{linear_constraints, LinearConstraints};
pub use names::{Param, ParamScope, ParamSlot, SlotIndex};
pub use scaling::{assemble_scaling_matrix, round_to_next_order, scaling_factors};
