// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! 2D acoustic full waveform inversion.
//!
//! This library simulates the constant-density acoustic wave equation on a
//! Cartesian velocity grid with an absorbing boundary layer, computes the
//! least-squares misfit against recorded shot gathers and its gradient by the
//! adjoint-state method, and updates the velocity model iteratively. Shots
//! are simulated in parallel on a fixed-size thread pool.
//!
//! Units: velocities in km/s, distances in metres, times in ms, frequencies
//! in kHz.

#![warn(missing_docs)]

/// YAML run configuration.
pub mod config;
/// Velocity model on a padded Cartesian grid.
pub mod core;
/// Seismograms, shot gathers and the least-squares misfit.
pub mod data;
/// Error types for the library.
pub mod error;
/// Time axis, source wavelet and acquisition geometry.
pub mod geometry;
/// File I/O for velocity fields, gradients and gathers.
pub mod io;
/// The FWI objective and its gradient.
pub mod objective;
/// Model update rules and the inversion loop.
pub mod optimize;
/// Synthetic velocity models from preset strings.
pub mod presets;
/// Forward and adjoint wave propagation.
pub mod propagator;
/// Shot-parallel task scheduler.
pub mod scheduler;
/// Finite-difference kernels.
pub mod stencil;

pub use crate::core::VelocityModel;
pub use crate::data::{ShotGather, Trace};
pub use crate::error::{FwiError, Result};
pub use crate::geometry::{Acquisition, Ricker, Shot, TimeAxis};
pub use crate::objective::{simulate, Evaluation, FwiProblem, Objective};
pub use crate::optimize::{
    invert, BacktrackingLineSearch, Bounds, GradientDescent, InversionOptions, InversionResult,
    IterationRecord, Optimizer, StopReason,
};
pub use crate::propagator::{ForwardResult, Propagator};
pub use crate::scheduler::{ProgressInfo, ShotScheduler};
