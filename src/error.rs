// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::fmt;

/// Errors that can occur during model setup, I/O, modelling, or inversion.
#[derive(Debug)]
pub enum FwiError {
    /// Grid shape is invalid (dimension too small).
    InvalidGridShape {
        /// The axis index.
        axis: usize,
        /// The size provided.
        size: usize,
    },
    /// Grid spacing is not positive and finite.
    InvalidGridSpacing(f64),
    /// Velocity value is not positive and finite.
    InvalidVelocity {
        /// The flat index of the invalid value.
        index: usize,
        /// The invalid value.
        value: f64,
    },
    /// Squared slowness value is not positive and finite.
    InvalidSquaredSlowness {
        /// The flat index of the invalid value.
        index: usize,
        /// The invalid value.
        value: f64,
    },
    /// Finite-difference order is not one of the supported orders.
    InvalidSpaceOrder(usize),
    /// Time axis parameters are inconsistent.
    InvalidTimeAxis {
        /// Start time (ms).
        start: f64,
        /// Stop time (ms).
        stop: f64,
        /// Sample interval (ms).
        step: f64,
    },
    /// Time step violates the CFL stability limit of the model.
    UnstableTimeStep {
        /// The requested time step (ms).
        dt: f64,
        /// The largest stable time step (ms).
        critical: f64,
    },
    /// A source or receiver position is unusable.
    InvalidPosition {
        /// The physical coordinates.
        coord: [f64; 2],
        /// Explanation of why it's invalid.
        reason: String,
    },
    /// Traces in a gather do not share a sample interval.
    InconsistentSampling {
        /// Station whose sample interval differs.
        station: String,
        /// The interval of the first trace.
        expected: f64,
        /// The interval found.
        got: f64,
    },
    /// A gather was built from no traces.
    EmptyGather,
    /// Number of observed gathers does not match the number of shots.
    ShotCountMismatch {
        /// Number of sources in the acquisition.
        sources: usize,
        /// Number of observed gathers.
        gathers: usize,
    },
    /// Array shape does not match expected shape.
    ShapeMismatch {
        /// The expected shape.
        expected: Vec<usize>,
        /// The actual shape encountered.
        got: Vec<usize>,
    },
    /// Unsupported data type in file.
    UnsupportedDtype(String),
    /// Unsupported file format (unrecognized extension).
    UnsupportedFileFormat(String),
    /// Expected MAT variable not found in file.
    MatVariableNotFound {
        /// The variable name that was requested.
        expected: String,
        /// The variable names that are available.
        available: Vec<String>,
    },
    /// Invalid run configuration.
    Config(String),
    /// I/O error occurred.
    IoError(std::io::Error),
    /// Other error with a descriptive message.
    Other(String),
}

impl fmt::Display for FwiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FwiError::InvalidGridShape { axis, size } => {
                write!(
                    f,
                    "invalid grid shape: axis {} has size {} (must be >= 3)",
                    axis, size
                )
            }
            FwiError::InvalidGridSpacing(h) => {
                write!(
                    f,
                    "invalid grid spacing: {} (must be positive and finite)",
                    h
                )
            }
            FwiError::InvalidVelocity { index, value } => {
                write!(
                    f,
                    "invalid velocity at index {}: {} (must be positive and finite)",
                    index, value
                )
            }
            FwiError::InvalidSquaredSlowness { index, value } => {
                write!(
                    f,
                    "invalid squared slowness at index {}: {} (must be positive and finite)",
                    index, value
                )
            }
            FwiError::InvalidSpaceOrder(order) => {
                write!(
                    f,
                    "invalid space order: {} (supported: 2, 4, 8)",
                    order
                )
            }
            FwiError::InvalidTimeAxis { start, stop, step } => {
                write!(
                    f,
                    "invalid time axis: start {} stop {} step {}",
                    start, stop, step
                )
            }
            FwiError::UnstableTimeStep { dt, critical } => {
                write!(
                    f,
                    "unstable time step: dt {} exceeds critical dt {}",
                    dt, critical
                )
            }
            FwiError::InvalidPosition { coord, reason } => {
                write!(f, "invalid position at {:?}: {}", coord, reason)
            }
            FwiError::InconsistentSampling {
                station,
                expected,
                got,
            } => {
                write!(
                    f,
                    "inconsistent sampling: station '{}' has step {} (expected {})",
                    station, got, expected
                )
            }
            FwiError::EmptyGather => write!(f, "gather contains no traces"),
            FwiError::ShotCountMismatch { sources, gathers } => {
                write!(
                    f,
                    "shot count mismatch: {} sources but {} observed gathers",
                    sources, gathers
                )
            }
            FwiError::ShapeMismatch { expected, got } => {
                write!(f, "shape mismatch: expected {:?}, got {:?}", expected, got)
            }
            FwiError::UnsupportedDtype(dtype) => {
                write!(f, "unsupported dtype: {}", dtype)
            }
            FwiError::UnsupportedFileFormat(ext) => {
                write!(f, "unsupported file format: {}", ext)
            }
            FwiError::MatVariableNotFound {
                expected,
                available,
            } => {
                write!(
                    f,
                    "MAT variable '{}' not found; available variables: {:?}",
                    expected, available
                )
            }
            FwiError::Config(msg) => write!(f, "invalid config: {}", msg),
            FwiError::IoError(e) => write!(f, "I/O error: {}", e),
            FwiError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for FwiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FwiError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FwiError {
    fn from(e: std::io::Error) -> Self {
        FwiError::IoError(e)
    }
}

/// Convenience type alias for Results with FwiError.
pub type Result<T> = std::result::Result<T, FwiError>;
