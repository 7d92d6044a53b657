// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! YAML run configuration.
//!
//! Every section has defaults so a run file only lists what it changes:
//!
//! ```yaml
//! model:
//!   velocity: "circle:2.5,3.0,200"
//!   shape: [101, 101]
//!   spacing: [10.0, 10.0]
//! time:
//!   stop: 1000.0
//! source:
//!   f0: 0.010
//!   line: { start: [20.0, 20.0], end: [980.0, 20.0], count: 5 }
//! receivers:
//!   line: { start: [0.0, 980.0], end: [1000.0, 980.0], count: 101 }
//! inversion:
//!   initial: { smooth: 15.0 }
//!   iterations: 5
//!   optimizer: { kind: backtracking, initial_step: 0.05 }
//!   bounds: { vmin: 2.0, vmax: 3.5 }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::{VelocityModel, DEFAULT_NBL, DEFAULT_SPACE_ORDER, SUPPORTED_SPACE_ORDERS};
use crate::error::{FwiError, Result};
use crate::geometry::{line, Acquisition, Ricker, TimeAxis};
use crate::optimize::{BacktrackingLineSearch, Bounds, GradientDescent, InversionOptions, Optimizer};
use crate::presets::build_velocity;

fn invalid(msg: impl Into<String>) -> FwiError {
    FwiError::Config(msg.into())
}

/// Grid and true velocity model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Velocity preset, see [`crate::presets`].
    pub velocity: String,
    /// Nodes along x and z.
    pub shape: [usize; 2],
    /// Grid spacing in metres.
    pub spacing: [f64; 2],
    /// Physical coordinates of node `[0, 0]`.
    pub origin: [f64; 2],
    /// Absorbing layer width in grid points.
    pub nbl: usize,
    /// Spatial finite-difference order.
    pub space_order: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            velocity: "uniform:2.5".to_string(),
            shape: [101, 101],
            spacing: [10.0, 10.0],
            origin: [0.0, 0.0],
            nbl: DEFAULT_NBL,
            space_order: DEFAULT_SPACE_ORDER,
        }
    }
}

impl ModelConfig {
    /// Build a model on this grid from a velocity preset.
    pub fn build(&self, preset: &str) -> Result<VelocityModel> {
        let vp = build_velocity(preset, self.shape, self.spacing)?;
        VelocityModel::from_array(self.spacing, vp)?
            .with_origin(self.origin)
            .with_nbl(self.nbl)
            .with_space_order(self.space_order)
    }
}

/// Simulation time window in ms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// Start time.
    pub start: f64,
    /// Stop time (inclusive).
    pub stop: f64,
    /// Time step. Defaults to the critical step of the true model.
    pub dt: Option<f64>,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            start: 0.0,
            stop: 1000.0,
            dt: None,
        }
    }
}

/// Evenly spaced points from `start` to `end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineConfig {
    /// First point `[x, z]`.
    pub start: [f64; 2],
    /// Last point `[x, z]`.
    pub end: [f64; 2],
    /// Number of points.
    pub count: usize,
}

/// Explicit positions and/or a line of positions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionsConfig {
    /// Listed positions `[x, z]` in metres.
    pub positions: Vec<[f64; 2]>,
    /// Positions spread along a line, appended after `positions`.
    pub line: Option<LineConfig>,
}

impl PositionsConfig {
    /// All positions, listed ones first.
    pub fn resolve(&self) -> Vec<[f64; 2]> {
        let mut all = self.positions.clone();
        if let Some(l) = &self.line {
            all.extend(line(l.start, l.end, l.count));
        }
        all
    }
}

/// Source wavelet and positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Ricker wavelet shared by all shots.
    #[serde(flatten)]
    pub wavelet: Ricker,
    /// Source positions, one shot each.
    #[serde(flatten)]
    pub layout: PositionsConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            wavelet: Ricker::new(0.010),
            layout: PositionsConfig::default(),
        }
    }
}

/// Recorded data for the inversion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservedConfig {
    /// One gather file per source (`.npy`, `.mat` or a `.json` trace
    /// bundle). When empty, data are simulated through the true model.
    pub gathers: Vec<PathBuf>,
}

/// Model update rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    /// Fixed relative step.
    GradientDescent {
        /// Relative step length.
        step: f64,
    },
    /// Armijo backtracking.
    Backtracking {
        /// Largest relative step tried.
        #[serde(default = "default_initial_step")]
        initial_step: f64,
        /// Step reduction factor.
        #[serde(default = "default_shrink")]
        shrink: f64,
        /// Sufficient decrease constant.
        #[serde(default = "default_c1")]
        c1: f64,
        /// Trial evaluations per iteration.
        #[serde(default = "default_max_trials")]
        max_trials: usize,
    },
}

fn default_initial_step() -> f64 {
    0.05
}

fn default_shrink() -> f64 {
    0.5
}

fn default_c1() -> f64 {
    1e-4
}

fn default_max_trials() -> usize {
    8
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig::Backtracking {
            initial_step: default_initial_step(),
            shrink: default_shrink(),
            c1: default_c1(),
            max_trials: default_max_trials(),
        }
    }
}

impl OptimizerConfig {
    /// Instantiate the optimizer.
    pub fn build(&self) -> Result<Box<dyn Optimizer>> {
        match *self {
            OptimizerConfig::GradientDescent { step } => {
                if !(step > 0.0 && step.is_finite()) {
                    return Err(invalid(format!("step must be positive, got {}", step)));
                }
                Ok(Box::new(GradientDescent { step }))
            }
            OptimizerConfig::Backtracking {
                initial_step,
                shrink,
                c1,
                max_trials,
            } => Ok(Box::new(BacktrackingLineSearch::new(
                initial_step,
                shrink,
                c1,
                max_trials,
            )?)),
        }
    }
}

/// Starting model of the inversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialModel {
    /// Gaussian-smoothed true model with this sigma in grid points.
    Smooth(f64),
    /// A velocity preset on the same grid.
    Preset(String),
}

impl Default for InitialModel {
    fn default() -> Self {
        InitialModel::Smooth(10.0)
    }
}

/// Inversion loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InversionConfig {
    /// Starting model.
    pub initial: InitialModel,
    /// Maximum model updates.
    pub iterations: usize,
    /// Update rule.
    pub optimizer: OptimizerConfig,
    /// Velocity bounds.
    pub bounds: Option<Bounds>,
    /// Stop once the misfit falls below this value.
    pub tolerance: f64,
}

impl Default for InversionConfig {
    fn default() -> Self {
        Self {
            initial: InitialModel::default(),
            iterations: 5,
            optimizer: OptimizerConfig::default(),
            bounds: None,
            tolerance: 0.0,
        }
    }
}

impl InversionConfig {
    /// Loop options for [`crate::optimize::invert`].
    pub fn options(&self) -> InversionOptions {
        InversionOptions {
            iterations: self.iterations,
            bounds: self.bounds,
            tolerance: self.tolerance,
        }
    }
}

/// Complete run description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Grid and true model.
    pub model: ModelConfig,
    /// Time window.
    pub time: TimeConfig,
    /// Sources.
    pub source: SourceConfig,
    /// Receivers shared by all shots.
    pub receivers: PositionsConfig,
    /// Recorded data.
    pub observed: ObservedConfig,
    /// Inversion settings.
    pub inversion: InversionConfig,
    /// Worker threads for the shot loop. Defaults to all cores.
    pub threads: Option<usize>,
    /// Output directory.
    pub output: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            time: TimeConfig::default(),
            source: SourceConfig::default(),
            receivers: PositionsConfig::default(),
            observed: ObservedConfig::default(),
            inversion: InversionConfig::default(),
            threads: None,
            output: PathBuf::from("output"),
        }
    }
}

impl RunConfig {
    /// Parse a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| invalid(e.to_string()))
    }

    /// Read and parse a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Serialise to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| invalid(e.to_string()))
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_SPACE_ORDERS.contains(&self.model.space_order) {
            return Err(FwiError::InvalidSpaceOrder(self.model.space_order));
        }
        if !(self.time.stop > self.time.start) {
            return Err(invalid(format!(
                "time.stop ({}) must exceed time.start ({})",
                self.time.stop, self.time.start
            )));
        }
        if let Some(dt) = self.time.dt {
            if !(dt > 0.0 && dt.is_finite()) {
                return Err(invalid(format!("time.dt must be positive, got {}", dt)));
            }
        }
        if !(self.source.wavelet.f0 > 0.0 && self.source.wavelet.f0.is_finite()) {
            return Err(invalid(format!(
                "source.f0 must be positive, got {}",
                self.source.wavelet.f0
            )));
        }
        let num_sources = self.source.layout.resolve().len();
        if num_sources == 0 {
            return Err(invalid("no source positions given"));
        }
        if self.receivers.resolve().is_empty() && self.observed.gathers.is_empty() {
            return Err(invalid("no receiver positions given"));
        }
        if !self.observed.gathers.is_empty() && self.observed.gathers.len() != num_sources {
            return Err(FwiError::ShotCountMismatch {
                sources: num_sources,
                gathers: self.observed.gathers.len(),
            });
        }
        if let Some(b) = &self.inversion.bounds {
            Bounds::new(b.vmin, b.vmax)?;
        }
        if let InitialModel::Smooth(sigma) = self.inversion.initial {
            if !(sigma >= 0.0 && sigma.is_finite()) {
                return Err(invalid(format!(
                    "initial smoothing sigma must be >= 0, got {}",
                    sigma
                )));
            }
        }
        if self.threads == Some(0) {
            return Err(invalid("threads must be >= 1"));
        }
        self.inversion.optimizer.build()?;
        Ok(())
    }

    /// The true velocity model.
    pub fn true_model(&self) -> Result<VelocityModel> {
        self.model.build(&self.model.velocity)
    }

    /// The starting model of the inversion, derived from `true_model`.
    pub fn initial_model(&self, true_model: &VelocityModel) -> Result<VelocityModel> {
        match &self.inversion.initial {
            InitialModel::Smooth(sigma) => Ok(true_model.smoothed(*sigma)),
            InitialModel::Preset(preset) => self.model.build(preset),
        }
    }

    /// Simulation time axis. Without an explicit `dt`, the critical step
    /// of `model` is used, tightened so that any model inside the inversion
    /// bounds stays stable.
    pub fn time_axis(&self, model: &VelocityModel) -> Result<TimeAxis> {
        let dt = match self.time.dt {
            Some(dt) => dt,
            None => {
                let vmax = model.velocity().fold(0.0_f64, |a, &v| a.max(v));
                let bound = self.inversion.bounds.map_or(vmax, |b| b.vmax.max(vmax));
                model.critical_dt() * vmax / bound
            }
        };
        TimeAxis::new(self.time.start, self.time.stop, dt)
    }

    /// Source positions in shot order.
    pub fn sources(&self) -> Vec<[f64; 2]> {
        self.source.layout.resolve()
    }

    /// Every source recorded by the full receiver spread.
    pub fn acquisition(&self) -> Acquisition {
        Acquisition::fixed_spread(&self.sources(), &self.receivers.resolve())
    }
}
