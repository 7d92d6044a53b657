// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::core::VelocityModel;
use crate::error::{FwiError, Result};

/// A uniformly sampled time axis in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeAxis {
    start: f64,
    step: f64,
    num: usize,
}

impl TimeAxis {
    /// Build a time axis covering `[start, stop]` with interval `step`.
    ///
    /// The axis holds `floor((stop - start) / step) + 1` samples, so it never
    /// runs past `stop`; the actual stop time is `start + step * (num - 1)`.
    ///
    /// # Errors
    /// Returns an error if `step` is not positive or `stop <= start`.
    pub fn new(start: f64, stop: f64, step: f64) -> Result<Self> {
        if !step.is_finite()
            || step <= 0.0
            || !start.is_finite()
            || !stop.is_finite()
            || stop <= start
        {
            return Err(FwiError::InvalidTimeAxis { start, stop, step });
        }
        // tolerance so stop = start + k * step keeps its last sample
        let num = ((stop - start) / step + 1e-9).floor() as usize + 1;
        Ok(TimeAxis { start, step, num })
    }

    /// Build a time axis from a start, interval and sample count.
    pub fn from_samples(start: f64, step: f64, num: usize) -> Result<Self> {
        if num < 2 {
            return Err(FwiError::InvalidTimeAxis {
                start,
                stop: start,
                step,
            });
        }
        Self::new(start, start + step * (num - 1) as f64, step)
    }

    /// First sample time.
    pub fn start(&self) -> f64 {
        self.start
    }

    /// Last sample time.
    pub fn stop(&self) -> f64 {
        self.start + self.step * (self.num - 1) as f64
    }

    /// Sample interval.
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Number of samples.
    pub fn num(&self) -> usize {
        self.num
    }

    /// Sample times.
    pub fn times(&self) -> Vec<f64> {
        (0..self.num)
            .map(|n| self.start + n as f64 * self.step)
            .collect()
    }
}

/// Ricker (Mexican hat) wavelet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ricker {
    /// Peak frequency in kHz.
    pub f0: f64,
    /// Time of the peak in ms. Defaults to `1/f0`.
    pub t0: Option<f64>,
    /// Peak amplitude.
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,
}

fn default_amplitude() -> f64 {
    1.0
}

impl Ricker {
    /// Ricker wavelet with peak frequency `f0` (kHz) and default delay.
    pub fn new(f0: f64) -> Self {
        Ricker {
            f0,
            t0: None,
            amplitude: 1.0,
        }
    }

    /// Delay of the wavelet peak.
    pub fn delay(&self) -> f64 {
        self.t0.unwrap_or(1.0 / self.f0)
    }

    /// Wavelet value at time `t`.
    pub fn value(&self, t: f64) -> f64 {
        let r = std::f64::consts::PI * self.f0 * (t - self.delay());
        let r2 = r * r;
        self.amplitude * (1.0 - 2.0 * r2) * (-r2).exp()
    }

    /// Sample the wavelet on a time axis.
    pub fn sample(&self, axis: &TimeAxis) -> Vec<f64> {
        axis.times().into_iter().map(|t| self.value(t)).collect()
    }
}

/// Bilinear interpolation stencil of a point on the padded grid.
///
/// [`inject`](PointInterpolation::inject) and
/// [`sample`](PointInterpolation::sample) are exact adjoints of each other.
#[derive(Debug, Clone, Copy)]
pub struct PointInterpolation {
    coord: [f64; 2],
    nodes: [([usize; 2], f64); 4],
}

impl PointInterpolation {
    /// Interpolation weights of a physical point in `model`.
    ///
    /// # Errors
    /// Returns an error if the point lies outside the physical model.
    pub fn new(model: &VelocityModel, coord: [f64; 2]) -> Result<Self> {
        let idx = model.physical_to_grid(coord)?;
        let padded = model.padded_shape();

        let mut base = [0usize; 2];
        let mut frac = [0.0; 2];
        for d in 0..2 {
            let lo = (idx[d].floor() as usize).min(padded[d] - 2);
            base[d] = lo;
            frac[d] = idx[d] - lo as f64;
        }
        let [i, j] = base;
        let [tx, tz] = frac;
        let nodes = [
            ([i, j], (1.0 - tx) * (1.0 - tz)),
            ([i + 1, j], tx * (1.0 - tz)),
            ([i, j + 1], (1.0 - tx) * tz),
            ([i + 1, j + 1], tx * tz),
        ];
        Ok(PointInterpolation { coord, nodes })
    }

    /// Physical coordinates of the point.
    pub fn coord(&self) -> [f64; 2] {
        self.coord
    }

    /// Add `value` to `field`, spread over the surrounding nodes.
    pub fn inject(&self, field: &mut Array2<f64>, value: f64) {
        for &([i, j], w) in &self.nodes {
            field[[i, j]] += w * value;
        }
    }

    /// Interpolate `field` at the point.
    pub fn sample(&self, field: &Array2<f64>) -> f64 {
        self.nodes
            .iter()
            .map(|&([i, j], w)| w * field[[i, j]])
            .sum()
    }
}

/// One shot: a source position and the receivers that recorded it.
#[derive(Debug, Clone, PartialEq)]
pub struct Shot {
    /// Source position `[x, z]`.
    pub source: [f64; 2],
    /// Receiver positions `[x, z]`.
    pub receivers: Vec<[f64; 2]>,
}

/// Source and receiver layout of a survey.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Acquisition {
    shots: Vec<Shot>,
}

impl Acquisition {
    /// Survey from an explicit list of shots.
    pub fn new(shots: Vec<Shot>) -> Self {
        Acquisition { shots }
    }

    /// Survey where every source is recorded by the same receiver spread.
    pub fn fixed_spread(sources: &[[f64; 2]], receivers: &[[f64; 2]]) -> Self {
        let shots = sources
            .iter()
            .map(|&source| Shot {
                source,
                receivers: receivers.to_vec(),
            })
            .collect();
        Acquisition { shots }
    }

    /// All shots in order.
    pub fn shots(&self) -> &[Shot] {
        &self.shots
    }

    /// Number of shots.
    pub fn num_shots(&self) -> usize {
        self.shots.len()
    }

    /// Check that every source and receiver lies inside `model`.
    pub fn validate(&self, model: &VelocityModel) -> Result<()> {
        for shot in &self.shots {
            model.physical_to_grid(shot.source)?;
            if shot.receivers.is_empty() {
                return Err(FwiError::InvalidPosition {
                    coord: shot.source,
                    reason: "shot has no receivers".to_string(),
                });
            }
            for &rec in &shot.receivers {
                model.physical_to_grid(rec)?;
            }
        }
        Ok(())
    }
}

/// `count` evenly spaced points from `start` to `end` inclusive.
pub fn line(start: [f64; 2], end: [f64; 2], count: usize) -> Vec<[f64; 2]> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => (0..count)
            .map(|k| {
                let t = k as f64 / (count - 1) as f64;
                [
                    start[0] + t * (end[0] - start[0]),
                    start[1] + t * (end[1] - start[1]),
                ]
            })
            .collect(),
    }
}
