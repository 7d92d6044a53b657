// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use ndarray::Array2;
use tracing::debug;

use crate::core::VelocityModel;
use crate::data::{misfit, residual, ShotGather};
use crate::error::{FwiError, Result};
use crate::geometry::{Acquisition, TimeAxis};
use crate::propagator::Propagator;
use crate::scheduler::ShotScheduler;

/// Misfit of a model, and its gradient with respect to squared slowness
/// when requested.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Objective value.
    pub misfit: f64,
    /// Gradient on the physical grid, shape equal to the model shape.
    pub gradient: Option<Array2<f64>>,
}

/// A differentiable objective over velocity models.
pub trait Objective {
    /// Evaluate the objective at `model`, with the gradient if
    /// `with_gradient` is set.
    fn evaluate(&self, model: &VelocityModel, with_gradient: bool) -> Result<Evaluation>;
}

/// Simulate every shot of `acquisition` through `model`.
///
/// Returns one `[nt, nrec]` array per shot, in shot order.
pub fn simulate(
    model: &VelocityModel,
    acquisition: &Acquisition,
    wavelet: &[f64],
    time: TimeAxis,
    scheduler: &ShotScheduler,
) -> Result<Vec<Array2<f64>>> {
    acquisition.validate(model)?;
    let propagator = Propagator::new(model, time)?;
    let shots = acquisition.shots();
    scheduler.map(shots.len(), |s| {
        propagator
            .forward(&shots[s], wavelet, false)
            .map(|out| out.data)
    })
}

/// Least-squares full waveform inversion objective
/// `0.5 * sum_shots ||d_syn - d_obs||^2`.
pub struct FwiProblem {
    acquisition: Acquisition,
    observed: Vec<Array2<f64>>,
    wavelet: Vec<f64>,
    time: TimeAxis,
    scheduler: ShotScheduler,
}

impl FwiProblem {
    /// Bind a survey to its observed data.
    ///
    /// # Parameters
    /// - `acquisition`: one shot per observed array
    /// - `observed`: recorded data per shot, shape `[nt, nrec]`
    /// - `wavelet`: source time function sampled on `time`
    /// - `time`: simulation time axis
    ///
    /// # Errors
    /// Returns an error if the number of shots or any array shape disagrees.
    pub fn new(
        acquisition: Acquisition,
        observed: Vec<Array2<f64>>,
        wavelet: Vec<f64>,
        time: TimeAxis,
    ) -> Result<Self> {
        if acquisition.num_shots() != observed.len() {
            return Err(FwiError::ShotCountMismatch {
                sources: acquisition.num_shots(),
                gathers: observed.len(),
            });
        }
        if wavelet.len() != time.num() {
            return Err(FwiError::ShapeMismatch {
                expected: vec![time.num()],
                got: vec![wavelet.len()],
            });
        }
        for (shot, data) in acquisition.shots().iter().zip(&observed) {
            if data.dim() != (time.num(), shot.receivers.len()) {
                return Err(FwiError::ShapeMismatch {
                    expected: vec![time.num(), shot.receivers.len()],
                    got: data.shape().to_vec(),
                });
            }
        }
        Ok(FwiProblem {
            acquisition,
            observed,
            wavelet,
            time,
            scheduler: ShotScheduler::new(),
        })
    }

    /// Build the problem from recorded gathers. Receiver positions come from
    /// the gathers and each gather is resampled onto `time`.
    ///
    /// # Errors
    /// Returns an error if the number of sources and gathers differ.
    pub fn from_gathers(
        sources: &[[f64; 2]],
        gathers: &[ShotGather],
        wavelet: Vec<f64>,
        time: TimeAxis,
    ) -> Result<Self> {
        if sources.len() != gathers.len() {
            return Err(FwiError::ShotCountMismatch {
                sources: sources.len(),
                gathers: gathers.len(),
            });
        }
        let mut shots = Vec::with_capacity(gathers.len());
        let mut observed = Vec::with_capacity(gathers.len());
        for (&source, gather) in sources.iter().zip(gathers) {
            shots.push(gather.shot(source));
            if *gather.time_axis() == time {
                observed.push(gather.data().clone());
            } else {
                debug!(
                    from = gather.time_axis().step(),
                    to = time.step(),
                    "resampling observed gather"
                );
                observed.push(gather.resample(&time).data().clone());
            }
        }
        Self::new(Acquisition::new(shots), observed, wavelet, time)
    }

    /// Use a custom scheduler for the shot loop (builder method).
    pub fn with_scheduler(mut self, scheduler: ShotScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// The survey layout.
    pub fn acquisition(&self) -> &Acquisition {
        &self.acquisition
    }

    /// Simulation time axis.
    pub fn time_axis(&self) -> &TimeAxis {
        &self.time
    }

    /// Observed data per shot.
    pub fn observed(&self) -> &[Array2<f64>] {
        &self.observed
    }
}

impl Objective for FwiProblem {
    fn evaluate(&self, model: &VelocityModel, with_gradient: bool) -> Result<Evaluation> {
        self.acquisition.validate(model)?;
        let propagator = Propagator::new(model, self.time)?;
        let shots = self.acquisition.shots();

        let per_shot = self.scheduler.map(shots.len(), |s| {
            let shot = &shots[s];
            let fwd = propagator.forward(shot, &self.wavelet, with_gradient)?;
            let res = residual(&fwd.data, &self.observed[s])?;
            let value = misfit(&res);
            let grad = match fwd.wavefield {
                Some(ref wavefield) if with_gradient => {
                    Some(propagator.adjoint(shot, &res, wavefield)?)
                }
                _ => None,
            };
            debug!(shot = s, misfit = value, "shot evaluated");
            Ok((value, grad))
        })?;

        let mut total = 0.0;
        let mut padded_grad: Option<Array2<f64>> = None;
        for (value, grad) in per_shot {
            total += value;
            if let Some(g) = grad {
                match padded_grad.as_mut() {
                    Some(acc) => *acc += &g,
                    None => padded_grad = Some(g),
                }
            }
        }

        Ok(Evaluation {
            misfit: total,
            gradient: padded_grad.map(|g| model.fold_padding(&g)),
        })
    }
}
