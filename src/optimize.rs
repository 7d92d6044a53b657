// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::VelocityModel;
use crate::error::{FwiError, Result};
use crate::objective::{Evaluation, Objective};

/// Velocity bounds enforced after every model update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Smallest allowed velocity (km/s).
    pub vmin: f64,
    /// Largest allowed velocity (km/s).
    pub vmax: f64,
}

impl Bounds {
    /// # Errors
    /// Returns an error unless `0 < vmin < vmax` and both are finite.
    pub fn new(vmin: f64, vmax: f64) -> Result<Self> {
        if !vmin.is_finite() || !vmax.is_finite() || vmin <= 0.0 || vmax <= vmin {
            return Err(FwiError::Config(format!(
                "velocity bounds must satisfy 0 < vmin < vmax, got [{}, {}]",
                vmin, vmax
            )));
        }
        Ok(Bounds { vmin, vmax })
    }

    /// Clip a squared-slowness field to the bounds in place. Returns the
    /// number of clipped nodes.
    pub fn project(&self, m: &mut Array2<f64>) -> usize {
        let m_lo = 1.0 / (self.vmax * self.vmax);
        let m_hi = 1.0 / (self.vmin * self.vmin);
        let mut clipped = 0;
        m.mapv_inplace(|v| {
            if v < m_lo {
                clipped += 1;
                m_lo
            } else if v > m_hi {
                clipped += 1;
                m_hi
            } else {
                v
            }
        });
        clipped
    }
}

/// Result of one optimizer step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// Whether the model was updated.
    pub accepted: bool,
    /// Step length that was applied (or last tried).
    pub step: f64,
    /// Misfit of the updated model, if the optimizer evaluated it.
    pub misfit: Option<f64>,
    /// Number of objective evaluations spent.
    pub evaluations: usize,
    /// Number of nodes clipped by the bounds.
    pub clipped: usize,
}

/// Update rule turning a gradient into a new model.
pub trait Optimizer {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Update `model` in place from the evaluation `current` at that model.
    fn step(
        &mut self,
        objective: &dyn Objective,
        model: &mut VelocityModel,
        current: &Evaluation,
        bounds: Option<&Bounds>,
    ) -> Result<StepOutcome>;
}

fn max_abs(a: &Array2<f64>) -> f64 {
    a.iter().fold(0.0, |acc: f64, v| acc.max(v.abs()))
}

fn gradient_of(current: &Evaluation) -> Result<&Array2<f64>> {
    current
        .gradient
        .as_ref()
        .ok_or_else(|| FwiError::Other("optimizer step needs a gradient".to_string()))
}

/// Trial models a shorter step can fix: non-physical values or a model too
/// fast for the time step.
fn is_infeasible(e: &FwiError) -> bool {
    matches!(
        e,
        FwiError::InvalidSquaredSlowness { .. }
            | FwiError::InvalidVelocity { .. }
            | FwiError::UnstableTimeStep { .. }
    )
}

/// Candidate `m - alpha * scale * g`, projected onto the bounds.
fn trial_model(
    model: &VelocityModel,
    grad: &Array2<f64>,
    alpha: f64,
    bounds: Option<&Bounds>,
) -> Result<(VelocityModel, Array2<f64>, usize)> {
    let m = model.squared_slowness();
    let scale = max_abs(&m) / max_abs(grad);
    let mut m_new = &m - &(grad * (alpha * scale));
    let clipped = bounds.map(|b| b.project(&mut m_new)).unwrap_or(0);
    let mut trial = model.clone();
    trial.set_squared_slowness(&m_new)?;
    let dm = m_new - m;
    Ok((trial, dm, clipped))
}

/// Fixed-step steepest descent.
///
/// The gradient is normalised so that `step` is the largest relative change
/// of squared slowness per iteration. No line search is performed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientDescent {
    /// Relative step length.
    pub step: f64,
}

impl Optimizer for GradientDescent {
    fn name(&self) -> &'static str {
        "gradient-descent"
    }

    fn step(
        &mut self,
        _objective: &dyn Objective,
        model: &mut VelocityModel,
        current: &Evaluation,
        bounds: Option<&Bounds>,
    ) -> Result<StepOutcome> {
        let grad = gradient_of(current)?;
        let (trial, _, clipped) = trial_model(model, grad, self.step, bounds)?;
        *model = trial;
        Ok(StepOutcome {
            accepted: true,
            step: self.step,
            misfit: None,
            evaluations: 0,
            clipped,
        })
    }
}

/// Projected steepest descent with a backtracking (Armijo) line search.
///
/// A trial step is accepted when
/// `f(P(m - a g)) <= f(m) + c1 <g, P(m - a g) - m>`.
/// Otherwise the step shrinks by `shrink` up to `max_trials` times. Trials
/// that leave the model space (non-positive squared slowness, or faster than
/// the time step allows) count as rejected trials. The
/// search for the next iteration starts from the last accepted step grown
/// by `1/shrink`, capped at `initial_step`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BacktrackingLineSearch {
    /// Largest relative step tried.
    pub initial_step: f64,
    /// Step reduction factor in `(0, 1)`.
    pub shrink: f64,
    /// Sufficient decrease constant in `(0, 1)`.
    pub c1: f64,
    /// Maximum trial evaluations per iteration.
    pub max_trials: usize,
    next_step: Option<f64>,
}

impl BacktrackingLineSearch {
    /// # Errors
    /// Returns an error for parameters outside their valid ranges.
    pub fn new(initial_step: f64, shrink: f64, c1: f64, max_trials: usize) -> Result<Self> {
        if !(initial_step > 0.0 && initial_step.is_finite()) {
            return Err(FwiError::Config(format!(
                "initial step must be positive, got {}",
                initial_step
            )));
        }
        if !(shrink > 0.0 && shrink < 1.0) || !(c1 > 0.0 && c1 < 1.0) {
            return Err(FwiError::Config(format!(
                "line search needs 0 < shrink < 1 and 0 < c1 < 1, got {} and {}",
                shrink, c1
            )));
        }
        if max_trials == 0 {
            return Err(FwiError::Config("max_trials must be >= 1".to_string()));
        }
        Ok(BacktrackingLineSearch {
            initial_step,
            shrink,
            c1,
            max_trials,
            next_step: None,
        })
    }
}

impl Optimizer for BacktrackingLineSearch {
    fn name(&self) -> &'static str {
        "backtracking"
    }

    fn step(
        &mut self,
        objective: &dyn Objective,
        model: &mut VelocityModel,
        current: &Evaluation,
        bounds: Option<&Bounds>,
    ) -> Result<StepOutcome> {
        let grad = gradient_of(current)?;
        let mut alpha = self.next_step.unwrap_or(self.initial_step);
        let mut evaluations = 0;

        for _ in 0..self.max_trials {
            let (trial, dm, clipped) = match trial_model(model, grad, alpha, bounds) {
                Ok(t) => t,
                Err(e) if is_infeasible(&e) => {
                    debug!(step = alpha, error = %e, "trial step outside the model space");
                    alpha *= self.shrink;
                    continue;
                }
                Err(e) => return Err(e),
            };
            let decrease = (grad * &dm).sum();
            evaluations += 1;
            let f_trial = match objective.evaluate(&trial, false) {
                Ok(eval) => eval.misfit,
                Err(e) if is_infeasible(&e) => {
                    debug!(step = alpha, error = %e, "trial model rejected");
                    alpha *= self.shrink;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if f_trial <= current.misfit + self.c1 * decrease && f_trial < current.misfit {
                *model = trial;
                self.next_step = Some((alpha / self.shrink).min(self.initial_step));
                return Ok(StepOutcome {
                    accepted: true,
                    step: alpha,
                    misfit: Some(f_trial),
                    evaluations,
                    clipped,
                });
            }
            alpha *= self.shrink;
        }

        warn!(
            trials = self.max_trials,
            last_step = alpha / self.shrink,
            "line search found no decrease"
        );
        Ok(StepOutcome {
            accepted: false,
            step: alpha / self.shrink,
            misfit: None,
            evaluations,
            clipped: 0,
        })
    }
}

/// Why an inversion stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The iteration budget was used up.
    MaxIterations,
    /// The misfit dropped below the requested tolerance.
    Converged,
    /// The gradient vanished.
    ZeroGradient,
    /// The optimizer could not find a decreasing step.
    LineSearchFailed,
}

/// Settings for [`invert`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InversionOptions {
    /// Maximum number of model updates.
    pub iterations: usize,
    /// Velocity bounds, if any.
    pub bounds: Option<Bounds>,
    /// Stop once the misfit falls below this value.
    pub tolerance: f64,
}

impl Default for InversionOptions {
    fn default() -> Self {
        InversionOptions {
            iterations: 10,
            bounds: None,
            tolerance: 0.0,
        }
    }
}

/// One row of the convergence history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Iteration number, starting at 1.
    pub iteration: usize,
    /// Misfit before the update.
    pub misfit: f64,
    /// Largest absolute gradient entry.
    pub gradient_max: f64,
    /// Step length applied.
    pub step: f64,
    /// Objective evaluations spent by the optimizer.
    pub evaluations: usize,
}

/// Outcome of [`invert`].
#[derive(Debug, Clone)]
pub struct InversionResult {
    /// The final model.
    pub model: VelocityModel,
    /// Per-iteration history.
    pub history: Vec<IterationRecord>,
    /// Misfit of the final model.
    pub final_misfit: f64,
    /// Why the loop stopped.
    pub stop: StopReason,
}

/// Run the inversion loop from `initial`.
///
/// `callback` is invoked after each accepted update with the iteration
/// record and the updated model.
///
/// # Errors
/// Propagates objective and optimizer errors.
pub fn invert<F>(
    objective: &dyn Objective,
    initial: VelocityModel,
    optimizer: &mut dyn Optimizer,
    options: &InversionOptions,
    mut callback: F,
) -> Result<InversionResult>
where
    F: FnMut(&IterationRecord, &VelocityModel),
{
    let mut model = initial;
    let mut history = Vec::with_capacity(options.iterations);
    let mut stop = StopReason::MaxIterations;
    let mut known_misfit: Option<f64> = None;

    info!(
        optimizer = optimizer.name(),
        iterations = options.iterations,
        "starting inversion"
    );

    for iteration in 1..=options.iterations {
        let eval = objective.evaluate(&model, true)?;
        known_misfit = Some(eval.misfit);
        if eval.misfit < options.tolerance {
            stop = StopReason::Converged;
            break;
        }
        let gradient_max = eval.gradient.as_ref().map(max_abs).unwrap_or(0.0);
        if gradient_max == 0.0 {
            stop = StopReason::ZeroGradient;
            break;
        }

        let outcome = optimizer.step(objective, &mut model, &eval, options.bounds.as_ref())?;
        if !outcome.accepted {
            stop = StopReason::LineSearchFailed;
            break;
        }
        if outcome.clipped > 0 {
            warn!(iteration, clipped = outcome.clipped, "velocity clipped to bounds");
        }
        known_misfit = outcome.misfit;

        let record = IterationRecord {
            iteration,
            misfit: eval.misfit,
            gradient_max,
            step: outcome.step,
            evaluations: outcome.evaluations,
        };
        info!(
            iteration,
            misfit = eval.misfit,
            gradient_max,
            step = outcome.step,
            "iteration complete"
        );
        callback(&record, &model);
        history.push(record);
    }

    let final_misfit = match known_misfit {
        Some(f) => f,
        None => objective.evaluate(&model, false)?.misfit,
    };
    info!(final_misfit, ?stop, "inversion finished");

    Ok(InversionResult {
        model,
        history,
        final_misfit,
        stop,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `0.5 * ||m - m_target||^2` scaled so misfits are O(1).
    struct Quadratic {
        target: Array2<f64>,
        scale: f64,
    }

    impl Objective for Quadratic {
        fn evaluate(&self, model: &VelocityModel, with_gradient: bool) -> Result<Evaluation> {
            let diff = (model.squared_slowness() - &self.target) * self.scale;
            let misfit = 0.5 * diff.iter().map(|d| d * d).sum::<f64>();
            Ok(Evaluation {
                misfit,
                gradient: with_gradient.then(|| diff * self.scale),
            })
        }
    }

    fn model(v: f64) -> VelocityModel {
        VelocityModel::new([5, 4], [1.0, 1.0], vec![v; 20]).unwrap()
    }

    fn quadratic(v: f64) -> Quadratic {
        Quadratic {
            target: model(v).squared_slowness(),
            scale: 10.0,
        }
    }

    #[test]
    fn bounds_validation() {
        assert!(Bounds::new(1.5, 4.5).is_ok());
        assert!(Bounds::new(4.5, 1.5).is_err());
        assert!(Bounds::new(0.0, 1.5).is_err());
    }

    #[test]
    fn bounds_projection_counts_clipped() {
        let b = Bounds::new(1.0, 2.0).unwrap();
        let mut m = Array2::from_shape_vec((1, 3), vec![0.1, 0.5, 2.0]).unwrap();
        assert_eq!(b.project(&mut m), 2);
        assert!((m[[0, 0]] - 0.25).abs() < 1e-12);
        assert!((m[[0, 1]] - 0.5).abs() < 1e-12);
        assert!((m[[0, 2]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn gradient_descent_moves_towards_target() {
        let objective = quadratic(2.0);
        let mut m = model(2.5);
        let before = objective.evaluate(&m, true).unwrap();
        let mut gd = GradientDescent { step: 0.05 };
        let outcome = gd.step(&objective, &mut m, &before, None).unwrap();
        assert!(outcome.accepted);
        let after = objective.evaluate(&m, false).unwrap();
        assert!(after.misfit < before.misfit);
        assert!(m.velocity()[[0, 0]] < 2.5);
    }

    #[test]
    fn backtracking_rejects_bad_parameters() {
        assert!(BacktrackingLineSearch::new(0.1, 1.5, 1e-4, 10).is_err());
        assert!(BacktrackingLineSearch::new(-0.1, 0.5, 1e-4, 10).is_err());
        assert!(BacktrackingLineSearch::new(0.1, 0.5, 1e-4, 0).is_err());
    }

    #[test]
    fn backtracking_shrinks_oversized_step() {
        let objective = quadratic(2.0);
        let mut m = model(2.05);
        let current = objective.evaluate(&m, true).unwrap();
        // full step would overshoot the target by far
        let mut ls = BacktrackingLineSearch::new(1.0, 0.5, 1e-4, 30).unwrap();
        let outcome = ls.step(&objective, &mut m, &current, None).unwrap();
        assert!(outcome.accepted);
        assert!(outcome.evaluations > 1);
        assert!(outcome.step < 1.0);
        assert!(outcome.misfit.unwrap() < current.misfit);
    }

    /// Quadratic misfit that refuses models faster than `vmax`, like a
    /// propagator with a fixed time step.
    struct SpeedLimited {
        inner: Quadratic,
        vmax: f64,
    }

    impl Objective for SpeedLimited {
        fn evaluate(&self, model: &VelocityModel, with_gradient: bool) -> Result<Evaluation> {
            let fastest = model.velocity().iter().fold(0.0_f64, |a, &v| a.max(v));
            if fastest > self.vmax {
                return Err(FwiError::UnstableTimeStep {
                    dt: 1.0,
                    critical: self.vmax / fastest,
                });
            }
            self.inner.evaluate(model, with_gradient)
        }
    }

    #[test]
    fn backtracking_skips_non_positive_squared_slowness() {
        // the first trial takes m to zero, up to round-off
        let objective = quadratic(2.0);
        let mut m = model(1.95);
        let current = objective.evaluate(&m, true).unwrap();
        let mut ls = BacktrackingLineSearch::new(1.0, 0.5, 1e-4, 30).unwrap();
        let outcome = ls.step(&objective, &mut m, &current, None).unwrap();
        assert!(outcome.accepted);
        assert!(outcome.step < 1.0);
        assert!(outcome.misfit.unwrap() < current.misfit);
        assert!(m.velocity()[[0, 0]] > 1.95);
    }

    #[test]
    fn backtracking_skips_unstable_trials() {
        let objective = SpeedLimited {
            inner: quadratic(2.0),
            vmax: 2.0,
        };
        let mut m = model(1.9);
        let current = objective.evaluate(&m, true).unwrap();
        let mut ls = BacktrackingLineSearch::new(0.5, 0.5, 1e-4, 30).unwrap();
        let outcome = ls.step(&objective, &mut m, &current, None).unwrap();
        assert!(outcome.accepted);
        assert!(outcome.step < 0.5);
        assert!(outcome.misfit.unwrap() < current.misfit);
        assert!(m.velocity()[[0, 0]] <= 2.0);
    }

    #[test]
    fn backtracking_gives_up_when_every_trial_is_infeasible() {
        let objective = SpeedLimited {
            inner: quadratic(2.0),
            vmax: 1.9,
        };
        let mut m = model(1.9);
        let current = objective.inner.evaluate(&m, true).unwrap();
        let mut ls = BacktrackingLineSearch::new(0.5, 0.5, 1e-4, 3).unwrap();
        let outcome = ls.step(&objective, &mut m, &current, None).unwrap();
        assert!(!outcome.accepted);
        assert_eq!(outcome.misfit, None);
        assert_eq!(m.velocity()[[0, 0]], 1.9);
    }

    #[test]
    fn gradient_descent_still_errors_on_infeasible_step() {
        let objective = quadratic(2.0);
        let mut m = model(1.95);
        let current = objective.evaluate(&m, true).unwrap();
        let mut gd = GradientDescent { step: 1.5 };
        let err = gd.step(&objective, &mut m, &current, None).unwrap_err();
        assert!(matches!(err, FwiError::InvalidSquaredSlowness { .. }));
    }

    #[test]
    fn invert_converges_on_quadratic() {
        let objective = quadratic(2.0);
        let mut ls = BacktrackingLineSearch::new(0.5, 0.5, 1e-4, 30).unwrap();
        let options = InversionOptions {
            iterations: 50,
            bounds: Some(Bounds::new(1.0, 4.0).unwrap()),
            tolerance: 1e-12,
        };
        let mut seen = 0;
        let result = invert(&objective, model(2.6), &mut ls, &options, |_, _| seen += 1).unwrap();
        assert_eq!(seen, result.history.len());
        assert!(result.final_misfit < 1e-6, "misfit {}", result.final_misfit);
        assert!((result.model.velocity()[[2, 2]] - 2.0).abs() < 1e-3);
        for pair in result.history.windows(2) {
            assert!(pair[1].misfit < pair[0].misfit);
        }
    }

    #[test]
    fn invert_stops_on_zero_gradient() {
        let objective = quadratic(2.0);
        let mut gd = GradientDescent { step: 0.1 };
        let options = InversionOptions {
            iterations: 5,
            ..Default::default()
        };
        let result = invert(&objective, model(2.0), &mut gd, &options, |_, _| {}).unwrap();
        assert_eq!(result.stop, StopReason::ZeroGradient);
        assert!(result.history.is_empty());
        assert_eq!(result.final_misfit, 0.0);
    }

    #[test]
    fn gradient_descent_respects_bounds() {
        let objective = quadratic(1.0);
        let mut m = model(1.6);
        let current = objective.evaluate(&m, true).unwrap();
        let mut gd = GradientDescent { step: 0.9 };
        let bounds = Bounds::new(1.5, 3.0).unwrap();
        let outcome = gd.step(&objective, &mut m, &current, Some(&bounds)).unwrap();
        assert_eq!(outcome.clipped, 20);
        assert!(m.velocity().iter().all(|&v| (v - 1.5).abs() < 1e-12));
    }
}
