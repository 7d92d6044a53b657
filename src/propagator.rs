// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use ndarray::Array2;
use tracing::debug;

use crate::core::VelocityModel;
use crate::error::{FwiError, Result};
use crate::geometry::{PointInterpolation, Shot, TimeAxis};
use crate::stencil::WaveOperator;

/// Output of a forward simulation.
pub struct ForwardResult {
    /// Synthetic receiver data, shape `[nt, nrec]`.
    pub data: Array2<f64>,
    /// Pressure field on the padded grid at every time sample, if requested.
    pub wavefield: Option<Vec<Array2<f64>>>,
}

/// Forward and adjoint solver for the 2D constant-density acoustic wave
/// equation on one velocity model and time axis.
///
/// The forward recursion is
///
/// `(m + eta) u[n+1] = (dt^2 L + 2m) u[n] - (m - eta) u[n-1] + dt^2 P' s[n]`
///
/// with `u[0] = u[-1] = 0`. [`adjoint`](Propagator::adjoint) runs the
/// transposed recursion backwards in time, so the returned gradient is the
/// exact derivative of the discrete misfit, not a discretisation of the
/// continuous adjoint equation.
pub struct Propagator {
    model: VelocityModel,
    time: TimeAxis,
    m: Array2<f64>,
    damp: Array2<f64>,
}

impl Propagator {
    /// Prepare a solver for `model` sampled on `time`.
    ///
    /// # Errors
    /// Returns an error if the time step exceeds the stability limit.
    pub fn new(model: &VelocityModel, time: TimeAxis) -> Result<Self> {
        let critical = model.critical_dt();
        if time.step() > critical {
            return Err(FwiError::UnstableTimeStep {
                dt: time.step(),
                critical,
            });
        }
        Ok(Propagator {
            m: model.pad(&model.squared_slowness()),
            damp: model.damping(),
            model: model.clone(),
            time,
        })
    }

    /// The model being propagated through.
    pub fn model(&self) -> &VelocityModel {
        &self.model
    }

    /// The simulation time axis.
    pub fn time_axis(&self) -> &TimeAxis {
        &self.time
    }

    fn operator(&self) -> Result<WaveOperator> {
        WaveOperator::new(
            &self.m,
            &self.damp,
            self.model.spacing(),
            self.model.space_order(),
            self.time.step(),
        )
    }

    fn interpolators(&self, points: &[[f64; 2]]) -> Result<Vec<PointInterpolation>> {
        points
            .iter()
            .map(|&p| PointInterpolation::new(&self.model, p))
            .collect()
    }

    /// Simulate one shot and record it at the shot's receivers.
    ///
    /// # Parameters
    /// - `shot`: source and receiver positions
    /// - `wavelet`: source time function, one value per time sample
    /// - `save_wavefield`: keep the full wavefield history for [`adjoint`]
    ///
    /// # Errors
    /// Returns an error if a position lies outside the model or the wavelet
    /// length does not match the time axis.
    ///
    /// [`adjoint`]: Propagator::adjoint
    pub fn forward(
        &self,
        shot: &Shot,
        wavelet: &[f64],
        save_wavefield: bool,
    ) -> Result<ForwardResult> {
        let nt = self.time.num();
        if wavelet.len() != nt {
            return Err(FwiError::ShapeMismatch {
                expected: vec![nt],
                got: vec![wavelet.len()],
            });
        }
        let source = PointInterpolation::new(&self.model, shot.source)?;
        let receivers = self.interpolators(&shot.receivers)?;
        debug!(
            x = shot.source[0],
            z = shot.source[1],
            receivers = receivers.len(),
            nt,
            "forward modelling"
        );

        let mut op = self.operator()?;
        let dt2 = op.dt2();
        let mut prev = Array2::zeros(self.m.raw_dim());
        let mut cur = Array2::zeros(self.m.raw_dim());
        let mut next = Array2::zeros(self.m.raw_dim());

        let mut data = Array2::zeros((nt, receivers.len()));
        let mut history = if save_wavefield {
            Some(Vec::with_capacity(nt))
        } else {
            None
        };

        for n in 0..nt {
            for (r, rec) in receivers.iter().enumerate() {
                data[[n, r]] = rec.sample(&cur);
            }
            if let Some(h) = history.as_mut() {
                h.push(cur.clone());
            }
            if n + 1 == nt {
                break;
            }

            op.rhs(&prev, &cur, &mut next);
            source.inject(&mut next, dt2 * wavelet[n]);
            op.finish(&mut next);

            std::mem::swap(&mut prev, &mut cur);
            std::mem::swap(&mut cur, &mut next);
        }

        Ok(ForwardResult {
            data,
            wavefield: history,
        })
    }

    /// Gradient of `0.5 * sum(residual^2)` with respect to squared slowness
    /// on the padded grid.
    ///
    /// # Parameters
    /// - `shot`: the shot whose receivers recorded `residual`
    /// - `residual`: synthetic minus observed data, shape `[nt, nrec]`
    /// - `wavefield`: forward wavefield history from [`forward`]
    ///
    /// # Errors
    /// Returns an error on shape mismatches or invalid receiver positions.
    ///
    /// [`forward`]: Propagator::forward
    pub fn adjoint(
        &self,
        shot: &Shot,
        residual: &Array2<f64>,
        wavefield: &[Array2<f64>],
    ) -> Result<Array2<f64>> {
        let nt = self.time.num();
        let receivers = self.interpolators(&shot.receivers)?;
        if residual.dim() != (nt, receivers.len()) {
            return Err(FwiError::ShapeMismatch {
                expected: vec![nt, receivers.len()],
                got: residual.shape().to_vec(),
            });
        }
        if wavefield.len() != nt {
            return Err(FwiError::ShapeMismatch {
                expected: vec![nt],
                got: vec![wavefield.len()],
            });
        }

        let mut op = self.operator()?;
        let mut later = Array2::zeros(self.m.raw_dim());
        let mut cur = Array2::zeros(self.m.raw_dim());
        let mut next = Array2::zeros(self.m.raw_dim());
        let mut grad = Array2::zeros(self.m.raw_dim());

        for k in (1..nt).rev() {
            // `next` becomes lambda[k] from lambda[k+1] (cur) and lambda[k+2] (later)
            op.rhs(&later, &cur, &mut next);
            for (r, rec) in receivers.iter().enumerate() {
                rec.inject(&mut next, -residual[[k, r]]);
            }
            op.finish(&mut next);

            let u_k = &wavefield[k];
            let u_k1 = &wavefield[k - 1];
            if k >= 2 {
                let u_k2 = &wavefield[k - 2];
                ndarray::Zip::from(&mut grad)
                    .and(&next)
                    .and(u_k)
                    .and(u_k1)
                    .and(u_k2)
                    .for_each(|g, &lam, &a, &b, &c| *g += lam * (a - 2.0 * b + c));
            } else {
                ndarray::Zip::from(&mut grad)
                    .and(&next)
                    .and(u_k)
                    .and(u_k1)
                    .for_each(|g, &lam, &a, &b| *g += lam * (a - 2.0 * b));
            }

            std::mem::swap(&mut later, &mut cur);
            std::mem::swap(&mut cur, &mut next);
        }

        Ok(grad)
    }
}
