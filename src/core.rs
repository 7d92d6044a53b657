// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use ndarray::{Array2, Axis};

use crate::error::{FwiError, Result};

/// Finite-difference orders accepted for the spatial Laplacian.
pub const SUPPORTED_SPACE_ORDERS: [usize; 3] = [2, 4, 8];

/// Default absorbing layer width in grid points.
pub const DEFAULT_NBL: usize = 40;

/// Default spatial finite-difference order.
pub const DEFAULT_SPACE_ORDER: usize = 4;

/// Target reflection coefficient of the absorbing layer.
const DAMPING_REFLECTION: f64 = 1e-3;

/// Courant number used for the 2D critical time step.
const CFL_COEFF_2D: f64 = 0.42;

/// A 2D acoustic velocity model on a regular Cartesian grid.
///
/// Axis 0 is horizontal distance `x`, axis 1 is depth `z`. Values are stored
/// x-major, so `velocity()[[i, j]]` is the velocity at `x = ox + i*dx`,
/// `z = oz + j*dz`. The model is surrounded by an absorbing layer of `nbl`
/// points on every side when it is propagated through; the layer is never
/// part of the physical model and is created on demand by [`pad`].
///
/// [`pad`]: VelocityModel::pad
#[derive(Debug, Clone)]
pub struct VelocityModel {
    shape: [usize; 2],
    spacing: [f64; 2],
    origin: [f64; 2],
    vp: Array2<f64>,
    nbl: usize,
    space_order: usize,
}

fn validate_velocity(values: &[f64]) -> Result<()> {
    for (index, &value) in values.iter().enumerate() {
        if !value.is_finite() || value <= 0.0 {
            return Err(FwiError::InvalidVelocity { index, value });
        }
    }
    Ok(())
}

impl VelocityModel {
    /// Create a new velocity model with the given shape, spacing and values.
    ///
    /// # Parameters
    /// - `shape`: Number of nodes along x and z (each must be >= 3)
    /// - `spacing`: Grid spacing along x and z in metres (positive and finite)
    /// - `velocity`: Velocities in km/s, x-major order (positive and finite)
    ///
    /// # Errors
    /// Returns an error if any parameter is invalid or if the velocity vector
    /// length does not match the product of the shape dimensions.
    pub fn new(shape: [usize; 2], spacing: [f64; 2], velocity: Vec<f64>) -> Result<Self> {
        for &h in &spacing {
            if !h.is_finite() || h <= 0.0 {
                return Err(FwiError::InvalidGridSpacing(h));
            }
        }

        for (axis, &size) in shape.iter().enumerate() {
            if size < 3 {
                return Err(FwiError::InvalidGridShape { axis, size });
            }
        }

        let num_nodes = shape[0] * shape[1];
        if velocity.len() != num_nodes {
            return Err(FwiError::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![velocity.len()],
            });
        }

        validate_velocity(&velocity)?;

        let vp = Array2::from_shape_vec((shape[0], shape[1]), velocity)
            .map_err(|e| FwiError::Other(format!("shape error: {}", e)))?;

        Ok(VelocityModel {
            shape,
            spacing,
            origin: [0.0, 0.0],
            vp,
            nbl: DEFAULT_NBL,
            space_order: DEFAULT_SPACE_ORDER,
        })
    }

    /// Create a model from an existing 2D velocity array.
    pub fn from_array(spacing: [f64; 2], velocity: Array2<f64>) -> Result<Self> {
        let (nx, nz) = velocity.dim();
        let values = velocity.as_standard_layout().to_owned().into_raw_vec();
        Self::new([nx, nz], spacing, values)
    }

    /// Set the physical coordinates of node `[0, 0]` (builder method).
    pub fn with_origin(mut self, origin: [f64; 2]) -> Self {
        self.origin = origin;
        self
    }

    /// Set the absorbing layer width in grid points (builder method).
    pub fn with_nbl(mut self, nbl: usize) -> Self {
        self.nbl = nbl;
        self
    }

    /// Set the spatial finite-difference order (builder method).
    ///
    /// # Errors
    /// Returns an error if the order is not 2, 4 or 8.
    pub fn with_space_order(mut self, space_order: usize) -> Result<Self> {
        if !SUPPORTED_SPACE_ORDERS.contains(&space_order) {
            return Err(FwiError::InvalidSpaceOrder(space_order));
        }
        self.space_order = space_order;
        Ok(self)
    }

    /// Number of physical nodes along x and z.
    pub fn shape(&self) -> [usize; 2] {
        self.shape
    }

    /// Grid spacing along x and z.
    pub fn spacing(&self) -> [f64; 2] {
        self.spacing
    }

    /// Coordinates of node `[0, 0]`.
    pub fn origin(&self) -> [f64; 2] {
        self.origin
    }

    /// Physical size of the model along x and z.
    pub fn extent(&self) -> [f64; 2] {
        [
            (self.shape[0] - 1) as f64 * self.spacing[0],
            (self.shape[1] - 1) as f64 * self.spacing[1],
        ]
    }

    /// Absorbing layer width in grid points.
    pub fn nbl(&self) -> usize {
        self.nbl
    }

    /// Spatial finite-difference order.
    pub fn space_order(&self) -> usize {
        self.space_order
    }

    /// Velocity field in km/s.
    pub fn velocity(&self) -> &Array2<f64> {
        &self.vp
    }

    /// Replace the velocity field.
    ///
    /// # Errors
    /// Returns an error on a shape mismatch or a non-positive velocity.
    pub fn set_velocity(&mut self, velocity: Array2<f64>) -> Result<()> {
        if velocity.dim() != (self.shape[0], self.shape[1]) {
            return Err(FwiError::ShapeMismatch {
                expected: self.shape.to_vec(),
                got: velocity.shape().to_vec(),
            });
        }
        let standard = velocity.as_standard_layout();
        if let Some(values) = standard.as_slice() {
            validate_velocity(values)?;
        }
        self.vp = velocity;
        Ok(())
    }

    /// Squared slowness `m = 1/v^2`, the parameter the wave equation is
    /// linear in and the one gradients are taken with respect to.
    pub fn squared_slowness(&self) -> Array2<f64> {
        self.vp.mapv(|v| 1.0 / (v * v))
    }

    /// Replace the velocity field from a squared slowness field.
    ///
    /// # Errors
    /// Returns an error on a shape mismatch or a non-positive value.
    pub fn set_squared_slowness(&mut self, m: &Array2<f64>) -> Result<()> {
        if m.dim() != (self.shape[0], self.shape[1]) {
            return Err(FwiError::ShapeMismatch {
                expected: self.shape.to_vec(),
                got: m.shape().to_vec(),
            });
        }
        for (index, &value) in m.iter().enumerate() {
            if !value.is_finite() || value <= 0.0 {
                return Err(FwiError::InvalidSquaredSlowness { index, value });
            }
        }
        self.vp = m.mapv(|v| 1.0 / v.sqrt());
        Ok(())
    }

    /// Largest stable time step (ms) for the leapfrog scheme, rounded to
    /// four significant digits (`d.ddde-x`).
    pub fn critical_dt(&self) -> f64 {
        let h_min = self.spacing[0].min(self.spacing[1]);
        let v_max = self.vp.iter().cloned().fold(f64::MIN, f64::max);
        let dt = CFL_COEFF_2D * h_min / v_max;
        format!("{:.3e}", dt).parse().unwrap_or(dt)
    }

    /// Shape of the grid including the absorbing layer.
    pub fn padded_shape(&self) -> [usize; 2] {
        [self.shape[0] + 2 * self.nbl, self.shape[1] + 2 * self.nbl]
    }

    /// Extend a physical field into the absorbing layer by replicating the
    /// edge values.
    pub fn pad(&self, field: &Array2<f64>) -> Array2<f64> {
        let [px, pz] = self.padded_shape();
        let (nx, nz) = (self.shape[0], self.shape[1]);
        let nbl = self.nbl;
        Array2::from_shape_fn((px, pz), |(i, j)| {
            let si = i.saturating_sub(nbl).min(nx - 1);
            let sj = j.saturating_sub(nbl).min(nz - 1);
            field[[si, sj]]
        })
    }

    /// Adjoint of [`pad`](VelocityModel::pad): sums every layer value onto
    /// the edge node it was replicated from.
    pub fn fold_padding(&self, padded: &Array2<f64>) -> Array2<f64> {
        let (nx, nz) = (self.shape[0], self.shape[1]);
        let nbl = self.nbl;
        let mut out = Array2::zeros((nx, nz));
        for ((i, j), &value) in padded.indexed_iter() {
            let si = i.saturating_sub(nbl).min(nx - 1);
            let sj = j.saturating_sub(nbl).min(nz - 1);
            out[[si, sj]] += value;
        }
        out
    }

    /// Damping profile over the padded grid. Zero in the physical domain,
    /// rising smoothly towards the outer edge of the absorbing layer.
    pub fn damping(&self) -> Array2<f64> {
        let padded = self.padded_shape();
        let mut damp = Array2::zeros((padded[0], padded[1]));
        if self.nbl == 0 {
            return damp;
        }
        let nbl = self.nbl as f64;
        let coeff = 1.5 * (1.0 / DAMPING_REFLECTION).ln() / nbl;
        let two_pi = 2.0 * std::f64::consts::PI;

        for axis in 0..2 {
            let n = padded[axis];
            for layer in 0..self.nbl {
                let pos = ((nbl - layer as f64 + 1.0) / nbl).abs();
                let val = coeff * (pos - (two_pi * pos).sin() / two_pi) / self.spacing[axis];
                for idx in [layer, n - 1 - layer] {
                    damp.index_axis_mut(Axis(axis), idx)
                        .mapv_inplace(|d| d + val);
                }
            }
        }
        damp
    }

    /// Map physical coordinates to fractional indices on the padded grid.
    ///
    /// # Errors
    /// Returns an error if the point lies outside the physical model.
    pub fn physical_to_grid(&self, coord: [f64; 2]) -> Result<[f64; 2]> {
        let extent = self.extent();
        let mut idx = [0.0; 2];
        for d in 0..2 {
            let local = coord[d] - self.origin[d];
            let tol = 1e-9 * self.spacing[d];
            if !local.is_finite() || local < -tol || local > extent[d] + tol {
                return Err(FwiError::InvalidPosition {
                    coord,
                    reason: format!(
                        "coordinate {} on axis {} is outside [{}, {}]",
                        coord[d],
                        d,
                        self.origin[d],
                        self.origin[d] + extent[d]
                    ),
                });
            }
            idx[d] = self.nbl as f64 + local.clamp(0.0, extent[d]) / self.spacing[d];
        }
        Ok(idx)
    }

    /// Return a copy of this model smoothed by a separable Gaussian filter
    /// with standard deviation `sigma` in grid points. Used to derive a
    /// starting model for inversion from a reference model.
    pub fn smoothed(&self, sigma: f64) -> VelocityModel {
        if !sigma.is_finite() || sigma <= 0.0 {
            return self.clone();
        }
        let radius = (4.0 * sigma).ceil() as isize;
        let kernel: Vec<f64> = (-radius..=radius)
            .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
            .collect();
        let norm: f64 = kernel.iter().sum();
        let kernel: Vec<f64> = kernel.into_iter().map(|w| w / norm).collect();

        let mut field = self.vp.clone();
        for axis in 0..2 {
            let n = self.shape[axis] as isize;
            let source = field.clone();
            for ((i, j), out) in field.indexed_iter_mut() {
                let mut acc = 0.0;
                for (k, &w) in kernel.iter().enumerate() {
                    let offset = k as isize - radius;
                    let (si, sj) = if axis == 0 {
                        (reflect(i as isize + offset, n), j)
                    } else {
                        (i, reflect(j as isize + offset, n))
                    };
                    acc += w * source[[si, sj]];
                }
                *out = acc;
            }
        }

        VelocityModel {
            vp: field,
            ..self.clone()
        }
    }
}

/// Mirror an index into `[0, n)` (half-sample symmetric boundary).
fn reflect(mut idx: isize, n: isize) -> usize {
    loop {
        if idx < 0 {
            idx = -idx - 1;
        } else if idx >= n {
            idx = 2 * n - idx - 1;
        } else {
            return idx as usize;
        }
    }
}
