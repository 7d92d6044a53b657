// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use ndarray::Array2;

use crate::error::{FwiError, Result};

/// Central finite-difference weights for the second derivative, centre
/// weight first. Only the non-negative offsets are stored; the stencil is
/// symmetric.
pub fn second_derivative_weights(order: usize) -> Result<&'static [f64]> {
    const O2: [f64; 2] = [-2.0, 1.0];
    const O4: [f64; 3] = [-5.0 / 2.0, 4.0 / 3.0, -1.0 / 12.0];
    const O8: [f64; 5] = [
        -205.0 / 72.0,
        8.0 / 5.0,
        -1.0 / 5.0,
        8.0 / 315.0,
        -1.0 / 560.0,
    ];
    match order {
        2 => Ok(&O2),
        4 => Ok(&O4),
        8 => Ok(&O8),
        _ => Err(FwiError::InvalidSpaceOrder(order)),
    }
}

/// Apply the 2D Laplacian to the row-major field `us` of the given shape,
/// writing into `os`.
///
/// Values outside the grid are taken as zero, which keeps the discrete
/// operator symmetric. Interior nodes take a branch-free path.
pub fn laplacian(us: &[f64], os: &mut [f64], shape: [usize; 2], weights: &[f64], inv_h2: [f64; 2]) {
    let [nx, nz] = shape;
    let r = weights.len() - 1;
    let centre = weights[0] * (inv_h2[0] + inv_h2[1]);

    for i in 0..nx {
        let row = i * nz;
        let x_interior = i >= r && i + r < nx;
        for j in 0..nz {
            let idx = row + j;
            let mut acc = centre * us[idx];
            if x_interior && j >= r && j + r < nz {
                for (k, &w) in weights.iter().enumerate().skip(1) {
                    acc += w
                        * (inv_h2[0] * (us[idx + k * nz] + us[idx - k * nz])
                            + inv_h2[1] * (us[idx + k] + us[idx - k]));
                }
            } else {
                for (k, &w) in weights.iter().enumerate().skip(1) {
                    let mut sx = 0.0;
                    if i + k < nx {
                        sx += us[idx + k * nz];
                    }
                    if i >= k {
                        sx += us[idx - k * nz];
                    }
                    let mut sz = 0.0;
                    if j + k < nz {
                        sz += us[idx + k];
                    }
                    if j >= k {
                        sz += us[idx - k];
                    }
                    acc += w * (inv_h2[0] * sx + inv_h2[1] * sz);
                }
            }
            os[idx] = acc;
        }
    }
}

/// Leapfrog update of the damped acoustic wave equation
///
/// `m (u+ - 2u + u-) / dt^2 + damp (u+ - u-) / (2 dt) = lap(u) + q`
///
/// split into two halves so sources can be added between them:
/// [`rhs`](WaveOperator::rhs) builds `dt^2 lap(u) + 2 m u - (m - eta) u-`,
/// the caller injects `dt^2 q`, and [`finish`](WaveOperator::finish)
/// divides by `m + eta`, with `eta = damp dt / 2`.
///
/// The same pair run backwards in time is the exact adjoint of the forward
/// recursion, so the adjoint solver reuses it unchanged.
pub struct WaveOperator {
    weights: &'static [f64],
    inv_h2: [f64; 2],
    dt2: f64,
    two_m: Array2<f64>,
    m_minus_eta: Array2<f64>,
    inv_m_plus_eta: Array2<f64>,
    lap: Array2<f64>,
}

impl WaveOperator {
    /// Build the operator for a padded squared-slowness field `m`.
    ///
    /// # Errors
    /// Returns an error for an unsupported order or mismatched array shapes.
    pub fn new(
        m: &Array2<f64>,
        damp: &Array2<f64>,
        spacing: [f64; 2],
        space_order: usize,
        dt: f64,
    ) -> Result<Self> {
        if m.dim() != damp.dim() {
            return Err(FwiError::ShapeMismatch {
                expected: m.shape().to_vec(),
                got: damp.shape().to_vec(),
            });
        }
        let weights = second_derivative_weights(space_order)?;
        let eta = damp.mapv(|d| 0.5 * d * dt);
        Ok(WaveOperator {
            weights,
            inv_h2: [
                1.0 / (spacing[0] * spacing[0]),
                1.0 / (spacing[1] * spacing[1]),
            ],
            dt2: dt * dt,
            two_m: m.mapv(|v| 2.0 * v),
            m_minus_eta: m - &eta,
            inv_m_plus_eta: (m + &eta).mapv(|v| 1.0 / v),
            lap: Array2::zeros(m.raw_dim()),
        })
    }

    /// Squared time step.
    pub fn dt2(&self) -> f64 {
        self.dt2
    }

    /// Write `dt^2 lap(u) + 2 m u - (m - eta) u_prev` into `out`.
    pub fn rhs(&mut self, u_prev: &Array2<f64>, u: &Array2<f64>, out: &mut Array2<f64>) {
        let (nx, nz) = u.dim();
        let u_std = u.as_standard_layout();
        if let (Some(us), Some(ls)) = (u_std.as_slice(), self.lap.as_slice_mut()) {
            laplacian(us, ls, [nx, nz], self.weights, self.inv_h2);
        }
        let dt2 = self.dt2;
        ndarray::Zip::from(out)
            .and(&self.lap)
            .and(&self.two_m)
            .and(u)
            .and(&self.m_minus_eta)
            .and(u_prev)
            .for_each(|o, &l, &tm, &uc, &b, &up| {
                *o = dt2 * l + tm * uc - b * up;
            });
    }

    /// Divide `out` by `m + eta` in place.
    pub fn finish(&self, out: &mut Array2<f64>) {
        *out *= &self.inv_m_plus_eta;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_annihilate_constants() {
        for order in [2, 4, 8] {
            let w = second_derivative_weights(order).unwrap();
            let sum: f64 = w[0] + 2.0 * w[1..].iter().sum::<f64>();
            assert!(sum.abs() < 1e-12, "order {} sums to {}", order, sum);
        }
        assert!(second_derivative_weights(3).is_err());
    }

    #[test]
    fn laplacian_exact_for_quadratic() {
        let (nx, nz) = (20, 16);
        let h = [2.0, 0.5];
        let u = Array2::from_shape_fn((nx, nz), |(i, j)| {
            let x = i as f64 * h[0];
            let z = j as f64 * h[1];
            x * x + 3.0 * z * z
        });
        for order in [2, 4, 8] {
            let w = second_derivative_weights(order).unwrap();
            let mut out = Array2::zeros((nx, nz));
            laplacian(
                u.as_slice().unwrap(),
                out.as_slice_mut().unwrap(),
                [nx, nz],
                w,
                [1.0 / (h[0] * h[0]), 1.0 / (h[1] * h[1])],
            );
            let r = w.len() - 1;
            for i in r..nx - r {
                for j in r..nz - r {
                    assert!(
                        (out[[i, j]] - 8.0).abs() < 1e-8,
                        "order {} at ({}, {}): {}",
                        order,
                        i,
                        j,
                        out[[i, j]]
                    );
                }
            }
        }
    }

    #[test]
    fn laplacian_is_symmetric() {
        let (nx, nz) = (9, 11);
        let u = Array2::from_shape_fn((nx, nz), |(i, j)| ((i * 3 + j * 7) % 5) as f64 - 2.0);
        let v = Array2::from_shape_fn((nx, nz), |(i, j)| ((i * 2 + j * 5) % 7) as f64 * 0.3);
        let w = second_derivative_weights(8).unwrap();
        let inv = [0.25, 1.0];
        let mut lu = Array2::zeros((nx, nz));
        let mut lv = Array2::zeros((nx, nz));
        let shape = [nx, nz];
        laplacian(u.as_slice().unwrap(), lu.as_slice_mut().unwrap(), shape, w, inv);
        laplacian(v.as_slice().unwrap(), lv.as_slice_mut().unwrap(), shape, w, inv);
        let a = (&lu * &v).sum();
        let b = (&u * &lv).sum();
        assert!((a - b).abs() < 1e-9, "{} vs {}", a, b);
    }

    #[test]
    fn operator_keeps_zero_field_at_rest() {
        let m = Array2::from_elem((8, 8), 0.4);
        let damp = Array2::zeros((8, 8));
        let mut op = WaveOperator::new(&m, &damp, [1.0, 1.0], 4, 0.1).unwrap();
        let zero = Array2::zeros((8, 8));
        let mut out = Array2::from_elem((8, 8), 7.0);
        op.rhs(&zero, &zero, &mut out);
        op.finish(&mut out);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn operator_rejects_shape_mismatch() {
        let m = Array2::from_elem((8, 8), 0.4);
        let damp = Array2::zeros((8, 7));
        assert!(matches!(
            WaveOperator::new(&m, &damp, [1.0, 1.0], 4, 0.1),
            Err(FwiError::ShapeMismatch { .. })
        ));
    }
}
