// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Synthetic velocity fields described by short preset strings.
//!
//! | preset                        | field                                   |
//! |-------------------------------|-----------------------------------------|
//! | `uniform:<v>`                 | constant velocity                       |
//! | `gradient:<v0>,<g>`           | `v0 + g * z`, `g` in km/s per metre     |
//! | `layers:<v1>,<v2>,...`        | equal-thickness horizontal layers       |
//! | `circle:<vbg>,<vc>,<radius>`  | disc of `vc` centred in a `vbg` medium  |
//! | `file:<path>`                 | `.npy` or `.mat` array                  |
//!
//! Axis 0 is x and axis 1 is depth z throughout.

use std::path::Path;

use ndarray::Array2;

use crate::error::{FwiError, Result};

fn bad(msg: String) -> FwiError {
    FwiError::Config(msg)
}

fn parse_values(preset: &str, params: &str, count: Option<usize>) -> Result<Vec<f64>> {
    let values = params
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| bad(format!("preset '{}': {}", preset, e)))?;
    if let Some(n) = count {
        if values.len() != n {
            return Err(bad(format!(
                "preset '{}' expects {} values, got {}",
                preset,
                n,
                values.len()
            )));
        }
    }
    Ok(values)
}

fn check_speed(preset: &str, v: f64) -> Result<()> {
    if !v.is_finite() || v <= 0.0 {
        return Err(bad(format!(
            "preset '{}': velocity {} must be positive and finite",
            preset, v
        )));
    }
    Ok(())
}

/// Build the velocity field (km/s) named by `preset` on a grid of `shape`
/// nodes with `spacing` metres between them.
///
/// # Errors
/// Returns [`FwiError::Config`] for an unknown or malformed preset, or any
/// velocity that is not positive and finite. `file:` presets additionally
/// report I/O and shape errors.
pub fn build_velocity(preset: &str, shape: [usize; 2], spacing: [f64; 2]) -> Result<Array2<f64>> {
    let (nx, nz) = (shape[0], shape[1]);

    if let Some(path) = preset.strip_prefix("file:") {
        return crate::io::load_velocity(Path::new(path.trim()), shape);
    }

    if let Some(params) = preset.strip_prefix("uniform:") {
        let v = parse_values(preset, params, Some(1))?[0];
        check_speed(preset, v)?;
        return Ok(Array2::from_elem((nx, nz), v));
    }

    if let Some(params) = preset.strip_prefix("gradient:") {
        let p = parse_values(preset, params, Some(2))?;
        let (v0, g) = (p[0], p[1]);
        let z_max = (nz - 1) as f64 * spacing[1];
        check_speed(preset, v0)?;
        check_speed(preset, v0 + g * z_max)?;
        return Ok(Array2::from_shape_fn((nx, nz), |(_, j)| {
            v0 + g * j as f64 * spacing[1]
        }));
    }

    if let Some(params) = preset.strip_prefix("layers:") {
        let speeds = parse_values(preset, params, None)?;
        for &v in &speeds {
            check_speed(preset, v)?;
        }
        let n = speeds.len();
        return Ok(Array2::from_shape_fn((nx, nz), |(_, j)| {
            speeds[(j * n / nz).min(n - 1)]
        }));
    }

    if let Some(params) = preset.strip_prefix("circle:") {
        let p = parse_values(preset, params, Some(3))?;
        let (vbg, vc, radius) = (p[0], p[1], p[2]);
        check_speed(preset, vbg)?;
        check_speed(preset, vc)?;
        if !radius.is_finite() || radius <= 0.0 {
            return Err(bad(format!(
                "preset '{}': radius must be positive, got {}",
                preset, radius
            )));
        }
        let cx = (nx - 1) as f64 * spacing[0] / 2.0;
        let cz = (nz - 1) as f64 * spacing[1] / 2.0;
        return Ok(Array2::from_shape_fn((nx, nz), |(i, j)| {
            let dx = i as f64 * spacing[0] - cx;
            let dz = j as f64 * spacing[1] - cz;
            if (dx * dx + dz * dz).sqrt() <= radius {
                vc
            } else {
                vbg
            }
        }));
    }

    Err(bad(format!(
        "unknown velocity preset '{}': expected uniform:, gradient:, layers:, circle: or file:",
        preset
    )))
}
