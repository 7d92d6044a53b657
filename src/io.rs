// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::io::Write;
use std::path::Path;

use ndarray::{Array2, ArrayD, Ix2, IxDyn, ShapeBuilder};

use crate::core::VelocityModel;
use crate::data::{ShotGather, Trace};
use crate::error::{FwiError, Result};
use crate::geometry::TimeAxis;

/// Supported file formats for array I/O.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    /// NumPy .npy format.
    Npy,
    /// MATLAB .mat format (Level 5).
    Mat,
    /// JSON trace bundle.
    Json,
}

/// Infer file format from extension.
pub fn infer_format(path: &Path) -> Result<FileFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("npy") => Ok(FileFormat::Npy),
        Some("mat") => Ok(FileFormat::Mat),
        Some("json") => Ok(FileFormat::Json),
        Some(ext) => Err(FwiError::UnsupportedFileFormat(ext.to_string())),
        None => Err(FwiError::UnsupportedFileFormat(
            "(no extension)".to_string(),
        )),
    }
}

fn into_2d(arr: ArrayD<f64>) -> Result<Array2<f64>> {
    let shape = arr.shape().to_vec();
    arr.into_dimensionality::<Ix2>()
        .map_err(|_| FwiError::ShapeMismatch {
            expected: vec![0, 0],
            got: shape,
        })
}

/// Load a 2D array from a .npy file. f32 data is promoted to f64.
pub fn load_npy(path: &Path) -> Result<Array2<f64>> {
    let arr: ArrayD<f64> = match ndarray_npy::read_npy(path) {
        Ok(a) => a,
        Err(_) => {
            let arr32: ArrayD<f32> = ndarray_npy::read_npy(path)
                .map_err(|e| FwiError::UnsupportedDtype(format!("{}", e)))?;
            arr32.mapv(|v| v as f64)
        }
    };
    // Fortran-order files come back with a transposed memory layout
    Ok(into_2d(arr)?.as_standard_layout().to_owned())
}

/// Save a 2D array to a .npy file.
pub fn save_npy(array: &Array2<f64>, path: &Path) -> Result<()> {
    ndarray_npy::write_npy(path, array)
        .map_err(|e| FwiError::Other(format!("npy write error: {}", e)))
}

/// Load a 2D array variable from a .mat file.
///
/// MATLAB stores arrays column-major; the result is returned in row-major
/// order with MATLAB's `(rows, cols)` as `(axis 0, axis 1)`.
pub fn load_mat(path: &Path, variable_name: &str) -> Result<Array2<f64>> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let mat = matfile::MatFile::parse(&mut reader)
        .map_err(|e| FwiError::Other(format!("MAT parse error: {}", e)))?;

    let available: Vec<String> = mat.arrays().iter().map(|a| a.name().to_string()).collect();
    let array = mat
        .find_by_name(variable_name)
        .ok_or_else(|| FwiError::MatVariableNotFound {
            expected: variable_name.to_string(),
            available,
        })?;

    let values: Vec<f64> = match array.data() {
        matfile::NumericData::Double { real, imag: _ } => real.clone(),
        matfile::NumericData::Single { real, imag: _ } => real.iter().map(|&v| v as f64).collect(),
        _ => {
            return Err(FwiError::UnsupportedDtype(
                "MAT file array is not f64 or f32".to_string(),
            ))
        }
    };

    let dims: Vec<usize> = array.size().to_vec();
    let arr = ArrayD::from_shape_vec(IxDyn(&dims).f(), values)
        .map_err(|e| FwiError::Other(format!("shape error: {}", e)))?;
    Ok(into_2d(arr)?.as_standard_layout().to_owned())
}

/// Save a 2D array to a .mat file (Level 5) under `var_name`.
pub fn save_mat(array: &Array2<f64>, path: &Path, var_name: &str) -> Result<()> {
    // MATLAB wants column-major data: the transpose in standard layout
    let col_major: Vec<f64> = array.t().as_standard_layout().iter().cloned().collect();
    let (rows, cols) = array.dim();
    write_mat_level5(path, var_name, &[rows, cols], &col_major)
}

/// Minimal MAT-file Level 5 writer for a single real f64 array.
///
/// The `matfile` crate only reads, so the writer is done by hand: a 128-byte
/// header followed by one uncompressed miMATRIX element holding the array
/// flags, dimensions, name and real data sub-elements, each padded to an
/// 8-byte boundary.
fn write_mat_level5(path: &Path, var_name: &str, dimensions: &[usize], data: &[f64]) -> Result<()> {
    const MI_INT8: u32 = 1;
    const MI_INT32: u32 = 5;
    const MI_UINT32: u32 = 6;
    const MI_DOUBLE: u32 = 9;
    const MI_MATRIX: u32 = 14;
    const MX_DOUBLE_CLASS: u32 = 6;

    let padded = |n: u32| n.div_ceil(8) * 8;

    let file = std::fs::File::create(path)?;
    let mut w = std::io::BufWriter::new(file);

    let desc = b"MATLAB 5.0 MAT-file, created by acoustic-fwi";
    let mut header_text = [b' '; 116];
    header_text[..desc.len()].copy_from_slice(desc);
    w.write_all(&header_text)?;
    w.write_all(&[0u8; 8])?; // subsystem data offset
    w.write_all(&0x0100u16.to_le_bytes())?;
    w.write_all(b"IM")?;

    let dims_size = (dimensions.len() * 4) as u32;
    let name_size = var_name.len() as u32;
    let real_size = (data.len() * 8) as u32;
    let matrix_size =
        16 + (8 + padded(dims_size)) + (8 + padded(name_size)) + (8 + padded(real_size));

    w.write_all(&MI_MATRIX.to_le_bytes())?;
    w.write_all(&matrix_size.to_le_bytes())?;

    w.write_all(&MI_UINT32.to_le_bytes())?;
    w.write_all(&8u32.to_le_bytes())?;
    w.write_all(&MX_DOUBLE_CLASS.to_le_bytes())?;
    w.write_all(&0u32.to_le_bytes())?;

    w.write_all(&MI_INT32.to_le_bytes())?;
    w.write_all(&dims_size.to_le_bytes())?;
    for &d in dimensions {
        w.write_all(&(d as i32).to_le_bytes())?;
    }
    w.write_all(&vec![0u8; (padded(dims_size) - dims_size) as usize])?;

    w.write_all(&MI_INT8.to_le_bytes())?;
    w.write_all(&name_size.to_le_bytes())?;
    w.write_all(var_name.as_bytes())?;
    w.write_all(&vec![0u8; (padded(name_size) - name_size) as usize])?;

    w.write_all(&MI_DOUBLE.to_le_bytes())?;
    w.write_all(&real_size.to_le_bytes())?;
    for &val in data {
        w.write_all(&val.to_le_bytes())?;
    }

    w.flush()?;
    Ok(())
}

/// Load a 2D array, inferring the format from the extension. `var_name`
/// selects the variable in .mat files.
pub fn load_array(path: &Path, var_name: &str) -> Result<Array2<f64>> {
    match infer_format(path)? {
        FileFormat::Npy => load_npy(path),
        FileFormat::Mat => load_mat(path, var_name),
        FileFormat::Json => Err(FwiError::UnsupportedFileFormat(
            "json (expected an array file)".to_string(),
        )),
    }
}

/// Save a 2D array, inferring the format from the extension.
pub fn save_array(array: &Array2<f64>, path: &Path, var_name: &str) -> Result<()> {
    match infer_format(path)? {
        FileFormat::Npy => save_npy(array, path),
        FileFormat::Mat => save_mat(array, path, var_name),
        FileFormat::Json => Err(FwiError::UnsupportedFileFormat(
            "json (expected an array file)".to_string(),
        )),
    }
}

/// Load a velocity field of the given shape.
pub fn load_velocity(path: &Path, expected_shape: [usize; 2]) -> Result<Array2<f64>> {
    let arr = load_array(path, "velocity")?;
    if arr.dim() != (expected_shape[0], expected_shape[1]) {
        return Err(FwiError::ShapeMismatch {
            expected: expected_shape.to_vec(),
            got: arr.shape().to_vec(),
        });
    }
    Ok(arr)
}

/// Save the velocity field of a model.
pub fn save_model(model: &VelocityModel, path: &Path) -> Result<()> {
    save_array(model.velocity(), path, "velocity")
}

/// Read a JSON trace bundle: a list of traces with their headers.
pub fn load_traces(path: &Path) -> Result<Vec<Trace>> {
    let file = std::fs::File::open(path)?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .map_err(|e| FwiError::Other(format!("trace bundle parse error: {}", e)))
}

/// Write a JSON trace bundle.
pub fn save_traces(traces: &[Trace], path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)?;
    let mut w = std::io::BufWriter::new(file);
    serde_json::to_writer(&mut w, traces)
        .map_err(|e| FwiError::Other(format!("trace bundle write error: {}", e)))?;
    w.flush()?;
    Ok(())
}

/// Load one shot gather.
///
/// JSON bundles carry their own receiver positions and sampling. Array
/// files hold `[nt, nrec]` data and take the sampling and receivers from
/// the caller.
pub fn load_gather(path: &Path, time: TimeAxis, receivers: &[[f64; 2]]) -> Result<ShotGather> {
    match infer_format(path)? {
        FileFormat::Json => ShotGather::from_traces(&load_traces(path)?),
        _ => {
            let data = load_array(path, "data")?;
            ShotGather::new(time, receivers.to_vec(), data)
        }
    }
}

/// Save one shot gather. JSON keeps the trace headers; array formats keep
/// only the `[nt, nrec]` data.
pub fn save_gather(gather: &ShotGather, path: &Path) -> Result<()> {
    match infer_format(path)? {
        FileFormat::Json => save_traces(&gather.to_traces(), path),
        _ => save_array(gather.data(), path, "data"),
    }
}
