// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use ndarray::Array2;

use acoustic_fwi::core::VelocityModel;
use acoustic_fwi::data::ShotGather;
use acoustic_fwi::geometry::{line, Acquisition, Ricker, Shot, TimeAxis};
use acoustic_fwi::io;
use acoustic_fwi::objective::{simulate, FwiProblem, Objective};
use acoustic_fwi::optimize::{invert, BacktrackingLineSearch, InversionOptions, StopReason};
use acoustic_fwi::presets::build_velocity;
use acoustic_fwi::propagator::Propagator;
use acoustic_fwi::scheduler::ShotScheduler;

fn model_from_preset(preset: &str, shape: [usize; 2], nbl: usize) -> VelocityModel {
    let vp = build_velocity(preset, shape, [10.0, 10.0]).unwrap();
    VelocityModel::from_array([10.0, 10.0], vp)
        .unwrap()
        .with_nbl(nbl)
}

fn peak_index(trace: &[f64]) -> usize {
    trace
        .iter()
        .enumerate()
        .fold((0, 0.0_f64), |(best, max), (n, &v)| {
            if v.abs() > max {
                (n, v.abs())
            } else {
                (best, max)
            }
        })
        .0
}

/// Test 1: Direct wave moveout in a homogeneous medium.
/// Two receivers in line with the source, 400 m apart, v = 2 km/s.
/// The direct arrival must move out by 400 / 2 = 200 ms. The 2D waveform
/// distortion is the same at both offsets, so it cancels in the difference.
#[test]
fn direct_wave_moveout_homogeneous() {
    let model = model_from_preset("uniform:2.0", [121, 61], 20);
    let dt = model.critical_dt();
    let time = TimeAxis::new(0.0, 700.0, dt).unwrap();
    let wavelet = Ricker::new(0.010).sample(&time);
    let shot = Shot {
        source: [200.0, 300.0],
        receivers: vec![[600.0, 300.0], [1000.0, 300.0]],
    };

    let out = Propagator::new(&model, time)
        .unwrap()
        .forward(&shot, &wavelet, false)
        .unwrap();
    let near = peak_index(&out.data.column(0).to_vec());
    let far = peak_index(&out.data.column(1).to_vec());
    let moveout = (far as f64 - near as f64) * dt;

    assert!(
        (moveout - 200.0).abs() < 10.0,
        "moveout = {} ms (expected ~200 ms)",
        moveout
    );
    // geometric spreading
    let near_amp = out.data[[near, 0]].abs();
    let far_amp = out.data[[far, 1]].abs();
    assert!(far_amp < near_amp);
}

/// Test 2: Source-receiver reciprocity in a heterogeneous medium.
/// The discrete operator is symmetric and injection is the adjoint of
/// sampling, so swapping source and receiver gives the same trace up to
/// round-off, even for off-grid positions.
#[test]
fn reciprocity_heterogeneous() {
    let model = model_from_preset("circle:2.0,2.6,60", [51, 41], 10)
        .with_space_order(8)
        .unwrap();
    let time = TimeAxis::new(0.0, 400.0, model.critical_dt()).unwrap();
    let wavelet = Ricker::new(0.015).sample(&time);
    let a = [123.4, 56.7];
    let b = [311.1, 240.2];

    let prop = Propagator::new(&model, time).unwrap();
    let ab = prop
        .forward(&Shot { source: a, receivers: vec![b] }, &wavelet, false)
        .unwrap()
        .data;
    let ba = prop
        .forward(&Shot { source: b, receivers: vec![a] }, &wavelet, false)
        .unwrap()
        .data;

    let scale = ab.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    assert!(scale > 0.0);
    let max_diff = ab
        .iter()
        .zip(ba.iter())
        .fold(0.0_f64, |m, (x, y)| m.max((x - y).abs()));
    assert!(
        max_diff < 1e-8 * scale,
        "reciprocity violated: max diff {} vs scale {}",
        max_diff,
        scale
    );
}

struct Survey {
    truth: VelocityModel,
    acquisition: Acquisition,
    wavelet: Vec<f64>,
    time: TimeAxis,
}

fn survey() -> Survey {
    let truth = model_from_preset("circle:2.5,3.0,60", [41, 31], 10);
    // margin so perturbed models stay below the stability limit
    let time = TimeAxis::new(0.0, 400.0, 0.8 * truth.critical_dt()).unwrap();
    let wavelet = Ricker::new(0.015).sample(&time);
    let acquisition = Acquisition::fixed_spread(
        &[[100.0, 20.0], [300.0, 20.0]],
        &line([0.0, 280.0], [400.0, 280.0], 21),
    );
    Survey {
        truth,
        acquisition,
        wavelet,
        time,
    }
}

fn problem(s: &Survey) -> FwiProblem {
    let scheduler = ShotScheduler::new().with_threads(2);
    let observed = simulate(&s.truth, &s.acquisition, &s.wavelet, s.time, &scheduler).unwrap();
    FwiProblem::new(s.acquisition.clone(), observed, s.wavelet.clone(), s.time)
        .unwrap()
        .with_scheduler(scheduler)
}

/// Test 3: Adjoint-state gradient against central finite differences.
/// For a smooth perturbation dm of squared slowness,
/// (f(m + e dm) - f(m - e dm)) / 2e must equal <grad, dm>.
#[test]
fn gradient_matches_finite_differences() {
    let s = survey();
    let problem = problem(&s);
    let start = s.truth.smoothed(3.0);
    let m0 = start.squared_slowness();

    let eval = problem.evaluate(&start, true).unwrap();
    let grad = eval.gradient.unwrap();
    assert!(eval.misfit > 0.0);

    let (nx, nz) = m0.dim();
    let dm = Array2::from_shape_fn((nx, nz), |(i, j)| {
        let x = i as f64 / (nx - 1) as f64;
        let z = j as f64 / (nz - 1) as f64;
        0.01 * m0[[i, j]] * (std::f64::consts::PI * x).sin() * (2.0 * std::f64::consts::PI * z).cos()
    });

    let eps = 1e-2;
    let misfit_at = |sign: f64| {
        let mut model = start.clone();
        model.set_squared_slowness(&(&m0 + &(&dm * (sign * eps)))).unwrap();
        problem.evaluate(&model, false).unwrap().misfit
    };
    let fd = (misfit_at(1.0) - misfit_at(-1.0)) / (2.0 * eps);
    let adj = (&grad * &dm).sum();

    let rel = (fd - adj).abs() / adj.abs().max(fd.abs());
    assert!(
        rel < 1e-3,
        "gradient check failed: fd = {}, adjoint = {}, rel = {}",
        fd,
        adj,
        rel
    );
}

/// Test 4: A few line-search iterations from a smoothed model reduce the
/// misfit.
#[test]
fn inversion_reduces_misfit() {
    let s = survey();
    let problem = problem(&s);
    let start = s.truth.smoothed(3.0);
    let mut optimizer = BacktrackingLineSearch::new(0.05, 0.5, 1e-4, 10).unwrap();
    let options = InversionOptions {
        iterations: 3,
        ..InversionOptions::default()
    };

    let mut seen = 0;
    let result = invert(&problem, start, &mut optimizer, &options, |_, _| seen += 1).unwrap();

    assert_ne!(result.stop, StopReason::LineSearchFailed);
    assert_eq!(result.history.len(), 3);
    assert_eq!(seen, 3);
    let initial = result.history[0].misfit;
    assert!(
        result.final_misfit < initial,
        "misfit did not decrease: {} -> {}",
        initial,
        result.final_misfit
    );
    for pair in result.history.windows(2) {
        assert!(pair[1].misfit < pair[0].misfit);
    }
}

/// Test 5: Observed data written as decimated trace bundles, read back and
/// resampled onto the simulation axis, fit the true model far better than a
/// perturbed one.
#[test]
fn trace_bundles_feed_the_objective() {
    let s = survey();
    let scheduler = ShotScheduler::new().with_threads(2);
    let data = simulate(&s.truth, &s.acquisition, &s.wavelet, s.time, &scheduler).unwrap();

    let coarse = TimeAxis::new(0.0, 400.0, 2.0 * s.time.step()).unwrap();
    let mut gathers = Vec::new();
    for (k, (shot, d)) in s.acquisition.shots().iter().zip(data).enumerate() {
        let fine = ShotGather::new(s.time, shot.receivers.clone(), d).unwrap();
        let path = std::env::temp_dir().join(format!("acoustic_fwi_verification_shot{}.json", k));
        io::save_gather(&fine.resample(&coarse), &path).unwrap();
        gathers.push(io::load_gather(&path, s.time, &[]).unwrap());
        std::fs::remove_file(&path).ok();
    }
    assert!((gathers[0].time_axis().step() - coarse.step()).abs() < 1e-12);

    let sources: Vec<[f64; 2]> = s.acquisition.shots().iter().map(|sh| sh.source).collect();
    let problem = FwiProblem::from_gathers(&sources, &gathers, s.wavelet.clone(), s.time)
        .unwrap()
        .with_scheduler(scheduler);
    assert_eq!(problem.acquisition().num_shots(), 2);
    assert_eq!(problem.acquisition().shots()[1].receivers.len(), 21);

    let mut wrong = s.truth.clone();
    wrong
        .set_velocity(s.truth.velocity().mapv(|v| v * 1.05))
        .unwrap();
    let f_true = problem.evaluate(&s.truth, false).unwrap().misfit;
    let f_wrong = problem.evaluate(&wrong, false).unwrap().misfit;
    assert!(
        f_true < 0.05 * f_wrong,
        "true model misfit {} not small against {}",
        f_true,
        f_wrong
    );
}

/// Test 6: With dt at the critical value of the true model, early trial steps
/// of the line search speed the model past the stability limit. Those trials
/// are rejected and the search shrinks the step instead of failing.
#[test]
fn line_search_backs_off_from_unstable_models() {
    let truth = model_from_preset("uniform:2.0", [41, 31], 10);
    let time = TimeAxis::new(0.0, 400.0, truth.critical_dt()).unwrap();
    let wavelet = Ricker::new(0.015).sample(&time);
    let acquisition = Acquisition::fixed_spread(
        &[[100.0, 20.0], [300.0, 20.0]],
        &line([0.0, 280.0], [400.0, 280.0], 21),
    );
    let s = Survey {
        truth,
        acquisition,
        wavelet,
        time,
    };
    let problem = problem(&s);
    let start = model_from_preset("uniform:1.9", [41, 31], 10);
    let mut optimizer = BacktrackingLineSearch::new(0.5, 0.5, 1e-4, 20).unwrap();
    let options = InversionOptions {
        iterations: 2,
        ..InversionOptions::default()
    };

    let result = invert(&problem, start, &mut optimizer, &options, |_, _| {}).unwrap();

    assert_ne!(result.stop, StopReason::LineSearchFailed);
    let initial = result.history[0].misfit;
    assert!(
        result.final_misfit < initial,
        "misfit did not decrease: {} -> {}",
        initial,
        result.final_misfit
    );
    assert!(result.history[0].step < 0.5);
    Propagator::new(&result.model, time).unwrap();
}
