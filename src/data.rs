// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FwiError, Result};
use crate::geometry::{Shot, TimeAxis};

/// Longest gather, in samples, that [`ShotGather::from_traces`] will build.
pub const MAX_GATHER_SAMPLES: usize = 1 << 24;

/// A single recorded seismogram with the header fields the inversion needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Station name.
    pub station: String,
    /// Receiver position `[x, z]` in metres.
    pub position: [f64; 2],
    /// Time of the first sample in ms.
    #[serde(default)]
    pub start: f64,
    /// Sample interval in ms.
    pub step: f64,
    /// Amplitudes.
    pub samples: Vec<f64>,
}

/// All traces recorded for one shot, on a common time axis.
#[derive(Debug, Clone)]
pub struct ShotGather {
    stations: Vec<String>,
    receivers: Vec<[f64; 2]>,
    time: TimeAxis,
    data: Array2<f64>,
}

impl ShotGather {
    /// Build a gather from a `[nt, nrec]` array.
    ///
    /// # Errors
    /// Returns an error if the array shape does not match the time axis and
    /// receiver count.
    pub fn new(time: TimeAxis, receivers: Vec<[f64; 2]>, data: Array2<f64>) -> Result<Self> {
        if data.dim() != (time.num(), receivers.len()) {
            return Err(FwiError::ShapeMismatch {
                expected: vec![time.num(), receivers.len()],
                got: data.shape().to_vec(),
            });
        }
        let stations = (0..receivers.len()).map(|r| format!("R{:04}", r)).collect();
        Ok(ShotGather {
            stations,
            receivers,
            time,
            data,
        })
    }

    /// Assemble a gather from individually recorded traces.
    ///
    /// Traces are aligned on their start times and zero-padded to a common
    /// length; receiver coordinates come from the trace headers.
    ///
    /// # Errors
    /// Returns an error if `traces` is empty, the traces do not share one
    /// sample interval, a start time is not finite, or aligning the traces
    /// would need more than [`MAX_GATHER_SAMPLES`] samples.
    pub fn from_traces(traces: &[Trace]) -> Result<Self> {
        let first = traces.first().ok_or(FwiError::EmptyGather)?;
        let step = first.step;
        if !step.is_finite() || step <= 0.0 {
            return Err(FwiError::InvalidTimeAxis {
                start: first.start,
                stop: first.start,
                step,
            });
        }
        for trace in traces {
            if !trace.start.is_finite() {
                return Err(FwiError::InvalidTimeAxis {
                    start: trace.start,
                    stop: trace.start,
                    step: trace.step,
                });
            }
            if (trace.step - step).abs() > 1e-9 * step {
                return Err(FwiError::InconsistentSampling {
                    station: trace.station.clone(),
                    expected: step,
                    got: trace.step,
                });
            }
        }

        let start = traces
            .iter()
            .map(|t| t.start)
            .fold(f64::INFINITY, f64::min);
        let mut offsets = Vec::with_capacity(traces.len());
        let mut nt = 0;
        for trace in traces {
            let offset = ((trace.start - start) / step).round();
            let end = if offset <= MAX_GATHER_SAMPLES as f64 {
                (offset as usize).checked_add(trace.samples.len())
            } else {
                None
            };
            let Some(end) = end.filter(|&end| end <= MAX_GATHER_SAMPLES) else {
                return Err(FwiError::InvalidTimeAxis {
                    start,
                    stop: trace.start,
                    step,
                });
            };
            offsets.push(offset as usize);
            nt = nt.max(end);
        }
        let time = TimeAxis::from_samples(start, step, nt)?;

        let mut data = Array2::zeros((nt, traces.len()));
        for (r, (trace, &offset)) in traces.iter().zip(&offsets).enumerate() {
            for (n, &v) in trace.samples.iter().enumerate() {
                data[[offset + n, r]] = v;
            }
        }
        debug!(traces = traces.len(), nt, step, "assembled gather");

        Ok(ShotGather {
            stations: traces.iter().map(|t| t.station.clone()).collect(),
            receivers: traces.iter().map(|t| t.position).collect(),
            time,
            data,
        })
    }

    /// Split the gather back into traces.
    pub fn to_traces(&self) -> Vec<Trace> {
        self.stations
            .iter()
            .zip(&self.receivers)
            .enumerate()
            .map(|(r, (station, &position))| Trace {
                station: station.clone(),
                position,
                start: self.time.start(),
                step: self.time.step(),
                samples: self.data.column(r).to_vec(),
            })
            .collect()
    }

    /// Linearly interpolate the gather onto another time axis. Samples
    /// outside the recorded window are zero.
    pub fn resample(&self, target: &TimeAxis) -> ShotGather {
        let nt_src = self.time.num();
        let nrec = self.receivers.len();
        let mut data = Array2::zeros((target.num(), nrec));
        for (n, t) in target.times().into_iter().enumerate() {
            let pos = (t - self.time.start()) / self.time.step();
            if pos < 0.0 || pos > (nt_src - 1) as f64 + 1e-9 {
                continue;
            }
            let lo = (pos.floor() as usize).min(nt_src - 1);
            let hi = (lo + 1).min(nt_src - 1);
            let w = pos - lo as f64;
            for r in 0..nrec {
                data[[n, r]] = (1.0 - w) * self.data[[lo, r]] + w * self.data[[hi, r]];
            }
        }
        ShotGather {
            stations: self.stations.clone(),
            receivers: self.receivers.clone(),
            time: *target,
            data,
        }
    }

    /// Station names, one per column.
    pub fn stations(&self) -> &[String] {
        &self.stations
    }

    /// Receiver positions, one per column.
    pub fn receivers(&self) -> &[[f64; 2]] {
        &self.receivers
    }

    /// Time axis of the rows.
    pub fn time_axis(&self) -> &TimeAxis {
        &self.time
    }

    /// Amplitudes, shape `[nt, nrec]`.
    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    /// Number of receivers.
    pub fn num_receivers(&self) -> usize {
        self.receivers.len()
    }

    /// The shot this gather records, given its source position.
    pub fn shot(&self, source: [f64; 2]) -> Shot {
        Shot {
            source,
            receivers: self.receivers.clone(),
        }
    }
}

/// Synthetic minus observed data.
///
/// # Errors
/// Returns an error if the arrays differ in shape.
pub fn residual(synthetic: &Array2<f64>, observed: &Array2<f64>) -> Result<Array2<f64>> {
    if synthetic.dim() != observed.dim() {
        return Err(FwiError::ShapeMismatch {
            expected: synthetic.shape().to_vec(),
            got: observed.shape().to_vec(),
        });
    }
    Ok(synthetic - observed)
}

/// Least-squares misfit `0.5 * sum(r^2)`.
pub fn misfit(residual: &Array2<f64>) -> f64 {
    0.5 * residual.iter().map(|r| r * r).sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(station: &str, x: f64, start: f64, samples: Vec<f64>) -> Trace {
        Trace {
            station: station.to_string(),
            position: [x, 0.0],
            start,
            step: 2.0,
            samples,
        }
    }

    #[test]
    fn pads_to_common_length() {
        let traces = vec![
            trace("A", 0.0, 0.0, vec![1.0, 2.0, 3.0]),
            trace("B", 10.0, 0.0, vec![4.0, 5.0, 6.0, 7.0, 8.0]),
        ];
        let gather = ShotGather::from_traces(&traces).unwrap();
        assert_eq!(gather.data().dim(), (5, 2));
        assert_eq!(gather.data()[[2, 0]], 3.0);
        assert_eq!(gather.data()[[3, 0]], 0.0);
        assert_eq!(gather.data()[[4, 1]], 8.0);
        assert_eq!(gather.receivers(), &[[0.0, 0.0], [10.0, 0.0]]);
        assert_eq!(gather.stations(), &["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn aligns_late_starting_trace() {
        let traces = vec![
            trace("A", 0.0, 0.0, vec![1.0, 1.0]),
            trace("B", 10.0, 4.0, vec![9.0, 9.0]),
        ];
        let gather = ShotGather::from_traces(&traces).unwrap();
        assert_eq!(gather.data().dim(), (4, 2));
        assert_eq!(gather.data()[[1, 1]], 0.0);
        assert_eq!(gather.data()[[2, 1]], 9.0);
    }

    #[test]
    fn empty_gather_rejected() {
        assert!(matches!(
            ShotGather::from_traces(&[]),
            Err(FwiError::EmptyGather)
        ));
    }

    #[test]
    fn mixed_sampling_rejected() {
        let mut b = trace("B", 10.0, 0.0, vec![1.0, 2.0]);
        b.step = 4.0;
        let traces = vec![trace("A", 0.0, 0.0, vec![1.0, 2.0]), b];
        let err = ShotGather::from_traces(&traces).unwrap_err();
        assert!(matches!(
            err,
            FwiError::InconsistentSampling { ref station, .. } if station == "B"
        ));
    }

    #[test]
    fn far_apart_start_times_rejected() {
        let traces = vec![
            trace("A", 0.0, 0.0, vec![1.0, 2.0]),
            trace("B", 10.0, 1e300, vec![3.0, 4.0]),
        ];
        assert!(matches!(
            ShotGather::from_traces(&traces),
            Err(FwiError::InvalidTimeAxis { .. })
        ));

        // finite but beyond the sample cap
        let gap = 2.0 * (MAX_GATHER_SAMPLES as f64);
        let traces = vec![
            trace("A", 0.0, 0.0, vec![1.0]),
            trace("B", 10.0, gap, vec![1.0]),
        ];
        assert!(ShotGather::from_traces(&traces).is_err());
    }

    #[test]
    fn non_finite_start_rejected() {
        for bad in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            let traces = vec![
                trace("A", 0.0, 0.0, vec![1.0, 2.0]),
                trace("B", 10.0, bad, vec![3.0, 4.0]),
            ];
            assert!(matches!(
                ShotGather::from_traces(&traces),
                Err(FwiError::InvalidTimeAxis { .. })
            ));
        }
    }

    #[test]
    fn resample_linear_signal() {
        let samples: Vec<f64> = (0..11).map(|n| 3.0 * (2.0 * n as f64)).collect();
        let gather = ShotGather::from_traces(&[trace("A", 0.0, 0.0, samples)]).unwrap();
        let target = TimeAxis::new(0.0, 25.0, 0.5).unwrap();
        let fine = gather.resample(&target);
        assert_eq!(fine.data().dim(), (51, 1));
        assert!((fine.data()[[3, 0]] - 4.5).abs() < 1e-12);
        assert!((fine.data()[[40, 0]] - 60.0).abs() < 1e-12);
        assert_eq!(fine.data()[[45, 0]], 0.0);
    }

    #[test]
    fn traces_roundtrip_through_gather() {
        let traces = vec![
            trace("A", 0.0, 0.0, vec![1.0, 2.0]),
            trace("B", 10.0, 0.0, vec![3.0, 4.0]),
        ];
        let gather = ShotGather::from_traces(&traces).unwrap();
        assert_eq!(gather.to_traces(), traces);
    }

    #[test]
    fn misfit_of_residual() {
        let syn = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let obs = Array2::from_shape_vec((2, 2), vec![1.0, 0.0, 3.0, 1.0]).unwrap();
        let r = residual(&syn, &obs).unwrap();
        assert!((misfit(&r) - 6.5).abs() < 1e-12);
        let bad = Array2::zeros((3, 2));
        assert!(residual(&syn, &bad).is_err());
    }
}
