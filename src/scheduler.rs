// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;

use crate::error::{FwiError, Result};

/// Progress information passed to the optional callback.
#[derive(Debug, Clone, Copy)]
pub struct ProgressInfo {
    /// Number of shots finished so far.
    pub shots_completed: u64,
    /// Number of shots still waiting in the queue.
    pub pending: usize,
    /// Number of worker threads currently processing shots.
    pub in_flight: usize,
    /// Elapsed time since the batch started.
    pub elapsed: Duration,
}

/// Runs independent per-shot tasks on a fixed-size thread pool.
///
/// Shots are pulled from a shared queue so long and short shots balance
/// across workers. Results are returned in shot order regardless of which
/// worker produced them, which keeps any later reduction reproducible.
pub struct ShotScheduler {
    num_threads: Option<usize>,
    progress_interval: Duration,
    progress_callback: Option<Box<dyn Fn(ProgressInfo) + Send + Sync>>,
}

impl Default for ShotScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ShotScheduler {
    /// Scheduler using all available cores and no progress reporting.
    pub fn new() -> Self {
        ShotScheduler {
            num_threads: None,
            progress_interval: Duration::from_millis(500),
            progress_callback: None,
        }
    }

    /// Set the number of worker threads (builder method).
    /// If not specified, defaults to the number of available CPU cores.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads.max(1));
        self
    }

    /// Set a progress callback (builder method). It is invoked after a shot
    /// completes, at most once per progress interval.
    pub fn with_progress(mut self, callback: Box<dyn Fn(ProgressInfo) + Send + Sync>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Set the minimum time between progress callbacks (builder method).
    /// Default is 500ms.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Number of worker threads that will be used.
    pub fn num_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Run `task` for every shot index in `0..num_shots` and return the
    /// results in index order.
    ///
    /// # Errors
    /// The first task error stops the remaining queue and is returned.
    pub fn map<T, F>(&self, num_shots: usize, task: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<T> + Sync,
    {
        if num_shots == 0 {
            return Ok(Vec::new());
        }
        let num_threads = self.num_threads().min(num_shots);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| FwiError::Other(e.to_string()))?;

        let queue = SegQueue::new();
        for shot in 0..num_shots {
            queue.push(shot);
        }
        let results = SegQueue::new();
        let first_error: Mutex<Option<FwiError>> = Mutex::new(None);

        let in_flight = AtomicUsize::new(0);
        let done = AtomicBool::new(false);
        let completed = AtomicU64::new(0);
        let start_time = Instant::now();
        let last_progress = AtomicU64::new(0);
        let interval_ms = self.progress_interval.as_millis() as u64;

        pool.scope(|s| {
            for _ in 0..num_threads {
                s.spawn(|_| loop {
                    if done.load(Ordering::Acquire) {
                        break;
                    }
                    let Some(shot) = queue.pop() else {
                        break;
                    };
                    in_flight.fetch_add(1, Ordering::AcqRel);
                    let outcome = task(shot);
                    in_flight.fetch_sub(1, Ordering::AcqRel);

                    match outcome {
                        Ok(value) => results.push((shot, value)),
                        Err(e) => {
                            done.store(true, Ordering::Release);
                            if let Ok(mut slot) = first_error.lock() {
                                if slot.is_none() {
                                    *slot = Some(e);
                                }
                            }
                            break;
                        }
                    }

                    let finished = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(cb) = &self.progress_callback {
                        let elapsed_ms = start_time.elapsed().as_millis() as u64;
                        let last = last_progress.load(Ordering::Relaxed);
                        let due = finished == 1 || elapsed_ms >= last + interval_ms;
                        if due
                            && last_progress
                                .compare_exchange(
                                    last,
                                    elapsed_ms,
                                    Ordering::Relaxed,
                                    Ordering::Relaxed,
                                )
                                .is_ok()
                        {
                            cb(ProgressInfo {
                                shots_completed: finished,
                                pending: queue.len(),
                                in_flight: in_flight.load(Ordering::Relaxed),
                                elapsed: start_time.elapsed(),
                            });
                        }
                    }
                });
            }
        });

        if let Some(e) = first_error
            .into_inner()
            .map_err(|e| FwiError::Other(e.to_string()))?
        {
            return Err(e);
        }

        let mut ordered: Vec<(usize, T)> = Vec::with_capacity(num_shots);
        while let Some(item) = results.pop() {
            ordered.push(item);
        }
        ordered.sort_by_key(|(shot, _)| *shot);
        Ok(ordered.into_iter().map(|(_, value)| value).collect())
    }
}
