//! Per-node processing time measurement.
//!
//! The realtime side samples timestamps around each processed node and pushes
//! `{node, delta}` points into a wait-free ring. A background worker drains
//! the ring once per evaluation interval and folds the points into per-node
//! min/avg/max records, where each value is the fraction of the available
//! chunk period that the node consumed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::info;

use crate::fifo::MpmcFifo;
use crate::lockfree::AtomicDouble;
use crate::rt_event::ObjectId;

/// Node id used for the engine-level chunk timing.
pub const ENGINE_TIMING_ID: ObjectId = 0;

const EVALUATION_INTERVAL: Duration = Duration::from_secs(1);
const AVERAGING_FACTOR: f32 = 0.3;
const TIMING_QUEUE_CAPACITY: usize = 4096;

/// Aggregated timings for one node, as fractions of the chunk period.
#[derive(Debug, Clone, Copy)]
pub struct ProcessTimings {
    pub avg_case: f32,
    pub min_case: f32,
    pub max_case: f32,
}

impl Default for ProcessTimings {
    fn default() -> Self {
        Self {
            avg_case: 0.0,
            min_case: f32::MAX,
            max_case: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TimingLogPoint {
    id: ObjectId,
    delta: Duration,
}

struct TimerShared {
    enabled: AtomicBool,
    /// Chunk period in nanoseconds; timings are reported relative to it.
    period_ns: AtomicDouble,
    queue: MpmcFifo<TimingLogPoint, TIMING_QUEUE_CAPACITY>,
    timings: Mutex<HashMap<ObjectId, ProcessTimings>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to one process timer. The realtime producer path never
/// locks; only the aggregation worker and the query methods touch the mutex
/// around the per-node results.
#[derive(Clone)]
pub struct PerformanceTimer {
    shared: Arc<TimerShared>,
}

impl PerformanceTimer {
    pub fn new(sample_rate: f32, chunk_size: usize) -> Self {
        let timer = Self {
            shared: Arc::new(TimerShared {
                enabled: AtomicBool::new(false),
                period_ns: AtomicDouble::new(0.0),
                queue: MpmcFifo::new(),
                timings: Mutex::new(HashMap::new()),
                worker: Mutex::new(None),
            }),
        };
        timer.set_timing_period(sample_rate, chunk_size);
        timer
    }

    /// Set the period one chunk may take at the given configuration.
    pub fn set_timing_period(&self, sample_rate: f32, chunk_size: usize) {
        let period_ns = chunk_size as f64 / sample_rate as f64 * 1e9;
        self.shared.period_ns.set(period_ns);
    }

    pub fn enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    /// Start or stop the aggregation worker.
    pub fn enable(&self, enabled: bool) {
        if enabled && !self.enabled() {
            self.shared.enabled.store(true, Ordering::Release);
            // The worker holds a weak handle so dropping the last timer
            // handle always ends it
            let shared = Arc::downgrade(&self.shared);
            let handle = std::thread::Builder::new()
                .name("timing-worker".to_string())
                .spawn(move || worker_loop(shared))
                .expect("failed to spawn timing worker");
            *self.shared.worker.lock() = Some(handle);
        } else if !enabled && self.enabled() {
            self.shared.enabled.store(false, Ordering::Release);
            if let Some(handle) = self.shared.worker.lock().take() {
                let _ = handle.join();
            }
            // One final pass so nothing queued is lost
            update_timings(&self.shared);
        }
    }

    /// Realtime side: timestamp the start of an instrumented region.
    /// Returns `None` when timing is disabled so the region costs nothing.
    #[inline]
    pub fn start_timer(&self) -> Option<Instant> {
        if self.enabled() {
            Some(Instant::now())
        } else {
            None
        }
    }

    /// Realtime side: record the region's duration. Drops the point if the
    /// ring is full rather than waiting.
    #[inline]
    pub fn stop_timer(&self, start: Option<Instant>, id: ObjectId) {
        if let Some(start) = start {
            let point = TimingLogPoint {
                id,
                delta: start.elapsed(),
            };
            let _ = self.shared.queue.push(point);
        }
    }

    pub fn timings_for_node(&self, id: ObjectId) -> Option<ProcessTimings> {
        self.shared.timings.lock().get(&id).copied()
    }

    pub fn clear_timings_for_node(&self, id: ObjectId) -> bool {
        let mut timings = self.shared.timings.lock();
        match timings.get_mut(&id) {
            Some(node) => {
                *node = ProcessTimings::default();
                true
            }
            None => false,
        }
    }

    pub fn clear_all_timings(&self) {
        let mut timings = self.shared.timings.lock();
        for node in timings.values_mut() {
            *node = ProcessTimings::default();
        }
    }

    /// Report current timings through the log.
    pub fn log_timings(&self) {
        let timings = self.shared.timings.lock();
        for (id, node) in timings.iter() {
            info!(
                node = *id,
                avg = node.avg_case,
                min = node.min_case,
                max = node.max_case,
                "process timings"
            );
        }
    }
}

impl Drop for PerformanceTimer {
    fn drop(&mut self) {
        if Arc::strong_count(&self.shared) == 1 && self.enabled() {
            self.enable(false);
        }
    }
}

fn worker_loop(shared: Weak<TimerShared>) {
    loop {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        if !shared.enabled.load(Ordering::Acquire) {
            return;
        }
        let start = Instant::now();
        update_timings(&shared);
        drop(shared);
        let elapsed = start.elapsed();
        if elapsed < EVALUATION_INTERVAL {
            std::thread::sleep(EVALUATION_INTERVAL - elapsed);
        }
    }
}

fn update_timings(shared: &Arc<TimerShared>) {
    let period = shared.period_ns.get();
    let mut sorted: HashMap<ObjectId, Vec<f32>> = HashMap::new();
    while let Some(point) = shared.queue.pop() {
        let fraction = (point.delta.as_nanos() as f64 / period) as f32;
        sorted.entry(point.id).or_default().push(fraction);
    }
    for (id, fractions) in sorted {
        let fresh = calculate_timings(&fractions);
        let mut timings = shared.timings.lock();
        let node = timings.entry(id).or_default();
        *node = merge_timings(*node, fresh);
    }
}

fn calculate_timings(fractions: &[f32]) -> ProcessTimings {
    let mut min_value = f32::MAX;
    let mut max_value = 0.0f32;
    let mut sum = 0.0f32;
    for &fraction in fractions {
        sum += fraction;
        min_value = min_value.min(fraction);
        max_value = max_value.max(fraction);
    }
    ProcessTimings {
        avg_case: sum / fractions.len() as f32,
        min_case: min_value,
        max_case: max_value,
    }
}

fn merge_timings(previous: ProcessTimings, fresh: ProcessTimings) -> ProcessTimings {
    let avg_case = if previous.avg_case == 0.0 {
        fresh.avg_case
    } else {
        (1.0 - AVERAGING_FACTOR) * previous.avg_case + AVERAGING_FACTOR * fresh.avg_case
    };
    ProcessTimings {
        avg_case,
        min_case: previous.min_case.min(fresh.min_case),
        max_case: previous.max_case.max(fresh.max_case),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_disabled_records_nothing() {
        let timer = PerformanceTimer::new(48_000.0, 64);
        assert!(timer.start_timer().is_none());
        timer.stop_timer(None, 1);
        assert!(timer.timings_for_node(1).is_none());
    }

    #[test]
    fn test_record_and_aggregate() {
        let timer = PerformanceTimer::new(48_000.0, 64);
        timer.shared.enabled.store(true, Ordering::Release);

        // Queue a few synthetic points and aggregate without the worker
        for _ in 0..4 {
            timer.shared.queue.push(TimingLogPoint {
                id: 7,
                delta: Duration::from_micros(666), // half of the 1333 us period
            });
        }
        timer.shared.enabled.store(false, Ordering::Release);
        update_timings(&timer.shared);

        let timings = timer.timings_for_node(7).unwrap();
        assert!((timings.avg_case - 0.5).abs() < 0.01);
        assert!((timings.min_case - 0.5).abs() < 0.01);
        assert!((timings.max_case - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_merge_keeps_extrema_and_smooths_average() {
        let previous = ProcessTimings {
            avg_case: 0.4,
            min_case: 0.2,
            max_case: 0.6,
        };
        let fresh = ProcessTimings {
            avg_case: 0.8,
            min_case: 0.3,
            max_case: 0.9,
        };
        let merged = merge_timings(previous, fresh);
        assert!((merged.avg_case - (0.7 * 0.4 + 0.3 * 0.8)).abs() < 1e-6);
        assert_eq!(merged.min_case, 0.2);
        assert_eq!(merged.max_case, 0.9);
    }

    #[test]
    fn test_clear_timings() {
        let timer = PerformanceTimer::new(48_000.0, 64);
        timer
            .shared
            .timings
            .lock()
            .insert(3, ProcessTimings {
                avg_case: 0.5,
                min_case: 0.1,
                max_case: 0.9,
            });
        assert!(timer.clear_timings_for_node(3));
        assert_eq!(timer.timings_for_node(3).unwrap().avg_case, 0.0);
        assert!(!timer.clear_timings_for_node(99));

        timer.clear_all_timings();
        assert_eq!(timer.timings_for_node(3).unwrap().max_case, 0.0);
    }

    #[test]
    fn test_worker_aggregates_live_points() {
        let timer = PerformanceTimer::new(48_000.0, 64);
        timer.enable(true);
        let start = timer.start_timer();
        assert!(start.is_some());
        std::thread::sleep(Duration::from_micros(100));
        timer.stop_timer(start, 11);
        timer.enable(false);
        let timings = timer.timings_for_node(11).unwrap();
        assert!(timings.max_case > 0.0);
    }
}
