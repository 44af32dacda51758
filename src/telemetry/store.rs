//! In-process metrics storage.
//!
//! Counters, gauges and histogram summaries kept behind atomics so the
//! frame loop can record without blocking readers. `snapshot()` produces a
//! serializable copy for diagnostics output.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Serializable copy of the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    pub histograms: HashMap<String, HistogramSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

/// f64 values are stored as their bit patterns.
struct HistogramData {
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl HistogramData {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0f64.to_bits()),
            min: AtomicU64::new(f64::INFINITY.to_bits()),
            max: AtomicU64::new(f64::NEG_INFINITY.to_bits()),
        }
    }

    fn record(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        update_f64(&self.sum, |cur| Some(cur + value));
        update_f64(&self.min, |cur| (value < cur).then_some(value));
        update_f64(&self.max, |cur| (value > cur).then_some(value));
    }

    fn summary(&self) -> HistogramSummary {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return HistogramSummary { count, sum: 0.0, mean: 0.0, min: 0.0, max: 0.0 };
        }
        let sum = load_f64(&self.sum);
        HistogramSummary {
            count,
            sum,
            mean: sum / count as f64,
            min: load_f64(&self.min),
            max: load_f64(&self.max),
        }
    }
}

fn load_f64(atomic: &AtomicU64) -> f64 {
    f64::from_bits(atomic.load(Ordering::Relaxed))
}

/// CAS loop applying `f`; `None` leaves the value untouched.
fn update_f64(atomic: &AtomicU64, f: impl Fn(f64) -> Option<f64>) {
    let _ = atomic.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
        f(f64::from_bits(bits)).map(f64::to_bits)
    });
}

/// Thread-safe metrics store. Also usable directly as a `MetricsSink`.
pub struct MetricsStore {
    counters: RwLock<HashMap<String, AtomicU64>>,
    gauges: RwLock<HashMap<String, AtomicU64>>,
    histograms: RwLock<HashMap<String, HistogramData>>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
        }
    }

    pub fn increment_counter(&self, name: &str, value: u64) {
        with_entry(&self.counters, name, || AtomicU64::new(0), |c| {
            c.fetch_add(value, Ordering::Relaxed);
        });
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        with_entry(&self.gauges, name, || AtomicU64::new(0), |g| {
            g.store(value.to_bits(), Ordering::Relaxed);
        });
    }

    pub fn record_histogram(&self, name: &str, value: f64) {
        with_entry(&self.histograms, name, HistogramData::new, |h| h.record(value));
    }

    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counters.read().get(name).map(|c| c.load(Ordering::Relaxed))
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges
            .read()
            .get(name)
            .map(load_f64)
    }

    /// Copy of every metric at this instant.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.read();
        let gauges = self.gauges.read();
        let histograms = self.histograms.read();

        MetricsSnapshot {
            counters: counters
                .iter()
                .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
                .collect(),
            gauges: gauges
                .iter()
                .map(|(k, v)| (k.clone(), load_f64(v)))
                .collect(),
            histograms: histograms
                .iter()
                .map(|(k, v)| (k.clone(), v.summary()))
                .collect(),
        }
    }
}

/// Apply `f` to the named entry, creating it under the write lock only on
/// first use.
fn with_entry<V>(map: &RwLock<HashMap<String, V>>, name: &str, init: impl FnOnce() -> V, f: impl FnOnce(&V)) {
    if let Some(entry) = map.read().get(name) {
        f(entry);
        return;
    }
    let mut map = map.write();
    f(map.entry(name.to_string()).or_insert_with(init));
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new()
    }
}
