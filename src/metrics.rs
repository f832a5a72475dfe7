// Metrics hooks for registration and percolation.
//
// Callers install a global `PercolateMetrics` implementation via
// [`set_percolate_metrics`]; every `Percolator` then reports latency and
// outcome of each registration and percolation without depending on a
// specific metrics backend.
use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, Instant};

use crate::percolate::PercolateStats;
use crate::signature::ExtractionOutcome;

/// Metrics observer for percolator operations.
pub trait PercolateMetrics: Send + Sync {
    /// `outcome` is `None` when the registration was rejected.
    fn record_registration(&self, latency: Duration, outcome: Option<ExtractionOutcome>);

    /// `stats` is `None` when the percolation failed.
    fn record_percolation(&self, latency: Duration, stats: Option<&PercolateStats>, matches: usize);
}

fn metrics_lock() -> &'static RwLock<Option<Arc<dyn PercolateMetrics>>> {
    static METRICS: OnceLock<RwLock<Option<Arc<dyn PercolateMetrics>>>> = OnceLock::new();
    METRICS.get_or_init(|| RwLock::new(None))
}

fn metrics_recorder() -> Option<Arc<dyn PercolateMetrics>> {
    let guard = metrics_lock()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.clone()
}

/// Install or clear the global percolator metrics recorder.
pub fn set_percolate_metrics(recorder: Option<Arc<dyn PercolateMetrics>>) {
    let mut guard = metrics_lock()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = recorder;
}

pub(crate) struct MetricsSpan {
    recorder: Arc<dyn PercolateMetrics>,
    start: Instant,
}

impl MetricsSpan {
    pub(crate) fn start() -> Option<Self> {
        metrics_recorder().map(|recorder| Self {
            recorder,
            start: Instant::now(),
        })
    }

    pub(crate) fn record_registration(self, outcome: Option<ExtractionOutcome>) {
        self.recorder.record_registration(self.start.elapsed(), outcome);
    }

    pub(crate) fn record_percolation(self, stats: Option<&PercolateStats>, matches: usize) {
        self.recorder
            .record_percolation(self.start.elapsed(), stats, matches);
    }
}
