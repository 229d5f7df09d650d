use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

#[derive(Default)]
struct PipelineMetricsInner {
    batches_ingested: AtomicU64,
    samples_ingested: AtomicU64,
    malformed_batches: AtomicU64,
    windows_drained: AtomicU64,
    samples_drained: AtomicU64,
    largest_window: AtomicU64,
    sink_failures: AtomicU64,
}

#[derive(Clone, Default)]
pub struct PipelineMetrics {
    inner: Arc<PipelineMetricsInner>,
}

pub struct PipelineMetricsSnapshot {
    pub batches_ingested: u64,
    pub samples_ingested: u64,
    pub malformed_batches: u64,
    pub windows_drained: u64,
    pub samples_drained: u64,
    pub largest_window: u64,
    pub sink_failures: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_batches(&self, delta: u64) {
        if delta > 0 {
            self.inner
                .batches_ingested
                .fetch_add(delta, Ordering::Relaxed);
        }
    }

    pub fn inc_samples(&self, delta: u64) {
        if delta > 0 {
            self.inner
                .samples_ingested
                .fetch_add(delta, Ordering::Relaxed);
        }
    }

    pub fn inc_malformed(&self) {
        self.inner.malformed_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sink_failures(&self) {
        self.inner.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_window(&self, samples: usize) {
        self.inner.windows_drained.fetch_add(1, Ordering::Relaxed);
        self.inner
            .samples_drained
            .fetch_add(samples as u64, Ordering::Relaxed);
        self.inner
            .largest_window
            .fetch_max(samples as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        PipelineMetricsSnapshot {
            batches_ingested: self.inner.batches_ingested.load(Ordering::Relaxed),
            samples_ingested: self.inner.samples_ingested.load(Ordering::Relaxed),
            malformed_batches: self.inner.malformed_batches.load(Ordering::Relaxed),
            windows_drained: self.inner.windows_drained.load(Ordering::Relaxed),
            samples_drained: self.inner.samples_drained.load(Ordering::Relaxed),
            largest_window: self.inner.largest_window.load(Ordering::Relaxed),
            sink_failures: self.inner.sink_failures.load(Ordering::Relaxed),
        }
    }
}
