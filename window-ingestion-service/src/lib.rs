//! Window pipeline service.
//!
//! [`WindowPipeline::start`] spawns the ingestion and processing loops
//! around a shared [`SwapController`] and returns a [`PipelineHandle`] for
//! status, metrics, and idempotent shutdown. Batches come from a
//! [`BatchSource`]; each completed window goes to a [`WindowSink`] exactly
//! once, with any partial final window force-flushed at end-of-stream.

mod metrics;

pub use metrics::{PipelineMetrics, PipelineMetricsSnapshot};

use std::{fmt, sync::Arc};

use core_types::config::{PipelineConfig, SinkFailurePolicy};
use core_types::status::{OverallStatus, ServiceStatusHandle, StatusGauge};
use core_types::stream::{BatchSource, BoxError, SourceError, WindowSink};
use core_types::types::Sample;
use log::{debug, error, info, warn};
use swap_buffer::{SwapController, SwapError, SwapSignal};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("swap controller invariant violated: {0}")]
    Swap(#[from] SwapError),
    #[error("sink failed: {source}")]
    Sink {
        #[source]
        source: BoxError,
    },
    #[error("source failed: {source}")]
    Source {
        #[source]
        source: BoxError,
    },
    #[error("{detail}")]
    Task { detail: String },
}

/// Terminal state of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// End-of-stream reached and every window drained.
    Completed,
    /// Shut down before the stream finished; any buffered samples were
    /// flushed best-effort.
    Cancelled,
    Aborted { detail: String },
}

impl PipelineOutcome {
    pub fn is_clean(&self) -> bool {
        !matches!(self, PipelineOutcome::Aborted { .. })
    }
}

impl fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineOutcome::Completed => write!(f, "completed"),
            PipelineOutcome::Cancelled => write!(f, "cancelled"),
            PipelineOutcome::Aborted { detail } => write!(f, "aborted: {detail}"),
        }
    }
}

pub struct WindowPipeline;

impl WindowPipeline {
    /// Spawn the pipeline over the given source and sink.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<S, K>(config: PipelineConfig, source: S, sink: K) -> PipelineHandle
    where
        S: BatchSource,
        K: WindowSink,
    {
        let status = ServiceStatusHandle::new("window_pipeline");
        status.push_warning("window pipeline starting");
        let metrics = PipelineMetrics::new();
        let controller = Arc::new(SwapController::new(config.window_size));
        let cancel = CancellationToken::new();
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let supervisor = supervise(
            config,
            source,
            sink,
            controller,
            cancel.clone(),
            metrics.clone(),
            status.clone(),
        );
        tokio::spawn(async move {
            let outcome = supervisor.await;
            let _ = outcome_tx.send(Some(outcome));
        });
        PipelineHandle {
            cancel,
            status,
            metrics,
            outcome: outcome_rx,
        }
    }
}

/// Owner handle for a running pipeline.
pub struct PipelineHandle {
    cancel: CancellationToken,
    status: ServiceStatusHandle,
    metrics: PipelineMetrics,
    outcome: watch::Receiver<Option<PipelineOutcome>>,
}

impl PipelineHandle {
    /// Wait for the pipeline to terminate and return its outcome. Safe to
    /// call repeatedly and cancellation-safe; later calls return the
    /// published outcome.
    pub async fn wait(&self) -> PipelineOutcome {
        let mut rx = self.outcome.clone();
        loop {
            if let Some(outcome) = rx.borrow_and_update().as_ref() {
                return outcome.clone();
            }
            if rx.changed().await.is_err() {
                // Sender dropped without publishing, so the supervisor
                // task panicked.
                return PipelineOutcome::Aborted {
                    detail: "pipeline supervisor task panicked".to_string(),
                };
            }
        }
    }

    /// Request shutdown and wait for termination. Idempotent: a second
    /// call, or a call after natural completion, returns the stored
    /// outcome without touching the sink again.
    pub async fn shutdown(&self) -> PipelineOutcome {
        self.cancel.cancel();
        self.wait().await
    }

    pub fn status_handle(&self) -> ServiceStatusHandle {
        self.status.clone()
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics.clone()
    }
}

async fn supervise<S, K>(
    config: PipelineConfig,
    source: S,
    sink: K,
    controller: Arc<SwapController<Sample>>,
    cancel: CancellationToken,
    metrics: PipelineMetrics,
    status: ServiceStatusHandle,
) -> PipelineOutcome
where
    S: BatchSource,
    K: WindowSink,
{
    status.clear_warnings_matching(|_| true);
    status.set_overall(OverallStatus::Ok);
    info!(
        "[pipeline] starting: window_size={}, sink_failure={:?}",
        controller.window_size(),
        config.sink_failure
    );

    let ingest = {
        let controller = Arc::clone(&controller);
        let cancel = cancel.clone();
        let metrics = metrics.clone();
        let status = status.clone();
        tokio::spawn(run_ingestion(source, controller, cancel, metrics, status))
    };
    let process = {
        let controller = Arc::clone(&controller);
        let cancel = cancel.clone();
        let metrics = metrics.clone();
        tokio::spawn(run_processing(
            sink,
            controller,
            cancel,
            metrics,
            config.sink_failure,
        ))
    };

    let ingest_result = match ingest.await {
        Ok(result) => result,
        Err(err) => Err(PipelineError::Task {
            detail: format!("ingestion task panicked: {err}"),
        }),
    };
    let (mut sink, process_result) = match process.await {
        Ok((sink, result)) => (Some(sink), result),
        Err(err) => (
            None,
            Err(PipelineError::Task {
                detail: format!("processing task panicked: {err}"),
            }),
        ),
    };

    let finished_cleanly = controller.is_done();
    let residual = controller.take_residual();
    if !residual.is_empty() {
        match sink.as_mut() {
            Some(sink) => {
                info!(
                    "[pipeline] flushing {} residual sample(s) before teardown",
                    residual.len()
                );
                match sink.process(&residual).await {
                    Ok(()) => metrics.observe_window(residual.len()),
                    Err(err) => {
                        metrics.inc_sink_failures();
                        warn!("[pipeline] residual flush failed: {err}");
                    }
                }
            }
            None => warn!(
                "[pipeline] dropping {} residual sample(s): sink unavailable",
                residual.len()
            ),
        }
    }

    let failure = ingest_result.err().or(process_result.err());
    match failure {
        Some(err) => {
            error!("[pipeline] aborted: {err}");
            status.set_overall(OverallStatus::Crit);
            status.push_error(err.to_string());
            PipelineOutcome::Aborted {
                detail: err.to_string(),
            }
        }
        None if finished_cleanly => {
            info!("[pipeline] completed cleanly");
            status.set_overall(OverallStatus::Ok);
            PipelineOutcome::Completed
        }
        None => {
            info!("[pipeline] cancelled before end-of-stream");
            status.set_overall(OverallStatus::Warn);
            status.push_warning("pipeline cancelled before end-of-stream");
            PipelineOutcome::Cancelled
        }
    }
}

async fn run_ingestion<S: BatchSource>(
    mut source: S,
    controller: Arc<SwapController<Sample>>,
    cancel: CancellationToken,
    metrics: PipelineMetrics,
    status: ServiceStatusHandle,
) -> Result<(), PipelineError> {
    let result = ingest_loop(&mut source, &controller, &cancel, &metrics, &status).await;
    if result.is_err() {
        // Stop the processing loop too; the supervisor reports the error.
        cancel.cancel();
    }
    result
}

async fn ingest_loop<S: BatchSource>(
    source: &mut S,
    controller: &SwapController<Sample>,
    cancel: &CancellationToken,
    metrics: &PipelineMetrics,
    status: &ServiceStatusHandle,
) -> Result<(), PipelineError> {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                info!("[pipeline] ingestion cancelled");
                return Ok(());
            }
            next = source.next_batch() => next,
        };
        match next {
            Ok(Some(batch)) => {
                let count = batch.len();
                // Check the threshold after every append so a batch that
                // straddles the boundary closes the window mid-batch.
                for sample in batch {
                    controller.append(sample)?;
                    controller.try_threshold_swap();
                }
                metrics.inc_batches(1);
                metrics.inc_samples(count as u64);
                status.set_gauge(StatusGauge {
                    label: "active_fill".to_string(),
                    value: controller.active_len() as f64,
                    max: Some(controller.window_size() as f64),
                    unit: Some("samples".to_string()),
                });
            }
            Ok(None) => {
                info!("[pipeline] source end-of-stream; flushing partial window");
                controller.finish();
                controller.force_swap();
                return Ok(());
            }
            Err(SourceError::Malformed { detail }) => {
                warn!("[pipeline] dropping malformed batch: {detail}");
                metrics.inc_malformed();
            }
            Err(SourceError::Disconnected { detail }) => {
                warn!("[pipeline] source disconnected ({detail}); treating as end-of-stream");
                controller.finish();
                controller.force_swap();
                return Ok(());
            }
            Err(SourceError::Transport { source }) => {
                // Flush what we have so the buffered samples still drain.
                controller.finish();
                controller.force_swap();
                return Err(PipelineError::Source { source });
            }
        }
    }
}

async fn run_processing<K: WindowSink>(
    mut sink: K,
    controller: Arc<SwapController<Sample>>,
    cancel: CancellationToken,
    metrics: PipelineMetrics,
    policy: SinkFailurePolicy,
) -> (K, Result<(), PipelineError>) {
    let result = process_loop(&mut sink, &controller, &cancel, &metrics, policy).await;
    if result.is_err() {
        cancel.cancel();
    }
    (sink, result)
}

async fn process_loop<K: WindowSink>(
    sink: &mut K,
    controller: &SwapController<Sample>,
    cancel: &CancellationToken,
    metrics: &PipelineMetrics,
    policy: SinkFailurePolicy,
) -> Result<(), PipelineError> {
    loop {
        let signal = tokio::select! {
            _ = cancel.cancelled() => {
                info!("[pipeline] processing cancelled");
                return Ok(());
            }
            signal = controller.wait_for_swap() => signal,
        };
        match signal {
            SwapSignal::Finished => {
                info!("[pipeline] all windows drained");
                return Ok(());
            }
            SwapSignal::Window(generation) => {
                let samples = controller.take_draining(generation)?;
                let count = samples.len();
                let sink_result = sink.process(&samples).await;
                controller.release_drained(generation, samples)?;
                match sink_result {
                    Ok(()) => {
                        metrics.observe_window(count);
                        debug!("[pipeline] window {generation} drained ({count} samples)");
                    }
                    Err(err) => {
                        metrics.inc_sink_failures();
                        match policy {
                            SinkFailurePolicy::Continue => {
                                warn!("[pipeline] sink failed on window {generation}: {err}; continuing");
                            }
                            SinkFailurePolicy::Abort => {
                                return Err(PipelineError::Sink { source: err });
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::{
        collections::VecDeque,
        sync::Mutex as StdMutex,
        time::Duration,
    };

    enum SourceEvent {
        Batch(Vec<Sample>),
        Malformed,
        Disconnected,
        /// Block until cancelled, simulating a stalled transport.
        Stall,
    }

    struct ScriptedSource {
        events: StdMutex<VecDeque<SourceEvent>>,
    }

    impl ScriptedSource {
        fn new(events: Vec<SourceEvent>) -> Self {
            Self {
                events: StdMutex::new(events.into()),
            }
        }
    }

    #[async_trait]
    impl BatchSource for ScriptedSource {
        async fn next_batch(&mut self) -> Result<Option<Vec<Sample>>, SourceError> {
            let event = self.events.lock().unwrap().pop_front();
            match event {
                Some(SourceEvent::Batch(batch)) => Ok(Some(batch)),
                Some(SourceEvent::Malformed) => Err(SourceError::Malformed {
                    detail: "not json".to_string(),
                }),
                Some(SourceEvent::Disconnected) => Err(SourceError::Disconnected {
                    detail: "peer reset".to_string(),
                }),
                Some(SourceEvent::Stall) => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                None => Ok(None),
            }
        }
    }

    #[derive(Clone, Default)]
    struct CollectingSink {
        windows: Arc<StdMutex<Vec<Vec<Sample>>>>,
        delay: Option<Duration>,
        /// Fail the first N process calls.
        fail_first: Arc<StdMutex<usize>>,
    }

    impl CollectingSink {
        fn windows(&self) -> Vec<Vec<Sample>> {
            self.windows.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WindowSink for CollectingSink {
        async fn process(&mut self, samples: &[Sample]) -> Result<(), BoxError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            {
                let mut remaining = self.fail_first.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err("sink rejected window".into());
                }
            }
            self.windows.lock().unwrap().push(samples.to_vec());
            Ok(())
        }
    }

    fn sample(tag: f64) -> Sample {
        Sample::new(vec![tag], vec![0.0])
    }

    fn config(window_size: usize, sink_failure: SinkFailurePolicy) -> PipelineConfig {
        PipelineConfig {
            window_size,
            sink_failure,
        }
    }

    #[tokio::test]
    async fn window_of_three_then_forced_flush() {
        let source = ScriptedSource::new(vec![
            SourceEvent::Batch(vec![sample(1.0), sample(2.0)]),
            SourceEvent::Batch(vec![sample(3.0), sample(4.0)]),
        ]);
        let sink = CollectingSink::default();
        let handle = WindowPipeline::start(
            config(3, SinkFailurePolicy::Continue),
            source,
            sink.clone(),
        );
        assert_eq!(handle.wait().await, PipelineOutcome::Completed);

        let windows = sink.windows();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0], vec![sample(1.0), sample(2.0), sample(3.0)]);
        assert_eq!(windows[1], vec![sample(4.0)]);

        let snapshot = handle.metrics().snapshot();
        assert_eq!(snapshot.samples_ingested, 4);
        assert_eq!(snapshot.windows_drained, 2);
        assert_eq!(snapshot.samples_drained, 4);
    }

    #[tokio::test]
    async fn partial_window_flushes_without_threshold_swap() {
        let source = ScriptedSource::new(vec![SourceEvent::Batch(vec![sample(1.0)])]);
        let sink = CollectingSink::default();
        let handle = WindowPipeline::start(
            config(2, SinkFailurePolicy::Continue),
            source,
            sink.clone(),
        );
        assert_eq!(handle.wait().await, PipelineOutcome::Completed);
        assert_eq!(sink.windows(), vec![vec![sample(1.0)]]);
    }

    #[tokio::test]
    async fn no_loss_with_slow_sink() {
        let mut events = Vec::new();
        let mut expected = Vec::new();
        for batch_idx in 0..20 {
            let batch: Vec<Sample> = (0..3)
                .map(|i| sample((batch_idx * 3 + i) as f64))
                .collect();
            expected.extend(batch.clone());
            events.push(SourceEvent::Batch(batch));
        }
        let sink = CollectingSink {
            delay: Some(Duration::from_millis(2)),
            ..CollectingSink::default()
        };
        let handle = WindowPipeline::start(
            config(5, SinkFailurePolicy::Continue),
            ScriptedSource::new(events),
            sink.clone(),
        );
        assert_eq!(handle.wait().await, PipelineOutcome::Completed);

        let windows = sink.windows();
        let flattened: Vec<Sample> = windows.iter().flatten().cloned().collect();
        // No loss, no duplication, order preserved across windows.
        assert_eq!(flattened, expected);
        // The slow sink forces oversized windows but never empty ones.
        assert!(windows.iter().all(|w| !w.is_empty()));
        let snapshot = handle.metrics().snapshot();
        assert_eq!(snapshot.samples_drained, 60);
        assert!(snapshot.largest_window >= 5);
    }

    #[tokio::test]
    async fn malformed_batches_are_dropped_not_fatal() {
        let source = ScriptedSource::new(vec![
            SourceEvent::Batch(vec![sample(1.0)]),
            SourceEvent::Malformed,
            SourceEvent::Batch(vec![sample(2.0)]),
        ]);
        let sink = CollectingSink::default();
        let handle = WindowPipeline::start(
            config(2, SinkFailurePolicy::Continue),
            source,
            sink.clone(),
        );
        assert_eq!(handle.wait().await, PipelineOutcome::Completed);
        assert_eq!(sink.windows(), vec![vec![sample(1.0), sample(2.0)]]);
        assert_eq!(handle.metrics().snapshot().malformed_batches, 1);
    }

    #[tokio::test]
    async fn disconnect_is_treated_as_end_of_stream() {
        let source = ScriptedSource::new(vec![
            SourceEvent::Batch(vec![sample(1.0)]),
            SourceEvent::Disconnected,
        ]);
        let sink = CollectingSink::default();
        let handle = WindowPipeline::start(
            config(10, SinkFailurePolicy::Continue),
            source,
            sink.clone(),
        );
        assert_eq!(handle.wait().await, PipelineOutcome::Completed);
        assert_eq!(sink.windows(), vec![vec![sample(1.0)]]);
    }

    #[tokio::test]
    async fn sink_abort_policy_stops_the_pipeline() {
        let source = ScriptedSource::new(vec![
            SourceEvent::Batch(vec![sample(1.0), sample(2.0)]),
            SourceEvent::Batch(vec![sample(3.0)]),
            SourceEvent::Stall,
        ]);
        let sink = CollectingSink {
            fail_first: Arc::new(StdMutex::new(usize::MAX)),
            ..CollectingSink::default()
        };
        let handle = WindowPipeline::start(
            config(2, SinkFailurePolicy::Abort),
            source,
            sink.clone(),
        );
        let outcome = handle.wait().await;
        assert!(matches!(outcome, PipelineOutcome::Aborted { .. }));
        assert!(sink.windows().is_empty());
        assert!(handle.metrics().snapshot().sink_failures >= 1);
    }

    #[tokio::test]
    async fn sink_continue_policy_moves_to_next_window() {
        let source = ScriptedSource::new(vec![
            SourceEvent::Batch(vec![sample(1.0), sample(2.0)]),
            SourceEvent::Batch(vec![sample(3.0), sample(4.0)]),
        ]);
        let sink = CollectingSink {
            fail_first: Arc::new(StdMutex::new(1)),
            ..CollectingSink::default()
        };
        let handle = WindowPipeline::start(
            config(2, SinkFailurePolicy::Continue),
            source,
            sink.clone(),
        );
        assert_eq!(handle.wait().await, PipelineOutcome::Completed);
        // Window one was rejected; window two still arrived.
        assert_eq!(sink.windows(), vec![vec![sample(3.0), sample(4.0)]]);
        assert_eq!(handle.metrics().snapshot().sink_failures, 1);
    }

    #[tokio::test]
    async fn shutdown_flushes_residual_and_is_idempotent() {
        let source = ScriptedSource::new(vec![
            SourceEvent::Batch(vec![sample(1.0)]),
            SourceEvent::Stall,
        ]);
        let sink = CollectingSink::default();
        let handle = WindowPipeline::start(
            config(10, SinkFailurePolicy::Continue),
            source,
            sink.clone(),
        );
        // Let the batch land before cancelling.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.shutdown().await, PipelineOutcome::Cancelled);
        assert_eq!(sink.windows(), vec![vec![sample(1.0)]]);
        // Second shutdown returns the stored outcome and does not flush
        // the sink again.
        assert_eq!(handle.shutdown().await, PipelineOutcome::Cancelled);
        assert_eq!(sink.windows().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_after_completion_is_a_no_op() {
        let source = ScriptedSource::new(vec![SourceEvent::Batch(vec![sample(1.0)])]);
        let sink = CollectingSink::default();
        let handle = WindowPipeline::start(
            config(1, SinkFailurePolicy::Continue),
            source,
            sink.clone(),
        );
        assert_eq!(handle.wait().await, PipelineOutcome::Completed);
        assert_eq!(handle.shutdown().await, PipelineOutcome::Completed);
        assert_eq!(sink.windows().len(), 1);
    }
}
