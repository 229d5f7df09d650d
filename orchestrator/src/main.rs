//! Pipeline binary: wires the websocket source and the stats sink into the
//! window pipeline, then runs until end-of-stream or Ctrl+C.

mod sink;

use std::process;

use config::ConfigError;
use core_types::config::AppConfig;
use env_logger::Env;
use log::{error, info};
use thiserror::Error;
use window_ingestion_service::{PipelineOutcome, WindowPipeline};
use ws_source::{WsSource, WsSourceError};

use crate::sink::WindowStatsSink;

#[derive(Debug, Error)]
enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] WsSourceError),
    #[error("signal handler failed: {0}")]
    Signal(#[from] std::io::Error),
    #[error("pipeline aborted: {0}")]
    Pipeline(String),
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    if let Err(err) = run().await {
        error!("orchestrator failed: {err}");
        process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let config = AppConfig::load()?;
    info!(
        "window pipeline booting: window_size={}, sink_failure={:?}",
        config.pipeline.window_size, config.pipeline.sink_failure
    );
    info!(
        "source: {} (batch_size={}, start_index={}, ack_batches={})",
        config.ws.url, config.ws.batch_size, config.ws.start_index, config.ws.ack_batches
    );

    let source = WsSource::new(&config.ws)?;
    let pipeline = WindowPipeline::start(config.pipeline, source, WindowStatsSink::new());

    let outcome = tokio::select! {
        outcome = pipeline.wait() => outcome,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutdown signal received; draining buffered samples");
            pipeline.shutdown().await
        }
    };

    let snapshot = pipeline.metrics().snapshot();
    info!(
        "run {outcome}: {} batch(es) / {} sample(s) ingested, {} window(s) / {} sample(s) drained, malformed={}, sink_failures={}",
        snapshot.batches_ingested,
        snapshot.samples_ingested,
        snapshot.windows_drained,
        snapshot.samples_drained,
        snapshot.malformed_batches,
        snapshot.sink_failures
    );

    match outcome {
        PipelineOutcome::Completed | PipelineOutcome::Cancelled => Ok(()),
        PipelineOutcome::Aborted { detail } => Err(AppError::Pipeline(detail)),
    }
}
