use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the pipeline binary.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub ws: WsConfig,
}

/// Knobs owned by the window pipeline itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Item-count threshold that completes a window.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// What to do when the sink fails on a drained window.
    #[serde(default)]
    pub sink_failure: SinkFailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            sink_failure: SinkFailurePolicy::default(),
        }
    }
}

fn default_window_size() -> usize {
    100
}

/// Propagation policy for sink errors. `Continue` logs the failure and
/// moves on to the next window; `Abort` stops the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkFailurePolicy {
    #[default]
    Continue,
    Abort,
}

/// WebSocket source settings; defaults match the upstream stream server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    #[serde(default = "default_ws_url")]
    pub url: String,
    /// Batch size requested in the start command.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Offset into the server's dataset to start streaming from.
    #[serde(default)]
    pub start_index: usize,
    /// Send a per-batch acknowledgment after each received batch.
    #[serde(default = "default_ack_batches")]
    pub ack_batches: bool,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: default_ws_url(),
            batch_size: default_batch_size(),
            start_index: 0,
            ack_batches: default_ack_batches(),
        }
    }
}

fn default_ws_url() -> String {
    "ws://127.0.0.1:8000/ws".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_ack_batches() -> bool {
    true
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name("config.toml").required(false))
            .add_source(config::Environment::with_prefix("STREAM").separator("__"))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.window_size == 0 {
            return Err(ConfigError::Message(
                "pipeline.window_size must be at least 1".to_string(),
            ));
        }
        if self.ws.batch_size == 0 {
            return Err(ConfigError::Message(
                "ws.batch_size must be at least 1".to_string(),
            ));
        }
        if self.ws.url.trim().is_empty() {
            return Err(ConfigError::Message("ws.url is required".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = AppConfig::default();
        assert_eq!(config.pipeline.window_size, 100);
        assert_eq!(config.pipeline.sink_failure, SinkFailurePolicy::Continue);
        assert_eq!(config.ws.url, "ws://127.0.0.1:8000/ws");
        assert!(config.ws.ack_batches);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_window_size_is_rejected() {
        let mut config = AppConfig::default();
        config.pipeline.window_size = 0;
        assert!(config.validate().is_err());
    }
}
