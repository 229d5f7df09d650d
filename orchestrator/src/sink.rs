//! Default sink: summarizes each drained window in the log.

use async_trait::async_trait;
use core_types::stream::{BoxError, WindowSink};
use core_types::types::Sample;
use log::info;

/// Counts samples and anomalous labels per window, keeping running totals
/// across the run.
pub struct WindowStatsSink {
    windows_seen: u64,
    samples_seen: u64,
    anomalies_seen: u64,
}

impl WindowStatsSink {
    pub fn new() -> Self {
        Self {
            windows_seen: 0,
            samples_seen: 0,
            anomalies_seen: 0,
        }
    }
}

impl Default for WindowStatsSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WindowSink for WindowStatsSink {
    async fn process(&mut self, samples: &[Sample]) -> Result<(), BoxError> {
        let anomalies = samples.iter().filter(|s| s.is_anomalous()).count() as u64;
        self.windows_seen += 1;
        self.samples_seen += samples.len() as u64;
        self.anomalies_seen += anomalies;
        info!(
            "[sink] window {}: {} sample(s), {} anomalous (totals: {} samples, {} anomalous)",
            self.windows_seen,
            samples.len(),
            anomalies,
            self.samples_seen,
            self.anomalies_seen
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_anomalous_labels() {
        let mut sink = WindowStatsSink::new();
        let window = vec![
            Sample::new(vec![1.0], vec![0.0]),
            Sample::new(vec![2.0], vec![1.0]),
            Sample::new(vec![3.0], vec![0.0, 2.0]),
        ];
        sink.process(&window).await.unwrap();
        assert_eq!(sink.windows_seen, 1);
        assert_eq!(sink.samples_seen, 3);
        assert_eq!(sink.anomalies_seen, 2);
    }
}
