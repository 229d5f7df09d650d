use serde::{Deserialize, Serialize};

/// One `(input, label)` pair pulled from the stream.
///
/// Both sides are opaque numeric payloads; nothing downstream of the source
/// inspects them until a drained window reaches the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub input: Vec<f64>,
    pub label: Vec<f64>,
}

impl Sample {
    pub fn new(input: Vec<f64>, label: Vec<f64>) -> Self {
        Self { input, label }
    }

    /// True when any label component is non-zero.
    pub fn is_anomalous(&self) -> bool {
        self.label.iter().any(|v| *v != 0.0)
    }
}
