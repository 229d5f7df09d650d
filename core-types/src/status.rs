use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Discrete health level exposed by a managed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OverallStatus {
    Ok,
    #[default]
    Warn,
    Crit,
}

/// Lightweight gauge descriptor exported alongside the status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusGauge {
    pub label: String,
    pub value: f64,
    pub max: Option<f64>,
    pub unit: Option<String>,
}

/// Mutable backing structure for a service status snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub overall: OverallStatus,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub gauges: Vec<StatusGauge>,
}

/// Immutable snapshot returned to consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusSnapshot {
    pub name: String,
    pub overall: OverallStatus,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub gauges: Vec<StatusGauge>,
}

/// Shared handle so a service can mutate its own status safely.
#[derive(Clone)]
pub struct ServiceStatusHandle {
    name: &'static str,
    inner: Arc<RwLock<ServiceStatus>>,
}

impl ServiceStatusHandle {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(RwLock::new(ServiceStatus::default())),
        }
    }

    pub fn service_name(&self) -> &'static str {
        self.name
    }

    pub fn update<F>(&self, mutator: F)
    where
        F: FnOnce(&mut ServiceStatus),
    {
        let mut guard = self.inner.write().expect("status poisoned");
        mutator(&mut guard);
    }

    pub fn set_overall(&self, status: OverallStatus) {
        self.update(|s| s.overall = status);
    }

    pub fn push_warning(&self, msg: impl Into<String>) {
        self.update(|s| s.warnings.push(msg.into()));
    }

    pub fn clear_warnings_matching(&self, predicate: impl Fn(&str) -> bool) {
        self.update(|s| s.warnings.retain(|w| !predicate(w)));
    }

    pub fn push_error(&self, msg: impl Into<String>) {
        self.update(|s| s.errors.push(msg.into()));
    }

    /// Replace (or insert) the gauge with the given label.
    pub fn set_gauge(&self, gauge: StatusGauge) {
        self.update(|s| {
            if let Some(existing) = s.gauges.iter_mut().find(|g| g.label == gauge.label) {
                *existing = gauge;
            } else {
                s.gauges.push(gauge);
            }
        });
    }

    pub fn snapshot(&self) -> ServiceStatusSnapshot {
        let guard = self.inner.read().expect("status poisoned");
        ServiceStatusSnapshot {
            name: self.name.to_string(),
            overall: guard.overall,
            warnings: guard.warnings.clone(),
            errors: guard.errors.clone(),
            gauges: guard.gauges.clone(),
        }
    }

    pub fn overall(&self) -> OverallStatus {
        let guard = self.inner.read().expect("status poisoned");
        guard.overall
    }
}
