//! Operator Alerts
//!
//! Replica disagreements must reach an operator even when the run itself
//! keeps going, so the reconciler raises alerts through this sink instead
//! of writing bare log lines.

use std::sync::Mutex;
use tracing::{error, warn};

/// Severity of an operator alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    /// Degraded but tolerable (e.g. a replica missing a copy).
    Warning,
    /// Requires investigation (e.g. a replica holding a different digest).
    Error,
}

/// Sink for operator alerts raised during digest reconciliation.
pub trait AlertService: Send + Sync {
    fn raise(&self, severity: AlertSeverity, message: &str);
}

/// Default sink: forwards alerts to the tracing pipeline.
pub struct LogAlertService;

impl AlertService for LogAlertService {
    fn raise(&self, severity: AlertSeverity, message: &str) {
        match severity {
            AlertSeverity::Warning => warn!("[ALERT] {}", message),
            AlertSeverity::Error => error!("[ALERT] {}", message),
        }
    }
}

/// Collecting sink used by tests to assert on raised alerts.
#[derive(Default)]
pub struct CollectingAlertService {
    alerts: Mutex<Vec<(AlertSeverity, String)>>,
}

impl CollectingAlertService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raised(&self) -> Vec<(AlertSeverity, String)> {
        self.alerts.lock().unwrap().clone()
    }
}

impl AlertService for CollectingAlertService {
    fn raise(&self, severity: AlertSeverity, message: &str) {
        self.alerts.lock().unwrap().push((severity, message.to_string()));
    }
}
