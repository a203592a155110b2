use std::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Side channel for non-fatal failures.
pub trait Telemetry: Send + Sync {
    fn report(
        &self,
        severity: Severity,
        component: &str,
        message: &str,
        cause: Option<&dyn std::error::Error>,
    );
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn report(
        &self,
        severity: Severity,
        component: &str,
        message: &str,
        cause: Option<&dyn std::error::Error>,
    ) {
        let cause = cause.map(|err| err.to_string());
        match severity {
            Severity::Debug => tracing::debug!(component, cause = ?cause, "{message}"),
            Severity::Info => tracing::info!(component, cause = ?cause, "{message}"),
            Severity::Warning => tracing::warn!(component, cause = ?cause, "{message}"),
            Severity::Error => tracing::error!(component, cause = ?cause, "{message}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetryEvent {
    pub severity: Severity,
    pub component: String,
    pub message: String,
    pub cause: Option<String>,
}

/// Keeps every report in memory and forwards it to tracing.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    pub fn count(&self, component: &str, severity: Severity) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .iter()
            .filter(|event| event.component == component && event.severity == severity)
            .count()
    }
}

impl Telemetry for RecordingTelemetry {
    fn report(
        &self,
        severity: Severity,
        component: &str,
        message: &str,
        cause: Option<&dyn std::error::Error>,
    ) {
        TracingTelemetry.report(severity, component, message, cause);
        let mut events = self.events.lock().unwrap_or_else(|err| err.into_inner());
        events.push(TelemetryEvent {
            severity,
            component: component.to_string(),
            message: message.to_string(),
            cause: cause.map(|err| err.to_string()),
        });
    }
}
