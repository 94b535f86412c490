//! Audit logger implementation.

use crate::event::{AuditEvent, EventSeverity};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Backend trait for audit log storage.
pub trait LoggerBackend: Send + Sync + Debug {
    /// Logs a serialized audit event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be logged.
    fn log(&self, event_json: &str) -> Result<(), LoggerError>;

    /// Returns the backend name for identification.
    fn name(&self) -> &'static str;
}

/// Errors that can occur during audit logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// Serialization error
    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Audit logger that fans events out to its configured backends.
///
/// Engines receive an `Arc<AuditLogger>` at construction time instead of
/// reaching for a process-wide logger, so each engine can be wired to its
/// own backends in tests.
#[derive(Debug)]
pub struct AuditLogger {
    backends: Vec<Arc<dyn LoggerBackend>>,
    enabled: bool,
    min_severity: EventSeverity,
}

impl AuditLogger {
    /// Creates a logger that writes every event through `tracing`.
    #[must_use]
    pub fn tracing() -> Self {
        Self::builder()
            .with_backend(Arc::new(TracingBackend::new()))
            .build()
    }

    /// Creates a logger that drops every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self::builder().enabled(false).build()
    }

    /// Creates a builder for configuring the logger.
    #[must_use]
    pub fn builder() -> AuditLoggerBuilder {
        AuditLoggerBuilder::new()
    }

    /// Logs an audit event to all configured backends.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be serialized.
    /// Backend errors are logged but do not cause this method to fail.
    pub fn log<E: AuditEvent>(&self, event: &E) -> Result<(), LoggerError> {
        if !self.enabled {
            return Ok(());
        }

        if event.severity() < self.min_severity {
            debug!(
                event_type = event.event_type(),
                severity = ?event.severity(),
                threshold = ?self.min_severity,
                "audit event below severity threshold, skipping"
            );
            return Ok(());
        }

        let json = serde_json::to_string(event)?;

        for backend in &self.backends {
            if let Err(e) = backend.log(&json) {
                error!(backend = backend.name(), error = %e, "failed to write audit event");
            }
        }

        Ok(())
    }

    /// Logs an event and swallows any error after reporting it via `tracing`.
    ///
    /// Engines use this on their hot paths: an audit failure must never
    /// change the outcome of the operation being audited.
    pub fn record<E: AuditEvent>(&self, event: &E) {
        if let Err(e) = self.log(event) {
            warn!(event_type = event.event_type(), error = %e, "audit event dropped");
        }
    }
}

/// Builder for configuring an audit logger.
#[derive(Debug)]
pub struct AuditLoggerBuilder {
    backends: Vec<Arc<dyn LoggerBackend>>,
    enabled: bool,
    min_severity: EventSeverity,
}

impl AuditLoggerBuilder {
    fn new() -> Self {
        Self {
            backends: Vec::new(),
            enabled: true,
            min_severity: EventSeverity::Info,
        }
    }

    /// Adds a backend to the logger.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn LoggerBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Enables or disables the logger.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the minimum severity level.
    #[must_use]
    pub const fn min_severity(mut self, severity: EventSeverity) -> Self {
        self.min_severity = severity;
        self
    }

    /// Builds the audit logger.
    #[must_use]
    pub fn build(self) -> AuditLogger {
        AuditLogger {
            backends: self.backends,
            enabled: self.enabled,
            min_severity: self.min_severity,
        }
    }
}

/// Backend that emits events through `tracing` under the `harbor::audit` target.
#[derive(Debug, Default)]
pub struct TracingBackend;

impl TracingBackend {
    /// Creates a new tracing backend.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl LoggerBackend for TracingBackend {
    fn log(&self, event_json: &str) -> Result<(), LoggerError> {
        let value: serde_json::Value = serde_json::from_str(event_json)?;

        let outcome = value
            .get("outcome")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");

        match outcome {
            "failure" | "denied" => {
                warn!(target: "harbor::audit", audit_event = %event_json, "audit event");
            }
            _ => info!(target: "harbor::audit", audit_event = %event_json, "audit event"),
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}

/// In-memory backend, mostly useful for asserting on emitted events in tests.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    events: Mutex<Vec<String>>,
}

impl InMemoryBackend {
    /// Creates a new in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all logged events.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Returns the logged events whose `event_type` field equals `event_type`.
    #[must_use]
    pub fn events_of_type(&self, event_type: &str) -> Vec<serde_json::Value> {
        self.events
            .lock()
            .iter()
            .filter_map(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
            .filter(|v| v.get("event_type").and_then(|t| t.as_str()) == Some(event_type))
            .collect()
    }
}

impl LoggerBackend for InMemoryBackend {
    fn log(&self, event_json: &str) -> Result<(), LoggerError> {
        self.events.lock().push(event_json.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}
