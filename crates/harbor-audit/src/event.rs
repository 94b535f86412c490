//! Audit event definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::{Timestamp, Uuid};

/// Generates a new v7 UUID for audit events.
fn new_event_id() -> Uuid {
    let ts = Timestamp::now(uuid::NoContext);
    Uuid::new_v7(ts)
}

/// Severity level for audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    /// Informational event
    #[default]
    Info,
    /// Warning event
    Warning,
    /// Error event
    Error,
    /// Critical event requiring immediate attention
    Critical,
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// Operation succeeded
    Success,
    /// Operation failed
    Failure,
    /// Operation was denied
    Denied,
    /// Operation is in progress
    InProgress,
}

/// Base trait for all audit events.
pub trait AuditEvent: Serialize {
    /// Returns the event type identifier.
    fn event_type(&self) -> &'static str;

    /// Returns the event severity.
    fn severity(&self) -> EventSeverity;
}

/// Tag protection events: policy lifecycle and blocked decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionEvent {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Type of protection event
    pub event_type: ProtectionEventType,

    /// Name of the policy involved
    pub policy: String,

    /// Tag reference (`repository:tag`) the decision was made for
    pub tag_ref: Option<String>,

    /// Event outcome
    pub outcome: EventOutcome,

    /// Additional details
    pub details: Option<String>,
}

/// Types of protection events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionEventType {
    /// Policy was added to the engine
    PolicyAdded,
    /// Policy was removed from the engine
    PolicyRemoved,
    /// A tag modification was blocked
    ModifyBlocked,
    /// A tag deletion was blocked
    DeleteBlocked,
}

impl ProtectionEvent {
    fn new(
        event_type: ProtectionEventType,
        policy: &str,
        tag_ref: Option<&str>,
        outcome: EventOutcome,
    ) -> Self {
        Self {
            id: new_event_id(),
            timestamp: Utc::now(),
            event_type,
            policy: policy.to_string(),
            tag_ref: tag_ref.map(str::to_string),
            outcome,
            details: None,
        }
    }

    /// Creates a policy added event.
    #[must_use]
    pub fn policy_added(policy: &str, pattern: &str) -> Self {
        Self::new(ProtectionEventType::PolicyAdded, policy, None, EventOutcome::Success)
            .with_details(&format!("pattern={pattern}"))
    }

    /// Creates a policy removed event.
    #[must_use]
    pub fn policy_removed(policy: &str) -> Self {
        Self::new(ProtectionEventType::PolicyRemoved, policy, None, EventOutcome::Success)
    }

    /// Creates an event for a blocked tag modification.
    #[must_use]
    pub fn modify_blocked(tag_ref: &str, policy: &str, reason: &str) -> Self {
        Self::new(
            ProtectionEventType::ModifyBlocked,
            policy,
            Some(tag_ref),
            EventOutcome::Denied,
        )
        .with_details(reason)
    }

    /// Creates an event for a blocked tag deletion.
    #[must_use]
    pub fn delete_blocked(tag_ref: &str, policy: &str, reason: &str) -> Self {
        Self::new(
            ProtectionEventType::DeleteBlocked,
            policy,
            Some(tag_ref),
            EventOutcome::Denied,
        )
        .with_details(reason)
    }

    /// Sets additional details.
    #[must_use]
    pub fn with_details(mut self, details: &str) -> Self {
        self.details = Some(details.to_string());
        self
    }
}

impl AuditEvent for ProtectionEvent {
    fn event_type(&self) -> &'static str {
        match self.event_type {
            ProtectionEventType::PolicyAdded => "protection.policy_added",
            ProtectionEventType::PolicyRemoved => "protection.policy_removed",
            ProtectionEventType::ModifyBlocked => "protection.modify_blocked",
            ProtectionEventType::DeleteBlocked => "protection.delete_blocked",
        }
    }

    fn severity(&self) -> EventSeverity {
        match self.outcome {
            EventOutcome::Success | EventOutcome::InProgress => EventSeverity::Info,
            EventOutcome::Failure | EventOutcome::Denied => EventSeverity::Warning,
        }
    }
}

/// Batch operation events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEvent {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Type of batch event
    pub event_type: BatchEventType,

    /// Batch operation identifier
    pub operation_id: String,

    /// Kind of batch operation (delete, copy, ...)
    pub operation_type: String,

    /// Number of targets in the batch
    pub target_count: usize,

    /// Number of successful targets (terminal events only)
    pub succeeded: Option<usize>,

    /// Number of failed targets (terminal events only)
    pub failed: Option<usize>,

    /// Wall-clock duration in milliseconds (terminal events only)
    pub duration_ms: Option<u64>,

    /// Event outcome
    pub outcome: EventOutcome,
}

/// Types of batch events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchEventType {
    /// Batch was accepted by the executor
    Submitted,
    /// Every target in the batch succeeded
    Completed,
    /// At least one target failed
    Failed,
}

impl BatchEvent {
    /// Creates a batch submitted event.
    #[must_use]
    pub fn submitted(operation_id: &str, operation_type: &str, target_count: usize) -> Self {
        Self {
            id: new_event_id(),
            timestamp: Utc::now(),
            event_type: BatchEventType::Submitted,
            operation_id: operation_id.to_string(),
            operation_type: operation_type.to_string(),
            target_count,
            succeeded: None,
            failed: None,
            duration_ms: None,
            outcome: EventOutcome::InProgress,
        }
    }

    /// Creates a terminal batch event from the final tallies.
    #[must_use]
    pub fn finished(
        operation_id: &str,
        operation_type: &str,
        succeeded: usize,
        failed: usize,
        duration_ms: u64,
    ) -> Self {
        let (event_type, outcome) = if failed == 0 {
            (BatchEventType::Completed, EventOutcome::Success)
        } else {
            (BatchEventType::Failed, EventOutcome::Failure)
        };

        Self {
            id: new_event_id(),
            timestamp: Utc::now(),
            event_type,
            operation_id: operation_id.to_string(),
            operation_type: operation_type.to_string(),
            target_count: succeeded + failed,
            succeeded: Some(succeeded),
            failed: Some(failed),
            duration_ms: Some(duration_ms),
            outcome,
        }
    }
}

impl AuditEvent for BatchEvent {
    fn event_type(&self) -> &'static str {
        match self.event_type {
            BatchEventType::Submitted => "batch.submitted",
            BatchEventType::Completed => "batch.completed",
            BatchEventType::Failed => "batch.failed",
        }
    }

    fn severity(&self) -> EventSeverity {
        match self.event_type {
            BatchEventType::Submitted | BatchEventType::Completed => EventSeverity::Info,
            BatchEventType::Failed => EventSeverity::Warning,
        }
    }
}

/// Endpoint health events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthEvent {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Type of health event
    pub event_type: HealthEventType,

    /// Monitored endpoint
    pub endpoint: String,

    /// Consecutive failures at the time of the event
    pub consecutive_failures: u32,

    /// Event outcome
    pub outcome: EventOutcome,

    /// Additional details
    pub details: Option<String>,
}

/// Types of health events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthEventType {
    /// Endpoint was registered for monitoring
    Registered,
    /// Circuit opened after repeated failures
    CircuitOpened,
    /// Circuit moved to half-open for a trial probe
    CircuitHalfOpened,
    /// Circuit closed after a successful probe
    CircuitClosed,
}

impl HealthEvent {
    fn new(event_type: HealthEventType, endpoint: &str, consecutive_failures: u32) -> Self {
        let outcome = match event_type {
            HealthEventType::Registered | HealthEventType::CircuitClosed => EventOutcome::Success,
            HealthEventType::CircuitHalfOpened => EventOutcome::InProgress,
            HealthEventType::CircuitOpened => EventOutcome::Failure,
        };

        Self {
            id: new_event_id(),
            timestamp: Utc::now(),
            event_type,
            endpoint: endpoint.to_string(),
            consecutive_failures,
            outcome,
            details: None,
        }
    }

    /// Creates an endpoint registered event.
    #[must_use]
    pub fn registered(endpoint: &str) -> Self {
        Self::new(HealthEventType::Registered, endpoint, 0)
    }

    /// Creates a circuit opened event.
    #[must_use]
    pub fn circuit_opened(endpoint: &str, consecutive_failures: u32, error: &str) -> Self {
        Self::new(HealthEventType::CircuitOpened, endpoint, consecutive_failures)
            .with_details(error)
    }

    /// Creates a circuit half-opened event.
    #[must_use]
    pub fn circuit_half_opened(endpoint: &str, consecutive_failures: u32) -> Self {
        Self::new(HealthEventType::CircuitHalfOpened, endpoint, consecutive_failures)
    }

    /// Creates a circuit closed event.
    #[must_use]
    pub fn circuit_closed(endpoint: &str, latency_ms: u64) -> Self {
        Self::new(HealthEventType::CircuitClosed, endpoint, 0)
            .with_details(&format!("latency_ms={latency_ms}"))
    }

    /// Sets additional details.
    #[must_use]
    pub fn with_details(mut self, details: &str) -> Self {
        self.details = Some(details.to_string());
        self
    }
}

impl AuditEvent for HealthEvent {
    fn event_type(&self) -> &'static str {
        match self.event_type {
            HealthEventType::Registered => "health.registered",
            HealthEventType::CircuitOpened => "health.circuit_opened",
            HealthEventType::CircuitHalfOpened => "health.circuit_half_opened",
            HealthEventType::CircuitClosed => "health.circuit_closed",
        }
    }

    fn severity(&self) -> EventSeverity {
        match self.event_type {
            HealthEventType::Registered
            | HealthEventType::CircuitHalfOpened
            | HealthEventType::CircuitClosed => EventSeverity::Info,
            HealthEventType::CircuitOpened => EventSeverity::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modify_blocked_event() {
        let event = ProtectionEvent::modify_blocked(
            "library/nginx:v1.2.3",
            "prod-immutable",
            "tag is immutable (policy: prod-immutable)",
        );

        assert_eq!(event.event_type(), "protection.modify_blocked");
        assert_eq!(event.outcome, EventOutcome::Denied);
        assert_eq!(event.severity(), EventSeverity::Warning);
        assert_eq!(event.tag_ref.as_deref(), Some("library/nginx:v1.2.3"));
    }

    #[test]
    fn test_policy_added_event_is_info() {
        let event = ProtectionEvent::policy_added("recent", ".*:.*");
        assert_eq!(event.severity(), EventSeverity::Info);
        assert_eq!(event.details.as_deref(), Some("pattern=.*:.*"));
        assert!(event.tag_ref.is_none());
    }

    #[test]
    fn test_protection_event_serialization() {
        let event = ProtectionEvent::delete_blocked("a/b:c", "keep", "no deletes");
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains("\"event_type\":\"delete_blocked\""));
        assert!(json.contains("\"outcome\":\"denied\""));
        assert!(json.contains("\"tag_ref\":\"a/b:c\""));
    }

    #[test]
    fn test_batch_finished_success() {
        let event = BatchEvent::finished("batch-1", "delete", 3, 0, 120);
        assert_eq!(event.event_type, BatchEventType::Completed);
        assert_eq!(event.outcome, EventOutcome::Success);
        assert_eq!(event.target_count, 3);
        assert_eq!(event.severity(), EventSeverity::Info);
    }

    #[test]
    fn test_batch_finished_with_failures() {
        let event = BatchEvent::finished("batch-1", "copy", 2, 1, 300);
        assert_eq!(event.event_type(), "batch.failed");
        assert_eq!(event.outcome, EventOutcome::Failure);
        assert_eq!(event.failed, Some(1));
    }

    #[test]
    fn test_batch_submitted_in_progress() {
        let event = BatchEvent::submitted("batch-1", "retag", 5);
        assert_eq!(event.outcome, EventOutcome::InProgress);
        assert!(event.succeeded.is_none());
    }

    #[test]
    fn test_health_circuit_events() {
        let opened = HealthEvent::circuit_opened("https://r.example.com", 3, "timeout");
        assert_eq!(opened.severity(), EventSeverity::Error);
        assert_eq!(opened.consecutive_failures, 3);

        let closed = HealthEvent::circuit_closed("https://r.example.com", 42);
        assert_eq!(closed.outcome, EventOutcome::Success);
        assert_eq!(closed.details.as_deref(), Some("latency_ms=42"));
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = HealthEvent::registered("a");
        let b = HealthEvent::registered("a");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(EventSeverity::Info < EventSeverity::Warning);
        assert!(EventSeverity::Warning < EventSeverity::Error);
        assert!(EventSeverity::Error < EventSeverity::Critical);
    }
}
