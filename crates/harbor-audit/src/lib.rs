//! Audit logging for the Harbor registry toolkit.
//!
//! This crate provides audit logging capabilities for tracking:
//! - Tag protection policy lifecycle and blocked modify/delete decisions
//! - Batch operation submission and completion
//! - Endpoint health registration and circuit-breaker transitions
//!
//! Every engine in `harbor-registry` receives an [`AuditLogger`] through its
//! constructor; nothing in the toolkit writes to a global logger.
//!
//! # Example
//!
//! ```rust
//! use harbor_audit::{AuditLogger, InMemoryBackend, ProtectionEvent};
//! use std::sync::Arc;
//!
//! let backend = Arc::new(InMemoryBackend::new());
//! let logger = AuditLogger::builder()
//!     .with_backend(backend.clone())
//!     .build();
//!
//! let event = ProtectionEvent::modify_blocked(
//!     "library/nginx:v1.2.3",
//!     "prod-immutable",
//!     "tag is immutable (policy: prod-immutable)",
//! );
//! logger.log(&event).unwrap();
//! assert_eq!(backend.events().len(), 1);
//! ```

mod event;
mod logger;

pub use event::{
    AuditEvent, BatchEvent, BatchEventType, EventOutcome, EventSeverity, HealthEvent,
    HealthEventType, ProtectionEvent, ProtectionEventType,
};
pub use logger::{
    AuditLogger, AuditLoggerBuilder, InMemoryBackend, LoggerBackend, LoggerError, TracingBackend,
};
