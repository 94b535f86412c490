//! Harbor Registry Engines
//!
//! This crate provides the runtime services behind Harbor's registry
//! management commands.
//!
//! # Overview
//!
//! - **Tag Protection**: rule-based policies deciding whether a
//!   `repository:tag` may be modified or deleted
//! - **Batch Operations**: bounded-concurrency delete/copy/retag batches with
//!   per-target results
//! - **Health Monitoring**: periodic endpoint probes behind a per-endpoint
//!   circuit breaker
//!
//! The three engines share no state. Registry I/O goes through an injected
//! [`RegistryClient`]; audit records go to an injected
//! [`harbor_audit::AuditLogger`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use harbor_audit::AuditLogger;
//! use harbor_registry::{ProtectionPolicy, TagProtection};
//!
//! let engine = TagProtection::new(Arc::new(AuditLogger::tracing()));
//! engine
//!     .add_policy(
//!         ProtectionPolicy::new("prod-immutable", r".*:v\d+\.\d+\.\d+$")?
//!             .immutable()
//!             .priority(10),
//!     )?;
//!
//! let decision = engine.can_modify("library/nginx", "v1.2.3", Duration::from_secs(86_400));
//! assert!(!decision.allowed);
//! # Ok::<(), harbor_registry::RegistryError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::significant_drop_tightening)]

pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod monitor;
pub mod operation;
pub mod policy_set;
pub mod protection;


// Re-export main types at crate root
pub use batch::{BatchExecutor, BatchHandle};
pub use client::{RegistryClient, SimulatedLatency, SimulatedRegistryClient};
pub use config::{BatchConfig, BatchConfigBuilder, HealthConfig, HealthConfigBuilder};
pub use error::{RegistryError, Result};
pub use health::{CircuitState, HealthCheck, HealthStatus, ProbeGate};
pub use monitor::{HealthMonitor, RunningMonitor};
pub use operation::{BatchOpResult, BatchOpStatus, BatchOpType, BatchOperation, BatchSummary};
pub use policy_set::{PolicyDefinition, PolicySet};
pub use protection::{ProtectionDecision, ProtectionPolicy, TagPattern, TagProtection};
