//! Registry client seam.
//!
//! The engines never talk to a registry themselves. Tag mutations and
//! endpoint probes go through a [`RegistryClient`] supplied by the caller.
//! [`SimulatedRegistryClient`] is the in-process stand-in used by the CLI
//! and the tests.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{RegistryError, Result};

/// Registry operations consumed by the batch executor and health monitor.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Deletes a tag (`repository:tag`).
    async fn delete_tag(&self, target: &str) -> Result<()>;

    /// Copies a tag under a destination prefix.
    async fn copy_tag(&self, source: &str, dest_prefix: &str) -> Result<()>;

    /// Points `dest` at the image currently tagged `source`.
    async fn retag_image(&self, source: &str, dest: &str) -> Result<()>;

    /// Checks that an endpoint is answering. `timeout` is a hint; callers
    /// enforce their own deadline as well.
    async fn probe_endpoint(&self, endpoint: &str, timeout: Duration) -> Result<()>;
}

/// Simulated per-call latencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedLatency {
    /// Latency of a tag deletion.
    pub delete: Duration,
    /// Latency of a tag copy.
    pub copy: Duration,
    /// Latency of a retag.
    pub retag: Duration,
    /// Latency of an endpoint probe.
    pub probe: Duration,
}

impl Default for SimulatedLatency {
    fn default() -> Self {
        Self {
            delete: Duration::from_millis(100),
            copy: Duration::from_millis(200),
            retag: Duration::from_millis(150),
            probe: Duration::from_millis(50),
        }
    }
}

impl SimulatedLatency {
    /// Zero latency for every call.
    pub const fn none() -> Self {
        Self {
            delete: Duration::ZERO,
            copy: Duration::ZERO,
            retag: Duration::ZERO,
            probe: Duration::ZERO,
        }
    }
}

/// In-memory registry client with configurable latency and failures.
///
/// Targets and endpoints listed as failing return an error after the
/// simulated latency; everything else succeeds.
#[derive(Debug, Default)]
pub struct SimulatedRegistryClient {
    latency: SimulatedLatency,
    failing: RwLock<HashSet<String>>,
}

impl SimulatedRegistryClient {
    /// Creates a client with the default simulated latencies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a client with custom latencies.
    pub fn with_latency(latency: SimulatedLatency) -> Self {
        Self {
            latency,
            failing: RwLock::new(HashSet::new()),
        }
    }

    /// Marks a target or endpoint as failing (or clears the mark).
    pub fn set_failing(&self, key: impl Into<String>, failing: bool) {
        let key = key.into();
        let mut set = self.failing.write();
        if failing {
            set.insert(key);
        } else {
            set.remove(&key);
        }
    }

    /// Returns true if the key is currently marked as failing.
    pub fn is_failing(&self, key: &str) -> bool {
        self.failing.read().contains(key)
    }

    async fn simulate(&self, latency: Duration, key: &str) -> bool {
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        !self.is_failing(key)
    }
}

#[async_trait]
impl RegistryClient for SimulatedRegistryClient {
    async fn delete_tag(&self, target: &str) -> Result<()> {
        if self.simulate(self.latency.delete, target).await {
            tracing::debug!(target_ref = %target, "simulated tag delete");
            Ok(())
        } else {
            Err(RegistryError::target_failure("delete", target, "simulated failure"))
        }
    }

    async fn copy_tag(&self, source: &str, dest_prefix: &str) -> Result<()> {
        if self.simulate(self.latency.copy, source).await {
            tracing::debug!(source = %source, dest_prefix = %dest_prefix, "simulated tag copy");
            Ok(())
        } else {
            Err(RegistryError::target_failure("copy", source, "simulated failure"))
        }
    }

    async fn retag_image(&self, source: &str, dest: &str) -> Result<()> {
        if self.simulate(self.latency.retag, source).await {
            tracing::debug!(source = %source, dest = %dest, "simulated retag");
            Ok(())
        } else {
            Err(RegistryError::target_failure("retag", source, "simulated failure"))
        }
    }

    async fn probe_endpoint(&self, endpoint: &str, _timeout: Duration) -> Result<()> {
        if self.simulate(self.latency.probe, endpoint).await {
            Ok(())
        } else {
            Err(RegistryError::ProbeFailure {
                endpoint: endpoint.to_string(),
                reason: "simulated failure".to_string(),
            })
        }
    }
}
