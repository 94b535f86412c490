//! Configuration types for the batch executor and health monitor.

use std::time::Duration;

use crate::error::{RegistryError, Result};

/// Configuration for the batch executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Maximum number of target actions in flight at once.
    pub workers: usize,

    /// Number of finished operations kept in the store.
    ///
    /// When exceeded, the oldest finished operations are evicted. `None`
    /// keeps every operation until the caller removes it.
    pub max_history: Option<usize>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            max_history: Some(1000),
        }
    }
}

impl BatchConfig {
    /// Creates a configuration builder.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder::default()
    }

    /// Checks the configuration for values the executor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(RegistryError::InvalidConfig {
                reason: "batch workers must be at least 1".to_string(),
            });
        }
        if self.max_history == Some(0) {
            return Err(RegistryError::InvalidConfig {
                reason: "max_history must be at least 1 when set".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for `BatchConfig`.
#[derive(Debug, Default)]
pub struct BatchConfigBuilder {
    workers: Option<usize>,
    max_history: Option<Option<usize>>,
}

impl BatchConfigBuilder {
    /// Sets the worker concurrency limit.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Caps the number of finished operations kept in the store.
    pub fn max_history(mut self, max: usize) -> Self {
        self.max_history = Some(Some(max));
        self
    }

    /// Keeps every operation until the caller removes it.
    pub fn unbounded_history(mut self) -> Self {
        self.max_history = Some(None);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> BatchConfig {
        let defaults = BatchConfig::default();
        BatchConfig {
            workers: self.workers.unwrap_or(defaults.workers),
            max_history: self.max_history.unwrap_or(defaults.max_history),
        }
    }
}

/// Configuration for endpoint health monitoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    /// Consecutive failures before the circuit opens.
    pub threshold: u32,

    /// Time an open circuit waits after the last check before a trial probe.
    pub retry_delay: Duration,

    /// Timeout for a single probe.
    pub timeout: Duration,

    /// Interval between checks.
    pub check_interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            retry_delay: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            check_interval: Duration::from_secs(10),
        }
    }
}

impl HealthConfig {
    /// Creates a configuration builder.
    pub fn builder() -> HealthConfigBuilder {
        HealthConfigBuilder::default()
    }

    /// Checks the configuration for values the monitor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 {
            return Err(RegistryError::InvalidConfig {
                reason: "failure threshold must be at least 1".to_string(),
            });
        }
        if self.check_interval.is_zero() {
            return Err(RegistryError::InvalidConfig {
                reason: "check interval must be greater than zero".to_string(),
            });
        }
        if self.timeout.is_zero() {
            return Err(RegistryError::InvalidConfig {
                reason: "probe timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for `HealthConfig`.
#[derive(Debug, Default)]
pub struct HealthConfigBuilder {
    threshold: Option<u32>,
    retry_delay: Option<Duration>,
    timeout: Option<Duration>,
    check_interval: Option<Duration>,
}

impl HealthConfigBuilder {
    /// Sets the failure threshold.
    pub fn threshold(mut self, threshold: u32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Sets the retry delay for open circuits.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Sets the probe timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the check interval.
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = Some(interval);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> HealthConfig {
        let defaults = HealthConfig::default();
        HealthConfig {
            threshold: self.threshold.unwrap_or(defaults.threshold),
            retry_delay: self.retry_delay.unwrap_or(defaults.retry_delay),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            check_interval: self.check_interval.unwrap_or(defaults.check_interval),
        }
    }
}
