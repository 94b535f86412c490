//! Periodic endpoint health monitoring.
//!
//! Endpoints are registered on an idle [`HealthMonitor`]. [`HealthMonitor::start`]
//! consumes it and spawns one task per endpoint, so the endpoint set is fixed
//! once monitoring runs. [`RunningMonitor::stop`] signals every task and waits
//! for all of them to exit.

use std::collections::HashMap;
use std::sync::Arc;

use harbor_audit::{AuditLogger, HealthEvent};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::client::RegistryClient;
use crate::config::HealthConfig;
use crate::error::{RegistryError, Result};
use crate::health::{CircuitState, HealthCheck, ProbeGate};

type CheckMap = RwLock<HashMap<String, HealthCheck>>;

/// Reopens the circuit if a trial probe is dropped before its result is
/// recorded, e.g. when the monitor stops mid-probe.
struct TrialGuard<'a> {
    checks: &'a CheckMap,
    endpoint: &'a str,
    armed: bool,
}

impl TrialGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Some(check) = self.checks.write().get_mut(self.endpoint) {
                check.abandon_trial();
                debug!(endpoint = %self.endpoint, "Trial probe cancelled, circuit reopened");
            }
        }
    }
}

struct MonitorShared {
    config: HealthConfig,
    client: Arc<dyn RegistryClient>,
    audit: Arc<AuditLogger>,
    checks: CheckMap,
}

impl MonitorShared {
    fn status(&self, endpoint: &str) -> Option<HealthCheck> {
        self.checks.read().get(endpoint).cloned()
    }

    fn statuses(&self) -> HashMap<String, HealthCheck> {
        self.checks.read().clone()
    }

    /// Runs one monitoring tick for an endpoint.
    async fn check(&self, endpoint: &str) {
        let gate = {
            let mut checks = self.checks.write();
            let Some(check) = checks.get_mut(endpoint) else {
                return;
            };
            let gate = check.gate(Instant::now(), self.config.retry_delay);
            (gate, check.consecutive)
        };

        let trial = match gate {
            (ProbeGate::Skip, _) => {
                debug!(endpoint = %endpoint, "Circuit open, skipping check");
                return;
            }
            (ProbeGate::Trial, consecutive) => {
                info!(endpoint = %endpoint, "Circuit half-open, sending trial probe");
                self.audit
                    .record(&HealthEvent::circuit_half_opened(endpoint, consecutive));
                Some(TrialGuard {
                    checks: &self.checks,
                    endpoint,
                    armed: true,
                })
            }
            (ProbeGate::Probe, _) => None,
        };

        let timeout = self.config.timeout;
        let start = Instant::now();
        let outcome =
            tokio::time::timeout(timeout, self.client.probe_endpoint(endpoint, timeout)).await;
        let latency = start.elapsed();

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(
                RegistryError::ProbeTimeout {
                    endpoint: endpoint.to_string(),
                    timeout,
                }
                .to_string(),
            ),
        };

        let (changed, consecutive) = {
            let mut checks = self.checks.write();
            let Some(check) = checks.get_mut(endpoint) else {
                return;
            };
            let changed = check.record(
                failure.clone(),
                latency,
                Instant::now(),
                self.config.threshold,
            );
            (changed, check.consecutive)
        };
        if let Some(trial) = trial {
            trial.disarm();
        }

        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        match (changed, failure) {
            (Some(CircuitState::Open), failure) => {
                let reason = failure.unwrap_or_default();
                error!(
                    endpoint = %endpoint,
                    consecutive_failures = consecutive,
                    error = %reason,
                    "Endpoint unhealthy, circuit opened"
                );
                self.audit
                    .record(&HealthEvent::circuit_opened(endpoint, consecutive, &reason));
            }
            (Some(CircuitState::Closed), _) => {
                info!(endpoint = %endpoint, latency_ms, "Endpoint recovered, circuit closed");
                self.audit
                    .record(&HealthEvent::circuit_closed(endpoint, latency_ms));
            }
            (_, Some(reason)) => {
                warn!(
                    endpoint = %endpoint,
                    consecutive_failures = consecutive,
                    error = %reason,
                    "Health check failed"
                );
            }
            (_, None) => {
                debug!(endpoint = %endpoint, latency_ms, "Health check passed");
            }
        }
    }
}

/// Health monitor before monitoring starts.
pub struct HealthMonitor {
    shared: Arc<MonitorShared>,
}

impl HealthMonitor {
    /// Creates an idle monitor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration is unusable.
    pub fn new(
        config: HealthConfig,
        client: Arc<dyn RegistryClient>,
        audit: Arc<AuditLogger>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(MonitorShared {
                config,
                client,
                audit,
                checks: RwLock::new(HashMap::new()),
            }),
        })
    }

    /// Registers an endpoint. Registering an endpoint twice keeps the
    /// existing record. Returns true if the endpoint was new.
    pub fn register(&self, endpoint: impl Into<String>) -> bool {
        let endpoint = endpoint.into();
        {
            let mut checks = self.shared.checks.write();
            if checks.contains_key(&endpoint) {
                return false;
            }
            checks.insert(endpoint.clone(), HealthCheck::new(endpoint.clone()));
        }

        info!(endpoint = %endpoint, "Endpoint registered");
        self.shared.audit.record(&HealthEvent::registered(&endpoint));
        true
    }

    /// Returns the record for an endpoint.
    pub fn get_status(&self, endpoint: &str) -> Option<HealthCheck> {
        self.shared.status(endpoint)
    }

    /// Returns every endpoint's record.
    pub fn get_all_statuses(&self) -> HashMap<String, HealthCheck> {
        self.shared.statuses()
    }

    /// Returns the monitor configuration.
    pub fn config(&self) -> &HealthConfig {
        &self.shared.config
    }

    /// Starts one monitoring task per registered endpoint.
    ///
    /// The first check for each endpoint runs one interval after start.
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> RunningMonitor {
        let (shutdown, _) = broadcast::channel::<()>(1);
        let endpoints: Vec<String> = self.shared.checks.read().keys().cloned().collect();

        info!(
            endpoints = endpoints.len(),
            interval_ms = self.shared.config.check_interval.as_millis(),
            "Starting health monitor"
        );

        let tasks = endpoints
            .into_iter()
            .map(|endpoint| {
                let shared = Arc::clone(&self.shared);
                let shutdown_rx = shutdown.subscribe();
                tokio::spawn(monitor_endpoint(shared, endpoint, shutdown_rx))
            })
            .collect();

        RunningMonitor {
            shared: self.shared,
            shutdown,
            tasks,
        }
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.shared.config)
            .field("endpoints", &self.shared.checks.read().len())
            .finish_non_exhaustive()
    }
}

async fn monitor_endpoint(
    shared: Arc<MonitorShared>,
    endpoint: String,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let interval = shared.config.check_interval;
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    () = shared.check(&endpoint) => {}
                }
            }
        }
    }

    debug!(endpoint = %endpoint, "Health check task stopped");
}

/// Health monitor with its endpoint tasks running.
pub struct RunningMonitor {
    shared: Arc<MonitorShared>,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningMonitor {
    /// Returns the record for an endpoint.
    pub fn get_status(&self, endpoint: &str) -> Option<HealthCheck> {
        self.shared.status(endpoint)
    }

    /// Returns every endpoint's record.
    pub fn get_all_statuses(&self) -> HashMap<String, HealthCheck> {
        self.shared.statuses()
    }

    /// Number of running endpoint tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stops every endpoint task and waits for them to exit.
    ///
    /// Returns the final records.
    pub async fn stop(mut self) -> HashMap<String, HealthCheck> {
        info!("Stopping health monitor");
        // No receivers means no tasks were started.
        let _ = self.shutdown.send(());

        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!(error = %e, "Health check task ended abnormally");
            }
        }

        info!("Health monitor stopped");
        self.shared.statuses()
    }
}

impl Drop for RunningMonitor {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            let _ = self.shutdown.send(());
        }
    }
}

impl std::fmt::Debug for RunningMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningMonitor")
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{SimulatedLatency, SimulatedRegistryClient};
    use crate::health::HealthStatus;
    use harbor_audit::InMemoryBackend;
    use std::time::Duration;

    const ENDPOINT: &str = "https://registry.example.com";

    fn config() -> HealthConfig {
        HealthConfig::builder()
            .threshold(3)
            .retry_delay(Duration::from_secs(5))
            .timeout(Duration::from_secs(1))
            .check_interval(Duration::from_secs(1))
            .build()
    }

    fn monitor(client: Arc<SimulatedRegistryClient>) -> (HealthMonitor, Arc<InMemoryBackend>) {
        let backend = Arc::new(InMemoryBackend::new());
        let audit = Arc::new(AuditLogger::builder().with_backend(backend.clone()).build());
        (HealthMonitor::new(config(), client, audit).unwrap(), backend)
    }

    fn instant_client() -> Arc<SimulatedRegistryClient> {
        Arc::new(SimulatedRegistryClient::with_latency(SimulatedLatency::none()))
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = HealthConfig::builder().threshold(0).build();
        let result = HealthMonitor::new(config, instant_client(), Arc::new(AuditLogger::disabled()));
        assert!(result.is_err());
    }

    #[test]
    fn test_register_is_idempotent() {
        let (monitor, backend) = monitor(instant_client());
        assert!(monitor.register(ENDPOINT));
        assert!(!monitor.register(ENDPOINT));
        assert_eq!(monitor.get_all_statuses().len(), 1);
        assert_eq!(backend.events_of_type("registered").len(), 1);

        let check = monitor.get_status(ENDPOINT).unwrap();
        assert_eq!(check.status, HealthStatus::Unknown);
        assert_eq!(check.circuit, CircuitState::Closed);
        assert!(monitor.get_status("https://other.example.com").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_endpoint() {
        let (monitor, _) = monitor(instant_client());
        monitor.register(ENDPOINT);
        let running = monitor.start();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(running.get_status(ENDPOINT).unwrap().attempts, 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        let check = running.get_status(ENDPOINT).unwrap();
        assert_eq!(check.status, HealthStatus::Healthy);
        assert_eq!(check.attempts, 3);

        running.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_and_recovers() {
        let client = instant_client();
        client.set_failing(ENDPOINT, true);
        let (monitor, backend) = monitor(Arc::clone(&client));
        monitor.register(ENDPOINT);
        let running = monitor.start();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let check = running.get_status(ENDPOINT).unwrap();
        assert_eq!(check.circuit, CircuitState::Open);
        assert_eq!(check.status, HealthStatus::Unhealthy);
        assert_eq!(check.consecutive, 3);

        // Ticks inside the retry delay are skipped.
        client.set_failing(ENDPOINT, false);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(running.get_status(ENDPOINT).unwrap().attempts, 3);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let check = running.get_status(ENDPOINT).unwrap();
        assert_eq!(check.circuit, CircuitState::Closed);
        assert_eq!(check.consecutive, 0);
        assert_eq!(check.attempts, 4);

        assert_eq!(backend.events_of_type("circuit_opened").len(), 1);
        assert_eq!(backend.events_of_type("circuit_half_opened").len(), 1);
        assert_eq!(backend.events_of_type("circuit_closed").len(), 1);

        running.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_counts_as_failure() {
        let client = Arc::new(SimulatedRegistryClient::with_latency(SimulatedLatency {
            probe: Duration::from_secs(10),
            ..SimulatedLatency::none()
        }));
        let (monitor, _) = monitor(client);
        monitor.register(ENDPOINT);
        let running = monitor.start();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let check = running.get_status(ENDPOINT).unwrap();
        assert_eq!(check.status, HealthStatus::Degraded);
        assert!(check.error.contains("timed out"));
        assert!(check.latency >= Duration::from_secs(1));

        running.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_with_probe_in_flight() {
        let client = Arc::new(SimulatedRegistryClient::with_latency(SimulatedLatency {
            probe: Duration::from_secs(3600),
            ..SimulatedLatency::none()
        }));
        let config = HealthConfig::builder()
            .timeout(Duration::from_secs(7200))
            .check_interval(Duration::from_secs(1))
            .build();
        let monitor =
            HealthMonitor::new(config, client, Arc::new(AuditLogger::disabled())).unwrap();
        monitor.register(ENDPOINT);
        monitor.register("https://mirror.example.com");
        let running = monitor.start();
        assert_eq!(running.task_count(), 2);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let stopped = tokio::time::timeout(Duration::from_secs(1), running.stop()).await;
        let statuses = stopped.expect("stop should not hang");
        assert_eq!(statuses.len(), 2);
        assert!(statuses.values().all(|c| c.attempts == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_trial_leaves_circuit_open() {
        let client = Arc::new(SimulatedRegistryClient::with_latency(SimulatedLatency {
            probe: Duration::from_millis(500),
            ..SimulatedLatency::none()
        }));
        client.set_failing(ENDPOINT, true);
        let config = HealthConfig::builder()
            .threshold(1)
            .retry_delay(Duration::from_secs(2))
            .timeout(Duration::from_secs(1))
            .check_interval(Duration::from_secs(1))
            .build();
        let backend = Arc::new(InMemoryBackend::new());
        let audit = Arc::new(AuditLogger::builder().with_backend(backend.clone()).build());
        let monitor = HealthMonitor::new(config, client, audit).unwrap();
        monitor.register(ENDPOINT);
        let running = monitor.start();

        // Opens after the first check at 1s; the trial starts at 4s.
        tokio::time::sleep(Duration::from_millis(4200)).await;
        assert_eq!(
            running.get_status(ENDPOINT).unwrap().circuit,
            CircuitState::HalfOpen
        );

        let statuses = running.stop().await;
        let check = &statuses[ENDPOINT];
        assert_eq!(check.circuit, CircuitState::Open);
        assert_eq!(check.status, HealthStatus::Unhealthy);
        assert_eq!(check.attempts, 1);
        assert_eq!(backend.events_of_type("circuit_half_opened").len(), 1);
    }

    #[tokio::test]
    async fn test_stop_without_endpoints() {
        let (monitor, _) = monitor(instant_client());
        let running = monitor.start();
        assert_eq!(running.task_count(), 0);
        assert!(running.stop().await.is_empty());
    }
}
