//! Endpoint health records and the circuit-breaker state machine.
//!
//! The transitions live on [`HealthCheck`] so they can be driven directly
//! with explicit timestamps; the monitor only feeds them probe results.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tokio::time::Instant;

/// Health of an endpoint, derived from its consecutive-failure count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No check has run yet.
    Unknown,
    /// Last check succeeded.
    Healthy,
    /// Failing, but below the threshold.
    Degraded,
    /// At or above the failure threshold.
    Unhealthy,
}

impl HealthStatus {
    /// Returns a string representation for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Circuit-breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Checks run every interval.
    Closed,
    /// One trial probe is in progress.
    HalfOpen,
    /// Checks are skipped until the retry delay has passed.
    Open,
}

impl CircuitState {
    /// Returns a string representation for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::HalfOpen => "half-open",
            Self::Open => "open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What to do on a monitoring tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeGate {
    /// Circuit is open and the retry delay has not passed.
    Skip,
    /// Regular probe.
    Probe,
    /// Trial probe; the circuit was just moved to half-open.
    Trial,
}

/// Per-endpoint health record.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Monitored endpoint.
    pub endpoint: String,

    /// Current health status.
    pub status: HealthStatus,

    /// Current circuit state.
    pub circuit: CircuitState,

    /// Latency of the last check.
    #[serde(rename = "latency_ms", serialize_with = "serialize_millis")]
    pub latency: Duration,

    /// Last error, cleared on success.
    pub error: String,

    /// Wall-clock time of the last check.
    pub last_check: Option<DateTime<Utc>>,

    /// Consecutive failures, reset on success.
    pub consecutive: u32,

    /// Checks attempted. Never reset.
    pub attempts: u64,

    #[serde(skip)]
    checked_at: Option<Instant>,
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

impl HealthCheck {
    /// Creates a record for a newly registered endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            status: HealthStatus::Unknown,
            circuit: CircuitState::Closed,
            latency: Duration::ZERO,
            error: String::new(),
            last_check: None,
            consecutive: 0,
            attempts: 0,
            checked_at: None,
        }
    }

    /// Decides whether a tick should probe.
    ///
    /// An open circuit skips until `retry_delay` has passed since the last
    /// check, then moves to half-open for one trial probe.
    pub fn gate(&mut self, now: Instant, retry_delay: Duration) -> ProbeGate {
        if self.circuit != CircuitState::Open {
            return ProbeGate::Probe;
        }

        let waited = self
            .checked_at
            .map_or(retry_delay, |at| now.saturating_duration_since(at));
        if waited < retry_delay {
            return ProbeGate::Skip;
        }

        self.circuit = CircuitState::HalfOpen;
        ProbeGate::Trial
    }

    /// Returns a half-open circuit to open when its trial probe never
    /// reported back.
    pub fn abandon_trial(&mut self) {
        if self.circuit == CircuitState::HalfOpen {
            self.circuit = CircuitState::Open;
        }
    }

    /// Applies a probe outcome. Returns the new circuit state if it changed.
    ///
    /// A failed trial probe reopens the circuit straight away; otherwise the
    /// circuit opens once `consecutive` reaches `threshold`.
    pub fn record(
        &mut self,
        error: Option<String>,
        latency: Duration,
        now: Instant,
        threshold: u32,
    ) -> Option<CircuitState> {
        let previous = self.circuit;
        self.checked_at = Some(now);
        self.last_check = Some(Utc::now());
        self.latency = latency;
        self.attempts += 1;

        match error {
            Some(error) => {
                self.error = error;
                self.consecutive = self.consecutive.saturating_add(1);
                if self.consecutive >= threshold {
                    self.status = HealthStatus::Unhealthy;
                    self.circuit = CircuitState::Open;
                } else {
                    self.status = HealthStatus::Degraded;
                }
                if previous == CircuitState::HalfOpen {
                    self.circuit = CircuitState::Open;
                }
            }
            None => {
                self.error.clear();
                self.consecutive = 0;
                self.status = HealthStatus::Healthy;
                self.circuit = CircuitState::Closed;
            }
        }

        (self.circuit != previous).then_some(self.circuit)
    }

    /// Time since the last check, if one has run.
    pub fn age(&self) -> Option<Duration> {
        self.checked_at.map(|at| at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RETRY: Duration = Duration::from_secs(30);

    fn fail(check: &mut HealthCheck, now: Instant) -> Option<CircuitState> {
        check.record(Some("connection refused".into()), Duration::from_millis(5), now, 3)
    }

    #[test]
    fn test_display() {
        assert_eq!(HealthStatus::Degraded.to_string(), "degraded");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
    }

    #[test]
    fn test_new_is_unknown_closed() {
        let check = HealthCheck::new("https://registry.example.com");
        assert_eq!(check.status, HealthStatus::Unknown);
        assert_eq!(check.circuit, CircuitState::Closed);
        assert_eq!(check.attempts, 0);
        assert!(check.age().is_none());
    }

    #[test]
    fn test_failures_degrade_then_open() {
        let now = Instant::now();
        let mut check = HealthCheck::new("r");

        assert_eq!(fail(&mut check, now), None);
        assert_eq!(check.status, HealthStatus::Degraded);
        assert_eq!(fail(&mut check, now), None);
        assert_eq!(check.consecutive, 2);

        assert_eq!(fail(&mut check, now), Some(CircuitState::Open));
        assert_eq!(check.status, HealthStatus::Unhealthy);
        assert_eq!(check.error, "connection refused");
        assert_eq!(check.attempts, 3);
    }

    #[test]
    fn test_abandoned_trial_reopens() {
        let start = Instant::now();
        let mut check = HealthCheck::new("r");
        for _ in 0..3 {
            fail(&mut check, start);
        }
        assert_eq!(check.gate(start + RETRY, RETRY), ProbeGate::Trial);

        check.abandon_trial();
        assert_eq!(check.circuit, CircuitState::Open);
        assert_eq!(check.attempts, 3);

        // Closed circuits are left alone.
        let mut healthy = HealthCheck::new("h");
        healthy.abandon_trial();
        assert_eq!(healthy.circuit, CircuitState::Closed);
    }

    #[test]
    fn test_open_circuit_skips_until_retry_delay() {
        let start = Instant::now();
        let mut check = HealthCheck::new("r");
        for _ in 0..3 {
            fail(&mut check, start);
        }

        assert_eq!(check.gate(start + Duration::from_secs(10), RETRY), ProbeGate::Skip);
        assert_eq!(check.circuit, CircuitState::Open);

        assert_eq!(check.gate(start + RETRY, RETRY), ProbeGate::Trial);
        assert_eq!(check.circuit, CircuitState::HalfOpen);
    }

    #[test]
    fn test_trial_success_closes() {
        let start = Instant::now();
        let mut check = HealthCheck::new("r");
        for _ in 0..3 {
            fail(&mut check, start);
        }
        check.gate(start + RETRY, RETRY);

        let changed = check.record(None, Duration::from_millis(12), start + RETRY, 3);
        assert_eq!(changed, Some(CircuitState::Closed));
        assert_eq!(check.status, HealthStatus::Healthy);
        assert_eq!(check.consecutive, 0);
        assert!(check.error.is_empty());
        assert_eq!(check.attempts, 4);
    }

    #[test]
    fn test_trial_failure_reopens_immediately() {
        let start = Instant::now();
        let mut check = HealthCheck::new("r");
        check.record(Some("down".into()), Duration::ZERO, start, 1);
        assert_eq!(check.circuit, CircuitState::Open);

        // A high threshold would not be reached by one failure; the trial
        // still reopens.
        check.gate(start + RETRY, RETRY);
        let changed = check.record(Some("down".into()), Duration::ZERO, start + RETRY, 100);
        assert_eq!(changed, Some(CircuitState::Open));
        assert_eq!(check.status, HealthStatus::Degraded);
    }

    #[test]
    fn test_closed_circuit_always_probes() {
        let mut check = HealthCheck::new("r");
        assert_eq!(check.gate(Instant::now(), RETRY), ProbeGate::Probe);
    }

    #[test]
    fn test_serialize() {
        let mut check = HealthCheck::new("r");
        check.record(None, Duration::from_millis(42), Instant::now(), 3);
        let json = serde_json::to_value(&check).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["circuit"], "closed");
        assert_eq!(json["latency_ms"], 42);
        assert!(json.get("checked_at").is_none());
    }
}
