//! Endpoint health monitoring command.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use harbor_audit::AuditLogger;
use harbor_registry::{HealthCheck, HealthConfig, HealthMonitor, SimulatedRegistryClient};
use tracing::info;

use super::{parse_duration, OutputFormat};

/// Arguments for the health command group.
#[derive(Args)]
pub struct HealthArgs {
    #[command(subcommand)]
    pub command: HealthCommand,
}

/// Health subcommands.
#[derive(Subcommand)]
pub enum HealthCommand {
    /// Monitor registry endpoint health
    Monitor(MonitorArgs),
}

/// Arguments for `health monitor`.
#[derive(Args)]
pub struct MonitorArgs {
    /// Endpoints to monitor
    #[arg(required = true)]
    pub endpoints: Vec<String>,

    /// Failure threshold before the circuit opens
    #[arg(long, default_value = "3")]
    pub threshold: u32,

    /// Delay before retrying an endpoint with an open circuit
    #[arg(long, value_parser = parse_duration, default_value = "30s")]
    pub retry_delay: Duration,

    /// Health check timeout
    #[arg(long, value_parser = parse_duration, default_value = "5s")]
    pub timeout: Duration,

    /// Check interval
    #[arg(long, value_parser = parse_duration, default_value = "10s")]
    pub interval: Duration,

    /// How long to monitor before printing the report
    #[arg(long, value_parser = parse_duration, default_value = "10s")]
    pub duration: Duration,

    /// Mark an endpoint as failing in the simulated registry (repeatable)
    #[arg(long = "simulate-failure", hide = true)]
    pub simulate_failure: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Execute a health command.
pub async fn execute(args: HealthArgs) -> Result<()> {
    match args.command {
        HealthCommand::Monitor(args) => monitor(args).await,
    }
}

async fn monitor(args: MonitorArgs) -> Result<()> {
    let config = HealthConfig::builder()
        .threshold(args.threshold)
        .retry_delay(args.retry_delay)
        .timeout(args.timeout)
        .check_interval(args.interval)
        .build();

    let client = SimulatedRegistryClient::new();
    for endpoint in &args.simulate_failure {
        client.set_failing(endpoint.clone(), true);
    }

    let monitor = HealthMonitor::new(config, Arc::new(client), Arc::new(AuditLogger::tracing()))
        .context("Invalid health monitor configuration")?;
    for endpoint in &args.endpoints {
        monitor.register(endpoint.clone());
    }

    let running = monitor.start();
    if args.output == OutputFormat::Text {
        println!("✓ Monitoring {} endpoints", args.endpoints.len());
        println!("  Threshold: {} consecutive failures", args.threshold);
        println!("  Check interval: {}s", args.interval.as_secs_f64());
        println!("\nPress Ctrl+C to stop...");
    }

    tokio::select! {
        () = tokio::time::sleep(args.duration) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Interrupted, stopping monitor");
        }
    }

    let statuses: BTreeMap<String, HealthCheck> = running.stop().await.into_iter().collect();

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&statuses)?),
        OutputFormat::Text => print_text_output(&statuses),
    }
    Ok(())
}

fn print_text_output(statuses: &BTreeMap<String, HealthCheck>) {
    println!("\n=== Health Status ===");
    for (endpoint, check) in statuses {
        println!(
            "{endpoint}: {} (circuit: {}, attempts: {}, latency: {}ms)",
            check.status,
            check.circuit,
            check.attempts,
            check.latency.as_millis()
        );
        if !check.error.is_empty() {
            println!("  last error: {}", check.error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(endpoints: &[&str]) -> MonitorArgs {
        MonitorArgs {
            endpoints: endpoints.iter().map(ToString::to_string).collect(),
            threshold: 2,
            retry_delay: Duration::from_secs(30),
            timeout: Duration::from_secs(1),
            interval: Duration::from_millis(100),
            duration: Duration::from_millis(350),
            simulate_failure: Vec::new(),
            output: OutputFormat::Json,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_runs_for_duration() {
        let mut args = args(&["https://up.example.com", "https://down.example.com"]);
        args.simulate_failure = vec!["https://down.example.com".to_string()];
        monitor(args).await.unwrap();
    }

    #[tokio::test]
    async fn test_monitor_rejects_zero_threshold() {
        let mut args = args(&["https://up.example.com"]);
        args.threshold = 0;
        assert!(monitor(args).await.is_err());
    }
}
