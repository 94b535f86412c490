//! Batch tag operations.
//!
//! Batches run against the simulated registry client. The command waits for
//! the batch to finish and prints per-target results.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use harbor_audit::AuditLogger;
use harbor_registry::{
    BatchConfig, BatchExecutor, BatchHandle, BatchOperation, RegistryClient,
    SimulatedRegistryClient,
};
use serde::Serialize;

use super::OutputFormat;

/// Arguments for the batch command group.
#[derive(Args)]
pub struct BatchArgs {
    #[command(subcommand)]
    pub command: BatchCommand,

    /// Maximum concurrent target actions
    #[arg(long, global = true, default_value = "5")]
    pub workers: usize,

    /// Mark a target as failing in the simulated registry (repeatable)
    #[arg(long = "simulate-failure", global = true, hide = true)]
    pub simulate_failure: Vec<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Batch subcommands.
#[derive(Subcommand)]
pub enum BatchCommand {
    /// Delete multiple tags in batch
    Delete {
        /// Tags to delete (`repository:tag`)
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Copy multiple tags in batch
    Copy {
        /// Destination prefix
        #[arg(long)]
        dest: String,

        /// Tags to copy
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Retag multiple images in batch
    Retag {
        /// Tag mapping `source=dest` (repeatable)
        #[arg(long = "mapping", value_parser = parse_mapping, required = true)]
        mappings: Vec<(String, String)>,
    },
}

/// Execute a batch command.
pub async fn execute(args: BatchArgs) -> Result<()> {
    let client = SimulatedRegistryClient::new();
    for target in &args.simulate_failure {
        client.set_failing(target.clone(), true);
    }
    let client: Arc<dyn RegistryClient> = Arc::new(client);

    let config = BatchConfig::builder().workers(args.workers).build();
    let executor = BatchExecutor::new(config, client, Arc::new(AuditLogger::tracing()))
        .context("Invalid batch configuration")?;

    let handle = submit(&executor, args.command)?;
    if args.output == OutputFormat::Text {
        print_initiated(&handle);
    }

    let op = handle.wait().await.context("Batch did not complete")?;

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&BatchOutput::from(&op))?),
        OutputFormat::Text => print_text_output(&op),
    }

    if op.summary().failed > 0 {
        anyhow::bail!("{} of {} targets failed", op.summary().failed, op.targets.len());
    }
    Ok(())
}

fn submit(executor: &BatchExecutor, command: BatchCommand) -> Result<BatchHandle> {
    let handle = match command {
        BatchCommand::Delete { tags } => executor.delete_tags(tags),
        BatchCommand::Copy { dest, tags } => {
            if dest.trim().is_empty() {
                anyhow::bail!("--dest cannot be empty");
            }
            executor.copy_tags(tags, &dest)
        }
        BatchCommand::Retag { mappings } => executor.retag(mappings),
    };
    handle.context("Failed to submit batch")
}

fn parse_mapping(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((source, dest)) if !source.is_empty() && !dest.is_empty() => {
            Ok((source.to_string(), dest.to_string()))
        }
        _ => Err(format!("invalid mapping '{input}', expected source=dest")),
    }
}

fn print_initiated(handle: &BatchHandle) {
    if let Some(op) = handle.snapshot() {
        println!("✓ Batch {} initiated (ID: {})", op.op_type, op.id);
        println!("  Targets: {}", op.targets.len());
        println!("  Status: {}", op.status);
    }
}

fn print_text_output(op: &BatchOperation) {
    let summary = op.summary();
    println!("\n📊 Batch Results:");
    println!("   Status: {}", op.status);
    println!("   ✅ Succeeded: {} / {}", summary.succeeded, summary.total);
    if summary.failed > 0 {
        println!("   ❌ Failed: {}", summary.failed);
    }
    if let Some(elapsed) = op.elapsed() {
        println!("   Duration: {}ms", elapsed.as_millis());
    }

    println!("\n   Target Details:");
    for r in &op.results {
        if r.success {
            println!("   ✅ {} ({}ms)", r.target, r.elapsed.as_millis());
        } else {
            println!("   ❌ {} - {}", r.target, r.error);
        }
    }
}

#[derive(Serialize)]
struct BatchOutput<'a> {
    #[serde(flatten)]
    operation: &'a BatchOperation,
    succeeded: usize,
    failed: usize,
    duration_ms: Option<u128>,
}

impl<'a> From<&'a BatchOperation> for BatchOutput<'a> {
    fn from(op: &'a BatchOperation) -> Self {
        let summary = op.summary();
        Self {
            operation: op,
            succeeded: summary.succeeded,
            failed: summary.failed,
            duration_ms: op.elapsed().map(|d| d.as_millis()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mapping() {
        assert_eq!(
            parse_mapping("library/app:latest=library/app:v1.0.0").unwrap(),
            (
                "library/app:latest".to_string(),
                "library/app:v1.0.0".to_string()
            )
        );
        assert!(parse_mapping("library/app:latest").is_err());
        assert!(parse_mapping("=dest").is_err());
        assert!(parse_mapping("src=").is_err());
    }

    #[tokio::test]
    async fn test_execute_delete() {
        let args = BatchArgs {
            command: BatchCommand::Delete {
                tags: vec!["library/nginx:old".to_string()],
            },
            workers: 2,
            simulate_failure: Vec::new(),
            output: OutputFormat::Json,
        };
        execute(args).await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_reports_failures() {
        let args = BatchArgs {
            command: BatchCommand::Copy {
                dest: "backup/".to_string(),
                tags: vec!["a:1".to_string(), "b:2".to_string()],
            },
            workers: 2,
            simulate_failure: vec!["b:2".to_string()],
            output: OutputFormat::Text,
        };
        let err = execute(args).await.unwrap_err();
        assert!(err.to_string().contains("1 of 2"));
    }

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        let args = BatchArgs {
            command: BatchCommand::Delete {
                tags: vec!["a:1".to_string()],
            },
            workers: 0,
            simulate_failure: Vec::new(),
            output: OutputFormat::Text,
        };
        assert!(execute(args).await.is_err());
    }
}
