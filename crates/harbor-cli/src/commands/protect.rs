//! Tag protection commands.
//!
//! Policies live in a YAML policy file; `add` validates a policy and
//! optionally appends it to the file, `check` evaluates a tag against the
//! file, and `list` prints it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use harbor_audit::AuditLogger;
use harbor_registry::{PolicyDefinition, PolicySet, ProtectionDecision, TagProtection};
use serde::Serialize;

use super::{parse_duration, OutputFormat};

/// Arguments for the protect command group.
#[derive(Args)]
pub struct ProtectArgs {
    #[command(subcommand)]
    pub command: ProtectCommand,
}

/// Protect subcommands.
#[derive(Subcommand)]
pub enum ProtectCommand {
    /// Add a tag protection policy
    Add(AddArgs),

    /// Check whether a tag may be modified or deleted
    Check(CheckArgs),

    /// List policies in a policy file
    List(ListArgs),
}

/// Arguments for `protect add`.
#[derive(Args)]
pub struct AddArgs {
    /// Policy name
    #[arg(long)]
    pub name: String,

    /// Tag pattern regex, matched against `repository:tag`
    #[arg(long)]
    pub pattern: String,

    /// Make matching tags immutable
    #[arg(long)]
    pub immutable: bool,

    /// Protection window for new tags (e.g. 168h)
    #[arg(long, value_parser = parse_duration)]
    pub max_age: Option<Duration>,

    /// Allow matching tags to be deleted
    #[arg(long)]
    pub allow_delete: bool,

    /// Priority when several policies match
    #[arg(long, default_value = "10", allow_negative_numbers = true)]
    pub priority: i32,

    /// Policy file to append the policy to
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}

/// Arguments for `protect check`.
#[derive(Args)]
pub struct CheckArgs {
    /// Tag reference (`repository:tag`)
    pub reference: String,

    /// Policy file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Age of the tag (e.g. 24h)
    #[arg(long, value_parser = parse_duration, default_value = "0")]
    pub age: Duration,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for `protect list`.
#[derive(Args)]
pub struct ListArgs {
    /// Policy file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Runs a protect subcommand.
pub fn run(args: ProtectArgs) -> Result<()> {
    match args.command {
        ProtectCommand::Add(args) => add(&args),
        ProtectCommand::Check(args) => check(&args),
        ProtectCommand::List(args) => list(&args),
    }
}

fn add(args: &AddArgs) -> Result<()> {
    let definition = PolicyDefinition {
        name: args.name.clone(),
        pattern: args.pattern.clone(),
        immutable: args.immutable,
        max_age_secs: args.max_age.map_or(0, |d| d.as_secs()),
        allow_delete: args.allow_delete,
        priority: args.priority,
    };

    // Validate through a scratch engine so file and engine agree.
    let engine = TagProtection::new(Arc::new(AuditLogger::tracing()));
    engine
        .add_policy(definition.compile()?)
        .context("Failed to add policy")?;

    if let Some(path) = &args.file {
        let mut set = load_or_default(path)?;
        set.policies.push(definition);
        save(path, &set)?;
        println!("✓ Policy '{}' added to {}", args.name, path.display());
    } else {
        println!("✓ Policy '{}' is valid", args.name);
    }

    println!("  Pattern: {}", args.pattern);
    println!("  Immutable: {}", args.immutable);
    if let Some(max_age) = args.max_age {
        println!("  Max age: {}s", max_age.as_secs());
    }
    println!("  Allow delete: {}", args.allow_delete);
    println!("  Priority: {}", args.priority);
    Ok(())
}

fn check(args: &CheckArgs) -> Result<()> {
    let (repository, tag) = split_reference(&args.reference)?;

    let set = PolicySet::from_file(&args.file)
        .with_context(|| format!("Failed to load policies from {}", args.file.display()))?;
    let engine = TagProtection::new(Arc::new(AuditLogger::tracing()));
    set.apply(&engine).context("Invalid policy file")?;

    let report = CheckReport {
        reference: args.reference.clone(),
        age_secs: args.age.as_secs(),
        modify: engine.can_modify(repository, tag, args.age),
        delete: engine.can_delete(repository, tag),
    };

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_check(&report),
    }
    Ok(())
}

fn list(args: &ListArgs) -> Result<()> {
    let set = PolicySet::from_file(&args.file)
        .with_context(|| format!("Failed to load policies from {}", args.file.display()))?;

    if args.output == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&set)?);
        return Ok(());
    }

    if set.is_empty() {
        println!("No policies defined");
        return Ok(());
    }

    println!("{} policies:", set.len());
    for policy in &set.policies {
        let mut flags = Vec::new();
        if policy.immutable {
            flags.push("immutable".to_string());
        }
        if policy.max_age_secs > 0 {
            flags.push(format!("max-age={}s", policy.max_age_secs));
        }
        if policy.allow_delete {
            flags.push("allow-delete".to_string());
        }
        println!(
            "  [{:>3}] {} '{}' {}",
            policy.priority,
            policy.name,
            policy.pattern,
            flags.join(", ")
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct CheckReport {
    reference: String,
    age_secs: u64,
    modify: ProtectionDecision,
    delete: ProtectionDecision,
}

fn print_check(report: &CheckReport) {
    println!("Tag: {}", report.reference);
    print_decision("Modify", &report.modify);
    print_decision("Delete", &report.delete);
}

fn print_decision(action: &str, decision: &ProtectionDecision) {
    if decision.allowed {
        println!("  ✅ {action}: allowed");
    } else {
        println!("  ❌ {action}: denied ({})", decision.reason);
    }
}

/// Splits `repository:tag` at the last colon, so registry ports survive.
fn split_reference(reference: &str) -> Result<(&str, &str)> {
    match reference.rsplit_once(':') {
        Some((repository, tag)) if !repository.is_empty() && !tag.is_empty() && !tag.contains('/') => {
            Ok((repository, tag))
        }
        _ => anyhow::bail!("Invalid tag reference '{reference}', expected repository:tag"),
    }
}

fn load_or_default(path: &Path) -> Result<PolicySet> {
    if path.exists() {
        PolicySet::from_file(path)
            .with_context(|| format!("Failed to load policies from {}", path.display()))
    } else {
        Ok(PolicySet::default())
    }
}

fn save(path: &Path, set: &PolicySet) -> Result<()> {
    let yaml = serde_yaml::to_string(set).context("Failed to serialize policies")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn add_args(name: &str, pattern: &str, file: &Path) -> AddArgs {
        AddArgs {
            name: name.to_string(),
            pattern: pattern.to_string(),
            immutable: false,
            max_age: None,
            allow_delete: false,
            priority: 10,
            file: Some(file.to_path_buf()),
        }
    }

    #[test]
    fn test_split_reference() {
        assert_eq!(
            split_reference("library/nginx:v1.2.3").unwrap(),
            ("library/nginx", "v1.2.3")
        );
        assert_eq!(
            split_reference("localhost:5000/app:latest").unwrap(),
            ("localhost:5000/app", "latest")
        );
        assert!(split_reference("library/nginx").is_err());
        assert!(split_reference("localhost:5000/app").is_err());
        assert!(split_reference(":tag").is_err());
    }

    #[test]
    fn test_add_appends_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("policies.yaml");

        let mut first = add_args("prod-immutable", r".*:v\d+\.\d+\.\d+$", &path);
        first.immutable = true;
        add(&first).unwrap();
        add(&add_args("recent", ".*:.*", &path)).unwrap();

        let set = PolicySet::from_file(&path).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.policies[0].immutable);
        assert_eq!(set.policies[1].name, "recent");
    }

    #[test]
    fn test_add_rejects_invalid_pattern() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("policies.yaml");

        assert!(add(&add_args("broken", "([a-z", &path)).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_check_and_list_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("policies.yaml");
        add(&add_args("any", ".*", &path)).unwrap();

        check(&CheckArgs {
            reference: "library/nginx:latest".to_string(),
            file: path.clone(),
            age: Duration::ZERO,
            output: OutputFormat::Json,
        })
        .unwrap();
        list(&ListArgs {
            file: path,
            output: OutputFormat::Text,
        })
        .unwrap();
    }
}
