//! CLI commands and argument parsing.

pub mod batch;
pub mod health;
pub mod protect;

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

/// Harbor - Container registry management toolkit
#[derive(Parser)]
#[command(name = "harbor")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Registry management operations
    Registry(RegistryArgs),

    /// Print version information
    Version,
}

/// Arguments for the registry command group.
#[derive(Args)]
pub struct RegistryArgs {
    #[command(subcommand)]
    pub command: RegistryCommand,
}

/// Registry subcommands.
#[derive(Subcommand)]
pub enum RegistryCommand {
    /// Manage tag protection policies
    Protect(protect::ProtectArgs),

    /// Batch operations on tags
    Batch(batch::BatchArgs),

    /// Health monitoring with circuit breaker
    Health(health::HealthArgs),
}

/// Output format shared by the registry commands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Parses durations such as `500ms`, `30s`, `5m`, `168h` or `1h30m`.
///
/// A bare number is read as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration cannot be empty".to_string());
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("invalid duration '{input}'"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid duration '{input}'"))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Some(Duration::from_millis(value)),
            "s" => Some(Duration::from_secs(value)),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "h" => value.checked_mul(3600).map(Duration::from_secs),
            "d" => value.checked_mul(86_400).map(Duration::from_secs),
            unit => return Err(format!("unknown unit '{unit}' in '{input}'")),
        };
        total = part
            .and_then(|part| total.checked_add(part))
            .ok_or_else(|| format!("duration too large: '{input}'"))?;
        rest = &rest[unit_len..];
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("168h"), Ok(Duration::from_secs(168 * 3600)));
        assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(5400)));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10w").is_err());
        assert!(parse_duration("h5").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_overflow() {
        let err = parse_duration("999999999999999999d").unwrap_err();
        assert!(err.contains("too large"));
        assert!(parse_duration("307445734561825861m").is_err());
        assert!(parse_duration("18446744073709551615s1s").is_err());
        assert!(parse_duration("99999999999999999999s").is_err());
    }

    #[test]
    fn test_parse_registry_command() {
        let cli = Cli::try_parse_from([
            "harbor",
            "registry",
            "health",
            "monitor",
            "https://registry.example.com",
            "--threshold",
            "5",
        ])
        .unwrap();

        match cli.command {
            Commands::Registry(RegistryArgs {
                command: RegistryCommand::Health(_),
            }) => {}
            _ => panic!("expected registry health command"),
        }
    }
}
