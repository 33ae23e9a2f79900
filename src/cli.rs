// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use shipwright::config::StrategyKind;
use shipwright::types::ServiceName;

#[derive(Parser)]
#[command(name = "shipwright")]
#[command(about = "Transactional single-host deployment of a service stack")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print the final result
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Print events and results as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    #[command(flatten)]
    pub sources: SourceArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where configuration and the inventory come from.
#[derive(Args)]
pub struct SourceArgs {
    /// Configuration file (default: shipwright.yml in the current directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Service inventory file (default: built-in inventory)
    #[arg(long, global = true)]
    pub inventory: Option<PathBuf>,

    /// Override a configuration value, e.g. `--set ports.http=8080`
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    pub overrides: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a shipwright.yml template in the current directory
    Init {
        /// Public domain of the deployment
        #[arg(long)]
        domain: Option<String>,

        /// Administrator e-mail address
        #[arg(long)]
        admin_email: Option<String>,

        /// Activation strategy
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Deploy the service stack on this host
    Deploy {
        /// Break an existing deploy lock
        #[arg(short, long)]
        force: bool,
    },

    /// Show deployed services and current health
    Status,

    /// Show recent output of a service
    Logs {
        service: ServiceName,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = 100)]
        lines: u32,
    },

    /// Start deployed services (all when none given)
    Start { services: Vec<ServiceName> },

    /// Stop deployed services (all when none given)
    Stop { services: Vec<ServiceName> },

    /// Restart deployed services (all when none given)
    Restart { services: Vec<ServiceName> },

    /// Undo the recorded deployment and restore what it replaced
    Rollback {
        /// Break an existing deploy lock
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    Container,
    Binary,
}

impl From<StrategyArg> for StrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Container => StrategyKind::Container,
            StrategyArg::Binary => StrategyKind::Binary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_overrides_and_services() {
        let cli = Cli::try_parse_from([
            "shipwright",
            "--set",
            "ports.http=8080",
            "restart",
            "console",
            "gateway",
        ])
        .unwrap();
        assert_eq!(cli.sources.overrides, vec!["ports.http=8080"]);
        match cli.command {
            Commands::Restart { services } => assert_eq!(services.len(), 2),
            _ => panic!("expected restart"),
        }
    }

    #[test]
    fn rejects_invalid_service_names() {
        assert!(Cli::try_parse_from(["shipwright", "logs", "Not A Name"]).is_err());
    }
}
