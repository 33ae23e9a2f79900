// ABOUTME: Command module aggregator for the shipwright CLI.
// ABOUTME: Holds the real host seams and the source loading shared by every command.

mod deploy;
mod lifecycle;
mod rollback;

pub use deploy::deploy;
pub use lifecycle::{Lifecycle, lifecycle, logs, status};
pub use rollback::rollback;

use shipwright::config::{Config, ConfigResolver, ConfigSources};
use shipwright::deploy::{Seams, SystemStrategies};
use shipwright::error::Result;
use shipwright::events::EventSink;
use shipwright::host::{HttpProbe, SystemCommandRunner, SystemHost};
use shipwright::inventory::{Inventory, default_inventory};

use crate::cli::SourceArgs;

/// Implementations of every seam backed by this machine.
#[derive(Default)]
pub struct SystemSeams {
    host: SystemHost,
    runner: SystemCommandRunner,
    probe: HttpProbe,
    strategies: SystemStrategies,
}

impl SystemSeams {
    pub fn seams<'a>(&'a self, events: &'a dyn EventSink) -> Seams<'a> {
        Seams {
            host: &self.host,
            runner: &self.runner,
            endpoint: &self.probe,
            strategies: &self.strategies,
            events,
        }
    }

    pub fn host(&self) -> &SystemHost {
        &self.host
    }

    pub fn probe(&self) -> &HttpProbe {
        &self.probe
    }

    pub fn strategies(&self) -> &SystemStrategies {
        &self.strategies
    }
}

/// Gather configuration layers from the current directory, the environment
/// and `--set` pairs.
pub fn sources(args: &SourceArgs) -> Result<ConfigSources> {
    let cwd = std::env::current_dir()?;
    Ok(ConfigSources::gather(
        &cwd,
        args.config.as_deref(),
        &args.overrides,
    )?)
}

/// Resolve the snapshot for commands that act on an existing deployment.
pub fn resolve(args: &SourceArgs) -> Result<Config> {
    Ok(ConfigResolver::resolve(&sources(args)?)?)
}

pub fn inventory(args: &SourceArgs) -> Result<Inventory> {
    match &args.inventory {
        Some(path) => Ok(Inventory::load(path)?),
        None => Ok(default_inventory()?),
    }
}
