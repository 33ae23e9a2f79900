// ABOUTME: Deployment orchestration using the type state pattern.
// ABOUTME: Phases, rollback log, strategies, the driver and lifecycle control of a deployed host.

mod controller;
mod deployment;
mod driver;
mod error;
mod executor;
mod installer;
mod lock;
mod phase;
mod record;
mod report;
mod rollback;
mod state;
mod strategy;
mod transitions;

pub use controller::{ServiceController, ServiceStatus, StatusSnapshot};
pub use deployment::{Deployment, Seams};
pub use driver::Driver;
pub use error::{DeployError, DeployErrorKind};
pub use executor::DeploymentExecutor;
pub use installer::{DependencyInstaller, InstallSummary, Removal, Requirement};
pub use lock::{DeployLock, LockInfo};
pub use phase::Phase;
pub use record::{DeployedService, DeploymentRecord};
pub use report::{DeploymentReport, PhaseRecord, PhaseStatus, ReportedError, RollbackSummary};
pub use rollback::{
    HostReverser, ManualIntervention, ReplaySummary, Reverser, RollbackLog, RollbackStep,
    UndoAction, UndoError,
};
pub use state::{Checked, Completed, Executed, Installed, Mutated, Resolved, RolledBack, Verified};
pub use strategy::{
    ActivationStrategy, BinaryStrategy, ContainerStrategy, SERVICE_NETWORK, StrategyError,
    StrategyProvider, SystemStrategies, activation_label,
};
pub use transitions::TransitionResult;
