// ABOUTME: Rollback command implementation.
// ABOUTME: Tears down the recorded deployment and reinstates the one it replaced.

use shipwright::deploy::{DeployError, Driver};
use shipwright::error::Result;
use shipwright::output::Output;
use tokio_util::sync::CancellationToken;

use super::SystemSeams;
use crate::cli::SourceArgs;

pub async fn rollback(args: &SourceArgs, force: bool, mut output: Output) -> Result<()> {
    let config = super::resolve(args)?;

    output.start_timer();
    output.progress(&format!("Rolling back deployment of {}", config.domain));

    let system = SystemSeams::default();
    let driver = Driver::new(system.seams(&output), CancellationToken::new());
    match driver.rollback(&config, force).await {
        Ok(summary) => {
            output.rollback_summary(&summary);
            output.success("Rollback complete!");
            Ok(())
        }
        Err(DeployError::RollbackIncomplete { steps }) => {
            for step in &steps {
                output.warning(&format!("could not undo {}: {}", step.label, step.error));
            }
            Err(DeployError::RollbackIncomplete { steps }.into())
        }
        Err(e) => Err(e.into()),
    }
}
