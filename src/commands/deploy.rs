// ABOUTME: Deploy command implementation.
// ABOUTME: Runs the driver with Ctrl-C wired to cancellation and prints the report.

use shipwright::deploy::{Driver, Phase};
use shipwright::error::{Error, Result};
use shipwright::output::Output;
use tokio_util::sync::CancellationToken;

use super::SystemSeams;
use crate::cli::SourceArgs;

/// Deploy the stack on this host.
pub async fn deploy(
    args: &SourceArgs,
    force: bool,
    cancel: CancellationToken,
    mut output: Output,
) -> Result<()> {
    let sources = super::sources(args)?;
    let inventory = super::inventory(args)?;

    output.start_timer();
    output.progress(&format!(
        "Deploying {} service(s) on this host",
        inventory.len()
    ));

    let system = SystemSeams::default();
    let driver = Driver::new(system.seams(&output), cancel);
    let report = driver.deploy(&sources, inventory, force).await;
    output.report(&report);

    if report.succeeded() {
        Ok(())
    } else {
        Err(Error::DeployFailed {
            phase: report.failed_phase.unwrap_or(Phase::Failed),
            restored: report.fully_restored(),
        })
    }
}
