// ABOUTME: Lifecycle commands on a deployed host: status, logs, start, stop, restart.
// ABOUTME: Thin wrappers over the service controller.

use shipwright::deploy::ServiceController;
use shipwright::error::Result;
use shipwright::output::Output;
use shipwright::types::ServiceName;

use super::SystemSeams;
use crate::cli::SourceArgs;

#[derive(Debug, Clone, Copy)]
pub enum Lifecycle {
    Start,
    Stop,
    Restart,
}

fn open<'a>(args: &SourceArgs, system: &'a SystemSeams) -> Result<ServiceController<'a>> {
    let config = super::resolve(args)?;
    let inventory = super::inventory(args)?;
    Ok(ServiceController::open(
        config,
        inventory,
        system.strategies(),
        system.host(),
        system.probe(),
    )?)
}

pub async fn status(args: &SourceArgs, output: Output) -> Result<()> {
    let system = SystemSeams::default();
    let controller = open(args, &system)?;
    let snapshot = controller.status().await;
    output.status(&snapshot);
    Ok(())
}

pub async fn logs(args: &SourceArgs, service: &ServiceName, lines: u32, output: Output) -> Result<()> {
    let system = SystemSeams::default();
    let controller = open(args, &system)?;
    let lines = controller.logs(service, lines).await?;
    if output.mode() == shipwright::output::OutputMode::Json {
        output.json(&lines);
    } else {
        for line in lines {
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn lifecycle(
    args: &SourceArgs,
    action: Lifecycle,
    services: &[ServiceName],
    mut output: Output,
) -> Result<()> {
    let system = SystemSeams::default();
    let controller = open(args, &system)?;

    output.start_timer();
    let (done, verb) = match action {
        Lifecycle::Start => (controller.start(services).await?, "Started"),
        Lifecycle::Stop => (controller.stop(services).await?, "Stopped"),
        Lifecycle::Restart => (controller.restart(services).await?, "Restarted"),
    };
    let names: Vec<&str> = done.iter().map(ServiceName::as_str).collect();
    output.success(&format!("{} {}", verb, names.join(", ")));
    Ok(())
}
