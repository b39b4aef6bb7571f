use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;

use crate::orchestrator::role::Role;
use crate::orchestrator::ToggleOutcome;

pub async fn run(config_file: Option<&Path>, role: Role) -> Result<()> {
    let controller = super::connect(config_file).await?;
    let outcome = controller.toggle(role).await?;
    let container = controller.container(role);

    match outcome {
        ToggleOutcome::Stopped => println!("  {} {} stopped", "\u{25cf}".red(), container.name),
        ToggleOutcome::AlreadyRunning => println!("  {} is already running", container.name),
        ToggleOutcome::Started | ToggleOutcome::Adopted => {
            println!("  {} {} running", "\u{25cf}".green(), container.name);
            let urls = match role {
                Role::Master => vec![
                    ("console", controller.console_url()),
                    ("build", controller.build_url()),
                ],
                Role::Agent => vec![("demo", controller.demo_url())],
            };
            for (label, url) in urls {
                if let Some(url) = url {
                    println!("    {:<8} {}", label, url);
                }
            }
            println!("    {}", controller.terminal_hint(role).dimmed());
        }
    }
    Ok(())
}
