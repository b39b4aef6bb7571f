use anyhow::{bail, Result};
use owo_colors::OwoColorize;
use std::path::Path;

use crate::orchestrator::provision::{InstallOutcome, ManagementRunOutcome};
use crate::orchestrator::role::Role;

pub async fn run(config_file: Option<&Path>, agent_only: bool) -> Result<()> {
    let controller = super::connect(config_file).await?;

    if agent_only {
        let outcome = controller.provision_agent().await?;
        println!("  {}", outcome.message());
        if outcome != InstallOutcome::Installed {
            bail!("agent installation did not complete");
        }
        return Ok(());
    }

    let report = controller.run_provisioning_now().await?;
    println!(
        "  installer: {}",
        InstallOutcome::from_exit(report.install_exit).message()
    );
    println!("  hosts:     exit {}", report.hosts_exit);
    println!("  sign:      exit {}", report.sign_exit);
    let run = ManagementRunOutcome::from_exit(report.run_exit);
    if run.is_success() {
        println!("  {} {}", "\u{2713}".green(), run.message());
        Ok(())
    } else {
        bail!("first management run: {}", run.message())
    }
}

pub async fn run_agent(config_file: Option<&Path>, role: Role) -> Result<()> {
    let controller = super::connect(config_file).await?;
    let outcome = controller.run_management_agent(role).await?;
    if outcome.is_success() {
        println!("  {} {}", "\u{2713}".green(), outcome.message());
        Ok(())
    } else {
        bail!("{}", outcome.message())
    }
}

pub async fn run_clean_certs(config_file: Option<&Path>) -> Result<()> {
    let controller = super::connect(config_file).await?;
    let report = controller.clean_certs().await?;
    let mark = |ok: bool| if ok { "cleaned" } else { "skipped" };
    println!("  master: {}", mark(report.master_cleaned));
    println!("  agent:  {}", mark(report.agent_cleaned));
    Ok(())
}
