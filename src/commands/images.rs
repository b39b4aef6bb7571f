use anyhow::{bail, Result};
use owo_colors::OwoColorize;
use std::path::Path;

use crate::orchestrator::catalog::{CatalogError, DownloadOutcome};
use crate::orchestrator::role::Role;
use crate::ui::summary::print_images;

pub async fn run_list(config_file: Option<&Path>) -> Result<()> {
    let controller = super::connect(config_file).await?;
    for warning in controller.warnings() {
        eprintln!("  {} {}", "!".yellow(), warning);
    }
    let catalogs: Vec<_> = Role::ALL
        .iter()
        .map(|r| controller.catalog_snapshot(*r))
        .collect();
    print_images(&catalogs);
    Ok(())
}

/// Pull an image in the foreground. Ctrl+C cancels the pull.
pub async fn run_pull(config_file: Option<&Path>, role: Role, image: &str) -> Result<()> {
    let controller = super::connect(config_file).await?;

    let download = controller.download(role, image);
    tokio::pin!(download);

    let finished = tokio::select! {
        result = &mut download => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            controller.cancel_download(role, image);
            download.await
        }
    };

    match result {
        Ok(DownloadOutcome::Completed) => {
            println!("  {} {}", "\u{2713}".green(), image);
            Ok(())
        }
        Ok(DownloadOutcome::AlreadyInProgress) => {
            println!("  {} is already being downloaded", image);
            Ok(())
        }
        Err(CatalogError::Cancelled) => {
            println!("  download of {} cancelled", image);
            Ok(())
        }
        Err(e) => bail!("downloading {}: {}", image, e),
    }
}

pub async fn run_remove(config_file: Option<&Path>, role: Role, image: &str) -> Result<()> {
    let controller = super::connect(config_file).await?;
    match controller.delete(role, image).await {
        Ok(()) => {
            println!("  {} deleted {}", "\u{2713}".green(), image);
            Ok(())
        }
        Err(CatalogError::InUse(_)) => {
            bail!("{} is used by a container; stop it first (`pekit toggle {}`)", image, role)
        }
        Err(e) => bail!("deleting {}: {}", image, e),
    }
}
