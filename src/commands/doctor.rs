use anyhow::Result;
use std::path::Path;

use crate::config;
use crate::docker::{ContainerEngine, DockerEngine};
use crate::orchestrator::ports::{fixed_port_conflicts, port_plan};
use crate::orchestrator::role::Role;
use crate::registry::{HttpRegistry, RegistryClient};

fn ok(name: &str, detail: impl std::fmt::Display) {
    println!("  [ok] {:<16} {}", name, detail);
}

fn bad(name: &str, detail: impl std::fmt::Display) {
    println!("  [!!] {:<16} {}", name, detail);
}

pub async fn run(config_file: Option<&Path>) -> Result<()> {
    println!("pekit doctor");
    println!("============");
    println!();

    let mut all_ok = true;

    let config = match config::load(config_file) {
        Ok((config, path)) => {
            ok("config", config::display_name(path.as_deref()));
            config
        }
        Err(e) => {
            bad("config", format!("{:#}", e));
            println!();
            println!("Fix the configuration before running other checks.");
            return Ok(());
        }
    };

    match DockerEngine::connect() {
        Ok(engine) => match engine.version().await {
            Ok(version) => ok("docker", version),
            Err(e) => {
                bad("docker", e);
                all_ok = false;
            }
        },
        Err(e) => {
            bad("docker", format!("{:#}", e));
            all_ok = false;
        }
    }

    if config.registry.credentials().is_none() {
        bad("registry", "no credentials, downloadable images cannot be listed");
        all_ok = false;
    } else {
        let login = match HttpRegistry::new(&config.registry, config.timing.probe_timeout()) {
            Ok(registry) => registry.verify_login().await,
            Err(e) => Err(e),
        };
        match login {
            Ok(()) => ok("registry", &config.registry.address),
            Err(e) => {
                bad("registry", e);
                all_ok = false;
            }
        }
    }

    if config.policy.expose_ports {
        let conflicts = fixed_port_conflicts(&port_plan(Role::Master, true));
        if conflicts.is_empty() {
            ok("ports", "8140, 8142, 61613 free");
        } else {
            let list: Vec<String> = conflicts.iter().map(|p| p.to_string()).collect();
            bad("ports", format!("in use: {}", list.join(", ")));
            all_ok = false;
        }
    }

    println!();
    if all_ok {
        println!("Everything looks good.");
    } else {
        println!("Some checks failed. A running master container also holds its fixed ports.");
    }

    Ok(())
}
