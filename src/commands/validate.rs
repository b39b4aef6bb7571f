use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;

use crate::config;
use crate::config::resolve::resolve_config;
use crate::config::validate::validate;

pub fn run(config_file: Option<&Path>) -> Result<()> {
    let Some(config_path) = resolve_config(config_file)? else {
        println!("  no config file found, built-in defaults apply");
        return Ok(());
    };

    let (mut config, source) = config::load_config(&config_path)?;
    config::apply_env_overrides(&mut config);
    let filename = config::display_name(Some(&config_path));

    match validate(&config, &source, &filename) {
        Ok(()) => {
            println!(
                "  {} {} is valid (master: {}, agent: {})",
                "\u{2713}".green(),
                filename,
                config.master.container_name,
                config.agent.container_name,
            );
            Ok(())
        }
        Err(errors) => {
            for err in errors {
                let report: miette::Report = err.into();
                eprintln!("{:?}", report);
            }
            std::process::exit(1);
        }
    }
}
