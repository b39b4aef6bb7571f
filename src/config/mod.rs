pub mod model;
pub mod resolve;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};

use model::PekitConfig;

pub const USERNAME_ENV: &str = "PEKIT_REGISTRY_USERNAME";
pub const PASSWORD_ENV: &str = "PEKIT_REGISTRY_PASSWORD";

/// Read and parse a config file, returning the parsed config and its source text.
pub fn load_config(path: &Path) -> anyhow::Result<(PekitConfig, String)> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
    let config: PekitConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file {}: {}", path.display(), e))?;
    Ok((config, content))
}

/// Display name used in diagnostics for a resolved config path.
pub fn display_name(path: Option<&Path>) -> String {
    path.and_then(|p| p.file_name())
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| resolve::CONFIG_FILENAME.to_string())
}

/// Fill registry credentials from the environment, overriding the file.
pub fn apply_env_overrides(config: &mut PekitConfig) {
    if let Ok(username) = std::env::var(USERNAME_ENV) {
        config.registry.username = Some(username);
    }
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        config.registry.password = Some(password);
    }
}

/// Resolve, load, apply environment overrides and validate the settings.
///
/// Returns the config and the file it came from (`None` when running on
/// built-in defaults).
pub fn load(cli_file: Option<&Path>) -> anyhow::Result<(PekitConfig, Option<PathBuf>)> {
    let path = resolve::resolve_config(cli_file)?;
    let (mut config, source) = match &path {
        Some(p) => load_config(p).with_context(|| format!("loading config from {}", p.display()))?,
        None => (PekitConfig::default(), String::new()),
    };
    apply_env_overrides(&mut config);

    let filename = display_name(path.as_deref());
    if let Err(errors) = validate::validate(&config, &source, &filename) {
        let mut msg = String::from("Configuration errors:\n");
        for err in &errors {
            msg.push_str(&format!("  - {}\n", err));
        }
        bail!("{}", msg.trim_end());
    }

    Ok((config, path))
}
