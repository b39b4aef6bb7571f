use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "pekit.toml";
pub const CONFIG_ENV: &str = "PEKIT_CONFIG";

/// Walk up the directory tree from `start`, checking for `filename` at each level.
/// Returns the full path to the file if found, or None if the root is reached
/// without finding it.
pub fn find_config(start: &Path, filename: &str) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(filename);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// The per-user settings file, `~/.pekit.toml`.
pub fn user_config() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".pekit.toml"))
}

/// Resolve the config file path.
///
/// Order: `cli_file` (must exist), `$PEKIT_CONFIG` (must exist), `pekit.toml`
/// in the current directory or any parent, `~/.pekit.toml`. `Ok(None)` means
/// no file was found and built-in defaults apply.
pub fn resolve_config(cli_file: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = cli_file {
        if path.is_file() {
            return Ok(Some(path.canonicalize()?));
        }
        anyhow::bail!("Config file not found: {}", path.display());
    }

    if let Some(env_path) = std::env::var_os(CONFIG_ENV) {
        let path = PathBuf::from(env_path);
        if path.is_file() {
            return Ok(Some(path));
        }
        anyhow::bail!("Config file from {} not found: {}", CONFIG_ENV, path.display());
    }

    let cwd = std::env::current_dir()?;
    if let Some(found) = find_config(&cwd, CONFIG_FILENAME) {
        return Ok(Some(found));
    }

    Ok(user_config().filter(|p| p.is_file()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn config_in_current_dir_found() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join(CONFIG_FILENAME);
        fs::write(&config_path, "").unwrap();

        let result = find_config(tmp.path(), CONFIG_FILENAME);
        assert_eq!(result, Some(config_path));
    }

    #[test]
    fn config_in_grandparent_found() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join(CONFIG_FILENAME);
        fs::write(&config_path, "").unwrap();

        let grandchild = tmp.path().join("a").join("b");
        fs::create_dir_all(&grandchild).unwrap();

        let result = find_config(&grandchild, CONFIG_FILENAME);
        assert_eq!(result, Some(config_path));
    }

    #[test]
    fn cli_file_valid_path() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("custom.toml");
        fs::write(&config_path, "").unwrap();

        let result = resolve_config(Some(&config_path)).unwrap();
        assert_eq!(result, Some(config_path.canonicalize().unwrap()));
    }

    #[test]
    fn cli_file_invalid_path_errors() {
        let nonexistent = Path::new("/tmp/definitely_does_not_exist_pekit.toml");
        let err = resolve_config(Some(nonexistent)).unwrap_err().to_string();
        assert!(
            err.contains("Config file not found"),
            "Expected 'Config file not found' in error, got: {}",
            err
        );
    }
}
