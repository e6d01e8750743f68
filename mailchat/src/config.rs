//! Locating the configuration file.

use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "MAILCHAT_CONFIG";

const DEFAULT_PATHS: [&str; 2] = ["./mailchat.ron", "/etc/mailchat/mailchat.ron"];

/// Find the configuration file using the following precedence:
/// 1. an explicit path (the `--config` flag)
/// 2. `MAILCHAT_CONFIG` environment variable
/// 3. ./mailchat.ron (current working directory)
/// 4. /etc/mailchat/mailchat.ron (system-wide config)
///
/// # Errors
///
/// Fails if an explicitly named file does not exist, or none of the
/// default locations holds one.
pub fn find(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    find_in(
        explicit,
        std::env::var_os(CONFIG_ENV).map(PathBuf::from),
        &DEFAULT_PATHS.map(PathBuf::from),
    )
}

fn find_in(
    explicit: Option<&Path>,
    env: Option<PathBuf>,
    defaults: &[PathBuf],
) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!("Configuration file {} does not exist", path.display());
    }

    if let Some(path) = env {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("explicit.ron");
        let env = dir.path().join("env.ron");
        std::fs::write(&explicit, "[]").unwrap();
        std::fs::write(&env, "[]").unwrap();

        let found = find_in(Some(&explicit), Some(env), &[]).unwrap();
        assert_eq!(found, explicit);
    }

    #[test]
    fn missing_env_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = dir.path().join("mailchat.ron");
        std::fs::write(&fallback, "[]").unwrap();

        let err = find_in(None, Some(dir.path().join("missing.ron")), &[fallback]).unwrap_err();
        assert!(err.to_string().contains("MAILCHAT_CONFIG points to non-existent file"));
    }

    #[test]
    fn first_existing_default_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.ron");
        let second = dir.path().join("second.ron");
        std::fs::write(&second, "[]").unwrap();

        let found = find_in(None, None, &[first.clone(), second.clone()]).unwrap();
        assert_eq!(found, second);

        std::fs::remove_file(&second).unwrap();
        let err = find_in(None, None, &[first, second]).unwrap_err();
        assert!(err.to_string().starts_with("No configuration file found"));
    }
}
