use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::activity::MAX_ACTIVITY_DAYS;

/// Environment variable overriding the store location.
pub const STORE_ENV: &str = "BABYSTEPS_STORE";
/// Environment variable selecting the output mode.
pub const FORMAT_ENV: &str = "BABYSTEPS_FORMAT";

const STORE_FILE_NAME: &str = "babysteps.sqlite3";

/// Which integrity pass runs at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityMode {
    Quick,
    #[default]
    Comprehensive,
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// Per-app location used by older releases; moved to `store_path` on
    /// startup when present.
    #[serde(default)]
    pub legacy_store_path: Option<PathBuf>,
    #[serde(default)]
    pub integrity: IntegrityMode,
    #[serde(default = "default_activity_days")]
    pub activity_days: u32,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default)]
    pub output: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            legacy_store_path: None,
            integrity: IntegrityMode::default(),
            activity_days: default_activity_days(),
            lock_timeout_ms: default_lock_timeout_ms(),
            output: None,
        }
    }
}

impl StoreConfig {
    /// Defaults with the store at `store_path`.
    #[must_use]
    pub fn at(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// How command output is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    Pretty,
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    pub store: StoreConfig,
    pub output: OutputMode,
}

/// Path of the user config file, if the platform has a config directory.
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("babysteps/config.toml"))
}

/// Load config from `path`; a missing file yields defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config_from(path: &Path) -> Result<StoreConfig> {
    if !path.exists() {
        return Ok(StoreConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config = toml::from_str::<StoreConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    anyhow::ensure!(
        config.activity_days <= MAX_ACTIVITY_DAYS,
        "Failed to parse {}: activity_days must be at most {MAX_ACTIVITY_DAYS}",
        path.display()
    );
    Ok(config)
}

/// Load the user config file.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<StoreConfig> {
    match config_file_path() {
        Some(path) => load_config_from(&path),
        None => Ok(StoreConfig::default()),
    }
}

/// Merge the config file with environment and command-line overrides.
///
/// Store path precedence: `--store`, then `BABYSTEPS_STORE`, then the file.
///
/// # Errors
///
/// Returns an error if the config file cannot be loaded.
pub fn resolve_config(cli_store: Option<PathBuf>, cli_json: bool) -> Result<EffectiveConfig> {
    let file = load_config()?;
    Ok(resolve_with(
        file,
        cli_store,
        env::var_os(STORE_ENV).map(PathBuf::from),
        cli_json,
        env::var(FORMAT_ENV).ok(),
    ))
}

fn resolve_with(
    mut store: StoreConfig,
    cli_store: Option<PathBuf>,
    env_store: Option<PathBuf>,
    cli_json: bool,
    env_format: Option<String>,
) -> EffectiveConfig {
    if let Some(path) = cli_store.or(env_store) {
        store.store_path = path;
    }
    let output = resolve_output(cli_json, store.output.as_deref(), env_format.as_deref());
    EffectiveConfig { store, output }
}

fn resolve_output(
    cli_json: bool,
    config_output: Option<&str>,
    env_format: Option<&str>,
) -> OutputMode {
    fn normalize_output_mode(raw: &str) -> Option<OutputMode> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "human" => Some(OutputMode::Pretty),
            "text" | "plain" => Some(OutputMode::Text),
            "json" => Some(OutputMode::Json),
            _ => None,
        }
    }

    if cli_json {
        return OutputMode::Json;
    }

    if let Some(mode) = env_format.and_then(normalize_output_mode) {
        return mode;
    }

    if let Some(mode) = config_output.and_then(normalize_output_mode) {
        return mode;
    }

    if std::io::stdout().is_terminal() {
        OutputMode::Pretty
    } else {
        OutputMode::Text
    }
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("babysteps")
        .join(STORE_FILE_NAME)
}

const fn default_activity_days() -> u32 {
    90
}

const fn default_lock_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_uses_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cfg = load_config_from(&dir.path().join("config.toml")).expect("load");

        assert_eq!(cfg.integrity, IntegrityMode::Comprehensive);
        assert_eq!(cfg.activity_days, 90);
        assert_eq!(cfg.lock_timeout(), Duration::from_secs(5));
        assert!(cfg.store_path.ends_with("babysteps/babysteps.sqlite3"));
        assert_eq!(cfg.legacy_store_path, None);
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
store_path = "/srv/babysteps/store.sqlite3"
legacy_store_path = "/home/alice/.babysteps/default.sqlite3"
integrity = "quick"
"#,
        )
        .expect("write config");

        let cfg = load_config_from(&path).expect("load");

        assert_eq!(cfg.store_path, PathBuf::from("/srv/babysteps/store.sqlite3"));
        assert_eq!(
            cfg.legacy_store_path,
            Some(PathBuf::from("/home/alice/.babysteps/default.sqlite3"))
        );
        assert_eq!(cfg.integrity, IntegrityMode::Quick);
        assert_eq!(cfg.activity_days, 90);
    }

    #[test]
    fn malformed_config_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "integrity = \"sometimes\"").expect("write config");

        let err = load_config_from(&path).expect_err("must fail");
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn oversized_activity_window_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "activity_days = 4294967295").expect("write config");

        let err = load_config_from(&path).expect_err("must fail");
        assert!(err.to_string().contains("activity_days must be at most"));
    }

    #[test]
    fn cli_store_beats_env_and_file() {
        let file = StoreConfig::at("/from/file.sqlite3");

        let resolved = resolve_with(
            file.clone(),
            Some(PathBuf::from("/from/cli.sqlite3")),
            Some(PathBuf::from("/from/env.sqlite3")),
            false,
            Some("text".to_string()),
        );
        assert_eq!(resolved.store.store_path, PathBuf::from("/from/cli.sqlite3"));

        let resolved = resolve_with(
            file,
            None,
            Some(PathBuf::from("/from/env.sqlite3")),
            false,
            Some("text".to_string()),
        );
        assert_eq!(resolved.store.store_path, PathBuf::from("/from/env.sqlite3"));
        assert_eq!(resolved.output, OutputMode::Text);
    }

    #[test]
    fn cli_json_overrides_env_and_config() {
        let output = resolve_output(true, Some("pretty"), Some("text"));
        assert_eq!(output, OutputMode::Json);
    }

    #[test]
    fn output_aliases_are_normalized() {
        assert_eq!(resolve_output(false, Some("text"), Some("human")), OutputMode::Pretty);
        assert_eq!(resolve_output(false, Some("plain"), Some("bogus")), OutputMode::Text);
    }
}
