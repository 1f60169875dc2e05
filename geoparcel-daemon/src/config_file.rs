//! Configuration file support for the geoparcel daemon.
//!
//! Loads `geoparcel.toml` (or a JSON file chosen with `--config`) and merges
//! its `[sync]` section into [`DaemonConfig`].
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI arguments
//! 2. Environment variables
//! 3. Config file (`[sync]`)
//! 4. Hardcoded defaults

use clap::ArgMatches;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::DaemonConfig;

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "geoparcel.toml";

// ---------------------------------------------------------------------------
// File config serde types (all Option: absence means "not set in file")
// ---------------------------------------------------------------------------

/// Top-level config file structure. Unknown sections are tolerated.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct GeoparcelFileConfig {
    /// Sync configuration section `[sync]`
    #[serde(default)]
    pub sync: Option<SyncFileConfig>,
}

/// The `[sync]` section.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct SyncFileConfig {
    pub ledger_url: Option<String>,
    pub ledger_token: Option<String>,
    pub event_name: Option<String>,
    pub watermark_key: Option<String>,
    pub data_dir: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub log_level: Option<String>,
    #[serde(default)]
    pub reconnect: Option<ReconnectFileConfig>,
}

/// The `[sync.reconnect]` section.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct ReconnectFileConfig {
    pub initial_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub jitter: Option<bool>,
}

/// Errors from config file loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {detail}")]
    Parse { path: PathBuf, detail: String },
}

// ---------------------------------------------------------------------------
// Loading and discovery
// ---------------------------------------------------------------------------

/// Load a config file. `.json` is parsed as JSON, anything else as TOML.
pub fn load_config(path: &Path) -> Result<GeoparcelFileConfig, ConfigFileError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    if content.trim().is_empty() {
        return Ok(GeoparcelFileConfig::default());
    }

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(&content).map_err(|e| ConfigFileError::Parse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    } else {
        toml::from_str(&content).map_err(|e| ConfigFileError::Parse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }
}

/// Resolve the config file path.
///
/// An explicit `--config` path wins; otherwise `./geoparcel.toml` is used if
/// it exists. Returns `None` when there is no config file (not an error).
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        if p.is_file() {
            return Some(p.to_path_buf());
        }
        if p.is_dir() {
            let candidate = p.join(DEFAULT_CONFIG_FILE);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        warn!(path = %p.display(), "Config file not found at specified path");
        return None;
    }

    let candidate = std::env::current_dir().ok()?.join(DEFAULT_CONFIG_FILE);
    candidate.is_file().then_some(candidate)
}

// ---------------------------------------------------------------------------
// Apply file config to DaemonConfig (value_source gating)
// ---------------------------------------------------------------------------

/// All clap arg IDs referenced by `apply_to_daemon_config`.
pub const CONFIG_FILE_ARG_IDS: &[&str] = &[
    "ledger_url",
    "ledger_token",
    "event_name",
    "watermark_key",
    "data_dir",
    "poll_interval_ms",
    "log_level",
    "reconnect_initial_ms",
    "reconnect_max_ms",
    "reconnect_jitter",
];

/// Apply file values to `config` for fields the user did NOT set on the
/// command line or through the environment.
pub fn apply_to_daemon_config(
    file: &SyncFileConfig,
    config: &mut DaemonConfig,
    matches: &ArgMatches,
) {
    use clap::parser::ValueSource;

    // Scalars with `default_value` report DefaultValue; bare Options report None.
    // Arg IDs are the field names (underscores), not the kebab-case flags.
    let is_default = |arg_name: &str| -> bool {
        matches!(
            matches.value_source(arg_name),
            None | Some(ValueSource::DefaultValue)
        )
    };

    if is_default("ledger_url") {
        if let Some(ref url) = file.ledger_url {
            config.ledger_url = Some(url.clone());
        }
    }
    if is_default("ledger_token") {
        if let Some(ref token) = file.ledger_token {
            config.ledger_token = Some(token.clone());
        }
    }
    if is_default("event_name") {
        if let Some(ref name) = file.event_name {
            config.event_name = name.clone();
        }
    }
    if is_default("watermark_key") {
        if let Some(ref key) = file.watermark_key {
            config.watermark_key = key.clone();
        }
    }
    if is_default("data_dir") {
        if let Some(ref dir) = file.data_dir {
            config.data_dir = Some(PathBuf::from(dir));
        }
    }
    if is_default("poll_interval_ms") {
        if let Some(v) = file.poll_interval_ms {
            config.poll_interval_ms = v;
        }
    }
    if is_default("log_level") {
        if let Some(ref level) = file.log_level {
            config.log_level = level.clone();
        }
    }

    if let Some(ref reconnect) = file.reconnect {
        if is_default("reconnect_initial_ms") {
            if let Some(v) = reconnect.initial_ms {
                config.reconnect_initial_ms = v;
            }
        }
        if is_default("reconnect_max_ms") {
            if let Some(v) = reconnect.max_ms {
                config.reconnect_max_ms = v;
            }
        }
        if is_default("reconnect_jitter") {
            if let Some(v) = reconnect.jitter {
                config.reconnect_jitter = v;
            }
        }
    }
}

/// Load the config file (if found) and merge its `[sync]` section into
/// `config`. Returns the path that was loaded.
pub fn load_and_merge_config(
    config: &mut DaemonConfig,
    matches: &ArgMatches,
) -> Result<Option<PathBuf>, ConfigFileError> {
    let Some(path) = resolve_config_path(config.config_file.as_deref()) else {
        debug!("No config file found, using CLI args and defaults only");
        return Ok(None);
    };

    info!(path = %path.display(), "Loading configuration file");
    let file_config = load_config(&path)?;
    if let Some(ref sync) = file_config.sync {
        apply_to_daemon_config(sync, config, matches);
    }
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, FromArgMatches};

    const TOML: &str = r#"
[sync]
ledger_url = "https://ledger.example/api"
event_name = "BoundaryChanged"
data_dir = "/var/lib/geoparcel"
poll_interval_ms = 500

[sync.reconnect]
initial_ms = 250
max_ms = 8000
jitter = true

[unrelated]
anything = 1
"#;

    fn parse(args: &[&str]) -> (DaemonConfig, ArgMatches) {
        let mut argv = vec!["geoparcel-daemon"];
        argv.extend_from_slice(args);
        let matches = DaemonConfig::command().try_get_matches_from(argv).unwrap();
        let config = DaemonConfig::from_arg_matches(&matches).unwrap();
        (config, matches)
    }

    #[test]
    fn test_load_toml_sync_section() {
        let config: GeoparcelFileConfig = toml::from_str(TOML).unwrap();
        let sync = config.sync.unwrap();
        assert_eq!(sync.ledger_url.as_deref(), Some("https://ledger.example/api"));
        assert_eq!(sync.poll_interval_ms, Some(500));
        let reconnect = sync.reconnect.unwrap();
        assert_eq!(reconnect.initial_ms, Some(250));
        assert_eq!(reconnect.jitter, Some(true));
    }

    #[test]
    fn test_file_values_fill_defaults_only() {
        let file: GeoparcelFileConfig = toml::from_str(TOML).unwrap();
        let (mut config, matches) = parse(&["--event-name", "FromCli", "--reconnect-max-ms", "100"]);

        apply_to_daemon_config(file.sync.as_ref().unwrap(), &mut config, &matches);

        assert_eq!(config.event_name, "FromCli");
        assert_eq!(config.reconnect_max_ms, 100);
        assert_eq!(config.ledger_url.as_deref(), Some("https://ledger.example/api"));
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/geoparcel")));
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.reconnect_initial_ms, 250);
        assert!(config.reconnect_jitter);
    }

    #[test]
    fn test_load_and_merge_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.json");
        std::fs::write(&path, r#"{"sync": {"watermark_key": "wm"}}"#).unwrap();

        let (mut config, matches) = parse(&["--config", path.to_str().unwrap()]);
        let loaded = load_and_merge_config(&mut config, &matches).unwrap();

        assert_eq!(loaded, Some(path));
        assert_eq!(config.watermark_key, "wm");
    }

    #[test]
    fn test_empty_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.toml");
        std::fs::write(&empty, "  \n").unwrap();
        assert!(load_config(&empty).unwrap().sync.is_none());

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[sync\nledger_url =").unwrap();
        assert!(matches!(
            load_config(&broken),
            Err(ConfigFileError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_explicit_path_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert_eq!(resolve_config_path(Some(&missing)), None);
    }

    /// Every arg ID used for gating must exist in the clap definition.
    #[test]
    fn test_config_file_arg_ids_match_daemon_config() {
        let cmd = DaemonConfig::command();
        let known_args: Vec<&str> = cmd
            .get_arguments()
            .map(|arg| arg.get_id().as_str())
            .collect();

        for id in CONFIG_FILE_ARG_IDS {
            assert!(
                known_args.contains(id),
                "CONFIG_FILE_ARG_IDS contains '{id}' which does not exist in \
                 DaemonConfig's clap definition. Did a field get renamed?"
            );
        }
    }
}
