//! Server configuration.
//!
//! Configuration loads from a JSON file whose location comes from the
//! `AGENTHUB_CONFIG_PATH` environment variable, then each field may be
//! overridden by an environment variable named after it in UPPER_SNAKE case.
//! Precedence is environment, then file, then the built-in default. List
//! fields are comma separated in the environment; `webhooks` is a JSON
//! array. Invalid environment values are skipped with a warning rather than
//! failing startup.

use crate::agenthub::webhook::WebhookSpec;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file location.
pub const CONFIG_PATH_ENV: &str = "AGENTHUB_CONFIG_PATH";

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "workspace/agenthub_config.json";

/// Immutable configuration for a server running in local mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Valid session API keys. An empty list leaves the server unsecured;
    /// any key in the list is accepted.
    pub session_api_keys: Vec<String>,
    /// Extra CORS origins. Anything from localhost is always accepted.
    pub allow_cors_origins: Vec<String>,
    /// Directory where conversations and their events are stored.
    pub conversations_path: PathBuf,
    /// Root directory for per-conversation workspaces.
    pub workspace_path: PathBuf,
    /// Directory where bash events are stored as files.
    pub bash_events_dir: PathBuf,
    /// Optional directory of static files served under `/static/`.
    pub static_files_path: Option<PathBuf>,
    /// Webhooks to invoke in response to events.
    pub webhooks: Vec<WebhookSpec>,
    /// Whether the VSCode collaborator is enabled.
    pub enable_vscode: bool,
    /// Whether the VNC collaborator is enabled.
    pub enable_vnc: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_api_keys: Vec::new(),
            allow_cors_origins: Vec::new(),
            conversations_path: PathBuf::from("workspace/conversations"),
            workspace_path: PathBuf::from("workspace/project"),
            bash_events_dir: PathBuf::from("workspace/bash_events"),
            static_files_path: None,
            webhooks: Vec::new(),
            enable_vscode: true,
            enable_vnc: false,
        }
    }
}

impl Config {
    /// Load configuration: JSON file (if present) overlaid with environment
    /// variables.
    pub fn load() -> Config {
        let path = std::env::var(CONFIG_PATH_ENV)
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Config::from_json_file(Path::new(&path))
    }

    /// Load from a specific JSON file, then apply environment overrides.
    pub fn from_json_file(path: &Path) -> Config {
        let mut config = Config::default();
        if path.exists() {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<Config>(&bytes) {
                    Ok(parsed) => config = parsed,
                    Err(err) => {
                        log::warn!("ignoring malformed config file {:?}: {}", path, err)
                    }
                },
                Err(err) => log::warn!("could not read config file {:?}: {}", path, err),
            }
        }
        config.apply_env_overrides(|name| std::env::var(name).ok())
    }

    /// Overlay fields from UPPER_SNAKE environment variables. `lookup` is
    /// injected so tests can run without touching the process environment.
    pub fn apply_env_overrides<F>(mut self, lookup: F) -> Config
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("SESSION_API_KEYS") {
            self.session_api_keys = parse_list(&raw);
        }
        if let Some(raw) = lookup("ALLOW_CORS_ORIGINS") {
            self.allow_cors_origins = parse_list(&raw);
        }
        if let Some(raw) = lookup("CONVERSATIONS_PATH") {
            self.conversations_path = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("WORKSPACE_PATH") {
            self.workspace_path = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("BASH_EVENTS_DIR") {
            self.bash_events_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("STATIC_FILES_PATH") {
            self.static_files_path = if raw.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(raw))
            };
        }
        if let Some(raw) = lookup("WEBHOOKS") {
            match serde_json::from_str::<Vec<WebhookSpec>>(&raw) {
                Ok(webhooks) => self.webhooks = webhooks,
                Err(err) => log::warn!("ignoring invalid WEBHOOKS env value: {}", err),
            }
        }
        if let Some(raw) = lookup("ENABLE_VSCODE") {
            if let Some(value) = parse_bool(&raw) {
                self.enable_vscode = value;
            } else {
                log::warn!("ignoring invalid ENABLE_VSCODE env value: {}", raw);
            }
        }
        if let Some(raw) = lookup("ENABLE_VNC") {
            if let Some(value) = parse_bool(&raw) {
                self.enable_vnc = value;
            } else {
                log::warn!("ignoring invalid ENABLE_VNC env value: {}", raw);
            }
        }
        self
    }
}

lazy_static! {
    static ref DEFAULT_CONFIG: Config = Config::load();
}

/// The process-wide configuration, loaded once on first access.
pub fn default_config() -> &'static Config {
    &DEFAULT_CONFIG
}

fn parse_list(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split(',').map(|part| part.trim().to_string()).collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(map: HashMap<&'static str, &'static str>) -> impl Fn(&str) -> Option<String> {
        move |name| map.get(name).map(|v| v.to_string())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = Config::default().apply_env_overrides(|_| None);
        assert_eq!(config.conversations_path, PathBuf::from("workspace/conversations"));
        assert!(config.session_api_keys.is_empty());
        assert!(config.enable_vscode);
        assert!(!config.enable_vnc);
    }

    #[test]
    fn json_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"conversations_path": "/data/convs", "session_api_keys": ["k1"]}"#,
        )
        .unwrap();
        let config = Config::from_json_file(&path);
        assert_eq!(config.conversations_path, PathBuf::from("/data/convs"));
        assert_eq!(config.session_api_keys, vec!["k1".to_string()]);
        // Untouched fields keep their defaults.
        assert_eq!(config.workspace_path, PathBuf::from("workspace/project"));
    }

    #[test]
    fn env_overrides_beat_json_values() {
        let base = Config {
            conversations_path: PathBuf::from("/from-json"),
            ..Config::default()
        };
        let config = base.apply_env_overrides(lookup_from(HashMap::from([
            ("CONVERSATIONS_PATH", "/from-env"),
            ("SESSION_API_KEYS", "a, b,c"),
            ("ENABLE_VSCODE", "false"),
        ])));
        assert_eq!(config.conversations_path, PathBuf::from("/from-env"));
        assert_eq!(
            config.session_api_keys,
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(!config.enable_vscode);
    }

    #[test]
    fn invalid_env_values_are_skipped() {
        let config = Config::default().apply_env_overrides(lookup_from(HashMap::from([
            ("ENABLE_VNC", "maybe"),
            ("WEBHOOKS", "not json"),
        ])));
        assert!(!config.enable_vnc);
        assert!(config.webhooks.is_empty());
    }

    #[test]
    fn webhooks_parse_from_env_json() {
        let config = Config::default().apply_env_overrides(lookup_from(HashMap::from([(
            "WEBHOOKS",
            r#"[{"base_url": "http://hooks.local"}]"#,
        )])));
        assert_eq!(config.webhooks.len(), 1);
        assert_eq!(config.webhooks[0].base_url, "http://hooks.local");
    }

    #[test]
    fn empty_list_env_clears_value() {
        let base = Config {
            allow_cors_origins: vec!["https://app.example".to_string()],
            ..Config::default()
        };
        let config =
            base.apply_env_overrides(lookup_from(HashMap::from([("ALLOW_CORS_ORIGINS", "")])));
        assert!(config.allow_cors_origins.is_empty());
    }
}
