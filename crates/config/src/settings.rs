// Application settings
// Loaded from ~/.config/restops/settings.json

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the module files live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// Directory holding the ten module files
    pub dir: PathBuf,

    /// Per-module file overrides, keyed by module slug ("menu", "pos_sales", ...)
    pub files: BTreeMap<String, PathBuf>,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("database"),
            files: BTreeMap::new(),
        }
    }
}

/// Analysis backend connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub api_base: String,

    pub model: String,

    /// Per-HTTP-request timeout
    pub request_timeout_secs: u64,

    /// How often a running analysis is polled
    pub run_poll_interval_ms: u64,

    /// Give up on a single analysis run after this long
    pub run_timeout_secs: u64,

    /// Explicit credential. Wins over environment and keychain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable consulted when no explicit key is set
    pub api_key_env: String,

    /// Keychain service/account consulted last
    pub keychain_service: String,
    pub keychain_account: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4-turbo-preview".to_string(),
            request_timeout_secs: 60,
            run_poll_interval_ms: 1000,
            run_timeout_secs: 300,
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            keychain_service: "restops".to_string(),
            keychain_account: "openai".to_string(),
        }
    }
}

impl BackendSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn run_poll_interval(&self) -> Duration {
        Duration::from_millis(self.run_poll_interval_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// Retry/backoff for transient backend failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the first attempt (0 = try once)
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

/// What `create` does when a session is already open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnExisting {
    /// Hand back the open session
    #[default]
    Reuse,
    /// Refuse until the caller closes it
    RequireClose,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Sessions idle longer than this are stale and may be reclaimed
    pub idle_timeout_secs: u64,
    pub on_existing: OnExisting,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 1800,
            on_existing: OnExisting::Reuse,
        }
    }
}

impl SessionSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub backend: BackendSettings,
    pub retry: RetrySettings,
    pub session: SessionSettings,
}

#[derive(Debug)]
pub enum SettingsError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, message: String },
    Serialize(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            Self::Parse { path, message } => write!(f, "error parsing {}: {}", path.display(), message),
            Self::Serialize(msg) => write!(f, "cannot serialize settings: {msg}"),
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("restops")
            .join("settings.json")
    }

    /// Load from the default location, falling back to defaults on any problem
    pub fn load() -> Self {
        let path = Self::config_path();
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("{e}; using default settings");
                Self::default()
            }
        }
    }

    /// Load from `path`. A missing file yields defaults; a bad file is an error.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            log::debug!("no settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents).map_err(|message| SettingsError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Parse settings JSON. Lines starting with `//` are comments.
    pub fn parse(contents: &str) -> Result<Self, String> {
        let cleaned: String = contents
            .lines()
            .filter(|line| !line.trim().starts_with("//"))
            .collect::<Vec<_>>()
            .join("\n");

        serde_json::from_str(&cleaned).map_err(|e| e.to_string())
    }

    /// Save to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SettingsError::Serialize(e.to_string()))?;

        fs::write(path, json).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.data.dir, PathBuf::from("database"));
        assert_eq!(s.backend.model, "gpt-4-turbo-preview");
        assert_eq!(s.retry.max_retries, 3);
        assert_eq!(s.session.idle_timeout(), Duration::from_secs(1800));
        assert_eq!(s.session.on_existing, OnExisting::Reuse);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let s = Settings::parse(
            r#"{
    // keep retries short on this box
    "retry": { "max_retries": 1 },
    "session": { "on_existing": "require_close" },
    "data": { "files": { "menu": "menu_v2.csv" } },
    "unknown": true
}"#,
        )
        .unwrap();
        assert_eq!(s.retry.max_retries, 1);
        assert_eq!(s.retry.initial_backoff_ms, 1000);
        assert_eq!(s.session.on_existing, OnExisting::RequireClose);
        assert_eq!(s.data.files.get("menu"), Some(&PathBuf::from("menu_v2.csv")));
        assert_eq!(s.backend.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings::load_from(&dir.path().join("settings.json")).unwrap();
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn test_bad_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Settings::load_from(&path), Err(SettingsError::Parse { .. })));
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut s = Settings::default();
        s.backend.model = "gpt-4o".to_string();
        s.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), s);
    }
}
