/// Service configuration, read from a JSON file
use crate::monitor::{MonitorError, ProfileOverride, SearchConfig};
use crate::page::SessionSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV_VAR: &str = "SEATWATCH_CONFIG";

/// Bounds for the activity log size.
const MIN_ACTIVITY_RETENTION: usize = 50;
const MAX_ACTIVITY_RETENTION: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Progressive search limits, in config-file units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub max_scroll_steps: u32,
    pub max_load_attempts: u32,
    pub timeout_secs: u64,
    pub scroll_fraction: f64,
    pub scroll_settle_ms: u64,
    pub load_settle_ms: u64,
    pub step_pause_ms: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_scroll_steps: 15,
            max_load_attempts: 5,
            timeout_secs: 30,
            scroll_fraction: 0.8,
            scroll_settle_ms: 800,
            load_settle_ms: 2000,
            step_pause_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Notifications are also POSTed here as JSON when set.
    pub webhook_url: Option<String>,
}

/// Top-level configuration. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// SQLite file for monitor state; empty keeps state in memory only.
    pub database_path: String,
    pub activity_retention: usize,
    pub inter_course_delay_ms: u64,
    pub load_fallback_ms: u64,
    pub viewport_height: f64,
    pub line_height: f64,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub search: SearchSettings,
    pub notifications: NotificationSettings,
    /// Extra per-domain profile overrides, merged over the built-in ones.
    pub portal_overrides: HashMap<String, ProfileOverride>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database_path: "seatwatch.db".to_string(),
            activity_retention: MIN_ACTIVITY_RETENTION,
            inter_course_delay_ms: 1000,
            load_fallback_ms: 5000,
            viewport_height: 800.0,
            line_height: 20.0,
            user_agent: format!("seatwatch/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 20,
            search: SearchSettings::default(),
            notifications: NotificationSettings::default(),
            portal_overrides: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Loads the configuration from a JSON file
    ///
    /// # Arguments
    /// * `path` - Path to the config file
    ///
    /// # Returns
    /// * `Ok(AppConfig)` - Parsed configuration, or the defaults if the file does not exist
    /// * `Err(MonitorError::Config)` - If the file can't be read or parsed
    pub fn load(path: &Path) -> Result<Self, MonitorError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| MonitorError::Config {
            message: format!("could not read {}: {}", path.display(), e),
        })?;
        serde_json::from_str(&content).map_err(|e| MonitorError::Config {
            message: format!("could not parse {}: {}", path.display(), e),
        })
    }

    /// The config file named by the first CLI argument or `SEATWATCH_CONFIG`.
    pub fn path_from_env() -> Option<PathBuf> {
        std::env::args()
            .nth(1)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.address, self.server.port)
    }

    /// Activity log size, kept within 50..=100.
    pub fn activity_retention(&self) -> usize {
        self.activity_retention
            .clamp(MIN_ACTIVITY_RETENTION, MAX_ACTIVITY_RETENTION)
    }

    pub fn inter_course_delay(&self) -> Duration {
        Duration::from_millis(self.inter_course_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            viewport_height: self.viewport_height.max(1.0),
            line_height: self.line_height.max(1.0),
            load_fallback: Duration::from_millis(self.load_fallback_ms),
        }
    }

    pub fn search_config(&self) -> SearchConfig {
        let s = &self.search;
        SearchConfig {
            max_scroll_steps: s.max_scroll_steps.max(1),
            max_load_attempts: s.max_load_attempts,
            timeout: Duration::from_secs(s.timeout_secs.max(1)),
            scroll_fraction: s.scroll_fraction.clamp(0.1, 1.0),
            scroll_settle: Duration::from_millis(s.scroll_settle_ms),
            load_settle: Duration::from_millis(s.load_settle_ms),
            step_pause: Duration::from_millis(s.step_pause_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_search_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.search_config(), SearchConfig::default());
        assert_eq!(config.bind_address(), "127.0.0.1:3000");
        assert_eq!(config.inter_course_delay(), Duration::from_secs(1));
        assert_eq!(config.session_settings().load_fallback, Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "server": {{ "port": 8080 }},
                "activity_retention": 500,
                "search": {{ "timeout_secs": 10 }},
                "portal_overrides": {{
                    "northsouth.edu": {{ "course_selectors": ["table.offered tr"] }}
                }}
            }}"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.activity_retention(), 100);
        assert_eq!(config.search_config().timeout, Duration::from_secs(10));
        assert_eq!(config.search_config().max_scroll_steps, 15);
        assert_eq!(
            config.portal_overrides["northsouth.edu"].course_selectors,
            Some(vec!["table.offered tr".to_string()])
        );
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            AppConfig::load(file.path()),
            Err(MonitorError::Config { .. })
        ));
    }
}
