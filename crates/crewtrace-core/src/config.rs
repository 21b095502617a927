use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CrewError, Result};

/// Top-level crewtrace configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub tracing: TracingConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Decision tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    #[serde(default = "default_tracing_enabled")]
    pub enabled: bool,
    /// Store prompt/response artifacts on decision nodes.
    #[serde(default = "default_capture_artifacts")]
    pub capture_artifacts: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: default_tracing_enabled(),
            capture_artifacts: default_capture_artifacts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Broadcast buffer size; slower subscribers lag past this many events.
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

/// Workflow recording configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    #[serde(default = "default_recording_dir")]
    pub dir: String,
    #[serde(default)]
    pub auto_save: bool,
    #[serde(default = "default_pretty")]
    pub pretty: bool,
    /// Extra key/values copied into every recording's configuration block.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            dir: default_recording_dir(),
            auto_save: false,
            pretty: default_pretty(),
            labels: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_tracing_enabled() -> bool { true }
fn default_capture_artifacts() -> bool { true }
fn default_event_capacity() -> usize { 1024 }
fn default_recording_dir() -> String { "~/.crewtrace/recordings".to_string() }
fn default_pretty() -> bool { true }
fn default_log_filter() -> String { "info".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| CrewError::ConfigNotFound(path.display().to_string()))?;

        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| CrewError::Config(e.to_string()))
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the recording directory (expand ~).
    pub fn recording_dir(&self) -> PathBuf {
        expand_home(&self.recording.dir)
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
pub fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_CREWTRACE_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_CREWTRACE_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_CREWTRACE_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_CREWTRACE_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_CREWTRACE_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = AppConfig::parse("").unwrap();
        assert!(config.tracing.enabled);
        assert!(config.tracing.capture_artifacts);
        assert_eq!(config.events.capacity, 1024);
        assert!(!config.recording.auto_save);
        assert!(config.recording.pretty);
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn test_partial_sections() {
        let config = AppConfig::parse(
            r#"
[tracing]
enabled = false

[recording]
dir = "/var/lib/crewtrace"
auto_save = true

[recording.labels]
env = "staging"
"#,
        )
        .unwrap();
        assert!(!config.tracing.enabled);
        assert!(config.tracing.capture_artifacts);
        assert_eq!(config.recording_dir(), PathBuf::from("/var/lib/crewtrace"));
        assert!(config.recording.auto_save);
        assert_eq!(config.recording.labels.get("env").map(String::as_str), Some("staging"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = AppConfig::parse("[tracing\nenabled = ").unwrap_err();
        assert!(matches!(err, CrewError::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = AppConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, CrewError::ConfigNotFound(_)));

        let config = AppConfig::load_or_default(Path::new("/definitely/not/here.toml")).unwrap();
        assert!(config.tracing.enabled);
    }

    #[test]
    fn test_expand_home() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(expand_home("~/rec"), PathBuf::from("/home/tester/rec"));
        assert_eq!(expand_home("/abs"), PathBuf::from("/abs"));
    }
}
