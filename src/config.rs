//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MBOXSORT_CONFIG` (environment variable)
//! 2. `~/.config/mboxsort/config.toml` (Linux/macOS)
//!    `%APPDATA%\mboxsort\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! Values are kept as plain strings here; [`crate::classify::RuleSet::from_config`]
//! validates them before any archive is read.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::parser::decoder::DEFAULT_MAX_MESSAGE_SIZE;
use crate::parser::mbox::DEFAULT_READ_BUFFER_SIZE;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Grouping and ordering rules.
    pub classification: ClassificationConfig,
    /// Performance tuning.
    pub performance: PerformanceConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
}

/// Grouping and ordering rules, as written by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Sort criterion inside each bucket: "date", "sender", "subject", "thread".
    pub sort_by: String,
    /// "asc" or "desc".
    pub sort_order: String,
    /// Active grouping rules: any of "sender", "subject", "date", "thread".
    pub group_by: Vec<String>,
    /// Date bucket size: "day", "month", "year".
    pub date_granularity: String,
    /// Keywords for subject grouping. Empty means group by normalized subject.
    pub subject_keywords: Vec<String>,
}

/// Performance tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Decoder threads (0 = one per CPU, 1 = decode on the calling thread).
    pub workers: usize,
    /// Frames handed to the decoder pool at once.
    pub batch_size: usize,
    /// Maximum frame size in bytes (0 = unlimited).
    pub max_message_size: u64,
    /// Read buffer size in bytes.
    pub read_buffer_size: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            cache_dir: None,
        }
    }
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            sort_by: "date".to_string(),
            sort_order: "asc".to_string(),
            group_by: vec!["sender".to_string()],
            date_granularity: "month".to_string(),
            subject_keywords: Vec::new(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            batch_size: 256,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    match config_file_path() {
        Some(path) if path.exists() => load_config_from(&path),
        _ => Config::default(),
    }
}

/// Load configuration from an explicit file, falling back to defaults.
pub fn load_config_from(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<Config>(&contents) {
            Ok(cfg) => {
                tracing::info!(path = %path.display(), "Loaded config");
                cfg
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to parse config, using defaults"
                );
                Config::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to read config file, using defaults"
            );
            Config::default()
        }
    }
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MBOXSORT_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mboxsort").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mboxsort")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("mboxsort.log")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.classification.sort_by, "date");
        assert_eq!(cfg.classification.sort_order, "asc");
        assert_eq!(cfg.classification.group_by, vec!["sender"]);
        assert_eq!(cfg.performance.batch_size, 256);
        assert_eq!(cfg.general.log_level, "warn");
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[classification]
group_by = ["date", "thread"]
date_granularity = "year"
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.classification.group_by, vec!["date", "thread"]);
        assert_eq!(cfg.classification.date_granularity, "year");
        assert_eq!(cfg.classification.sort_by, "date");
        assert_eq!(cfg.performance.batch_size, 256);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "[performance]\nworkers = 2\n\n[classification]\nsubject_keywords = [\"invoice\"]"
        )
        .expect("write");
        let cfg = load_config_from(file.path());
        assert_eq!(cfg.performance.workers, 2);
        assert_eq!(cfg.classification.subject_keywords, vec!["invoice"]);
    }

    #[test]
    fn test_broken_config_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "this is = = not toml").expect("write");
        assert_eq!(load_config_from(file.path()), Config::default());
        assert_eq!(
            load_config_from(Path::new("/nonexistent/mboxsort.toml")),
            Config::default()
        );
    }

    #[test]
    fn test_log_file_path_uses_cache_dir_override() {
        let mut cfg = Config::default();
        cfg.general.cache_dir = Some(PathBuf::from("/tmp/mboxsort-cache"));
        assert_eq!(
            log_file_path(&cfg),
            PathBuf::from("/tmp/mboxsort-cache/mboxsort.log")
        );
    }
}
