//! Configuration management for the collector
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `CORECOLLECT_*` environment variables, then command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{CollectorError, Result};
use crate::filter::{NameFilter, DEFAULT_NAME_PATTERN};

/// Smallest read buffer that can hold one maximal notification record.
pub const MIN_READ_BUFFER: usize = 16 + 256;

/// How a trigger expands into a file set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Regular files directly inside the collected directory.
    FilesOnly,
    /// Every file and directory below the collected directory.
    FilesAndDirectoriesRecursive,
}

/// Change-notification backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum WatchBackend {
    /// Native inotify on Linux, `notify` elsewhere
    Auto,
    /// Linux inotify
    Inotify,
    /// Portable `notify` crate backend
    Notify,
}

/// How collection events are reported on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Human readable lines
    Text,
    /// One JSON object per line
    Json,
    /// Nothing on stdout; logging only
    Quiet,
}

/// Top-level collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Directory watched for new entries
    pub input_path: PathBuf,
    /// Directory receiving archives
    pub output_path: PathBuf,
    /// File selection policy
    pub selection: SelectionMode,
    /// Full-match pattern for created entry names
    pub name_pattern: String,
    /// Wait interval of the controller between stop checks
    pub control_poll_ms: u64,
    /// Stdout reporting format
    pub output: OutputFormat,
    pub watcher: WatcherConfig,
    pub aggregator: AggregatorConfig,
}

/// Configuration for the event watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub backend: WatchBackend,
    /// Bounded readiness wait; also bounds the watcher's stop latency
    pub poll_timeout_ms: u64,
    /// Bytes read from the notification descriptor at once
    pub read_buffer_size: usize,
}

/// Configuration for the aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Idle wait between drain cycles
    pub drain_interval_ms: u64,
    /// Remove the usage report after archiving
    pub delete_temporaries: bool,
    /// File name of the usage report inside the collected directory
    pub usage_report_name: String,
    pub archive_program: String,
    pub usage_program: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::new(),
            output_path: PathBuf::new(),
            selection: SelectionMode::FilesOnly,
            name_pattern: DEFAULT_NAME_PATTERN.to_string(),
            control_poll_ms: 100,
            output: OutputFormat::Text,
            watcher: WatcherConfig::default(),
            aggregator: AggregatorConfig::default(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            backend: WatchBackend::Auto,
            poll_timeout_ms: 30,
            read_buffer_size: 4096,
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            drain_interval_ms: 1000,
            delete_temporaries: true,
            usage_report_name: "disk_usage.txt".to_string(),
            archive_program: "tar".to_string(),
            usage_program: "du".to_string(),
        }
    }
}

impl WatcherConfig {
    /// Get readiness wait duration
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl AggregatorConfig {
    /// Get idle wait between drain cycles
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }
}

impl CollectorConfig {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(
        input_path: P,
        output_path: Q,
        selection: SelectionMode,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            selection,
            ..Self::default()
        }
    }

    /// Get controller wait duration
    pub fn control_poll(&self) -> Duration {
        Duration::from_millis(self.control_poll_ms)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Load configuration from an optional file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Override values with environment variables if present
    pub fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("CORECOLLECT_PATTERN") {
            self.name_pattern = val;
        }

        if let Ok(val) = std::env::var("CORECOLLECT_POLL_TIMEOUT_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.watcher.poll_timeout_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("CORECOLLECT_DRAIN_INTERVAL_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.aggregator.drain_interval_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("CORECOLLECT_KEEP_TEMPORARIES") {
            if let Ok(keep) = val.parse::<bool>() {
                self.aggregator.delete_temporaries = !keep;
            }
        }
    }

    /// Compile the name pattern
    pub fn name_filter(&self) -> Result<NameFilter> {
        NameFilter::new(&self.name_pattern)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.input_path.is_dir() {
            return Err(CollectorError::Config(format!(
                "input path is not a directory: {}",
                self.input_path.display()
            )));
        }

        if self.output_path.as_os_str().is_empty() {
            return Err(CollectorError::Config("output path must be set".to_string()));
        }

        if self.watcher.poll_timeout_ms == 0 {
            return Err(CollectorError::Config(
                "poll_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.aggregator.drain_interval_ms == 0 {
            return Err(CollectorError::Config(
                "drain_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.control_poll_ms == 0 {
            return Err(CollectorError::Config(
                "control_poll_ms must be greater than 0".to_string(),
            ));
        }

        if self.watcher.read_buffer_size < MIN_READ_BUFFER {
            return Err(CollectorError::Config(format!(
                "read_buffer_size must be at least {} bytes",
                MIN_READ_BUFFER
            )));
        }

        if self.aggregator.usage_report_name.is_empty()
            || self.aggregator.usage_report_name.contains('/')
        {
            return Err(CollectorError::Config(
                "usage_report_name must be a plain file name".to_string(),
            ));
        }

        self.name_filter()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn valid_config(dir: &TempDir) -> CollectorConfig {
        CollectorConfig::new(dir.path(), dir.path().join("out"), SelectionMode::FilesOnly)
    }

    #[test]
    fn test_default_config() {
        let config = CollectorConfig::default();

        assert_eq!(config.watcher.poll_timeout_ms, 30);
        assert_eq!(config.aggregator.drain_interval_ms, 1000);
        assert!(config.aggregator.delete_temporaries);
        assert_eq!(config.aggregator.usage_report_name, "disk_usage.txt");
        assert_eq!(config.name_pattern, DEFAULT_NAME_PATTERN);
    }

    #[test]
    fn test_config_validation() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(&dir);
        assert!(config.validate().is_ok());

        config.watcher.poll_timeout_ms = 0;
        assert!(config.validate().is_err());

        config.watcher.poll_timeout_ms = 30;
        config.watcher.read_buffer_size = 64;
        assert!(config.validate().is_err());

        config.watcher.read_buffer_size = 4096;
        config.name_pattern = "core(".to_string();
        assert!(matches!(config.validate(), Err(CollectorError::InvalidPattern(_))));

        config.name_pattern = DEFAULT_NAME_PATTERN.to_string();
        config.aggregator.usage_report_name = "a/b.txt".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_input_rejected() {
        let dir = TempDir::new().unwrap();
        let config = CollectorConfig::new(
            dir.path().join("missing"),
            dir.path(),
            SelectionMode::FilesOnly,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_conversions() {
        let config = CollectorConfig::default();

        assert_eq!(config.watcher.poll_timeout(), Duration::from_millis(30));
        assert_eq!(config.aggregator.drain_interval(), Duration::from_secs(1));
        assert_eq!(config.control_poll(), Duration::from_millis(100));
    }

    #[test]
    fn test_toml_loading() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corecollect.toml");
        std::fs::write(
            &path,
            r#"
selection = "files_and_directories_recursive"
output = "json"

[watcher]
backend = "notify"

[aggregator]
drain_interval_ms = 250
"#,
        )
        .unwrap();

        let config = CollectorConfig::from_file(&path).unwrap();
        assert_eq!(config.selection, SelectionMode::FilesAndDirectoriesRecursive);
        assert_eq!(config.output, OutputFormat::Json);
        assert_eq!(config.watcher.backend, WatchBackend::Notify);
        assert_eq!(config.watcher.poll_timeout_ms, 30);
        assert_eq!(config.aggregator.drain_interval_ms, 250);
        assert_eq!(config.aggregator.archive_program, "tar");
    }

    #[test]
    fn test_env_config_loading() {
        std::env::set_var("CORECOLLECT_DRAIN_INTERVAL_MS", "500");
        std::env::set_var("CORECOLLECT_KEEP_TEMPORARIES", "true");

        let mut config = CollectorConfig::default();
        config.apply_env();

        assert_eq!(config.aggregator.drain_interval_ms, 500);
        assert!(!config.aggregator.delete_temporaries);

        // Cleanup
        std::env::remove_var("CORECOLLECT_DRAIN_INTERVAL_MS");
        std::env::remove_var("CORECOLLECT_KEEP_TEMPORARIES");
    }
}
