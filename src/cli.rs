use std::path::PathBuf;

use clap::{ArgGroup, Parser};
use tracing_subscriber::EnvFilter;

use crate::config::{CollectorConfig, OutputFormat, SelectionMode, WatchBackend};
use crate::error::Result;

#[derive(Parser, Debug)]
#[command(name = "corecollect")]
#[command(version)]
#[command(about = "Bundle diagnostic files whenever a matching crash artifact appears")]
#[command(long_about = "corecollect watches INPUT_PATH for newly created entries whose names match a pattern (core dumps by default). For every match it archives the entry's directory together with a disk usage report into OUTPUT_PATH. Type q and press RETURN to stop.")]
#[command(group(ArgGroup::new("selection").required(true).args(["files", "recursive"])))]
pub struct Cli {
    /// Directory to watch for new entries
    #[arg(value_name = "INPUT_PATH")]
    pub input_path: PathBuf,

    /// Directory receiving the archives
    #[arg(value_name = "OUTPUT_PATH")]
    pub output_path: PathBuf,

    /// Collect regular files only, without recursing
    #[arg(short = 'f', long = "files")]
    pub files: bool,

    /// Collect files and directories recursively
    #[arg(short = 'd', long = "recursive")]
    pub recursive: bool,

    /// Full-match regular expression for created entry names
    #[arg(long, value_name = "REGEX")]
    pub pattern: Option<String>,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Change-notification backend
    #[arg(long)]
    pub backend: Option<WatchBackend>,

    /// Keep the disk usage report next to the collected files
    #[arg(long)]
    pub keep_temporaries: bool,

    /// Output format for collection reports
    #[arg(long)]
    pub output: Option<OutputFormat>,

    /// Do not read the quit command from stdin; run until Ctrl+C
    #[arg(long)]
    pub ignore_stdin: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn selection(&self) -> SelectionMode {
        if self.recursive {
            SelectionMode::FilesAndDirectoriesRecursive
        } else {
            SelectionMode::FilesOnly
        }
    }

    /// Build the effective configuration: file, then environment, then flags.
    pub fn to_config(&self) -> Result<CollectorConfig> {
        let mut config = CollectorConfig::load(self.config.as_deref())?;

        config.input_path = self.input_path.clone();
        config.output_path = self.output_path.clone();
        config.selection = self.selection();

        if let Some(pattern) = &self.pattern {
            config.name_pattern = pattern.clone();
        }
        if let Some(backend) = self.backend {
            config.watcher.backend = backend;
        }
        if let Some(output) = self.output {
            config.output = output;
        }
        if self.keep_temporaries {
            config.aggregator.delete_temporaries = false;
        }

        Ok(config)
    }

    pub fn setup_logging(&self) {
        let level = if self.verbose { "debug" } else { "info" };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_names(true)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_flags() {
        let cli = Cli::try_parse_from(["corecollect", "/in", "/out", "-f"]).unwrap();
        assert_eq!(cli.selection(), SelectionMode::FilesOnly);

        let cli = Cli::try_parse_from(["corecollect", "/in", "/out", "-d"]).unwrap();
        assert_eq!(cli.selection(), SelectionMode::FilesAndDirectoriesRecursive);
    }

    #[test]
    fn test_selection_required_and_exclusive() {
        assert!(Cli::try_parse_from(["corecollect", "/in", "/out"]).is_err());
        assert!(Cli::try_parse_from(["corecollect", "/in", "/out", "-f", "-d"]).is_err());
        assert!(Cli::try_parse_from(["corecollect", "/in", "-f"]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "corecollect",
            "/in",
            "/out",
            "-d",
            "--pattern",
            "dump-[0-9]+",
            "--backend",
            "notify",
            "--output",
            "json",
            "--keep-temporaries",
        ])
        .unwrap();

        let config = cli.to_config().unwrap();
        assert_eq!(config.input_path, PathBuf::from("/in"));
        assert_eq!(config.output_path, PathBuf::from("/out"));
        assert_eq!(config.name_pattern, "dump-[0-9]+");
        assert_eq!(config.watcher.backend, WatchBackend::Notify);
        assert_eq!(config.output, OutputFormat::Json);
        assert!(!config.aggregator.delete_temporaries);
    }
}
