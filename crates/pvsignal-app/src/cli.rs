//! CLI argument definitions for the pvsignal binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// pvsignal: adverse-event signal detection over uploaded report files.
#[derive(Parser, Debug)]
#[command(name = "pvsignal", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port", global = true)]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP API (the default).
    Serve,
    /// Run the pipeline once over a file and print the top signals as JSON.
    Analyze {
        /// AE report file (CSV or another delimited text format).
        file: PathBuf,
        /// Number of top clusters to report.
        #[arg(short = 'n', long = "top-n")]
        top_n: Option<usize>,
        /// Also generate summaries for the reported clusters.
        #[arg(long = "summaries")]
        summaries: bool,
    },
}

impl CliArgs {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > PVSIGNAL_CONFIG env var > ~/.pvsignal/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("PVSIGNAL_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the API server port.
    ///
    /// Priority: --port flag > PVSIGNAL_PORT env var > config file value > 5001.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        if let Ok(val) = std::env::var("PVSIGNAL_PORT") {
            if let Ok(p) = val.parse::<u16>() {
                return p;
            }
        }
        if config_port != 0 {
            return config_port;
        }
        5001
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".pvsignal").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".pvsignal").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_serve() {
        let args = CliArgs::parse_from(["pvsignal"]);
        assert_eq!(args.command(), Command::Serve);
        assert!(args.log_level.is_none());
    }

    #[test]
    fn test_flag_beats_everything() {
        let args = CliArgs::parse_from(["pvsignal", "--port", "8123", "-c", "/tmp/pv.toml"]);
        assert_eq!(args.resolve_port(9000), 8123);
        assert_eq!(args.resolve_config_path(), PathBuf::from("/tmp/pv.toml"));
    }

    #[test]
    fn test_analyze_subcommand() {
        let args = CliArgs::parse_from([
            "pvsignal",
            "analyze",
            "reports.csv",
            "--top-n",
            "3",
            "--summaries",
            "--log-level",
            "debug",
        ]);
        assert_eq!(
            args.command(),
            Command::Analyze {
                file: PathBuf::from("reports.csv"),
                top_n: Some(3),
                summaries: true,
            }
        );
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }
}
