//! Command-line interface definition
//!
//! Flags given here take precedence over the configuration file and the
//! environment; see [`Cli::apply_to`].

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::{AppConfig, ReportFormat};

#[derive(Parser, Debug)]
#[command(
    name = "netscanner",
    version,
    about = "Resumable nmap-driven network reconnaissance",
    long_about = "Discovers live hosts in a network range, enumerates their open ports, services, \
                  operating systems and common weaknesses, and writes a spreadsheet report. \
                  An interrupted run resumes with the hosts it had not finished."
)]
pub struct Cli {
    /// Network range to scan
    #[arg(long, value_name = "RANGE", help = "Target range in CIDR notation (e.g., 192.168.1.0/24)")]
    pub cidr: String,

    #[arg(long, value_name = "N", help = "Scan the top N most common ports")]
    pub top_ports: Option<usize>,

    #[arg(short = 'T', long, value_name = "0-5", help = "Timing template for port scans and OS detection")]
    pub timing: Option<u8>,

    #[arg(short = 'k', long, value_name = "KEY", help = "License key (falls back to the environment, then a prompt)")]
    pub license: Option<String>,

    #[arg(long, value_name = "LEVEL", help = "Logging level (trace, debug, info, warn, error)")]
    pub log_level: Option<String>,

    #[arg(long, value_name = "PATH", help = "Report output path")]
    pub out: Option<PathBuf>,

    #[arg(long, value_enum, help = "Report format")]
    pub format: Option<OutputFormat>,

    #[arg(
        short = 'c',
        long = "config",
        value_name = "PATH",
        env = "NETSCAN_CONFIG",
        default_value = "netscanner.toml",
        help = "Configuration file"
    )]
    pub config_path: PathBuf,

    #[arg(long, value_name = "PATH", help = "Resumable state file")]
    pub state_file: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Excel workbook
    Xlsx,
    /// JSON document
    Json,
}

impl From<OutputFormat> for ReportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Xlsx => Self::Xlsx,
            OutputFormat::Json => Self::Json,
        }
    }
}

impl Cli {
    /// Validate CLI arguments
    pub fn validate(&self) -> Result<(), String> {
        if let Some(timing) = self.timing {
            if timing > 5 {
                return Err("Timing template must be between 0-5".to_string());
            }
        }

        if self.top_ports == Some(0) {
            return Err("--top-ports must be greater than 0".to_string());
        }

        if let Some(level) = &self.log_level {
            crate::logging::parse_level(level).map_err(|e| e.to_string())?;
        }

        Ok(())
    }

    /// Overlay the flags that were given onto loaded configuration
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(top_ports) = self.top_ports {
            config.scanning.top_ports = top_ports;
        }
        if let Some(timing) = self.timing {
            config.scanning.timing_template = timing;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = self.format {
            config.output.format = format.into();
        }
        if let Some(out) = &self.out {
            config.output.report_path = out.clone();
        }
        if let Some(state_file) = &self.state_file {
            config.persistence.state_file = state_file.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_invocation() {
        let cli = Cli::parse_from(["netscanner", "--cidr", "192.168.1.0/24"]);
        assert!(cli.validate().is_ok());
        assert_eq!(cli.config_path, PathBuf::from("netscanner.toml"));
        assert_eq!(cli.license, None);
    }

    #[test]
    fn test_cidr_is_required() {
        assert!(Cli::try_parse_from(["netscanner", "--top-ports", "10"]).is_err());
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let cli = Cli::parse_from([
            "netscanner",
            "--cidr",
            "10.0.0.0/24",
            "--top-ports",
            "1000",
            "-k",
            "ABC-123",
            "--log-level",
            "debug",
            "--out",
            "reports/run.json",
            "--format",
            "json",
            "--state-file",
            "/var/lib/netscanner/state.json",
        ]);
        assert!(cli.validate().is_ok());

        let mut config = AppConfig::default();
        cli.apply_to(&mut config);

        assert_eq!(cli.license.as_deref(), Some("ABC-123"));
        assert_eq!(config.scanning.top_ports, 1000);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.output.report_path, PathBuf::from("reports/run.json"));
        assert_eq!(config.output.format, ReportFormat::Json);
        assert_eq!(config.persistence.state_file, PathBuf::from("/var/lib/netscanner/state.json"));
    }

    #[test]
    fn test_unset_flags_keep_config() {
        let cli = Cli::parse_from(["netscanner", "--cidr", "10.0.0.0/24"]);
        let mut config = AppConfig::default();
        config.scanning.top_ports = 250;
        cli.apply_to(&mut config);
        assert_eq!(config.scanning.top_ports, 250);
    }

    #[test]
    fn test_timing_validation() {
        let cli = Cli::parse_from(["netscanner", "--cidr", "10.0.0.0/24", "-T", "6"]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let cli = Cli::parse_from(["netscanner", "--cidr", "10.0.0.0/24", "--log-level", "chatty"]);
        assert!(cli.validate().is_err());
    }
}
