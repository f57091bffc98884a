//! Configuration management
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment variables (`NETSCAN__SECTION__KEY`), then command-line
//! overrides applied by [`crate::cli::Cli::apply_to`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info};

use crate::{nmap::DEFAULT_TOOL_TIMEOUT, timing::TimingTemplate};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub scanning: ScanningConfig,
    pub workflow: WorkflowConfig,
    pub persistence: PersistenceConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
    pub license: LicenseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanningConfig {
    /// Path or name of the nmap binary
    pub nmap_path: PathBuf,
    /// Number of most common ports probed per host
    pub top_ports: usize,
    /// Wall-clock budget for every nmap invocation
    pub timeout_secs: u64,
    /// Timing template (0-5, paranoid to insane)
    pub timing_template: u8,
    /// Version probe intensity (0-9)
    pub version_intensity: u8,
}

impl Default for ScanningConfig {
    fn default() -> Self {
        Self {
            nmap_path: PathBuf::from("nmap"),
            top_ports: 100,
            timeout_secs: DEFAULT_TOOL_TIMEOUT.as_secs(),
            timing_template: 1,
            version_intensity: 2,
        }
    }
}

/// What happens when a stage raises an error for one target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetErrorPolicy {
    /// Stop the run; the run-start checkpoint stays on disk
    #[default]
    Abort,
    /// Log, keep the target pending and continue with the next one
    Defer,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub on_target_error: TargetErrorPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Resumable state file
    pub state_file: PathBuf,
    /// Rewrite the pending list after every processed target
    pub checkpoint_each_target: bool,
    /// Treat an unreadable state file as absent instead of failing
    pub discard_corrupt_state: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("scan_state.json"),
            checkpoint_each_target: false,
            discard_corrupt_state: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Xlsx,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub report_path: PathBuf,
    pub format: ReportFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            report_path: PathBuf::from("scan_results.xlsx"),
            format: ReportFormat::Xlsx,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Console format (json, pretty, compact)
    pub format: String,
    /// Optional log file, written in addition to stderr
    pub file_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseConfig {
    /// Environment variable consulted when no key is given on the command line
    pub env_var: String,
    pub accepted_keys: Vec<String>,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            env_var: "NETSCAN_LICENSE".to_string(),
            accepted_keys: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default()).context("Failed to encode defaults")?);

        if config_path.exists() {
            debug!("Loading configuration from: {}", config_path.display());
            settings = settings.add_source(config::File::from(config_path));
        } else {
            debug!("No configuration file at {}, using defaults", config_path.display());
        }

        settings = settings.add_source(
            config::Environment::with_prefix("NETSCAN")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("license.accepted_keys"),
        );

        let config: AppConfig = settings
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        info!("Configuration loaded");
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scanning.timing_template > 5 {
            return Err(anyhow::anyhow!("Timing template must be between 0-5"));
        }

        if self.scanning.version_intensity > 9 {
            return Err(anyhow::anyhow!("Version intensity must be between 0-9"));
        }

        if self.scanning.top_ports == 0 {
            return Err(anyhow::anyhow!("top_ports must be greater than 0"));
        }

        if self.scanning.timeout_secs == 0 {
            return Err(anyhow::anyhow!("timeout_secs must be greater than 0"));
        }

        crate::logging::parse_level(&self.logging.level)?;

        match self.logging.format.as_str() {
            "pretty" | "compact" | "json" => {}
            _ => return Err(anyhow::anyhow!("Invalid logging format: {}", self.logging.format)),
        }

        if self.persistence.state_file.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("persistence.state_file must not be empty"));
        }

        debug!("Configuration validation passed");
        Ok(())
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.scanning.timeout_secs)
    }

    pub fn timing(&self) -> TimingTemplate {
        TimingTemplate::from_level(self.scanning.timing_template)
    }
}
