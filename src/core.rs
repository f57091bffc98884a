//! Core application framework and traits
//!
//! Defines the stage traits every scanning backend implements, the per-host
//! result model, and [`Application`], which wires the default nmap-backed
//! components from configuration and maps a run to a process exit code.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

use crate::{
    checks::NmapDetailedChecks,
    config::AppConfig,
    discovery::NmapHostDiscovery,
    error::{Result, ScannerError},
    license::LicenseCheck,
    logging::ScanLogger,
    nmap::{NmapRunner, ToolRunner},
    orchestrator::{OrchestratorSettings, ScanOrchestrator},
    os_detection::NmapOsDetector,
    scanner::NmapPortScanner,
    service::NmapServiceDetector,
    target::Target,
};

/// Port to service description
pub type ServiceMap = BTreeMap<u16, String>;

/// Check name to finding
pub type CheckResults = BTreeMap<String, bool>;

/// Host discovery over an address range
#[async_trait]
pub trait HostDiscoverer: Send + Sync {
    /// Live hosts in `range`, sorted by address
    async fn discover(&self, range: &str) -> Result<Vec<Target>>;
}

/// Open port enumeration for one host
#[async_trait]
pub trait PortScanner: Send + Sync {
    /// Open ports, ascending and unique
    async fn scan(&self, target: &Target) -> Result<Vec<u16>>;
}

/// Service identification on known-open ports
#[async_trait]
pub trait ServiceDetector: Send + Sync {
    async fn detect(&self, target: &Target, ports: &[u16]) -> Result<ServiceMap>;
}

/// Operating system detection trait
#[async_trait]
pub trait OsDetector: Send + Sync {
    async fn fingerprint(&self, target: &Target) -> Result<Option<String>>;
}

/// Fixed set of named vulnerability checks
#[async_trait]
pub trait VulnerabilityChecker: Send + Sync {
    async fn run_checks(&self, target: &Target) -> Result<CheckResults>;
}

/// Everything learned about one host with at least one open port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostResult {
    pub ip: Target,
    pub open_ports: Vec<u16>,
    pub services: ServiceMap,
    pub os: Option<String>,
    pub checks: CheckResults,
}

/// Ordered results of one orchestrator run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Run {
    hosts: Vec<HostResult>,
}

impl Run {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, host: HostResult) {
        self.hosts.push(host);
    }

    pub fn hosts(&self) -> &[HostResult] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// The five stage implementations used by one orchestrator
#[derive(Clone)]
pub struct StagePipeline {
    pub discovery: Arc<dyn HostDiscoverer>,
    pub port_scanner: Arc<dyn PortScanner>,
    pub service_detector: Arc<dyn ServiceDetector>,
    pub os_detector: Arc<dyn OsDetector>,
    pub checks: Arc<dyn VulnerabilityChecker>,
}

impl StagePipeline {
    /// nmap-backed stages sharing one runner
    pub fn nmap(config: &AppConfig, runner: Arc<dyn ToolRunner>, log: &ScanLogger) -> Self {
        let timing = config.timing();
        tracing::debug!(
            parent: log.span(),
            timing = timing.name(),
            top_ports = config.scanning.top_ports,
            version_intensity = config.scanning.version_intensity,
            "Configured nmap stages"
        );
        Self {
            discovery: Arc::new(NmapHostDiscovery::new(runner.clone(), log.component("discovery"))),
            port_scanner: Arc::new(NmapPortScanner::new(
                runner.clone(),
                config.scanning.top_ports,
                timing,
                log.component("port_scan"),
            )),
            service_detector: Arc::new(NmapServiceDetector::new(
                runner.clone(),
                config.scanning.version_intensity,
                log.component("service_detect"),
            )),
            os_detector: Arc::new(NmapOsDetector::new(runner.clone(), timing, log.component("os_fingerprint"))),
            checks: Arc::new(NmapDetailedChecks::new(runner, log.component("detailed_checks"))),
        }
    }
}

/// How a launch ended
#[derive(Debug)]
pub enum RunOutcome {
    Completed(Run),
    LicenseRejected,
    Failed(ScannerError),
}

impl RunOutcome {
    /// Process exit code: 0 success, 1 license rejected, 2 run failure
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Completed(_) => 0,
            Self::LicenseRejected => 1,
            Self::Failed(_) => 2,
        }
    }
}

/// Main application: license gate in front of the orchestrator
pub struct Application {
    license: Arc<dyn LicenseCheck>,
    orchestrator: ScanOrchestrator,
    log: ScanLogger,
}

impl Application {
    /// Create a new application instance with default implementations
    pub fn new(config: &AppConfig) -> Self {
        let log = ScanLogger::run();
        let runner: Arc<dyn ToolRunner> = Arc::new(NmapRunner::new(
            config.scanning.nmap_path.clone(),
            config.tool_timeout(),
        ));

        let orchestrator = ScanOrchestrator::new(
            StagePipeline::nmap(config, runner, &log),
            crate::persistence::create_state_store(config, &log),
            crate::reporting::create_report_writer(config, &log),
            OrchestratorSettings::from_config(config),
            log.component("orchestrator"),
        );

        let license = crate::license::create_license_check(config, &log.component("license"));
        Self::with_components(license, orchestrator, log)
    }

    pub fn with_components(license: Arc<dyn LicenseCheck>, orchestrator: ScanOrchestrator, log: ScanLogger) -> Self {
        Self {
            license,
            orchestrator,
            log,
        }
    }

    /// Check the license, then scan `range` to completion
    pub async fn launch(&self, range: &str, license_key: &str) -> RunOutcome {
        if !self.license.is_valid(license_key) {
            tracing::error!(parent: self.log.span(), "License key rejected");
            return RunOutcome::LicenseRejected;
        }

        tracing::info!(parent: self.log.span(), range = range, "Starting scan run");
        match self.orchestrator.run(range).await {
            Ok(run) => {
                tracing::info!(parent: self.log.span(), hosts = run.len(), "Scan run completed");
                RunOutcome::Completed(run)
            }
            Err(e) => {
                self.log.error(&e, "scan run");
                RunOutcome::Failed(e)
            }
        }
    }
}
