//! Service detection and version identification
//!
//! Runs version probing against the ports the port scan found open and maps
//! each port to the best description the scanner reports.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{collections::BTreeMap, sync::Arc, time::Instant};

use crate::{
    core::{ServiceDetector, ServiceMap},
    error::Result,
    logging::ScanLogger,
    nmap::{OutputParser, ToolOutcome, ToolRunner},
    target::Target,
};

static SERVICE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(\d+)/tcp[ \t]+open[ \t]+(\S+)(?:[ \t]+(.*?))?[ \t]*\r?$").expect("valid regex")
});

/// Parses the `PORT STATE SERVICE VERSION` table of `-sV` output.
///
/// The value is the version column when present, otherwise the service name.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceTableParser;

impl OutputParser for ServiceTableParser {
    type Output = ServiceMap;

    fn parse(&self, stdout: &str) -> Self::Output {
        let mut services = BTreeMap::new();

        for caps in SERVICE_LINE.captures_iter(stdout) {
            let Ok(port) = caps[1].parse::<u16>() else {
                continue;
            };
            let description = caps
                .get(3)
                .map(|m| m.as_str().trim())
                .filter(|version| !version.is_empty())
                .unwrap_or(&caps[2]);
            services.insert(port, description.to_string());
        }

        services
    }
}

pub struct NmapServiceDetector<P = ServiceTableParser> {
    runner: Arc<dyn ToolRunner>,
    parser: P,
    version_intensity: u8,
    log: ScanLogger,
}

impl NmapServiceDetector {
    pub fn new(runner: Arc<dyn ToolRunner>, version_intensity: u8, log: ScanLogger) -> Self {
        Self {
            runner,
            parser: ServiceTableParser,
            version_intensity: version_intensity.min(9),
            log,
        }
    }
}

impl<P> NmapServiceDetector<P> {
    pub fn with_parser<Q>(self, parser: Q) -> NmapServiceDetector<Q>
    where
        Q: OutputParser<Output = ServiceMap>,
    {
        NmapServiceDetector {
            runner: self.runner,
            parser,
            version_intensity: self.version_intensity,
            log: self.log,
        }
    }
}

#[async_trait]
impl<P> ServiceDetector for NmapServiceDetector<P>
where
    P: OutputParser<Output = ServiceMap>,
{
    async fn detect(&self, target: &Target, ports: &[u16]) -> Result<ServiceMap> {
        let ip = target.validate()?;
        if ports.is_empty() {
            tracing::debug!(parent: self.log.span(), "No ports to probe on {}", target);
            return Ok(ServiceMap::new());
        }

        let started = Instant::now();
        self.log.stage_start("service_detect", target);

        let port_list = ports.iter().map(u16::to_string).collect::<Vec<_>>().join(",");
        let args = vec![
            "-sV".to_string(),
            "--version-intensity".to_string(),
            self.version_intensity.to_string(),
            "-p".to_string(),
            port_list,
            ip.to_string(),
        ];

        match self.runner.run(&args).await? {
            ToolOutcome::TimedOut { limit } => {
                self.log.tool_timed_out("service_detect", target, limit);
                Ok(ServiceMap::new())
            }
            ToolOutcome::Exited(output) if !output.success() => {
                self.log.tool_failed("service_detect", target, output.status, &output.stderr);
                Ok(ServiceMap::new())
            }
            ToolOutcome::Exited(output) => {
                let services = self.parser.parse(&output.stdout);
                for (port, service) in &services {
                    tracing::info!(
                        parent: self.log.span(),
                        host = %target,
                        port = port,
                        service = service.as_str(),
                        event = "service_detection",
                        "Detected service {}:{} - {}",
                        target,
                        port,
                        service
                    );
                }
                self.log.stage_complete("service_detect", target, started.elapsed(), services.len());
                Ok(services)
            }
        }
    }
}
