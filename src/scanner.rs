//! Port scanning
//!
//! Enumerates the open TCP ports of one target from the scanner's grepable
//! output. A timeout here is the one stage timeout that escalates to the
//! caller; a failed run is treated as "nothing open".

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{collections::BTreeSet, sync::Arc, time::Instant};

use crate::{
    core::PortScanner,
    error::{Result, ScannerError},
    logging::ScanLogger,
    nmap::{OutputParser, ToolOutcome, ToolRunner},
    target::Target,
    timing::TimingTemplate,
};

static PORTS_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r"Ports: ([^\t\n]*)").expect("valid regex"));

/// Parses the `Ports:` field of `-oG` output.
///
/// Entries look like `22/open/tcp//ssh///`; only the `open` state counts
/// (`open|filtered` does not). The result is ascending and de-duplicated.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrepablePortParser;

impl OutputParser for GrepablePortParser {
    type Output = Vec<u16>;

    fn parse(&self, stdout: &str) -> Self::Output {
        let mut ports = BTreeSet::new();

        for field in PORTS_FIELD.captures_iter(stdout) {
            for entry in field[1].split(',') {
                let mut parts = entry.trim().split('/');
                let port = parts.next().and_then(|p| p.trim().parse::<u16>().ok());
                let state = parts.next().map(str::trim);
                if let (Some(port), Some("open")) = (port, state) {
                    ports.insert(port);
                }
            }
        }

        ports.into_iter().collect()
    }
}

pub struct NmapPortScanner<P = GrepablePortParser> {
    runner: Arc<dyn ToolRunner>,
    parser: P,
    top_ports: usize,
    timing: TimingTemplate,
    log: ScanLogger,
}

impl NmapPortScanner {
    pub fn new(runner: Arc<dyn ToolRunner>, top_ports: usize, timing: TimingTemplate, log: ScanLogger) -> Self {
        Self {
            runner,
            parser: GrepablePortParser,
            top_ports,
            timing,
            log,
        }
    }
}

impl<P> NmapPortScanner<P> {
    pub fn with_parser<Q>(self, parser: Q) -> NmapPortScanner<Q>
    where
        Q: OutputParser<Output = Vec<u16>>,
    {
        NmapPortScanner {
            runner: self.runner,
            parser,
            top_ports: self.top_ports,
            timing: self.timing,
            log: self.log,
        }
    }
}

#[async_trait]
impl<P> PortScanner for NmapPortScanner<P>
where
    P: OutputParser<Output = Vec<u16>>,
{
    async fn scan(&self, target: &Target) -> Result<Vec<u16>> {
        let ip = target.validate()?;
        let started = Instant::now();
        self.log.stage_start("port_scan", target);

        let args = vec![
            self.timing.nmap_flag(),
            "--top-ports".to_string(),
            self.top_ports.to_string(),
            "-oG".to_string(),
            "-".to_string(),
            ip.to_string(),
        ];

        match self.runner.run(&args).await? {
            ToolOutcome::TimedOut { limit } => {
                self.log.tool_timed_out("port_scan", target, limit);
                Err(ScannerError::scan_timeout("port_scan", target.as_str(), limit.as_secs()))
            }
            ToolOutcome::Exited(output) if !output.success() => {
                self.log.tool_failed("port_scan", target, output.status, &output.stderr);
                Ok(Vec::new())
            }
            ToolOutcome::Exited(output) => {
                let ports = self.parser.parse(&output.stdout);
                self.log.stage_complete("port_scan", target, started.elapsed(), ports.len());
                Ok(ports)
            }
        }
    }
}
