//! Operating system fingerprinting
//!
//! Delegates TCP/IP stack fingerprinting to nmap's `-O` mode and reduces the
//! report to a single description line.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{sync::Arc, time::Instant};

use crate::{
    core::OsDetector,
    error::Result,
    logging::ScanLogger,
    nmap::{OutputParser, ToolOutcome, ToolRunner},
    target::Target,
    timing::TimingTemplate,
};

/// Patterns tried in order; the first match wins
static OS_PATTERNS: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"(?m)^OS details:[ \t]*(.+?)[ \t]*\r?$").expect("valid regex"),
        Regex::new(r"(?m)^Running(?: \(JUST GUESSING\))?:[ \t]*(.+?)[ \t]*\r?$").expect("valid regex"),
        Regex::new(r"\tOS: ([^\t\n]+)").expect("valid regex"),
    ]
});

/// Extracts the operating system description from fingerprinting output
#[derive(Debug, Clone, Copy, Default)]
pub struct OsReportParser;

impl OutputParser for OsReportParser {
    type Output = Option<String>;

    fn parse(&self, stdout: &str) -> Self::Output {
        OS_PATTERNS.iter().find_map(|pattern| {
            pattern
                .captures(stdout)
                .map(|caps| caps[1].trim().to_string())
                .filter(|os| !os.is_empty())
        })
    }
}

pub struct NmapOsDetector<P = OsReportParser> {
    runner: Arc<dyn ToolRunner>,
    parser: P,
    timing: TimingTemplate,
    log: ScanLogger,
}

impl NmapOsDetector {
    pub fn new(runner: Arc<dyn ToolRunner>, timing: TimingTemplate, log: ScanLogger) -> Self {
        Self {
            runner,
            parser: OsReportParser,
            timing,
            log,
        }
    }
}

impl<P> NmapOsDetector<P> {
    pub fn with_parser<Q>(self, parser: Q) -> NmapOsDetector<Q>
    where
        Q: OutputParser<Output = Option<String>>,
    {
        NmapOsDetector {
            runner: self.runner,
            parser,
            timing: self.timing,
            log: self.log,
        }
    }
}

#[async_trait]
impl<P> OsDetector for NmapOsDetector<P>
where
    P: OutputParser<Output = Option<String>>,
{
    async fn fingerprint(&self, target: &Target) -> Result<Option<String>> {
        let ip = target.validate()?;
        let started = Instant::now();
        self.log.stage_start("os_fingerprint", target);

        let args = vec!["-O".to_string(), self.timing.nmap_flag(), ip.to_string()];

        match self.runner.run(&args).await? {
            ToolOutcome::TimedOut { limit } => {
                self.log.tool_timed_out("os_fingerprint", target, limit);
                Ok(None)
            }
            ToolOutcome::Exited(output) if !output.success() => {
                self.log.tool_failed("os_fingerprint", target, output.status, &output.stderr);
                Ok(None)
            }
            ToolOutcome::Exited(output) => {
                let os = self.parser.parse(&output.stdout);
                match &os {
                    Some(os) => tracing::info!(parent: self.log.span(), host = %target, os = os.as_str(), "OS identified for {}: {}", target, os),
                    None => tracing::debug!(parent: self.log.span(), host = %target, "No OS match for {}", target),
                }
                self.log.stage_complete("os_fingerprint", target, started.elapsed(), usize::from(os.is_some()));
                Ok(os)
            }
        }
    }
}
