//! Detailed vulnerability checks
//!
//! Each check is one NSE script run against a well-known port whose output
//! is searched for a finding signature. A failed or timed-out script simply
//! reports the finding as absent.

use async_trait::async_trait;
use std::{collections::BTreeMap, sync::Arc, time::Instant};

use crate::{
    core::{CheckResults, VulnerabilityChecker},
    error::Result,
    logging::ScanLogger,
    nmap::{OutputParser, ToolOutcome, ToolRunner},
    target::Target,
};

/// One script-backed check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckProbe {
    /// Key in the per-host check results
    pub name: &'static str,
    pub script: &'static str,
    pub port: u16,
    /// Any of these substrings in the script output means the finding holds
    pub signatures: &'static [&'static str],
}

pub const CHECK_PROBES: [CheckProbe; 3] = [
    CheckProbe {
        name: "smbv1",
        script: "smb-protocols",
        port: 445,
        signatures: &["SMBv1 enabled"],
    },
    CheckProbe {
        name: "anonymous_share",
        script: "smb-enum-shares",
        port: 445,
        signatures: &["Anonymous login"],
    },
    CheckProbe {
        name: "weak_tls",
        script: "ssl-enum-ciphers",
        port: 443,
        signatures: &["TLSv1.0", "SSLv3"],
    },
];

/// Substring match over script output
#[derive(Debug, Clone, Copy)]
pub struct SignatureParser {
    signatures: &'static [&'static str],
}

impl SignatureParser {
    pub fn new(signatures: &'static [&'static str]) -> Self {
        Self { signatures }
    }
}

impl OutputParser for SignatureParser {
    type Output = bool;

    fn parse(&self, stdout: &str) -> bool {
        self.signatures.iter().any(|signature| stdout.contains(signature))
    }
}

/// Runs every probe in order, each with its own parser
pub struct NmapDetailedChecks<P = SignatureParser> {
    runner: Arc<dyn ToolRunner>,
    probes: Vec<(CheckProbe, P)>,
    log: ScanLogger,
}

impl NmapDetailedChecks {
    pub fn new(runner: Arc<dyn ToolRunner>, log: ScanLogger) -> Self {
        Self::with_probes(runner, CHECK_PROBES.to_vec(), log)
    }

    pub fn with_probes(runner: Arc<dyn ToolRunner>, probes: Vec<CheckProbe>, log: ScanLogger) -> Self {
        let probes = probes
            .into_iter()
            .map(|probe| (probe, SignatureParser::new(probe.signatures)))
            .collect();
        Self { runner, probes, log }
    }
}

impl<P> NmapDetailedChecks<P>
where
    P: OutputParser<Output = bool>,
{
    /// Replace each probe's parser with one built from the probe
    pub fn with_parsers<Q, F>(self, build: F) -> NmapDetailedChecks<Q>
    where
        Q: OutputParser<Output = bool>,
        F: Fn(&CheckProbe) -> Q,
    {
        NmapDetailedChecks {
            runner: self.runner,
            probes: self
                .probes
                .into_iter()
                .map(|(probe, _)| {
                    let parser = build(&probe);
                    (probe, parser)
                })
                .collect(),
            log: self.log,
        }
    }

    async fn run_probe(&self, target: &Target, ip: &str, probe: &CheckProbe, parser: &P) -> Result<bool> {
        let args = vec![
            "--script".to_string(),
            probe.script.to_string(),
            "-p".to_string(),
            probe.port.to_string(),
            ip.to_string(),
        ];

        let finding = match self.runner.run(&args).await? {
            ToolOutcome::TimedOut { limit } => {
                self.log.tool_timed_out(probe.name, target, limit);
                false
            }
            ToolOutcome::Exited(output) if !output.success() => {
                self.log.tool_failed(probe.name, target, output.status, &output.stderr);
                false
            }
            ToolOutcome::Exited(output) => parser.parse(&output.stdout),
        };

        if finding {
            tracing::warn!(
                parent: self.log.span(),
                host = %target,
                check = probe.name,
                event = "finding",
                "{} finding on {}",
                probe.name,
                target
            );
        }
        Ok(finding)
    }
}

#[async_trait]
impl<P> VulnerabilityChecker for NmapDetailedChecks<P>
where
    P: OutputParser<Output = bool>,
{
    async fn run_checks(&self, target: &Target) -> Result<CheckResults> {
        let ip = target.validate()?.to_string();
        let started = Instant::now();
        self.log.stage_start("detailed_checks", target);

        let mut results = BTreeMap::new();
        for (probe, parser) in &self.probes {
            let finding = self.run_probe(target, &ip, probe, parser).await?;
            results.insert(probe.name.to_string(), finding);
        }

        let findings = results.values().filter(|found| **found).count();
        self.log.stage_complete("detailed_checks", target, started.elapsed(), findings);
        Ok(results)
    }
}
