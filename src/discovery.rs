//! Host discovery
//!
//! Finds live hosts in the configured range with escalating probe
//! strategies. Cheap probes are often filtered by network policy, so each
//! strategy only runs when every earlier one came back empty.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{collections::BTreeSet, net::IpAddr, sync::Arc, time::Instant};

use crate::{
    core::HostDiscoverer,
    error::Result,
    logging::ScanLogger,
    nmap::{OutputParser, ToolOutcome, ToolRunner},
    target::{AddressRange, Target},
};

static SCAN_REPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Nmap scan report for (?:\S+ \()?([0-9A-Fa-f:.]+)\)?").expect("valid regex")
});

/// One ping-scan flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeStrategy {
    pub name: &'static str,
    pub flag: &'static str,
}

/// Broadcast address resolution, then ICMP echo, then TCP connection probes
pub const PROBE_STRATEGIES: [ProbeStrategy; 3] = [
    ProbeStrategy {
        name: "arp",
        flag: "-PR",
    },
    ProbeStrategy {
        name: "icmp_echo",
        flag: "-PE",
    },
    ProbeStrategy {
        name: "tcp_connect",
        flag: "-PS21,22,80,443,445,3389",
    },
];

/// Extracts addresses from "Nmap scan report for ..." lines
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanReportParser;

impl OutputParser for ScanReportParser {
    type Output = BTreeSet<IpAddr>;

    fn parse(&self, stdout: &str) -> Self::Output {
        SCAN_REPORT
            .captures_iter(stdout)
            .filter_map(|caps| caps[1].parse::<IpAddr>().ok())
            .collect()
    }
}

pub struct NmapHostDiscovery<P = ScanReportParser> {
    runner: Arc<dyn ToolRunner>,
    parser: P,
    log: ScanLogger,
}

impl NmapHostDiscovery {
    pub fn new(runner: Arc<dyn ToolRunner>, log: ScanLogger) -> Self {
        Self {
            runner,
            parser: ScanReportParser,
            log,
        }
    }
}

impl<P> NmapHostDiscovery<P>
where
    P: OutputParser<Output = BTreeSet<IpAddr>>,
{
    pub fn with_parser<Q>(self, parser: Q) -> NmapHostDiscovery<Q>
    where
        Q: OutputParser<Output = BTreeSet<IpAddr>>,
    {
        NmapHostDiscovery {
            runner: self.runner,
            parser,
            log: self.log,
        }
    }

    async fn probe(&self, range: &AddressRange, strategy: &ProbeStrategy) -> Result<BTreeSet<IpAddr>> {
        let args = vec!["-sn".to_string(), strategy.flag.to_string(), range.to_string()];
        let found = match self.runner.run(&args).await? {
            ToolOutcome::TimedOut { limit } => {
                self.log.tool_timed_out(strategy.name, range, limit);
                BTreeSet::new()
            }
            ToolOutcome::Exited(output) if !output.success() => {
                self.log.tool_failed(strategy.name, range, output.status, &output.stderr);
                BTreeSet::new()
            }
            ToolOutcome::Exited(output) => self.parser.parse(&output.stdout),
        };

        // Ping scans may report the network or broadcast address of a
        // neighbouring segment; only keep what we were asked about.
        Ok(found.into_iter().filter(|ip| range.contains(*ip)).collect())
    }
}

#[async_trait]
impl<P> HostDiscoverer for NmapHostDiscovery<P>
where
    P: OutputParser<Output = BTreeSet<IpAddr>>,
{
    async fn discover(&self, range: &str) -> Result<Vec<Target>> {
        let range = AddressRange::parse(range)?;
        let started = Instant::now();
        self.log.stage_start("discovery", &range);

        for strategy in &PROBE_STRATEGIES {
            tracing::debug!(parent: self.log.span(), strategy = strategy.name, "Probing {}", range);
            let hosts = self.probe(&range, strategy).await?;
            if !hosts.is_empty() {
                tracing::info!(
                    parent: self.log.span(),
                    strategy = strategy.name,
                    hosts = hosts.len(),
                    "Discovered {} live host(s) in {}",
                    hosts.len(),
                    range
                );
                self.log.stage_complete("discovery", &range, started.elapsed(), hosts.len());
                return Ok(hosts.into_iter().map(Target::from).collect());
            }
        }

        tracing::info!(parent: self.log.span(), "No live hosts found in {}", range);
        self.log.stage_complete("discovery", &range, started.elapsed(), 0);
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ScannerError, nmap::testing::ScriptedRunner};

    const PING_OUTPUT: &str = "\
Starting Nmap 7.94 ( https://nmap.org )
Nmap scan report for 192.168.1.20
Host is up (0.00031s latency).
Nmap scan report for printer.lan (192.168.1.3)
Host is up (0.0011s latency).
Nmap scan report for 192.168.1.100
Host is up (0.00042s latency).
Nmap done: 256 IP addresses (3 hosts up) scanned in 2.10 seconds
";

    fn discovery(runner: &Arc<ScriptedRunner>) -> NmapHostDiscovery {
        NmapHostDiscovery::new(runner.clone(), ScanLogger::detached())
    }

    #[test]
    fn test_parser_extracts_plain_and_named_hosts() {
        let hosts = ScanReportParser.parse(PING_OUTPUT);
        let hosts: Vec<String> = hosts.iter().map(|ip| ip.to_string()).collect();
        assert_eq!(hosts, vec!["192.168.1.3", "192.168.1.20", "192.168.1.100"]);
    }

    #[tokio::test]
    async fn test_first_productive_strategy_wins() {
        let runner = Arc::new(ScriptedRunner::new([ToolOutcome::completed(PING_OUTPUT)]));
        let targets = discovery(&runner).discover("192.168.1.0/24").await.unwrap();

        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0], Target::new("192.168.1.3"));
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec!["-sn", "-PR", "192.168.1.0/24"]);
    }

    #[tokio::test]
    async fn test_escalates_past_empty_failed_and_timed_out_probes() {
        let runner = Arc::new(ScriptedRunner::new([
            ToolOutcome::failed(1, "Failed to resolve"),
            ToolOutcome::TimedOut {
                limit: std::time::Duration::from_secs(300),
            },
            ToolOutcome::completed("Nmap scan report for 10.0.0.9\nHost is up.\n"),
        ]));
        let targets = discovery(&runner).discover("10.0.0.0/24").await.unwrap();

        assert_eq!(targets, vec![Target::new("10.0.0.9")]);
        let flags: Vec<String> = runner.calls().iter().map(|c| c[1].clone()).collect();
        assert_eq!(flags, vec!["-PR", "-PE", "-PS21,22,80,443,445,3389"]);
    }

    #[tokio::test]
    async fn test_out_of_range_addresses_are_dropped() {
        let runner = Arc::new(ScriptedRunner::new([ToolOutcome::completed(
            "Nmap scan report for 10.0.1.1\nNmap scan report for 10.0.0.4\n",
        )]));
        let targets = discovery(&runner).discover("10.0.0.0/24").await.unwrap();
        assert_eq!(targets, vec![Target::new("10.0.0.4")]);
    }

    #[tokio::test]
    async fn test_nothing_found_anywhere() {
        let runner = Arc::new(ScriptedRunner::default());
        let targets = discovery(&runner).discover("10.0.0.0/30").await.unwrap();
        assert!(targets.is_empty());
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_range_never_invokes_tool() {
        let runner = Arc::new(ScriptedRunner::default());
        let err = discovery(&runner).discover("10.0.0.0/99").await.unwrap_err();
        assert!(matches!(err, ScannerError::InvalidAddress { .. }));
        assert!(runner.calls().is_empty());
    }

    /// Reports the same addresses for any output
    struct FixedHosts(&'static [&'static str]);

    impl OutputParser for FixedHosts {
        type Output = BTreeSet<IpAddr>;

        fn parse(&self, _stdout: &str) -> Self::Output {
            self.0.iter().filter_map(|ip| ip.parse().ok()).collect()
        }
    }

    #[tokio::test]
    async fn test_custom_parser_results_are_range_filtered() {
        let runner = Arc::new(ScriptedRunner::new([ToolOutcome::completed("<nmaprun/>")]));
        let hosts = discovery(&runner)
            .with_parser(FixedHosts(&["192.168.1.5", "10.9.9.9"]))
            .discover("192.168.1.0/24")
            .await
            .unwrap();

        assert_eq!(hosts, vec![Target::new("192.168.1.5")]);
        assert_eq!(runner.calls().len(), 1);
    }
}
