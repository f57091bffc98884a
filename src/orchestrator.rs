//! Scan orchestration
//!
//! Drives one run through its phases:
//!
//! ```text
//! Init -> Resuming | Discovering -> PerTargetLoop -> Finalizing -> Done
//! ```
//!
//! The target list is checkpointed as soon as it is known and cleared once
//! every target has been processed, so an interrupted run resumes with the
//! same targets instead of rediscovering the range.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use crate::{
    config::{AppConfig, TargetErrorPolicy},
    core::{HostResult, Run, StagePipeline},
    error::{Result, ScannerError},
    logging::ScanLogger,
    persistence::{ScanState, StateStore},
    reporting::ReportWriter,
    resume::ResumeController,
    target::Target,
};

/// Run-level behaviour knobs
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub on_target_error: TargetErrorPolicy,
    pub checkpoint_each_target: bool,
    pub discard_corrupt_state: bool,
    pub report_path: PathBuf,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            on_target_error: config.workflow.on_target_error,
            checkpoint_each_target: config.persistence.checkpoint_each_target,
            discard_corrupt_state: config.persistence.discard_corrupt_state,
            report_path: config.output.report_path.clone(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[derive(Debug)]
enum Phase {
    Init,
    Resuming,
    Discovering,
    PerTargetLoop(Vec<Target>),
    Finalizing,
    Done,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Resuming => "resuming",
            Self::Discovering => "discovering",
            Self::PerTargetLoop(_) => "per_target_loop",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
        }
    }
}

pub struct ScanOrchestrator {
    stages: StagePipeline,
    store: Arc<dyn StateStore>,
    resume: ResumeController,
    reporter: Arc<dyn ReportWriter>,
    settings: OrchestratorSettings,
    log: ScanLogger,
}

impl ScanOrchestrator {
    pub fn new(
        stages: StagePipeline,
        store: Arc<dyn StateStore>,
        reporter: Arc<dyn ReportWriter>,
        settings: OrchestratorSettings,
        log: ScanLogger,
    ) -> Self {
        let resume = ResumeController::new(store.clone(), log.component("resume"))
            .discard_corrupt_state(settings.discard_corrupt_state);

        Self {
            stages,
            store,
            resume,
            reporter,
            settings,
            log,
        }
    }

    /// Scan `range` (or the pending targets of an interrupted run) and
    /// return every host with at least one open port.
    pub async fn run(&self, range: &str) -> Result<Run> {
        let started = Instant::now();
        let mut phase = Phase::Init;
        let mut run = Run::new();
        let mut deferred = Vec::new();

        loop {
            self.log.phase(phase.name());
            phase = match phase {
                Phase::Init => {
                    if self.resume.should_resume().await? {
                        Phase::Resuming
                    } else {
                        Phase::Discovering
                    }
                }
                Phase::Resuming => {
                    let targets = self.resume.pending_targets().await?;
                    tracing::info!(
                        parent: self.log.span(),
                        pending = targets.len(),
                        "Resuming interrupted run with {} pending target(s)",
                        targets.len()
                    );
                    self.checkpoint(&targets).await?;
                    Phase::PerTargetLoop(targets)
                }
                Phase::Discovering => {
                    let targets = self.stages.discovery.discover(range).await?;
                    tracing::info!(parent: self.log.span(), hosts = targets.len(), "Discovered {} host(s) in {}", targets.len(), range);
                    self.checkpoint(&targets).await?;
                    Phase::PerTargetLoop(targets)
                }
                Phase::PerTargetLoop(targets) => {
                    for (index, target) in targets.iter().enumerate() {
                        match self.scan_target(target).await {
                            Ok(Some(host)) => run.push(host),
                            Ok(None) => {}
                            Err(e) => {
                                self.log.error(&e, target.as_str());
                                match self.settings.on_target_error {
                                    TargetErrorPolicy::Defer if e.is_recoverable() => {
                                        tracing::warn!(parent: self.log.span(), host = %target, "Deferring {} to the next run", target);
                                        deferred.push(target.clone());
                                    }
                                    // Retrying a malformed address can never succeed.
                                    TargetErrorPolicy::Defer if matches!(e, ScannerError::InvalidAddress { .. }) => {
                                        tracing::warn!(parent: self.log.span(), host = %target, "Dropping {} from the pending list", target);
                                    }
                                    _ => return Err(e),
                                }
                            }
                        }

                        if self.settings.checkpoint_each_target {
                            let mut remaining = deferred.clone();
                            remaining.extend_from_slice(&targets[index + 1..]);
                            self.checkpoint(&remaining).await?;
                        }
                    }
                    Phase::Finalizing
                }
                Phase::Finalizing => {
                    self.checkpoint(&deferred).await?;
                    if run.is_empty() {
                        tracing::info!(parent: self.log.span(), "No hosts with open ports; skipping report");
                    } else {
                        self.write_report(&run).await?;
                    }
                    Phase::Done
                }
                Phase::Done => {
                    tracing::info!(
                        parent: self.log.span(),
                        hosts = run.len(),
                        deferred = deferred.len(),
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Run finished"
                    );
                    return Ok(run);
                }
            };
        }
    }

    /// All stages for one target; `None` when nothing is open
    async fn scan_target(&self, target: &Target) -> Result<Option<HostResult>> {
        let open_ports = self.stages.port_scanner.scan(target).await?;
        if open_ports.is_empty() {
            tracing::info!(parent: self.log.span(), host = %target, "No open ports on {}", target);
            return Ok(None);
        }

        let services = self.stages.service_detector.detect(target, &open_ports).await?;
        let os = self.stages.os_detector.fingerprint(target).await?;
        let checks = self.stages.checks.run_checks(target).await?;

        tracing::info!(
            parent: self.log.span(),
            host = %target,
            open_ports = open_ports.len(),
            "Finished {} with {} open port(s)",
            target,
            open_ports.len()
        );

        Ok(Some(HostResult {
            ip: target.clone(),
            open_ports,
            services,
            os,
            checks,
        }))
    }

    async fn checkpoint(&self, pending: &[Target]) -> Result<()> {
        self.store.save(&ScanState::new(pending.to_vec())).await
    }

    async fn write_report(&self, run: &Run) -> Result<()> {
        let path: &Path = &self.settings.report_path;
        self.reporter.write_report(run, path).await?;

        let shown = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        tracing::info!(
            parent: self.log.span(),
            path = %shown.display(),
            hosts = run.len(),
            "Results written to {}",
            shown.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::testing::MockStages,
        persistence::FileStateStore,
        reporting::testing::RecordingReportWriter,
    };
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        stages: Arc<MockStages>,
        store: Arc<FileStateStore>,
        reporter: Arc<RecordingReportWriter>,
        orchestrator: ScanOrchestrator,
    }

    fn harness(stages: MockStages, settings: OrchestratorSettings) -> Harness {
        let dir = TempDir::new().unwrap();
        let stages = Arc::new(stages);
        let store = Arc::new(FileStateStore::new(dir.path().join("scan_state.json"), ScanLogger::detached()));
        let reporter = Arc::new(RecordingReportWriter::default());
        let orchestrator = ScanOrchestrator::new(
            MockStages::pipeline(&stages),
            store.clone(),
            reporter.clone(),
            OrchestratorSettings {
                report_path: dir.path().join("scan_results.xlsx"),
                ..settings
            },
            ScanLogger::detached(),
        );
        Harness {
            _dir: dir,
            stages,
            store,
            reporter,
            orchestrator,
        }
    }

    fn targets(addresses: &[&str]) -> Vec<Target> {
        addresses.iter().map(|a| Target::new(*a)).collect()
    }

    fn ports(entries: &[(&str, &[u16])]) -> BTreeMap<String, Vec<u16>> {
        entries.iter().map(|(ip, p)| (ip.to_string(), p.to_vec())).collect()
    }

    async fn pending(h: &Harness) -> Vec<Target> {
        h.store.load().await.unwrap().unwrap().pending_targets
    }

    #[tokio::test]
    async fn test_single_host_full_pipeline() {
        let h = harness(
            MockStages {
                discovered: targets(&["192.168.1.10"]),
                open_ports: ports(&[("192.168.1.10", &[22, 80])]),
                services: BTreeMap::from([(22, "SSH".to_string()), (80, "HTTP".to_string())]),
                os: Some("Linux".to_string()),
                checks: BTreeMap::from([("smbv1".to_string(), false)]),
                ..MockStages::default()
            },
            OrchestratorSettings::default(),
        );

        let run = h.orchestrator.run("192.168.1.0/24").await.unwrap();

        assert_eq!(
            run.hosts(),
            &[HostResult {
                ip: Target::new("192.168.1.10"),
                open_ports: vec![22, 80],
                services: BTreeMap::from([(22, "SSH".to_string()), (80, "HTTP".to_string())]),
                os: Some("Linux".to_string()),
                checks: BTreeMap::from([("smbv1".to_string(), false)]),
            }]
        );
        assert!(pending(&h).await.is_empty());
        assert_eq!(h.reporter.reports(), vec![1]);
        assert_eq!(
            h.stages.calls(),
            vec![
                "discover 192.168.1.0/24",
                "scan 192.168.1.10",
                "detect 192.168.1.10",
                "fingerprint 192.168.1.10",
                "checks 192.168.1.10",
            ]
        );
    }

    #[tokio::test]
    async fn test_host_without_open_ports_is_skipped() {
        let h = harness(
            MockStages {
                discovered: targets(&["10.0.0.1", "10.0.0.2"]),
                open_ports: ports(&[("10.0.0.2", &[443])]),
                ..MockStages::default()
            },
            OrchestratorSettings::default(),
        );

        let run = h.orchestrator.run("10.0.0.0/24").await.unwrap();

        assert_eq!(run.len(), 1);
        assert_eq!(run.hosts()[0].ip, Target::new("10.0.0.2"));
        assert!(!h.stages.calls().contains(&"detect 10.0.0.1".to_string()));
    }

    #[tokio::test]
    async fn test_empty_run_writes_no_report() {
        let h = harness(MockStages::default(), OrchestratorSettings::default());

        let run = h.orchestrator.run("10.0.0.0/24").await.unwrap();

        assert!(run.is_empty());
        assert!(h.reporter.reports().is_empty());
        assert!(pending(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_resume_skips_discovery() {
        let h = harness(
            MockStages {
                discovered: targets(&["10.0.0.1"]),
                open_ports: ports(&[("10.0.0.7", &[22])]),
                ..MockStages::default()
            },
            OrchestratorSettings::default(),
        );
        h.store
            .save(&ScanState::new(targets(&["10.0.0.7", "10.0.0.8"])))
            .await
            .unwrap();

        let run = h.orchestrator.run("10.0.0.0/24").await.unwrap();

        assert_eq!(run.len(), 1);
        assert_eq!(run.hosts()[0].ip, Target::new("10.0.0.7"));
        assert!(h.stages.calls().iter().all(|call| !call.starts_with("discover")));
        assert!(pending(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_abort_keeps_run_start_checkpoint() {
        let h = harness(
            MockStages {
                discovered: targets(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]),
                open_ports: ports(&[("10.0.0.1", &[22])]),
                timing_out: ["10.0.0.2".to_string()].into(),
                ..MockStages::default()
            },
            OrchestratorSettings::default(),
        );

        let err = h.orchestrator.run("10.0.0.0/24").await.unwrap_err();

        assert!(matches!(err, ScannerError::ScanTimeout { .. }));
        assert_eq!(pending(&h).await, targets(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]));
        assert!(!h.stages.calls().contains(&"scan 10.0.0.3".to_string()));
        assert!(h.reporter.reports().is_empty());
    }

    #[tokio::test]
    async fn test_defer_leaves_failed_target_pending() {
        let h = harness(
            MockStages {
                discovered: targets(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]),
                open_ports: ports(&[("10.0.0.1", &[22]), ("10.0.0.3", &[80])]),
                timing_out: ["10.0.0.2".to_string()].into(),
                ..MockStages::default()
            },
            OrchestratorSettings {
                on_target_error: TargetErrorPolicy::Defer,
                ..OrchestratorSettings::default()
            },
        );

        let run = h.orchestrator.run("10.0.0.0/24").await.unwrap();

        assert_eq!(run.len(), 2);
        assert_eq!(pending(&h).await, targets(&["10.0.0.2"]));
    }

    #[tokio::test]
    async fn test_invalid_persisted_target_is_a_stage_error() {
        let h = harness(MockStages::default(), OrchestratorSettings::default());
        h.store.save(&ScanState::new(targets(&["10.0.0.300"]))).await.unwrap();

        let err = h.orchestrator.run("10.0.0.0/24").await.unwrap_err();
        assert!(matches!(err, ScannerError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn test_defer_drops_invalid_persisted_target() {
        let h = harness(
            MockStages {
                discovered: targets(&["10.0.0.1"]),
                open_ports: ports(&[("10.0.0.1", &[22])]),
                ..MockStages::default()
            },
            OrchestratorSettings {
                on_target_error: TargetErrorPolicy::Defer,
                ..OrchestratorSettings::default()
            },
        );
        h.store.save(&ScanState::new(targets(&["10.0.0.300"]))).await.unwrap();

        let first = h.orchestrator.run("10.0.0.0/24").await.unwrap();
        assert!(first.is_empty());
        assert!(pending(&h).await.is_empty());

        // With nothing left to resume the range is discovered again.
        let second = h.orchestrator.run("10.0.0.0/24").await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(
            h.stages.calls()[..3],
            ["scan 10.0.0.300", "discover 10.0.0.0/24", "scan 10.0.0.1"]
        );
    }

    #[tokio::test]
    async fn test_defer_still_propagates_tool_failure() {
        let h = harness(
            MockStages {
                discovered: targets(&["10.0.0.1", "10.0.0.2"]),
                failing: ["10.0.0.1".to_string()].into(),
                ..MockStages::default()
            },
            OrchestratorSettings {
                on_target_error: TargetErrorPolicy::Defer,
                ..OrchestratorSettings::default()
            },
        );

        let err = h.orchestrator.run("10.0.0.0/24").await.unwrap_err();

        assert!(matches!(err, ScannerError::Tool { .. }));
        assert_eq!(pending(&h).await, targets(&["10.0.0.1", "10.0.0.2"]));
        assert!(!h.stages.calls().contains(&"scan 10.0.0.2".to_string()));
    }

    #[tokio::test]
    async fn test_per_target_checkpoint_lists_deferred_before_remaining() {
        let h = harness(
            MockStages {
                discovered: targets(&["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"]),
                open_ports: ports(&[("10.0.0.2", &[22])]),
                timing_out: ["10.0.0.1".to_string()].into(),
                failing: ["10.0.0.3".to_string()].into(),
                ..MockStages::default()
            },
            OrchestratorSettings {
                on_target_error: TargetErrorPolicy::Defer,
                checkpoint_each_target: true,
                ..OrchestratorSettings::default()
            },
        );

        // 10.0.0.1 is deferred, 10.0.0.2 completes, 10.0.0.3 aborts the run
        // and leaves the checkpoint written after 10.0.0.2 on disk.
        h.orchestrator.run("10.0.0.0/24").await.unwrap_err();
        assert_eq!(pending(&h).await, targets(&["10.0.0.1", "10.0.0.3", "10.0.0.4"]));
    }

    #[tokio::test]
    async fn test_per_target_checkpoint_shrinks_pending_list() {
        let h = harness(
            MockStages {
                discovered: targets(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]),
                open_ports: ports(&[("10.0.0.1", &[22])]),
                timing_out: ["10.0.0.3".to_string()].into(),
                ..MockStages::default()
            },
            OrchestratorSettings {
                checkpoint_each_target: true,
                ..OrchestratorSettings::default()
            },
        );

        // The third target aborts the run after two per-target checkpoints.
        h.orchestrator.run("10.0.0.0/24").await.unwrap_err();
        assert_eq!(pending(&h).await, targets(&["10.0.0.3"]));
    }

    #[tokio::test]
    async fn test_corrupted_state_aborts_before_any_stage() {
        let h = harness(MockStages::default(), OrchestratorSettings::default());
        std::fs::write(h.store.path(), "[[[").unwrap();

        let err = h.orchestrator.run("10.0.0.0/24").await.unwrap_err();
        assert!(err.is_corrupted_state());
        assert!(h.stages.calls().is_empty());
    }
}
