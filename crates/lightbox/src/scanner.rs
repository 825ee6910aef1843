//! Reconciliation sweeps.
//!
//! A sweep lists artifacts, applies the same guard checks the reactive path
//! uses, and feeds anything eligible back through the pipeline. Sweeps keep no
//! state between runs; the artifact metadata is the only record of progress.

use crate::error::{PipelineError, Result};
use crate::guard::{Decision, SkipReason};
use crate::pipeline::{Pipeline, StageOutcome};
use lightbox_protocol::ArtifactSummary;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    Relocation,
    Analysis,
}

impl SweepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SweepKind::Relocation => "relocation",
            SweepKind::Analysis => "analysis",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub listed: usize,
    pub eligible: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub vanished: usize,
}

impl SweepStats {
    fn record(&mut self, result: &Result<StageOutcome>) {
        match result {
            Ok(StageOutcome::Skipped(_)) => self.skipped += 1,
            Ok(_) => self.succeeded += 1,
            Err(e) if e.is_benign() => self.vanished += 1,
            Err(PipelineError::Configuration { .. }) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

pub struct ReconciliationScanner {
    pipeline: Arc<Pipeline>,
    limiter: Arc<Semaphore>,
}

impl ReconciliationScanner {
    pub fn new(pipeline: Arc<Pipeline>, max_concurrent_invocations: usize) -> Self {
        Self {
            pipeline,
            limiter: Arc::new(Semaphore::new(max_concurrent_invocations.max(1))),
        }
    }

    /// Relocate inbox artifacts the reactive path missed.
    pub async fn relocation_sweep(&self, prefix: Option<&str>) -> Result<SweepStats> {
        let prefix = prefix
            .unwrap_or(self.pipeline.namespaces().inbox.as_str())
            .to_string();
        self.sweep(SweepKind::Relocation, &prefix).await
    }

    /// Analyze processed artifacts the reactive path missed.
    pub async fn analysis_sweep(&self, prefix: Option<&str>) -> Result<SweepStats> {
        let prefix = prefix
            .unwrap_or(self.pipeline.namespaces().processed.as_str())
            .to_string();
        self.sweep(SweepKind::Analysis, &prefix).await
    }

    fn precheck(&self, kind: SweepKind, artifact: &ArtifactSummary) -> Decision {
        let guard = self.pipeline.guard();
        match kind {
            SweepKind::Relocation => guard.should_relocate(artifact),
            // Left to the stage so the configuration error gets logged.
            SweepKind::Analysis => match guard.should_analyze(artifact) {
                Decision::Skip(SkipReason::MissingOwner) => Decision::Proceed,
                other => other,
            },
        }
    }

    /// Only a failure to list is returned as an error; per-artifact failures
    /// are counted and logged by the pipeline.
    pub async fn sweep(&self, kind: SweepKind, prefix: &str) -> Result<SweepStats> {
        let listed = self.pipeline.store().list(prefix).await?;
        let mut stats = SweepStats {
            listed: listed.len(),
            ..SweepStats::default()
        };

        let mut tasks = JoinSet::new();
        for artifact in listed {
            if let Decision::Skip(reason) = self.precheck(kind, &artifact) {
                debug!(path = %artifact.path, reason = %reason, "Not eligible");
                stats.skipped += 1;
                continue;
            }
            stats.eligible += 1;

            let permit = self
                .limiter
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| PipelineError::Internal(e.to_string()))?;
            let pipeline = self.pipeline.clone();
            tasks.spawn(async move {
                let _permit = permit;
                match kind {
                    SweepKind::Relocation => pipeline.relocate(&artifact).await,
                    SweepKind::Analysis => pipeline.analyze(&artifact.path).await,
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => stats.record(&result),
                Err(e) => {
                    error!(sweep = kind.as_str(), error = %e, "Sweep task panicked");
                    stats.failed += 1;
                }
            }
        }

        info!(
            sweep = kind.as_str(),
            prefix = %prefix,
            listed = stats.listed,
            eligible = stats.eligible,
            succeeded = stats.succeeded,
            skipped = stats.skipped,
            failed = stats.failed,
            vanished = stats.vanished,
            "Sweep finished"
        );
        Ok(stats)
    }
}

/// Runs both sweeps on independent periods until shutdown.
pub struct ScanScheduler {
    scanner: Arc<ReconciliationScanner>,
    relocation_every: Duration,
    analysis_every: Duration,
}

impl ScanScheduler {
    pub fn new(
        scanner: Arc<ReconciliationScanner>,
        relocation_every: Duration,
        analysis_every: Duration,
    ) -> Self {
        Self {
            scanner,
            relocation_every,
            analysis_every,
        }
    }

    /// Both sweeps fire once immediately, then on their periods. A sweep that
    /// overruns delays the next tick instead of bursting.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut relocation = tokio::time::interval(self.relocation_every);
        relocation.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut analysis = tokio::time::interval(self.analysis_every);
        analysis.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            relocation_secs = self.relocation_every.as_secs(),
            analysis_secs = self.analysis_every.as_secs(),
            "Scan scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = relocation.tick() => {
                    if let Err(e) = self.scanner.relocation_sweep(None).await {
                        warn!(error = %e, "Relocation sweep could not list artifacts");
                    }
                }

                _ = analysis.tick() => {
                    if let Err(e) = self.scanner.analysis_sweep(None).await {
                        warn!(error = %e, "Analysis sweep could not list artifacts");
                    }
                }
            }
        }

        info!("Scan scheduler stopped");
    }
}
