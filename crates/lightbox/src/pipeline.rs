//! Pipeline invocations.
//!
//! An invocation is one attempt to move one artifact forward: triggered by an
//! inbox notification, a sweep hit, or a manual `process`. Each carries its
//! own deadline and credentials and shares nothing mutable with others.

use crate::analyze::AnalysisStage;
use crate::error::{PipelineError, Result};
use crate::guard::{IdempotencyGuard, SkipReason};
use crate::relocate::RelocationStage;
use crate::results::ResultStore;
use crate::services::{AnnotationClient, CategorizerClient, ServiceCredentials};
use crate::store::ArtifactStore;
use lightbox_protocol::defaults::DEFAULT_INVOCATION_TIMEOUT_SECS;
use lightbox_protocol::{
    ArtifactSummary, Category, InboxNotification, InvocationId, Namespaces, RecordId,
};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

/// Deadline and credentials for a single invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    id: InvocationId,
    deadline: Instant,
    credentials: ServiceCredentials,
}

impl Invocation {
    pub fn new(timeout: Duration, credentials: ServiceCredentials) -> Self {
        Self {
            id: InvocationId::new(),
            deadline: Instant::now() + timeout,
            credentials,
        }
    }

    pub fn id(&self) -> &InvocationId {
        &self.id
    }

    pub fn credentials(&self) -> &ServiceCredentials {
        &self.credentials
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn ensure_time_left(&self) -> Result<()> {
        if self.is_expired() {
            Err(PipelineError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }

    /// Run `fut` within whatever is left of the budget.
    pub async fn bounded<T, E, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<PipelineError>,
    {
        self.ensure_time_left()?;
        match tokio::time::timeout_at(self.deadline, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(PipelineError::DeadlineExceeded),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Skipped(SkipReason),
    Relocated {
        destination: String,
    },
    Analyzed {
        record_id: RecordId,
        category: Category,
        public: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Relocate,
    Analyze,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Relocate => "relocate",
            Stage::Analyze => "analyze",
        }
    }
}

/// Tunables that are not collaborators.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub namespaces: Namespaces,
    pub invocation_timeout: Duration,
    pub max_decode_attempts: Option<u32>,
    pub credentials: ServiceCredentials,
    /// Where working copies are created; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            namespaces: Namespaces::default(),
            invocation_timeout: Duration::from_secs(DEFAULT_INVOCATION_TIMEOUT_SECS),
            max_decode_attempts: None,
            credentials: ServiceCredentials::default(),
            scratch_dir: None,
        }
    }
}

pub struct Pipeline {
    store: Arc<dyn ArtifactStore>,
    guard: Arc<IdempotencyGuard>,
    relocation: RelocationStage,
    analysis: AnalysisStage,
    invocation_timeout: Duration,
    credentials: ServiceCredentials,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        results: Arc<dyn ResultStore>,
        annotator: Arc<dyn AnnotationClient>,
        categorizer: Arc<dyn CategorizerClient>,
        settings: PipelineSettings,
    ) -> Self {
        let guard = Arc::new(IdempotencyGuard::new(
            store.clone(),
            settings.namespaces,
            settings.max_decode_attempts,
        ));
        let relocation = RelocationStage::new(store.clone(), guard.clone(), settings.scratch_dir);
        let analysis =
            AnalysisStage::new(store.clone(), results, annotator, categorizer, guard.clone());
        Self {
            store,
            guard,
            relocation,
            analysis,
            invocation_timeout: settings.invocation_timeout,
            credentials: settings.credentials,
        }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    pub fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    pub fn namespaces(&self) -> &Namespaces {
        self.guard.namespaces()
    }

    /// A fresh invocation with the configured budget.
    pub fn invocation(&self) -> Invocation {
        Invocation::new(self.invocation_timeout, self.credentials.clone())
    }

    /// Route an inbox-write notification. Writes into the processed namespace
    /// fan out to analysis; everything else is a relocation candidate.
    pub async fn handle_notification(&self, notification: &InboxNotification) -> Result<StageOutcome> {
        let summary = ArtifactSummary::from(notification.clone());
        if self.namespaces().is_processed(&summary.path) {
            self.analyze(&summary.path).await
        } else {
            self.relocate(&summary).await
        }
    }

    pub async fn relocate(&self, declared: &ArtifactSummary) -> Result<StageOutcome> {
        self.relocate_with(declared, &self.invocation()).await
    }

    pub async fn analyze(&self, path: &str) -> Result<StageOutcome> {
        self.analyze_with(path, &self.invocation()).await
    }

    pub async fn relocate_with(
        &self,
        declared: &ArtifactSummary,
        inv: &Invocation,
    ) -> Result<StageOutcome> {
        let span = invocation_span(inv, Stage::Relocate, &declared.path);
        let result = self.relocation.run(declared, inv).instrument(span.clone()).await;
        span.in_scope(|| log_outcome(Stage::Relocate, &declared.path, &result));
        result
    }

    pub async fn analyze_with(&self, path: &str, inv: &Invocation) -> Result<StageOutcome> {
        let span = invocation_span(inv, Stage::Analyze, path);
        let result = self.analysis.run(path, inv).instrument(span.clone()).await;
        span.in_scope(|| log_outcome(Stage::Analyze, path, &result));
        result
    }

    /// Run one stored artifact through every stage it is eligible for: an
    /// inbox artifact is relocated and its processed copy analyzed.
    pub async fn process(&self, path: &str) -> Result<Vec<StageOutcome>> {
        let summary = self.store.stat(path).await?;
        if self.namespaces().is_processed(path) {
            return Ok(vec![self.analyze(path).await?]);
        }

        let relocated = self.relocate(&summary).await?;
        let mut outcomes = vec![relocated.clone()];
        if let StageOutcome::Relocated { destination } = relocated {
            outcomes.push(self.analyze(&destination).await?);
        }
        Ok(outcomes)
    }
}

fn invocation_span(inv: &Invocation, stage: Stage, path: &str) -> tracing::Span {
    tracing::info_span!("invocation", id = %inv.id(), stage = stage.as_str(), path = %path)
}

fn log_outcome(stage: Stage, path: &str, result: &Result<StageOutcome>) {
    match result {
        Ok(StageOutcome::Skipped(reason)) => {
            tracing::debug!(path = %path, stage = stage.as_str(), reason = %reason, "Skipped")
        }
        Ok(StageOutcome::Relocated { destination }) => {
            tracing::info!(path = %path, destination = %destination, "Relocated")
        }
        Ok(StageOutcome::Analyzed {
            record_id,
            category,
            public,
        }) => tracing::info!(
            path = %path,
            record_id = %record_id,
            category = %category,
            public = *public,
            "Analyzed"
        ),
        Err(e) if e.is_benign() => {
            tracing::debug!(path = %path, stage = stage.as_str(), error = %e, "Artifact vanished")
        }
        Err(e @ PipelineError::Configuration { .. }) => {
            tracing::warn!(path = %path, stage = stage.as_str(), error = %e, "Permanently skipped")
        }
        Err(e) => tracing::error!(
            path = %path,
            stage = stage.as_str(),
            error = %e,
            retryable = e.is_retryable(),
            "Invocation failed"
        ),
    }
}
