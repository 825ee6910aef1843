//! Analysis stage: label, categorize, record, then mark analyzed.

use crate::error::{PipelineError, Result};
use crate::guard::{CommitOutcome, Decision, IdempotencyGuard, SkipReason};
use crate::pipeline::{Invocation, StageOutcome};
use crate::results::ResultStore;
use crate::services::{AnnotationClient, CategorizerClient};
use crate::store::ArtifactStore;
use lightbox_protocol::{owner_namespace, ArtifactSummary, NewAnalysisRecord, Owner, PublicReference};
use std::sync::Arc;

pub struct AnalysisStage {
    store: Arc<dyn ArtifactStore>,
    results: Arc<dyn ResultStore>,
    annotator: Arc<dyn AnnotationClient>,
    categorizer: Arc<dyn CategorizerClient>,
    guard: Arc<IdempotencyGuard>,
}

impl AnalysisStage {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        results: Arc<dyn ResultStore>,
        annotator: Arc<dyn AnnotationClient>,
        categorizer: Arc<dyn CategorizerClient>,
        guard: Arc<IdempotencyGuard>,
    ) -> Self {
        Self {
            store,
            results,
            annotator,
            categorizer,
            guard,
        }
    }

    /// Eligible owner for `artifact`, or the outcome to return instead.
    fn eligible_owner(&self, artifact: &ArtifactSummary) -> Result<std::result::Result<Owner, SkipReason>> {
        match self.guard.should_analyze(artifact) {
            Decision::Proceed => artifact.owner().map(Ok).ok_or_else(|| {
                PipelineError::Internal(format!("owner vanished from '{}' after check", artifact.path))
            }),
            Decision::Skip(SkipReason::MissingOwner) => Err(PipelineError::Configuration {
                path: artifact.path.clone(),
                reason: "no owner id (uid) in metadata".to_string(),
            }),
            Decision::Skip(reason) => Ok(Err(reason)),
        }
    }

    pub async fn run(&self, path: &str, inv: &Invocation) -> Result<StageOutcome> {
        let fresh = inv.bounded(self.guard.refresh(path)).await?;
        if let Err(reason) = self.eligible_owner(&fresh)? {
            return Ok(StageOutcome::Skipped(reason));
        }

        let bytes = inv.bounded(self.store.get(path)).await?;
        let labels = inv
            .bounded(self.annotator.detect_labels(&bytes, inv.credentials()))
            .await?;
        let category = inv
            .bounded(self.categorizer.classify(&labels, inv.credentials()))
            .await?;
        tracing::debug!(path = %path, labels = ?labels, category = %category, "Enrichment complete");

        // A racing invocation may have finished while the services were busy.
        let latest = inv.bounded(self.guard.refresh(path)).await?;
        let owner = match self.eligible_owner(&latest)? {
            Ok(owner) => owner,
            Err(reason) => return Ok(StageOutcome::Skipped(reason)),
        };

        // Nothing has been written yet; past this point the sequence completes.
        inv.ensure_time_left()?;

        let namespace = owner_namespace(&owner.id);
        let record = NewAnalysisRecord {
            image_url: self.store.public_url(path),
            file_path: path.to_string(),
            tags: labels,
            category,
            owner_id: owner.id.clone(),
            visibility: owner.visibility,
        };
        let record_id = self.results.append_record(&namespace, &record).await?;
        if owner.is_public() {
            self.results
                .append_public_reference(
                    &record_id,
                    &PublicReference {
                        owner_id: owner.id.clone(),
                        namespace: namespace.clone(),
                    },
                )
                .await?;
        }

        match self.guard.commit_analyzed(path, &owner).await? {
            CommitOutcome::Committed => {}
            CommitOutcome::AlreadyCommitted => {
                tracing::info!(path = %path, record_id = %record_id, "Concurrent analysis already committed; duplicate record written")
            }
            CommitOutcome::Vanished => {
                tracing::info!(path = %path, record_id = %record_id, "Artifact vanished after its record was written")
            }
        }

        Ok(StageOutcome::Analyzed {
            record_id,
            category,
            public: owner.is_public(),
        })
    }
}
