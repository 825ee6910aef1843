//! Idempotency guard shared by the relocation and analysis stages.
//!
//! Both the reactive path and the reconciliation sweeps go through the same
//! checks, so redelivered notifications and overlapping sweeps converge on the
//! same state instead of repeating work. The protection is check-then-act
//! against the freshest metadata, not a transaction: two invocations that read
//! before either commits can both proceed. Record-first ordering in the
//! analysis stage keeps that race on the duplicate side, never the lost side.

use crate::store::{ArtifactStore, StoreError, StoreResult};
use lightbox_protocol::metadata::{self, Metadata};
use lightbox_protocol::{ArtifactSummary, Namespaces, Owner, ProcessingState};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Relocate,
    Analyze,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    InProcessedNamespace,
    OutsideProcessedNamespace,
    EmptyArtifact,
    NotAnImage { content_kind: Option<String> },
    AlreadyRelocated,
    NotRelocated,
    AlreadyAnalyzed,
    MissingOwner,
    DecodeAttemptsExhausted { attempts: u32 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InProcessedNamespace => f.write_str("already in the processed namespace"),
            SkipReason::OutsideProcessedNamespace => {
                f.write_str("not in the processed namespace")
            }
            SkipReason::EmptyArtifact => f.write_str("declared size is zero"),
            SkipReason::NotAnImage { content_kind } => write!(
                f,
                "content kind {} is not an image",
                content_kind.as_deref().unwrap_or("<none>")
            ),
            SkipReason::AlreadyRelocated => f.write_str("already relocated"),
            SkipReason::NotRelocated => f.write_str("not relocated yet"),
            SkipReason::AlreadyAnalyzed => f.write_str("already analyzed"),
            SkipReason::MissingOwner => f.write_str("owner id missing from metadata"),
            SkipReason::DecodeAttemptsExhausted { attempts } => {
                write!(f, "gave up after {} failed decode attempts", attempts)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    Skip(SkipReason),
}

impl Decision {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Decision::Proceed)
    }
}

/// Result of a commit. Only `Committed` means this call changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Every requested field already had the requested value.
    AlreadyCommitted,
    /// The artifact no longer exists.
    Vanished,
}

/// The single decision table over processing state.
///
/// | state     | Relocate          | Analyze           |
/// |-----------|-------------------|-------------------|
/// | NEW       | proceed           | skip: not relocated |
/// | RELOCATED | skip: relocated   | proceed           |
/// | ANALYZED  | skip: relocated   | skip: analyzed    |
pub fn decide(state: ProcessingState, transition: Transition) -> Decision {
    use ProcessingState::*;
    match (state, transition) {
        (New, Transition::Relocate) => Decision::Proceed,
        (Relocated | Analyzed, Transition::Relocate) => {
            Decision::Skip(SkipReason::AlreadyRelocated)
        }
        (New, Transition::Analyze) => Decision::Skip(SkipReason::NotRelocated),
        (Relocated, Transition::Analyze) => Decision::Proceed,
        (Analyzed, Transition::Analyze) => Decision::Skip(SkipReason::AlreadyAnalyzed),
    }
}

pub struct IdempotencyGuard {
    store: Arc<dyn ArtifactStore>,
    namespaces: Namespaces,
    max_decode_attempts: Option<u32>,
}

impl IdempotencyGuard {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        namespaces: Namespaces,
        max_decode_attempts: Option<u32>,
    ) -> Self {
        Self {
            store,
            namespaces,
            max_decode_attempts,
        }
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    fn check_content(artifact: &ArtifactSummary) -> Option<SkipReason> {
        if artifact.byte_size == 0 {
            return Some(SkipReason::EmptyArtifact);
        }
        if !artifact.is_image() {
            return Some(SkipReason::NotAnImage {
                content_kind: artifact.content_kind.clone(),
            });
        }
        None
    }

    pub fn should_relocate(&self, artifact: &ArtifactSummary) -> Decision {
        if self.namespaces.is_processed(&artifact.path) {
            return Decision::Skip(SkipReason::InProcessedNamespace);
        }
        if let Some(reason) = Self::check_content(artifact) {
            return Decision::Skip(reason);
        }
        if let Decision::Skip(reason) = decide(artifact.state(), Transition::Relocate) {
            return Decision::Skip(reason);
        }
        if let Some(max) = self.max_decode_attempts {
            let attempts = metadata::decode_attempts(&artifact.metadata);
            if attempts >= max {
                return Decision::Skip(SkipReason::DecodeAttemptsExhausted { attempts });
            }
        }
        Decision::Proceed
    }

    pub fn should_analyze(&self, artifact: &ArtifactSummary) -> Decision {
        if !self.namespaces.is_processed(&artifact.path) {
            return Decision::Skip(SkipReason::OutsideProcessedNamespace);
        }
        if metadata::flag(&artifact.metadata, metadata::TAGGED) {
            return Decision::Skip(SkipReason::AlreadyAnalyzed);
        }
        if let Some(reason) = Self::check_content(artifact) {
            return Decision::Skip(reason);
        }
        if let Decision::Skip(reason) = decide(artifact.state(), Transition::Analyze) {
            return Decision::Skip(reason);
        }
        if artifact.owner().is_none() {
            return Decision::Skip(SkipReason::MissingOwner);
        }
        Decision::Proceed
    }

    /// Fresh summary straight from the store.
    pub async fn refresh(&self, path: &str) -> StoreResult<ArtifactSummary> {
        self.store.stat(path).await
    }

    /// Merge `new_metadata` into the artifact, writing only fields that differ
    /// from a fresh read.
    pub async fn commit_relocated(
        &self,
        path: &str,
        new_metadata: &Metadata,
    ) -> StoreResult<CommitOutcome> {
        self.commit(path, new_metadata).await
    }

    /// Mark the artifact `ANALYZED` and record its owner.
    pub async fn commit_analyzed(&self, path: &str, owner: &Owner) -> StoreResult<CommitOutcome> {
        let mut patch = owner.to_metadata();
        patch.insert(metadata::TAGGED.to_string(), "true".to_string());
        patch.insert(metadata::PROCESSED.to_string(), "true".to_string());
        self.commit(path, &patch).await
    }

    async fn commit(&self, path: &str, patch: &Metadata) -> StoreResult<CommitOutcome> {
        let current = match self.store.get_metadata(path).await {
            Ok(current) => current,
            Err(StoreError::NotFound(_)) => return Ok(CommitOutcome::Vanished),
            Err(e) => return Err(e),
        };

        let pending = metadata::pending_changes(&current, patch);
        if pending.is_empty() {
            return Ok(CommitOutcome::AlreadyCommitted);
        }

        match self.store.patch_metadata(path, &pending).await {
            Ok(_) => Ok(CommitOutcome::Committed),
            Err(StoreError::NotFound(_)) => Ok(CommitOutcome::Vanished),
            Err(e) => Err(e),
        }
    }

    /// Count a failed decode against the artifact when attempts are capped.
    ///
    /// Returns the new attempt count, or `None` when retries are unlimited.
    pub async fn record_decode_failure(&self, path: &str) -> StoreResult<Option<u32>> {
        if self.max_decode_attempts.is_none() {
            return Ok(None);
        }
        let current = self.store.get_metadata(path).await?;
        let attempts = metadata::decode_attempts(&current) + 1;
        let mut patch = Metadata::new();
        patch.insert(metadata::DECODE_ATTEMPTS.to_string(), attempts.to_string());
        self.store.patch_metadata(path, &patch).await?;
        Ok(Some(attempts))
    }
}
