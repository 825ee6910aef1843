//! Lightbox - idempotent image ingestion pipeline
//!
//! Uploads land in the inbox namespace of an object store. Each one is
//! sanitized (embedded metadata stripped, pixels untouched) and relocated to the
//! processed namespace, then labeled, categorized and recorded per owner.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────────┐   ┌──────────────┐
//! │  inbox/   │──▶│  Relocation  │──▶│  processed/   │──▶│   Analysis   │
//! │ (uploads) │   │  (sanitize)  │   │ (clean copy)  │   │ (label, cat) │
//! └───────────┘   └──────────────┘   └───────────────┘   └──────┬───────┘
//!       ▲                                                       ▼
//!  watcher / sweeps                                       result store
//! ```
//!
//! There are no locks or transactions across stores. Progress is recorded in
//! artifact metadata (`processed`, `relocated`, `tagged`) and every stage
//! re-checks it through the [`guard::IdempotencyGuard`] before writing, so
//! redelivered notifications and overlapping sweeps are harmless.

pub mod analyze;
pub mod config;
pub mod error;
pub mod guard;
pub mod pipeline;
pub mod relocate;
pub mod results;
pub mod sanitize;
pub mod scanner;
pub mod services;
pub mod store;
pub mod watch;

// Re-exports for convenience
pub use config::{ConfigError, PipelineConfig, ServiceMode, ServicesConfig};
pub use error::{PipelineError, Result};
pub use guard::{Decision, IdempotencyGuard, SkipReason, Transition};
pub use pipeline::{Invocation, Pipeline, PipelineSettings, Stage, StageOutcome};
pub use results::{MemoryResultStore, ResultStore, SqliteResultStore};
pub use scanner::{ReconciliationScanner, ScanScheduler, SweepKind, SweepStats};
pub use services::{
    AnnotationClient, CategorizerClient, KeywordCategorizer, LlmCategorizer, ServiceCredentials,
    ServiceError, StaticAnnotator, VisionClient,
};
pub use store::{ArtifactStore, LocalArtifactStore, MemoryArtifactStore, StoreError};
pub use watch::LocalWatcher;
