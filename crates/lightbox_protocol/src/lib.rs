//! Lightbox shared data model
//!
//! Types shared between the pipeline library, the result store, and the CLI:
//!
//! - [`ArtifactSummary`]: a stored object plus its key-value metadata
//! - [`ProcessingState`]: `NEW -> RELOCATED -> ANALYZED`, derived from metadata flags
//! - [`Category`]: the closed vocabulary produced by categorization
//! - [`NewAnalysisRecord`] / [`AnalysisRecord`]: persisted analysis results
//! - [`Namespaces`]: inbox/processed path derivation

pub mod defaults;
pub mod ids;
pub mod metadata;
pub mod naming;
pub mod paths;
pub mod types;

pub use ids::{IdParseError, InvocationId, RecordId};
pub use metadata::{derive_state, Metadata};
pub use naming::{owner_namespace, Namespaces, PUBLIC_NAMESPACE};
pub use types::{
    AnalysisRecord, ArtifactSummary, Category, CategoryParseError, InboxNotification,
    NewAnalysisRecord, Owner, ProcessingState, PublicReference, StoredPublicReference,
    Visibility,
};
