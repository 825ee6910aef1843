//! Object storage for artifacts and their metadata.

mod local;
mod memory;
mod traits;

pub use local::LocalArtifactStore;
pub use memory::MemoryArtifactStore;
pub use traits::{ArtifactStore, StoreError, StoreResult};
