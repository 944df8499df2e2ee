/// Model registry: durable, versioned, per-tenant artifact storage
///
/// - Immutable artifact + metadata documents per version
/// - Monotonic, collision-free version ids
/// - Write-through "active version" pointer index with O(1) rollback

pub mod layout;
pub mod pointer;
pub mod service;
pub mod version;

pub use pointer::{ActivePointer, RegistryIndex};
pub use service::{ModelRegistry, RollbackOutcome};
pub use version::{VersionAllocator, VersionId};
