// Public API exports
pub mod atlas;
pub mod config;
pub mod hash;
pub mod index;
pub mod security;
pub mod store;

// Re-export main types for convenience
pub use atlas::{
    Atlas, AtlasError, AtlasResult, AtlasWriter, Committed, Namespace, PhysicalPath,
    ResolvedPath, ResourceStatus, WriteReceipt,
};
pub use config::Config;
pub use index::{Index, IndexRow};
pub use security::{PathResolver, TagName};
pub use store::{Store, StoreError, StoreResult, Verification};
