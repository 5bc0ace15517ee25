//! Schema layer
//!
//! The persistence boundary ([`Backend`], [`Connector`]), an in-memory
//! implementation of it, the System metadata catalog and the Schema Differ
//! that keeps live tables and metadata rows in line with composed entities.

pub mod backend;
pub mod differ;
pub mod memory;
pub mod system;

pub use backend::{Backend, BackendError, ColumnInfo, ColumnMetadata, Connector, DdlOp, Record};
pub use differ::{DdlStep, DiffMode, MetadataChange, MetadataStep, SchemaDiff, SchemaDiffer, SyncReport};
pub use memory::{MemoryBackend, MemoryConnector};
pub use system::{AttributeChange, CoreBlok, SystemBlok, SystemColumn, SystemModel, SystemRelationship, CORE_BLOK};

/// Schema synchronization errors
///
/// Always fatal to the enclosing install or upgrade.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaSyncError {
    /// The backend rejected a schema or metadata write
    #[error("schema sync failed for {path} (blok '{blok}'): {source}")]
    Persistence {
        blok: String,
        path: String,
        #[source]
        source: BackendError,
    },

    /// Persisted metadata cannot be read back
    #[error("corrupt system metadata for {path}: {reason}")]
    Corrupt { path: String, reason: String },
}
