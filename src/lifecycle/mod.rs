//! Registry lifecycle
//!
//! The materialized [`Registry`], the [`LifecycleController`] running blok
//! transitions against one storage target, and the [`RegistryManager`]
//! caching one registry per target name.

pub mod controller;
pub mod manager;
pub mod registry;

pub use controller::LifecycleController;
pub use manager::RegistryManager;
pub use registry::{AccessError, Many2Many, ModelHandle, One2Many, Registry};

use crate::compose::CompositionError;
use crate::core::{BlokError, BlokState, DeclarationError};
use crate::schema::{BackendError, SchemaSyncError};

/// Lifecycle errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum LifecycleError {
    #[error("unknown blok '{0}'")]
    UnknownBlok(String),

    /// A dependency is not installed
    #[error("blok '{blok}' requires blok '{dependency}' to be installed")]
    MissingDependency { blok: String, dependency: String },

    #[error("blok '{blok}' cannot go from {from} to {to}")]
    InvalidTransition {
        blok: String,
        from: BlokState,
        to: BlokState,
    },

    /// Declared fields disagree with persisted metadata during load
    #[error("schema drift on {path} (blok '{blok}'): {}", .changes.join("; "))]
    SchemaMismatch {
        blok: String,
        path: String,
        changes: Vec<String>,
    },

    #[error("circular blok dependency: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("hook failed in blok '{blok}': {reason}")]
    Hook { blok: String, reason: String },

    #[error("declarations of blok '{blok}' failed: {source}")]
    Declaration {
        blok: String,
        #[source]
        source: DeclarationError,
    },

    #[error(transparent)]
    Catalog(BlokError),

    #[error(transparent)]
    Composition(#[from] CompositionError),

    #[error(transparent)]
    Sync(#[from] SchemaSyncError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

impl From<BlokError> for LifecycleError {
    fn from(err: BlokError) -> Self {
        match err {
            BlokError::NotFound(name) => LifecycleError::UnknownBlok(name),
            BlokError::MissingDependency { blok, dependency } => {
                LifecycleError::MissingDependency { blok, dependency }
            }
            BlokError::DependencyCycle(chain) => LifecycleError::DependencyCycle(chain),
            other => LifecycleError::Catalog(other),
        }
    }
}
