//! Blok Registry - declarative model composition for blok-based applications
//!
//! Bloks declare models, mixins and core extensions into a
//! [`DeclarationRegistry`](core::DeclarationRegistry). The composition engine
//! merges every declaration of a registry path into one synthesized entity,
//! the Schema Differ reconciles those entities with a backend's live schema
//! and System metadata, and the lifecycle layer installs, upgrades and loads
//! bloks and serves the resulting [`Registry`] per storage target.

pub mod compose;
pub mod config;
pub mod core;
pub mod error;
pub mod lifecycle;
pub mod schema;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use compose::{compose, EntitySet, SynthesizedEntity};
pub use config::{DriftPolicy, RegistryConfig};
pub use crate::core::{Blok, BlokManager, BlokMetadata, ClassBody, DeclarationRegistry, FieldDescriptor, FnBlok};
pub use error::{Error, Result};
pub use lifecycle::{LifecycleController, Registry, RegistryManager};
pub use schema::{Backend, Connector, MemoryBackend, MemoryConnector, Record};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
