//! Crate-level error type
//!
//! Each subsystem raises its own error enum; [`Error`] wraps them all for
//! callers that drive the whole pipeline.

use crate::compose::CompositionError;
use crate::config::ConfigError;
use crate::core::{BlokError, DeclarationError, MethodError};
use crate::lifecycle::{AccessError, LifecycleError};
use crate::schema::{BackendError, SchemaSyncError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    #[error(transparent)]
    Blok(#[from] BlokError),

    #[error(transparent)]
    Composition(#[from] CompositionError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    SchemaSync(#[from] SchemaSyncError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Method(#[from] MethodError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
