//! Cooperative methods
//!
//! A declaration may carry named methods. When several declarations of the
//! same path define a method with the same name, the synthesized entity keeps
//! all of them as an explicit delegation chain ordered by precedence; each
//! implementation may hand over to the next one with [`MethodCall::call_super`].

use serde_json::Value as JsonValue;
use std::sync::Arc;

use super::RegistryPath;

/// Method implementation
pub type MethodFn = Arc<dyn Fn(&MethodCall<'_>, JsonValue) -> Result<JsonValue, MethodError> + Send + Sync>;

/// Method invocation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum MethodError {
    /// No contribution defines the method
    #[error("{path} has no method '{method}'")]
    NotFound { path: String, method: String },

    /// `call_super` was used by the last implementation of the chain
    #[error("{path}.{method} has no further implementation to delegate to")]
    NoSuper { path: String, method: String },

    /// The implementation failed
    #[error("{path}.{method} failed: {reason}")]
    Failed {
        path: String,
        method: String,
        reason: String,
    },
}

/// One step of a cooperative call chain
pub struct MethodCall<'a> {
    path: &'a RegistryPath,
    name: &'a str,
    chain: &'a [MethodFn],
    position: usize,
}

impl<'a> MethodCall<'a> {
    /// Start a call at the highest-precedence implementation
    pub fn invoke(
        path: &'a RegistryPath,
        name: &'a str,
        chain: &'a [MethodFn],
        args: JsonValue,
    ) -> Result<JsonValue, MethodError> {
        let first = chain.first().ok_or_else(|| MethodError::NotFound {
            path: path.to_string(),
            method: name.to_string(),
        })?;
        let call = MethodCall {
            path,
            name,
            chain,
            position: 0,
        };
        first(&call, args)
    }

    /// Delegate to the next implementation in precedence order
    pub fn call_super(&self, args: JsonValue) -> Result<JsonValue, MethodError> {
        let position = self.position + 1;
        let next = self.chain.get(position).ok_or_else(|| MethodError::NoSuper {
            path: self.path.to_string(),
            method: self.name.to_string(),
        })?;
        let call = MethodCall {
            path: self.path,
            name: self.name,
            chain: self.chain,
            position,
        };
        next(&call, args)
    }

    /// Whether a further implementation exists
    pub fn has_super(&self) -> bool {
        self.position + 1 < self.chain.len()
    }

    /// Path of the entity the method is invoked on
    pub fn path(&self) -> &RegistryPath {
        self.path
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Build a `Failed` error for this call
    pub fn fail(&self, reason: impl Into<String>) -> MethodError {
        MethodError::Failed {
            path: self.path.to_string(),
            method: self.name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Wrap a closure as a [`MethodFn`]
pub fn method<F>(f: F) -> MethodFn
where
    F: Fn(&MethodCall<'_>, JsonValue) -> Result<JsonValue, MethodError> + Send + Sync + 'static,
{
    Arc::new(f)
}
