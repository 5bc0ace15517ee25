//! Blok trait and related types
//!
//! A blok is a loadable unit of declarations. It exposes a discovery hook
//! that feeds the Declaration Registry, metadata with its dependencies, and
//! optional lifecycle hooks called once a transition has rebuilt the registry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::declaration::{DeclarationError, DeclarationRegistry};
use crate::lifecycle::Registry;

/// Core blok trait that every loadable unit implements
pub trait Blok: Send + Sync {
    /// Get blok metadata
    fn metadata(&self) -> &BlokMetadata;

    /// Discovery hook: register this blok's declarations.
    ///
    /// Called with the blok already initialized as the current blok.
    fn declare(&self, declarations: &mut DeclarationRegistry) -> Result<(), DeclarationError>;

    /// Lifecycle hook: called after the blok's first install
    fn on_install(&self, _registry: &Registry) -> Result<(), BlokError> {
        Ok(())
    }

    /// Lifecycle hook: called after an upgrade
    fn on_upgrade(&self, _registry: &Registry) -> Result<(), BlokError> {
        Ok(())
    }

    /// Lifecycle hook: called when an installed blok is loaded
    fn on_load(&self, _registry: &Registry) -> Result<(), BlokError> {
        Ok(())
    }
}

/// Blok metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlokMetadata {
    /// Unique blok name
    pub name: String,
    /// Blok version
    pub version: String,
    /// Brief description of the blok
    pub description: String,
    /// Bloks that must be installed first
    pub dependencies: Vec<String>,
}

impl BlokMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a required blok
    pub fn depends_on(mut self, blok: impl Into<String>) -> Self {
        self.dependencies.push(blok.into());
        self
    }
}

/// Install state of a blok in one storage target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlokState {
    /// Known but never installed
    Uninstalled,
    /// Install transition in progress
    ToInstall,
    /// Installed and in sync
    Installed,
    /// Upgrade transition in progress
    ToUpgrade,
}

impl BlokState {
    /// Allowed edges: `uninstalled -> to_install -> installed` and
    /// `installed -> to_upgrade -> installed`. A failed transition falls
    /// back to the state it started from.
    pub fn can_transition(self, to: BlokState) -> bool {
        matches!(
            (self, to),
            (BlokState::Uninstalled, BlokState::ToInstall)
                | (BlokState::ToInstall, BlokState::Installed)
                | (BlokState::ToInstall, BlokState::Uninstalled)
                | (BlokState::Installed, BlokState::ToUpgrade)
                | (BlokState::ToUpgrade, BlokState::Installed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlokState::Uninstalled => "uninstalled",
            BlokState::ToInstall => "to_install",
            BlokState::Installed => "installed",
            BlokState::ToUpgrade => "to_upgrade",
        }
    }

    pub fn parse(state: &str) -> Option<Self> {
        match state {
            "uninstalled" => Some(BlokState::Uninstalled),
            "to_install" => Some(BlokState::ToInstall),
            "installed" => Some(BlokState::Installed),
            "to_upgrade" => Some(BlokState::ToUpgrade),
            _ => None,
        }
    }
}

impl fmt::Display for BlokState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blok errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum BlokError {
    /// Blok with given name was not found
    #[error("Blok not found: {0}")]
    NotFound(String),

    /// Attempted to register a blok twice
    #[error("Duplicate blok: {0}")]
    Duplicate(String),

    /// Blok metadata validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// A dependency is not part of the catalog
    #[error("Blok '{blok}' depends on unknown blok '{dependency}'")]
    MissingDependency { blok: String, dependency: String },

    /// Bloks depend on each other in a loop
    #[error("Circular blok dependency: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// A lifecycle hook failed
    #[error("Hook failed in blok '{blok}': {reason}")]
    Hook { blok: String, reason: String },
}

type DeclareFn = Arc<dyn Fn(&mut DeclarationRegistry) -> Result<(), DeclarationError> + Send + Sync>;
type HookFn = Arc<dyn Fn(&Registry) -> Result<(), BlokError> + Send + Sync>;

/// Blok assembled from closures
///
/// Convenient for bloks defined in code rather than as dedicated types.
#[derive(Clone)]
pub struct FnBlok {
    metadata: BlokMetadata,
    declare: DeclareFn,
    on_install: Option<HookFn>,
    on_upgrade: Option<HookFn>,
    on_load: Option<HookFn>,
}

impl FnBlok {
    pub fn new<F>(metadata: BlokMetadata, declare: F) -> Self
    where
        F: Fn(&mut DeclarationRegistry) -> Result<(), DeclarationError> + Send + Sync + 'static,
    {
        Self {
            metadata,
            declare: Arc::new(declare),
            on_install: None,
            on_upgrade: None,
            on_load: None,
        }
    }

    pub fn on_install<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Registry) -> Result<(), BlokError> + Send + Sync + 'static,
    {
        self.on_install = Some(Arc::new(hook));
        self
    }

    pub fn on_upgrade<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Registry) -> Result<(), BlokError> + Send + Sync + 'static,
    {
        self.on_upgrade = Some(Arc::new(hook));
        self
    }

    pub fn on_load<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Registry) -> Result<(), BlokError> + Send + Sync + 'static,
    {
        self.on_load = Some(Arc::new(hook));
        self
    }
}

impl Blok for FnBlok {
    fn metadata(&self) -> &BlokMetadata {
        &self.metadata
    }

    fn declare(&self, declarations: &mut DeclarationRegistry) -> Result<(), DeclarationError> {
        (self.declare)(declarations)
    }

    fn on_install(&self, registry: &Registry) -> Result<(), BlokError> {
        match &self.on_install {
            Some(hook) => hook(registry),
            None => Ok(()),
        }
    }

    fn on_upgrade(&self, registry: &Registry) -> Result<(), BlokError> {
        match &self.on_upgrade {
            Some(hook) => hook(registry),
            None => Ok(()),
        }
    }

    fn on_load(&self, registry: &Registry) -> Result<(), BlokError> {
        match &self.on_load {
            Some(hook) => hook(registry),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_edges() {
        assert!(BlokState::Uninstalled.can_transition(BlokState::ToInstall));
        assert!(BlokState::ToInstall.can_transition(BlokState::Installed));
        assert!(BlokState::Installed.can_transition(BlokState::ToUpgrade));
        assert!(BlokState::ToUpgrade.can_transition(BlokState::Installed));

        assert!(!BlokState::Uninstalled.can_transition(BlokState::ToUpgrade));
        assert!(!BlokState::Installed.can_transition(BlokState::ToInstall));
        assert!(!BlokState::Uninstalled.can_transition(BlokState::Installed));
    }

    #[test]
    fn test_state_round_trip_through_text() {
        for state in [
            BlokState::Uninstalled,
            BlokState::ToInstall,
            BlokState::Installed,
            BlokState::ToUpgrade,
        ] {
            assert_eq!(BlokState::parse(state.as_str()), Some(state));
        }
        assert_eq!(BlokState::parse("broken"), None);
    }

    #[test]
    fn test_metadata_builder() {
        let meta = BlokMetadata::new("sales", "1.2.0")
            .with_description("Sales orders")
            .depends_on("registry-core")
            .depends_on("partners");
        assert_eq!(meta.dependencies, vec!["registry-core", "partners"]);
        assert_eq!(meta.description, "Sales orders");
    }

    #[test]
    fn test_fn_blok_declares() {
        let blok = FnBlok::new(BlokMetadata::new("b1", "1.0.0"), |decl| {
            decl.declare("Mixin", "Mixin.Named", Default::default())?;
            Ok(())
        });

        let mut registry = DeclarationRegistry::new();
        registry.init_blok("b1").unwrap();
        blok.declare(&mut registry).unwrap();
        assert!(registry.has_entry("b1", "Mixin", "Mixin.Named"));
    }
}
