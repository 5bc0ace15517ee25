//! Registry Manager - process-wide lookup of registries by storage target
//!
//! `get(name)` returns the cached [`Registry`] for a target, building it on
//! first use. Builds are serialized per name: each target owns one
//! [`LifecycleController`] behind its own lock, so at most one build per name
//! is in flight while other targets build concurrently. Replacing a registry
//! (reload, install, upgrade) swaps the cached `Arc` and marks the old
//! instance stale; holders of the old instance keep a valid object.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::controller::LifecycleController;
use super::registry::Registry;
use super::LifecycleError;
use crate::config::RegistryConfig;
use crate::core::{BlokManager, DeclarationRegistry, EntryDescriptor};
use crate::schema::Connector;

type SharedController = Arc<Mutex<LifecycleController>>;

/// Registry Manager
pub struct RegistryManager {
    connector: Arc<dyn Connector>,
    catalog: BlokManager,
    config: RegistryConfig,
    entries: RwLock<Vec<EntryDescriptor>>,
    registries: RwLock<HashMap<String, Arc<Registry>>>,
    controllers: Mutex<HashMap<String, SharedController>>,
}

impl RegistryManager {
    pub fn new(connector: Arc<dyn Connector>, catalog: BlokManager, config: RegistryConfig) -> Self {
        Self {
            connector,
            catalog,
            config,
            entries: RwLock::new(Vec::new()),
            registries: RwLock::new(HashMap::new()),
            controllers: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &BlokManager {
        &self.catalog
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a custom entry kind for every target, current and future
    ///
    /// The controller map stays locked throughout, so a target created
    /// concurrently sees either none or all of the change.
    pub fn add_entry(&self, descriptor: EntryDescriptor) -> Result<(), LifecycleError> {
        let controllers = self.controllers.lock();
        let mut entries = self.entries.write();

        // validate once, against the entries every controller shares
        let mut scratch = DeclarationRegistry::new();
        for existing in entries.iter().chain(std::iter::once(&descriptor)) {
            scratch
                .add_entry(existing.clone())
                .map_err(|source| LifecycleError::Declaration {
                    blok: String::new(),
                    source,
                })?;
        }

        entries.push(descriptor.clone());
        drop(entries);
        for controller in controllers.values() {
            controller.lock().add_entry(descriptor.clone())?;
        }
        debug!(target: "registry::manager", entry = %descriptor.name(), targets = controllers.len(), "Entry added");
        Ok(())
    }

    fn controller(&self, name: &str) -> Result<SharedController, LifecycleError> {
        let mut controllers = self.controllers.lock();
        if let Some(controller) = controllers.get(name) {
            return Ok(Arc::clone(controller));
        }
        let backend = self.connector.connect(name)?;
        let mut controller = LifecycleController::new(name, backend, self.catalog.clone(), self.config.clone());
        for descriptor in self.entries.read().iter() {
            controller.add_entry(descriptor.clone())?;
        }
        let shared = Arc::new(Mutex::new(controller));
        controllers.insert(name.to_string(), Arc::clone(&shared));
        Ok(shared)
    }

    fn cached(&self, name: &str) -> Option<Arc<Registry>> {
        self.registries
            .read()
            .get(name)
            .filter(|r| !r.is_stale())
            .cloned()
    }

    /// Swap in a new registry, marking the previous one stale
    fn replace(&self, name: &str, registry: Arc<Registry>) -> Arc<Registry> {
        let previous = self
            .registries
            .write()
            .insert(name.to_string(), Arc::clone(&registry));
        if let Some(old) = previous {
            if old.id() != registry.id() {
                old.mark_stale();
                info!(target: "registry::manager", name, old = %old.id(), new = %registry.id(), "Registry replaced");
            }
        }
        registry
    }

    /// The registry of `name`, built on first use
    pub fn get(&self, name: &str) -> Result<Arc<Registry>, LifecycleError> {
        if let Some(registry) = self.cached(name) {
            debug!(target: "registry::manager", name, "Registry reused");
            return Ok(registry);
        }

        let controller = self.controller(name)?;
        let mut controller = controller.lock();
        // another caller may have finished the build while we waited
        if let Some(registry) = self.cached(name) {
            return Ok(registry);
        }
        let registry = controller.load_installed()?;
        info!(target: "registry::manager", name, id = %registry.id(), "Registry built");
        Ok(self.replace(name, registry))
    }

    /// Rebuild the registry of `name` from scratch and replace the cached one
    pub fn reload(&self, name: &str) -> Result<Arc<Registry>, LifecycleError> {
        let controller = self.controller(name)?;
        let mut controller = controller.lock();
        controller.reset_declarations();
        let registry = controller.load_installed()?;
        Ok(self.replace(name, registry))
    }

    /// Install bloks (with their dependencies) into `name`
    pub fn install(&self, name: &str, bloks: &[&str]) -> Result<Arc<Registry>, LifecycleError> {
        let bloks: Vec<String> = bloks.iter().map(|b| b.to_string()).collect();
        let controller = self.controller(name)?;
        let mut controller = controller.lock();
        let registry = controller.install_all(&bloks)?;
        Ok(self.replace(name, registry))
    }

    /// Upgrade one installed blok of `name`
    pub fn upgrade(&self, name: &str, blok: &str) -> Result<Arc<Registry>, LifecycleError> {
        let controller = self.controller(name)?;
        let mut controller = controller.lock();
        let registry = controller.upgrade(blok)?;
        Ok(self.replace(name, registry))
    }

    /// Drop the registry and controller of `name`. Returns whether one existed.
    pub fn unload(&self, name: &str) -> bool {
        let controller = self.controllers.lock().remove(name);
        let registry = self.registries.write().remove(name);
        if let Some(registry) = &registry {
            registry.mark_stale();
        }
        debug!(target: "registry::manager", name, "Registry unloaded");
        controller.is_some() || registry.is_some()
    }

    /// Drop every registry
    pub fn clear(&self) {
        let names: Vec<String> = self.registries.read().keys().cloned().collect();
        for name in names {
            self.unload(&name);
        }
        self.controllers.lock().clear();
    }

    /// Names with a cached registry
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registries.read().keys().cloned().collect();
        names.sort();
        names
    }
}
