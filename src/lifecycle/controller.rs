//! Lifecycle Controller
//!
//! Drives the per-blok state machine for one storage target:
//! - `install`: `uninstalled -> to_install -> installed`, schema synced add-only
//! - `upgrade`: `installed -> to_upgrade -> installed`, schema synced add+alter
//! - `load`: re-activation against an already synced schema, drift checked
//!
//! Every transition runs inside one backend transaction. A failure anywhere
//! (declaration, composition, schema sync, hook) rolls the whole transition
//! back, so persisted metadata and live schema never see half a blok.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::registry::Registry;
use super::LifecycleError;
use crate::compose::{compose, EntitySet};
use crate::config::{DriftPolicy, RegistryConfig};
use crate::core::{Blok, BlokError, BlokManager, BlokState, DeclarationRegistry, EntryDescriptor};
use crate::schema::system::{read_rows, BLOK_TABLE};
use crate::schema::{Backend, CoreBlok, DiffMode, Record, SchemaDiffer, SystemBlok, CORE_BLOK};

/// Run `f` inside a backend transaction, rolling back on error
fn transaction<T>(
    backend: &dyn Backend,
    f: impl FnOnce() -> Result<T, LifecycleError>,
) -> Result<T, LifecycleError> {
    backend.begin()?;
    match f() {
        Ok(value) => {
            backend.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = backend.rollback() {
                warn!(target: "registry::lifecycle", error = %rollback, "Rollback failed");
            }
            Err(err)
        }
    }
}

/// Which hook a transition ends with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hook {
    Install,
    Upgrade,
    Load,
}

/// Lifecycle Controller for one storage target
pub struct LifecycleController {
    name: String,
    backend: Arc<dyn Backend>,
    catalog: BlokManager,
    config: RegistryConfig,
    declarations: DeclarationRegistry,
}

impl LifecycleController {
    /// The built-in core blok is added to the catalog if missing
    pub fn new(name: &str, backend: Arc<dyn Backend>, catalog: BlokManager, config: RegistryConfig) -> Self {
        if !catalog.contains(CORE_BLOK) {
            match catalog.register(Arc::new(CoreBlok::new())) {
                // registered concurrently
                Ok(()) | Err(BlokError::Duplicate(_)) => {}
                Err(err) => warn!(target: "registry::lifecycle", error = %err, "Core blok not registered"),
            }
        }
        Self {
            name: name.to_string(),
            backend,
            catalog,
            config,
            declarations: DeclarationRegistry::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn catalog(&self) -> &BlokManager {
        &self.catalog
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a custom entry kind. Must happen before bloks using it load.
    pub fn add_entry(&mut self, descriptor: EntryDescriptor) -> Result<(), LifecycleError> {
        self.declarations.reopen();
        self.declarations
            .add_entry(descriptor)
            .map_err(|source| LifecycleError::Declaration {
                blok: String::new(),
                source,
            })
    }

    // ── Persisted state ─────────────────────────────────────────────────

    /// Persisted blok rows by name
    pub fn blok_rows(&self) -> Result<HashMap<String, SystemBlok>, LifecycleError> {
        Ok(read_rows::<SystemBlok>(self.backend.as_ref(), BLOK_TABLE)?
            .into_iter()
            .map(|row| (row.name.clone(), row))
            .collect())
    }

    pub fn state(&self, blok: &str) -> Result<BlokState, LifecycleError> {
        Ok(self
            .blok_rows()?
            .get(blok)
            .map(|row| row.state)
            .unwrap_or(BlokState::Uninstalled))
    }

    /// Installed bloks in install order
    pub fn installed(&self) -> Result<Vec<String>, LifecycleError> {
        let mut rows: Vec<SystemBlok> = self
            .blok_rows()?
            .into_values()
            .filter(|row| row.state == BlokState::Installed)
            .collect();
        rows.sort_by_key(|row| (row.install_order.unwrap_or(i64::MAX), row.name.clone()));
        Ok(rows.into_iter().map(|row| row.name).collect())
    }

    fn write_state(&self, blok: &dyn Blok, state: BlokState, install_order: Option<i64>) -> Result<(), LifecycleError> {
        if !self.backend.has_table(BLOK_TABLE) {
            return Ok(());
        }
        let metadata = blok.metadata();
        let row = SystemBlok {
            name: metadata.name.clone(),
            state,
            version: metadata.version.clone(),
            install_order,
        };
        let filter = Record::new().with("name", metadata.name.as_str());
        let record = Record::from_serializable(&row).map_err(crate::schema::BackendError::from)?;
        if self.backend.select(BLOK_TABLE, &filter)?.is_empty() {
            self.backend.insert(BLOK_TABLE, record)?;
        } else {
            self.backend.update(BLOK_TABLE, &filter, &record)?;
        }
        debug!(target: "registry::lifecycle", blok = %metadata.name, state = %state, "Blok state written");
        Ok(())
    }

    fn next_install_order(&self) -> Result<i64, LifecycleError> {
        Ok(self
            .blok_rows()?
            .values()
            .filter_map(|row| row.install_order)
            .max()
            .unwrap_or(0)
            + 1)
    }

    fn check_transition(&self, blok: &str, from: BlokState, to: BlokState) -> Result<(), LifecycleError> {
        if !from.can_transition(to) {
            return Err(LifecycleError::InvalidTransition {
                blok: blok.to_string(),
                from,
                to,
            });
        }
        Ok(())
    }

    // ── Declarations and composition ────────────────────────────────────

    /// Run a blok's discovery hook. `fresh` replaces earlier declarations.
    fn declare(&mut self, blok: &dyn Blok, fresh: bool) -> Result<(), LifecycleError> {
        let name = blok.metadata().name.clone();
        if !fresh && self.declarations.has_blok(&name) {
            return Ok(());
        }
        self.declarations.reopen();
        let result = self
            .declarations
            .init_blok(&name)
            .and_then(|_| blok.declare(&mut self.declarations));
        self.declarations.release_current_blok();
        if let Err(source) = result {
            // leave no half-declared bucket behind
            let _ = self.declarations.remove_blok(&name);
            return Err(LifecycleError::Declaration { blok: name, source });
        }
        info!(target: "registry::declare", blok = %name, "Blok declarations loaded");
        Ok(())
    }

    /// Declare `bloks` and compose them. With `continue_on_error`, bloks
    /// that fail to declare are left out; the composed list is returned.
    fn compose(&mut self, bloks: &[String], fresh: Option<&str>) -> Result<(Arc<EntitySet>, Vec<String>), LifecycleError> {
        let mut composed = Vec::new();
        for name in bloks {
            let declared = self
                .catalog
                .get_blok(name)
                .map_err(|_| LifecycleError::UnknownBlok(name.clone()))
                .and_then(|blok| self.declare(blok.as_ref(), fresh == Some(name.as_str())));
            match declared {
                Ok(()) => composed.push(name.clone()),
                Err(err) if self.config.continue_on_error && name != CORE_BLOK && fresh != Some(name.as_str()) => {
                    warn!(target: "registry::lifecycle", blok = %name, error = %err, "Skipping blok");
                }
                Err(err) => return Err(err),
            }
        }
        let snapshot = self.declarations.freeze();
        let set = compose(&snapshot, &composed)?;
        Ok((Arc::new(set), composed))
    }

    fn run_hook(&self, blok: &dyn Blok, hook: Hook, registry: &Registry) -> Result<(), LifecycleError> {
        let result = match hook {
            Hook::Install => blok.on_install(registry),
            Hook::Upgrade => blok.on_upgrade(registry),
            Hook::Load => blok.on_load(registry),
        };
        result.map_err(|err| LifecycleError::Hook {
            blok: blok.metadata().name.clone(),
            reason: err.to_string(),
        })
    }

    /// Detected drift: fatal or logged depending on `policy`
    fn check_drift(&self, set: &EntitySet, blok: &str, policy: DriftPolicy) -> Result<(), LifecycleError> {
        let diff = SchemaDiffer::new(set, self.backend.as_ref()).plan(DiffMode::AddAlter)?;
        if diff.is_empty() {
            return Ok(());
        }
        let (path, offender) = diff.first_offender().unwrap_or(("", blok));
        let offender = if offender.is_empty() { blok } else { offender };
        match policy {
            DriftPolicy::Fatal => Err(LifecycleError::SchemaMismatch {
                blok: offender.to_string(),
                path: path.to_string(),
                changes: diff.describe(),
            }),
            DriftPolicy::Warn => {
                for change in diff.describe() {
                    warn!(target: "registry::lifecycle", blok = %offender, change = %change, "Schema drift");
                }
                Ok(())
            }
        }
    }

    // ── Transitions ─────────────────────────────────────────────────────

    /// Install the core blok if this target has never been bootstrapped
    pub fn bootstrap(&mut self) -> Result<(), LifecycleError> {
        if self.state(CORE_BLOK)? == BlokState::Installed {
            return Ok(());
        }
        info!(target: "registry::lifecycle", target_name = %self.name, "Bootstrapping storage target");
        self.install_one(CORE_BLOK).map(|_| ())
    }

    /// Install one blok whose dependencies are installed
    pub fn install(&mut self, blok: &str) -> Result<Arc<Registry>, LifecycleError> {
        self.bootstrap()?;
        self.install_one(blok)
    }

    /// Install `bloks` and every dependency they need, in dependency order.
    /// Bloks already installed are skipped.
    ///
    /// Install is add-only, so attribute overrides from the new bloks stay
    /// pending until `upgrade`. They are logged here, never fatal: the
    /// installs are already committed.
    pub fn install_all(&mut self, bloks: &[String]) -> Result<Arc<Registry>, LifecycleError> {
        self.bootstrap()?;
        let order = self.catalog.load_order(bloks)?;
        for name in &order {
            if self.state(name)? != BlokState::Installed {
                self.install_one(name)?;
            }
        }
        self.build_installed(DriftPolicy::Warn)
    }

    fn install_one(&mut self, name: &str) -> Result<Arc<Registry>, LifecycleError> {
        let blok = self
            .catalog
            .get_blok(name)
            .map_err(|_| LifecycleError::UnknownBlok(name.to_string()))?;
        let from = self.state(name)?;
        self.check_transition(name, from, BlokState::ToInstall)?;

        let states = self.blok_rows()?;
        for dependency in &blok.metadata().dependencies {
            let installed = states
                .get(dependency)
                .map(|row| row.state == BlokState::Installed)
                .unwrap_or(false);
            if !installed {
                return Err(LifecycleError::MissingDependency {
                    blok: name.to_string(),
                    dependency: dependency.clone(),
                });
            }
        }

        let mut bloks = self.installed()?;
        bloks.push(name.to_string());
        let order = self.next_install_order()?;
        let backend = Arc::clone(&self.backend);

        let registry = transaction(backend.as_ref(), || {
            self.write_state(blok.as_ref(), BlokState::ToInstall, None)?;
            info!(target: "registry::lifecycle", blok = name, "uninstalled -> to_install");

            let (set, composed) = self.compose(&bloks, Some(name))?;
            SchemaDiffer::new(&set, backend.as_ref()).sync(DiffMode::AddOnly)?;

            self.write_state(blok.as_ref(), BlokState::Installed, Some(order))?;
            let registry = Registry::new(&self.name, set, Arc::clone(&backend), composed);
            self.run_hook(blok.as_ref(), Hook::Install, &registry)?;
            Ok(registry)
        })?;

        info!(target: "registry::lifecycle", blok = name, "to_install -> installed");
        Ok(Arc::new(registry))
    }

    /// Re-declare an installed blok and bring the schema in line with it
    pub fn upgrade(&mut self, name: &str) -> Result<Arc<Registry>, LifecycleError> {
        self.bootstrap()?;
        let blok = self
            .catalog
            .get_blok(name)
            .map_err(|_| LifecycleError::UnknownBlok(name.to_string()))?;
        let row = self.blok_rows()?.remove(name);
        let from = row.as_ref().map(|r| r.state).unwrap_or(BlokState::Uninstalled);
        self.check_transition(name, from, BlokState::ToUpgrade)?;
        let order = row.and_then(|r| r.install_order);

        let bloks = self.installed()?;
        let backend = Arc::clone(&self.backend);

        let registry = transaction(backend.as_ref(), || {
            self.write_state(blok.as_ref(), BlokState::ToUpgrade, order)?;
            info!(target: "registry::lifecycle", blok = name, "installed -> to_upgrade");

            let (set, composed) = self.compose(&bloks, Some(name))?;
            SchemaDiffer::new(&set, backend.as_ref()).sync(DiffMode::AddAlter)?;

            self.write_state(blok.as_ref(), BlokState::Installed, order)?;
            let registry = Registry::new(&self.name, set, Arc::clone(&backend), composed);
            self.run_hook(blok.as_ref(), Hook::Upgrade, &registry)?;
            Ok(registry)
        })?;

        info!(target: "registry::lifecycle", blok = name, "to_upgrade -> installed");
        Ok(Arc::new(registry))
    }

    /// Re-activate one installed blok without touching the schema
    pub fn load(&mut self, name: &str) -> Result<Arc<Registry>, LifecycleError> {
        let blok = self
            .catalog
            .get_blok(name)
            .map_err(|_| LifecycleError::UnknownBlok(name.to_string()))?;
        let state = self.state(name)?;
        if state != BlokState::Installed {
            return Err(LifecycleError::InvalidTransition {
                blok: name.to_string(),
                from: state,
                to: BlokState::Installed,
            });
        }
        let bloks = self.installed()?;
        let (set, composed) = self.compose(&bloks, None)?;
        self.check_drift(&set, name, self.config.drift)?;

        let backend = Arc::clone(&self.backend);
        let registry = Registry::new(&self.name, set, Arc::clone(&backend), composed);
        transaction(backend.as_ref(), || self.run_hook(blok.as_ref(), Hook::Load, &registry))?;
        debug!(target: "registry::lifecycle", blok = name, "Blok loaded");
        Ok(Arc::new(registry))
    }

    /// Build the registry of every installed blok, bootstrapping if needed.
    /// Each blok's load hook runs in install order.
    pub fn load_installed(&mut self) -> Result<Arc<Registry>, LifecycleError> {
        self.bootstrap()?;
        self.build_installed(self.config.drift)
    }

    fn build_installed(&mut self, drift: DriftPolicy) -> Result<Arc<Registry>, LifecycleError> {
        let bloks = self.installed()?;
        let (set, composed) = self.compose(&bloks, None)?;
        self.check_drift(&set, CORE_BLOK, drift)?;

        let backend = Arc::clone(&self.backend);
        let registry = Registry::new(&self.name, set, Arc::clone(&backend), composed.clone());
        transaction(backend.as_ref(), || {
            for name in &composed {
                let blok = self
                    .catalog
                    .get_blok(name)
                    .map_err(|_| LifecycleError::UnknownBlok(name.clone()))?;
                self.run_hook(blok.as_ref(), Hook::Load, &registry)?;
            }
            Ok(())
        })?;

        info!(
            target: "registry::lifecycle",
            target_name = %self.name,
            bloks = composed.len(),
            entities = registry.entities().paths().len(),
            "Registry built"
        );
        Ok(Arc::new(registry))
    }

    /// Forget every declaration so the next build re-runs discovery hooks
    pub fn reset_declarations(&mut self) {
        self.declarations.reopen();
        self.declarations.clear();
    }
}
