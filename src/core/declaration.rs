//! Declaration Registry - staging area for blok declarations
//!
//! Bloks register class bodies for `Model`, `Mixin`, custom entries and the
//! fixed Core buckets here, one bucket per blok. The registry is an explicit
//! context object with a simple lifecycle:
//! - accumulate: `init_blok` / `declare` / `add_core` while bloks load
//! - freeze: produce an immutable [`Declarations`] snapshot for composition
//! - reopen: accept further declarations (new bloks, re-declared bloks)
//!
//! Callers serialize mutation (one loading thread or a coarse lock); the
//! frozen snapshot is shared read-only behind an `Arc`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::entry::{EntryDescriptor, MergeCallback};
use super::field::{is_identifier, FieldDescriptor};
use super::method::MethodFn;
use super::relationship::{ModelRef, RelationshipDescriptor};
use super::{DeclarationId, RegistryPath};

/// Core sub-buckets created for every blok
pub const CORE_BUCKETS: [&str; 3] = ["Base", "SqlBase", "Session"];

/// Name reserved for the Core buckets
pub const CORE_ENTRY: &str = "Core";

/// Body of one declaration: what a blok contributes to a registry path
#[derive(Clone, Default)]
pub struct ClassBody {
    /// Fields, in declaration order
    pub fields: Vec<FieldDescriptor>,
    /// Relationships, in declaration order
    pub relationships: Vec<RelationshipDescriptor>,
    /// Additional ancestors (mixins or other entities)
    pub bases: Vec<ModelRef>,
    /// Named methods
    pub methods: Vec<(String, MethodFn)>,
    /// Table name override
    pub table: Option<String>,
}

impl ClassBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relationship(mut self, relationship: RelationshipDescriptor) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Inherit from another declaration path, e.g. `Mixin.Named`
    pub fn inherit(mut self, base: impl Into<ModelRef>) -> Self {
        self.bases.push(base.into());
        self
    }

    pub fn method(mut self, name: impl Into<String>, f: MethodFn) -> Self {
        self.methods.push((name.into(), f));
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Validate every descriptor of the body. Returns the offending member
    /// name and the reason.
    fn validate(&self) -> Result<(), (String, String)> {
        let mut names = HashSet::new();
        for field in &self.fields {
            field.validate().map_err(|e| (field.name.clone(), e))?;
            if !names.insert(field.name.as_str()) {
                return Err((field.name.clone(), "declared twice in the same body".into()));
            }
        }
        for rel in &self.relationships {
            rel.validate().map_err(|e| (rel.name.clone(), e))?;
            if !names.insert(rel.name.as_str()) {
                return Err((rel.name.clone(), "name already used in the same body".into()));
            }
        }
        for base in &self.bases {
            base.validate().map_err(|e| (base.to_string(), e))?;
        }
        for (name, _) in &self.methods {
            if !is_identifier(name) {
                return Err((name.clone(), "not a valid method name".into()));
            }
        }
        if let Some(table) = &self.table {
            if !is_identifier(table) {
                return Err((table.clone(), "not a valid table name".into()));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ClassBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassBody")
            .field("fields", &self.fields)
            .field("relationships", &self.relationships)
            .field("bases", &self.bases)
            .field("methods", &self.methods.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("table", &self.table)
            .finish()
    }
}

/// One registered declaration
#[derive(Debug, Clone)]
pub struct Declaration {
    pub id: DeclarationId,
    /// Blok that declared it
    pub blok: String,
    /// Entry name (`Model`, `Mixin`, `Core`, ...)
    pub entry: String,
    pub path: RegistryPath,
    pub body: ClassBody,
}

/// Declarations of one entry inside one blok
#[derive(Debug, Clone, Default)]
pub struct EntryBucket {
    /// Paths in first-declaration order
    pub registry_names: Vec<RegistryPath>,
    /// Declarations per path, in declaration order
    pub bases: HashMap<RegistryPath, Vec<Arc<Declaration>>>,
}

/// Everything one blok declared
#[derive(Debug, Clone)]
pub struct BlokDeclarations {
    /// Core sub-buckets (`Base`, `SqlBase`, `Session`, plus any added)
    pub core: BTreeMap<String, Vec<Arc<Declaration>>>,
    /// One bucket per known entry
    pub entries: BTreeMap<String, EntryBucket>,
}

impl BlokDeclarations {
    fn new(entries: &[EntryDescriptor]) -> Self {
        Self {
            core: CORE_BUCKETS
                .iter()
                .map(|name| (name.to_string(), Vec::new()))
                .collect(),
            entries: entries
                .iter()
                .map(|e| (e.name().to_string(), EntryBucket::default()))
                .collect(),
        }
    }
}

/// Immutable snapshot read by the composition engine
#[derive(Debug, Clone)]
pub struct Declarations {
    entries: Vec<EntryDescriptor>,
    bloks: HashMap<String, BlokDeclarations>,
}

impl Declarations {
    /// Known entries in registration order
    pub fn entries(&self) -> &[EntryDescriptor] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&EntryDescriptor> {
        self.entries.iter().find(|e| e.name() == name)
    }

    pub fn blok(&self, name: &str) -> Option<&BlokDeclarations> {
        self.bloks.get(name)
    }

    pub fn has_blok(&self, name: &str) -> bool {
        self.bloks.contains_key(name)
    }

    /// Every path declared under `entry` by the given bloks, in first-appearance order
    pub fn paths(&self, bloks: &[String], entry: &str) -> Vec<RegistryPath> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();
        for blok in bloks {
            let Some(bucket) = self.bloks.get(blok).and_then(|b| b.entries.get(entry)) else {
                continue;
            };
            for path in &bucket.registry_names {
                if seen.insert(path.clone()) {
                    paths.push(path.clone());
                }
            }
        }
        paths
    }

    /// Declarations of `path` by the given bloks, in blok order then
    /// declaration order. `Core.<name>` paths read the Core buckets.
    pub fn declarations_of(&self, bloks: &[String], path: &RegistryPath) -> Vec<Arc<Declaration>> {
        let mut found = Vec::new();
        for blok in bloks {
            let Some(declared) = self.bloks.get(blok) else {
                continue;
            };
            if path.entry() == CORE_ENTRY {
                if let Some(list) = declared.core.get(path.name()) {
                    found.extend(list.iter().cloned());
                }
            } else if let Some(list) = declared
                .entries
                .get(path.entry())
                .and_then(|bucket| bucket.bases.get(path))
            {
                found.extend(list.iter().cloned());
            }
        }
        found
    }
}

/// Declaration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeclarationError {
    /// `declare` used an entry that was never registered
    #[error("unknown entry '{entry}' for {path} in blok '{blok}'")]
    UnknownEntry {
        entry: String,
        blok: String,
        path: String,
    },

    /// `declare_entry` for a name that already exists
    #[error("entry '{entry}' is already declared")]
    DuplicateEntry { entry: String },

    /// The blok has no bucket yet
    #[error("blok '{blok}' is not initialized")]
    BlokNotInitialized { blok: String },

    /// `declare` without a current blok
    #[error("no blok is loading, cannot declare {path}")]
    NoCurrentBlok { path: String },

    /// Mutation while the registry is frozen
    #[error("declarations are frozen, cannot change {path} in blok '{blok}'")]
    Frozen { blok: String, path: String },

    /// Malformed path or path outside its entry
    #[error("invalid registry path '{path}' for entry '{entry}' in blok '{blok}'")]
    InvalidPath {
        blok: String,
        entry: String,
        path: String,
    },

    /// A field, relationship or base failed eager validation
    #[error("invalid declaration {path}.{name} in blok '{blok}': {reason}")]
    InvalidDescriptor {
        blok: String,
        path: String,
        name: String,
        reason: String,
    },
}

/// Declaration Registry
pub struct DeclarationRegistry {
    entries: Vec<EntryDescriptor>,
    bloks: HashMap<String, BlokDeclarations>,
    current: Option<String>,
    frozen: Option<Arc<Declarations>>,
}

impl DeclarationRegistry {
    /// Create a registry knowing the `Model` and `Mixin` entries
    pub fn new() -> Self {
        Self {
            entries: vec![EntryDescriptor::model(), EntryDescriptor::mixin()],
            bloks: HashMap::new(),
            current: None,
            frozen: None,
        }
    }

    /// Register a new entry kind
    ///
    /// Bloks already initialized get an empty bucket for it.
    pub fn declare_entry(
        &mut self,
        name: &str,
        must_be_loaded: bool,
        callback: Option<MergeCallback>,
    ) -> Result<(), DeclarationError> {
        self.add_entry(EntryDescriptor::custom(name, must_be_loaded, callback))
    }

    /// Register a prepared entry descriptor
    pub fn add_entry(&mut self, descriptor: EntryDescriptor) -> Result<(), DeclarationError> {
        self.ensure_open("", descriptor.name())?;
        let name = descriptor.name().to_string();
        if name == CORE_ENTRY || self.entries.iter().any(|e| e.name() == name) {
            return Err(DeclarationError::DuplicateEntry { entry: name });
        }
        if !is_identifier(&name) {
            return Err(DeclarationError::InvalidPath {
                blok: String::new(),
                entry: name.clone(),
                path: name,
            });
        }
        for blok in self.bloks.values_mut() {
            blok.entries.entry(name.clone()).or_default();
        }
        debug!(target: "registry::declare", entry = %name, must_be_loaded = descriptor.must_be_loaded(), "Entry declared");
        self.entries.push(descriptor);
        Ok(())
    }

    /// Known entries in registration order
    pub fn entries(&self) -> &[EntryDescriptor] {
        &self.entries
    }

    /// Names of entries declared with `must_be_loaded`
    pub fn must_be_loaded_entries(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.must_be_loaded())
            .map(|e| e.name())
            .collect()
    }

    /// Create a fresh bucket for `blok` and make it the current blok
    pub fn init_blok(&mut self, blok: &str) -> Result<(), DeclarationError> {
        self.ensure_open(blok, "")?;
        self.bloks
            .insert(blok.to_string(), BlokDeclarations::new(&self.entries));
        self.current = Some(blok.to_string());
        debug!(target: "registry::declare", blok, "Blok initialized");
        Ok(())
    }

    /// Switch the current blok to an already initialized one
    pub fn set_current_blok(&mut self, blok: &str) -> Result<(), DeclarationError> {
        if !self.bloks.contains_key(blok) {
            return Err(DeclarationError::BlokNotInitialized {
                blok: blok.to_string(),
            });
        }
        self.current = Some(blok.to_string());
        Ok(())
    }

    /// Stop attributing declarations to any blok
    pub fn release_current_blok(&mut self) {
        self.current = None;
    }

    pub fn current_blok(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Append `body` to the current blok's bucket for `entry` at `path`
    pub fn declare(&mut self, entry: &str, path: &str, body: ClassBody) -> Result<DeclarationId, DeclarationError> {
        let blok = self
            .current
            .clone()
            .ok_or_else(|| DeclarationError::NoCurrentBlok { path: path.to_string() })?;
        self.ensure_open(&blok, path)?;

        if entry == CORE_ENTRY || !self.entries.iter().any(|e| e.name() == entry) {
            return Err(DeclarationError::UnknownEntry {
                entry: entry.to_string(),
                blok,
                path: path.to_string(),
            });
        }

        let parsed = RegistryPath::parse(path)
            .filter(|p| p.entry() == entry)
            .ok_or_else(|| DeclarationError::InvalidPath {
                blok: blok.clone(),
                entry: entry.to_string(),
                path: path.to_string(),
            })?;

        body.validate()
            .map_err(|(name, reason)| DeclarationError::InvalidDescriptor {
                blok: blok.clone(),
                path: path.to_string(),
                name,
                reason,
            })?;

        let declaration = Declaration {
            id: DeclarationId::new(),
            blok: blok.clone(),
            entry: entry.to_string(),
            path: parsed.clone(),
            body,
        };
        let id = declaration.id;

        let bucket = self
            .bloks
            .get_mut(&blok)
            .ok_or_else(|| DeclarationError::BlokNotInitialized { blok: blok.clone() })?
            .entries
            .entry(entry.to_string())
            .or_default();
        if !bucket.registry_names.contains(&parsed) {
            bucket.registry_names.push(parsed.clone());
        }
        bucket
            .bases
            .entry(parsed)
            .or_default()
            .push(Arc::new(declaration));

        debug!(target: "registry::declare", blok = %blok, entry, path, "Declaration registered");
        Ok(id)
    }

    /// Append `body` to the current blok's Core bucket `core_name`
    pub fn add_core(&mut self, core_name: &str, body: ClassBody) -> Result<DeclarationId, DeclarationError> {
        let path_text = format!("{}.{}", CORE_ENTRY, core_name);
        let blok = self
            .current
            .clone()
            .ok_or_else(|| DeclarationError::NoCurrentBlok { path: path_text.clone() })?;
        self.ensure_open(&blok, &path_text)?;

        let path = RegistryPath::parse(&path_text).ok_or_else(|| DeclarationError::InvalidPath {
            blok: blok.clone(),
            entry: CORE_ENTRY.to_string(),
            path: path_text.clone(),
        })?;
        body.validate()
            .map_err(|(name, reason)| DeclarationError::InvalidDescriptor {
                blok: blok.clone(),
                path: path_text.clone(),
                name,
                reason,
            })?;

        let declaration = Declaration {
            id: DeclarationId::new(),
            blok: blok.clone(),
            entry: CORE_ENTRY.to_string(),
            path,
            body,
        };
        let id = declaration.id;
        self.bloks
            .get_mut(&blok)
            .ok_or_else(|| DeclarationError::BlokNotInitialized { blok: blok.clone() })?
            .core
            .entry(core_name.to_string())
            .or_default()
            .push(Arc::new(declaration));
        Ok(id)
    }

    /// Whether `blok` contributed anything to the Core bucket `core_name`
    pub fn has_core(&self, blok: &str, core_name: &str) -> bool {
        self.bloks
            .get(blok)
            .and_then(|b| b.core.get(core_name))
            .map(|list| !list.is_empty())
            .unwrap_or(false)
    }

    /// Remove one Core contribution. Returns whether it existed.
    pub fn remove_core(&mut self, blok: &str, core_name: &str, id: DeclarationId) -> Result<bool, DeclarationError> {
        self.ensure_open(blok, core_name)?;
        let Some(list) = self.bloks.get_mut(blok).and_then(|b| b.core.get_mut(core_name)) else {
            return Ok(false);
        };
        let before = list.len();
        list.retain(|d| d.id != id);
        Ok(list.len() != before)
    }

    /// Whether `blok` declared `path` under `entry`
    pub fn has_entry(&self, blok: &str, entry: &str, path: &str) -> bool {
        let Some(path) = RegistryPath::parse(path) else {
            return false;
        };
        self.bloks
            .get(blok)
            .and_then(|b| b.entries.get(entry))
            .and_then(|bucket| bucket.bases.get(&path))
            .map(|list| !list.is_empty())
            .unwrap_or(false)
    }

    /// Remove one declaration. The path leaves `registry_names` once its
    /// last declaration is gone. Returns whether it existed.
    pub fn remove_entry(
        &mut self,
        blok: &str,
        entry: &str,
        path: &str,
        id: DeclarationId,
    ) -> Result<bool, DeclarationError> {
        self.ensure_open(blok, path)?;
        let Some(parsed) = RegistryPath::parse(path) else {
            return Ok(false);
        };
        let Some(bucket) = self.bloks.get_mut(blok).and_then(|b| b.entries.get_mut(entry)) else {
            return Ok(false);
        };
        let Some(list) = bucket.bases.get_mut(&parsed) else {
            return Ok(false);
        };
        let before = list.len();
        list.retain(|d| d.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            bucket.bases.remove(&parsed);
            bucket.registry_names.retain(|p| p != &parsed);
        }
        Ok(removed)
    }

    /// Drop everything `blok` declared
    pub fn remove_blok(&mut self, blok: &str) -> Result<bool, DeclarationError> {
        self.ensure_open(blok, "")?;
        if self.current.as_deref() == Some(blok) {
            self.current = None;
        }
        Ok(self.bloks.remove(blok).is_some())
    }

    pub fn has_blok(&self, blok: &str) -> bool {
        self.bloks.contains_key(blok)
    }

    /// Declarations of one blok, for inspection
    pub fn blok(&self, blok: &str) -> Option<&BlokDeclarations> {
        self.bloks.get(blok)
    }

    /// Names of every initialized blok
    pub fn loaded_bloks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bloks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Wipe every blok bucket. Entries stay declared.
    pub fn clear(&mut self) {
        self.bloks.clear();
        self.current = None;
        self.frozen = None;
    }

    /// Freeze and return the snapshot used for composition
    ///
    /// Freezing twice returns the same snapshot.
    pub fn freeze(&mut self) -> Arc<Declarations> {
        if let Some(snapshot) = &self.frozen {
            return Arc::clone(snapshot);
        }
        self.current = None;
        let snapshot = Arc::new(Declarations {
            entries: self.entries.clone(),
            bloks: self.bloks.clone(),
        });
        self.frozen = Some(Arc::clone(&snapshot));
        snapshot
    }

    /// Accept declarations again. Existing snapshots are unaffected.
    pub fn reopen(&mut self) {
        self.frozen = None;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    fn ensure_open(&self, blok: &str, path: &str) -> Result<(), DeclarationError> {
        if self.frozen.is_some() {
            return Err(DeclarationError::Frozen {
                blok: blok.to_string(),
                path: path.to_string(),
            });
        }
        Ok(())
    }
}

impl Default for DeclarationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address_body() -> ClassBody {
        ClassBody::new()
            .field(FieldDescriptor::integer("id").primary_key())
            .field(FieldDescriptor::string("street"))
    }

    #[test]
    fn test_default_entries() {
        let registry = DeclarationRegistry::new();
        let names: Vec<&str> = registry.entries().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["Model", "Mixin"]);
        assert_eq!(registry.must_be_loaded_entries(), vec!["Model"]);
    }

    #[test]
    fn test_init_blok_buckets() {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("newblok").unwrap();

        let blok = registry.blok("newblok").unwrap();
        let core: Vec<&str> = blok.core.keys().map(|k| k.as_str()).collect();
        assert_eq!(core, vec!["Base", "Session", "SqlBase"]);
        assert!(blok.core.values().all(|v| v.is_empty()));

        let entries: Vec<&str> = blok.entries.keys().map(|k| k.as_str()).collect();
        assert_eq!(entries, vec!["Mixin", "Model"]);
        assert!(blok.entries.values().all(|b| b.registry_names.is_empty()));
    }

    #[test]
    fn test_init_blok_with_other_entry() {
        let mut registry = DeclarationRegistry::new();
        registry.declare_entry("Other", true, None).unwrap();
        registry.init_blok("newblok").unwrap();

        assert_eq!(registry.must_be_loaded_entries(), vec!["Model", "Other"]);
        assert!(registry.blok("newblok").unwrap().entries.contains_key("Other"));
    }

    #[test]
    fn test_entry_added_to_existing_bloks() {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("early").unwrap();
        registry.declare_entry("Other", false, None).unwrap();
        assert!(registry.blok("early").unwrap().entries.contains_key("Other"));
    }

    #[test]
    fn test_duplicate_entry() {
        let mut registry = DeclarationRegistry::new();
        registry.declare_entry("Other", false, None).unwrap();

        let err = registry.declare_entry("Other", false, None).unwrap_err();
        assert!(matches!(err, DeclarationError::DuplicateEntry { .. }));
        let err = registry.declare_entry("Model", false, None).unwrap_err();
        assert!(matches!(err, DeclarationError::DuplicateEntry { .. }));
        let err = registry.declare_entry("Core", false, None).unwrap_err();
        assert!(matches!(err, DeclarationError::DuplicateEntry { .. }));
    }

    #[test]
    fn test_declare_unknown_entry() {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("b1").unwrap();

        let err = registry.declare("Other", "Other.Thing", ClassBody::new()).unwrap_err();
        match err {
            DeclarationError::UnknownEntry { entry, blok, path } => {
                assert_eq!(entry, "Other");
                assert_eq!(blok, "b1");
                assert_eq!(path, "Other.Thing");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_declare_requires_current_blok() {
        let mut registry = DeclarationRegistry::new();
        let err = registry.declare("Model", "Model.Address", address_body()).unwrap_err();
        assert!(matches!(err, DeclarationError::NoCurrentBlok { .. }));

        let err = registry.set_current_blok("missing").unwrap_err();
        assert!(matches!(err, DeclarationError::BlokNotInitialized { .. }));
    }

    #[test]
    fn test_declare_and_reopen_same_path() {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("b1").unwrap();
        registry.declare("Model", "Model.Address", address_body()).unwrap();
        registry
            .declare(
                "Model",
                "Model.Address",
                ClassBody::new().field(FieldDescriptor::string("city")),
            )
            .unwrap();

        let bucket = &registry.blok("b1").unwrap().entries["Model"];
        assert_eq!(bucket.registry_names.len(), 1);
        let path = RegistryPath::parse("Model.Address").unwrap();
        assert_eq!(bucket.bases[&path].len(), 2);
        assert!(registry.has_entry("b1", "Model", "Model.Address"));
    }

    #[test]
    fn test_path_must_match_entry() {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("b1").unwrap();
        let err = registry.declare("Model", "Mixin.Named", ClassBody::new()).unwrap_err();
        assert!(matches!(err, DeclarationError::InvalidPath { .. }));
    }

    #[test]
    fn test_invalid_descriptor_rejected_at_declare() {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("b1").unwrap();
        let body = ClassBody::new()
            .field(FieldDescriptor::integer("id").primary_key())
            .field(FieldDescriptor::string("id"));

        let err = registry.declare("Model", "Model.Address", body).unwrap_err();
        match err {
            DeclarationError::InvalidDescriptor { blok, path, name, .. } => {
                assert_eq!(blok, "b1");
                assert_eq!(path, "Model.Address");
                assert_eq!(name, "id");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_add_and_remove_core() {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("testCore").unwrap();

        let id = registry.add_core("test", ClassBody::new()).unwrap();
        assert!(registry.has_core("testCore", "test"));

        assert!(registry.remove_core("testCore", "test", id).unwrap());
        assert!(!registry.has_core("testCore", "test"));
        assert!(!registry.remove_core("testCore", "test", id).unwrap());
    }

    #[test]
    fn test_add_and_remove_entry() {
        let mut registry = DeclarationRegistry::new();
        registry.declare_entry("Other", false, None).unwrap();
        registry.init_blok("testEntry").unwrap();

        let id = registry.declare("Other", "Other.test", ClassBody::new()).unwrap();
        assert!(registry.has_entry("testEntry", "Other", "Other.test"));

        assert!(registry.remove_entry("testEntry", "Other", "Other.test", id).unwrap());
        assert!(!registry.has_entry("testEntry", "Other", "Other.test"));
        assert!(registry.blok("testEntry").unwrap().entries["Other"]
            .registry_names
            .is_empty());
    }

    #[test]
    fn test_freeze_blocks_mutation() {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("b1").unwrap();
        registry.declare("Model", "Model.Address", address_body()).unwrap();

        let snapshot = registry.freeze();
        assert!(registry.is_frozen());
        assert!(Arc::ptr_eq(&snapshot, &registry.freeze()));

        let err = registry.init_blok("b2").unwrap_err();
        assert!(matches!(err, DeclarationError::Frozen { .. }));

        registry.reopen();
        registry.init_blok("b2").unwrap();
        registry
            .declare("Model", "Model.Person", ClassBody::new().field(FieldDescriptor::string("name").primary_key()))
            .unwrap();

        // the earlier snapshot does not see the new blok
        assert!(!snapshot.has_blok("b2"));
        assert!(registry.freeze().has_blok("b2"));
    }

    #[test]
    fn test_snapshot_orders_by_blok() {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("b1").unwrap();
        registry.declare("Model", "Model.Address", address_body()).unwrap();
        registry.init_blok("b2").unwrap();
        registry
            .declare("Model", "Model.Address", ClassBody::new().field(FieldDescriptor::string("zip")))
            .unwrap();
        registry
            .declare("Model", "Model.Person", ClassBody::new().field(FieldDescriptor::string("name").primary_key()))
            .unwrap();

        let snapshot = registry.freeze();
        let order = vec!["b1".to_string(), "b2".to_string()];
        let paths: Vec<String> = snapshot
            .paths(&order, "Model")
            .iter()
            .map(|p| p.to_string())
            .collect();
        assert_eq!(paths, vec!["Model.Address", "Model.Person"]);

        let path = RegistryPath::parse("Model.Address").unwrap();
        let bloks: Vec<String> = snapshot
            .declarations_of(&order, &path)
            .iter()
            .map(|d| d.blok.clone())
            .collect();
        assert_eq!(bloks, vec!["b1", "b2"]);

        // only installed bloks are visible
        let only_b1 = vec!["b1".to_string()];
        assert_eq!(snapshot.declarations_of(&only_b1, &path).len(), 1);
    }

    #[test]
    fn test_remove_blok_and_clear() {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("b1").unwrap();
        registry.init_blok("b2").unwrap();

        assert!(registry.remove_blok("b1").unwrap());
        assert!(!registry.has_blok("b1"));
        assert_eq!(registry.current_blok(), Some("b2"));

        registry.clear();
        assert!(registry.loaded_bloks().is_empty());
        assert_eq!(registry.current_blok(), None);
    }
}
