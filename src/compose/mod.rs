//! Composition Engine
//!
//! Turns a frozen [`Declarations`](crate::core::Declarations) snapshot and an
//! ordered list of installed bloks into an [`EntitySet`]: one synthesized
//! entity per registry path, with merged fields, cooperative method chains,
//! resolved relationships and the association tables they need.
//!
//! Pipeline:
//! 1. linearize every path's contributions (C3, later bloks first)
//! 2. merge fields, relationships and methods along that order
//! 3. link deferred model references
//! 4. synthesize relationship joins from foreign keys
//! 5. validate the whole set, then run entry callbacks

pub mod engine;
pub mod linearize;
pub mod relation;
pub mod validation;

use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::core::{
    EntryKind, FieldDescriptor, MethodCall, MethodError, MethodFn, RegistryPath, RelationshipDescriptor,
};

pub use engine::compose;
pub use linearize::{linearize, LinearizeError};
pub use relation::{Association, ResolvedRelationship};
pub use validation::{EntitySetValidator, ValidationIssue, ValidationReport};

/// Composition errors
///
/// Every variant names the registry path and the blok at fault.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompositionError {
    /// A model reference does not resolve to a table-backed entity
    #[error("{path} (blok '{blok}') references unknown model '{reference}'")]
    UnknownModel {
        blok: String,
        path: String,
        reference: String,
    },

    /// A base names a mixin no installed blok declares
    #[error("{path} (blok '{blok}') inherits unknown mixin '{mixin}'")]
    MixinNotFound {
        blok: String,
        path: String,
        mixin: String,
    },

    /// A declaration is its own ancestor
    #[error("circular composition for {path} (blok '{blok}'): {}", .chain.join(" -> "))]
    Cycle {
        blok: String,
        path: String,
        chain: Vec<String>,
    },

    /// The bases of a path cannot be ordered consistently
    #[error("inconsistent base order for {path} (blok '{blok}')")]
    InconsistentHierarchy { blok: String, path: String },

    /// Several foreign keys could back an automatic join
    #[error(
        "{path}.{relationship} (blok '{blok}'): ambiguous foreign keys on {remote}, candidates: {}",
        .candidates.join(", ")
    )]
    AmbiguousForeignKey {
        blok: String,
        path: String,
        relationship: String,
        remote: String,
        candidates: Vec<String>,
    },

    /// No foreign key links the two entities
    #[error("{path}.{relationship} (blok '{blok}'): no foreign key on {remote} points at {path}")]
    NoForeignKey {
        blok: String,
        path: String,
        relationship: String,
        remote: String,
    },

    /// An explicit join or column list does not fit the entities
    #[error("{path}.{relationship} (blok '{blok}'): {reason}")]
    InvalidJoin {
        blok: String,
        path: String,
        relationship: String,
        reason: String,
    },

    /// A paired accessor exists but disagrees with its partner
    #[error("{path}.{relationship} (blok '{blok}'): inverse '{inverse}' is inconsistent: {reason}")]
    InconsistentInverse {
        blok: String,
        path: String,
        relationship: String,
        inverse: String,
        reason: String,
    },

    /// An entry callback rejected the composed entities
    #[error("callback of entry '{entry}' failed: {reason}")]
    Callback { entry: String, reason: String },

    /// Entity-set validation failed
    #[error("{path} (blok '{blok}'): {message}")]
    Invalid {
        blok: String,
        path: String,
        message: String,
    },
}

/// The merged, live entity for one registry path
#[derive(Clone)]
pub struct SynthesizedEntity {
    pub path: RegistryPath,
    /// Entry the path belongs to
    pub entry: String,
    pub kind: EntryKind,
    /// Table name, for table-backed models only
    pub table: Option<String>,
    /// Merged fields, lowest-precedence contribution first
    pub fields: Vec<FieldDescriptor>,
    /// Merged relationship declarations
    pub declared_relationships: Vec<RelationshipDescriptor>,
    /// Relationships with their joins resolved
    pub relationships: Vec<ResolvedRelationship>,
    /// Method chains, highest precedence first
    pub methods: BTreeMap<String, Vec<MethodFn>>,
    /// Blok that contributed the effective version of each field or relationship
    pub origins: HashMap<String, String>,
    /// Bloks that declared this path, in load order
    pub bloks: Vec<String>,
    /// Linearized contributions, e.g. `Model.X@b2`, `Model.X@b1`, `Core.Base@core`
    pub mro: Vec<String>,
}

impl SynthesizedEntity {
    pub(crate) fn empty(path: RegistryPath, entry: &str, kind: EntryKind) -> Self {
        Self {
            path,
            entry: entry.to_string(),
            kind,
            table: None,
            fields: Vec::new(),
            declared_relationships: Vec::new(),
            relationships: Vec::new(),
            methods: BTreeMap::new(),
            origins: HashMap::new(),
            bloks: Vec::new(),
            mro: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Primary key fields in declaration order
    pub fn primary_keys(&self) -> Vec<&FieldDescriptor> {
        self.fields.iter().filter(|f| f.primary_key).collect()
    }

    pub fn relationship(&self, name: &str) -> Option<&ResolvedRelationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Backed by a table
    pub fn is_table(&self) -> bool {
        self.table.is_some()
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Blok that contributed the effective version of a member
    pub fn origin(&self, member: &str) -> Option<&str> {
        self.origins.get(member).map(String::as_str)
    }

    /// Blok used when reporting problems about this entity
    pub(crate) fn blame(&self, member: Option<&str>) -> String {
        member
            .and_then(|m| self.origin(m))
            .or_else(|| self.bloks.last().map(String::as_str))
            .unwrap_or_default()
            .to_string()
    }

    /// Invoke a method through its cooperative chain
    pub fn invoke(&self, name: &str, args: JsonValue) -> Result<JsonValue, MethodError> {
        let chain = self.methods.get(name).map(Vec::as_slice).unwrap_or_default();
        MethodCall::invoke(&self.path, name, chain, args)
    }
}

impl fmt::Debug for SynthesizedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesizedEntity")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("table", &self.table)
            .field("fields", &self.fields.iter().map(|f| &f.name).collect::<Vec<_>>())
            .field(
                "relationships",
                &self.relationships.iter().map(|r| &r.name).collect::<Vec<_>>(),
            )
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("mro", &self.mro)
            .finish()
    }
}

/// Entities composed under one entry
#[derive(Debug, Clone)]
pub struct EntityGroup {
    pub entry: String,
    pub kind: EntryKind,
    pub must_be_loaded: bool,
    /// Entities in first-declaration order
    pub entities: Vec<SynthesizedEntity>,
}

impl EntityGroup {
    pub fn get(&self, path: &str) -> Option<&SynthesizedEntity> {
        self.entities.iter().find(|e| e.path.as_str() == path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut SynthesizedEntity> {
        self.entities.iter_mut().find(|e| e.path.as_str() == path)
    }

    pub fn paths(&self) -> Vec<&RegistryPath> {
        self.entities.iter().map(|e| &e.path).collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Result of one composition run
#[derive(Debug, Clone)]
pub struct EntitySet {
    /// Bloks composed, in load order
    pub bloks: Vec<String>,
    pub groups: Vec<EntityGroup>,
    /// Merged `Core.Session` contributions
    pub session: SynthesizedEntity,
    /// Association tables needed by Many2Many relationships
    pub associations: Vec<Association>,
    /// Non-fatal validation findings
    pub warnings: Vec<String>,
}

impl EntitySet {
    pub fn group(&self, entry: &str) -> Option<&EntityGroup> {
        self.groups.iter().find(|g| g.entry == entry)
    }

    pub fn group_mut(&mut self, entry: &str) -> Option<&mut EntityGroup> {
        self.groups.iter_mut().find(|g| g.entry == entry)
    }

    pub fn entity(&self, path: &str) -> Option<&SynthesizedEntity> {
        let entry = path.split('.').next().unwrap_or_default();
        self.group(entry).and_then(|g| g.get(path))
    }

    pub fn entity_mut(&mut self, path: &str) -> Option<&mut SynthesizedEntity> {
        let entry = path.split('.').next().unwrap_or_default();
        self.group_mut(entry).and_then(|g| g.get_mut(path))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entity(path).is_some()
    }

    /// Table-backed entities, group by group
    pub fn models(&self) -> impl Iterator<Item = &SynthesizedEntity> {
        self.groups
            .iter()
            .filter(|g| g.kind == EntryKind::Model)
            .flat_map(|g| g.entities.iter())
            .filter(|e| e.is_table())
    }

    /// Table-backed entity with the given path
    pub fn model(&self, path: &str) -> Option<&SynthesizedEntity> {
        self.entity(path)
            .filter(|e| e.kind == EntryKind::Model && e.is_table())
    }

    pub fn association(&self, table: &str) -> Option<&Association> {
        self.associations.iter().find(|a| a.table == table)
    }

    /// Every composed path
    pub fn paths(&self) -> Vec<&RegistryPath> {
        self.groups.iter().flat_map(|g| g.paths()).collect()
    }
}
