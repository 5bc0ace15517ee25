//! Materialized registry
//!
//! A [`Registry`] is the running object model for one storage target: the
//! composed entity set, the backend session it was synchronized against, and
//! the bloks it was built from. Records are plain [`Record`] rows; model
//! handles and relationship accessors translate resolved joins into backend
//! reads and writes.

use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::compose::{Association, EntitySet, ResolvedRelationship, SynthesizedEntity};
use crate::core::relationship::JoinPair;
use crate::core::{MethodError, RelationshipKind};
use crate::schema::{Backend, BackendError, Record};

/// Record and relationship access errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum AccessError {
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error("{path} has no relationship '{name}'")]
    UnknownRelationship { path: String, name: String },

    #[error("{path}.{name} is a {found} relationship, expected {expected}")]
    WrongKind {
        path: String,
        name: String,
        expected: RelationshipKind,
        found: RelationshipKind,
    },

    /// A key or join column has no value on the given record
    #[error("{path}: record has no value for '{column}'")]
    MissingKey { path: String, column: String },

    /// The record no longer exists in the backend
    #[error("{path}: record not found")]
    NotFound { path: String },

    /// The record is not linked to the owner of a One2Many
    #[error("{path}: record is not linked to this owner")]
    NotLinked { path: String },

    #[error("{path}: {source}")]
    Backend {
        path: String,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Method(#[from] MethodError),
}

/// Running object model for one storage target
pub struct Registry {
    id: Uuid,
    name: String,
    entities: Arc<EntitySet>,
    backend: Arc<dyn Backend>,
    installed: Vec<String>,
    stale: AtomicBool,
}

impl Registry {
    pub(crate) fn new(name: &str, entities: Arc<EntitySet>, backend: Arc<dyn Backend>, installed: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            entities,
            backend,
            installed,
            stale: AtomicBool::new(false),
        }
    }

    /// Identity of this build; a rebuild gets a new one
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Storage target name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entities(&self) -> &EntitySet {
        &self.entities
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Installed bloks in install order
    pub fn installed_bloks(&self) -> &[String] {
        &self.installed
    }

    pub fn is_installed(&self, blok: &str) -> bool {
        self.installed.iter().any(|b| b == blok)
    }

    /// Replaced by a newer build of the same target
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_stale(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    /// Handle on a table-backed model
    pub fn model(&self, path: &str) -> Result<ModelHandle<'_>, AccessError> {
        let entity = self
            .entities
            .model(path)
            .ok_or_else(|| AccessError::UnknownModel(path.to_string()))?;
        let table = entity
            .table
            .as_deref()
            .ok_or_else(|| AccessError::UnknownModel(path.to_string()))?;
        Ok(ModelHandle {
            registry: self,
            entity,
            table,
        })
    }

    /// The composed `Core.Session` entity
    pub fn session(&self) -> &SynthesizedEntity {
        &self.entities.session
    }

    /// Invoke a method contributed to `Core.Session`
    pub fn invoke_session(&self, name: &str, args: JsonValue) -> Result<JsonValue, AccessError> {
        Ok(self.entities.session.invoke(name, args)?)
    }
}

impl PartialEq for Registry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Registry {}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("backend", &self.backend.name())
            .field("installed", &self.installed)
            .field("stale", &self.is_stale())
            .finish()
    }
}

// ── Model handles ───────────────────────────────────────────────────────────

/// Record access for one model
#[derive(Clone, Copy)]
pub struct ModelHandle<'r> {
    registry: &'r Registry,
    entity: &'r SynthesizedEntity,
    table: &'r str,
}

impl<'r> ModelHandle<'r> {
    pub fn entity(&self) -> &'r SynthesizedEntity {
        self.entity
    }

    pub fn table(&self) -> &'r str {
        self.table
    }

    fn backend_error(&self, source: BackendError) -> AccessError {
        AccessError::Backend {
            path: self.entity.path.to_string(),
            source,
        }
    }

    fn missing(&self, column: &str) -> AccessError {
        AccessError::MissingKey {
            path: self.entity.path.to_string(),
            column: column.to_string(),
        }
    }

    /// Primary key filter for a record of this model
    pub fn key_of(&self, record: &Record) -> Result<Record, AccessError> {
        let mut key = Record::new();
        for field in self.entity.primary_keys() {
            let value = record.value(&field.name).ok_or_else(|| self.missing(&field.name))?;
            key.set(field.name.clone(), value.clone());
        }
        Ok(key)
    }

    /// Insert a record. Field defaults fill missing values; a Many2One
    /// relationship name may carry the remote record (or null).
    pub fn insert(&self, record: Record) -> Result<Record, AccessError> {
        let mut record = record;
        for rel in self.entity.relationships.iter().filter(|r| r.kind == RelationshipKind::Many2One) {
            let Some(target) = record.data.remove(&rel.name) else {
                continue;
            };
            for pair in &rel.join {
                let value = target.get(&pair.remote).cloned().unwrap_or(JsonValue::Null);
                record.set(pair.local.clone(), value);
            }
        }
        for field in &self.entity.fields {
            if let (None, Some(default)) = (record.data.get(&field.name), &field.default) {
                record.set(field.name.clone(), default.clone());
            }
        }
        self.registry
            .backend
            .insert(self.table, record)
            .map_err(|e| self.backend_error(e))
    }

    /// Fetch by primary key
    pub fn get(&self, key: &Record) -> Result<Option<Record>, AccessError> {
        let filter = self.key_of(key)?;
        Ok(self.find(&filter)?.into_iter().next())
    }

    /// Re-read a record from the backend
    pub fn refresh(&self, record: &Record) -> Result<Record, AccessError> {
        self.get(record)?.ok_or_else(|| AccessError::NotFound {
            path: self.entity.path.to_string(),
        })
    }

    pub fn find(&self, filter: &Record) -> Result<Vec<Record>, AccessError> {
        self.registry
            .backend
            .select(self.table, filter)
            .map_err(|e| self.backend_error(e))
    }

    pub fn all(&self) -> Result<Vec<Record>, AccessError> {
        self.find(&Record::new())
    }

    /// Apply `changes` to the stored version of `record`, returning it updated
    pub fn update(&self, record: &Record, changes: &Record) -> Result<Record, AccessError> {
        let key = self.key_of(record)?;
        let count = self
            .registry
            .backend
            .update(self.table, &key, changes)
            .map_err(|e| self.backend_error(e))?;
        if count == 0 {
            return Err(AccessError::NotFound {
                path: self.entity.path.to_string(),
            });
        }
        let mut updated = key;
        for (column, value) in &changes.data {
            updated.set(column.clone(), value.clone());
        }
        self.refresh(&updated)
    }

    pub fn delete(&self, record: &Record) -> Result<bool, AccessError> {
        let key = self.key_of(record)?;
        let count = self
            .registry
            .backend
            .delete(self.table, &key)
            .map_err(|e| self.backend_error(e))?;
        Ok(count > 0)
    }

    /// Invoke a method through its cooperative chain
    pub fn invoke(&self, name: &str, args: JsonValue) -> Result<JsonValue, AccessError> {
        Ok(self.entity.invoke(name, args)?)
    }

    fn relationship(&self, name: &str, expected: RelationshipKind) -> Result<&'r ResolvedRelationship, AccessError> {
        let rel = self
            .entity
            .relationship(name)
            .ok_or_else(|| AccessError::UnknownRelationship {
                path: self.entity.path.to_string(),
                name: name.to_string(),
            })?;
        if rel.kind != expected {
            return Err(AccessError::WrongKind {
                path: self.entity.path.to_string(),
                name: name.to_string(),
                expected,
                found: rel.kind,
            });
        }
        Ok(rel)
    }

    /// The remote record a Many2One points at, if any
    pub fn many2one(&self, record: &Record, name: &str) -> Result<Option<Record>, AccessError> {
        let rel = self.relationship(name, RelationshipKind::Many2One)?;
        let remote = self.registry.model(rel.remote.as_str())?;
        let mut filter = Record::new();
        for pair in &rel.join {
            match record.value(&pair.local) {
                Some(value) => filter.set(pair.remote.clone(), value.clone()),
                None => return Ok(None),
            }
        }
        Ok(remote.find(&filter)?.into_iter().next())
    }

    /// Point a Many2One at `target` (or clear it), returning the updated record
    pub fn set_many2one(&self, record: &Record, name: &str, target: Option<&Record>) -> Result<Record, AccessError> {
        let rel = self.relationship(name, RelationshipKind::Many2One)?;
        let mut changes = Record::new();
        for pair in &rel.join {
            let value = match target {
                Some(t) => t.value(&pair.remote).cloned().ok_or_else(|| self.missing(&pair.remote))?,
                None => JsonValue::Null,
            };
            changes.set(pair.local.clone(), value);
        }
        self.update(record, &changes)
    }

    /// One2Many accessor on `record`
    pub fn one2many(&self, record: &Record, name: &str) -> Result<One2Many<'r>, AccessError> {
        let rel = self.relationship(name, RelationshipKind::One2Many)?;
        let remote = self.registry.model(rel.remote.as_str())?;
        Ok(One2Many {
            owner: *self,
            remote,
            join: &rel.join,
            record: record.clone(),
        })
    }

    /// Many2Many accessor on `record`
    pub fn many2many(&self, record: &Record, name: &str) -> Result<Many2Many<'r>, AccessError> {
        let rel = self.relationship(name, RelationshipKind::Many2Many)?;
        let remote = self.registry.model(rel.remote.as_str())?;
        let association = rel.association.as_ref().ok_or_else(|| AccessError::UnknownRelationship {
            path: self.entity.path.to_string(),
            name: name.to_string(),
        })?;
        Ok(Many2Many {
            owner: *self,
            remote,
            association,
            record: record.clone(),
        })
    }
}

impl fmt::Debug for ModelHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("path", &self.entity.path)
            .field("table", &self.table)
            .finish()
    }
}

/// Values of `record` for the `local` side of each pair, keyed by `remote`
fn join_filter(owner: &ModelHandle<'_>, record: &Record, pairs: &[JoinPair]) -> Result<Record, AccessError> {
    let mut filter = Record::new();
    for pair in pairs {
        let value = record.value(&pair.local).ok_or_else(|| owner.missing(&pair.local))?;
        filter.set(pair.remote.clone(), value.clone());
    }
    Ok(filter)
}

// ── Relationship accessors ──────────────────────────────────────────────────

/// Remote records pointing at one owner record
pub struct One2Many<'r> {
    owner: ModelHandle<'r>,
    remote: ModelHandle<'r>,
    join: &'r [JoinPair],
    record: Record,
}

impl One2Many<'_> {
    /// Every remote record linked to the owner
    pub fn all(&self) -> Result<Vec<Record>, AccessError> {
        let filter = join_filter(&self.owner, &self.record, self.join)?;
        self.remote.find(&filter)
    }

    /// Link `child` to the owner, returning the updated child
    pub fn append(&self, child: &Record) -> Result<Record, AccessError> {
        let changes = join_filter(&self.owner, &self.record, self.join)?;
        self.remote.update(child, &changes)
    }

    /// Unlink `child` by clearing its foreign key columns. The stored child
    /// must currently point at the owner.
    pub fn remove(&self, child: &Record) -> Result<Record, AccessError> {
        let owner_key = join_filter(&self.owner, &self.record, self.join)?;
        let stored = self.remote.refresh(child)?;
        if !stored.matches(&owner_key) {
            return Err(AccessError::NotLinked {
                path: self.remote.entity.path.to_string(),
            });
        }

        let mut changes = Record::new();
        for pair in self.join {
            changes.set(pair.remote.clone(), JsonValue::Null);
        }
        self.remote.update(child, &changes)
    }
}

impl fmt::Debug for One2Many<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("One2Many")
            .field("owner", &self.owner.entity.path)
            .field("remote", &self.remote.entity.path)
            .finish()
    }
}

/// Remote records linked to one owner through an association table
pub struct Many2Many<'r> {
    owner: ModelHandle<'r>,
    remote: ModelHandle<'r>,
    association: &'r Association,
    record: Record,
}

impl Many2Many<'_> {
    fn row(&self, other: &Record) -> Result<Record, AccessError> {
        let mut row = join_filter(&self.owner, &self.record, &self.association.local)?;
        for (column, value) in join_filter(&self.remote, other, &self.association.remote)?.data {
            row.set(column, value);
        }
        Ok(row)
    }

    fn backend(&self) -> &dyn Backend {
        self.owner.registry.backend.as_ref()
    }

    fn association_error(&self, source: BackendError) -> AccessError {
        AccessError::Backend {
            path: self.association.table.clone(),
            source,
        }
    }

    /// Link `other`; linking twice is a no-op
    pub fn link(&self, other: &Record) -> Result<(), AccessError> {
        let row = self.row(other)?;
        let existing = self
            .backend()
            .select(&self.association.table, &row)
            .map_err(|e| self.association_error(e))?;
        if existing.is_empty() {
            self.backend()
                .insert(&self.association.table, row)
                .map_err(|e| self.association_error(e))?;
        }
        Ok(())
    }

    /// Remove the link to `other`, returning whether it existed
    pub fn unlink(&self, other: &Record) -> Result<bool, AccessError> {
        let row = self.row(other)?;
        let count = self
            .backend()
            .delete(&self.association.table, &row)
            .map_err(|e| self.association_error(e))?;
        Ok(count > 0)
    }

    /// Every linked remote record, in link order
    pub fn all(&self) -> Result<Vec<Record>, AccessError> {
        let filter = join_filter(&self.owner, &self.record, &self.association.local)?;
        let links = self
            .backend()
            .select(&self.association.table, &filter)
            .map_err(|e| self.association_error(e))?;

        let mut found = Vec::new();
        for link in links {
            let mut key = Record::new();
            for pair in &self.association.remote {
                let value = link.value(&pair.remote).ok_or_else(|| self.remote.missing(&pair.local))?;
                key.set(pair.local.clone(), value.clone());
            }
            found.extend(self.remote.find(&key)?);
        }
        Ok(found)
    }
}

impl fmt::Debug for Many2Many<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Many2Many")
            .field("owner", &self.owner.entity.path)
            .field("remote", &self.remote.entity.path)
            .field("association", &self.association.table)
            .finish()
    }
}
