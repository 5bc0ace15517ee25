//! System metadata
//!
//! The persisted catalog the Schema Differ reads and writes: one row per
//! model, column and relationship, plus one row per blok with its install
//! state. The catalog is itself declared as ordinary models by the built-in
//! [`CoreBlok`], so it is composed, created and described like any other
//! blok's models.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::backend::{Backend, BackendError, Record};
use crate::compose::{EntitySet, ResolvedRelationship, SynthesizedEntity};
use crate::core::{
    Blok, BlokMetadata, BlokState, ClassBody, DeclarationError, DeclarationRegistry, FieldDescriptor, FieldType,
    RelationshipDescriptor,
};

/// Name of the built-in blok declaring the System models
pub const CORE_BLOK: &str = "registry-core";

pub const MODEL_TABLE: &str = "system_model";
pub const COLUMN_TABLE: &str = "system_column";
pub const RELATIONSHIP_TABLE: &str = "system_relationship";
pub const BLOK_TABLE: &str = "system_blok";

const NAME_SIZE: usize = 256;

// ── Rows ────────────────────────────────────────────────────────────────────

/// `System.Model` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemModel {
    /// Registry path
    pub name: String,
    pub table: String,
}

impl SystemModel {
    pub fn describe(entity: &SynthesizedEntity) -> Option<Self> {
        Some(Self {
            name: entity.path.to_string(),
            table: entity.table.clone()?,
        })
    }

    pub fn compare(&self, persisted: &SystemModel) -> Vec<AttributeChange> {
        let mut changes = Vec::new();
        AttributeChange::push(&mut changes, "table", &self.table, &persisted.table);
        changes
    }
}

/// `System.Column` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemColumn {
    /// `table.column`
    pub code: String,
    /// Registry path of the owning model
    pub model: String,
    pub name: String,
    /// String serialization of the storage type
    pub ctype: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub autoincrement: bool,
    /// Foreign key target as `table.column`
    pub foreign_key: Option<String>,
    pub label: Option<String>,
}

impl SystemColumn {
    pub fn describe(entity: &SynthesizedEntity, table: &str, field: &FieldDescriptor, foreign_key: Option<String>) -> Self {
        Self {
            code: format!("{}.{}", table, field.name),
            model: entity.path.to_string(),
            name: field.name.clone(),
            ctype: field.field_type.sql_type(),
            nullable: field.nullable,
            primary_key: field.primary_key,
            unique: field.unique,
            autoincrement: field.autoincrement,
            foreign_key,
            label: field.label.clone(),
        }
    }

    /// Attributes where `self` (declared) differs from `persisted`, in the
    /// order they are reconciled
    pub fn compare(&self, persisted: &SystemColumn) -> Vec<AttributeChange> {
        let mut changes = Vec::new();
        AttributeChange::push(&mut changes, "autoincrement", &self.autoincrement, &persisted.autoincrement);
        AttributeChange::push(&mut changes, "nullable", &self.nullable, &persisted.nullable);
        AttributeChange::push(&mut changes, "primary_key", &self.primary_key, &persisted.primary_key);
        AttributeChange::push(&mut changes, "unique", &self.unique, &persisted.unique);
        AttributeChange::push(&mut changes, "foreign_key", &self.foreign_key, &persisted.foreign_key);
        AttributeChange::push(&mut changes, "label", &self.label, &persisted.label);
        AttributeChange::push(&mut changes, "ctype", &self.ctype, &persisted.ctype);
        changes
    }
}

/// `System.Relationship` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemRelationship {
    /// `table.relationship`
    pub code: String,
    pub model: String,
    pub name: String,
    pub kind: String,
    pub remote_model: String,
    /// Human readable join condition
    pub join: String,
    pub inverse: Option<String>,
}

impl SystemRelationship {
    pub fn describe(set: &EntitySet, entity: &SynthesizedEntity, table: &str, rel: &ResolvedRelationship) -> Self {
        let remote_table = set
            .model(rel.remote.as_str())
            .and_then(|m| m.table.as_deref())
            .unwrap_or_default();
        Self {
            code: format!("{}.{}", table, rel.name),
            model: entity.path.to_string(),
            name: rel.name.clone(),
            kind: rel.kind.to_string(),
            remote_model: rel.remote.to_string(),
            join: rel.join_description(table, remote_table),
            inverse: rel.inverse.clone(),
        }
    }

    pub fn compare(&self, persisted: &SystemRelationship) -> Vec<AttributeChange> {
        let mut changes = Vec::new();
        AttributeChange::push(&mut changes, "kind", &self.kind, &persisted.kind);
        AttributeChange::push(&mut changes, "remote_model", &self.remote_model, &persisted.remote_model);
        AttributeChange::push(&mut changes, "join", &self.join, &persisted.join);
        AttributeChange::push(&mut changes, "inverse", &self.inverse, &persisted.inverse);
        changes
    }
}

/// `System.Blok` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemBlok {
    pub name: String,
    pub state: BlokState,
    pub version: String,
    /// Position in the install sequence, `None` until installed
    pub install_order: Option<i64>,
}

/// One attribute whose declared value differs from the persisted one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub attribute: String,
    pub declared: JsonValue,
    pub persisted: JsonValue,
}

impl AttributeChange {
    fn push<T: Serialize + PartialEq>(changes: &mut Vec<AttributeChange>, attribute: &str, declared: &T, persisted: &T) {
        if declared != persisted {
            changes.push(AttributeChange {
                attribute: attribute.to_string(),
                declared: serde_json::to_value(declared).unwrap_or(JsonValue::Null),
                persisted: serde_json::to_value(persisted).unwrap_or(JsonValue::Null),
            });
        }
    }

    /// Record holding the declared value of every change
    pub fn to_record(changes: &[AttributeChange]) -> Record {
        let mut record = Record::new();
        for change in changes {
            record.set(change.attribute.clone(), change.declared.clone());
        }
        record
    }
}

/// Read every row of a System table. A missing table reads as empty.
pub fn read_rows<T: DeserializeOwned>(backend: &dyn Backend, table: &str) -> Result<Vec<T>, BackendError> {
    if !backend.has_table(table) {
        return Ok(Vec::new());
    }
    backend
        .select(table, &Record::new())?
        .iter()
        .map(|r| r.to_typed::<T>().map_err(BackendError::from))
        .collect()
}

// ── Core blok ───────────────────────────────────────────────────────────────

/// Built-in blok declaring the System models
#[derive(Debug, Clone)]
pub struct CoreBlok {
    metadata: BlokMetadata,
}

impl CoreBlok {
    pub fn new() -> Self {
        Self {
            metadata: BlokMetadata::new(CORE_BLOK, crate::VERSION)
                .with_description("System catalog of models, columns, relationships and bloks"),
        }
    }
}

impl Default for CoreBlok {
    fn default() -> Self {
        Self::new()
    }
}

fn name_field(name: &str) -> FieldDescriptor {
    FieldDescriptor::new(name, FieldType::String(NAME_SIZE))
}

fn flag(name: &str) -> FieldDescriptor {
    FieldDescriptor::boolean(name).required()
}

impl Blok for CoreBlok {
    fn metadata(&self) -> &BlokMetadata {
        &self.metadata
    }

    fn declare(&self, declarations: &mut DeclarationRegistry) -> Result<(), DeclarationError> {
        declarations.declare(
            "Model",
            "Model.System.Model",
            ClassBody::new()
                .table(MODEL_TABLE)
                .field(name_field("name").primary_key())
                .field(name_field("table").required())
                .relationship(
                    RelationshipDescriptor::one2many("columns", "Model.System.Column").remote_columns(["model"]),
                )
                .relationship(
                    RelationshipDescriptor::one2many("relationships", "Model.System.Relationship")
                        .remote_columns(["model"]),
                ),
        )?;

        declarations.declare(
            "Model",
            "Model.System.Column",
            ClassBody::new()
                .table(COLUMN_TABLE)
                .field(name_field("model").primary_key().foreign_key("Model.System.Model", "name"))
                .field(name_field("name").primary_key())
                .field(name_field("code").required().unique())
                .field(FieldDescriptor::new("ctype", FieldType::String(64)).required())
                .field(flag("nullable"))
                .field(flag("primary_key"))
                .field(flag("unique"))
                .field(flag("autoincrement"))
                .field(name_field("foreign_key"))
                .field(FieldDescriptor::text("label")),
        )?;

        declarations.declare(
            "Model",
            "Model.System.Relationship",
            ClassBody::new()
                .table(RELATIONSHIP_TABLE)
                .field(name_field("model").primary_key().foreign_key("Model.System.Model", "name"))
                .field(name_field("name").primary_key())
                .field(name_field("code").required().unique())
                .field(FieldDescriptor::new("kind", FieldType::String(16)).required())
                .field(name_field("remote_model").required())
                .field(FieldDescriptor::text("join").required())
                .field(name_field("inverse")),
        )?;

        declarations.declare(
            "Model",
            "Model.System.Blok",
            ClassBody::new()
                .table(BLOK_TABLE)
                .field(name_field("name").primary_key())
                .field(FieldDescriptor::new("state", FieldType::String(32)).required())
                .field(FieldDescriptor::new("version", FieldType::String(32)).required())
                .field(FieldDescriptor::integer("install_order")),
        )?;

        Ok(())
    }
}
