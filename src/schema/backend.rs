//! Persistence collaborator boundary
//!
//! The Schema Differ and the Lifecycle Controller talk to storage only through
//! the [`Backend`] trait: schema-definition operations, transactions, typed
//! column introspection and plain row CRUD on [`Record`]s.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::core::{FieldDescriptor, FieldType};

/// One row, as column name -> JSON value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    /// Record data as key-value pairs
    pub data: BTreeMap<String, JsonValue>,
}

impl Record {
    /// Create a new empty record
    pub fn new() -> Self {
        Self {
            data: BTreeMap::new(),
        }
    }

    /// Create a record from a map
    pub fn from_map(data: BTreeMap<String, JsonValue>) -> Self {
        Self { data }
    }

    /// Serialize a struct into a record. Non-object values give an empty record.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(value)? {
            JsonValue::Object(map) => Ok(Self {
                data: map.into_iter().collect(),
            }),
            _ => Ok(Self::new()),
        }
    }

    /// Deserialize the whole record into a struct
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let map: serde_json::Map<String, JsonValue> =
            self.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        serde_json::from_value(JsonValue::Object(map))
    }

    /// Insert a field into the record
    pub fn insert<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> Result<(), serde_json::Error> {
        let json_value = serde_json::to_value(value)?;
        self.data.insert(key.into(), json_value);
        Ok(())
    }

    /// Set a raw JSON value
    pub fn set(&mut self, key: impl Into<String>, value: JsonValue) {
        self.data.insert(key.into(), value);
    }

    /// Builder form of [`Record::set`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Get a field from the record
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        match self.data.get(key) {
            Some(value) => {
                let result = serde_json::from_value(value.clone())?;
                Ok(Some(result))
            }
            None => Ok(None),
        }
    }

    /// Raw value; missing keys and explicit nulls both read as `None`
    pub fn value(&self, key: &str) -> Option<&JsonValue> {
        self.data.get(key).filter(|v| !v.is_null())
    }

    /// Every key of `filter` is present here with an equal value
    pub fn matches(&self, filter: &Record) -> bool {
        filter
            .data
            .iter()
            .all(|(k, v)| self.data.get(k).unwrap_or(&JsonValue::Null) == v)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The record as a JSON object
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(self.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

impl From<Record> for JsonValue {
    fn from(record: Record) -> Self {
        JsonValue::Object(record.data.into_iter().collect())
    }
}

/// Descriptor-level column metadata
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColumnMetadata {
    /// Foreign key target as `table.column`
    pub foreign_key: Option<String>,
    pub label: Option<String>,
}

/// Typed column introspection, also used to define columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub autoincrement: bool,
    pub info: ColumnMetadata,
}

impl ColumnInfo {
    /// Column definition for a declared field. `foreign_key` is the resolved
    /// `table.column` target.
    pub fn from_field(field: &FieldDescriptor, foreign_key: Option<String>) -> Self {
        Self {
            name: field.name.clone(),
            field_type: field.field_type,
            nullable: field.nullable,
            primary_key: field.primary_key,
            unique: field.unique,
            autoincrement: field.autoincrement,
            info: ColumnMetadata {
                foreign_key,
                label: field.label.clone(),
            },
        }
    }
}

/// Schema-definition operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DdlOp {
    CreateTable {
        table: String,
        columns: Vec<ColumnInfo>,
    },
    AddColumn {
        table: String,
        column: ColumnInfo,
    },
    /// Only the `Some` attributes change
    AlterColumn {
        table: String,
        column: String,
        nullable: Option<bool>,
        unique: Option<bool>,
        field_type: Option<FieldType>,
    },
    AddForeignKey {
        table: String,
        column: String,
        target: String,
    },
    DropForeignKey {
        table: String,
        column: String,
    },
}

impl DdlOp {
    pub fn table(&self) -> &str {
        match self {
            DdlOp::CreateTable { table, .. }
            | DdlOp::AddColumn { table, .. }
            | DdlOp::AlterColumn { table, .. }
            | DdlOp::AddForeignKey { table, .. }
            | DdlOp::DropForeignKey { table, .. } => table,
        }
    }
}

impl fmt::Display for DdlOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DdlOp::CreateTable { table, columns } => {
                let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
                write!(f, "CREATE TABLE {} ({})", table, names.join(", "))
            }
            DdlOp::AddColumn { table, column } => {
                write!(f, "ALTER TABLE {} ADD COLUMN {} {}", table, column.name, column.field_type)
            }
            DdlOp::AlterColumn {
                table,
                column,
                nullable,
                unique,
                field_type,
            } => {
                write!(f, "ALTER TABLE {} ALTER COLUMN {}", table, column)?;
                if let Some(t) = field_type {
                    write!(f, " TYPE {}", t)?;
                }
                if let Some(n) = nullable {
                    f.write_str(if *n { " DROP NOT NULL" } else { " SET NOT NULL" })?;
                }
                if let Some(u) = unique {
                    f.write_str(if *u { " ADD UNIQUE" } else { " DROP UNIQUE" })?;
                }
                Ok(())
            }
            DdlOp::AddForeignKey { table, column, target } => {
                write!(f, "ALTER TABLE {} ADD FOREIGN KEY ({}) REFERENCES {}", table, column, target)
            }
            DdlOp::DropForeignKey { table, column } => {
                write!(f, "ALTER TABLE {} DROP FOREIGN KEY ({})", table, column)
            }
        }
    }
}

/// Backend errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("unknown column '{table}.{column}'")]
    UnknownColumn { table: String, column: String },

    #[error("table '{0}' already exists")]
    DuplicateTable(String),

    #[error("column '{table}.{column}' already exists")]
    DuplicateColumn { table: String, column: String },

    /// A row or schema change violates a constraint
    #[error("constraint violated on '{table}.{column}': {reason}")]
    Constraint {
        table: String,
        column: String,
        reason: String,
    },

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Serialization(err.to_string())
    }
}

/// Transactional session to one storage target
pub trait Backend: Send + Sync {
    /// Storage target name
    fn name(&self) -> &str;

    fn begin(&self) -> Result<(), BackendError>;
    fn commit(&self) -> Result<(), BackendError>;
    fn rollback(&self) -> Result<(), BackendError>;
    fn in_transaction(&self) -> bool;

    fn execute_ddl(&self, op: &DdlOp) -> Result<(), BackendError>;

    fn has_table(&self, table: &str) -> bool;
    fn tables(&self) -> Vec<String>;
    fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, BackendError>;

    /// Insert a row, returning it with generated values filled in
    fn insert(&self, table: &str, record: Record) -> Result<Record, BackendError>;
    /// Apply `changes` to every row matching `filter`; returns the row count
    fn update(&self, table: &str, filter: &Record, changes: &Record) -> Result<usize, BackendError>;
    /// Rows matching `filter`, in insertion order
    fn select(&self, table: &str, filter: &Record) -> Result<Vec<Record>, BackendError>;
    fn delete(&self, table: &str, filter: &Record) -> Result<usize, BackendError>;
}

/// Maps a storage target name to a backend session
pub trait Connector: Send + Sync {
    fn connect(&self, name: &str) -> Result<Arc<dyn Backend>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        name: String,
        size: i64,
        label: Option<String>,
    }

    #[test]
    fn test_record_typed_conversion() {
        let row = Row {
            name: "a".into(),
            size: 3,
            label: None,
        };
        let record = Record::from_serializable(&row).unwrap();
        assert_eq!(record.value("name"), Some(&json!("a")));
        assert_eq!(record.value("label"), None);
        assert_eq!(record.to_typed::<Row>().unwrap(), row);
    }

    #[test]
    fn test_record_matching() {
        let record = Record::new().with("a", 1).with("b", "x");
        assert!(record.matches(&Record::new()));
        assert!(record.matches(&Record::new().with("a", 1)));
        assert!(!record.matches(&Record::new().with("a", 2)));
        assert!(record.matches(&Record::new().with("c", JsonValue::Null)));
    }

    #[test]
    fn test_ddl_display() {
        let op = DdlOp::AlterColumn {
            table: "person".into(),
            column: "name".into(),
            nullable: Some(false),
            unique: None,
            field_type: Some(FieldType::String(128)),
        };
        assert_eq!(
            op.to_string(),
            "ALTER TABLE person ALTER COLUMN name TYPE VARCHAR(128) SET NOT NULL"
        );
        assert_eq!(op.table(), "person");
    }
}
