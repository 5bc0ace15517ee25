//! Field (column) descriptors
//!
//! A field descriptor carries the schema-describing attributes of one column:
//! storage type, nullability, key flags, an optional foreign key target and a
//! human label. Descriptors are plain values built with consuming `with`-style
//! setters; they are validated when the owning class body is declared.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use super::relationship::ModelRef;

/// Default size of a `VARCHAR` column
pub const DEFAULT_STRING_SIZE: usize = 64;

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// 32-bit integer
    Integer,
    /// 64-bit integer
    BigInteger,
    /// Floating point number
    Float,
    /// Boolean
    Boolean,
    /// Bounded string
    String(usize),
    /// Unbounded text
    Text,
    /// Calendar date
    Date,
    /// Date and time
    DateTime,
    /// Arbitrary JSON document
    Json,
}

impl FieldType {
    /// String serialization of the type, as persisted in `System.Column.ctype`
    pub fn sql_type(&self) -> String {
        match self {
            FieldType::Integer => "INTEGER".to_string(),
            FieldType::BigInteger => "BIGINT".to_string(),
            FieldType::Float => "FLOAT".to_string(),
            FieldType::Boolean => "BOOLEAN".to_string(),
            FieldType::String(size) => format!("VARCHAR({})", size),
            FieldType::Text => "TEXT".to_string(),
            FieldType::Date => "DATE".to_string(),
            FieldType::DateTime => "DATETIME".to_string(),
            FieldType::Json => "JSON".to_string(),
        }
    }

    /// Whether the type can carry an autoincrement sequence
    pub fn is_integer(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::BigInteger)
    }

    /// Check that a JSON value can be stored in a column of this type.
    /// `null` is accepted here; nullability is enforced separately.
    pub fn accepts(&self, value: &JsonValue) -> bool {
        match (self, value) {
            (_, JsonValue::Null) => true,
            (FieldType::Integer | FieldType::BigInteger, JsonValue::Number(n)) => n.is_i64() || n.is_u64(),
            (FieldType::Float, JsonValue::Number(_)) => true,
            (FieldType::Boolean, JsonValue::Bool(_)) => true,
            (FieldType::String(size), JsonValue::String(s)) => s.chars().count() <= *size,
            (FieldType::Text | FieldType::Date | FieldType::DateTime, JsonValue::String(_)) => true,
            (FieldType::Json, _) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql_type())
    }
}

/// Foreign key target: a remote entity and one of its fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Remote entity, resolved in the linking pass
    pub model: ModelRef,
    /// Remote field name
    pub field: String,
}

/// Field descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Column name
    pub name: String,
    /// Storage type
    pub field_type: FieldType,
    /// Whether NULL is allowed
    pub nullable: bool,
    /// Part of the primary key
    pub primary_key: bool,
    /// Unique constraint
    pub unique: bool,
    /// Values are generated by the store when omitted
    pub autoincrement: bool,
    /// Optional foreign key target
    pub foreign_key: Option<ForeignKey>,
    /// Optional human label
    pub label: Option<String>,
    /// Value used on insert when none is given
    pub default: Option<JsonValue>,
}

impl FieldDescriptor {
    /// Create a nullable, non-key field of the given type
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
            primary_key: false,
            unique: false,
            autoincrement: false,
            foreign_key: None,
            label: None,
            default: None,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn big_integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::BigInteger)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    /// `VARCHAR` field with the default size
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String(DEFAULT_STRING_SIZE))
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Date)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::DateTime)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Json)
    }

    /// Mark as primary key. Primary keys are never nullable, and integer
    /// primary keys autoincrement unless told otherwise afterwards.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        if self.field_type.is_integer() {
            self.autoincrement = true;
        }
        self
    }

    /// Set nullability
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Shorthand for `with_nullable(false)`
    pub fn required(self) -> Self {
        self.with_nullable(false)
    }

    /// Add a unique constraint
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set the autoincrement flag
    pub fn with_autoincrement(mut self, autoincrement: bool) -> Self {
        self.autoincrement = autoincrement;
        self
    }

    /// Point this field at `model.field`
    pub fn foreign_key(mut self, model: impl Into<ModelRef>, field: impl Into<String>) -> Self {
        self.foreign_key = Some(ForeignKey {
            model: model.into(),
            field: field.into(),
        });
        self
    }

    /// Set the human label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the insert default
    pub fn with_default(mut self, value: impl Into<JsonValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Eager structural validation, run when the owning class body is declared
    pub fn validate(&self) -> Result<(), String> {
        if !is_identifier(&self.name) {
            return Err(format!("'{}' is not a valid field name", self.name));
        }
        if self.primary_key && self.nullable {
            return Err("a primary key cannot be nullable".into());
        }
        if self.autoincrement && !self.field_type.is_integer() {
            return Err(format!(
                "autoincrement requires an integer type, got {}",
                self.field_type
            ));
        }
        if let FieldType::String(0) = self.field_type {
            return Err("string size must be greater than zero".into());
        }
        if let Some(fk) = &self.foreign_key {
            if !is_identifier(&fk.field) {
                return Err(format!("foreign key field '{}' is not valid", fk.field));
            }
            fk.model.validate()?;
        }
        if let Some(default) = &self.default {
            if !self.field_type.accepts(default) {
                return Err(format!("default value {} does not fit {}", default, self.field_type));
            }
        }
        Ok(())
    }
}

/// Column and relationship names follow SQL identifier rules
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
