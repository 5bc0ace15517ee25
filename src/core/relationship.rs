//! Relationship descriptors and deferred model references
//!
//! Relationships name their remote entity through a [`ModelRef`], a deferred
//! token that is only resolved once every blok has been composed. The join is
//! either explicit (column pairs) or derived later from foreign keys.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::field::is_identifier;
use super::RegistryPath;

/// Deferred reference to an entity by registry path
///
/// Created from a string (`"Model.Person"`) or from an existing path; checked
/// for syntax when declared and resolved against the composed entity set in
/// the linking pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelRef(String);

impl ModelRef {
    pub fn new(path: impl Into<String>) -> Self {
        ModelRef(path.into())
    }

    /// Raw reference text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parsed path, if the reference is well formed
    pub fn path(&self) -> Option<RegistryPath> {
        RegistryPath::parse(&self.0)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        match self.path() {
            Some(_) => Ok(()),
            None => Err(format!("'{}' is not a valid model reference", self.0)),
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelRef {
    fn from(s: &str) -> Self {
        ModelRef(s.to_string())
    }
}

impl From<String> for ModelRef {
    fn from(s: String) -> Self {
        ModelRef(s)
    }
}

impl From<RegistryPath> for ModelRef {
    fn from(path: RegistryPath) -> Self {
        ModelRef(path.as_str().to_string())
    }
}

impl From<&RegistryPath> for ModelRef {
    fn from(path: &RegistryPath) -> Self {
        ModelRef(path.as_str().to_string())
    }
}

/// Relationship kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipKind {
    /// Remote rows point at the local row through foreign keys
    One2Many,
    /// Local row points at one remote row through foreign keys
    Many2One,
    /// Rows are linked through an association table
    Many2Many,
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationshipKind::One2Many => "One2Many",
            RelationshipKind::Many2One => "Many2One",
            RelationshipKind::Many2Many => "Many2Many",
        };
        f.write_str(name)
    }
}

/// One pair of an explicit join condition: `local.field == remote.field`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinPair {
    pub local: String,
    pub remote: String,
}

/// Relationship descriptor as declared
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    /// Accessor name on the local entity
    pub name: String,
    pub kind: RelationshipKind,
    /// Remote entity
    pub model: ModelRef,
    /// Many2One: foreign key columns on the local entity
    pub local_columns: Vec<String>,
    /// One2Many: foreign key columns on the remote entity
    pub remote_columns: Vec<String>,
    /// Explicit join, overrides any foreign key detection
    pub join: Vec<JoinPair>,
    /// Paired accessor synthesized (or checked) on the remote entity
    pub inverse: Option<String>,
    /// Many2Many: association table name
    pub join_table: Option<String>,
    /// Many2One: nullability of synthesized foreign key columns
    pub nullable: bool,
    pub label: Option<String>,
}

impl RelationshipDescriptor {
    fn new(name: impl Into<String>, kind: RelationshipKind, model: impl Into<ModelRef>) -> Self {
        Self {
            name: name.into(),
            kind,
            model: model.into(),
            local_columns: Vec::new(),
            remote_columns: Vec::new(),
            join: Vec::new(),
            inverse: None,
            join_table: None,
            nullable: true,
            label: None,
        }
    }

    /// `name` lists the remote rows whose foreign keys point at this row
    pub fn one2many(name: impl Into<String>, model: impl Into<ModelRef>) -> Self {
        Self::new(name, RelationshipKind::One2Many, model)
    }

    /// `name` resolves this row's foreign keys to one remote row
    pub fn many2one(name: impl Into<String>, model: impl Into<ModelRef>) -> Self {
        Self::new(name, RelationshipKind::Many2One, model)
    }

    /// `name` lists remote rows linked through an association table
    pub fn many2many(name: impl Into<String>, model: impl Into<ModelRef>) -> Self {
        Self::new(name, RelationshipKind::Many2Many, model)
    }

    /// One2Many: the remote foreign key columns to join on
    pub fn remote_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remote_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Many2One: the local foreign key columns to join on
    pub fn local_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.local_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add `local.<local> == remote.<remote>` to the explicit join
    pub fn join_on(mut self, local: impl Into<String>, remote: impl Into<String>) -> Self {
        self.join.push(JoinPair {
            local: local.into(),
            remote: remote.into(),
        });
        self
    }

    /// Name of the paired accessor on the remote entity
    pub fn inverse(mut self, name: impl Into<String>) -> Self {
        self.inverse = Some(name.into());
        self
    }

    pub fn join_table(mut self, table: impl Into<String>) -> Self {
        self.join_table = Some(table.into());
        self
    }

    /// Synthesized foreign key columns are NOT NULL
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Eager structural validation, run when the owning class body is declared
    pub fn validate(&self) -> Result<(), String> {
        if !is_identifier(&self.name) {
            return Err(format!("'{}' is not a valid relationship name", self.name));
        }
        self.model.validate()?;

        let columns = self
            .local_columns
            .iter()
            .chain(self.remote_columns.iter())
            .chain(self.join.iter().flat_map(|p| [&p.local, &p.remote]));
        for column in columns {
            if !is_identifier(column) {
                return Err(format!("'{}' is not a valid column name", column));
            }
        }

        if !self.remote_columns.is_empty() && self.kind != RelationshipKind::One2Many {
            return Err("remote columns only apply to One2Many".into());
        }
        if !self.local_columns.is_empty() && self.kind != RelationshipKind::Many2One {
            return Err("local columns only apply to Many2One".into());
        }
        if self.join_table.is_some() && self.kind != RelationshipKind::Many2Many {
            return Err("a join table only applies to Many2Many".into());
        }
        if !self.join.is_empty() && self.kind == RelationshipKind::Many2Many {
            return Err("Many2Many joins go through the association table".into());
        }
        if let Some(inverse) = &self.inverse {
            if !is_identifier(inverse) {
                return Err(format!("'{}' is not a valid inverse name", inverse));
            }
        }
        if let Some(table) = &self.join_table {
            if !is_identifier(table) {
                return Err(format!("'{}' is not a valid table name", table));
            }
        }
        Ok(())
    }
}
