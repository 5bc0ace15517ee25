//! Core declaration-side abstractions
//!
//! This module defines what bloks hand to the registry before anything is
//! composed: registry paths, entry descriptors, field and relationship
//! descriptors, cooperative methods, the per-blok declaration buckets and the
//! catalog of available bloks.

pub mod blok;
pub mod declaration;
pub mod entry;
pub mod field;
pub mod manager;
pub mod method;
pub mod relationship;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use blok::{Blok, BlokError, BlokMetadata, BlokState, FnBlok};
pub use declaration::{ClassBody, Declaration, DeclarationError, DeclarationRegistry, Declarations};
pub use entry::{EntryDescriptor, EntryKind};
pub use field::{FieldDescriptor, FieldType, ForeignKey};
pub use manager::{BlokManager, DependencyGraph};
pub use method::{method, MethodCall, MethodError, MethodFn};
pub use relationship::{ModelRef, RelationshipDescriptor, RelationshipKind};

/// Unique identifier of one declaration (one class body registered by one blok)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeclarationId(pub Uuid);

impl DeclarationId {
    /// Generate a new random declaration ID
    pub fn new() -> Self {
        DeclarationId(Uuid::new_v4())
    }
}

impl Default for DeclarationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeclarationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dotted logical name of a declaration, e.g. `Model.Address`
///
/// The first segment names the entry the declaration belongs to (`Model`,
/// `Mixin`, `Core` or a custom entry), the remaining segments the entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistryPath(String);

impl RegistryPath {
    /// Parse a dotted path. Every segment must be a non-empty identifier and
    /// there must be at least two segments.
    pub fn parse(path: &str) -> Option<Self> {
        let mut segments = 0;
        for segment in path.split('.') {
            let mut chars = segment.chars();
            match chars.next() {
                Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
                _ => return None,
            }
            if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return None;
            }
            segments += 1;
        }
        if segments < 2 {
            return None;
        }
        Some(RegistryPath(path.to_string()))
    }

    /// Build `<entry>.<name>` from already-valid parts
    pub fn join(entry: &str, name: &str) -> Option<Self> {
        Self::parse(&format!("{}.{}", entry, name))
    }

    /// The full dotted path
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First segment, the entry this path is declared under
    pub fn entry(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }

    /// Last segment
    pub fn name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or_default()
    }

    /// Default relational table name: the segments after the entry,
    /// lowercased and joined by `_` (`Model.System.Column` -> `system_column`)
    pub fn table_name(&self) -> String {
        self.0
            .split('.')
            .skip(1)
            .map(|s| s.to_lowercase())
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl fmt::Display for RegistryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RegistryPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_parsing() {
        let path = RegistryPath::parse("Model.System.Column").unwrap();
        assert_eq!(path.entry(), "Model");
        assert_eq!(path.name(), "Column");
        assert_eq!(path.table_name(), "system_column");

        assert!(RegistryPath::parse("Model").is_none());
        assert!(RegistryPath::parse("Model..Address").is_none());
        assert!(RegistryPath::parse("Model.1Address").is_none());
        assert!(RegistryPath::parse("Model.Add-ress").is_none());
    }

    #[test]
    fn test_declaration_id_uniqueness() {
        assert_ne!(DeclarationId::new(), DeclarationId::new());
    }

    #[test]
    fn test_path_serializes_as_string() {
        let path = RegistryPath::parse("Model.Address").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"Model.Address\"");
    }
}
