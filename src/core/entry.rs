//! Entry descriptors
//!
//! An entry is a category of declarations (`Model`, `Mixin`, or a custom kind
//! registered by an extension). It decides whether its entities must always be
//! present in a composed registry and which callback finalizes them.

use std::fmt;
use std::sync::Arc;

use crate::compose::EntityGroup;

/// Post-composition hook for one entry, called with every entity composed
/// under that entry. An `Err` aborts the composition.
pub type MergeCallback = Arc<dyn Fn(&mut EntityGroup) -> Result<(), String> + Send + Sync>;

/// How the composition engine treats an entry's entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Table-backed entities, ancestors include the Core `Base` and `SqlBase`
    Model,
    /// Reusable contributions that are only materialized as bases
    Mixin,
    /// Extension-defined category, composed but never persisted
    Custom,
}

/// Entry descriptor
#[derive(Clone)]
pub struct EntryDescriptor {
    name: String,
    kind: EntryKind,
    must_be_loaded: bool,
    callback: Option<MergeCallback>,
}

impl EntryDescriptor {
    /// The `Model` entry: must be loaded, table-backed
    pub fn model() -> Self {
        Self {
            name: "Model".to_string(),
            kind: EntryKind::Model,
            must_be_loaded: true,
            callback: None,
        }
    }

    /// The `Mixin` entry
    pub fn mixin() -> Self {
        Self {
            name: "Mixin".to_string(),
            kind: EntryKind::Mixin,
            must_be_loaded: false,
            callback: None,
        }
    }

    /// A custom entry
    pub fn custom(name: impl Into<String>, must_be_loaded: bool, callback: Option<MergeCallback>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Custom,
            must_be_loaded,
            callback,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Entities of this entry appear in every composed registry, even empty
    pub fn must_be_loaded(&self) -> bool {
        self.must_be_loaded
    }

    pub fn callback(&self) -> Option<&MergeCallback> {
        self.callback.as_ref()
    }
}

impl fmt::Debug for EntryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("must_be_loaded", &self.must_be_loaded)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}
