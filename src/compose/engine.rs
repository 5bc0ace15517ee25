//! Composition of declarations into synthesized entities

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::linearize::{linearize, LinearizeError};
use super::relation;
use super::validation::EntitySetValidator;
use super::{CompositionError, EntityGroup, EntitySet, SynthesizedEntity};
use crate::core::declaration::CORE_ENTRY;
use crate::core::{Declaration, DeclarationId, Declarations, EntryKind, ModelRef, RegistryPath};

/// Core buckets every Model inherits from, highest precedence first
const MODEL_CORE_BASES: [&str; 2] = ["SqlBase", "Base"];

/// Node of the contribution graph
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Node {
    /// A registry path; its parents are its declarations, last blok first
    Path(RegistryPath),
    /// One declaration; its parents are the bases it lists
    Decl(DeclarationId),
}

struct Composer<'a> {
    declarations: &'a Declarations,
    bloks: &'a [String],
    known: HashMap<DeclarationId, Arc<Declaration>>,
}

impl<'a> Composer<'a> {
    fn new(declarations: &'a Declarations, bloks: &'a [String]) -> Self {
        Self {
            declarations,
            bloks,
            known: HashMap::new(),
        }
    }

    fn kind_of(&self, path: &RegistryPath) -> EntryKind {
        self.declarations
            .entry(path.entry())
            .map(|e| e.kind())
            .unwrap_or(EntryKind::Custom)
    }

    fn parents(&mut self, node: &Node) -> Result<Vec<Node>, CompositionError> {
        match node {
            Node::Path(path) => {
                let found = self.declarations.declarations_of(self.bloks, path);
                let mut parents: Vec<Node> = found.iter().rev().map(|d| Node::Decl(d.id)).collect();
                for declaration in found {
                    self.known.insert(declaration.id, declaration);
                }

                if path.entry() != CORE_ENTRY && self.kind_of(path) == EntryKind::Model {
                    for core in MODEL_CORE_BASES {
                        let Some(core_path) = RegistryPath::join(CORE_ENTRY, core) else {
                            continue;
                        };
                        if !self.declarations.declarations_of(self.bloks, &core_path).is_empty() {
                            parents.push(Node::Path(core_path));
                        }
                    }
                }
                Ok(parents)
            }
            Node::Decl(id) => {
                let Some(declaration) = self.known.get(id).cloned() else {
                    return Ok(Vec::new());
                };
                declaration
                    .body
                    .bases
                    .iter()
                    .map(|base| self.resolve_base(&declaration, base))
                    .collect()
            }
        }
    }

    fn resolve_base(&self, declaration: &Declaration, base: &ModelRef) -> Result<Node, CompositionError> {
        let unknown = || CompositionError::UnknownModel {
            blok: declaration.blok.clone(),
            path: declaration.path.to_string(),
            reference: base.to_string(),
        };
        let path = base.path().ok_or_else(unknown)?;

        if self.declarations.declarations_of(self.bloks, &path).is_empty() {
            if self.kind_of(&path) == EntryKind::Mixin {
                return Err(CompositionError::MixinNotFound {
                    blok: declaration.blok.clone(),
                    path: declaration.path.to_string(),
                    mixin: base.to_string(),
                });
            }
            return Err(unknown());
        }
        Ok(Node::Path(path))
    }

    fn describe(&self, node: &Node) -> String {
        match node {
            Node::Path(path) => path.to_string(),
            Node::Decl(id) => match self.known.get(id) {
                Some(d) => format!("{}@{}", d.path, d.blok),
                None => id.to_string(),
            },
        }
    }

    /// Linearize and merge every contribution to `path`
    fn entity(&mut self, path: &RegistryPath, entry: &str, kind: EntryKind) -> Result<SynthesizedEntity, CompositionError> {
        let root = Node::Path(path.clone());
        let linearized = linearize(&root, &mut |node: &Node| self.parents(node));
        let order = match linearized {
            Ok(order) => order,
            Err(LinearizeError::Parents(err)) => return Err(err),
            Err(LinearizeError::Cycle(chain)) => {
                let blok = chain
                    .iter()
                    .find_map(|n| match n {
                        Node::Decl(id) => self.known.get(id).map(|d| d.blok.clone()),
                        Node::Path(_) => None,
                    })
                    .unwrap_or_default();
                return Err(CompositionError::Cycle {
                    blok,
                    path: path.to_string(),
                    chain: chain.iter().map(|n| self.describe(n)).collect(),
                });
            }
            Err(LinearizeError::Inconsistent(_)) => {
                let blok = self
                    .declarations
                    .declarations_of(self.bloks, path)
                    .last()
                    .map(|d| d.blok.clone())
                    .unwrap_or_default();
                return Err(CompositionError::InconsistentHierarchy {
                    blok,
                    path: path.to_string(),
                });
            }
        };

        // highest precedence first
        let contributions: Vec<Arc<Declaration>> = order
            .iter()
            .filter_map(|node| match node {
                Node::Decl(id) => self.known.get(id).cloned(),
                Node::Path(_) => None,
            })
            .collect();

        let mut entity = SynthesizedEntity::empty(path.clone(), entry, kind);
        entity.mro = order
            .iter()
            .filter(|n| matches!(n, Node::Decl(_)))
            .map(|n| self.describe(n))
            .collect();

        for declaration in contributions.iter().rev() {
            for field in &declaration.body.fields {
                match entity.fields.iter().position(|f| f.name == field.name) {
                    Some(pos) => entity.fields[pos] = field.clone(),
                    None => entity.fields.push(field.clone()),
                }
                entity.origins.insert(field.name.clone(), declaration.blok.clone());
            }
            for rel in &declaration.body.relationships {
                match entity
                    .declared_relationships
                    .iter()
                    .position(|r| r.name == rel.name)
                {
                    Some(pos) => entity.declared_relationships[pos] = rel.clone(),
                    None => entity.declared_relationships.push(rel.clone()),
                }
                entity.origins.insert(rel.name.clone(), declaration.blok.clone());
            }
        }

        for declaration in &contributions {
            for (name, f) in &declaration.body.methods {
                entity.methods.entry(name.clone()).or_default().push(Arc::clone(f));
            }
        }

        for blok in self.bloks {
            if contributions.iter().any(|d| &d.blok == blok && &d.path == path) {
                entity.bloks.push(blok.clone());
            }
        }

        if kind == EntryKind::Model && !entity.fields.is_empty() {
            let table = contributions
                .iter()
                .filter(|d| &d.path == path)
                .find_map(|d| d.body.table.clone())
                .unwrap_or_else(|| path.table_name());
            entity.table = Some(table);
        }

        debug!(
            target: "registry::compose",
            path = %path,
            contributions = contributions.len(),
            fields = entity.fields.len(),
            methods = entity.methods.len(),
            "Entity synthesized"
        );
        Ok(entity)
    }
}

/// Compose every path declared by `bloks` (in load order)
///
/// Entries declared with `must_be_loaded` always get a group, even when no
/// blok declares anything under them.
pub fn compose(declarations: &Declarations, bloks: &[String]) -> Result<EntitySet, CompositionError> {
    let mut composer = Composer::new(declarations, bloks);
    let mut groups = Vec::new();

    for entry in declarations.entries() {
        let paths = declarations.paths(bloks, entry.name());
        if paths.is_empty() && !entry.must_be_loaded() {
            continue;
        }

        let mut entities = Vec::with_capacity(paths.len());
        for path in &paths {
            entities.push(composer.entity(path, entry.name(), entry.kind())?);
        }
        groups.push(EntityGroup {
            entry: entry.name().to_string(),
            kind: entry.kind(),
            must_be_loaded: entry.must_be_loaded(),
            entities,
        });
    }

    let session_path = RegistryPath::join(CORE_ENTRY, "Session").ok_or_else(|| CompositionError::Invalid {
        blok: String::new(),
        path: format!("{}.Session", CORE_ENTRY),
        message: "invalid session path".into(),
    })?;
    let session = composer.entity(&session_path, CORE_ENTRY, EntryKind::Custom)?;

    let mut set = EntitySet {
        bloks: bloks.to_vec(),
        groups,
        session,
        associations: Vec::new(),
        warnings: Vec::new(),
    };

    link(&set)?;
    relation::synthesize(&mut set)?;

    let report = EntitySetValidator::validate(&set);
    for warning in &report.warnings {
        warn!(target: "registry::compose", path = warning.path.as_deref().unwrap_or(""), "{}", warning.message);
    }
    set.warnings = report.warnings.iter().map(|w| w.to_string()).collect();
    if let Some(error) = report.errors.into_iter().next() {
        return Err(CompositionError::Invalid {
            blok: error.blok.unwrap_or_default(),
            path: error.path.unwrap_or_default(),
            message: error.message,
        });
    }

    for entry in declarations.entries() {
        let Some(callback) = entry.callback() else {
            continue;
        };
        if let Some(group) = set.group_mut(entry.name()) {
            callback(group).map_err(|reason| CompositionError::Callback {
                entry: entry.name().to_string(),
                reason,
            })?;
        }
    }

    info!(
        target: "registry::compose",
        bloks = bloks.len(),
        entities = set.paths().len(),
        associations = set.associations.len(),
        "Composition complete"
    );
    Ok(set)
}

/// Resolve every deferred model reference against the composed set.
///
/// Foreign keys and relationships must point at table-backed models.
fn link(set: &EntitySet) -> Result<(), CompositionError> {
    for group in &set.groups {
        for entity in &group.entities {
            for field in &entity.fields {
                let Some(fk) = &field.foreign_key else {
                    continue;
                };
                if set.model(fk.model.as_str()).is_none() {
                    return Err(CompositionError::UnknownModel {
                        blok: entity.blame(Some(&field.name)),
                        path: entity.path.to_string(),
                        reference: fk.model.to_string(),
                    });
                }
            }
            for rel in &entity.declared_relationships {
                if set.model(rel.model.as_str()).is_none() {
                    return Err(CompositionError::UnknownModel {
                        blok: entity.blame(Some(&rel.name)),
                        path: entity.path.to_string(),
                        reference: rel.model.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{method, ClassBody, DeclarationRegistry, FieldDescriptor};
    use serde_json::json;

    fn bloks(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_reopened_path_merges_fields() {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("b1").unwrap();
        registry
            .declare(
                "Model",
                "Model.X",
                ClassBody::new()
                    .field(FieldDescriptor::integer("id").primary_key())
                    .field(FieldDescriptor::string("a")),
            )
            .unwrap();
        registry.init_blok("b2").unwrap();
        registry
            .declare("Model", "Model.X", ClassBody::new().field(FieldDescriptor::string("b")))
            .unwrap();

        let set = compose(&registry.freeze(), &bloks(&["b1", "b2"])).unwrap();
        let x = set.entity("Model.X").unwrap();
        let names: Vec<&str> = x.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "a", "b"]);
        assert_eq!(x.origin("a"), Some("b1"));
        assert_eq!(x.origin("b"), Some("b2"));
        assert_eq!(x.table.as_deref(), Some("x"));
        assert_eq!(x.mro, vec!["Model.X@b2", "Model.X@b1"]);
    }

    #[test]
    fn test_later_blok_overrides_field_in_place() {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("b1").unwrap();
        registry
            .declare(
                "Model",
                "Model.X",
                ClassBody::new()
                    .field(FieldDescriptor::integer("id").primary_key())
                    .field(FieldDescriptor::string("name"))
                    .field(FieldDescriptor::text("notes")),
            )
            .unwrap();
        registry.init_blok("b2").unwrap();
        registry
            .declare("Model", "Model.X", ClassBody::new().field(FieldDescriptor::string("name").required()))
            .unwrap();

        let set = compose(&registry.freeze(), &bloks(&["b1", "b2"])).unwrap();
        let x = set.entity("Model.X").unwrap();
        let names: Vec<&str> = x.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "notes"]);
        assert!(!x.field("name").unwrap().nullable);
    }

    #[test]
    fn test_method_chain_with_super() {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("b1").unwrap();
        registry
            .declare(
                "Model",
                "Model.X",
                ClassBody::new()
                    .field(FieldDescriptor::integer("id").primary_key())
                    .method("greet", method(|_, _| Ok(json!("b1")))),
            )
            .unwrap();
        registry.init_blok("b2").unwrap();
        registry
            .declare(
                "Model",
                "Model.X",
                ClassBody::new().method(
                    "greet",
                    method(|call, args| {
                        let base = call.call_super(args)?;
                        Ok(json!(format!("b2+{}", base.as_str().unwrap_or_default())))
                    }),
                ),
            )
            .unwrap();

        let set = compose(&registry.freeze(), &bloks(&["b1", "b2"])).unwrap();
        let x = set.entity("Model.X").unwrap();
        assert_eq!(x.invoke("greet", json!(null)).unwrap(), json!("b2+b1"));
    }

    #[test]
    fn test_core_bases_come_last() {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("core").unwrap();
        registry
            .add_core("Base", ClassBody::new().method("describe", method(|call, _| Ok(json!(call.path().to_string())))))
            .unwrap();
        registry
            .add_core("SqlBase", ClassBody::new().method("describe", method(|call, args| call.call_super(args))))
            .unwrap();
        registry
            .declare("Model", "Model.X", ClassBody::new().field(FieldDescriptor::integer("id").primary_key()))
            .unwrap();

        let set = compose(&registry.freeze(), &bloks(&["core"])).unwrap();
        let x = set.entity("Model.X").unwrap();
        assert_eq!(x.mro, vec!["Model.X@core", "Core.SqlBase@core", "Core.Base@core"]);
        assert_eq!(x.invoke("describe", json!(null)).unwrap(), json!("Model.X"));
    }

    #[test]
    fn test_mixin_fields_are_inherited() {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("b1").unwrap();
        registry
            .declare("Mixin", "Mixin.Named", ClassBody::new().field(FieldDescriptor::string("name")))
            .unwrap();
        registry
            .declare(
                "Model",
                "Model.X",
                ClassBody::new()
                    .inherit("Mixin.Named")
                    .field(FieldDescriptor::integer("id").primary_key()),
            )
            .unwrap();

        let set = compose(&registry.freeze(), &bloks(&["b1"])).unwrap();
        let x = set.entity("Model.X").unwrap();
        let names: Vec<&str> = x.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name", "id"]);
        assert!(set.group("Mixin").unwrap().get("Mixin.Named").unwrap().table.is_none());
    }

    #[test]
    fn test_missing_mixin() {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("b1").unwrap();
        registry
            .declare(
                "Model",
                "Model.X",
                ClassBody::new()
                    .inherit("Mixin.Missing")
                    .field(FieldDescriptor::integer("id").primary_key()),
            )
            .unwrap();

        let err = compose(&registry.freeze(), &bloks(&["b1"])).unwrap_err();
        match err {
            CompositionError::MixinNotFound { blok, path, mixin } => {
                assert_eq!(blok, "b1");
                assert_eq!(path, "Model.X");
                assert_eq!(mixin, "Mixin.Missing");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_self_inheritance_is_a_cycle() {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("b1").unwrap();
        registry
            .declare("Mixin", "Mixin.A", ClassBody::new().inherit("Mixin.B"))
            .unwrap();
        registry
            .declare("Mixin", "Mixin.B", ClassBody::new().inherit("Mixin.A"))
            .unwrap();

        let err = compose(&registry.freeze(), &bloks(&["b1"])).unwrap_err();
        assert!(matches!(err, CompositionError::Cycle { .. }), "{err:?}");
    }

    #[test]
    fn test_must_be_loaded_entry_always_present() {
        let mut registry = DeclarationRegistry::new();
        registry.declare_entry("Other", true, None).unwrap();
        registry.declare_entry("Optional", false, None).unwrap();
        registry.init_blok("b1").unwrap();

        let set = compose(&registry.freeze(), &bloks(&["b1"])).unwrap();
        assert!(set.group("Model").unwrap().is_empty());
        assert!(set.group("Other").unwrap().is_empty());
        assert!(set.group("Optional").is_none());
    }

    #[test]
    fn test_uninstalled_bloks_are_ignored() {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("b1").unwrap();
        registry
            .declare("Model", "Model.X", ClassBody::new().field(FieldDescriptor::integer("id").primary_key()))
            .unwrap();
        registry.init_blok("b2").unwrap();
        registry
            .declare("Model", "Model.X", ClassBody::new().field(FieldDescriptor::string("extra")))
            .unwrap();

        let set = compose(&registry.freeze(), &bloks(&["b1"])).unwrap();
        assert!(!set.entity("Model.X").unwrap().has_field("extra"));
    }

    #[test]
    fn test_unknown_foreign_key_model() {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("b1").unwrap();
        registry
            .declare(
                "Model",
                "Model.X",
                ClassBody::new()
                    .field(FieldDescriptor::integer("id").primary_key())
                    .field(FieldDescriptor::integer("y_id").foreign_key("Model.Y", "id")),
            )
            .unwrap();

        let err = compose(&registry.freeze(), &bloks(&["b1"])).unwrap_err();
        match err {
            CompositionError::UnknownModel { reference, path, .. } => {
                assert_eq!(reference, "Model.Y");
                assert_eq!(path, "Model.X");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_entry_callback_runs_and_can_fail() {
        let mut registry = DeclarationRegistry::new();
        registry
            .declare_entry(
                "Other",
                true,
                Some(Arc::new(|group: &mut EntityGroup| {
                    if group.is_empty() {
                        Err("nothing declared".to_string())
                    } else {
                        Ok(())
                    }
                })),
            )
            .unwrap();
        registry.init_blok("b1").unwrap();

        let err = compose(&registry.freeze(), &bloks(&["b1"])).unwrap_err();
        assert!(matches!(err, CompositionError::Callback { ref entry, .. } if entry == "Other"));
    }

    #[test]
    fn test_session_is_composed() {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("b1").unwrap();
        registry
            .add_core("Session", ClassBody::new().method("ping", method(|_, _| Ok(json!("pong")))))
            .unwrap();

        let set = compose(&registry.freeze(), &bloks(&["b1"])).unwrap();
        assert_eq!(set.session.invoke("ping", json!(null)).unwrap(), json!("pong"));
    }
}
