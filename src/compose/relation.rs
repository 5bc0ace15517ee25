//! Relationship synthesis
//!
//! Resolves every declared relationship of the table-backed models into a
//! concrete join. Many2One relationships go first so the foreign key columns
//! they synthesize are visible when One2Many joins are detected; Many2Many
//! relationships come last and produce association tables.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CompositionError, EntitySet, SynthesizedEntity};
use crate::core::relationship::JoinPair;
use crate::core::{EntryKind, FieldDescriptor, RegistryPath, RelationshipDescriptor, RelationshipKind};

/// Association table backing a Many2Many relationship
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
    pub table: String,
    pub local_model: RegistryPath,
    pub remote_model: RegistryPath,
    /// Local entity column -> association column
    pub local: Vec<JoinPair>,
    /// Remote entity column -> association column
    pub remote: Vec<JoinPair>,
    /// Association columns, all part of its primary key
    pub columns: Vec<FieldDescriptor>,
}

impl Association {
    /// The same table seen from the other side
    pub fn swapped(&self) -> Self {
        Self {
            table: self.table.clone(),
            local_model: self.remote_model.clone(),
            remote_model: self.local_model.clone(),
            local: self.remote.clone(),
            remote: self.local.clone(),
            columns: self.columns.clone(),
        }
    }

    fn column_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Relationship with its join resolved
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRelationship {
    pub name: String,
    pub kind: RelationshipKind,
    pub remote: RegistryPath,
    /// `local` names a column of the owning entity, `remote` one of the
    /// remote entity. Empty for Many2Many.
    pub join: Vec<JoinPair>,
    /// Many2Many only
    pub association: Option<Association>,
    pub inverse: Option<String>,
    pub nullable: bool,
    pub label: Option<String>,
    /// Blok that declared it (or declared its partner, when synthesized)
    pub blok: String,
    /// Created as the inverse of another relationship
    pub synthesized: bool,
}

impl ResolvedRelationship {
    /// Human readable join, e.g. `address.id == person.address_id`
    pub fn join_description(&self, local_table: &str, remote_table: &str) -> String {
        let parts: Vec<String> = match &self.association {
            Some(a) => a
                .local
                .iter()
                .map(|p| format!("{}.{} == {}.{}", local_table, p.local, a.table, p.remote))
                .chain(
                    a.remote
                        .iter()
                        .map(|p| format!("{}.{} == {}.{}", remote_table, p.local, a.table, p.remote)),
                )
                .collect(),
            None => self
                .join
                .iter()
                .map(|p| format!("{}.{} == {}.{}", remote_table, p.remote, local_table, p.local))
                .collect(),
        };
        parts.join(" AND ")
    }

    /// The paired accessor living on the remote entity
    fn mirrored(&self, owner: &RegistryPath, name: &str) -> Self {
        let kind = match self.kind {
            RelationshipKind::Many2One => RelationshipKind::One2Many,
            RelationshipKind::One2Many => RelationshipKind::Many2One,
            RelationshipKind::Many2Many => RelationshipKind::Many2Many,
        };
        Self {
            name: name.to_string(),
            kind,
            remote: owner.clone(),
            join: self
                .join
                .iter()
                .map(|p| JoinPair {
                    local: p.remote.clone(),
                    remote: p.local.clone(),
                })
                .collect(),
            association: self.association.as_ref().map(Association::swapped),
            inverse: Some(self.name.clone()),
            nullable: true,
            label: None,
            blok: self.blok.clone(),
            synthesized: true,
        }
    }
}

/// Resolve the declared relationships of every table-backed model
pub(crate) fn synthesize(set: &mut EntitySet) -> Result<(), CompositionError> {
    let mut work: Vec<(RegistryPath, RelationshipDescriptor)> = Vec::new();
    for kind in [
        RelationshipKind::Many2One,
        RelationshipKind::One2Many,
        RelationshipKind::Many2Many,
    ] {
        for group in set.groups.iter().filter(|g| g.kind == EntryKind::Model) {
            for entity in &group.entities {
                for rel in entity.declared_relationships.iter().filter(|r| r.kind == kind) {
                    work.push((entity.path.clone(), rel.clone()));
                }
            }
        }
    }

    for (path, desc) in &work {
        match desc.kind {
            RelationshipKind::Many2One => many2one(set, path, desc)?,
            RelationshipKind::One2Many => one2many(set, path, desc)?,
            RelationshipKind::Many2Many => many2many(set, path, desc)?,
        }
        debug!(
            target: "registry::compose",
            path = %path,
            relationship = %desc.name,
            kind = %desc.kind,
            remote = %desc.model,
            "Relationship resolved"
        );
    }
    Ok(())
}

// ── Lookups and error helpers ───────────────────────────────────────────────

fn invalid_join(owner: &SynthesizedEntity, desc: &RelationshipDescriptor, reason: impl Into<String>) -> CompositionError {
    CompositionError::InvalidJoin {
        blok: owner.blame(Some(&desc.name)),
        path: owner.path.to_string(),
        relationship: desc.name.clone(),
        reason: reason.into(),
    }
}

/// The owning entity, which must be backed by a table
fn owner<'s>(
    set: &'s EntitySet,
    path: &RegistryPath,
    desc: &RelationshipDescriptor,
) -> Result<&'s SynthesizedEntity, CompositionError> {
    let entity = set.entity(path.as_str()).ok_or_else(|| CompositionError::UnknownModel {
        blok: String::new(),
        path: path.to_string(),
        reference: path.to_string(),
    })?;
    if !entity.is_table() {
        return Err(invalid_join(entity, desc, "relationships need a model with fields"));
    }
    Ok(entity)
}

fn remote<'s>(
    set: &'s EntitySet,
    owner: &SynthesizedEntity,
    desc: &RelationshipDescriptor,
) -> Result<&'s SynthesizedEntity, CompositionError> {
    set.model(desc.model.as_str())
        .ok_or_else(|| CompositionError::UnknownModel {
            blok: owner.blame(Some(&desc.name)),
            path: owner.path.to_string(),
            reference: desc.model.to_string(),
        })
}

/// Whether `field` is a foreign key to `target.column`
fn references(field: &FieldDescriptor, target: &RegistryPath, column: &str) -> bool {
    field
        .foreign_key
        .as_ref()
        .map(|fk| fk.model.as_str() == target.as_str() && fk.field == column)
        .unwrap_or(false)
}

fn pair(local: &str, remote: &str) -> JoinPair {
    JoinPair {
        local: local.to_string(),
        remote: remote.to_string(),
    }
}

fn attach(
    set: &mut EntitySet,
    path: &RegistryPath,
    resolved: ResolvedRelationship,
    columns: Vec<FieldDescriptor>,
) {
    if let Some(entity) = set.entity_mut(path.as_str()) {
        for column in columns {
            entity.origins.insert(column.name.clone(), resolved.blok.clone());
            entity.fields.push(column);
        }
        entity.origins.insert(resolved.name.clone(), resolved.blok.clone());
        entity.relationships.push(resolved);
    }
}

/// Synthesize the inverse accessor on `holder`, or check the one already there
fn ensure_inverse(
    set: &mut EntitySet,
    holder: &RegistryPath,
    candidate: ResolvedRelationship,
    source: &RegistryPath,
    desc: &RelationshipDescriptor,
) -> Result<(), CompositionError> {
    let fail = |reason: String| CompositionError::InconsistentInverse {
        blok: candidate.blok.clone(),
        path: source.to_string(),
        relationship: desc.name.clone(),
        inverse: candidate.name.clone(),
        reason,
    };

    let Some(entity) = set.entity(holder.as_str()) else {
        return Err(fail(format!("{} is not composed", holder)));
    };
    if entity.has_field(&candidate.name) {
        return Err(fail(format!("{} already has a field with that name", holder)));
    }

    let declared = entity
        .declared_relationships
        .iter()
        .find(|r| r.name == candidate.name);
    if let Some(declared) = declared {
        if declared.kind != candidate.kind {
            return Err(fail(format!(
                "declared as {} on {}, expected {}",
                declared.kind, holder, candidate.kind
            )));
        }
        if declared.model.as_str() != candidate.remote.as_str() {
            return Err(fail(format!(
                "points at {} instead of {}",
                declared.model, candidate.remote
            )));
        }
    }

    if let Some(existing) = entity.relationship(&candidate.name) {
        if existing.kind != candidate.kind || existing.remote != candidate.remote {
            return Err(fail(format!(
                "{} {} on {} does not pair with {}",
                existing.kind, existing.name, holder, source
            )));
        }
        if existing.join != candidate.join {
            return Err(fail("joins on different columns".to_string()));
        }
        let tables = (
            existing.association.as_ref().map(|a| a.table.as_str()),
            candidate.association.as_ref().map(|a| a.table.as_str()),
        );
        if tables.0 != tables.1 {
            return Err(fail("uses a different association table".to_string()));
        }
        return Ok(());
    }

    // a declared partner is resolved on its own turn
    if declared.is_none() {
        attach(set, holder, candidate, Vec::new());
    }
    Ok(())
}

// ── Many2One ────────────────────────────────────────────────────────────────

fn foreign_key_column(
    name: &str,
    target: &FieldDescriptor,
    remote: &RegistryPath,
    desc: &RelationshipDescriptor,
) -> FieldDescriptor {
    let mut column = FieldDescriptor::new(name, target.field_type)
        .with_nullable(desc.nullable)
        .foreign_key(remote, target.name.clone());
    if let Some(label) = &desc.label {
        column = column.with_label(label.clone());
    }
    column
}

fn many2one(set: &mut EntitySet, path: &RegistryPath, desc: &RelationshipDescriptor) -> Result<(), CompositionError> {
    let (resolved, columns) = {
        let owner = owner(set, path, desc)?;
        let remote = remote(set, owner, desc)?;
        let keys = remote.primary_keys();
        if keys.is_empty() {
            return Err(invalid_join(owner, desc, format!("{} has no primary key", remote.path)));
        }

        let mut join = Vec::new();
        let mut columns = Vec::new();

        if !desc.join.is_empty() {
            for p in &desc.join {
                if !owner.has_field(&p.local) {
                    return Err(invalid_join(owner, desc, format!("unknown column {}.{}", owner.path, p.local)));
                }
                if !remote.has_field(&p.remote) {
                    return Err(invalid_join(owner, desc, format!("unknown column {}.{}", remote.path, p.remote)));
                }
            }
            join = desc.join.clone();
        } else if !desc.local_columns.is_empty() {
            if desc.local_columns.len() != keys.len() {
                return Err(invalid_join(
                    owner,
                    desc,
                    format!(
                        "{} local columns for {} primary key columns of {}",
                        desc.local_columns.len(),
                        keys.len(),
                        remote.path
                    ),
                ));
            }
            for (column, key) in desc.local_columns.iter().zip(&keys) {
                match owner.field(column) {
                    Some(existing) if existing.foreign_key.is_some() && !references(existing, &remote.path, &key.name) => {
                        return Err(invalid_join(
                            owner,
                            desc,
                            format!("{} does not reference {}.{}", column, remote.path, key.name),
                        ));
                    }
                    Some(_) => {}
                    None => columns.push(foreign_key_column(column, key, &remote.path, desc)),
                }
                join.push(pair(column, &key.name));
            }
        } else {
            let mut missing = 0;
            for key in &keys {
                let candidates: Vec<String> = owner
                    .fields
                    .iter()
                    .filter(|f| references(f, &remote.path, &key.name))
                    .map(|f| f.name.clone())
                    .collect();
                match candidates.len() {
                    0 => missing += 1,
                    1 => join.push(pair(&candidates[0], &key.name)),
                    _ => {
                        return Err(CompositionError::AmbiguousForeignKey {
                            blok: owner.blame(Some(&desc.name)),
                            path: owner.path.to_string(),
                            relationship: desc.name.clone(),
                            remote: remote.path.to_string(),
                            candidates,
                        })
                    }
                }
            }

            if missing == keys.len() {
                for key in &keys {
                    let name = format!("{}_{}", desc.name, key.name);
                    if owner.has_field(&name) {
                        return Err(invalid_join(
                            owner,
                            desc,
                            format!("column {} exists but is not a foreign key to {}", name, remote.path),
                        ));
                    }
                    columns.push(foreign_key_column(&name, key, &remote.path, desc));
                    join.push(pair(&name, &key.name));
                }
            } else if missing > 0 {
                return Err(invalid_join(
                    owner,
                    desc,
                    format!("foreign keys cover only part of the primary key of {}", remote.path),
                ));
            }
        }

        let resolved = ResolvedRelationship {
            name: desc.name.clone(),
            kind: RelationshipKind::Many2One,
            remote: remote.path.clone(),
            join,
            association: None,
            inverse: desc.inverse.clone(),
            nullable: desc.nullable,
            label: desc.label.clone(),
            blok: owner.blame(Some(&desc.name)),
            synthesized: false,
        };
        (resolved, columns)
    };

    let remote_path = resolved.remote.clone();
    let inverse = desc.inverse.as_deref().map(|name| resolved.mirrored(path, name));
    attach(set, path, resolved, columns);
    if let Some(candidate) = inverse {
        ensure_inverse(set, &remote_path, candidate, path, desc)?;
    }
    Ok(())
}

// ── One2Many ────────────────────────────────────────────────────────────────

fn one2many(set: &mut EntitySet, path: &RegistryPath, desc: &RelationshipDescriptor) -> Result<(), CompositionError> {
    let resolved = {
        let owner = owner(set, path, desc)?;
        let remote = remote(set, owner, desc)?;

        let join = if !desc.join.is_empty() {
            desc.join.clone()
        } else if !desc.remote_columns.is_empty() {
            let mut join = Vec::new();
            for column in &desc.remote_columns {
                let field = remote
                    .field(column)
                    .ok_or_else(|| invalid_join(owner, desc, format!("unknown column {}.{}", remote.path, column)))?;
                let target = field
                    .foreign_key
                    .as_ref()
                    .filter(|fk| fk.model.as_str() == owner.path.as_str())
                    .ok_or_else(|| {
                        invalid_join(owner, desc, format!("{}.{} does not reference {}", remote.path, column, owner.path))
                    })?;
                join.push(pair(&target.field, column));
            }
            join
        } else {
            detect_join(owner, remote, desc)?
        };

        for p in &join {
            if !owner.has_field(&p.local) {
                return Err(invalid_join(owner, desc, format!("unknown column {}.{}", owner.path, p.local)));
            }
            if !remote.has_field(&p.remote) {
                return Err(invalid_join(owner, desc, format!("unknown column {}.{}", remote.path, p.remote)));
            }
        }

        ResolvedRelationship {
            name: desc.name.clone(),
            kind: RelationshipKind::One2Many,
            remote: remote.path.clone(),
            join,
            association: None,
            inverse: desc.inverse.clone(),
            nullable: true,
            label: desc.label.clone(),
            blok: owner.blame(Some(&desc.name)),
            synthesized: false,
        }
    };

    let remote_path = resolved.remote.clone();
    let inverse = desc.inverse.as_deref().map(|name| resolved.mirrored(path, name));
    attach(set, path, resolved, Vec::new());
    if let Some(candidate) = inverse {
        ensure_inverse(set, &remote_path, candidate, path, desc)?;
    }
    Ok(())
}

/// Find the foreign keys on `remote` pointing at `owner`.
///
/// Candidates are grouped by the owner column they target. The join is
/// unambiguous when every group holds one column and, with several groups,
/// the groups cover exactly the owner's primary key.
fn detect_join(
    owner: &SynthesizedEntity,
    remote: &SynthesizedEntity,
    desc: &RelationshipDescriptor,
) -> Result<Vec<JoinPair>, CompositionError> {
    let candidates: Vec<&FieldDescriptor> = remote
        .fields
        .iter()
        .filter(|f| {
            f.foreign_key
                .as_ref()
                .map(|fk| fk.model.as_str() == owner.path.as_str())
                .unwrap_or(false)
        })
        .collect();

    if candidates.is_empty() {
        return Err(CompositionError::NoForeignKey {
            blok: owner.blame(Some(&desc.name)),
            path: owner.path.to_string(),
            relationship: desc.name.clone(),
            remote: remote.path.to_string(),
        });
    }

    let ambiguous = || CompositionError::AmbiguousForeignKey {
        blok: owner.blame(Some(&desc.name)),
        path: owner.path.to_string(),
        relationship: desc.name.clone(),
        remote: remote.path.to_string(),
        candidates: candidates.iter().map(|f| f.name.clone()).collect(),
    };

    let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
    for field in &candidates {
        let Some(fk) = &field.foreign_key else {
            continue;
        };
        match groups.iter_mut().find(|(target, _)| *target == fk.field) {
            Some((_, columns)) => columns.push(field.name.as_str()),
            None => groups.push((fk.field.as_str(), vec![field.name.as_str()])),
        }
    }

    if groups.iter().any(|(_, columns)| columns.len() > 1) {
        return Err(ambiguous());
    }
    if groups.len() > 1 {
        let keys: Vec<&str> = owner.primary_keys().iter().map(|f| f.name.as_str()).collect();
        let covers_key = groups.len() == keys.len() && groups.iter().all(|(target, _)| keys.contains(target));
        if !covers_key {
            return Err(ambiguous());
        }
    }

    // owner column order
    let mut join: Vec<JoinPair> = Vec::with_capacity(groups.len());
    for field in &owner.fields {
        if let Some((target, columns)) = groups.iter().find(|(target, _)| *target == field.name) {
            join.push(pair(target, columns[0]));
        }
    }
    if join.len() != groups.len() {
        return Err(invalid_join(owner, desc, "foreign key targets an unknown column"));
    }
    Ok(join)
}

// ── Many2Many ───────────────────────────────────────────────────────────────

fn association_column(name: &str, target: &FieldDescriptor, model: &RegistryPath) -> FieldDescriptor {
    FieldDescriptor::new(name, target.field_type)
        .primary_key()
        .with_autoincrement(false)
        .foreign_key(model, target.name.clone())
}

fn many2many(set: &mut EntitySet, path: &RegistryPath, desc: &RelationshipDescriptor) -> Result<(), CompositionError> {
    let resolved = {
        let owner = owner(set, path, desc)?;
        let remote = remote(set, owner, desc)?;
        let local_keys = owner.primary_keys();
        let remote_keys = remote.primary_keys();
        if local_keys.is_empty() || remote_keys.is_empty() {
            return Err(invalid_join(owner, desc, "both sides of a Many2Many need a primary key"));
        }

        let partner = desc
            .inverse
            .as_deref()
            .and_then(|name| remote.relationship(name))
            .filter(|r| r.kind == RelationshipKind::Many2Many && r.remote == owner.path)
            .and_then(|r| r.association.as_ref());

        let association = match partner {
            Some(existing) => existing.swapped(),
            None => {
                let local_table = owner.table.clone().unwrap_or_default();
                let remote_table = remote.table.clone().unwrap_or_default();
                let table = desc
                    .join_table
                    .clone()
                    .unwrap_or_else(|| format!("join_{}_and_{}", local_table, remote_table));

                let mut columns = Vec::new();
                let mut local = Vec::new();
                for key in &local_keys {
                    let column = format!("{}_{}", local_table, key.name);
                    columns.push(association_column(&column, key, &owner.path));
                    local.push(pair(&key.name, &column));
                }
                let mut remote_pairs = Vec::new();
                for key in &remote_keys {
                    let column = if owner.path == remote.path {
                        format!("{}_{}", desc.name, key.name)
                    } else {
                        format!("{}_{}", remote_table, key.name)
                    };
                    columns.push(association_column(&column, key, &remote.path));
                    remote_pairs.push(pair(&key.name, &column));
                }

                Association {
                    table,
                    local_model: owner.path.clone(),
                    remote_model: remote.path.clone(),
                    local,
                    remote: remote_pairs,
                    columns,
                }
            }
        };

        if let Some(existing) = set.association(&association.table) {
            if existing.column_names() != association.column_names() {
                return Err(invalid_join(
                    owner,
                    desc,
                    format!("association table {} is already used with other columns", association.table),
                ));
            }
        }

        ResolvedRelationship {
            name: desc.name.clone(),
            kind: RelationshipKind::Many2Many,
            remote: remote.path.clone(),
            join: Vec::new(),
            association: Some(association),
            inverse: desc.inverse.clone(),
            nullable: true,
            label: desc.label.clone(),
            blok: owner.blame(Some(&desc.name)),
            synthesized: false,
        }
    };

    if let Some(association) = &resolved.association {
        if set.association(&association.table).is_none() {
            set.associations.push(association.clone());
        }
    }

    let remote_path = resolved.remote.clone();
    let inverse = desc.inverse.as_deref().map(|name| resolved.mirrored(path, name));
    attach(set, path, resolved, Vec::new());
    if let Some(candidate) = inverse {
        ensure_inverse(set, &remote_path, candidate, path, desc)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::compose;
    use crate::core::{ClassBody, DeclarationRegistry};

    fn build(declare: impl FnOnce(&mut DeclarationRegistry)) -> Result<EntitySet, CompositionError> {
        let mut registry = DeclarationRegistry::new();
        registry.init_blok("test").unwrap();
        declare(&mut registry);
        compose(&registry.freeze(), &["test".to_string()])
    }

    fn address() -> ClassBody {
        ClassBody::new()
            .field(FieldDescriptor::integer("id").primary_key())
            .field(FieldDescriptor::string("street"))
    }

    #[test]
    fn test_many2one_detects_existing_column() {
        let set = build(|r| {
            r.declare("Model", "Model.Address", address()).unwrap();
            r.declare(
                "Model",
                "Model.Person",
                ClassBody::new()
                    .field(FieldDescriptor::integer("id").primary_key())
                    .field(FieldDescriptor::integer("address_id").foreign_key("Model.Address", "id"))
                    .relationship(RelationshipDescriptor::many2one("address", "Model.Address")),
            )
            .unwrap();
        })
        .unwrap();

        let person = set.entity("Model.Person").unwrap();
        let rel = person.relationship("address").unwrap();
        assert_eq!(rel.join, vec![pair("address_id", "id")]);
        assert_eq!(rel.join_description("person", "address"), "address.id == person.address_id");
        assert_eq!(person.fields.len(), 2);
    }

    #[test]
    fn test_many2one_synthesizes_column() {
        let set = build(|r| {
            r.declare("Model", "Model.Address", address()).unwrap();
            r.declare(
                "Model",
                "Model.Person",
                ClassBody::new()
                    .field(FieldDescriptor::integer("id").primary_key())
                    .relationship(RelationshipDescriptor::many2one("address", "Model.Address").required()),
            )
            .unwrap();
        })
        .unwrap();

        let person = set.entity("Model.Person").unwrap();
        let column = person.field("address_id").unwrap();
        assert!(!column.nullable);
        assert!(!column.autoincrement);
        assert!(references(column, &RegistryPath::parse("Model.Address").unwrap(), "id"));
    }

    #[test]
    fn test_many2one_inverse_synthesizes_one2many() {
        let set = build(|r| {
            r.declare("Model", "Model.Address", address()).unwrap();
            r.declare(
                "Model",
                "Model.Person",
                ClassBody::new()
                    .field(FieldDescriptor::integer("id").primary_key())
                    .relationship(RelationshipDescriptor::many2one("address", "Model.Address").inverse("persons")),
            )
            .unwrap();
        })
        .unwrap();

        let persons = set.entity("Model.Address").unwrap().relationship("persons").unwrap();
        assert_eq!(persons.kind, RelationshipKind::One2Many);
        assert!(persons.synthesized);
        assert_eq!(persons.join, vec![pair("id", "address_id")]);
    }

    #[test]
    fn test_one2many_ambiguous_lists_candidates() {
        let err = build(|r| {
            r.declare("Model", "Model.Address", address().relationship(RelationshipDescriptor::one2many("persons", "Model.Person")))
                .unwrap();
            r.declare(
                "Model",
                "Model.Person",
                ClassBody::new()
                    .field(FieldDescriptor::integer("id").primary_key())
                    .field(FieldDescriptor::integer("address_id").foreign_key("Model.Address", "id"))
                    .field(FieldDescriptor::integer("address2_id").foreign_key("Model.Address", "id")),
            )
            .unwrap();
        })
        .unwrap_err();

        match err {
            CompositionError::AmbiguousForeignKey { candidates, path, blok, .. } => {
                assert_eq!(candidates, vec!["address_id", "address2_id"]);
                assert_eq!(path, "Model.Address");
                assert_eq!(blok, "test");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_one2many_without_foreign_key() {
        let err = build(|r| {
            r.declare("Model", "Model.Address", address().relationship(RelationshipDescriptor::one2many("persons", "Model.Person")))
                .unwrap();
            r.declare("Model", "Model.Person", ClassBody::new().field(FieldDescriptor::integer("id").primary_key()))
                .unwrap();
        })
        .unwrap_err();
        assert!(matches!(err, CompositionError::NoForeignKey { .. }));
    }

    #[test]
    fn test_one2many_composite_key() {
        let set = build(|r| {
            r.declare(
                "Model",
                "Model.Test",
                ClassBody::new()
                    .field(FieldDescriptor::integer("id").primary_key())
                    .field(FieldDescriptor::string("code").primary_key())
                    .relationship(RelationshipDescriptor::one2many("lines", "Model.Line")),
            )
            .unwrap();
            r.declare(
                "Model",
                "Model.Line",
                ClassBody::new()
                    .field(FieldDescriptor::integer("id").primary_key())
                    .field(FieldDescriptor::integer("test_id").foreign_key("Model.Test", "id"))
                    .field(FieldDescriptor::string("test_code").foreign_key("Model.Test", "code")),
            )
            .unwrap();
        })
        .unwrap();

        let lines = set.entity("Model.Test").unwrap().relationship("lines").unwrap();
        assert_eq!(lines.join, vec![pair("id", "test_id"), pair("code", "test_code")]);
    }

    #[test]
    fn test_inconsistent_inverse() {
        let err = build(|r| {
            r.declare("Model", "Model.Address", address()).unwrap();
            r.declare(
                "Model",
                "Model.Person",
                ClassBody::new()
                    .field(FieldDescriptor::integer("id").primary_key())
                    .relationship(RelationshipDescriptor::many2one("address", "Model.Address").inverse("street")),
            )
            .unwrap();
        })
        .unwrap_err();
        assert!(matches!(err, CompositionError::InconsistentInverse { ref inverse, .. } if inverse == "street"));
    }

    #[test]
    fn test_many2many_association_table() {
        let set = build(|r| {
            r.declare("Model", "Model.Address", address()).unwrap();
            r.declare(
                "Model",
                "Model.Person",
                ClassBody::new()
                    .field(FieldDescriptor::integer("id").primary_key())
                    .relationship(RelationshipDescriptor::many2many("addresses", "Model.Address").inverse("persons")),
            )
            .unwrap();
        })
        .unwrap();

        let association = set.association("join_person_and_address").unwrap();
        let names: Vec<&str> = association.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["person_id", "address_id"]);
        assert!(association.columns.iter().all(|c| c.primary_key && !c.autoincrement));

        let persons = set.entity("Model.Address").unwrap().relationship("persons").unwrap();
        assert_eq!(persons.kind, RelationshipKind::Many2Many);
        let swapped = persons.association.as_ref().unwrap();
        assert_eq!(swapped.local, vec![pair("id", "address_id")]);
    }
}
