//! Entity-set validation
//!
//! Checks a composed [`EntitySet`] before it is materialized: primary keys,
//! foreign key targets, table name uniqueness and member name clashes.
//! Produces a [`ValidationReport`] of errors and non-fatal warnings.

use std::collections::{HashMap, HashSet};
use std::fmt;

use super::{EntitySet, SynthesizedEntity};

// ── Result types ────────────────────────────────────────────────────────────

/// A single finding with optional location and suggestion.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Registry path the problem was found on (if applicable).
    pub path: Option<String>,
    /// Blok responsible for the offending member.
    pub blok: Option<String>,
    /// Human-readable description.
    pub message: String,
    /// Optional suggestion for how to fix it.
    pub suggestion: Option<String>,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "{}: ", path)?;
        }
        f.write_str(&self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

/// Overall validation result.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn add_error(
        &mut self,
        entity: Option<&SynthesizedEntity>,
        member: Option<&str>,
        message: impl Into<String>,
        suggestion: Option<&str>,
    ) {
        self.valid = false;
        self.errors.push(issue(entity, member, message, suggestion));
    }

    fn add_warning(
        &mut self,
        entity: Option<&SynthesizedEntity>,
        member: Option<&str>,
        message: impl Into<String>,
        suggestion: Option<&str>,
    ) {
        self.warnings.push(issue(entity, member, message, suggestion));
    }

    /// Merge another report into this one.
    fn merge(&mut self, other: ValidationReport) {
        if !other.valid {
            self.valid = false;
        }
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

fn issue(
    entity: Option<&SynthesizedEntity>,
    member: Option<&str>,
    message: impl Into<String>,
    suggestion: Option<&str>,
) -> ValidationIssue {
    ValidationIssue {
        path: entity.map(|e| e.path.to_string()),
        blok: entity.map(|e| e.blame(member)),
        message: message.into(),
        suggestion: suggestion.map(|s| s.to_string()),
    }
}

// ── Validator ───────────────────────────────────────────────────────────────

/// Validates a composed entity set.
pub struct EntitySetValidator;

impl EntitySetValidator {
    /// Run every validation check against the given set.
    pub fn validate(set: &EntitySet) -> ValidationReport {
        let mut result = ValidationReport::ok();

        result.merge(Self::check_primary_keys(set));
        result.merge(Self::check_foreign_key_targets(set));
        result.merge(Self::check_unique_tables(set));
        result.merge(Self::check_member_names(set));

        result
    }

    // ── Individual checks ───────────────────────────────────────────────

    /// Every table-backed model needs a primary key.
    fn check_primary_keys(set: &EntitySet) -> ValidationReport {
        let mut result = ValidationReport::ok();
        for entity in set.models() {
            if entity.primary_keys().is_empty() {
                result.add_error(
                    Some(entity),
                    None,
                    "model has no primary key",
                    Some("Mark at least one field with primary_key()"),
                );
            }
        }
        result
    }

    /// Foreign keys must target an existing field; mismatched types are
    /// reported as warnings.
    fn check_foreign_key_targets(set: &EntitySet) -> ValidationReport {
        let mut result = ValidationReport::ok();
        for entity in set.models() {
            for field in &entity.fields {
                let Some(fk) = &field.foreign_key else {
                    continue;
                };
                let Some(target) = set.model(fk.model.as_str()) else {
                    result.add_error(
                        Some(entity),
                        Some(&field.name),
                        format!("foreign key {} targets unknown model {}", field.name, fk.model),
                        None,
                    );
                    continue;
                };
                match target.field(&fk.field) {
                    None => result.add_error(
                        Some(entity),
                        Some(&field.name),
                        format!("foreign key {} targets unknown field {}.{}", field.name, fk.model, fk.field),
                        Some("Check the remote field name"),
                    ),
                    Some(remote) if remote.field_type != field.field_type => result.add_warning(
                        Some(entity),
                        Some(&field.name),
                        format!(
                            "foreign key {} is {} but {}.{} is {}",
                            field.name, field.field_type, fk.model, fk.field, remote.field_type
                        ),
                        None,
                    ),
                    Some(_) => {}
                }
            }
        }
        result
    }

    /// Two models cannot share a table, nor use an association table's name.
    fn check_unique_tables(set: &EntitySet) -> ValidationReport {
        let mut result = ValidationReport::ok();
        let mut owners: HashMap<&str, &SynthesizedEntity> = HashMap::new();
        for entity in set.models() {
            let Some(table) = entity.table.as_deref() else {
                continue;
            };
            if let Some(first) = owners.insert(table, entity) {
                result.add_error(
                    Some(entity),
                    None,
                    format!("table {} is already used by {}", table, first.path),
                    Some("Set an explicit table name"),
                );
            }
        }
        for association in &set.associations {
            if let Some(model) = owners.get(association.table.as_str()) {
                result.add_error(
                    Some(*model),
                    None,
                    format!("table {} is also a Many2Many association table", association.table),
                    Some("Set an explicit join table"),
                );
            }
        }
        result
    }

    /// Relationship names must not clash with field names.
    fn check_member_names(set: &EntitySet) -> ValidationReport {
        let mut result = ValidationReport::ok();
        for group in &set.groups {
            for entity in &group.entities {
                let fields: HashSet<&str> = entity.fields.iter().map(|f| f.name.as_str()).collect();
                for rel in &entity.declared_relationships {
                    if fields.contains(rel.name.as_str()) {
                        result.add_error(
                            Some(entity),
                            Some(&rel.name),
                            format!("relationship {} has the same name as a field", rel.name),
                            None,
                        );
                    }
                }
            }
        }
        result
    }
}
