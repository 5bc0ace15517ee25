//! Schema Differ
//!
//! Reconciles a composed [`EntitySet`] with the live schema of a backend and
//! with the persisted System metadata rows. Planning is pure: it reads the
//! backend and produces a [`SchemaDiff`]. Applying a diff issues the DDL
//! first, then the metadata writes. Running the differ twice with unchanged
//! declarations plans nothing the second time.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, info};

use super::backend::{Backend, BackendError, ColumnInfo, DdlOp, Record};
use super::system::{
    read_rows, AttributeChange, SystemColumn, SystemModel, SystemRelationship, COLUMN_TABLE, MODEL_TABLE,
    RELATIONSHIP_TABLE,
};
use super::SchemaSyncError;
use crate::compose::{EntitySet, SynthesizedEntity};
use crate::core::FieldDescriptor;

/// Which differences the differ acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffMode {
    /// Create missing tables, columns and metadata rows only
    AddOnly,
    /// Also overwrite attributes that changed
    AddAlter,
}

impl DiffMode {
    fn alters(self) -> bool {
        matches!(self, DiffMode::AddAlter)
    }
}

/// One schema-definition operation attributed to an entity
#[derive(Debug, Clone, PartialEq)]
pub struct DdlStep {
    pub path: String,
    pub blok: String,
    pub op: DdlOp,
}

/// A write to the System metadata tables
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataChange {
    AddModel(SystemModel),
    AlterModel {
        name: String,
        changes: Vec<AttributeChange>,
    },
    AddColumn(SystemColumn),
    AlterColumn {
        model: String,
        name: String,
        changes: Vec<AttributeChange>,
    },
    AddRelationship(SystemRelationship),
    AlterRelationship {
        model: String,
        name: String,
        changes: Vec<AttributeChange>,
    },
}

impl fmt::Display for MetadataChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn attrs(changes: &[AttributeChange]) -> String {
            changes
                .iter()
                .map(|c| format!("{}: {} -> {}", c.attribute, c.persisted, c.declared))
                .collect::<Vec<_>>()
                .join(", ")
        }
        match self {
            MetadataChange::AddModel(row) => write!(f, "add model {}", row.name),
            MetadataChange::AlterModel { name, changes } => write!(f, "alter model {} ({})", name, attrs(changes)),
            MetadataChange::AddColumn(row) => write!(f, "add column {}", row.code),
            MetadataChange::AlterColumn { model, name, changes } => {
                write!(f, "alter column {}.{} ({})", model, name, attrs(changes))
            }
            MetadataChange::AddRelationship(row) => write!(f, "add relationship {}", row.code),
            MetadataChange::AlterRelationship { model, name, changes } => {
                write!(f, "alter relationship {}.{} ({})", model, name, attrs(changes))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataStep {
    pub path: String,
    pub blok: String,
    pub change: MetadataChange,
}

/// Ordered changes needed to bring a backend in line with an entity set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDiff {
    pub ddl: Vec<DdlStep>,
    pub metadata: Vec<MetadataStep>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.ddl.is_empty() && self.metadata.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ddl.len() + self.metadata.len()
    }

    /// One line per planned change
    pub fn describe(&self) -> Vec<String> {
        self.ddl
            .iter()
            .map(|s| format!("{}: {}", s.path, s.op))
            .chain(self.metadata.iter().map(|s| format!("{}: {}", s.path, s.change)))
            .collect()
    }

    /// First entity the diff touches, with the blok to blame
    pub fn first_offender(&self) -> Option<(&str, &str)> {
        self.ddl
            .first()
            .map(|s| (s.path.as_str(), s.blok.as_str()))
            .or_else(|| self.metadata.first().map(|s| (s.path.as_str(), s.blok.as_str())))
    }
}

/// Writes performed by [`SchemaDiffer::apply`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub ddl: usize,
    pub inserted: usize,
    pub updated: usize,
}

impl SyncReport {
    /// Total number of writes
    pub fn writes(&self) -> usize {
        self.ddl + self.inserted + self.updated
    }
}

/// Persisted metadata indexed by model (and member) name
#[derive(Default)]
struct Persisted {
    models: HashMap<String, SystemModel>,
    columns: HashMap<(String, String), SystemColumn>,
    relationships: HashMap<(String, String), SystemRelationship>,
}

impl Persisted {
    fn read(backend: &dyn Backend) -> Result<Self, BackendError> {
        Ok(Self {
            models: read_rows::<SystemModel>(backend, MODEL_TABLE)?
                .into_iter()
                .map(|m| (m.name.clone(), m))
                .collect(),
            columns: read_rows::<SystemColumn>(backend, COLUMN_TABLE)?
                .into_iter()
                .map(|c| ((c.model.clone(), c.name.clone()), c))
                .collect(),
            relationships: read_rows::<SystemRelationship>(backend, RELATIONSHIP_TABLE)?
                .into_iter()
                .map(|r| ((r.model.clone(), r.name.clone()), r))
                .collect(),
        })
    }
}

/// Schema Differ for one entity set and one backend
pub struct SchemaDiffer<'a> {
    set: &'a EntitySet,
    backend: &'a dyn Backend,
}

impl<'a> SchemaDiffer<'a> {
    pub fn new(set: &'a EntitySet, backend: &'a dyn Backend) -> Self {
        Self { set, backend }
    }

    /// Compute the changes `mode` allows, without writing anything
    pub fn plan(&self, mode: DiffMode) -> Result<SchemaDiff, SchemaSyncError> {
        let persisted = Persisted::read(self.backend).map_err(|source| match source {
            BackendError::Serialization(reason) => SchemaSyncError::Corrupt {
                path: "Model.System".to_string(),
                reason,
            },
            source => persistence("", "Model.System", source),
        })?;

        let mut diff = SchemaDiff::default();
        for entity in self.set.models() {
            self.plan_entity(entity, mode, &persisted, &mut diff)?;
        }
        self.plan_associations(&mut diff);

        debug!(
            target: "registry::schema",
            mode = ?mode,
            ddl = diff.ddl.len(),
            metadata = diff.metadata.len(),
            "Schema diff planned"
        );
        Ok(diff)
    }

    /// Execute a planned diff: DDL first, then metadata writes in order
    pub fn apply(&self, diff: &SchemaDiff) -> Result<SyncReport, SchemaSyncError> {
        let mut report = SyncReport::default();

        for step in &diff.ddl {
            self.backend
                .execute_ddl(&step.op)
                .map_err(|source| persistence(&step.blok, &step.path, source))?;
            debug!(target: "registry::schema", path = %step.path, op = %step.op, "DDL applied");
            report.ddl += 1;
        }

        for step in &diff.metadata {
            let fail = |source: BackendError| persistence(&step.blok, &step.path, source);
            match &step.change {
                MetadataChange::AddModel(row) => {
                    self.backend
                        .insert(MODEL_TABLE, Record::from_serializable(row).map_err(|e| fail(e.into()))?)
                        .map_err(fail)?;
                    report.inserted += 1;
                }
                MetadataChange::AddColumn(row) => {
                    self.backend
                        .insert(COLUMN_TABLE, Record::from_serializable(row).map_err(|e| fail(e.into()))?)
                        .map_err(fail)?;
                    report.inserted += 1;
                }
                MetadataChange::AddRelationship(row) => {
                    self.backend
                        .insert(RELATIONSHIP_TABLE, Record::from_serializable(row).map_err(|e| fail(e.into()))?)
                        .map_err(fail)?;
                    report.inserted += 1;
                }
                MetadataChange::AlterModel { name, changes } => {
                    let filter = Record::new().with("name", name.as_str());
                    report.updated += self.update_one(MODEL_TABLE, &filter, changes).map_err(fail)?;
                }
                MetadataChange::AlterColumn { model, name, changes } => {
                    let filter = Record::new().with("model", model.as_str()).with("name", name.as_str());
                    report.updated += self.update_one(COLUMN_TABLE, &filter, changes).map_err(fail)?;
                }
                MetadataChange::AlterRelationship { model, name, changes } => {
                    let filter = Record::new().with("model", model.as_str()).with("name", name.as_str());
                    report.updated += self.update_one(RELATIONSHIP_TABLE, &filter, changes).map_err(fail)?;
                }
            }
        }

        info!(
            target: "registry::schema",
            backend = self.backend.name(),
            ddl = report.ddl,
            inserted = report.inserted,
            updated = report.updated,
            "Schema synchronized"
        );
        Ok(report)
    }

    /// Plan then apply
    pub fn sync(&self, mode: DiffMode) -> Result<SyncReport, SchemaSyncError> {
        let diff = self.plan(mode)?;
        self.apply(&diff)
    }

    fn update_one(&self, table: &str, filter: &Record, changes: &[AttributeChange]) -> Result<usize, BackendError> {
        self.backend.update(table, filter, &AttributeChange::to_record(changes))
    }

    // ── Planning ────────────────────────────────────────────────────────

    fn foreign_key_code(&self, field: &FieldDescriptor) -> Option<String> {
        let fk = field.foreign_key.as_ref()?;
        let table = self.set.model(fk.model.as_str())?.table.as_deref()?;
        Some(format!("{}.{}", table, fk.field))
    }

    fn plan_entity(
        &self,
        entity: &SynthesizedEntity,
        mode: DiffMode,
        persisted: &Persisted,
        diff: &mut SchemaDiff,
    ) -> Result<(), SchemaSyncError> {
        let Some(table) = entity.table.as_deref() else {
            return Ok(());
        };
        let path = entity.path.to_string();
        let ddl_step = |member: Option<&str>, op: DdlOp| DdlStep {
            path: path.clone(),
            blok: entity.blame(member),
            op,
        };

        // Live schema
        if !self.backend.has_table(table) {
            let columns = entity
                .fields
                .iter()
                .map(|f| ColumnInfo::from_field(f, self.foreign_key_code(f)))
                .collect();
            diff.ddl.push(ddl_step(
                None,
                DdlOp::CreateTable {
                    table: table.to_string(),
                    columns,
                },
            ));
        } else {
            let live = self
                .backend
                .columns(table)
                .map_err(|source| persistence(&entity.blame(None), &path, source))?;
            for field in &entity.fields {
                let declared = ColumnInfo::from_field(field, self.foreign_key_code(field));
                match live.iter().find(|c| c.name == field.name) {
                    None => diff.ddl.push(ddl_step(
                        Some(&field.name),
                        DdlOp::AddColumn {
                            table: table.to_string(),
                            column: declared,
                        },
                    )),
                    Some(current) if mode.alters() => {
                        for op in live_alterations(table, &declared, current) {
                            diff.ddl.push(ddl_step(Some(&field.name), op));
                        }
                    }
                    Some(_) => {}
                }
            }
        }

        // Metadata: adds first, then alters, members in declaration order
        let mut adds = Vec::new();
        let mut alters = Vec::new();
        let step = |member: Option<&str>, change: MetadataChange| MetadataStep {
            path: path.clone(),
            blok: entity.blame(member),
            change,
        };

        if let Some(declared) = SystemModel::describe(entity) {
            match persisted.models.get(&path) {
                None => adds.push(step(None, MetadataChange::AddModel(declared))),
                Some(current) if mode.alters() => {
                    let changes = declared.compare(current);
                    if !changes.is_empty() {
                        alters.push(step(
                            None,
                            MetadataChange::AlterModel {
                                name: path.clone(),
                                changes,
                            },
                        ));
                    }
                }
                Some(_) => {}
            }
        }

        for field in &entity.fields {
            let declared = SystemColumn::describe(entity, table, field, self.foreign_key_code(field));
            match persisted.columns.get(&(path.clone(), field.name.clone())) {
                None => adds.push(step(Some(&field.name), MetadataChange::AddColumn(declared))),
                Some(current) if mode.alters() => {
                    let changes = declared.compare(current);
                    if !changes.is_empty() {
                        alters.push(step(
                            Some(&field.name),
                            MetadataChange::AlterColumn {
                                model: path.clone(),
                                name: field.name.clone(),
                                changes,
                            },
                        ));
                    }
                }
                Some(_) => {}
            }
        }

        for rel in &entity.relationships {
            let declared = SystemRelationship::describe(self.set, entity, table, rel);
            match persisted.relationships.get(&(path.clone(), rel.name.clone())) {
                None => adds.push(step(Some(&rel.name), MetadataChange::AddRelationship(declared))),
                Some(current) if mode.alters() => {
                    let changes = declared.compare(current);
                    if !changes.is_empty() {
                        alters.push(step(
                            Some(&rel.name),
                            MetadataChange::AlterRelationship {
                                model: path.clone(),
                                name: rel.name.clone(),
                                changes,
                            },
                        ));
                    }
                }
                Some(_) => {}
            }
        }

        diff.metadata.extend(adds);
        diff.metadata.extend(alters);
        Ok(())
    }

    /// Association tables are created but carry no metadata rows
    fn plan_associations(&self, diff: &mut SchemaDiff) {
        for association in &self.set.associations {
            if self.backend.has_table(&association.table)
                || diff.ddl.iter().any(|s| s.op.table() == association.table)
            {
                continue;
            }
            let blok = self
                .set
                .model(association.local_model.as_str())
                .map(|m| m.blame(None))
                .unwrap_or_default();
            let columns = association
                .columns
                .iter()
                .map(|f| ColumnInfo::from_field(f, self.foreign_key_code(f)))
                .collect();
            diff.ddl.push(DdlStep {
                path: association.local_model.to_string(),
                blok,
                op: DdlOp::CreateTable {
                    table: association.table.clone(),
                    columns,
                },
            });
        }
    }
}

/// Live column changes: nullability, uniqueness and type are altered in
/// place; a changed foreign key target is dropped and re-added. Primary key
/// and autoincrement changes stay metadata-only.
fn live_alterations(table: &str, declared: &ColumnInfo, current: &ColumnInfo) -> Vec<DdlOp> {
    let mut ops = Vec::new();
    let nullable = (declared.nullable != current.nullable).then_some(declared.nullable);
    let unique = (declared.unique != current.unique).then_some(declared.unique);
    let field_type = (declared.field_type != current.field_type).then_some(declared.field_type);
    if nullable.is_some() || unique.is_some() || field_type.is_some() {
        ops.push(DdlOp::AlterColumn {
            table: table.to_string(),
            column: declared.name.clone(),
            nullable,
            unique,
            field_type,
        });
    }
    if declared.info.foreign_key != current.info.foreign_key {
        if current.info.foreign_key.is_some() {
            ops.push(DdlOp::DropForeignKey {
                table: table.to_string(),
                column: declared.name.clone(),
            });
        }
        if let Some(target) = &declared.info.foreign_key {
            ops.push(DdlOp::AddForeignKey {
                table: table.to_string(),
                column: declared.name.clone(),
                target: target.clone(),
            });
        }
    }
    ops
}

fn persistence(blok: &str, path: &str, source: BackendError) -> SchemaSyncError {
    SchemaSyncError::Persistence {
        blok: blok.to_string(),
        path: path.to_string(),
        source,
    }
}
