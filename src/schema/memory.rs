//! In-memory backend
//!
//! A complete [`Backend`] kept in process memory. It enforces NOT NULL,
//! column types, primary key and unique constraints, foreign keys on write,
//! and autoincrement sequences. Transactions snapshot the whole store on
//! `begin` and restore it on `rollback`.

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::backend::{Backend, BackendError, ColumnInfo, Connector, DdlOp, Record};

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<ColumnInfo>,
    rows: Vec<Record>,
}

impl Table {
    fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn next_sequence(&self, column: &str) -> i64 {
        self.rows
            .iter()
            .filter_map(|r| r.value(column).and_then(JsonValue::as_i64))
            .max()
            .unwrap_or(0)
            + 1
    }
}

#[derive(Debug, Clone, Default)]
struct Store {
    tables: BTreeMap<String, Table>,
}

#[derive(Debug, Default)]
struct Inner {
    store: Store,
    snapshot: Option<Store>,
}

/// Operation counters
#[derive(Debug, Default)]
pub struct BackendStats {
    ddl: AtomicUsize,
    writes: AtomicUsize,
}

impl BackendStats {
    /// Schema-definition operations executed
    pub fn ddl(&self) -> usize {
        self.ddl.load(Ordering::SeqCst)
    }

    /// Successful inserts, updates and deletes
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.ddl.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
    }
}

/// In-memory storage target
#[derive(Debug)]
pub struct MemoryBackend {
    name: String,
    inner: Mutex<Inner>,
    stats: BackendStats,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
            stats: BackendStats::default(),
        }
    }

    pub fn stats(&self) -> &BackendStats {
        &self.stats
    }

    /// Number of rows in a table
    pub fn row_count(&self, table: &str) -> Result<usize, BackendError> {
        let inner = self.inner.lock();
        inner
            .store
            .tables
            .get(table)
            .map(|t| t.rows.len())
            .ok_or_else(|| BackendError::UnknownTable(table.to_string()))
    }
}

// ── Constraint checks ───────────────────────────────────────────────────────

fn constraint(table: &str, column: &str, reason: impl Into<String>) -> BackendError {
    BackendError::Constraint {
        table: table.to_string(),
        column: column.to_string(),
        reason: reason.into(),
    }
}

/// Check one candidate row of `table` against every constraint. `skip` is the
/// index of the row being replaced, if any.
fn check_row(store: &Store, table_name: &str, table: &Table, row: &Record, skip: Option<usize>) -> Result<(), BackendError> {
    for key in row.data.keys() {
        if table.column(key).is_none() {
            return Err(BackendError::UnknownColumn {
                table: table_name.to_string(),
                column: key.clone(),
            });
        }
    }

    let others = || {
        table
            .rows
            .iter()
            .enumerate()
            .filter(move |(i, _)| Some(*i) != skip)
            .map(|(_, r)| r)
    };

    for column in &table.columns {
        let value = row.value(&column.name);
        match value {
            None if !column.nullable => {
                return Err(constraint(table_name, &column.name, "NOT NULL"));
            }
            None => continue,
            Some(v) if !column.field_type.accepts(v) => {
                return Err(constraint(
                    table_name,
                    &column.name,
                    format!("{} does not fit {}", v, column.field_type),
                ));
            }
            Some(v) => {
                if column.unique && others().any(|r| r.value(&column.name) == Some(v)) {
                    return Err(constraint(table_name, &column.name, format!("duplicate value {}", v)));
                }
                if let Some(target) = &column.info.foreign_key {
                    check_reference(store, table_name, &column.name, target, v)?;
                }
            }
        }
    }

    let keys: Vec<&str> = table
        .columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| c.name.as_str())
        .collect();
    if !keys.is_empty() {
        let duplicate = others().any(|r| keys.iter().all(|k| r.value(k) == row.value(k)));
        if duplicate {
            return Err(constraint(table_name, &keys.join(","), "duplicate primary key"));
        }
    }
    Ok(())
}

fn check_reference(store: &Store, table: &str, column: &str, target: &str, value: &JsonValue) -> Result<(), BackendError> {
    let (target_table, target_column) = target
        .split_once('.')
        .ok_or_else(|| constraint(table, column, format!("malformed foreign key target '{}'", target)))?;
    let referenced = store
        .tables
        .get(target_table)
        .ok_or_else(|| BackendError::UnknownTable(target_table.to_string()))?;
    if !referenced.rows.iter().any(|r| r.value(target_column) == Some(value)) {
        return Err(constraint(
            table,
            column,
            format!("{} does not exist in {}", value, target),
        ));
    }
    Ok(())
}

fn apply_ddl(store: &mut Store, op: &DdlOp) -> Result<(), BackendError> {
    match op {
        DdlOp::CreateTable { table, columns } => {
            if store.tables.contains_key(table) {
                return Err(BackendError::DuplicateTable(table.clone()));
            }
            store.tables.insert(
                table.clone(),
                Table {
                    columns: columns.clone(),
                    rows: Vec::new(),
                },
            );
        }
        DdlOp::AddColumn { table, column } => {
            let t = store
                .tables
                .get_mut(table)
                .ok_or_else(|| BackendError::UnknownTable(table.clone()))?;
            if t.column(&column.name).is_some() {
                return Err(BackendError::DuplicateColumn {
                    table: table.clone(),
                    column: column.name.clone(),
                });
            }
            if !column.nullable && !column.autoincrement && !t.rows.is_empty() {
                return Err(constraint(table, &column.name, "NOT NULL column added to a table with rows"));
            }
            t.columns.push(column.clone());
        }
        DdlOp::AlterColumn {
            table,
            column,
            nullable,
            unique,
            field_type,
        } => {
            let t = store
                .tables
                .get_mut(table)
                .ok_or_else(|| BackendError::UnknownTable(table.clone()))?;
            let position = t
                .columns
                .iter()
                .position(|c| &c.name == column)
                .ok_or_else(|| BackendError::UnknownColumn {
                    table: table.clone(),
                    column: column.clone(),
                })?;

            if *nullable == Some(false) && t.rows.iter().any(|r| r.value(column).is_none()) {
                return Err(constraint(table, column, "existing rows hold NULL"));
            }
            if *unique == Some(true) {
                let mut seen = Vec::new();
                for value in t.rows.iter().filter_map(|r| r.value(column)) {
                    if seen.contains(&value) {
                        return Err(constraint(table, column, format!("duplicate value {}", value)));
                    }
                    seen.push(value);
                }
            }
            if let Some(new_type) = field_type {
                if let Some(bad) = t.rows.iter().filter_map(|r| r.value(column)).find(|v| !new_type.accepts(v)) {
                    return Err(constraint(table, column, format!("{} does not fit {}", bad, new_type)));
                }
            }

            let c = &mut t.columns[position];
            if let Some(n) = nullable {
                c.nullable = *n;
            }
            if let Some(u) = unique {
                c.unique = *u;
            }
            if let Some(new_type) = field_type {
                c.field_type = *new_type;
            }
        }
        DdlOp::AddForeignKey { table, column, target } => {
            let t = store
                .tables
                .get_mut(table)
                .ok_or_else(|| BackendError::UnknownTable(table.clone()))?;
            let c = t
                .columns
                .iter_mut()
                .find(|c| &c.name == column)
                .ok_or_else(|| BackendError::UnknownColumn {
                    table: table.clone(),
                    column: column.clone(),
                })?;
            c.info.foreign_key = Some(target.clone());
        }
        DdlOp::DropForeignKey { table, column } => {
            let t = store
                .tables
                .get_mut(table)
                .ok_or_else(|| BackendError::UnknownTable(table.clone()))?;
            let c = t
                .columns
                .iter_mut()
                .find(|c| &c.name == column)
                .ok_or_else(|| BackendError::UnknownColumn {
                    table: table.clone(),
                    column: column.clone(),
                })?;
            c.info.foreign_key = None;
        }
    }
    Ok(())
}

impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn begin(&self) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        if inner.snapshot.is_some() {
            return Err(BackendError::Transaction("a transaction is already open".into()));
        }
        inner.snapshot = Some(inner.store.clone());
        Ok(())
    }

    fn commit(&self) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        inner
            .snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| BackendError::Transaction("no open transaction to commit".into()))
    }

    fn rollback(&self) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        let snapshot = inner
            .snapshot
            .take()
            .ok_or_else(|| BackendError::Transaction("no open transaction to roll back".into()))?;
        inner.store = snapshot;
        debug!(target: "registry::schema", backend = %self.name, "Transaction rolled back");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.inner.lock().snapshot.is_some()
    }

    fn execute_ddl(&self, op: &DdlOp) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        apply_ddl(&mut inner.store, op)?;
        self.stats.ddl.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn has_table(&self, table: &str) -> bool {
        self.inner.lock().store.tables.contains_key(table)
    }

    fn tables(&self) -> Vec<String> {
        self.inner.lock().store.tables.keys().cloned().collect()
    }

    fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, BackendError> {
        let inner = self.inner.lock();
        inner
            .store
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .ok_or_else(|| BackendError::UnknownTable(table.to_string()))
    }

    fn insert(&self, table: &str, record: Record) -> Result<Record, BackendError> {
        let mut inner = self.inner.lock();
        let t = inner
            .store
            .tables
            .get(table)
            .ok_or_else(|| BackendError::UnknownTable(table.to_string()))?;

        let mut row = record;
        for column in t.columns.iter().filter(|c| c.autoincrement) {
            if row.value(&column.name).is_none() {
                row.set(column.name.clone(), JsonValue::from(t.next_sequence(&column.name)));
            }
        }
        check_row(&inner.store, table, t, &row, None)?;

        if let Some(t) = inner.store.tables.get_mut(table) {
            t.rows.push(row.clone());
        }
        self.stats.writes.fetch_add(1, Ordering::SeqCst);
        Ok(row)
    }

    fn update(&self, table: &str, filter: &Record, changes: &Record) -> Result<usize, BackendError> {
        let mut inner = self.inner.lock();
        let t = inner
            .store
            .tables
            .get(table)
            .ok_or_else(|| BackendError::UnknownTable(table.to_string()))?;

        let mut updated: HashMap<usize, Record> = HashMap::new();
        for (index, row) in t.rows.iter().enumerate().filter(|(_, r)| r.matches(filter)) {
            let mut candidate = row.clone();
            for (key, value) in &changes.data {
                candidate.set(key.clone(), value.clone());
            }
            check_row(&inner.store, table, t, &candidate, Some(index))?;
            updated.insert(index, candidate);
        }

        let count = updated.len();
        if let Some(t) = inner.store.tables.get_mut(table) {
            for (index, row) in updated {
                t.rows[index] = row;
            }
        }
        if count > 0 {
            self.stats.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(count)
    }

    fn select(&self, table: &str, filter: &Record) -> Result<Vec<Record>, BackendError> {
        let inner = self.inner.lock();
        let t = inner
            .store
            .tables
            .get(table)
            .ok_or_else(|| BackendError::UnknownTable(table.to_string()))?;
        Ok(t.rows.iter().filter(|r| r.matches(filter)).cloned().collect())
    }

    fn delete(&self, table: &str, filter: &Record) -> Result<usize, BackendError> {
        let mut inner = self.inner.lock();
        let t = inner
            .store
            .tables
            .get_mut(table)
            .ok_or_else(|| BackendError::UnknownTable(table.to_string()))?;
        let before = t.rows.len();
        t.rows.retain(|r| !r.matches(filter));
        let count = before - t.rows.len();
        if count > 0 {
            self.stats.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(count)
    }
}

/// Connector handing out one shared [`MemoryBackend`] per name
#[derive(Debug, Default)]
pub struct MemoryConnector {
    backends: Mutex<HashMap<String, Arc<MemoryBackend>>>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The backend behind `name`, if it was ever connected
    pub fn backend(&self, name: &str) -> Option<Arc<MemoryBackend>> {
        self.backends.lock().get(name).cloned()
    }

    /// How many times `connect` was called
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, name: &str) -> Result<Arc<dyn Backend>, BackendError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let backend = self
            .backends
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryBackend::new(name)))
            .clone();
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FieldType;
    use crate::schema::backend::ColumnMetadata;
    use serde_json::json;

    fn column(name: &str, field_type: FieldType) -> ColumnInfo {
        ColumnInfo {
            name: name.into(),
            field_type,
            nullable: true,
            primary_key: false,
            unique: false,
            autoincrement: false,
            info: ColumnMetadata::default(),
        }
    }

    fn id_column() -> ColumnInfo {
        ColumnInfo {
            nullable: false,
            primary_key: true,
            autoincrement: true,
            ..column("id", FieldType::Integer)
        }
    }

    fn backend_with_tables() -> MemoryBackend {
        let backend = MemoryBackend::new("test");
        backend
            .execute_ddl(&DdlOp::CreateTable {
                table: "address".into(),
                columns: vec![id_column(), column("street", FieldType::String(64))],
            })
            .unwrap();
        let mut fk = column("address_id", FieldType::Integer);
        fk.info.foreign_key = Some("address.id".into());
        backend
            .execute_ddl(&DdlOp::CreateTable {
                table: "person".into(),
                columns: vec![id_column(), fk],
            })
            .unwrap();
        backend
    }

    #[test]
    fn test_insert_autoincrement() {
        let backend = backend_with_tables();
        let first = backend.insert("address", Record::new().with("street", "a")).unwrap();
        let second = backend.insert("address", Record::new().with("street", "b")).unwrap();
        assert_eq!(first.value("id"), Some(&json!(1)));
        assert_eq!(second.value("id"), Some(&json!(2)));
        assert_eq!(backend.stats().writes(), 2);
    }

    #[test]
    fn test_constraints() {
        let backend = backend_with_tables();
        backend.insert("address", Record::new().with("id", 1)).unwrap();

        let dup = backend.insert("address", Record::new().with("id", 1)).unwrap_err();
        assert!(matches!(dup, BackendError::Constraint { .. }));

        let fk = backend.insert("person", Record::new().with("address_id", 42)).unwrap_err();
        assert!(matches!(fk, BackendError::Constraint { ref column, .. } if column == "address_id"));

        let unknown = backend.insert("person", Record::new().with("nope", 1)).unwrap_err();
        assert!(matches!(unknown, BackendError::UnknownColumn { .. }));

        let too_long = backend
            .insert("address", Record::new().with("street", "x".repeat(65)))
            .unwrap_err();
        assert!(matches!(too_long, BackendError::Constraint { .. }));
    }

    #[test]
    fn test_update_select_delete() {
        let backend = backend_with_tables();
        backend.insert("address", Record::new().with("street", "a")).unwrap();
        backend.insert("address", Record::new().with("street", "b")).unwrap();

        let count = backend
            .update("address", &Record::new().with("id", 2), &Record::new().with("street", "c"))
            .unwrap();
        assert_eq!(count, 1);
        let rows = backend.select("address", &Record::new().with("street", "c")).unwrap();
        assert_eq!(rows.len(), 1);

        assert_eq!(backend.delete("address", &Record::new().with("id", 1)).unwrap(), 1);
        assert_eq!(backend.row_count("address").unwrap(), 1);
    }

    #[test]
    fn test_rollback_restores_schema_and_rows() {
        let backend = backend_with_tables();
        backend.begin().unwrap();
        backend.insert("address", Record::new().with("street", "a")).unwrap();
        backend
            .execute_ddl(&DdlOp::AddColumn {
                table: "address".into(),
                column: column("city", FieldType::Text),
            })
            .unwrap();
        backend.rollback().unwrap();

        assert_eq!(backend.row_count("address").unwrap(), 0);
        assert_eq!(backend.columns("address").unwrap().len(), 2);
        assert!(matches!(backend.commit().unwrap_err(), BackendError::Transaction(_)));
    }

    #[test]
    fn test_alter_column_checks_rows() {
        let backend = backend_with_tables();
        backend.insert("address", Record::new()).unwrap();

        let err = backend
            .execute_ddl(&DdlOp::AlterColumn {
                table: "address".into(),
                column: "street".into(),
                nullable: Some(false),
                unique: None,
                field_type: None,
            })
            .unwrap_err();
        assert!(matches!(err, BackendError::Constraint { .. }));

        backend
            .execute_ddl(&DdlOp::AlterColumn {
                table: "address".into(),
                column: "street".into(),
                nullable: None,
                unique: Some(true),
                field_type: Some(FieldType::Text),
            })
            .unwrap();
        let street = backend
            .columns("address")
            .unwrap()
            .into_iter()
            .find(|c| c.name == "street")
            .unwrap();
        assert!(street.unique);
        assert_eq!(street.field_type, FieldType::Text);
    }

    #[test]
    fn test_connector_shares_backends() {
        let connector = MemoryConnector::new();
        let a = connector.connect("db").unwrap();
        let b = connector.connect("db").unwrap();
        a.execute_ddl(&DdlOp::CreateTable {
            table: "t".into(),
            columns: vec![id_column()],
        })
        .unwrap();
        assert!(b.has_table("t"));
        assert_eq!(connector.connect_count(), 2);
        assert!(connector.backend("other").is_none());
    }
}
