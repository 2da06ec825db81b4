//! In-memory transactional storage driver.
//!
//! Tables keep committed rows in lock-free snapshots. Each connection stages
//! its writes privately and publishes them on commit, so uncommitted work is
//! never visible to other connections.

mod query;
mod table;
mod transaction;

pub use table::{ForeignKey, TableDef};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;

use crate::error::OrmError;
use crate::mapping::MappingRegistry;
use crate::storage::{Connection, Outcome, Row, Statement, StorageDriver, VersionCheck};
use crate::types::Value;

use table::MemTable;
use transaction::Transaction;

/// Number of statements and transaction outcomes seen by a driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatementCounts {
    pub selects: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub commits: u64,
    pub rollbacks: u64,
}

impl StatementCounts {
    /// Total statements executed, excluding commits and rollbacks.
    pub fn statements(&self) -> u64 {
        self.selects + self.inserts + self.updates + self.deletes
    }
}

#[derive(Debug, Default)]
struct Counters {
    selects: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> StatementCounts {
        StatementCounts {
            selects: self.selects.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.selects,
            &self.inserts,
            &self.updates,
            &self.deletes,
            &self.commits,
            &self.rollbacks,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Tables and commit serialization shared by every connection of a driver.
#[derive(Debug, Default)]
struct MemoryStore {
    tables: RwLock<HashMap<String, Arc<MemTable>>>,
    /// Serializes commit validation and publication
    commit_lock: Mutex<()>,
    counters: Counters,
}

impl MemoryStore {
    fn table(&self, name: &str) -> Result<Arc<MemTable>, OrmError> {
        let tables = self.tables.read().map_err(|_| OrmError::LockPoisoned)?;
        tables.get(name).cloned().ok_or_else(|| OrmError::TableNotFound {
            table: name.to_string(),
        })
    }

    /// Tables with a foreign key pointing at `table`.
    fn referencing(&self, table: &str) -> Result<Vec<Arc<MemTable>>, OrmError> {
        let tables = self.tables.read().map_err(|_| OrmError::LockPoisoned)?;
        let mut referencing: Vec<Arc<MemTable>> = tables
            .values()
            .filter(|t| t.def.foreign_keys.iter().any(|fk| fk.references == table))
            .cloned()
            .collect();
        referencing.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(referencing)
    }

    fn apply(&self, tx: &mut Transaction, statement: &Statement) -> Result<Outcome, OrmError> {
        match statement {
            Statement::Select(select) => {
                self.counters.selects.fetch_add(1, Ordering::Relaxed);
                let table = self.table(&select.table)?;
                let rows = tx.visible_rows(&table);
                Ok(Outcome::Rows(query::select_rows(&table.def, rows, select)?))
            }
            Statement::Insert { table, id, values, .. } => {
                self.counters.inserts.fetch_add(1, Ordering::Relaxed);
                let table = self.table(table)?;
                self.insert(tx, &table, *id, values)
            }
            Statement::Update {
                table,
                id,
                version,
                values,
                ..
            } => {
                self.counters.updates.fetch_add(1, Ordering::Relaxed);
                let table = self.table(table)?;
                self.update(tx, &table, *id, version.as_ref(), values)
            }
            Statement::Delete { table, id, version, .. } => {
                self.counters.deletes.fetch_add(1, Ordering::Relaxed);
                let table = self.table(table)?;
                self.delete(tx, &table, *id, version.as_ref())
            }
        }
    }

    fn insert(
        &self,
        tx: &mut Transaction,
        table: &MemTable,
        id: Option<i64>,
        values: &Row,
    ) -> Result<Outcome, OrmError> {
        check_columns(table, values)?;
        let id = match id {
            Some(id) => {
                table.observe_id(id);
                id
            }
            None => table.next_id(),
        };
        if tx.visible_row(table, id).is_some() {
            return Err(OrmError::ConstraintViolation {
                table: table.name().to_string(),
                constraint: "primary key".to_string(),
                detail: format!("duplicate id {}", id),
            });
        }

        let mut row = Row::new();
        for column in &table.def.columns {
            row.insert(column.clone(), values.get(column).cloned().unwrap_or(Value::Null));
        }
        row.insert(table.def.id_column.clone(), Value::Int(id));

        check_unique(tx, table, id, &row)?;
        self.check_foreign_keys(tx, table, id, &row)?;
        tx.stage(table, id, Some(row));
        Ok(Outcome::Inserted { id })
    }

    fn update(
        &self,
        tx: &mut Transaction,
        table: &MemTable,
        id: i64,
        version: Option<&VersionCheck>,
        values: &Row,
    ) -> Result<Outcome, OrmError> {
        check_columns(table, values)?;
        let Some(mut row) = tx.visible_row(table, id) else {
            return Ok(Outcome::Affected(0));
        };
        if !version_matches(&row, version) {
            return Ok(Outcome::Affected(0));
        }
        for (column, value) in values {
            row.insert(column.clone(), value.clone());
        }
        check_unique(tx, table, id, &row)?;
        self.check_foreign_keys(tx, table, id, &row)?;
        tx.stage(table, id, Some(row));
        Ok(Outcome::Affected(1))
    }

    fn delete(
        &self,
        tx: &mut Transaction,
        table: &MemTable,
        id: i64,
        version: Option<&VersionCheck>,
    ) -> Result<Outcome, OrmError> {
        let Some(row) = tx.visible_row(table, id) else {
            return Ok(Outcome::Affected(0));
        };
        if !version_matches(&row, version) {
            return Ok(Outcome::Affected(0));
        }
        for referencing in self.referencing(table.name())? {
            for fk in referencing
                .def
                .foreign_keys
                .iter()
                .filter(|fk| fk.references == table.name())
            {
                let same_table = referencing.name() == table.name();
                let blocked = tx.visible_rows(&referencing).iter().any(|r| {
                    let row_id = r.get(&referencing.def.id_column).and_then(Value::as_i64);
                    r.get(&fk.column).and_then(Value::as_i64) == Some(id) && !(same_table && row_id == Some(id))
                });
                if blocked {
                    return Err(OrmError::ConstraintViolation {
                        table: referencing.name().to_string(),
                        constraint: format!("fk({} -> {})", fk.column, fk.references),
                        detail: format!("id {} is still referenced", id),
                    });
                }
            }
        }
        tx.stage(table, id, None);
        Ok(Outcome::Affected(1))
    }

    fn check_foreign_keys(&self, tx: &Transaction, table: &MemTable, id: i64, row: &Row) -> Result<(), OrmError> {
        for fk in &table.def.foreign_keys {
            let Some(target_id) = row.get(&fk.column).and_then(Value::as_i64) else {
                continue;
            };
            // Self references may point at the row being written
            if fk.references == table.name() && target_id == id {
                continue;
            }
            let target = self.table(&fk.references)?;
            if tx.visible_row(&target, target_id).is_none() {
                return Err(OrmError::ConstraintViolation {
                    table: table.name().to_string(),
                    constraint: format!("fk({} -> {})", fk.column, fk.references),
                    detail: format!("row {} references missing id {}", id, target_id),
                });
            }
        }
        Ok(())
    }

    fn commit(&self, tx: Transaction) -> Result<(), OrmError> {
        if !tx.has_staged_changes() {
            self.counters.commits.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        let _guard = self.commit_lock.lock().map_err(|_| OrmError::LockPoisoned)?;
        let tables = self.tables.read().map_err(|_| OrmError::LockPoisoned)?;
        match tx.commit(&tables) {
            Ok(()) => {
                self.counters.commits.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.counters.rollbacks.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }
}

fn check_columns(table: &MemTable, values: &Row) -> Result<(), OrmError> {
    for column in values.keys() {
        if column == &table.def.id_column || !table.def.has_column(column) {
            return Err(OrmError::UnknownField {
                entity: table.name().to_string(),
                field: column.clone(),
            });
        }
    }
    Ok(())
}

fn version_matches(row: &Row, check: Option<&VersionCheck>) -> bool {
    match check {
        None => true,
        Some(check) => row.get(&check.column).and_then(Value::as_i64) == Some(check.expected),
    }
}

fn check_unique(tx: &Transaction, table: &MemTable, id: i64, row: &Row) -> Result<(), OrmError> {
    if table.def.unique.is_empty() {
        return Ok(());
    }
    let visible = tx.visible_rows(table);
    for column in &table.def.unique {
        let Some(value) = row.get(column).filter(|v| !v.is_null()) else {
            continue;
        };
        let duplicate = visible.iter().any(|other| {
            other.get(&table.def.id_column).and_then(Value::as_i64) != Some(id) && other.get(column) == Some(value)
        });
        if duplicate {
            return Err(OrmError::ConstraintViolation {
                table: table.name().to_string(),
                constraint: format!("unique({})", column),
                detail: format!("duplicate value {}", value),
            });
        }
    }
    Ok(())
}

/// Driver whose tables live in process memory.
///
/// Cloning shares the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    store: Arc<MemoryStore>,
}

impl MemoryDriver {
    /// Creates a driver with no tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a driver with one table per mapped entity.
    ///
    /// # Arguments
    /// * `registry` - Validated entity mappings
    ///
    /// # Returns
    /// `Result<MemoryDriver, OrmError>` containing the driver.
    pub fn with_mapping(registry: &MappingRegistry) -> Result<Self, OrmError> {
        let driver = Self::new();
        for name in registry.entity_names() {
            let mapping = registry.get(&name)?;
            driver.create_table(TableDef::from_mapping(mapping, registry)?)?;
        }
        Ok(driver)
    }

    /// Adds a table.
    ///
    /// # Arguments
    /// * `def` - Table definition
    ///
    /// # Returns
    /// `Result<(), OrmError>`; fails if the table already exists.
    pub fn create_table(&self, def: TableDef) -> Result<(), OrmError> {
        let mut tables = self.store.tables.write().map_err(|_| OrmError::LockPoisoned)?;
        if tables.contains_key(&def.name) {
            return Err(OrmError::InvalidMapping(format!("Table '{}' already exists", def.name)));
        }
        tracing::debug!("Created table '{}' with {} columns", def.name, def.columns.len() + 1);
        tables.insert(def.name.clone(), Arc::new(MemTable::new(def)));
        Ok(())
    }

    /// Returns all table names in sorted order.
    pub fn table_names(&self) -> Result<Vec<String>, OrmError> {
        let tables = self.store.tables.read().map_err(|_| OrmError::LockPoisoned)?;
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Number of committed rows in a table.
    pub fn row_count(&self, table: &str) -> Result<usize, OrmError> {
        Ok(self.store.table(table)?.row_count())
    }

    /// Reads one committed row, bypassing every transaction.
    pub fn committed_row(&self, table: &str, id: i64) -> Result<Option<Row>, OrmError> {
        Ok(self.store.table(table)?.snapshot().get(&id).cloned())
    }

    pub fn counts(&self) -> StatementCounts {
        self.store.counters.snapshot()
    }

    pub fn reset_counts(&self) {
        self.store.counters.reset();
    }
}

impl StorageDriver for MemoryDriver {
    fn connect(&self) -> Result<Box<dyn Connection>, OrmError> {
        Ok(Box::new(MemoryConnection {
            store: Arc::clone(&self.store),
            tx: None,
        }))
    }
}

/// Connection of a [`MemoryDriver`].
///
/// Dropping it with an active transaction rolls the transaction back.
#[derive(Debug)]
struct MemoryConnection {
    store: Arc<MemoryStore>,
    tx: Option<Transaction>,
}

impl Connection for MemoryConnection {
    fn execute(&mut self, statement: &Statement) -> Result<Outcome, OrmError> {
        tracing::trace!("Executing {}", statement);
        match self.tx.as_mut() {
            Some(tx) => self.store.apply(tx, statement),
            None => {
                let mut tx = Transaction::new();
                let outcome = self.store.apply(&mut tx, statement)?;
                self.store.commit(tx)?;
                Ok(outcome)
            }
        }
    }

    fn begin(&mut self) -> Result<(), OrmError> {
        if self.tx.is_some() {
            return Err(OrmError::illegal_state("transaction already active"));
        }
        self.tx = Some(Transaction::new());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), OrmError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| OrmError::illegal_state("no active transaction"))?;
        self.store.commit(tx)
    }

    fn rollback(&mut self) -> Result<(), OrmError> {
        if self.tx.take().is_some() {
            self.store.counters.rollbacks.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if self.tx.take().is_some() {
            self.store.counters.rollbacks.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Connection dropped with an active transaction; rolled back");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Direction, Filter, FilterOp, Select};
    use ntest::timeout;

    fn driver() -> MemoryDriver {
        let driver = MemoryDriver::new();
        driver
            .create_table(TableDef::new("node", "id").version("version").unique("name"))
            .unwrap();
        driver
            .create_table(
                TableDef::new("element", "id")
                    .column("label")
                    .foreign_key("node_id", "node"),
            )
            .unwrap();
        driver
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn insert(table: &str, values: Row) -> Statement {
        Statement::Insert {
            table: table.to_string(),
            id_column: "id".to_string(),
            id: None,
            values,
        }
    }

    #[timeout(1000)]
    #[test]
    fn test_autocommit_insert_generates_ids() {
        let driver = driver();
        let mut conn = driver.connect().unwrap();
        let first = conn
            .execute(&insert("node", row(&[("name", "a".into()), ("version", 0.into())])))
            .unwrap();
        let second = conn
            .execute(&insert("node", row(&[("name", "b".into()), ("version", 0.into())])))
            .unwrap();
        assert_eq!(first, Outcome::Inserted { id: 1 });
        assert_eq!(second, Outcome::Inserted { id: 2 });
        assert_eq!(driver.row_count("node").unwrap(), 2);
        assert_eq!(driver.counts().commits, 2);
    }

    #[timeout(1000)]
    #[test]
    fn test_uncommitted_rows_invisible_to_other_connections() {
        let driver = driver();
        let mut writer = driver.connect().unwrap();
        let mut reader = driver.connect().unwrap();
        writer.begin().unwrap();
        writer
            .execute(&insert("node", row(&[("name", "a".into())])))
            .unwrap();

        let seen = reader
            .execute(&Statement::Select(Select::from("node")))
            .unwrap()
            .into_rows();
        assert!(seen.is_empty());
        let own = writer
            .execute(&Statement::Select(Select::from("node")))
            .unwrap()
            .into_rows();
        assert_eq!(own.len(), 1);

        writer.commit().unwrap();
        let seen = reader
            .execute(&Statement::Select(Select::from("node")))
            .unwrap()
            .into_rows();
        assert_eq!(seen.len(), 1);
    }

    #[timeout(1000)]
    #[test]
    fn test_drop_rolls_back() {
        let driver = driver();
        {
            let mut conn = driver.connect().unwrap();
            conn.begin().unwrap();
            conn.execute(&insert("node", row(&[("name", "a".into())])))
                .unwrap();
        }
        assert_eq!(driver.row_count("node").unwrap(), 0);
        assert_eq!(driver.counts().rollbacks, 1);
    }

    #[timeout(1000)]
    #[test]
    fn test_version_check_mismatch_affects_nothing() {
        let driver = driver();
        let mut conn = driver.connect().unwrap();
        conn.execute(&insert("node", row(&[("name", "a".into()), ("version", 0.into())])))
            .unwrap();
        let update = |expected: i64| Statement::Update {
            table: "node".to_string(),
            id_column: "id".to_string(),
            id: 1,
            version: Some(VersionCheck {
                column: "version".to_string(),
                expected,
            }),
            values: row(&[("version", (expected + 1).into())]),
        };
        assert_eq!(conn.execute(&update(5)).unwrap(), Outcome::Affected(0));
        assert_eq!(conn.execute(&update(0)).unwrap(), Outcome::Affected(1));
        let stored = driver.committed_row("node", 1).unwrap().unwrap();
        assert_eq!(stored.get("version"), Some(&Value::Int(1)));
    }

    #[timeout(1000)]
    #[test]
    fn test_concurrent_commits_detect_conflict() {
        let driver = driver();
        let mut setup = driver.connect().unwrap();
        setup
            .execute(&insert("node", row(&[("name", "a".into()), ("version", 0.into())])))
            .unwrap();

        let bump = Statement::Update {
            table: "node".to_string(),
            id_column: "id".to_string(),
            id: 1,
            version: Some(VersionCheck {
                column: "version".to_string(),
                expected: 0,
            }),
            values: row(&[("version", 1.into())]),
        };
        let mut a = driver.connect().unwrap();
        let mut b = driver.connect().unwrap();
        a.begin().unwrap();
        b.begin().unwrap();
        assert_eq!(a.execute(&bump).unwrap(), Outcome::Affected(1));
        assert_eq!(b.execute(&bump).unwrap(), Outcome::Affected(1));
        a.commit().unwrap();
        assert!(matches!(b.commit(), Err(OrmError::OptimisticLock { .. })));
    }

    #[timeout(1000)]
    #[test]
    fn test_unique_and_foreign_key_constraints() {
        let driver = driver();
        let mut conn = driver.connect().unwrap();
        conn.execute(&insert("node", row(&[("name", "a".into())])))
            .unwrap();
        let duplicate = conn.execute(&insert("node", row(&[("name", "a".into())])));
        assert!(matches!(duplicate, Err(OrmError::ConstraintViolation { .. })));

        let dangling = conn.execute(&insert("element", row(&[("node_id", 99.into())])));
        assert!(matches!(dangling, Err(OrmError::ConstraintViolation { .. })));

        conn.execute(&insert("element", row(&[("node_id", 1.into())])))
            .unwrap();
        let restricted = conn.execute(&Statement::Delete {
            table: "node".to_string(),
            id_column: "id".to_string(),
            id: 1,
            version: None,
        });
        assert!(matches!(restricted, Err(OrmError::ConstraintViolation { .. })));
    }

    #[timeout(1000)]
    #[test]
    fn test_select_filters_and_orders() {
        let driver = driver();
        let mut conn = driver.connect().unwrap();
        for name in ["c", "a", "b"] {
            conn.execute(&insert("node", row(&[("name", name.into())])))
                .unwrap();
        }
        let rows = conn
            .execute(&Statement::Select(
                Select::from("node")
                    .filter(Filter::new("name", FilterOp::Ne(Value::from("b"))))
                    .order_by("name", Direction::Desc),
            ))
            .unwrap()
            .into_rows();
        let names: Vec<&str> = rows.iter().filter_map(|r| r.get("name").and_then(Value::as_str)).collect();
        assert_eq!(names, vec!["c", "a"]);

        let unknown = conn.execute(&Statement::Select(
            Select::from("node").filter(Filter::new("missing", FilterOp::IsNull)),
        ));
        assert!(matches!(unknown, Err(OrmError::UnknownField { .. })));
    }

    #[timeout(1000)]
    #[test]
    fn test_begin_twice_is_illegal() {
        let driver = driver();
        let mut conn = driver.connect().unwrap();
        conn.begin().unwrap();
        assert!(matches!(conn.begin(), Err(OrmError::IllegalState(_))));
        conn.rollback().unwrap();
        conn.rollback().unwrap();
        assert!(!conn.in_transaction());
    }
}
