//! Staged changes of one connection and their atomic commit.
//!
//! Writes go to a per-table overlay. The first time a transaction touches a
//! row it records what it saw in the committed state; commit re-checks those
//! observations under the store's commit lock and only then publishes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::OrmError;
use crate::storage::Row;
use crate::types::Value;

use super::table::{MemTable, TableRows};

/// What the transaction observed of a row when it first touched it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Change {
    /// Row did not exist; the transaction creates it
    Create,
    /// Row existed with this version (None for unversioned tables)
    Modify { base_version: Option<i64> },
}

/// Holds staged changes for a single table.
#[derive(Debug, Default)]
pub(crate) struct StagingBuffer {
    /// Staged row images; `None` marks a deletion
    pub(crate) overlay: BTreeMap<i64, Option<Row>>,
    /// First observation per touched row
    pub(crate) changes: BTreeMap<i64, Change>,
}

/// Transaction context holding staged changes across multiple tables.
#[derive(Debug, Default)]
pub(crate) struct Transaction {
    staging: HashMap<String, StagingBuffer>,
}

impl Transaction {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Row visible to this transaction: its own staged image, else committed.
    pub(crate) fn visible_row(&self, table: &MemTable, id: i64) -> Option<Row> {
        if let Some(staged) = self.staging.get(table.name()).and_then(|s| s.overlay.get(&id)) {
            return staged.clone();
        }
        table.snapshot().get(&id).cloned()
    }

    /// All rows visible to this transaction in primary key order.
    pub(crate) fn visible_rows(&self, table: &MemTable) -> Vec<Row> {
        let committed = table.snapshot();
        match self.staging.get(table.name()) {
            None => committed.values().cloned().collect(),
            Some(staged) => merge(&committed, &staged.overlay).into_values().collect(),
        }
    }

    /// Stages a row image (`None` deletes) and records the first observation.
    pub(crate) fn stage(&mut self, table: &MemTable, id: i64, image: Option<Row>) {
        let committed = table.snapshot();
        let version_column = table.def.version_column.as_deref();
        let buffer = self.staging.entry(table.name().to_string()).or_default();
        buffer.changes.entry(id).or_insert_with(|| match committed.get(&id) {
            None => Change::Create,
            Some(row) => Change::Modify {
                base_version: version_column.and_then(|c| row.get(c)).and_then(Value::as_i64),
            },
        });
        buffer.overlay.insert(id, image);
    }

    pub(crate) fn has_staged_changes(&self) -> bool {
        self.staging.values().any(|s| !s.overlay.is_empty())
    }

    /// Validates and publishes all staged changes.
    ///
    /// The caller must hold the store's commit lock.
    ///
    /// # Arguments
    /// * `tables` - Every table of the store by name
    ///
    /// # Returns
    /// `Result<(), OrmError>`; on error nothing has been published.
    pub(crate) fn commit(self, tables: &HashMap<String, Arc<MemTable>>) -> Result<(), OrmError> {
        // Sort tables by name so concurrent commits publish in one order
        let mut table_names: Vec<&String> = self.staging.keys().collect();
        table_names.sort();

        let mut new_states: HashMap<String, TableRows> = HashMap::new();
        for table_name in table_names {
            let staging_buffer = &self.staging[table_name];
            if staging_buffer.overlay.is_empty() {
                continue;
            }
            let table = tables.get(table_name).ok_or_else(|| OrmError::TableNotFound {
                table: table_name.clone(),
            })?;
            let committed = table.snapshot();
            verify_observations(table, &committed, staging_buffer)?;
            new_states.insert(table_name.clone(), merge(&committed, &staging_buffer.overlay));
        }

        verify_constraints(tables, &new_states, &self.staging)?;

        for (table_name, rows) in new_states {
            if let Some(table) = tables.get(&table_name) {
                table.publish(rows);
            }
        }
        Ok(())
    }
}

/// Committed rows with a staged overlay applied.
fn merge(committed: &TableRows, overlay: &BTreeMap<i64, Option<Row>>) -> TableRows {
    let mut rows = committed.clone();
    for (id, image) in overlay {
        match image {
            Some(row) => {
                rows.insert(*id, row.clone());
            }
            None => {
                rows.remove(id);
            }
        }
    }
    rows
}

fn verify_observations(
    table: &MemTable,
    committed: &TableRows,
    staging_buffer: &StagingBuffer,
) -> Result<(), OrmError> {
    let version_column = table.def.version_column.as_deref();
    for (id, change) in &staging_buffer.changes {
        let current = committed.get(id);
        match (change, current) {
            (Change::Create, Some(_)) => {
                // Created rows that were later deleted in the same transaction never publish
                if staging_buffer.overlay.get(id).map_or(false, Option::is_some) {
                    return Err(OrmError::ConstraintViolation {
                        table: table.name().to_string(),
                        constraint: "primary key".to_string(),
                        detail: format!("duplicate id {}", id),
                    });
                }
            }
            (Change::Create, None) => {}
            (Change::Modify { .. }, None) => {
                return Err(OrmError::OptimisticLock {
                    entity: table.name().to_string(),
                    id: *id,
                });
            }
            (Change::Modify { base_version }, Some(row)) => {
                let current_version = version_column.and_then(|c| row.get(c)).and_then(Value::as_i64);
                if base_version.is_some() && current_version != *base_version {
                    return Err(OrmError::OptimisticLock {
                        entity: table.name().to_string(),
                        id: *id,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Table state a commit would leave behind: the new state if staged, else committed.
fn state_of<'a>(
    name: &str,
    new_states: &'a HashMap<String, TableRows>,
    current: &'a HashMap<String, Arc<TableRows>>,
) -> Option<&'a TableRows> {
    new_states
        .get(name)
        .or_else(|| current.get(name).map(|rows| rows.as_ref()))
}

/// Re-checks unique and foreign key constraints against the states to publish.
fn verify_constraints(
    tables: &HashMap<String, Arc<MemTable>>,
    new_states: &HashMap<String, TableRows>,
    staging: &HashMap<String, StagingBuffer>,
) -> Result<(), OrmError> {
    let current: HashMap<String, Arc<TableRows>> = tables
        .iter()
        .map(|(name, table)| (name.clone(), table.snapshot()))
        .collect();

    for (table_name, staging_buffer) in staging {
        let Some(table) = tables.get(table_name) else {
            continue;
        };
        let Some(rows) = new_states.get(table_name) else {
            continue;
        };

        for (id, image) in &staging_buffer.overlay {
            let Some(row) = image else { continue };

            for column in &table.def.unique {
                let value = row.get(column).cloned().unwrap_or(Value::Null);
                if value.is_null() {
                    continue;
                }
                if rows
                    .iter()
                    .any(|(other_id, other)| other_id != id && other.get(column) == Some(&value))
                {
                    return Err(OrmError::ConstraintViolation {
                        table: table_name.clone(),
                        constraint: format!("unique({})", column),
                        detail: format!("duplicate value {}", value),
                    });
                }
            }

            for fk in &table.def.foreign_keys {
                let Some(target_id) = row.get(&fk.column).and_then(Value::as_i64) else {
                    continue;
                };
                let exists = state_of(&fk.references, new_states, &current)
                    .map_or(false, |target| target.contains_key(&target_id));
                if !exists {
                    return Err(OrmError::ConstraintViolation {
                        table: table_name.clone(),
                        constraint: format!("fk({} -> {})", fk.column, fk.references),
                        detail: format!("row {} references missing id {}", id, target_id),
                    });
                }
            }
        }

        // Deleted rows must not be referenced by anything that will be published
        let deleted: Vec<i64> = staging_buffer
            .overlay
            .iter()
            .filter(|(_, image)| image.is_none())
            .map(|(id, _)| *id)
            .collect();
        if deleted.is_empty() {
            continue;
        }
        for referencing in tables.values() {
            for fk in referencing
                .def
                .foreign_keys
                .iter()
                .filter(|fk| &fk.references == table_name)
            {
                let Some(referencing_rows) = state_of(referencing.name(), new_states, &current) else {
                    continue;
                };
                let dangling = referencing_rows.iter().find_map(|(row_id, row)| {
                    row.get(&fk.column)
                        .and_then(Value::as_i64)
                        .filter(|target| deleted.contains(target))
                        .map(|target| (*row_id, target))
                });
                if let Some((row_id, target)) = dangling {
                    return Err(OrmError::ConstraintViolation {
                        table: referencing.name().to_string(),
                        constraint: format!("fk({} -> {})", fk.column, fk.references),
                        detail: format!("row {} still references deleted id {}", row_id, target),
                    });
                }
            }
        }
    }
    Ok(())
}
