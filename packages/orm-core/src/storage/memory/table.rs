//! Table definitions and committed row storage.
//!
//! Each table keeps its committed rows behind an `ArcSwap`: readers load
//! a snapshot without locking, commits publish a new map in one swap.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::OrmError;
use crate::mapping::{EntityMapping, MappingRegistry};
use crate::storage::Row;

/// Committed rows by primary key.
pub(crate) type TableRows = BTreeMap<i64, Row>;

/// Foreign key from a column to another table's primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    /// Referencing column
    pub column: String,
    /// Referenced table
    pub references: String,
}

/// Table definition known to the in-memory driver.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    /// Table name
    pub name: String,
    /// Primary key column
    pub id_column: String,
    /// Optimistic lock column
    pub version_column: Option<String>,
    /// Non-key columns
    pub columns: Vec<String>,
    /// Columns with a unique constraint
    pub unique: Vec<String>,
    /// Foreign key constraints
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableDef {
    pub fn new(name: impl Into<String>, id_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_column: id_column.into(),
            version_column: None,
            columns: Vec::new(),
            unique: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn version(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.columns.contains(&name) {
            self.columns.push(name.clone());
        }
        self.version_column = Some(name);
        self
    }

    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.columns.push(name.into());
        self
    }

    pub fn unique(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.columns.contains(&name) {
            self.columns.push(name.clone());
        }
        self.unique.push(name);
        self
    }

    pub fn foreign_key(mut self, column: impl Into<String>, references: impl Into<String>) -> Self {
        let column = column.into();
        if !self.columns.contains(&column) {
            self.columns.push(column.clone());
        }
        self.foreign_keys.push(ForeignKey {
            column,
            references: references.into(),
        });
        self
    }

    /// Derives the table of one entity mapping.
    ///
    /// # Arguments
    /// * `mapping` - Entity mapping
    /// * `registry` - Registry used to resolve association target tables
    ///
    /// # Returns
    /// `Result<TableDef, OrmError>` containing the definition.
    pub fn from_mapping(mapping: &EntityMapping, registry: &MappingRegistry) -> Result<Self, OrmError> {
        let mut def = TableDef::new(mapping.table.clone(), mapping.id_column.clone());
        if let Some(version) = &mapping.version_column {
            def = def.version(version.clone());
        }
        for field in &mapping.fields {
            def = if field.unique {
                def.unique(field.column.clone())
            } else {
                def.column(field.column.clone())
            };
        }
        for association in mapping.to_one_associations() {
            let target = registry.get(&association.target)?;
            if let Some(column) = association.fk_column() {
                def = def.foreign_key(column, target.table.clone());
            }
        }
        Ok(def)
    }

    pub(crate) fn has_column(&self, column: &str) -> bool {
        column == self.id_column || self.columns.iter().any(|c| c == column)
    }
}

/// Committed table state plus its id sequence.
#[derive(Debug)]
pub(crate) struct MemTable {
    pub(crate) def: TableDef,
    rows: ArcSwap<TableRows>,
    next_id: AtomicI64,
}

impl MemTable {
    pub(crate) fn new(def: TableDef) -> Self {
        Self {
            def,
            rows: ArcSwap::from_pointee(TableRows::new()),
            next_id: AtomicI64::new(1), // Start IDs at 1
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.def.name
    }

    /// Loads the committed rows without locking.
    pub(crate) fn snapshot(&self) -> Arc<TableRows> {
        self.rows.load_full()
    }

    /// Publishes a new committed state.
    pub(crate) fn publish(&self, rows: TableRows) {
        self.rows.store(Arc::new(rows));
    }

    /// Atomically increments and returns the next generated id.
    ///
    /// Sequences are not transactional: a rolled back insert burns its id.
    pub(crate) fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Keeps the sequence ahead of explicitly assigned ids.
    pub(crate) fn observe_id(&self, id: i64) {
        self.next_id.fetch_max(id.saturating_add(1), Ordering::SeqCst);
    }

    pub(crate) fn row_count(&self) -> usize {
        self.rows.load().len()
    }
}
