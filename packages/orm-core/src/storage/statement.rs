//! Statements issued by the session through a driver connection.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Value;

/// One stored row, column name to value.
pub type Row = BTreeMap<String, Value>;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

/// Comparison applied to one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq(Value),
    Ne(Value),
    Lt(Value),
    Le(Value),
    Gt(Value),
    Ge(Value),
    IsNull,
    IsNotNull,
    In(Vec<Value>),
}

/// Column filter. All filters of a select must match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: FilterOp) -> Self {
        Self {
            column: column.into(),
            op,
        }
    }
}

/// ORDER BY term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

/// Optimistic lock predicate for updates and deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionCheck {
    pub column: String,
    pub expected: i64,
}

/// Row selection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Select {
    pub table: String,
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Select {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }
}

/// Statement sent to a driver connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// Inserts a row. When `id` is `None` the driver generates one.
    Insert {
        table: String,
        id_column: String,
        id: Option<i64>,
        values: Row,
    },
    /// Updates the listed columns of one row.
    Update {
        table: String,
        id_column: String,
        id: i64,
        version: Option<VersionCheck>,
        values: Row,
    },
    /// Deletes one row.
    Delete {
        table: String,
        id_column: String,
        id: i64,
        version: Option<VersionCheck>,
    },
    Select(Select),
}

impl Statement {
    pub fn table(&self) -> &str {
        match self {
            Statement::Insert { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. } => table,
            Statement::Select(select) => &select.table,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Insert { table, id, values, .. } => {
                write!(f, "insert into {} ({} columns", table, values.len())?;
                match id {
                    Some(id) => write!(f, ", id {})", id),
                    None => f.write_str(", generated id)"),
                }
            }
            Statement::Update { table, id, version, .. } => {
                write!(f, "update {} where id = {}", table, id)?;
                if let Some(check) = version {
                    write!(f, " and {} = {}", check.column, check.expected)?;
                }
                Ok(())
            }
            Statement::Delete { table, id, version, .. } => {
                write!(f, "delete from {} where id = {}", table, id)?;
                if let Some(check) = version {
                    write!(f, " and {} = {}", check.column, check.expected)?;
                }
                Ok(())
            }
            Statement::Select(select) => {
                write!(f, "select from {}", select.table)?;
                if !select.filters.is_empty() {
                    write!(f, " ({} filters)", select.filters.len())?;
                }
                Ok(())
            }
        }
    }
}

/// Statement result.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Rows(Vec<Row>),
    Inserted { id: i64 },
    Affected(usize),
}

impl Outcome {
    /// Returns the selected rows, or an empty list for non-select outcomes.
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Outcome::Rows(rows) => rows,
            _ => Vec::new(),
        }
    }
}
