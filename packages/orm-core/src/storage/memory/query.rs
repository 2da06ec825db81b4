//! Filter, sort and paging over visible rows.

use std::cmp::Ordering;

use crate::error::OrmError;
use crate::storage::{Direction, Filter, FilterOp, Row, Select};
use crate::types::Value;

use super::table::TableDef;

/// Applies a select's filters, ordering, offset and limit.
///
/// # Arguments
/// * `def` - Table definition used to validate column names
/// * `rows` - Rows visible to the executing connection, in primary key order
/// * `select` - Selection to apply
///
/// # Returns
/// `Result<Vec<Row>, OrmError>` containing the selected rows.
pub(crate) fn select_rows(def: &TableDef, rows: Vec<Row>, select: &Select) -> Result<Vec<Row>, OrmError> {
    for column in select
        .filters
        .iter()
        .map(|f| &f.column)
        .chain(select.order_by.iter().map(|o| &o.column))
    {
        if !def.has_column(column) {
            return Err(OrmError::UnknownField {
                entity: def.name.clone(),
                field: column.clone(),
            });
        }
    }

    let mut matching: Vec<Row> = rows
        .into_iter()
        .filter(|row| select.filters.iter().all(|f| matches_filter(row, f)))
        .collect();

    if !select.order_by.is_empty() {
        // Stable sort keeps primary key order for ties
        matching.sort_by(|a, b| {
            for term in &select.order_by {
                let ordering = column_value(a, &term.column).total_cmp(column_value(b, &term.column));
                let ordering = match term.direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    let skip_count = select.offset.unwrap_or(0);
    let selected = matching.into_iter().skip(skip_count);
    Ok(match select.limit {
        Some(limit) => selected.take(limit).collect(),
        None => selected.collect(),
    })
}

fn column_value<'a>(row: &'a Row, column: &str) -> &'a Value {
    const NULL: &Value = &Value::Null;
    row.get(column).unwrap_or(NULL)
}

/// NULL never compares equal, as in SQL; use `IsNull` for it.
fn matches_filter(row: &Row, filter: &Filter) -> bool {
    let value = column_value(row, &filter.column);
    let compare = |expected: &Value| -> Option<Ordering> {
        if value.is_null() || expected.is_null() {
            None
        } else {
            Some(value.total_cmp(expected))
        }
    };
    match &filter.op {
        FilterOp::Eq(expected) => compare(expected) == Some(Ordering::Equal),
        FilterOp::Ne(expected) => matches!(compare(expected), Some(o) if o != Ordering::Equal),
        FilterOp::Lt(expected) => compare(expected) == Some(Ordering::Less),
        FilterOp::Le(expected) => matches!(compare(expected), Some(Ordering::Less | Ordering::Equal)),
        FilterOp::Gt(expected) => compare(expected) == Some(Ordering::Greater),
        FilterOp::Ge(expected) => {
            matches!(compare(expected), Some(Ordering::Greater | Ordering::Equal))
        }
        FilterOp::IsNull => value.is_null(),
        FilterOp::IsNotNull => !value.is_null(),
        FilterOp::In(candidates) => candidates
            .iter()
            .any(|candidate| compare(candidate) == Some(Ordering::Equal)),
    }
}
