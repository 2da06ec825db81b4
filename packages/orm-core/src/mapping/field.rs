//! Scalar field binding within an entity mapping.

use crate::types::ValueKind;

/// Field-to-column binding.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    /// Field name used by the session API
    pub name: String,
    /// Column name in the table
    pub column: String,
    /// Declared value kind
    pub kind: ValueKind,
    /// Whether NULL is accepted
    pub nullable: bool,
    /// Whether the column carries a unique constraint
    pub unique: bool,
}

impl FieldMapping {
    /// Creates a nullable, non-unique field whose column shares its name.
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            kind,
            nullable: true,
            unique: false,
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}
