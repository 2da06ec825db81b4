//! Association edges between entity types.

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

/// Operation propagated along an association edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeOp {
    Persist,
    Remove,
    Refresh,
    Merge,
}

impl CascadeOp {
    const fn bit(self) -> u8 {
        match self {
            CascadeOp::Persist => 1,
            CascadeOp::Remove => 1 << 1,
            CascadeOp::Refresh => 1 << 2,
            CascadeOp::Merge => 1 << 3,
        }
    }

    /// All operations in a fixed order.
    pub const ALL: [CascadeOp; 4] = [
        CascadeOp::Persist,
        CascadeOp::Remove,
        CascadeOp::Refresh,
        CascadeOp::Merge,
    ];
}

impl fmt::Display for CascadeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CascadeOp::Persist => "persist",
            CascadeOp::Remove => "remove",
            CascadeOp::Refresh => "refresh",
            CascadeOp::Merge => "merge",
        };
        f.write_str(name)
    }
}

/// Set of cascaded operations on one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CascadeSet(u8);

impl CascadeSet {
    pub const NONE: CascadeSet = CascadeSet(0);
    pub const PERSIST: CascadeSet = CascadeSet(CascadeOp::Persist.bit());
    pub const REMOVE: CascadeSet = CascadeSet(CascadeOp::Remove.bit());
    pub const REFRESH: CascadeSet = CascadeSet(CascadeOp::Refresh.bit());
    pub const MERGE: CascadeSet = CascadeSet(CascadeOp::Merge.bit());
    pub const ALL: CascadeSet = CascadeSet(0b1111);

    pub fn contains(self, op: CascadeOp) -> bool {
        self.0 & op.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Lists the contained operations.
    pub fn ops(self) -> Vec<CascadeOp> {
        CascadeOp::ALL
            .into_iter()
            .filter(|op| self.contains(*op))
            .collect()
    }

    pub fn from_ops(ops: &[CascadeOp]) -> Self {
        CascadeSet(ops.iter().fold(0, |acc, op| acc | op.bit()))
    }
}

impl BitOr for CascadeSet {
    type Output = CascadeSet;

    fn bitor(self, rhs: CascadeSet) -> CascadeSet {
        CascadeSet(self.0 | rhs.0)
    }
}

/// Fetch strategy for an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchType {
    Eager,
    Lazy,
}

/// Cardinality and owning side of an association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    /// Owning side: this entity's table holds the foreign key column
    ManyToOne { column: String, nullable: bool },
    /// Inverse side: the target's many-to-one named `mapped_by` holds the key
    OneToMany { mapped_by: String },
}

/// Association edge declared on an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    /// Association name on the owning entity
    pub name: String,
    /// Target entity name
    pub target: String,
    pub kind: AssociationKind,
    pub fetch: FetchType,
    pub cascade: CascadeSet,
    /// Batch size for lazy collection initialization
    pub batch_size: Option<usize>,
}

impl Association {
    /// Lazy many-to-one with a nullable `<name>_id` foreign key column.
    pub fn many_to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind: AssociationKind::ManyToOne {
                column: format!("{}_id", name),
                nullable: true,
            },
            name,
            target: target.into(),
            fetch: FetchType::Lazy,
            cascade: CascadeSet::NONE,
            batch_size: None,
        }
    }

    /// Lazy one-to-many mapped by the target's many-to-one `mapped_by`.
    pub fn one_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind: AssociationKind::OneToMany {
                mapped_by: mapped_by.into(),
            },
            fetch: FetchType::Lazy,
            cascade: CascadeSet::NONE,
            batch_size: None,
        }
    }

    pub fn eager(mut self) -> Self {
        self.fetch = FetchType::Eager;
        self
    }

    pub fn cascade(mut self, cascade: CascadeSet) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Overrides the foreign key column of a many-to-one.
    pub fn join_column(mut self, name: impl Into<String>) -> Self {
        if let AssociationKind::ManyToOne { column, .. } = &mut self.kind {
            *column = name.into();
        }
        self
    }

    /// Marks a many-to-one foreign key as NOT NULL.
    pub fn required(mut self) -> Self {
        if let AssociationKind::ManyToOne { nullable, .. } = &mut self.kind {
            *nullable = false;
        }
        self
    }

    pub fn is_to_one(&self) -> bool {
        matches!(self.kind, AssociationKind::ManyToOne { .. })
    }

    /// Foreign key column for the owning side.
    pub fn fk_column(&self) -> Option<&str> {
        match &self.kind {
            AssociationKind::ManyToOne { column, .. } => Some(column.as_str()),
            AssociationKind::OneToMany { .. } => None,
        }
    }
}
