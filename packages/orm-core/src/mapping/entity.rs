//! Per-entity mapping descriptor.

use std::sync::Arc;

use crate::error::OrmError;
use crate::session::EntityData;

use super::association::Association;
use super::callbacks::{Callbacks, HookResult, LifecycleEvent};
use super::field::FieldMapping;

/// Primary key strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Driver-assigned sequence value, known after the insert
    Generated,
    /// Caller sets the id before persisting
    Assigned,
}

/// Static description of one entity type.
#[derive(Debug, Clone)]
pub struct EntityMapping {
    /// Entity name
    pub name: String,
    /// Table name
    pub table: String,
    /// Primary key column
    pub id_column: String,
    pub id_strategy: IdStrategy,
    /// Optimistic lock column, if versioned
    pub version_column: Option<String>,
    /// Scalar fields in declaration order
    pub fields: Vec<FieldMapping>,
    /// Association edges in declaration order
    pub associations: Vec<Association>,
    /// Fields defining domain equality
    pub business_key: Vec<String>,
    /// Batch size for lazy to-one proxies targeting this entity
    pub batch_size: Option<usize>,
    pub callbacks: Callbacks,
}

impl EntityMapping {
    /// Starts a mapping with table `name`, id column `id` and generated ids.
    pub fn builder(name: impl Into<String>) -> EntityMappingBuilder {
        let name = name.into();
        EntityMappingBuilder {
            mapping: EntityMapping {
                table: name.clone(),
                name,
                id_column: "id".to_string(),
                id_strategy: IdStrategy::Generated,
                version_column: None,
                fields: Vec::new(),
                associations: Vec::new(),
                business_key: Vec::new(),
                batch_size: None,
                callbacks: Callbacks::default(),
            },
        }
    }

    pub fn field(&self, name: &str) -> Result<&FieldMapping, OrmError> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| OrmError::UnknownField {
                entity: self.name.clone(),
                field: name.to_string(),
            })
    }

    pub fn association(&self, name: &str) -> Result<&Association, OrmError> {
        self.associations
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| OrmError::UnknownAssociation {
                entity: self.name.clone(),
                association: name.to_string(),
            })
    }

    /// Iterates the owning (many-to-one) associations.
    pub fn to_one_associations(&self) -> impl Iterator<Item = &Association> {
        self.associations.iter().filter(|a| a.is_to_one())
    }

    /// Resolves a criteria name (`id`, a field, or a many-to-one) to a column.
    pub fn column_for(&self, name: &str) -> Result<&str, OrmError> {
        if name == "id" || name == self.id_column {
            return Ok(self.id_column.as_str());
        }
        if let Some(field) = self.fields.iter().find(|f| f.name == name) {
            return Ok(field.column.as_str());
        }
        if let Some(column) = self
            .associations
            .iter()
            .find(|a| a.name == name)
            .and_then(Association::fk_column)
        {
            return Ok(column);
        }
        if let Some(version) = self.version_column.as_deref().filter(|v| *v == name) {
            return Ok(version);
        }
        Err(OrmError::UnknownField {
            entity: self.name.clone(),
            field: name.to_string(),
        })
    }
}

/// Fluent builder for [`EntityMapping`].
#[derive(Debug)]
pub struct EntityMappingBuilder {
    mapping: EntityMapping,
}

impl EntityMappingBuilder {
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.mapping.table = table.into();
        self
    }

    pub fn id_column(mut self, column: impl Into<String>) -> Self {
        self.mapping.id_column = column.into();
        self
    }

    pub fn assigned_id(mut self) -> Self {
        self.mapping.id_strategy = IdStrategy::Assigned;
        self
    }

    pub fn version(mut self, column: impl Into<String>) -> Self {
        self.mapping.version_column = Some(column.into());
        self
    }

    pub fn field(mut self, field: FieldMapping) -> Self {
        self.mapping.fields.push(field);
        self
    }

    pub fn association(mut self, association: Association) -> Self {
        self.mapping.associations.push(association);
        self
    }

    pub fn business_key(mut self, fields: &[&str]) -> Self {
        self.mapping.business_key = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.mapping.batch_size = Some(size);
        self
    }

    /// Registers a lifecycle hook.
    pub fn on<F>(mut self, event: LifecycleEvent, hook: F) -> Self
    where
        F: Fn(&mut EntityData) -> HookResult + Send + Sync + 'static,
    {
        self.mapping.callbacks.register(event, Arc::new(hook));
        self
    }

    pub fn build(self) -> EntityMapping {
        self.mapping
    }
}
