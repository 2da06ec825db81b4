//! Serializable form of a mapping registry.
//!
//! Hooks are code and are not part of the schema; a registry loaded from a
//! schema file has no lifecycle callbacks.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{classify_io_error, OrmError};
use crate::types::ValueKind;

use super::association::{Association, AssociationKind, CascadeOp, CascadeSet, FetchType};
use super::entity::{EntityMapping, IdStrategy};
use super::field::FieldMapping;
use super::registry::MappingRegistry;

/// Current schema file version.
pub const SCHEMA_VERSION: u32 = 1;

/// Mapping schema file format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingSchema {
    /// Schema version
    pub version: u32,
    /// Entity definitions by name
    pub entities: BTreeMap<String, EntitySchema>,
}

/// Entity definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub table: String,
    pub id_column: String,
    pub id_strategy: IdStrategy,
    #[serde(default)]
    pub version_column: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
    #[serde(default)]
    pub associations: Vec<AssociationSchema>,
    #[serde(default)]
    pub business_key: Vec<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

/// Field definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub column: String,
    pub r#type: ValueKind,
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
}

/// Association definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationSchema {
    pub name: String,
    pub target: String,
    pub kind: AssociationKind,
    pub fetch: FetchType,
    #[serde(default)]
    pub cascade: Vec<CascadeOp>,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

impl MappingSchema {
    /// Exports a registry.
    pub fn from_registry(registry: &MappingRegistry) -> Self {
        let entities = registry
            .entities()
            .map(|mapping| (mapping.name.clone(), EntitySchema::from(mapping)))
            .collect();
        Self {
            version: SCHEMA_VERSION,
            entities,
        }
    }

    /// Builds and validates a registry from this schema.
    pub fn into_registry(self) -> Result<MappingRegistry, OrmError> {
        if self.version != SCHEMA_VERSION {
            return Err(OrmError::InvalidMapping(format!(
                "Unsupported schema version {} (expected {})",
                self.version, SCHEMA_VERSION
            )));
        }
        self.entities
            .into_iter()
            .fold(MappingRegistry::builder(), |builder, (name, entity)| {
                builder.entity(entity.into_mapping(name))
            })
            .build()
    }

    /// Reads a schema from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, OrmError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| classify_io_error(e, &format!("reading schema {}", path.display())))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Writes the schema as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), OrmError> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
            .map_err(|e| classify_io_error(e, &format!("writing schema {}", path.display())))
    }
}

impl From<&EntityMapping> for EntitySchema {
    fn from(mapping: &EntityMapping) -> Self {
        Self {
            table: mapping.table.clone(),
            id_column: mapping.id_column.clone(),
            id_strategy: mapping.id_strategy,
            version_column: mapping.version_column.clone(),
            fields: mapping
                .fields
                .iter()
                .map(|f| FieldSchema {
                    name: f.name.clone(),
                    column: f.column.clone(),
                    r#type: f.kind,
                    nullable: f.nullable,
                    unique: f.unique,
                })
                .collect(),
            associations: mapping
                .associations
                .iter()
                .map(|a| AssociationSchema {
                    name: a.name.clone(),
                    target: a.target.clone(),
                    kind: a.kind.clone(),
                    fetch: a.fetch,
                    cascade: a.cascade.ops(),
                    batch_size: a.batch_size,
                })
                .collect(),
            business_key: mapping.business_key.clone(),
            batch_size: mapping.batch_size,
        }
    }
}

impl EntitySchema {
    fn into_mapping(self, name: String) -> EntityMapping {
        let mut builder = EntityMapping::builder(name)
            .table(self.table)
            .id_column(self.id_column);
        if self.id_strategy == IdStrategy::Assigned {
            builder = builder.assigned_id();
        }
        if let Some(version) = self.version_column {
            builder = builder.version(version);
        }
        if let Some(size) = self.batch_size {
            builder = builder.batch_size(size);
        }
        for f in self.fields {
            let mut field = FieldMapping::new(f.name, f.r#type).column(f.column);
            field.nullable = f.nullable;
            field.unique = f.unique;
            builder = builder.field(field);
        }
        for a in self.associations {
            builder = builder.association(Association {
                name: a.name,
                target: a.target,
                kind: a.kind,
                fetch: a.fetch,
                cascade: CascadeSet::from_ops(&a.cascade),
                batch_size: a.batch_size,
            });
        }
        let key: Vec<&str> = self.business_key.iter().map(String::as_str).collect();
        builder.business_key(&key).build()
    }
}
