use std::collections::HashMap;

use crate::error::OrmError;

use super::entity::EntityMapping;
use super::validation;

/// Validated, read-only set of entity mappings.
///
/// Built once before the session factory and shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct MappingRegistry {
    entities: HashMap<String, EntityMapping>,
}

impl MappingRegistry {
    pub fn builder() -> MappingRegistryBuilder {
        MappingRegistryBuilder {
            entities: Vec::new(),
        }
    }

    /// Looks up an entity mapping by name.
    pub fn get(&self, entity: &str) -> Result<&EntityMapping, OrmError> {
        self.entities
            .get(entity)
            .ok_or_else(|| OrmError::UnknownEntity(entity.to_string()))
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.entities.contains_key(entity)
    }

    /// Returns all entity names in sorted order.
    pub fn entity_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entities.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityMapping> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Collects entity mappings and validates them on `build`.
#[derive(Debug)]
pub struct MappingRegistryBuilder {
    entities: Vec<EntityMapping>,
}

impl MappingRegistryBuilder {
    pub fn entity(mut self, mapping: EntityMapping) -> Self {
        self.entities.push(mapping);
        self
    }

    /// Validates the collected mappings.
    ///
    /// # Returns
    /// `Result<MappingRegistry, OrmError>` containing the registry or the first mapping error.
    pub fn build(self) -> Result<MappingRegistry, OrmError> {
        let mut entities = HashMap::with_capacity(self.entities.len());
        let mut tables = std::collections::HashSet::new();
        for mapping in self.entities {
            if !tables.insert(mapping.table.clone()) {
                return Err(OrmError::InvalidMapping(format!(
                    "Table '{}' mapped by more than one entity",
                    mapping.table
                )));
            }
            if entities.contains_key(&mapping.name) {
                return Err(OrmError::InvalidMapping(format!(
                    "Entity '{}' mapped twice",
                    mapping.name
                )));
            }
            entities.insert(mapping.name.clone(), mapping);
        }
        validation::validate_mappings(&entities)?;
        tracing::debug!("Mapping registry built with {} entities", entities.len());
        Ok(MappingRegistry { entities })
    }
}
