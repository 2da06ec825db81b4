//! Mapping validation run once when a registry is built.

use std::collections::{HashMap, HashSet};

use crate::error::OrmError;

use super::association::AssociationKind;
use super::entity::EntityMapping;

/// Validates every entity mapping and the edges between them.
///
/// # Arguments
/// * `entities` - Entity mappings by name
///
/// # Returns
/// `Result<(), OrmError>` indicating success or the first violation found.
pub(crate) fn validate_mappings(entities: &HashMap<String, EntityMapping>) -> Result<(), OrmError> {
    for mapping in entities.values() {
        validate_entity(mapping)?;
    }

    // Edges are checked after every entity is known
    for mapping in entities.values() {
        validate_associations(mapping, entities)?;
    }

    Ok(())
}

/// Validates a single entity's columns, names and batch size.
fn validate_entity(mapping: &EntityMapping) -> Result<(), OrmError> {
    if mapping.table.is_empty() {
        return Err(OrmError::InvalidMapping(format!(
            "Entity '{}' has an empty table name",
            mapping.name
        )));
    }

    if mapping.batch_size == Some(0) {
        return Err(OrmError::InvalidMapping(format!(
            "Entity '{}' has batch size 0",
            mapping.name
        )));
    }

    // Field and association names share one namespace
    let mut seen_names = HashSet::new();
    for name in mapping
        .fields
        .iter()
        .map(|f| &f.name)
        .chain(mapping.associations.iter().map(|a| &a.name))
    {
        if name == "id" || !seen_names.insert(name) {
            return Err(OrmError::InvalidMapping(format!(
                "Duplicate or reserved property name '{}' on entity '{}'",
                name, mapping.name
            )));
        }
    }

    // Columns must not collide with id, version or foreign keys
    let mut seen_columns = HashSet::new();
    seen_columns.insert(mapping.id_column.as_str());
    if let Some(version) = &mapping.version_column {
        if !seen_columns.insert(version.as_str()) {
            return Err(OrmError::InvalidMapping(format!(
                "Version column '{}' collides with the id column on '{}'",
                version, mapping.name
            )));
        }
    }
    let columns = mapping
        .fields
        .iter()
        .map(|f| f.column.as_str())
        .chain(mapping.associations.iter().filter_map(|a| a.fk_column()));
    for column in columns {
        if !seen_columns.insert(column) {
            return Err(OrmError::InvalidMapping(format!(
                "Column '{}' mapped twice on entity '{}'",
                column, mapping.name
            )));
        }
    }

    for key_field in &mapping.business_key {
        if !mapping.fields.iter().any(|f| &f.name == key_field) {
            return Err(OrmError::InvalidMapping(format!(
                "Business key field '{}' is not a mapped field of '{}'",
                key_field, mapping.name
            )));
        }
    }

    Ok(())
}

/// Validates association targets and inverse sides.
fn validate_associations(
    mapping: &EntityMapping,
    entities: &HashMap<String, EntityMapping>,
) -> Result<(), OrmError> {
    for association in &mapping.associations {
        let target = entities.get(&association.target).ok_or_else(|| {
            OrmError::InvalidMapping(format!(
                "Association '{}.{}' targets unmapped entity '{}'",
                mapping.name, association.name, association.target
            ))
        })?;

        if association.batch_size == Some(0) {
            return Err(OrmError::InvalidMapping(format!(
                "Association '{}.{}' has batch size 0",
                mapping.name, association.name
            )));
        }

        if let AssociationKind::OneToMany { mapped_by } = &association.kind {
            let inverse = target
                .associations
                .iter()
                .find(|a| &a.name == mapped_by)
                .ok_or_else(|| {
                    OrmError::InvalidMapping(format!(
                        "'{}.{}' is mapped by '{}.{}' which does not exist",
                        mapping.name, association.name, target.name, mapped_by
                    ))
                })?;
            if !inverse.is_to_one() || inverse.target != mapping.name {
                return Err(OrmError::InvalidMapping(format!(
                    "'{}.{}' must be a many-to-one to '{}'",
                    target.name, mapped_by, mapping.name
                )));
            }
        }
    }
    Ok(())
}
