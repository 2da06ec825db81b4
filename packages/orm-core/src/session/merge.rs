//! Detached object graphs: export from one session, merge into another.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{OrmError, Result};
use crate::mapping::{CascadeOp, IdStrategy};
use crate::types::Value;

use super::entity::EntityHandle;
use super::lazy::{AssociationValue, Lazy};
use super::Session;

/// One instance of a detached graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetachedEntity {
    pub entity: String,
    pub id: Option<i64>,
    pub version: Option<i64>,
    pub fields: BTreeMap<String, Value>,
    /// Resolved to-one associations as node indices
    #[serde(default)]
    pub to_one: BTreeMap<String, Option<usize>>,
    /// Initialized collections as node indices
    #[serde(default)]
    pub to_many: BTreeMap<String, Vec<usize>>,
}

/// Session-independent copy of an instance and everything it reaches
/// through resolved associations.
///
/// Associations that were never resolved are left out, so merging leaves
/// them untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetachedGraph {
    /// Index of the exported instance
    pub root: usize,
    pub nodes: Vec<DetachedEntity>,
}

impl DetachedGraph {
    pub fn root(&self) -> Option<&DetachedEntity> {
        self.nodes.get(self.root)
    }

    pub fn root_mut(&mut self) -> Option<&mut DetachedEntity> {
        self.nodes.get_mut(self.root)
    }

    /// Index of the node with this identity.
    pub fn position(&self, entity: &str, id: i64) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.entity == entity && n.id == Some(id))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Nodes of the graph being merged mapped to their managed slots.
#[derive(Default)]
struct MergeContext {
    merged: HashMap<usize, usize>,
    created: Vec<usize>,
}

impl Session {
    /// Exports an instance and its resolved associations.
    ///
    /// Works on closed sessions too; nothing is loaded.
    pub fn snapshot(&self, handle: EntityHandle) -> Result<DetachedGraph> {
        let root = self.slot(handle)?;
        let mut index: HashMap<usize, usize> = HashMap::from([(root, 0)]);
        let mut order = vec![root];
        let mut cursor = 0;
        while cursor < order.len() {
            let slot = order[cursor];
            cursor += 1;
            for value in self.entries[slot].associations.values() {
                for target in value.resolved_handles() {
                    let target = self.slot(target)?;
                    if !index.contains_key(&target) {
                        index.insert(target, order.len());
                        order.push(target);
                    }
                }
            }
        }

        let nodes = order
            .iter()
            .map(|&slot| {
                let entry = &self.entries[slot];
                let mut to_one = BTreeMap::new();
                let mut to_many = BTreeMap::new();
                for (name, value) in &entry.associations {
                    match value {
                        AssociationValue::ToOne(Lazy::Resolved(target)) => {
                            to_one.insert(name.clone(), target.and_then(|t| index.get(&t.slot).copied()));
                        }
                        AssociationValue::ToMany(Lazy::Resolved(members)) => {
                            let members = members.iter().filter_map(|m| index.get(&m.slot).copied()).collect();
                            to_many.insert(name.clone(), members);
                        }
                        _ => {}
                    }
                }
                DetachedEntity {
                    entity: entry.data.entity.clone(),
                    id: entry.data.id,
                    version: entry.data.version,
                    fields: entry.data.fields.clone(),
                    to_one,
                    to_many,
                }
            })
            .collect();
        Ok(DetachedGraph { root: 0, nodes })
    }

    /// Copies a detached graph onto managed instances.
    ///
    /// Each node with an id is matched to the managed instance with that
    /// identity, loading it if needed; nodes without a stored row become new
    /// instances and are persisted. Associations with `MERGE` cascade are
    /// merged recursively, others are resolved by identity.
    ///
    /// # Returns
    /// `Result<EntityHandle>` of the managed instance for the root node.
    ///
    /// # Errors
    /// `OptimisticLock` when a node's version differs from the managed one;
    /// `TransientReference` for a non-cascaded reference to a node without id.
    pub fn merge(&mut self, graph: &DetachedGraph) -> Result<EntityHandle> {
        self.ensure_open()?;
        let mut context = MergeContext::default();
        let root = self.merge_node(graph, graph.root, &mut context)?;
        let mut visited = HashSet::new();
        for slot in context.created {
            self.cascade_persist(slot, &mut visited)?;
        }
        Ok(self.handle(root))
    }

    fn merge_node(&mut self, graph: &DetachedGraph, index: usize, context: &mut MergeContext) -> Result<usize> {
        if let Some(&slot) = context.merged.get(&index) {
            return Ok(slot);
        }
        let node = graph
            .nodes
            .get(index)
            .ok_or_else(|| OrmError::illegal_state("detached graph references a missing node"))?;
        let registry = self.registry();
        let mapping = registry.get(&node.entity)?;

        let existing = match node.id {
            Some(id) => self.find(&node.entity, id)?,
            None => None,
        };
        let handle = match existing {
            Some(handle) => {
                let current = self.entries[handle.slot].data.version;
                if mapping.version_column.is_some() && node.version.is_some() && node.version != current {
                    return Err(OrmError::OptimisticLock {
                        entity: node.entity.clone(),
                        id: node.id.unwrap_or_default(),
                    });
                }
                handle
            }
            None => {
                let handle = self.create(&node.entity)?;
                if let (IdStrategy::Assigned, Some(id)) = (mapping.id_strategy, node.id) {
                    self.set_id(handle, id)?;
                }
                context.created.push(handle.slot);
                handle
            }
        };
        context.merged.insert(index, handle.slot);

        for (field, value) in &node.fields {
            self.set(handle, field, value.clone())?;
        }
        for (name, target) in &node.to_one {
            let cascade = mapping.association(name)?.cascade.contains(CascadeOp::Merge);
            let target = match target {
                Some(target) => Some(self.merge_reference(graph, *target, cascade, &node.entity, name, context)?),
                None => None,
            };
            self.set_to_one(handle, name, target)?;
        }
        for (name, members) in &node.to_many {
            let cascade = mapping.association(name)?.cascade.contains(CascadeOp::Merge);
            let mut handles = Vec::with_capacity(members.len());
            for member in members {
                handles.push(self.merge_reference(graph, *member, cascade, &node.entity, name, context)?);
            }
            self.entries[handle.slot]
                .associations
                .insert(name.clone(), AssociationValue::ToMany(Lazy::Resolved(handles)));
        }
        Ok(handle.slot)
    }

    fn merge_reference(
        &mut self,
        graph: &DetachedGraph,
        index: usize,
        cascade: bool,
        owner: &str,
        association: &str,
        context: &mut MergeContext,
    ) -> Result<EntityHandle> {
        if cascade {
            let slot = self.merge_node(graph, index, context)?;
            return Ok(self.handle(slot));
        }
        if let Some(&slot) = context.merged.get(&index) {
            return Ok(self.handle(slot));
        }
        let node = graph
            .nodes
            .get(index)
            .ok_or_else(|| OrmError::illegal_state("detached graph references a missing node"))?;
        let id = node.id.ok_or_else(|| OrmError::TransientReference {
            entity: owner.to_string(),
            association: association.to_string(),
            target: node.entity.clone(),
        })?;
        self.find(&node.entity, id)?.ok_or_else(|| OrmError::EntityNotFound {
            entity: node.entity.clone(),
            id,
        })
    }
}
