//! Parent/child scenario run by `orm-tool demo`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use orm_core::mapping::{
    Association, CascadeSet, EntityMapping, FieldMapping, HookResult, LifecycleEvent, MappingRegistry,
};
use orm_core::session::EntityData;
use orm_core::storage::{Direction, MemoryDriver};
use orm_core::types::ValueKind;
use orm_core::{OrmConfig, Query, SessionFactory};
use serde_json::json;

/// Hook invocations per event name.
pub type HookCounts = Arc<Mutex<BTreeMap<String, usize>>>;

const EVENTS: [LifecycleEvent; 7] = [
    LifecycleEvent::PrePersist,
    LifecycleEvent::PostPersist,
    LifecycleEvent::PreUpdate,
    LifecycleEvent::PostUpdate,
    LifecycleEvent::PreRemove,
    LifecycleEvent::PostRemove,
    LifecycleEvent::PostLoad,
];

/// `Node` with a cascaded parent and an owned `elements` collection.
/// With `counts`, every hook invocation is tallied there.
pub fn registry(counts: Option<&HookCounts>) -> Result<MappingRegistry> {
    let mut node = EntityMapping::builder("Node")
        .version("version")
        .field(FieldMapping::new("string", ValueKind::Text).not_null())
        .association(
            Association::many_to_one("parent", "Node")
                .cascade(CascadeSet::PERSIST | CascadeSet::MERGE | CascadeSet::REFRESH),
        )
        .association(Association::one_to_many("elements", "Element", "node").cascade(CascadeSet::ALL))
        .business_key(&["string"]);
    let mut element = EntityMapping::builder("Element").association(Association::many_to_one("node", "Node"));

    if let Some(counts) = counts {
        for event in EVENTS {
            node = node.on(event, counter(counts, event));
            element = element.on(event, counter(counts, event));
        }
    }
    MappingRegistry::builder()
        .entity(node.build())
        .entity(element.build())
        .build()
        .context("Demo mapping is invalid")
}

fn counter(
    counts: &HookCounts,
    event: LifecycleEvent,
) -> impl Fn(&mut EntityData) -> HookResult + Send + Sync {
    let counts = Arc::clone(counts);
    move |_: &mut EntityData| {
        let mut counts = counts.lock().map_err(|_| "hook counter poisoned")?;
        *counts.entry(event.to_string()).or_default() += 1;
        Ok(())
    }
}

/// Persists `nodes` child nodes, each with a parent and `children` elements,
/// then reloads them in a fresh session and initializes every collection.
pub fn run(config: OrmConfig, nodes: usize, children: usize) -> Result<serde_json::Value> {
    let counts = HookCounts::default();
    let registry = Arc::new(registry(Some(&counts))?);
    let driver = MemoryDriver::with_mapping(&registry)?;
    let factory = SessionFactory::new(registry, Arc::new(driver.clone()), config)?;

    let mut session = factory.open_session()?;
    session.begin()?;
    for i in 0..nodes {
        let parent = session.create("Node")?;
        session.set(parent, "string", format!("Parent {}", i))?;
        let child = session.create("Node")?;
        session.set(child, "string", format!("Child {}", i))?;
        session.set_to_one(child, "parent", Some(parent))?;
        for _ in 0..children {
            let element = session.create("Element")?;
            session.set_to_one(element, "node", Some(child))?;
            session.add_to_many(child, "elements", element)?;
        }
        session.persist(child)?;
    }
    session.commit()?;
    session.close()?;
    tracing::info!("Stored {} node pairs with {} elements each", nodes, children);

    let mut reader = factory.open_session()?;
    let loaded = reader.query(&Query::new("Node").order_by("id", Direction::Asc))?;
    let mut initialized_after_query = 0;
    for handle in &loaded {
        if reader.is_initialized(*handle, "elements")? {
            initialized_after_query += 1;
        }
    }

    driver.reset_counts();
    let mut elements = 0;
    for handle in &loaded {
        elements += reader.size(*handle, "elements")?;
    }
    let collection_statements = driver.counts().statements();
    let statistics = reader.statistics();
    reader.close()?;

    let hooks = counts
        .lock()
        .map_err(|_| anyhow::anyhow!("hook counter poisoned"))?
        .clone();
    Ok(json!({
        "nodes_loaded": loaded.len(),
        "collections_initialized_after_query": initialized_after_query,
        "elements_loaded": elements,
        "collection_statements": collection_statements,
        "batch_size": factory.config().default_batch_size,
        "batch_fetch_style": factory.config().batch_fetch_style,
        "hooks": hooks,
        "session": statistics,
        "driver": driver.counts(),
    }))
}
