//! Shared fixtures: a `Node`/`Element` model with recording hooks.

use std::sync::{Arc, Mutex};

use orm_core::mapping::{
    Association, CascadeSet, EntityMapping, FieldMapping, HookResult, LifecycleEvent, MappingRegistry,
};
use orm_core::session::EntityData;
use orm_core::storage::MemoryDriver;
use orm_core::types::ValueKind;
use orm_core::{EntityHandle, OrmConfig, Session, SessionFactory};

/// Hook invocations as `(event, entity, string field)` in firing order.
#[derive(Debug, Clone, Default)]
pub struct HookLog {
    calls: Arc<Mutex<Vec<(LifecycleEvent, String, String)>>>,
}

impl HookLog {
    fn recorder(&self, event: LifecycleEvent) -> impl Fn(&mut EntityData) -> HookResult + Send + Sync {
        let calls = Arc::clone(&self.calls);
        move |data: &mut EntityData| {
            let label = data.get("string").as_str().unwrap_or_default().to_string();
            calls.lock().unwrap().push((event, data.entity.clone(), label));
            Ok(())
        }
    }

    pub fn calls(&self) -> Vec<(LifecycleEvent, String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, event: LifecycleEvent) -> usize {
        self.calls().iter().filter(|(e, _, _)| *e == event).count()
    }

    /// Entity names seen for `event`, in order.
    pub fn entities(&self, event: LifecycleEvent) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(e, _, _)| *e == event)
            .map(|(_, entity, _)| entity)
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

const EVENTS: [LifecycleEvent; 7] = [
    LifecycleEvent::PrePersist,
    LifecycleEvent::PostPersist,
    LifecycleEvent::PreUpdate,
    LifecycleEvent::PostUpdate,
    LifecycleEvent::PreRemove,
    LifecycleEvent::PostRemove,
    LifecycleEvent::PostLoad,
];

/// `Node` has a cascaded parent and owns a cascaded, lazily loaded
/// `elements` collection with batch size 5.
pub fn registry(log: &HookLog) -> Arc<MappingRegistry> {
    let mut node = EntityMapping::builder("Node")
        .version("version")
        .field(FieldMapping::new("string", ValueKind::Text))
        .association(
            Association::many_to_one("parent", "Node")
                .cascade(CascadeSet::PERSIST | CascadeSet::REFRESH | CascadeSet::MERGE | CascadeSet::REMOVE),
        )
        .association(
            Association::one_to_many("elements", "Element", "node")
                .cascade(CascadeSet::ALL)
                .batch_size(5),
        )
        .business_key(&["string"])
        .batch_size(5);
    let mut element = EntityMapping::builder("Element")
        .field(FieldMapping::new("string", ValueKind::Text))
        .association(Association::many_to_one("node", "Node"));
    for event in EVENTS {
        node = node.on(event, log.recorder(event));
        element = element.on(event, log.recorder(event));
    }

    Arc::new(
        MappingRegistry::builder()
            .entity(node.build())
            .entity(element.build())
            .build()
            .unwrap(),
    )
}

pub struct Fixture {
    pub factory: SessionFactory,
    pub driver: MemoryDriver,
    pub log: HookLog,
}

pub fn fixture() -> Fixture {
    fixture_with(OrmConfig::default())
}

pub fn fixture_with(config: OrmConfig) -> Fixture {
    let log = HookLog::default();
    let registry = registry(&log);
    let driver = MemoryDriver::with_mapping(&registry).unwrap();
    let factory = SessionFactory::new(registry, Arc::new(driver.clone()), config).unwrap();
    Fixture { factory, driver, log }
}

pub fn node(session: &mut Session, name: &str) -> EntityHandle {
    let handle = session.create("Node").unwrap();
    session.set(handle, "string", name).unwrap();
    handle
}

/// Creates an element owned by `owner` on both sides of the association.
pub fn element(session: &mut Session, owner: EntityHandle, name: &str) -> EntityHandle {
    let handle = session.create("Element").unwrap();
    session.set(handle, "string", name).unwrap();
    session.set_to_one(handle, "node", Some(owner)).unwrap();
    session.add_to_many(owner, "elements", handle).unwrap();
    handle
}

/// Stores one node per name, each with `elements` elements. Returns the ids.
pub fn seed(factory: &SessionFactory, names: &[&str], elements: usize) -> Vec<i64> {
    let mut session = factory.open_session().unwrap();
    session.begin().unwrap();
    let mut handles = Vec::new();
    for name in names {
        let n = node(&mut session, name);
        for i in 0..elements {
            element(&mut session, n, &format!("{}-{}", name, i));
        }
        session.persist(n).unwrap();
        handles.push(n);
    }
    session.commit().unwrap();
    handles
        .into_iter()
        .map(|h| session.entity_id(h).unwrap().unwrap())
        .collect()
}
