//! Hook ordering across cascades, updates, removals and loads.

use ntest::timeout;

use orm_core::mapping::LifecycleEvent;
use orm_core::Query;

use crate::helpers::{element, fixture, node, seed};

#[timeout(1000)]
#[test]
fn test_cascaded_persist_fires_each_hook_once() {
    let fx = fixture();
    let mut session = fx.factory.open_session().unwrap();
    let parent = node(&mut session, "parent");
    for i in 0..3 {
        element(&mut session, parent, &format!("child-{}", i));
    }
    session.begin().unwrap();
    session.persist(parent).unwrap();

    // Top-down: the parent's pre-persist runs before any child's.
    assert_eq!(
        fx.log.entities(LifecycleEvent::PrePersist),
        vec!["Node", "Element", "Element", "Element"]
    );
    assert_eq!(fx.log.count(LifecycleEvent::PostPersist), 0);

    session.commit().unwrap();
    assert_eq!(fx.log.count(LifecycleEvent::PrePersist), 4);
    assert_eq!(fx.log.count(LifecycleEvent::PostPersist), 4);

    // Bottom-up: the parent's post-persist runs after every child insert.
    let post: Vec<String> = fx
        .log
        .calls()
        .into_iter()
        .filter(|(event, _, _)| *event == LifecycleEvent::PostPersist)
        .map(|(_, _, label)| label)
        .collect();
    assert_eq!(post, vec!["child-2", "child-1", "child-0", "parent"]);

    // A second commit without changes fires nothing.
    fx.log.clear();
    session.begin().unwrap();
    session.commit().unwrap();
    assert!(fx.log.calls().is_empty());
}

#[timeout(1000)]
#[test]
fn test_update_hooks_only_for_dirty_instances() {
    let fx = fixture();
    seed(&fx.factory, &["a", "b"], 0);
    let mut session = fx.factory.open_session().unwrap();
    let nodes = session.query(&Query::new("Node")).unwrap();
    assert_eq!(fx.log.count(LifecycleEvent::PostLoad), 2);

    fx.log.clear();
    session.begin().unwrap();
    session.set(nodes[1], "string", "b2").unwrap();
    session.commit().unwrap();
    assert_eq!(
        fx.log.calls(),
        vec![
            (LifecycleEvent::PreUpdate, "Node".to_string(), "b2".to_string()),
            (LifecycleEvent::PostUpdate, "Node".to_string(), "b2".to_string()),
        ]
    );
}

#[timeout(1000)]
#[test]
fn test_remove_hooks_children_deleted_first() {
    let fx = fixture();
    let ids = seed(&fx.factory, &["root"], 2);
    let mut session = fx.factory.open_session().unwrap();
    let root = session.find("Node", ids[0]).unwrap().unwrap();

    fx.log.clear();
    session.begin().unwrap();
    session.remove(root).unwrap();
    // Loading the collection for the cascade fires post-load for the elements.
    assert_eq!(fx.log.count(LifecycleEvent::PostLoad), 2);
    assert_eq!(
        fx.log.entities(LifecycleEvent::PreRemove),
        vec!["Node", "Element", "Element"]
    );
    session.commit().unwrap();
    assert_eq!(
        fx.log.entities(LifecycleEvent::PostRemove),
        vec!["Element", "Element", "Node"]
    );
}

#[timeout(1000)]
#[test]
fn test_post_load_fires_once_per_instance() {
    let fx = fixture();
    let ids = seed(&fx.factory, &["a"], 3);
    let mut session = fx.factory.open_session().unwrap();
    fx.log.clear();

    let n = session.find("Node", ids[0]).unwrap().unwrap();
    session.find("Node", ids[0]).unwrap();
    session.query(&Query::new("Node")).unwrap();
    assert_eq!(fx.log.count(LifecycleEvent::PostLoad), 1);

    session.size(n, "elements").unwrap();
    session.query(&Query::new("Element")).unwrap();
    assert_eq!(fx.log.count(LifecycleEvent::PostLoad), 4);
}
