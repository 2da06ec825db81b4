//! Unit of work scenarios: persist, find, query, commit, rollback, close.

use ntest::timeout;

use orm_core::mapping::LifecycleEvent;
use orm_core::storage::Direction;
use orm_core::types::Value;
use orm_core::{EntityState, OrmError, Query};

use crate::helpers::{element, fixture, node, seed};

#[timeout(1000)]
#[test]
fn test_parent_child_graph_round_trip() {
    let fx = fixture();
    let mut session = fx.factory.open_session().unwrap();
    let child = node(&mut session, "Child");
    let parent = node(&mut session, "Parent");
    session.set_to_one(child, "parent", Some(parent)).unwrap();
    for i in 0..3 {
        element(&mut session, child, &format!("e{}", i));
    }
    session.begin().unwrap();
    session.persist(child).unwrap();
    session.commit().unwrap();
    session.close().unwrap();
    assert_eq!(fx.driver.row_count("Node").unwrap(), 2);
    assert_eq!(fx.driver.row_count("Element").unwrap(), 3);

    let mut fresh = fx.factory.open_session().unwrap();
    let nodes = fresh
        .query(&Query::new("Node").order_by("id", Direction::Asc))
        .unwrap();
    assert_eq!(nodes.len(), 2);
    for n in &nodes {
        assert!(!fresh.is_initialized(*n, "elements").unwrap());
    }
    let names: Vec<Value> = nodes
        .iter()
        .map(|n| fresh.get(*n, "string").unwrap().clone())
        .collect();
    assert_eq!(names, vec![Value::from("Parent"), Value::from("Child")]);

    // The parent is already managed, so the child's proxy resolved on load.
    assert_eq!(fresh.to_one(nodes[1], "parent").unwrap(), Some(nodes[0]));
    assert_eq!(fresh.size(nodes[1], "elements").unwrap(), 3);
    assert_eq!(fresh.size(nodes[0], "elements").unwrap(), 0);
}

#[timeout(1000)]
#[test]
fn test_find_in_new_session_matches_business_key() {
    let fx = fixture();
    let mut session = fx.factory.open_session().unwrap();
    let original = node(&mut session, "alpha");
    element(&mut session, original, "e");
    session.begin().unwrap();
    session.persist(original).unwrap();
    session.commit().unwrap();
    let id = session.entity_id(original).unwrap().unwrap();
    let expected = session.business_key(original).unwrap();
    session.close().unwrap();

    let mut other = fx.factory.open_session().unwrap();
    let found = other.find("Node", id).unwrap().unwrap();
    assert_ne!(found.session(), original.session());
    assert_eq!(other.business_key(found).unwrap(), expected);
    assert!(!other.is_initialized(found, "elements").unwrap());
    assert_eq!(other.state(found).unwrap(), EntityState::Managed);
}

#[timeout(1000)]
#[test]
fn test_rollback_leaves_no_partial_writes() {
    let fx = fixture();
    seed(&fx.factory, &["kept"], 1);
    let before = fx.driver.counts();

    let mut session = fx.factory.open_session().unwrap();
    let n = node(&mut session, "discarded");
    element(&mut session, n, "e");
    session.begin().unwrap();
    session.persist(n).unwrap();
    session.flush().unwrap();
    assert_eq!(session.query(&Query::new("Node")).unwrap().len(), 2);
    session.rollback().unwrap();

    assert_eq!(fx.driver.row_count("Node").unwrap(), 1);
    assert_eq!(fx.driver.row_count("Element").unwrap(), 1);
    assert_eq!(fx.driver.counts().rollbacks, before.rollbacks + 1);
    assert_eq!(session.state(n).unwrap(), EntityState::Transient);

    // The rolled back graph can be persisted again.
    session.begin().unwrap();
    session.persist(n).unwrap();
    session.commit().unwrap();
    assert_eq!(fx.driver.row_count("Node").unwrap(), 2);
}

#[timeout(1000)]
#[test]
fn test_constraint_violation_surfaces_unchanged() {
    let fx = fixture();
    let ids = seed(&fx.factory, &["owner"], 0);

    let mut remover = fx.factory.open_session().unwrap();
    let doomed = remover.find("Node", ids[0]).unwrap().unwrap();
    remover.begin().unwrap();
    remover.remove(doomed).unwrap();

    let mut writer = fx.factory.open_session().unwrap();
    let owner = writer.find("Node", ids[0]).unwrap().unwrap();
    let added = element(&mut writer, owner, "late");
    writer.begin().unwrap();
    writer.persist(added).unwrap();
    writer.commit().unwrap();

    let err = remover.commit().unwrap_err();
    assert!(matches!(err, OrmError::ConstraintViolation { ref table, .. } if table == "Element"));
    assert_eq!(remover.state(doomed).unwrap(), EntityState::Detached);
    assert_eq!(fx.driver.row_count("Node").unwrap(), 1);
    assert_eq!(fx.driver.row_count("Element").unwrap(), 1);
}

#[timeout(1000)]
#[test]
fn test_remove_cascades_up_to_parent() {
    let fx = fixture();
    let mut session = fx.factory.open_session().unwrap();
    let parent = node(&mut session, "parent");
    element(&mut session, parent, "p0");
    let child = node(&mut session, "child");
    session.set_to_one(child, "parent", Some(parent)).unwrap();
    element(&mut session, child, "c0");
    element(&mut session, child, "c1");
    session.begin().unwrap();
    session.persist(child).unwrap();
    session.commit().unwrap();
    let child_id = session.entity_id(child).unwrap().unwrap();
    session.close().unwrap();
    assert_eq!(fx.driver.row_count("Node").unwrap(), 2);
    assert_eq!(fx.driver.row_count("Element").unwrap(), 3);
    fx.log.clear();

    let mut remover = fx.factory.open_session().unwrap();
    let found = remover.find("Node", child_id).unwrap().unwrap();
    remover.begin().unwrap();
    remover.remove(found).unwrap();
    let loaded_parent = remover.to_one(found, "parent").unwrap().unwrap();
    assert_eq!(remover.state(loaded_parent).unwrap(), EntityState::Removed);
    remover.commit().unwrap();

    assert_eq!(fx.driver.row_count("Node").unwrap(), 0);
    assert_eq!(fx.driver.row_count("Element").unwrap(), 0);
    assert_eq!(remover.statistics().deletes, 5);
    assert_eq!(fx.log.count(LifecycleEvent::PreRemove), 5);
    assert_eq!(fx.log.count(LifecycleEvent::PostRemove), 5);
}

#[timeout(1000)]
#[test]
fn test_detached_handle_cannot_be_persisted() {
    let fx = fixture();
    let ids = seed(&fx.factory, &["a"], 0);
    let mut session = fx.factory.open_session().unwrap();
    let n = session.find("Node", ids[0]).unwrap().unwrap();
    session.evict(n).unwrap();
    assert_eq!(session.state(n).unwrap(), EntityState::Detached);
    assert!(matches!(session.persist(n), Err(OrmError::IllegalState(_))));

    // A fresh instance is loaded after eviction.
    let again = session.find("Node", ids[0]).unwrap().unwrap();
    assert_ne!(again, n);
}

#[timeout(1000)]
#[test]
fn test_statistics_track_work() {
    let fx = fixture();
    seed(&fx.factory, &["a", "b"], 2);
    let mut session = fx.factory.open_session().unwrap();
    let nodes = session.query(&Query::new("Node")).unwrap();
    session.begin().unwrap();
    session.set(nodes[0], "string", "renamed").unwrap();
    session.remove(nodes[1]).unwrap();
    session.commit().unwrap();

    let stats = session.statistics();
    assert_eq!(stats.queries, 1);
    // two nodes, then all four elements in one batch for the cascade
    assert_eq!(stats.entity_loads, 6);
    assert_eq!(stats.updates, 1);
    assert_eq!(stats.deletes, 3);
    assert_eq!(stats.flushes, 1);
    assert_eq!(fx.driver.row_count("Node").unwrap(), 1);
    assert_eq!(fx.driver.row_count("Element").unwrap(), 2);
}
