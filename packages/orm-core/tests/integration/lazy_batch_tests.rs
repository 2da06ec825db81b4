//! Lazy association round-trips and batch fetching, counted at the driver.

use ntest::timeout;

use orm_core::session::Lazy;
use orm_core::storage::Direction;
use orm_core::{BatchFetchStyle, OrmConfig, OrmError, Query};

use crate::helpers::{fixture, fixture_with, seed};

#[timeout(1000)]
#[test]
fn test_initialization_check_never_fetches() {
    let fx = fixture();
    let ids = seed(&fx.factory, &["a"], 2);
    let mut session = fx.factory.open_session().unwrap();
    let n = session.find("Node", ids[0]).unwrap().unwrap();

    fx.driver.reset_counts();
    for _ in 0..3 {
        assert!(!session.is_initialized(n, "elements").unwrap());
    }
    assert_eq!(fx.driver.counts().statements(), 0);
    assert_eq!(session.statistics().collection_fetches, 0);
}

#[timeout(1000)]
#[test]
fn test_collection_resolves_exactly_once() {
    let fx = fixture();
    let ids = seed(&fx.factory, &["a"], 3);
    let mut session = fx.factory.open_session().unwrap();
    let n = session.find("Node", ids[0]).unwrap().unwrap();

    fx.driver.reset_counts();
    let members = session.to_many(n, "elements").unwrap();
    assert_eq!(members.len(), 3);
    assert_eq!(session.size(n, "elements").unwrap(), 3);
    assert!(session.contains(n, "elements", members[0]).unwrap());
    assert!(session.is_initialized(n, "elements").unwrap());
    assert_eq!(fx.driver.counts().selects, 1);
    assert_eq!(session.statistics().collections_initialized, 1);

    // Members point back at the managed owner without another fetch.
    assert_eq!(session.to_one(members[0], "node").unwrap(), Some(n));
    assert_eq!(fx.driver.counts().selects, 1);
}

#[timeout(1000)]
#[test]
fn test_five_sibling_collections_share_one_fetch() {
    let fx = fixture();
    seed(&fx.factory, &["a", "b", "c", "d", "e"], 2);
    let mut session = fx.factory.open_session().unwrap();
    let nodes = session
        .query(&Query::new("Node").order_by("id", Direction::Asc))
        .unwrap();
    assert_eq!(nodes.len(), 5);

    fx.driver.reset_counts();
    assert_eq!(session.size(nodes[2], "elements").unwrap(), 2);
    for n in &nodes {
        assert!(session.is_initialized(*n, "elements").unwrap());
    }
    for n in &nodes {
        assert_eq!(session.size(*n, "elements").unwrap(), 2);
    }
    assert_eq!(fx.driver.counts().selects, 1);
    let stats = session.statistics();
    assert_eq!(stats.collection_fetches, 1);
    assert_eq!(stats.batch_fetches, 1);
    assert_eq!(stats.collections_initialized, 5);
}

#[timeout(1000)]
#[test]
fn test_batches_are_bounded_by_batch_size() {
    let fx = fixture();
    let names: Vec<String> = (0..7).map(|i| format!("n{}", i)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    seed(&fx.factory, &refs, 1);
    let mut session = fx.factory.open_session().unwrap();
    let nodes = session
        .query(&Query::new("Node").order_by("id", Direction::Asc))
        .unwrap();

    fx.driver.reset_counts();
    session.size(nodes[0], "elements").unwrap();
    let initialized = nodes
        .iter()
        .filter(|n| session.is_initialized(**n, "elements").unwrap())
        .count();
    assert_eq!(initialized, 5);
    for n in &nodes {
        session.size(*n, "elements").unwrap();
    }
    assert_eq!(fx.driver.counts().selects, 2);
}

#[timeout(1000)]
#[test]
fn test_padded_batches_return_the_same_members() {
    let fx = fixture_with(OrmConfig {
        batch_fetch_style: BatchFetchStyle::Padded,
        ..OrmConfig::default()
    });
    seed(&fx.factory, &["a", "b"], 3);
    let mut session = fx.factory.open_session().unwrap();
    let nodes = session.query(&Query::new("Node")).unwrap();

    fx.driver.reset_counts();
    assert_eq!(session.size(nodes[0], "elements").unwrap(), 3);
    assert_eq!(session.size(nodes[1], "elements").unwrap(), 3);
    assert_eq!(fx.driver.counts().selects, 1);
}

#[timeout(1000)]
#[test]
fn test_to_one_proxies_share_one_fetch() {
    let fx = fixture();
    seed(&fx.factory, &["a", "b", "c"], 1);
    let mut session = fx.factory.open_session().unwrap();
    let elements = session
        .query(&Query::new("Element").order_by("id", Direction::Asc))
        .unwrap();
    for e in &elements {
        assert!(matches!(session.peek_to_one(*e, "node").unwrap(), Lazy::Unresolved(_)));
    }

    fx.driver.reset_counts();
    let owners: Vec<_> = elements
        .iter()
        .map(|e| session.to_one(*e, "node").unwrap().unwrap())
        .collect();
    assert_eq!(owners.len(), 3);
    assert_eq!(fx.driver.counts().selects, 1);
    assert_eq!(session.managed_count(), 6);
}

#[timeout(1000)]
#[test]
fn test_lazy_access_after_close_fails() {
    let fx = fixture();
    let ids = seed(&fx.factory, &["a"], 1);
    let mut session = fx.factory.open_session().unwrap();
    let n = session.find("Node", ids[0]).unwrap().unwrap();
    let element = session.query(&Query::new("Element")).unwrap()[0];
    session.close().unwrap();

    fx.driver.reset_counts();
    assert!(matches!(
        session.to_many(n, "elements"),
        Err(OrmError::DetachedEntity { .. })
    ));
    assert!(matches!(
        session.contains(n, "elements", element),
        Err(OrmError::DetachedEntity { .. })
    ));
    assert!(!session.is_initialized(n, "elements").unwrap());
    assert_eq!(fx.driver.counts().statements(), 0);

    // Associations resolved before closing stay readable.
    assert_eq!(session.to_one(element, "node").unwrap(), Some(n));
}
