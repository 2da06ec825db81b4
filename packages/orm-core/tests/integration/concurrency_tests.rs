//! Concurrent sessions sharing one factory and driver.

use std::sync::{Arc, Barrier};
use std::thread;

use ntest::timeout;

use orm_core::types::Value;
use orm_core::{OrmError, Query};

use crate::helpers::{element, fixture, node, seed};

#[timeout(5000)]
#[test]
fn test_conflicting_updates_fail_in_one_session_only() {
    let fx = fixture();
    let id = seed(&fx.factory, &["shared"], 0)[0];
    let barrier = Arc::new(Barrier::new(2));

    let workers: Vec<_> = ["left", "right"]
        .into_iter()
        .map(|name| {
            let factory = fx.factory.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Result<(), OrmError> {
                let mut session = factory.open_session()?;
                let n = session
                    .find("Node", id)?
                    .ok_or_else(|| OrmError::IllegalState("row vanished".to_string()))?;
                barrier.wait();
                session.begin()?;
                session.set(n, "string", name)?;
                session.commit()
            })
        })
        .collect();

    let results: Vec<Result<(), OrmError>> = workers
        .into_iter()
        .map(|w| w.join().unwrap())
        .collect();
    let committed = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(OrmError::OptimisticLock { .. })))
        .count();
    assert_eq!((committed, conflicts), (1, 1));

    let row = fx.driver.committed_row("Node", id).unwrap().unwrap();
    assert_eq!(row.get("version"), Some(&Value::Int(1)));
}

#[timeout(5000)]
#[test]
fn test_sessions_load_distinct_instances() {
    let fx = fixture();
    let id = seed(&fx.factory, &["shared"], 0)[0];

    let mut first = fx.factory.open_session().unwrap();
    let mut second = fx.factory.open_session().unwrap();
    let a = first.find("Node", id).unwrap().unwrap();
    let b = second.find("Node", id).unwrap().unwrap();
    assert_ne!(a.session(), b.session());

    first.set(a, "string", "local").unwrap();
    assert_eq!(second.get(b, "string").unwrap(), &Value::from("shared"));
}

#[timeout(5000)]
#[test]
fn test_parallel_writers_on_disjoint_rows() {
    let fx = fixture();
    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let factory = fx.factory.clone();
            thread::spawn(move || -> Result<(), OrmError> {
                let mut session = factory.open_session()?;
                for round in 0..5 {
                    session.begin()?;
                    let n = node(&mut session, &format!("w{}-{}", worker, round));
                    element(&mut session, n, "e");
                    session.persist(n)?;
                    session.commit()?;
                }
                session.close()
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap().unwrap();
    }

    assert_eq!(fx.driver.row_count("Node").unwrap(), 20);
    assert_eq!(fx.driver.row_count("Element").unwrap(), 20);
    let mut session = fx.factory.open_session().unwrap();
    let nodes = session.query(&Query::new("Node")).unwrap();
    let mut ids: Vec<i64> = nodes
        .iter()
        .map(|n| session.entity_id(*n).unwrap().unwrap())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 20);
}
