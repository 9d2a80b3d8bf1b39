mod common;

use common::{male, OfflineGraph, ScriptedGraph};
use rusqlite::Connection;
use ydna_core::{
    find_root, locate_root, open_db_in_memory, FamilyListing, LocalStore, PaternalLink,
    RemoteError, RootFinderError, RootStatus, SqliteStore, TraversalService,
};

/// Caches profile-1 -> profile-2 -> profile-3 -> profile-4 with every
/// family marked fetched except the ones listed in `unfetched`.
fn cached_chain(conn: &Connection, unfetched: &[&str]) {
    let store = SqliteStore::try_new(conn).unwrap();
    let ids = ["profile-1", "profile-2", "profile-3", "profile-4"];
    for id in ids {
        store.put_profile(&male(id, id)).unwrap();
    }
    for pair in ids.windows(2) {
        store
            .put_paternal_link(&PaternalLink::discovered(pair[0], pair[1], 0))
            .unwrap();
    }
    for id in ids.iter().filter(|id| !unfetched.contains(*id)) {
        store.mark_family_fetched(id).unwrap();
    }
}

#[test]
fn cached_chain_resolves_without_remote_calls() {
    let conn = open_db_in_memory().unwrap();
    cached_chain(&conn, &[]);
    let mut traversal = TraversalService::new(SqliteStore::try_new(&conn).unwrap(), OfflineGraph);

    let location = find_root(&mut traversal, "profile-4", 50).unwrap();

    assert_eq!(location.root_id, "profile-1");
    assert_eq!(location.generations, 3);
    assert_eq!(
        location.chain,
        vec!["profile-4", "profile-3", "profile-2", "profile-1"]
    );
    assert_eq!(location.interrupted, None);
    assert_eq!(location.remote_calls, 0);
}

#[test]
fn chain_of_exactly_the_limit_still_resolves() {
    let conn = open_db_in_memory().unwrap();
    cached_chain(&conn, &[]);
    let mut traversal = TraversalService::new(SqliteStore::try_new(&conn).unwrap(), OfflineGraph);

    let location = find_root(&mut traversal, "profile-4", 3).unwrap();
    assert_eq!(location.root_id, "profile-1");
    assert_eq!(location.generations, 3);
}

#[test]
fn longer_chain_exceeds_the_limit() {
    let conn = open_db_in_memory().unwrap();
    cached_chain(&conn, &[]);
    let mut traversal = TraversalService::new(SqliteStore::try_new(&conn).unwrap(), OfflineGraph);

    let err = find_root(&mut traversal, "profile-4", 2).unwrap_err();
    match err {
        RootFinderError::DepthExceeded {
            deepest,
            generations,
        } => {
            assert_eq!(deepest, "profile-2");
            assert_eq!(generations, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn root_without_a_father_is_its_own_root() {
    let conn = open_db_in_memory().unwrap();
    cached_chain(&conn, &[]);
    let mut traversal = TraversalService::new(SqliteStore::try_new(&conn).unwrap(), OfflineGraph);

    let location = find_root(&mut traversal, "profile-1", 50).unwrap();
    assert_eq!(location.root_id, "profile-1");
    assert_eq!(location.generations, 0);
    assert_eq!(location.chain, vec!["profile-1"]);
}

#[test]
fn unfetched_top_is_fetched_once() {
    let conn = open_db_in_memory().unwrap();
    cached_chain(&conn, &["profile-1"]);
    let graph = ScriptedGraph::new().with_listing(
        "profile-1",
        FamilyListing::of(male("profile-1", "profile-1")).with_father(male("profile-0", "Elder")),
    );
    let mut traversal = TraversalService::new(SqliteStore::try_new(&conn).unwrap(), graph);

    let location = find_root(&mut traversal, "profile-4", 50).unwrap();

    assert_eq!(location.root_id, "profile-0");
    assert_eq!(location.generations, 4);
    // profile-1 and then profile-0, whose listing is unknown.
    assert_eq!(location.remote_calls, 2);
    assert_eq!(
        location.interrupted,
        Some(RemoteError::NotFound("profile-0".to_string()))
    );
}

#[test]
fn looping_chain_reports_the_cycle() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteStore::try_new(&conn).unwrap();
    store.put_profile(&male("profile-1", "A")).unwrap();
    store.put_profile(&male("profile-2", "B")).unwrap();
    store
        .put_paternal_link(&PaternalLink::discovered("profile-2", "profile-1", 0))
        .unwrap();
    store
        .put_paternal_link(&PaternalLink::discovered("profile-1", "profile-2", 0))
        .unwrap();
    let mut traversal = TraversalService::new(store, OfflineGraph);

    let err = find_root(&mut traversal, "profile-1", 50).unwrap_err();
    match err {
        RootFinderError::CycleDetected {
            revisited,
            last_acyclic,
            chain,
        } => {
            assert_eq!(revisited, "profile-1");
            assert_eq!(last_acyclic, "profile-2");
            assert_eq!(chain, vec!["profile-1", "profile-2"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn located_root_past_the_limit_is_the_deepest_profile() {
    let conn = open_db_in_memory().unwrap();
    cached_chain(&conn, &[]);
    let mut traversal = TraversalService::new(SqliteStore::try_new(&conn).unwrap(), OfflineGraph);

    let summary = locate_root(&mut traversal, "profile-4", 2).unwrap();

    assert_eq!(summary.root_id, "profile-2");
    assert_eq!(summary.generations_up, 2);
    assert_eq!(summary.status, RootStatus::DepthExceeded);
    assert_eq!(summary.remote_calls, 0);
}

#[test]
fn located_root_of_a_loop_stops_before_the_loop() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteStore::try_new(&conn).unwrap();
    store.put_profile(&male("profile-1", "A")).unwrap();
    store.put_profile(&male("profile-2", "B")).unwrap();
    store
        .put_paternal_link(&PaternalLink::discovered("profile-2", "profile-1", 0))
        .unwrap();
    store
        .put_paternal_link(&PaternalLink::discovered("profile-1", "profile-2", 0))
        .unwrap();
    let mut traversal = TraversalService::new(store, OfflineGraph);

    let summary = locate_root(&mut traversal, "profile-1", 50).unwrap();

    assert_eq!(summary.root_id, "profile-2");
    assert_eq!(summary.generations_up, 1);
    assert_eq!(
        summary.status,
        RootStatus::CycleDetected {
            revisited: "profile-1".to_string()
        }
    );
}
