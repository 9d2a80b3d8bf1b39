mod common;

use common::{female, male, OfflineGraph, ScriptedGraph};
use rusqlite::Connection;
use ydna_core::service::propagation::{LineageRole, RootStatus};
use ydna_core::{
    open_db_in_memory, AssignmentOutcome, AssignmentProvenance, ConflictPolicy, FamilyListing,
    LocalStore, NewAssignment, PaternalLink, PropagationDirection, PropagationError,
    PropagationRequest, PropagationService, RemoteError, SqliteStore, TraversalService,
};

/// profile-1 -> profile-2 -> profile-3, plus a daughter profile-4 of
/// profile-2, all cached and fetched.
fn cached_family(conn: &Connection) {
    let store = SqliteStore::try_new(conn).unwrap();
    store.put_profile(&male("profile-1", "Root")).unwrap();
    store.put_profile(&male("profile-2", "Son")).unwrap();
    store.put_profile(&male("profile-3", "Grandson")).unwrap();
    store
        .put_profile(&female("profile-4", "Granddaughter"))
        .unwrap();
    for (father, son, order) in [
        ("profile-1", "profile-2", 0),
        ("profile-2", "profile-3", 0),
        ("profile-2", "profile-4", 1),
    ] {
        store
            .put_paternal_link(&PaternalLink::discovered(father, son, order))
            .unwrap();
    }
    for id in ["profile-1", "profile-2", "profile-3", "profile-4"] {
        store.mark_family_fetched(id).unwrap();
    }
}

fn offline_service(
    conn: &Connection,
    policy: ConflictPolicy,
) -> PropagationService<SqliteStore<'_>, OfflineGraph> {
    let traversal = TraversalService::new(SqliteStore::try_new(conn).unwrap(), OfflineGraph);
    PropagationService::new(traversal, policy)
}

fn haplogroups_of(conn: &Connection, profile_id: &str) -> Vec<(String, String)> {
    SqliteStore::try_new(conn)
        .unwrap()
        .get_assignments(profile_id)
        .unwrap()
        .into_iter()
        .map(|row| (row.haplogroup, row.source))
        .collect()
}

#[test]
fn down_from_the_root_reaches_every_son() {
    let conn = open_db_in_memory().unwrap();
    cached_family(&conn);
    let mut service = offline_service(&conn, ConflictPolicy::default());

    let request = PropagationRequest::new(
        "profile-1",
        "R-M269",
        "FTDNA",
        PropagationDirection::Down,
    );
    let report = service.propagate(&request).unwrap();

    assert_eq!(
        report.assigned_ids(),
        vec!["profile-1", "profile-2", "profile-3"]
    );
    assert_eq!(report.remote_calls, 0);
    assert!(report.outcome_of("profile-4").is_none());
    assert!(haplogroups_of(&conn, "profile-4").is_empty());
}

#[test]
fn seed_is_tested_and_relatives_name_the_seed() {
    let conn = open_db_in_memory().unwrap();
    cached_family(&conn);
    let mut service = offline_service(&conn, ConflictPolicy::default());

    let request =
        PropagationRequest::new("profile-3", "R-M269", "FTDNA", PropagationDirection::Up);
    let report = service.propagate(&request).unwrap();

    assert_eq!(
        report.assigned_ids(),
        vec!["profile-3", "profile-2", "profile-1"]
    );
    let roles: Vec<LineageRole> = report.entries.iter().map(|entry| entry.role).collect();
    assert_eq!(
        roles,
        vec![LineageRole::Seed, LineageRole::Ancestor, LineageRole::Ancestor]
    );
    assert_eq!(report.entries[2].generation, 2);

    let store = SqliteStore::try_new(&conn).unwrap();
    let seed_row = &store.get_assignments("profile-3").unwrap()[0];
    assert_eq!(seed_row.provenance, AssignmentProvenance::Tested);
    assert_eq!(seed_row.run_id, Some(report.run_id));

    let root_row = &store.get_assignments("profile-1").unwrap()[0];
    assert_eq!(root_row.provenance.propagated_from(), Some("profile-3"));
    assert_eq!(root_row.run_id, Some(report.run_id));
}

#[test]
fn both_directions_cover_ancestors_and_descendants() {
    let conn = open_db_in_memory().unwrap();
    cached_family(&conn);
    let mut service = offline_service(&conn, ConflictPolicy::default());

    let request =
        PropagationRequest::new("profile-2", "R-M269", "FTDNA", PropagationDirection::Both);
    let report = service.propagate(&request).unwrap();

    assert_eq!(report.entries.len(), 3);
    assert_eq!(
        report.entries[1].role,
        LineageRole::Ancestor,
        "{:?}",
        report.entries
    );
    assert_eq!(report.entries[2].profile_id, "profile-3");
    assert_eq!(report.entries[2].role, LineageRole::Descendant);
}

#[test]
fn repeating_a_run_appends_nothing() {
    let conn = open_db_in_memory().unwrap();
    cached_family(&conn);
    let mut service = offline_service(&conn, ConflictPolicy::default());
    let request =
        PropagationRequest::new("profile-1", "R-M269", "FTDNA", PropagationDirection::Down);

    let first = service.propagate(&request).unwrap();
    let before = SqliteStore::try_new(&conn).unwrap().statistics().unwrap();
    let second = service.propagate(&request).unwrap();
    let after = SqliteStore::try_new(&conn).unwrap().statistics().unwrap();

    assert_eq!(first.count("assigned"), 3);
    assert_eq!(second.count("already_consistent"), 3);
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(before.assignments, after.assignments);
}

#[test]
fn agreeing_sources_are_both_kept() {
    let conn = open_db_in_memory().unwrap();
    cached_family(&conn);
    let mut service = offline_service(&conn, ConflictPolicy::default());

    service
        .propagate(&PropagationRequest::new(
            "profile-3",
            "R-M269",
            "FTDNA",
            PropagationDirection::Up,
        ))
        .unwrap();
    let report = service
        .propagate(&PropagationRequest::new(
            "profile-3",
            "R-M269",
            "YFull",
            PropagationDirection::Up,
        ))
        .unwrap();

    assert_eq!(report.count("assigned"), 3);
    assert_eq!(
        haplogroups_of(&conn, "profile-1"),
        vec![
            ("R-M269".to_string(), "FTDNA".to_string()),
            ("R-M269".to_string(), "YFull".to_string()),
        ]
    );
}

#[test]
fn disagreements_are_recorded_and_never_overwrite() {
    let conn = open_db_in_memory().unwrap();
    cached_family(&conn);
    let mut service = offline_service(&conn, ConflictPolicy::default());

    service
        .propagate(&PropagationRequest::new(
            "profile-3",
            "R-M269",
            "FTDNA",
            PropagationDirection::Up,
        ))
        .unwrap();
    let before = SqliteStore::try_new(&conn).unwrap().statistics().unwrap();
    let report = service
        .propagate(&PropagationRequest::new(
            "profile-3",
            "R-L21",
            "YFull",
            PropagationDirection::Up,
        ))
        .unwrap();
    let after = SqliteStore::try_new(&conn).unwrap().statistics().unwrap();

    assert_eq!(report.count("conflict_recorded"), 3);
    assert!(after.assignments > before.assignments);
    assert_eq!(
        haplogroups_of(&conn, "profile-2"),
        vec![
            ("R-M269".to_string(), "FTDNA".to_string()),
            ("R-L21".to_string(), "YFull".to_string()),
        ]
    );
    match report.outcome_of("profile-2") {
        Some(AssignmentOutcome::ConflictRecorded { disagreements }) => {
            assert_eq!(disagreements.len(), 1);
            assert_eq!(disagreements[0].haplogroup, "R-M269");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn higher_priority_source_blocks_only_its_profile() {
    let conn = open_db_in_memory().unwrap();
    cached_family(&conn);
    SqliteStore::try_new(&conn)
        .unwrap()
        .put_assignment(&NewAssignment::tested("profile-1", "R-U106", "YFull"))
        .unwrap();
    let mut service = offline_service(&conn, ConflictPolicy::new(["YFull", "FTDNA"]));

    let report = service
        .propagate(&PropagationRequest::new(
            "profile-3",
            "R-M269",
            "FTDNA",
            PropagationDirection::Up,
        ))
        .unwrap();

    assert_eq!(report.assigned_ids(), vec!["profile-3", "profile-2"]);
    assert!(matches!(
        report.outcome_of("profile-1"),
        Some(AssignmentOutcome::ConflictSkipped { blocking }) if blocking.source == "YFull"
    ));
    assert_eq!(
        haplogroups_of(&conn, "profile-1"),
        vec![("R-U106".to_string(), "YFull".to_string())]
    );
}

#[test]
fn corrected_higher_priority_source_no_longer_blocks() {
    let conn = open_db_in_memory().unwrap();
    cached_family(&conn);
    let store = SqliteStore::try_new(&conn).unwrap();
    store
        .put_assignment(&NewAssignment::tested("profile-1", "R-U106", "YFull"))
        .unwrap();
    store
        .put_assignment(&NewAssignment::tested("profile-1", "R-M269", "YFull"))
        .unwrap();
    let mut service = offline_service(&conn, ConflictPolicy::new(["YFull", "FTDNA"]));

    let report = service
        .propagate(&PropagationRequest::new(
            "profile-3",
            "R-M269",
            "FTDNA",
            PropagationDirection::Up,
        ))
        .unwrap();

    assert_eq!(
        report.assigned_ids(),
        vec!["profile-3", "profile-2", "profile-1"]
    );
    assert_eq!(haplogroups_of(&conn, "profile-1").len(), 3);
}

#[test]
fn reverting_a_source_appends_a_new_row() {
    let conn = open_db_in_memory().unwrap();
    cached_family(&conn);
    let store = SqliteStore::try_new(&conn).unwrap();
    store
        .put_assignment(&NewAssignment::tested("profile-1", "R-M269", "FTDNA"))
        .unwrap();
    store
        .put_assignment(&NewAssignment::tested("profile-1", "R-L21", "FTDNA"))
        .unwrap();
    let mut service = offline_service(&conn, ConflictPolicy::default());

    let report = service
        .propagate(&PropagationRequest::new(
            "profile-3",
            "R-M269",
            "FTDNA",
            PropagationDirection::Up,
        ))
        .unwrap();

    match report.outcome_of("profile-1") {
        Some(AssignmentOutcome::ConflictRecorded { disagreements }) => {
            assert_eq!(disagreements.len(), 1);
            assert_eq!(disagreements[0].haplogroup, "R-L21");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(
        haplogroups_of(&conn, "profile-1"),
        vec![
            ("R-M269".to_string(), "FTDNA".to_string()),
            ("R-L21".to_string(), "FTDNA".to_string()),
            ("R-M269".to_string(), "FTDNA".to_string()),
        ]
    );
}

#[test]
fn female_seed_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    cached_family(&conn);
    let mut service = offline_service(&conn, ConflictPolicy::default());

    let err = service
        .propagate(&PropagationRequest::new(
            "profile-4",
            "R-M269",
            "FTDNA",
            PropagationDirection::Both,
        ))
        .unwrap_err();
    assert!(matches!(err, PropagationError::SeedIsFemale(id) if id == "profile-4"));
    assert!(haplogroups_of(&conn, "profile-4").is_empty());
}

#[test]
fn invalid_haplogroup_is_rejected_before_any_fetch() {
    let conn = open_db_in_memory().unwrap();
    let mut service = offline_service(&conn, ConflictPolicy::default());

    let err = service
        .propagate(&PropagationRequest::new(
            "profile-1",
            " ",
            "FTDNA",
            PropagationDirection::Up,
        ))
        .unwrap_err();
    assert!(matches!(err, PropagationError::InvalidRequest(_)));
}

#[test]
fn unreachable_seed_is_reported() {
    let conn = open_db_in_memory().unwrap();
    let traversal =
        TraversalService::new(SqliteStore::try_new(&conn).unwrap(), ScriptedGraph::new());
    let mut service = PropagationService::new(traversal, ConflictPolicy::default());

    let err = service
        .propagate(&PropagationRequest::new(
            "profile-99",
            "R-M269",
            "FTDNA",
            PropagationDirection::Up,
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        PropagationError::SeedUnavailable { profile_id, .. } if profile_id == "profile-99"
    ));
}

#[test]
fn uncached_seed_is_fetched_and_failed_branches_are_reported() {
    let conn = open_db_in_memory().unwrap();
    let graph = ScriptedGraph::new().with_listing(
        "profile-7",
        FamilyListing::of(male("profile-7", "Tester")).with_child(male("profile-8", "Son")),
    );
    let traversal = TraversalService::new(SqliteStore::try_new(&conn).unwrap(), graph);
    let mut service = PropagationService::new(traversal, ConflictPolicy::default());

    let report = service
        .propagate(&PropagationRequest::new(
            "profile-7",
            "I-M253",
            "YSEQ",
            PropagationDirection::Both,
        ))
        .unwrap();

    assert_eq!(report.assigned_ids(), vec!["profile-7", "profile-8"]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].profile_id, "profile-8");
    assert_eq!(report.remote_calls, 2);
}

#[test]
fn full_tree_assigns_from_the_root_down() {
    let conn = open_db_in_memory().unwrap();
    cached_family(&conn);
    let mut service = offline_service(&conn, ConflictPolicy::default());

    let report = service
        .full_tree(&PropagationRequest::new(
            "profile-3",
            "R-M269",
            "FTDNA",
            PropagationDirection::Up,
        ))
        .unwrap();

    assert_eq!(report.root.root_id, "profile-1");
    assert_eq!(report.root.generations_up, 2);
    assert_eq!(report.root.status, RootStatus::Found);

    let entries: Vec<(&str, LineageRole)> = report
        .propagation
        .entries
        .iter()
        .map(|entry| (entry.profile_id.as_str(), entry.role))
        .collect();
    assert_eq!(
        entries,
        vec![
            ("profile-3", LineageRole::Seed),
            ("profile-1", LineageRole::Root),
            ("profile-2", LineageRole::Descendant),
        ]
    );
    assert!(haplogroups_of(&conn, "profile-4").is_empty());
    assert_eq!(
        SqliteStore::try_new(&conn)
            .unwrap()
            .get_assignments("profile-1")
            .unwrap()[0]
            .provenance
            .propagated_from(),
        Some("profile-3")
    );
}

#[test]
fn full_tree_past_the_limit_fans_out_from_the_deepest_profile() {
    let conn = open_db_in_memory().unwrap();
    cached_family(&conn);
    let mut service = offline_service(&conn, ConflictPolicy::default());

    let report = service
        .full_tree(
            &PropagationRequest::new("profile-3", "R-M269", "FTDNA", PropagationDirection::Up)
                .with_limits(1, 10),
        )
        .unwrap();

    assert_eq!(report.root.root_id, "profile-2");
    assert_eq!(report.root.status, RootStatus::DepthExceeded);
    assert_eq!(
        report.propagation.assigned_ids(),
        vec!["profile-3", "profile-2"]
    );
    assert!(haplogroups_of(&conn, "profile-1").is_empty());
}

#[test]
fn full_tree_with_an_unreachable_root_family_is_interrupted() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteStore::try_new(&conn).unwrap();
    store.put_profile(&male("profile-2", "Son")).unwrap();
    store.put_profile(&male("profile-3", "Grandson")).unwrap();
    store
        .put_paternal_link(&PaternalLink::discovered("profile-2", "profile-3", 0))
        .unwrap();
    store.mark_family_fetched("profile-3").unwrap();
    let traversal = TraversalService::new(store, ScriptedGraph::new());
    let mut service = PropagationService::new(traversal, ConflictPolicy::default());

    let report = service
        .full_tree(&PropagationRequest::new(
            "profile-3",
            "R-M269",
            "FTDNA",
            PropagationDirection::Both,
        ))
        .unwrap();

    assert_eq!(report.root.root_id, "profile-2");
    assert_eq!(report.root.generations_up, 1);
    assert_eq!(
        report.root.status,
        RootStatus::Interrupted(RemoteError::NotFound("profile-2".to_string()))
    );
    assert_eq!(
        report.propagation.assigned_ids(),
        vec!["profile-3", "profile-2"]
    );
    assert_eq!(report.propagation.skipped.len(), 1);
    assert_eq!(report.propagation.skipped[0].profile_id, "profile-2");
    assert_eq!(report.propagation.remote_calls, 2);
}
