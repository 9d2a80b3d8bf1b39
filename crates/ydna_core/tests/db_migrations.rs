use rusqlite::Connection;
use ydna_core::db::migrations::latest_version;
use ydna_core::db::{open_db, open_db_in_memory, DbError};

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    for table in [
        "profiles",
        "paternal_links",
        "unions",
        "haplogroup_assignments",
        "family_fetches",
        "profile_aliases",
        "paternal_trees",
        "tree_members",
    ] {
        assert_table_exists(&conn, table);
    }
}

#[test]
fn foreign_keys_are_enforced() {
    let conn = open_db_in_memory().unwrap();
    let enabled: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(enabled, 1);
}

#[test]
fn reopening_a_file_database_keeps_data_and_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("ydna.db");

    let conn = open_db(&path).unwrap();
    conn.execute(
        "INSERT INTO profiles (profile_id, display_name, gender) VALUES ('profile-1', 'A', 'male');",
        [],
    )
    .unwrap();
    drop(conn);

    let conn = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn), latest_version());
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM profiles;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn assignment_log_rejects_update_and_delete() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO haplogroup_assignments (profile_id, haplogroup, source, provenance, confidence)
         VALUES ('profile-1', 'R-M269', 'FTDNA', 'tested', 'confirmed');",
        [],
    )
    .unwrap();

    let update = conn.execute(
        "UPDATE haplogroup_assignments SET haplogroup = 'R-L21';",
        [],
    );
    assert!(update.unwrap_err().to_string().contains("append-only"));
    let delete = conn.execute("DELETE FROM haplogroup_assignments;", []);
    assert!(delete.unwrap_err().to_string().contains("append-only"));
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
