//! Local store contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist profiles, paternal links, unions and haplogroup assignments.
//! - Record named paternal trees with their members.
//! - Remember which family listings were fetched so cached answers
//!   ("no father", "no more sons") need no remote call.
//!
//! # Invariants
//! - A son has at most one father link; a differing second father is
//!   reported, never written.
//! - Assignments are appended only; the schema rejects updates and deletes.
//! - Profile upserts refresh display attributes but never blank out a known
//!   gender or date hint.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::haplogroup::{
    AssignmentProvenance, AssignmentValidationError, Confidence, HaplogroupAssignment,
    NewAssignment,
};
use crate::model::profile::{
    Gender, LinkProvenance, PaternalLink, Profile, ProfileId, ProfileValidationError, Union,
};
use crate::model::tree::{NewPaternalTree, PaternalTree, TreeValidationError};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const PROFILE_SELECT_SQL: &str = "SELECT
    profile_id,
    display_name,
    first_name,
    last_name,
    gender,
    birth_date,
    death_date,
    is_alive
FROM profiles";

const ASSIGNMENT_SELECT_SQL: &str = "SELECT
    assignment_id,
    profile_id,
    haplogroup,
    source,
    provenance,
    propagated_from,
    confidence,
    run_id,
    assigned_at
FROM haplogroup_assignments";

const UNION_SELECT_SQL: &str = "SELECT union_id, partner_ids, child_ids, status FROM unions";

const REQUIRED_TABLES: &[&str] = &[
    "profiles",
    "paternal_links",
    "unions",
    "haplogroup_assignments",
    "family_fetches",
    "profile_aliases",
    "paternal_trees",
    "tree_members",
];

const MAX_ALIAS_HOPS: usize = 8;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from local store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Profile failed identity validation.
    Profile(ProfileValidationError),
    /// Assignment failed validation.
    Assignment(AssignmentValidationError),
    Tree(TreeValidationError),
    /// A link referenced a profile that is not cached yet.
    MissingProfile(ProfileId),
    /// A link would point a profile at itself.
    SelfLink(ProfileId),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Profile(err) => write!(f, "{err}"),
            Self::Assignment(err) => write!(f, "{err}"),
            Self::Tree(err) => write!(f, "{err}"),
            Self::MissingProfile(id) => write!(f, "profile not cached: {id}"),
            Self::SelfLink(id) => write!(f, "profile cannot be its own father: {id}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "local store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "local store requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid cached data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Profile(err) => Some(err),
            Self::Assignment(err) => Some(err),
            Self::Tree(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<ProfileValidationError> for StoreError {
    fn from(value: ProfileValidationError) -> Self {
        Self::Profile(value)
    }
}

impl From<AssignmentValidationError> for StoreError {
    fn from(value: AssignmentValidationError) -> Self {
        Self::Assignment(value)
    }
}

impl From<TreeValidationError> for StoreError {
    fn from(value: TreeValidationError) -> Self {
        Self::Tree(value)
    }
}

/// Result of writing a paternal link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkWrite {
    Inserted,
    /// The same father -> son link was already cached.
    AlreadyPresent,
    /// The son already has a different father; nothing was written.
    ConflictingFather { existing_father: ProfileId },
}

/// One stored assignment with its profile, if the profile is cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRecord {
    pub assignment: HaplogroupAssignment,
    pub profile: Option<Profile>,
}

/// Row counts describing the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatistics {
    pub profiles: u64,
    pub male_profiles: u64,
    pub paternal_links: u64,
    pub unions: u64,
    pub fetched_families: u64,
    pub assignments: u64,
    pub tested_assignments: u64,
    pub profiles_with_haplogroup: u64,
    pub distinct_haplogroups: u64,
    pub paternal_trees: u64,
}

/// Cache contract shared by all engines.
pub trait LocalStore {
    /// Loads one cached profile.
    fn get_profile(&self, id: &str) -> StoreResult<Option<Profile>>;
    /// Inserts a profile or refreshes its display attributes.
    fn put_profile(&self, profile: &Profile) -> StoreResult<()>;
    /// Returns the cached father link of `son_id`, if any.
    fn get_father_link(&self, son_id: &str) -> StoreResult<Option<PaternalLink>>;
    /// Writes a father -> son link; both profiles must be cached.
    fn put_paternal_link(&self, link: &PaternalLink) -> StoreResult<LinkWrite>;
    /// Lists cached sons in remote listing order.
    fn get_children(&self, father_id: &str) -> StoreResult<Vec<ProfileId>>;
    /// Lists assignments for one profile, oldest first.
    fn get_assignments(&self, profile_id: &str) -> StoreResult<Vec<HaplogroupAssignment>>;
    /// Appends one assignment.
    fn put_assignment(&self, assignment: &NewAssignment) -> StoreResult<HaplogroupAssignment>;
    /// Inserts or refreshes a union record.
    fn put_union(&self, union: &Union) -> StoreResult<()>;
    /// Loads one union record.
    fn get_union(&self, union_id: &str) -> StoreResult<Option<Union>>;
    /// Lists unions that name `child_id` as a child.
    fn unions_with_child(&self, child_id: &str) -> StoreResult<Vec<Union>>;
    /// Records that the family listing of `profile_id` was fetched.
    fn mark_family_fetched(&self, profile_id: &str) -> StoreResult<()>;
    /// Whether the family listing of `profile_id` was fetched before.
    fn is_family_fetched(&self, profile_id: &str) -> StoreResult<bool>;
    /// Maps an id the service answered for under another id.
    fn put_alias(&self, alias_id: &str, canonical_id: &str) -> StoreResult<()>;
    /// Resolves alias chains; unknown ids resolve to themselves.
    fn resolve_alias(&self, profile_id: &str) -> StoreResult<ProfileId>;
    /// Lists assignments whose haplogroup starts with `prefix`.
    fn assignments_by_haplogroup(&self, prefix: &str) -> StoreResult<Vec<ExportRecord>>;
    /// Records a named tree and its members in one transaction.
    fn create_paternal_tree(&self, tree: &NewPaternalTree) -> StoreResult<PaternalTree>;
    /// Loads one tree header.
    fn get_paternal_tree(&self, tree_id: i64) -> StoreResult<Option<PaternalTree>>;
    /// Returns cache row counts.
    fn statistics(&self) -> StoreResult<StoreStatistics>;
}

/// SQLite-backed local store.
pub struct SqliteStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteStore<'conn> {
    /// Creates a store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl LocalStore for SqliteStore<'_> {
    fn get_profile(&self, id: &str) -> StoreResult<Option<Profile>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{PROFILE_SELECT_SQL} WHERE profile_id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_profile_row(row)?));
        }
        Ok(None)
    }

    fn put_profile(&self, profile: &Profile) -> StoreResult<()> {
        profile.validate()?;

        self.conn.execute(
            "INSERT INTO profiles (
                profile_id,
                display_name,
                first_name,
                last_name,
                gender,
                birth_date,
                death_date,
                is_alive
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(profile_id) DO UPDATE SET
                display_name = CASE
                    WHEN length(trim(excluded.display_name)) = 0 THEN profiles.display_name
                    ELSE excluded.display_name
                END,
                first_name = COALESCE(excluded.first_name, profiles.first_name),
                last_name = COALESCE(excluded.last_name, profiles.last_name),
                gender = CASE
                    WHEN excluded.gender = 'unknown' THEN profiles.gender
                    ELSE excluded.gender
                END,
                birth_date = COALESCE(excluded.birth_date, profiles.birth_date),
                death_date = COALESCE(excluded.death_date, profiles.death_date),
                is_alive = excluded.is_alive,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![
                profile.id.as_str(),
                profile.display_name.as_str(),
                profile.first_name.as_deref(),
                profile.last_name.as_deref(),
                profile.gender.as_str(),
                profile.birth_date.as_deref(),
                profile.death_date.as_deref(),
                bool_to_int(profile.is_alive),
            ],
        )?;
        Ok(())
    }

    fn get_father_link(&self, son_id: &str) -> StoreResult<Option<PaternalLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT father_id, son_id, provenance, child_order
             FROM paternal_links
             WHERE son_id = ?1;",
        )?;
        let mut rows = stmt.query([son_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_link_row(row)?));
        }
        Ok(None)
    }

    fn put_paternal_link(&self, link: &PaternalLink) -> StoreResult<LinkWrite> {
        if link.father_id == link.son_id {
            return Err(StoreError::SelfLink(link.son_id.clone()));
        }
        for id in [&link.father_id, &link.son_id] {
            if !profile_exists(self.conn, id)? {
                return Err(StoreError::MissingProfile(id.clone()));
            }
        }

        if let Some(existing) = self.get_father_link(&link.son_id)? {
            if existing.father_id == link.father_id {
                return Ok(LinkWrite::AlreadyPresent);
            }
            return Ok(LinkWrite::ConflictingFather {
                existing_father: existing.father_id,
            });
        }

        self.conn.execute(
            "INSERT INTO paternal_links (son_id, father_id, provenance, child_order)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                link.son_id.as_str(),
                link.father_id.as_str(),
                link.provenance.as_str(),
                link.child_order,
            ],
        )?;
        Ok(LinkWrite::Inserted)
    }

    fn get_children(&self, father_id: &str) -> StoreResult<Vec<ProfileId>> {
        let mut stmt = self.conn.prepare(
            "SELECT son_id
             FROM paternal_links
             WHERE father_id = ?1
             ORDER BY child_order ASC, rowid ASC;",
        )?;
        let mut rows = stmt.query([father_id])?;
        let mut sons = Vec::new();
        while let Some(row) = rows.next()? {
            sons.push(row.get(0)?);
        }
        Ok(sons)
    }

    fn get_assignments(&self, profile_id: &str) -> StoreResult<Vec<HaplogroupAssignment>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ASSIGNMENT_SELECT_SQL}
             WHERE profile_id = ?1
             ORDER BY assignment_id ASC;"
        ))?;
        let mut rows = stmt.query([profile_id])?;
        let mut assignments = Vec::new();
        while let Some(row) = rows.next()? {
            assignments.push(parse_assignment_row(row)?);
        }
        Ok(assignments)
    }

    fn put_assignment(&self, assignment: &NewAssignment) -> StoreResult<HaplogroupAssignment> {
        assignment.validate()?;

        self.conn.execute(
            "INSERT INTO haplogroup_assignments (
                profile_id,
                haplogroup,
                source,
                provenance,
                propagated_from,
                confidence,
                run_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                assignment.profile_id.as_str(),
                assignment.haplogroup.as_str(),
                assignment.source.as_str(),
                assignment.provenance.as_str(),
                assignment.provenance.propagated_from(),
                assignment.confidence.as_str(),
                assignment.run_id.map(|value| value.to_string()),
            ],
        )?;

        let assignment_id = self.conn.last_insert_rowid();
        let mut stmt = self.conn.prepare(&format!(
            "{ASSIGNMENT_SELECT_SQL} WHERE assignment_id = ?1;"
        ))?;
        let mut rows = stmt.query([assignment_id])?;
        match rows.next()? {
            Some(row) => parse_assignment_row(row),
            None => Err(StoreError::InvalidData(format!(
                "assignment {assignment_id} missing after insert"
            ))),
        }
    }

    fn put_union(&self, union: &Union) -> StoreResult<()> {
        if union.id.trim().is_empty() {
            return Err(StoreError::InvalidData("union id must not be empty".to_string()));
        }
        let partners = encode_id_list(&union.partner_ids)?;
        let children = encode_id_list(&union.child_ids)?;

        self.conn.execute(
            "INSERT INTO unions (union_id, partner_ids, child_ids, status)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(union_id) DO UPDATE SET
                partner_ids = excluded.partner_ids,
                child_ids = excluded.child_ids,
                status = COALESCE(excluded.status, unions.status),
                fetched_at = (strftime('%s', 'now') * 1000);",
            params![union.id.as_str(), partners, children, union.status.as_deref()],
        )?;
        Ok(())
    }

    fn get_union(&self, union_id: &str) -> StoreResult<Option<Union>> {
        let row = self
            .conn
            .query_row(
                "SELECT union_id, partner_ids, child_ids, status
                 FROM unions
                 WHERE union_id = ?1;",
                [union_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((id, partners, children, status)) => Ok(Some(Union {
                id,
                partner_ids: decode_id_list(&partners, "unions.partner_ids")?,
                child_ids: decode_id_list(&children, "unions.child_ids")?,
                status,
            })),
        }
    }

    fn unions_with_child(&self, child_id: &str) -> StoreResult<Vec<Union>> {
        let mut stmt = self.conn.prepare(&format!(
            "{UNION_SELECT_SQL}
             WHERE EXISTS (SELECT 1 FROM json_each(unions.child_ids) WHERE json_each.value = ?1)
             ORDER BY union_id ASC;"
        ))?;
        let mut rows = stmt.query([child_id])?;
        let mut unions = Vec::new();
        while let Some(row) = rows.next()? {
            unions.push(parse_union_row(row)?);
        }
        Ok(unions)
    }

    fn mark_family_fetched(&self, profile_id: &str) -> StoreResult<()> {
        if !profile_exists(self.conn, profile_id)? {
            return Err(StoreError::MissingProfile(profile_id.to_string()));
        }
        self.conn.execute(
            "INSERT INTO family_fetches (profile_id)
             VALUES (?1)
             ON CONFLICT(profile_id) DO UPDATE SET
                fetched_at = (strftime('%s', 'now') * 1000);",
            [profile_id],
        )?;
        Ok(())
    }

    fn is_family_fetched(&self, profile_id: &str) -> StoreResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM family_fetches WHERE profile_id = ?1);",
            [profile_id],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn put_alias(&self, alias_id: &str, canonical_id: &str) -> StoreResult<()> {
        if alias_id == canonical_id {
            return Ok(());
        }
        self.conn.execute(
            "INSERT INTO profile_aliases (alias_id, canonical_id)
             VALUES (?1, ?2)
             ON CONFLICT(alias_id) DO UPDATE SET canonical_id = excluded.canonical_id;",
            params![alias_id, canonical_id],
        )?;
        Ok(())
    }

    fn resolve_alias(&self, profile_id: &str) -> StoreResult<ProfileId> {
        let mut current = profile_id.to_string();
        let mut seen = HashSet::new();
        for _ in 0..MAX_ALIAS_HOPS {
            if !seen.insert(current.clone()) {
                break;
            }
            let next: Option<String> = self
                .conn
                .query_row(
                    "SELECT canonical_id FROM profile_aliases WHERE alias_id = ?1;",
                    [current.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            match next {
                Some(canonical) => current = canonical,
                None => break,
            }
        }
        Ok(current)
    }

    fn assignments_by_haplogroup(&self, prefix: &str) -> StoreResult<Vec<ExportRecord>> {
        let pattern = format!("{}%", escape_like(prefix.trim()));
        let mut stmt = self.conn.prepare(
            "SELECT
                a.assignment_id AS assignment_id,
                a.profile_id AS profile_id,
                a.haplogroup AS haplogroup,
                a.source AS source,
                a.provenance AS provenance,
                a.propagated_from AS propagated_from,
                a.confidence AS confidence,
                a.run_id AS run_id,
                a.assigned_at AS assigned_at,
                p.profile_id AS cached_profile_id,
                p.display_name AS display_name,
                p.first_name AS first_name,
                p.last_name AS last_name,
                p.gender AS gender,
                p.birth_date AS birth_date,
                p.death_date AS death_date,
                p.is_alive AS is_alive
             FROM haplogroup_assignments a
             LEFT JOIN profiles p ON p.profile_id = a.profile_id
             WHERE a.haplogroup LIKE ?1 ESCAPE '\\'
             ORDER BY p.last_name ASC, p.first_name ASC, a.profile_id ASC, a.assignment_id ASC;",
        )?;
        let mut rows = stmt.query([pattern])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let assignment = parse_assignment_row(row)?;
            let profile = match row.get::<_, Option<String>>("cached_profile_id")? {
                Some(_) => Some(parse_profile_columns(row, "cached_profile_id")?),
                None => None,
            };
            records.push(ExportRecord {
                assignment,
                profile,
            });
        }
        Ok(records)
    }

    fn statistics(&self) -> StoreResult<StoreStatistics> {
        Ok(StoreStatistics {
            profiles: count(self.conn, "SELECT COUNT(*) FROM profiles;")?,
            male_profiles: count(
                self.conn,
                "SELECT COUNT(*) FROM profiles WHERE gender = 'male';",
            )?,
            paternal_links: count(self.conn, "SELECT COUNT(*) FROM paternal_links;")?,
            unions: count(self.conn, "SELECT COUNT(*) FROM unions;")?,
            fetched_families: count(self.conn, "SELECT COUNT(*) FROM family_fetches;")?,
            assignments: count(self.conn, "SELECT COUNT(*) FROM haplogroup_assignments;")?,
            tested_assignments: count(
                self.conn,
                "SELECT COUNT(*) FROM haplogroup_assignments WHERE provenance = 'tested';",
            )?,
            profiles_with_haplogroup: count(
                self.conn,
                "SELECT COUNT(DISTINCT profile_id) FROM haplogroup_assignments;",
            )?,
            distinct_haplogroups: count(
                self.conn,
                "SELECT COUNT(DISTINCT haplogroup) FROM haplogroup_assignments;",
            )?,
            paternal_trees: count(self.conn, "SELECT COUNT(*) FROM paternal_trees;")?,
        })
    }

    fn create_paternal_tree(&self, tree: &NewPaternalTree) -> StoreResult<PaternalTree> {
        tree.validate()?;
        for member in &tree.members {
            if !profile_exists(self.conn, &member.profile_id)? {
                return Err(StoreError::MissingProfile(member.profile_id.clone()));
            }
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO paternal_trees (name, root_profile_id, haplogroup)
             VALUES (?1, ?2, ?3);",
            params![
                tree.name.trim(),
                tree.root_profile_id.as_str(),
                tree.haplogroup.as_deref().map(str::trim)
            ],
        )?;
        let tree_id = tx.last_insert_rowid();
        {
            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO tree_members (tree_id, profile_id, generation)
                 VALUES (?1, ?2, ?3);",
            )?;
            for member in &tree.members {
                insert.execute(params![tree_id, member.profile_id.as_str(), member.generation])?;
            }
        }
        tx.commit()?;

        self.get_paternal_tree(tree_id)?.ok_or_else(|| {
            StoreError::InvalidData(format!("paternal tree {tree_id} missing after insert"))
        })
    }

    fn get_paternal_tree(&self, tree_id: i64) -> StoreResult<Option<PaternalTree>> {
        let tree = self
            .conn
            .query_row(
                "SELECT t.tree_id, t.name, t.root_profile_id, t.haplogroup, t.created_at,
                        (SELECT COUNT(*) FROM tree_members m WHERE m.tree_id = t.tree_id)
                 FROM paternal_trees t
                 WHERE t.tree_id = ?1;",
                [tree_id],
                |row| {
                    Ok(PaternalTree {
                        tree_id: row.get(0)?,
                        name: row.get(1)?,
                        root_profile_id: row.get(2)?,
                        haplogroup: row.get(3)?,
                        created_at: row.get(4)?,
                        member_count: row.get::<_, i64>(5)?.max(0) as u64,
                    })
                },
            )
            .optional()?;
        Ok(tree)
    }
}

fn parse_profile_row(row: &Row<'_>) -> StoreResult<Profile> {
    parse_profile_columns(row, "profile_id")
}

fn parse_profile_columns(row: &Row<'_>, id_column: &str) -> StoreResult<Profile> {
    let gender_text: String = row.get("gender")?;
    let gender = match gender_text.as_str() {
        "male" => Gender::Male,
        "female" => Gender::Female,
        "unknown" => Gender::Unknown,
        other => {
            return Err(StoreError::InvalidData(format!(
                "invalid gender `{other}` in profiles.gender"
            )));
        }
    };

    let is_alive = match row.get::<_, i64>("is_alive")? {
        0 => false,
        1 => true,
        other => {
            return Err(StoreError::InvalidData(format!(
                "invalid is_alive value `{other}` in profiles.is_alive"
            )));
        }
    };

    Ok(Profile {
        id: row.get(id_column)?,
        display_name: row.get("display_name")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        gender,
        birth_date: row.get("birth_date")?,
        death_date: row.get("death_date")?,
        is_alive,
    })
}

fn parse_link_row(row: &Row<'_>) -> StoreResult<PaternalLink> {
    let provenance_text: String = row.get("provenance")?;
    let provenance = LinkProvenance::parse(&provenance_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid link provenance `{provenance_text}` in paternal_links.provenance"
        ))
    })?;

    Ok(PaternalLink {
        father_id: row.get("father_id")?,
        son_id: row.get("son_id")?,
        provenance,
        child_order: row.get("child_order")?,
    })
}

fn parse_assignment_row(row: &Row<'_>) -> StoreResult<HaplogroupAssignment> {
    let provenance_text: String = row.get("provenance")?;
    let propagated_from: Option<String> = row.get("propagated_from")?;
    let provenance = match (provenance_text.as_str(), propagated_from) {
        ("tested", None) => AssignmentProvenance::Tested,
        ("propagated", Some(from)) => AssignmentProvenance::Propagated { from },
        (other, _) => {
            return Err(StoreError::InvalidData(format!(
                "invalid provenance `{other}` in haplogroup_assignments.provenance"
            )));
        }
    };

    let confidence_text: String = row.get("confidence")?;
    let confidence = Confidence::parse(&confidence_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid confidence `{confidence_text}` in haplogroup_assignments.confidence"
        ))
    })?;

    let run_id = row
        .get::<_, Option<String>>("run_id")?
        .map(|value| {
            Uuid::parse_str(&value).map_err(|_| {
                StoreError::InvalidData(format!(
                    "invalid uuid `{value}` in haplogroup_assignments.run_id"
                ))
            })
        })
        .transpose()?;

    Ok(HaplogroupAssignment {
        assignment_id: row.get("assignment_id")?,
        profile_id: row.get("profile_id")?,
        haplogroup: row.get("haplogroup")?,
        source: row.get("source")?,
        provenance,
        confidence,
        run_id,
        assigned_at: row.get("assigned_at")?,
    })
}

fn profile_exists(conn: &Connection, id: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM profiles WHERE profile_id = ?1);",
        [id],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn count(conn: &Connection, sql: &str) -> StoreResult<u64> {
    let value: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    u64::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("negative count `{value}` from `{sql}`")))
}

fn parse_union_row(row: &Row<'_>) -> StoreResult<Union> {
    let partners: String = row.get(1)?;
    let children: String = row.get(2)?;
    Ok(Union {
        id: row.get(0)?,
        partner_ids: decode_id_list(&partners, "unions.partner_ids")?,
        child_ids: decode_id_list(&children, "unions.child_ids")?,
        status: row.get(3)?,
    })
}

fn encode_id_list(ids: &[ProfileId]) -> StoreResult<String> {
    serde_json::to_string(ids)
        .map_err(|err| StoreError::InvalidData(format!("failed to encode id list: {err}")))
}

fn decode_id_list(value: &str, column: &'static str) -> StoreResult<Vec<ProfileId>> {
    serde_json::from_str(value)
        .map_err(|_| StoreError::InvalidData(format!("invalid id list `{value}` in {column}")))
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

fn ensure_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in REQUIRED_TABLES {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(StoreError::MissingRequiredTable(*table));
        }
    }

    Ok(())
}
