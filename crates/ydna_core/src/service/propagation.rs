//! Haplogroup propagation along the paternal line.
//!
//! # Responsibility
//! - Assign a seed's haplogroup to male paternal-line relatives found by the
//!   traversal engine.
//! - Decide per profile whether to append, skip, or record a conflict.
//!
//! # Invariants
//! - Female profiles never receive an assignment and get no report entry.
//! - Nothing is ever overwritten; disagreements are appended unless a
//!   configured higher-priority source disagrees.
//! - Each profile gets at most one entry per run.

pub use super::root_finder::{RootStatus, RootSummary};

use super::root_finder::locate_root;
use super::traversal::{
    Direction, RejectedLink, SkippedBranch, TraversalError, TraversalReport, TraversalService,
};
use crate::model::haplogroup::{
    AssignmentValidationError, HaplogroupAssignment, NewAssignment,
};
use crate::model::profile::ProfileId;
use crate::remote::{RemoteError, RemoteGraph};
use crate::repo::store::{LocalStore, StoreError};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub const DEFAULT_MAX_GENERATIONS: u32 = 50;

/// Which relatives of the seed receive the haplogroup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationDirection {
    Up,
    Down,
    Both,
}

impl PropagationDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Both => "both",
        }
    }

    fn includes(self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Self::Both, _) | (Self::Up, Direction::Up) | (Self::Down, Direction::Down)
        )
    }
}

/// Ordered source labels; earlier labels outrank later ones.
///
/// Unlisted sources have no rank. An empty policy records every
/// disagreement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictPolicy {
    source_priority: Vec<String>,
}

impl ConflictPolicy {
    pub fn new<I, T>(source_priority: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            source_priority: source_priority
                .into_iter()
                .map(|source| source.into().trim().to_string())
                .filter(|source| !source.is_empty())
                .collect(),
        }
    }

    fn rank(&self, source: &str) -> Option<usize> {
        self.source_priority
            .iter()
            .position(|ranked| same_source(ranked, source))
    }

    /// Whether `challenger` strictly outranks `incoming`.
    pub fn outranks(&self, challenger: &str, incoming: &str) -> bool {
        match (self.rank(challenger), self.rank(incoming)) {
            (Some(challenger), Some(incoming)) => challenger < incoming,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Existing assignment that disagrees with the incoming haplogroup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disagreement {
    pub assignment_id: i64,
    pub source: String,
    pub haplogroup: String,
}

impl From<&HaplogroupAssignment> for Disagreement {
    fn from(value: &HaplogroupAssignment) -> Self {
        Self {
            assignment_id: value.assignment_id,
            source: value.source.clone(),
            haplogroup: value.haplogroup.clone(),
        }
    }
}

/// Per-profile result of one propagation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentOutcome {
    /// Appended; nothing disagreed.
    Assigned,
    /// This source already recorded this haplogroup; nothing appended.
    AlreadyConsistent,
    /// Appended although other assignments disagree.
    ConflictRecorded { disagreements: Vec<Disagreement> },
    /// Not appended because a higher-priority source disagrees.
    ConflictSkipped { blocking: Disagreement },
}

impl AssignmentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::AlreadyConsistent => "already_consistent",
            Self::ConflictRecorded { .. } => "conflict_recorded",
            Self::ConflictSkipped { .. } => "conflict_skipped",
        }
    }

    /// Whether this outcome appends a row.
    pub fn writes(&self) -> bool {
        matches!(self, Self::Assigned | Self::ConflictRecorded { .. })
    }
}

/// Applies the conflict rules to one profile's existing assignments.
///
/// Only the latest row of each source counts; earlier rows of a source were
/// superseded by its later answer.
pub fn evaluate(
    policy: &ConflictPolicy,
    existing: &[HaplogroupAssignment],
    haplogroup: &str,
    source: &str,
) -> AssignmentOutcome {
    let current = latest_per_source(existing);
    let already = current
        .iter()
        .any(|row| same_source(&row.source, source) && row.haplogroup == haplogroup);
    if already {
        return AssignmentOutcome::AlreadyConsistent;
    }

    let disagreements: Vec<Disagreement> = current
        .into_iter()
        .filter(|row| row.haplogroup != haplogroup)
        .map(Disagreement::from)
        .collect();

    let blocking = disagreements.iter().find(|disagreement| {
        !same_source(&disagreement.source, source) && policy.outranks(&disagreement.source, source)
    });
    if let Some(blocking) = blocking {
        return AssignmentOutcome::ConflictSkipped {
            blocking: blocking.clone(),
        };
    }

    if disagreements.is_empty() {
        AssignmentOutcome::Assigned
    } else {
        AssignmentOutcome::ConflictRecorded { disagreements }
    }
}

/// Latest row per source, in order of first appearance. `existing` is
/// oldest first.
fn latest_per_source(existing: &[HaplogroupAssignment]) -> Vec<&HaplogroupAssignment> {
    let mut latest: Vec<&HaplogroupAssignment> = Vec::new();
    for row in existing {
        match latest
            .iter_mut()
            .find(|kept| same_source(&kept.source, &row.source))
        {
            Some(kept) => *kept = row,
            None => latest.push(row),
        }
    }
    latest
}

fn same_source(left: &str, right: &str) -> bool {
    left.trim().eq_ignore_ascii_case(right.trim())
}

/// How a profile relates to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineageRole {
    Seed,
    /// Top of the chain a full-tree run fanned out from.
    Root,
    Ancestor,
    Descendant,
}

impl LineageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::Root => "root",
            Self::Ancestor => "ancestor",
            Self::Descendant => "descendant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationEntry {
    pub profile_id: ProfileId,
    pub role: LineageRole,
    /// Generations from the traversal origin: the seed, or the root in
    /// full-tree runs.
    pub generation: u32,
    pub outcome: AssignmentOutcome,
    /// Row appended by this run, if any.
    pub assignment_id: Option<i64>,
}

/// Input of one propagation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationRequest {
    pub seed_id: ProfileId,
    pub haplogroup: String,
    pub source: String,
    pub direction: PropagationDirection,
    pub max_generations_up: u32,
    pub max_generations_down: u32,
}

impl PropagationRequest {
    pub fn new(
        seed_id: impl Into<ProfileId>,
        haplogroup: impl Into<String>,
        source: impl Into<String>,
        direction: PropagationDirection,
    ) -> Self {
        Self {
            seed_id: seed_id.into(),
            haplogroup: haplogroup.into(),
            source: source.into(),
            direction,
            max_generations_up: DEFAULT_MAX_GENERATIONS,
            max_generations_down: DEFAULT_MAX_GENERATIONS,
        }
    }

    pub fn with_limits(mut self, max_generations_up: u32, max_generations_down: u32) -> Self {
        self.max_generations_up = max_generations_up;
        self.max_generations_down = max_generations_down;
        self
    }
}

/// Result of one propagation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationReport {
    pub run_id: Uuid,
    pub seed_id: ProfileId,
    pub haplogroup: String,
    pub source: String,
    pub entries: Vec<PropagationEntry>,
    /// Female profiles met on the way; they have no entry.
    pub excluded_female: Vec<ProfileId>,
    pub skipped: Vec<SkippedBranch>,
    pub rejected_links: Vec<RejectedLink>,
    pub depth_limited: Vec<ProfileId>,
    pub remote_calls: usize,
}

impl PropagationReport {
    pub fn outcome_of(&self, profile_id: &str) -> Option<&AssignmentOutcome> {
        self.entries
            .iter()
            .find(|entry| entry.profile_id == profile_id)
            .map(|entry| &entry.outcome)
    }

    /// Number of entries whose outcome has the given label.
    pub fn count(&self, outcome: &str) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.outcome.as_str() == outcome)
            .count()
    }

    pub fn assigned_ids(&self) -> Vec<ProfileId> {
        self.entries
            .iter()
            .filter(|entry| entry.outcome == AssignmentOutcome::Assigned)
            .map(|entry| entry.profile_id.clone())
            .collect()
    }

    fn absorb_traversal(&mut self, traversal: TraversalReport) {
        self.skipped.extend(traversal.skipped);
        self.rejected_links.extend(traversal.rejected_links);
        self.depth_limited.extend(traversal.depth_limited);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullTreeReport {
    pub root: RootSummary,
    pub propagation: PropagationReport,
}

/// Errors that abort a propagation run.
#[derive(Debug)]
pub enum PropagationError {
    InvalidRequest(AssignmentValidationError),
    SeedIsFemale(ProfileId),
    SeedUnavailable {
        profile_id: ProfileId,
        source: RemoteError,
    },
    Traversal(TraversalError),
}

impl Display for PropagationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRequest(err) => write!(f, "invalid propagation request: {err}"),
            Self::SeedIsFemale(id) => write!(
                f,
                "seed profile {id} is female; Y-DNA haplogroups follow the male line"
            ),
            Self::SeedUnavailable { profile_id, source } => {
                write!(f, "seed profile {profile_id} is unavailable: {source}")
            }
            Self::Traversal(err) => write!(f, "{err}"),
        }
    }
}

impl Error for PropagationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidRequest(err) => Some(err),
            Self::SeedUnavailable { source, .. } => Some(source),
            Self::Traversal(err) => Some(err),
            Self::SeedIsFemale(_) => None,
        }
    }
}

impl From<TraversalError> for PropagationError {
    fn from(value: TraversalError) -> Self {
        match value {
            TraversalError::Remote { profile_id, source } => {
                Self::SeedUnavailable { profile_id, source }
            }
            other => Self::Traversal(other),
        }
    }
}

impl From<StoreError> for PropagationError {
    fn from(value: StoreError) -> Self {
        Self::Traversal(TraversalError::Store(value))
    }
}

impl From<AssignmentValidationError> for PropagationError {
    fn from(value: AssignmentValidationError) -> Self {
        Self::InvalidRequest(value)
    }
}

struct Run {
    handled: HashSet<ProfileId>,
    calls_before: usize,
    report: PropagationReport,
}

/// Propagation engine over a traversal service.
pub struct PropagationService<S: LocalStore, G: RemoteGraph> {
    traversal: TraversalService<S, G>,
    policy: ConflictPolicy,
}

impl<S: LocalStore, G: RemoteGraph> PropagationService<S, G> {
    pub fn new(traversal: TraversalService<S, G>, policy: ConflictPolicy) -> Self {
        Self { traversal, policy }
    }

    pub fn traversal(&self) -> &TraversalService<S, G> {
        &self.traversal
    }

    pub fn into_traversal(self) -> TraversalService<S, G> {
        self.traversal
    }

    /// Assigns the seed's haplogroup to the seed and its male paternal-line
    /// relatives in the requested direction.
    pub fn propagate(
        &mut self,
        request: &PropagationRequest,
    ) -> Result<PropagationReport, PropagationError> {
        let mut run = self.begin(request)?;
        let seed_id = run.report.seed_id.clone();

        for direction in [Direction::Up, Direction::Down] {
            if !request.direction.includes(direction) {
                continue;
            }
            let (limit, role) = match direction {
                Direction::Up => (request.max_generations_up, LineageRole::Ancestor),
                Direction::Down => (request.max_generations_down, LineageRole::Descendant),
            };
            let traversal = self.traversal.traverse(&seed_id, direction, limit)?;
            for visit in traversal.visits.iter().skip(1) {
                self.apply(&mut run, &visit.profile_id, role, visit.generation)?;
            }
            run.report.absorb_traversal(traversal);
        }

        Ok(self.finish(run, request.direction.as_str()))
    }

    /// Finds the seed's root ancestor and assigns the haplogroup to the root
    /// and every male descendant of it. `request.direction` is ignored.
    pub fn full_tree(
        &mut self,
        request: &PropagationRequest,
    ) -> Result<FullTreeReport, PropagationError> {
        let mut run = self.begin(request)?;
        let seed_id = run.report.seed_id.clone();

        let root = locate_root(&mut self.traversal, &seed_id, request.max_generations_up)?;
        if root.status != RootStatus::Found {
            warn!(
                "event=full_tree module=service status=partial_root root={} generations={}",
                root.root_id, root.generations_up
            );
        }
        run.report
            .rejected_links
            .extend(root.rejected_links.iter().cloned());

        self.apply(&mut run, &root.root_id, LineageRole::Root, 0)?;
        let traversal =
            self.traversal
                .traverse(&root.root_id, Direction::Down, request.max_generations_down)?;
        for visit in traversal.visits.iter().skip(1) {
            self.apply(
                &mut run,
                &visit.profile_id,
                LineageRole::Descendant,
                visit.generation,
            )?;
        }
        run.report.absorb_traversal(traversal);

        Ok(FullTreeReport {
            root,
            propagation: self.finish(run, "full_tree"),
        })
    }

    fn begin(&mut self, request: &PropagationRequest) -> Result<Run, PropagationError> {
        let seed_assignment = NewAssignment::tested(
            request.seed_id.as_str(),
            request.haplogroup.as_str(),
            request.source.as_str(),
        );
        seed_assignment.validate()?;

        let calls_before = self.traversal.remote_calls();
        let seed = self.traversal.ensure_profile(&seed_assignment.profile_id)?;
        if seed.is_female() {
            return Err(PropagationError::SeedIsFemale(seed.id));
        }

        let mut run = Run {
            handled: HashSet::new(),
            calls_before,
            report: PropagationReport {
                run_id: Uuid::new_v4(),
                seed_id: seed.id.clone(),
                haplogroup: seed_assignment.haplogroup,
                source: seed_assignment.source,
                entries: Vec::new(),
                excluded_female: Vec::new(),
                skipped: Vec::new(),
                rejected_links: Vec::new(),
                depth_limited: Vec::new(),
                remote_calls: 0,
            },
        };
        self.apply(&mut run, &seed.id, LineageRole::Seed, 0)?;
        Ok(run)
    }

    fn apply(
        &mut self,
        run: &mut Run,
        profile_id: &str,
        role: LineageRole,
        generation: u32,
    ) -> Result<(), PropagationError> {
        if !run.handled.insert(profile_id.to_string()) {
            return Ok(());
        }
        let store = self.traversal.store();
        let is_female = store
            .get_profile(profile_id)?
            .map(|profile| profile.is_female())
            .unwrap_or(false);
        if is_female {
            run.report.excluded_female.push(profile_id.to_string());
            return Ok(());
        }

        let report = &run.report;
        let existing = store.get_assignments(profile_id)?;
        let outcome = evaluate(&self.policy, &existing, &report.haplogroup, &report.source);

        let assignment_id = if outcome.writes() {
            let assignment = if role == LineageRole::Seed {
                NewAssignment::tested(profile_id, report.haplogroup.as_str(), report.source.as_str())
                    .with_run_id(report.run_id)
            } else {
                NewAssignment::propagated(
                    profile_id,
                    report.haplogroup.as_str(),
                    report.source.as_str(),
                    report.seed_id.as_str(),
                    report.run_id,
                )
            };
            Some(store.put_assignment(&assignment)?.assignment_id)
        } else {
            None
        };

        match &outcome {
            AssignmentOutcome::Assigned | AssignmentOutcome::AlreadyConsistent => debug!(
                "event=assign module=service status={} profile_id={} role={}",
                outcome.as_str(),
                profile_id,
                role.as_str()
            ),
            AssignmentOutcome::ConflictRecorded { disagreements } => warn!(
                "event=assign module=service status=conflict_recorded profile_id={} disagreements={}",
                profile_id,
                disagreements.len()
            ),
            AssignmentOutcome::ConflictSkipped { blocking } => warn!(
                "event=assign module=service status=conflict_skipped profile_id={} blocking_source={}",
                profile_id, blocking.source
            ),
        }

        run.report.entries.push(PropagationEntry {
            profile_id: profile_id.to_string(),
            role,
            generation,
            outcome,
            assignment_id,
        });
        Ok(())
    }

    fn finish(&mut self, mut run: Run, mode: &str) -> PropagationReport {
        run.report.rejected_links.extend(self.traversal.take_rejected_links());
        run.report.remote_calls = self.traversal.remote_calls() - run.calls_before;
        let report = run.report;
        info!(
            "event=propagate module=service status=ok mode={} seed={} run_id={} entries={} assigned={} conflicts={} skipped_branches={} remote_calls={}",
            mode,
            report.seed_id,
            report.run_id,
            report.entries.len(),
            report.count("assigned"),
            report.count("conflict_recorded") + report.count("conflict_skipped"),
            report.skipped.len(),
            report.remote_calls
        );
        report
    }
}
