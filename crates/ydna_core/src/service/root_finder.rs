//! Root ancestor search.
//!
//! # Responsibility
//! - Follow fathers from one profile until no further father is cached or
//!   discoverable.
//!
//! # Invariants
//! - A chain of exactly `max_generations_up` fathers still resolves to its
//!   top; only a further father yields `DepthExceeded`.
//! - A revisited profile aborts with `CycleDetected`.
//! - `locate_root` never fails on a depth limit or a loop; it reports the
//!   best starting point instead.

use super::traversal::{FatherLookup, RejectedLink, TraversalError, TraversalService};
use crate::model::profile::ProfileId;
use crate::remote::{RemoteError, RemoteGraph};
use crate::repo::store::LocalStore;
use log::{info, warn};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Top of a paternal chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootLocation {
    pub root_id: ProfileId,
    /// Fathers followed from the start to the root.
    pub generations: u32,
    /// Start first, root last.
    pub chain: Vec<ProfileId>,
    /// Set when the chain ended because the root's family could not be
    /// fetched, so a higher ancestor may exist.
    pub interrupted: Option<RemoteError>,
    pub rejected_links: Vec<RejectedLink>,
    pub remote_calls: usize,
}

/// Errors from `find_root`.
#[derive(Debug)]
pub enum RootFinderError {
    /// The chain returned to `revisited`; `last_acyclic` is the profile whose
    /// father closed the loop.
    CycleDetected {
        revisited: ProfileId,
        last_acyclic: ProfileId,
        chain: Vec<ProfileId>,
    },
    /// `deepest` still has a father after `generations` steps.
    DepthExceeded {
        deepest: ProfileId,
        generations: u32,
    },
    Traversal(TraversalError),
}

impl Display for RootFinderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CycleDetected {
                revisited,
                last_acyclic,
                ..
            } => write!(
                f,
                "paternal chain cycles back to {revisited} from {last_acyclic}"
            ),
            Self::DepthExceeded {
                deepest,
                generations,
            } => write!(
                f,
                "no root within {generations} generations; deepest profile is {deepest}"
            ),
            Self::Traversal(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RootFinderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Traversal(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TraversalError> for RootFinderError {
    fn from(value: TraversalError) -> Self {
        Self::Traversal(value)
    }
}

/// Finds the oldest paternal ancestor of `profile_id`.
pub fn find_root<S: LocalStore, G: RemoteGraph>(
    traversal: &mut TraversalService<S, G>,
    profile_id: &str,
    max_generations_up: u32,
) -> Result<RootLocation, RootFinderError> {
    let start = traversal.canonical_id(profile_id)?;
    let calls_before = traversal.remote_calls();
    let mut chain = vec![start.clone()];
    let mut seen: HashSet<ProfileId> = HashSet::from([start.clone()]);
    let mut current = start;

    loop {
        let generations = (chain.len() - 1) as u32;
        let interrupted = match traversal.father_of(&current)? {
            FatherLookup::Found(father_id) => {
                if seen.contains(&father_id) {
                    warn!(
                        "event=find_root module=service status=cycle profile_id={} revisited={}",
                        current, father_id
                    );
                    return Err(RootFinderError::CycleDetected {
                        revisited: father_id,
                        last_acyclic: current,
                        chain,
                    });
                }
                if generations >= max_generations_up {
                    warn!(
                        "event=find_root module=service status=depth_exceeded deepest={} generations={}",
                        current, generations
                    );
                    return Err(RootFinderError::DepthExceeded {
                        deepest: current,
                        generations,
                    });
                }
                seen.insert(father_id.clone());
                chain.push(father_id.clone());
                current = father_id;
                continue;
            }
            FatherLookup::NoFather => None,
            FatherLookup::Unavailable(err) => Some(err),
        };

        let remote_calls = traversal.remote_calls() - calls_before;
        info!(
            "event=find_root module=service status=ok root={} generations={} interrupted={} remote_calls={}",
            current,
            generations,
            interrupted.is_some(),
            remote_calls
        );
        return Ok(RootLocation {
            root_id: current,
            generations,
            chain,
            interrupted,
            rejected_links: traversal.take_rejected_links(),
            remote_calls,
        });
    }
}

/// How a best-effort root search ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootStatus {
    Found,
    /// The root's family could not be fetched; a higher ancestor may exist.
    Interrupted(RemoteError),
    /// The generation limit was hit; the deepest profile reached stands in
    /// for the root.
    DepthExceeded,
    /// The chain looped back to `revisited`; the last profile before the
    /// loop stands in for the root.
    CycleDetected { revisited: ProfileId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootSummary {
    pub root_id: ProfileId,
    pub generations_up: u32,
    pub status: RootStatus,
    pub rejected_links: Vec<RejectedLink>,
    pub remote_calls: usize,
}

/// Runs `find_root` and turns `DepthExceeded` and `CycleDetected` into a
/// usable root: the deepest profile reached, or the last one before the loop.
pub fn locate_root<S: LocalStore, G: RemoteGraph>(
    traversal: &mut TraversalService<S, G>,
    profile_id: &str,
    max_generations_up: u32,
) -> Result<RootSummary, TraversalError> {
    let calls_before = traversal.remote_calls();
    let (root_id, generations_up, status) =
        match find_root(traversal, profile_id, max_generations_up) {
            Ok(location) => {
                return Ok(RootSummary {
                    root_id: location.root_id,
                    generations_up: location.generations,
                    status: location
                        .interrupted
                        .map(RootStatus::Interrupted)
                        .unwrap_or(RootStatus::Found),
                    rejected_links: location.rejected_links,
                    remote_calls: location.remote_calls,
                })
            }
            Err(RootFinderError::DepthExceeded {
                deepest,
                generations,
            }) => (deepest, generations, RootStatus::DepthExceeded),
            Err(RootFinderError::CycleDetected {
                revisited,
                last_acyclic,
                chain,
            }) => (
                last_acyclic,
                chain.len().saturating_sub(1) as u32,
                RootStatus::CycleDetected { revisited },
            ),
            Err(RootFinderError::Traversal(err)) => return Err(err),
        };

    Ok(RootSummary {
        root_id,
        generations_up,
        status,
        rejected_links: traversal.take_rejected_links(),
        remote_calls: traversal.remote_calls() - calls_before,
    })
}
