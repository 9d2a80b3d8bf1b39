//! Paternal-line traversal over the local cache and the remote graph.
//!
//! # Responsibility
//! - Walk fathers (`Up`) or male children (`Down`) breadth-first.
//! - Answer from the cache first and fetch family listings only when the
//!   cache cannot answer.
//! - Persist everything a fetched listing reveals before marking the
//!   listing fetched.
//!
//! # Invariants
//! - Each profile is visited at most once per `traverse` call.
//! - A link that would close a cycle is rejected and reported, never stored.
//! - A failed fetch removes only that branch; traversal continues.

use crate::model::profile::{PaternalLink, Profile, ProfileId};
use crate::remote::{FamilyListing, RemoteError, RemoteGraph};
use crate::repo::store::{LinkWrite, LocalStore, StoreError};
use log::{info, warn};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Direction of one traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Follow fathers toward the root ancestor.
    Up,
    /// Fan out to all male children.
    Down,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

/// One visited profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Visit {
    pub profile_id: ProfileId,
    /// Generations away from the traversal start.
    pub generation: u32,
    /// Profile this one was reached from; `None` for the start.
    pub reached_from: Option<ProfileId>,
}

/// Why a branch was not expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The family listing could not be fetched.
    Remote(RemoteError),
    /// Expanding would revisit an already visited profile.
    Cycle { revisited: ProfileId },
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(err) => write!(f, "{err}"),
            Self::Cycle { revisited } => write!(f, "cycle back to {revisited}"),
        }
    }
}

/// Branch removed from the frontier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedBranch {
    pub profile_id: ProfileId,
    pub reason: SkipReason,
}

/// Why a discovered father -> son link was not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRejection {
    /// The son is already an ancestor of the father.
    Cycle,
    /// The son already has a different cached father.
    ConflictingFather { existing_father: ProfileId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLink {
    pub father_id: ProfileId,
    pub son_id: ProfileId,
    pub reason: LinkRejection,
}

/// Result of one `traverse` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalReport {
    pub start_id: ProfileId,
    pub direction: Direction,
    pub max_depth: u32,
    /// Visited profiles in breadth order, start first.
    pub visits: Vec<Visit>,
    pub skipped: Vec<SkippedBranch>,
    pub rejected_links: Vec<RejectedLink>,
    /// Profiles at `max_depth` whose relatives were not expanded.
    pub depth_limited: Vec<ProfileId>,
    pub remote_calls: usize,
}

impl TraversalReport {
    fn new(start_id: ProfileId, direction: Direction, max_depth: u32) -> Self {
        Self {
            start_id,
            direction,
            max_depth,
            visits: Vec::new(),
            skipped: Vec::new(),
            rejected_links: Vec::new(),
            depth_limited: Vec::new(),
            remote_calls: 0,
        }
    }

    pub fn visited_ids(&self) -> Vec<ProfileId> {
        self.visits
            .iter()
            .map(|visit| visit.profile_id.clone())
            .collect()
    }

    /// Last visit with the highest generation.
    pub fn deepest(&self) -> Option<&Visit> {
        self.visits.iter().max_by_key(|visit| visit.generation)
    }

    pub fn generation_of(&self, profile_id: &str) -> Option<u32> {
        self.visits
            .iter()
            .find(|visit| visit.profile_id == profile_id)
            .map(|visit| visit.generation)
    }
}

/// Answer to "who is the father of X".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatherLookup {
    Found(ProfileId),
    NoFather,
    Unavailable(RemoteError),
}

/// Answer to "which sons does X have".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SonsLookup {
    Listed(Vec<ProfileId>),
    Unavailable(RemoteError),
}

/// Errors that abort a traversal.
#[derive(Debug)]
pub enum TraversalError {
    Store(StoreError),
    /// A profile the caller required could not be fetched.
    Remote {
        profile_id: ProfileId,
        source: RemoteError,
    },
}

impl Display for TraversalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Remote { profile_id, source } => {
                write!(f, "cannot fetch profile {profile_id}: {source}")
            }
        }
    }
}

impl Error for TraversalError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Remote { source, .. } => Some(source),
        }
    }
}

impl From<StoreError> for TraversalError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Cache-first traversal engine.
pub struct TraversalService<S: LocalStore, G: RemoteGraph> {
    store: S,
    remote: G,
    refresh: bool,
    refreshed: HashSet<ProfileId>,
    remote_calls: usize,
    rejected: Vec<RejectedLink>,
}

impl<S: LocalStore, G: RemoteGraph> TraversalService<S, G> {
    pub fn new(store: S, remote: G) -> Self {
        Self {
            store,
            remote,
            refresh: false,
            refreshed: HashSet::new(),
            remote_calls: 0,
            rejected: Vec::new(),
        }
    }

    /// Re-fetches each family listing once per service lifetime even when
    /// the cache could answer.
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn remote(&self) -> &G {
        &self.remote
    }

    /// Remote fetches issued since construction.
    pub fn remote_calls(&self) -> usize {
        self.remote_calls
    }

    pub(crate) fn take_rejected_links(&mut self) -> Vec<RejectedLink> {
        std::mem::take(&mut self.rejected)
    }

    /// Canonical id for a possibly aliased profile id.
    pub fn canonical_id(&self, profile_id: &str) -> Result<ProfileId, TraversalError> {
        Ok(self.store.resolve_alias(profile_id.trim())?)
    }

    /// Returns the cached profile, fetching its family when not cached.
    pub fn ensure_profile(&mut self, profile_id: &str) -> Result<Profile, TraversalError> {
        let id = self.canonical_id(profile_id)?;
        if let Some(profile) = self.store.get_profile(&id)? {
            return Ok(profile);
        }
        let canonical = match self.fetch_family(&id)? {
            Ok(listing) => listing.focus.id,
            Err(source) => {
                return Err(TraversalError::Remote {
                    profile_id: id,
                    source,
                })
            }
        };
        self.store
            .get_profile(&canonical)?
            .ok_or_else(|| TraversalError::Store(StoreError::MissingProfile(canonical)))
    }

    /// Fetches the immediate family of `profile_id` from the remote graph,
    /// caching everything it reveals. Never answered from the cache.
    pub fn family_listing(&mut self, profile_id: &str) -> Result<FamilyListing, TraversalError> {
        let id = self.canonical_id(profile_id)?;
        match self.fetch_family(&id)? {
            Ok(listing) => Ok(listing),
            Err(source) => Err(TraversalError::Remote {
                profile_id: id,
                source,
            }),
        }
    }

    /// Resolves the father of `profile_id`, cache first.
    ///
    /// Without a cached link, unions already in the cache are consulted
    /// before the remote graph.
    pub fn father_of(&mut self, profile_id: &str) -> Result<FatherLookup, TraversalError> {
        let mut id = self.canonical_id(profile_id)?;

        if self.refresh_pending(&id) {
            match self.fetch_family(&id)? {
                Ok(listing) => id = listing.focus.id,
                Err(err) => {
                    return Ok(match self.store.get_father_link(&id)? {
                        Some(link) => FatherLookup::Found(link.father_id),
                        None => FatherLookup::Unavailable(err),
                    })
                }
            }
        } else if let Some(link) = self.store.get_father_link(&id)? {
            return Ok(FatherLookup::Found(link.father_id));
        } else if let Some(father_id) = self.father_from_unions(&id)? {
            return Ok(FatherLookup::Found(father_id));
        } else if self.store.is_family_fetched(&id)? {
            return Ok(FatherLookup::NoFather);
        } else {
            match self.fetch_family(&id)? {
                Ok(listing) => id = listing.focus.id,
                Err(err) => return Ok(FatherLookup::Unavailable(err)),
            }
        }

        if let Some(link) = self.store.get_father_link(&id)? {
            return Ok(FatherLookup::Found(link.father_id));
        }
        Ok(match self.father_from_unions(&id)? {
            Some(father_id) => FatherLookup::Found(father_id),
            None => FatherLookup::NoFather,
        })
    }

    /// Lists the cached male children of `profile_id` in listing order,
    /// fetching the family first when it was never fetched.
    pub fn sons_of(&mut self, profile_id: &str) -> Result<SonsLookup, TraversalError> {
        let mut id = self.canonical_id(profile_id)?;

        if self.refresh_pending(&id) || !self.store.is_family_fetched(&id)? {
            match self.fetch_family(&id)? {
                Ok(listing) => id = listing.focus.id,
                Err(err) => return Ok(SonsLookup::Unavailable(err)),
            }
        }

        let mut sons = Vec::new();
        for child_id in self.store.get_children(&id)? {
            let is_male = self
                .store
                .get_profile(&child_id)?
                .map(|child| child.is_male())
                .unwrap_or(false);
            if is_male {
                sons.push(child_id);
            }
        }
        Ok(SonsLookup::Listed(sons))
    }

    /// Breadth-first walk from `start` up to `max_depth` generations.
    pub fn traverse(
        &mut self,
        start: &str,
        direction: Direction,
        max_depth: u32,
    ) -> Result<TraversalReport, TraversalError> {
        let start = self.canonical_id(start)?;
        let calls_before = self.remote_calls;
        let mut report = TraversalReport::new(start.clone(), direction, max_depth);

        let mut seen: HashSet<ProfileId> = HashSet::from([start.clone()]);
        let mut frontier = VecDeque::from([Visit {
            profile_id: start,
            generation: 0,
            reached_from: None,
        }]);

        while let Some(visit) = frontier.pop_front() {
            let current = visit.profile_id.clone();
            let generation = visit.generation;
            report.visits.push(visit);

            if generation >= max_depth {
                report.depth_limited.push(current);
                continue;
            }

            let next = match direction {
                Direction::Up => match self.father_of(&current)? {
                    FatherLookup::Found(father_id) => vec![father_id],
                    FatherLookup::NoFather => Vec::new(),
                    FatherLookup::Unavailable(err) => {
                        report.skipped.push(SkippedBranch {
                            profile_id: current.clone(),
                            reason: SkipReason::Remote(err),
                        });
                        Vec::new()
                    }
                },
                Direction::Down => match self.sons_of(&current)? {
                    SonsLookup::Listed(sons) => sons,
                    SonsLookup::Unavailable(err) => {
                        report.skipped.push(SkippedBranch {
                            profile_id: current.clone(),
                            reason: SkipReason::Remote(err),
                        });
                        Vec::new()
                    }
                },
            };

            for next_id in next {
                if !seen.insert(next_id.clone()) {
                    warn!(
                        "event=traverse module=service status=cycle profile_id={} revisited={}",
                        current, next_id
                    );
                    report.skipped.push(SkippedBranch {
                        profile_id: current.clone(),
                        reason: SkipReason::Cycle { revisited: next_id },
                    });
                    continue;
                }
                frontier.push_back(Visit {
                    profile_id: next_id,
                    generation: generation + 1,
                    reached_from: Some(current.clone()),
                });
            }
        }

        report.rejected_links = self.take_rejected_links();
        report.remote_calls = self.remote_calls - calls_before;
        info!(
            "event=traverse module=service status=ok direction={} start={} visited={} skipped={} remote_calls={}",
            direction.as_str(),
            report.start_id,
            report.visits.len(),
            report.skipped.len(),
            report.remote_calls
        );
        Ok(report)
    }

    fn refresh_pending(&self, profile_id: &str) -> bool {
        self.refresh && !self.refreshed.contains(profile_id)
    }

    /// Fetches and absorbs one family listing. The outer error is a store
    /// failure; the inner one a remote failure for this branch only.
    fn fetch_family(
        &mut self,
        profile_id: &str,
    ) -> Result<Result<FamilyListing, RemoteError>, TraversalError> {
        self.remote_calls += 1;
        let listing = match self.remote.get_family(profile_id) {
            Ok(listing) => listing,
            Err(err) => {
                warn!(
                    "event=fetch_family module=service status=error profile_id={} kind={}",
                    profile_id,
                    err.kind()
                );
                return Ok(Err(err));
            }
        };
        self.absorb_family(profile_id, &listing)?;
        self.refreshed.insert(profile_id.to_string());
        self.refreshed.insert(listing.focus.id.clone());
        Ok(Ok(listing))
    }

    fn absorb_family(
        &mut self,
        requested_id: &str,
        listing: &FamilyListing,
    ) -> Result<(), TraversalError> {
        let FamilyListing {
            focus,
            father,
            mother,
            spouses,
            children,
            unions,
        } = listing;

        self.store.put_profile(focus)?;
        if focus.id != requested_id {
            self.store.put_alias(requested_id, &focus.id)?;
            info!(
                "event=profile_alias module=service status=ok alias={} canonical={}",
                requested_id, focus.id
            );
        }

        for union in unions {
            self.store.put_union(union)?;
        }
        for relative in mother.iter().chain(spouses).chain(children) {
            self.store.put_profile(relative)?;
        }

        if let Some(father) = father.as_ref().filter(|father| father.is_male()) {
            self.store.put_profile(father)?;
            if !focus.is_female() {
                self.record_link(PaternalLink::discovered(&father.id, &focus.id, 0))?;
            }
        }
        // A mother's children reach their father through unions instead.
        if !focus.is_female() {
            for (order, son) in listing.sons() {
                self.record_link(PaternalLink::discovered(&focus.id, &son.id, order as i64))?;
            }
        }

        self.store.mark_family_fetched(&focus.id)?;
        Ok(())
    }

    /// Stores a father -> son link unless it closes a cycle or contradicts
    /// the cached father. Returns whether the link is now cached.
    fn record_link(&mut self, link: PaternalLink) -> Result<bool, TraversalError> {
        if self.is_ancestor(&link.son_id, &link.father_id)? {
            warn!(
                "event=paternal_link module=service status=rejected reason=cycle father_id={} son_id={}",
                link.father_id, link.son_id
            );
            self.rejected.push(RejectedLink {
                father_id: link.father_id,
                son_id: link.son_id,
                reason: LinkRejection::Cycle,
            });
            return Ok(false);
        }

        match self.store.put_paternal_link(&link)? {
            LinkWrite::ConflictingFather { existing_father } => {
                warn!(
                    "event=paternal_link module=service status=rejected reason=conflicting_father father_id={} son_id={} existing_father={}",
                    link.father_id, link.son_id, existing_father
                );
                self.rejected.push(RejectedLink {
                    father_id: link.father_id,
                    son_id: link.son_id,
                    reason: LinkRejection::ConflictingFather { existing_father },
                });
                Ok(false)
            }
            LinkWrite::Inserted | LinkWrite::AlreadyPresent => Ok(true),
        }
    }

    /// Father named by the cached unions listing `son_id` as a child.
    ///
    /// Resolves only when exactly one male partner appears across those
    /// unions. The link is stored with union provenance.
    fn father_from_unions(&mut self, son_id: &str) -> Result<Option<ProfileId>, TraversalError> {
        let is_male = self
            .store
            .get_profile(son_id)?
            .map(|son| son.is_male())
            .unwrap_or(false);
        if !is_male {
            return Ok(None);
        }

        let mut candidates: Vec<ProfileId> = Vec::new();
        for union in self.store.unions_with_child(son_id)? {
            for partner_id in union.partner_ids {
                if partner_id == son_id || candidates.contains(&partner_id) {
                    continue;
                }
                let male = self
                    .store
                    .get_profile(&partner_id)?
                    .map(|partner| partner.is_male())
                    .unwrap_or(false);
                if male {
                    candidates.push(partner_id);
                }
            }
        }

        let father_id = match candidates.as_slice() {
            [single] => single.clone(),
            [] => return Ok(None),
            _ => {
                warn!(
                    "event=union_father module=service status=ambiguous son_id={} candidates={}",
                    son_id,
                    candidates.len()
                );
                return Ok(None);
            }
        };

        let order = self.store.get_children(&father_id)?.len() as i64;
        if !self.record_link(PaternalLink::from_union(&father_id, son_id, order))? {
            return Ok(None);
        }
        info!(
            "event=union_father module=service status=ok son_id={} father_id={}",
            son_id, father_id
        );
        Ok(Some(father_id))
    }

    /// Whether `candidate` is `profile_id` itself or one of its cached
    /// paternal ancestors.
    fn is_ancestor(&self, candidate: &str, profile_id: &str) -> Result<bool, TraversalError> {
        let mut current = profile_id.to_string();
        let mut seen = HashSet::new();
        loop {
            if current == candidate {
                return Ok(true);
            }
            if !seen.insert(current.clone()) {
                return Ok(false);
            }
            match self.store.get_father_link(&current)? {
                Some(link) => current = link.father_id,
                None => return Ok(false),
            }
        }
    }
}
