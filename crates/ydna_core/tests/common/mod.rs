//! Shared fixtures: a scripted remote graph and a virtual-clock pacer.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use ydna_core::remote::throttle::Pacer;
use ydna_core::{FamilyListing, Gender, Profile, RemoteError, RemoteGraph};

pub fn male(id: &str, name: &str) -> Profile {
    Profile::new(id, name, Gender::Male)
}

pub fn female(id: &str, name: &str) -> Profile {
    Profile::new(id, name, Gender::Female)
}

/// Remote graph answering from fixed listings, with optional queued
/// responses consumed before the fixed ones.
#[derive(Default)]
pub struct ScriptedGraph {
    listings: HashMap<String, FamilyListing>,
    queued: HashMap<String, VecDeque<Result<FamilyListing, RemoteError>>>,
    pub calls: Vec<String>,
}

impl ScriptedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listing(mut self, requested_id: &str, listing: FamilyListing) -> Self {
        self.listings.insert(requested_id.to_string(), listing);
        self
    }

    /// Queues a one-shot response for `requested_id`.
    pub fn then(mut self, requested_id: &str, response: Result<FamilyListing, RemoteError>) -> Self {
        self.queued
            .entry(requested_id.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn calls_for(&self, requested_id: &str) -> usize {
        self.calls.iter().filter(|id| *id == requested_id).count()
    }
}

impl RemoteGraph for ScriptedGraph {
    fn get_family(&mut self, profile_id: &str) -> Result<FamilyListing, RemoteError> {
        self.calls.push(profile_id.to_string());
        if let Some(response) = self
            .queued
            .get_mut(profile_id)
            .and_then(|queue| queue.pop_front())
        {
            return response;
        }
        self.listings
            .get(profile_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(profile_id.to_string()))
    }
}

/// Remote graph that fails the test when called.
pub struct OfflineGraph;

impl RemoteGraph for OfflineGraph {
    fn get_family(&mut self, profile_id: &str) -> Result<FamilyListing, RemoteError> {
        panic!("unexpected remote fetch for {profile_id}");
    }
}

/// Pacer on a virtual clock; sleeping advances the clock instantly.
pub struct VirtualPacer {
    origin: Instant,
    elapsed: Cell<Duration>,
    pub sleeps: Vec<Duration>,
}

impl VirtualPacer {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Cell::new(Duration::ZERO),
            sleeps: Vec::new(),
        }
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps.iter().sum()
    }
}

impl Pacer for VirtualPacer {
    fn now(&self) -> Instant {
        self.origin + self.elapsed.get()
    }

    fn sleep(&mut self, duration: Duration) {
        self.sleeps.push(duration);
        self.elapsed.set(self.elapsed.get() + duration);
    }
}
