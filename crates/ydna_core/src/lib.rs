//! Core of the Y-DNA paternal-line propagator.
//! Owns the local cache, remote access and the traversal and propagation rules.

pub mod config;
pub mod db;
pub mod export;
pub mod logging;
pub mod model;
pub mod remote;
pub mod repo;
pub mod service;

pub use config::{AppConfig, ConfigError};
pub use db::{open_db, open_db_in_memory, Connection, DbError};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::haplogroup::{AssignmentProvenance, Confidence, HaplogroupAssignment, NewAssignment};
pub use model::profile::{normalize_profile_id, Gender, PaternalLink, Profile, ProfileId, Union};
pub use model::tree::{NewPaternalTree, PaternalTree, TreeMember};
pub use remote::geni::{GeniClient, GeniClientConfig};
pub use remote::throttle::{Pacer, RetryPolicy, SystemPacer, ThrottledGraph};
pub use remote::{FamilyListing, RemoteError, RemoteGraph};
pub use repo::store::{LocalStore, SqliteStore, StoreError, StoreStatistics};
pub use service::propagation::{
    AssignmentOutcome, ConflictPolicy, FullTreeReport, PropagationDirection, PropagationError,
    PropagationReport, PropagationRequest, PropagationService,
};
pub use service::root_finder::{
    find_root, locate_root, RootFinderError, RootLocation, RootStatus, RootSummary,
};
pub use service::traversal::{Direction, TraversalError, TraversalReport, TraversalService};
pub use service::tree_builder::{build_paternal_tree, TreeBuildReport, TreeBuildRequest};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
