//! Domain model for the paternal-line cache.
//!
//! # Responsibility
//! - Define profile, paternal link, union and haplogroup records shared by
//!   the store, the remote client and the engines, plus recorded paternal
//!   trees.
//!
//! # Invariants
//! - Profiles are keyed by the service-assigned id and never deleted.
//! - Haplogroup assignments form an append-only log per profile.

pub mod haplogroup;
pub mod profile;
pub mod tree;
