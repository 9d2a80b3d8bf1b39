//! Paternal-line engines.
//!
//! # Responsibility
//! - Traverse the paternal line cache-first with remote fallback.
//! - Locate root ancestors and propagate haplogroups along the line.
//! - Record named paternal trees.
//! - Keep the CLI decoupled from storage and HTTP details.

pub mod propagation;
pub mod root_finder;
pub mod traversal;
pub mod tree_builder;
