//! Local store abstraction and its SQLite implementation.
//!
//! # Responsibility
//! - Define the cache contract the traversal, root-finding and propagation
//!   engines depend on.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Writes are append-or-upsert; nothing is ever deleted.
//! - Each write is one autocommit statement, durable before it returns.

pub mod store;
