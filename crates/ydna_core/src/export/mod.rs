//! File exports and imports.

pub mod csv;
