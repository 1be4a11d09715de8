//! Cairn: construct-tree synthesis into per-unit deployment documents.
//!
//! Deferred values with memoized, cycle-checked resolution. Unit-scoped
//! dependency graph with explicit exports. Deterministic, BLAKE3-fingerprinted
//! output.

pub mod cli;
pub mod core;
