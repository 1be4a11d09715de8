//! Core synthesis logic: tree, deferred values, dependency graph, emission.

pub mod app;
pub mod assembly;
pub mod deferred;
pub mod dialect;
pub mod error;
pub mod graph;
pub mod hasher;
pub mod parser;
pub mod resolver;
pub mod synth;
pub mod tree;
pub mod types;
