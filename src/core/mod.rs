// LogThreads - core/mod.rs
//
// Core business logic layer: parsing, pattern matching, grouping.
// Dependencies: util, regex, chrono, serde.
// Must NOT depend on: app, platform, or touch the filesystem.

pub mod bundle;
pub mod extract;
pub mod filter;
pub mod grouping;
pub mod model;
pub mod parser;
pub mod pattern;
