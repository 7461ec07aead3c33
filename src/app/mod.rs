// LogThreads - app/mod.rs
//
// Application layer: chunked reading, the multi-file queue, the page cache
// and pattern persistence.
// Dependencies: core layer.
// Must NOT depend on: platform specifics.

pub mod page_cache;
pub mod pattern_store;
pub mod queue;
pub mod reader;
