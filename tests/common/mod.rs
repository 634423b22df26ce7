//! Shared test utilities
//!
//! Builds a small archived site in a `MemoryStore` and serves it through
//! the full router, so tests exercise the same path a browser would.

pub mod fixtures;
