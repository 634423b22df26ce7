//! Integration tests for Arclight
//!
//! These tests go through the full router, store, rewriter, and response
//! pipeline exactly as a replayed browser request would.

#[path = "../common/mod.rs"]
pub mod common;

pub mod replay_flow;
pub mod rewrite_stream;
