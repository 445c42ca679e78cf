//! Core memory store — write path, read path, and type definitions.
//!
//! This module contains the single-writer store facade ([`store`]), the
//! hybrid/text/vector query shapes ([`search`]), and the shared type
//! definitions ([`types`]).

pub mod search;
pub mod store;
pub mod types;

pub use store::{content_hash, MemoryStore};
pub use types::{
    AddOutcome, HistoryAction, ListOptions, Memory, MemoryFilter, MemoryHistoryItem, Owner,
    SearchMode, SearchOptions, SearchResponse,
};
