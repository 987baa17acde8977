//! Taxon Eviction: reconciliation controller for derived taxon index data
//!
//! Periodically removes derived records from the search index once their
//! pipeline runs are gone from the relational store or past retention. The
//! index engine runs each bulk delete as a background task; every cycle
//! re-derives task state from the stores, so cycles can be repeated or
//! overlapped safely.

pub mod cli;
pub mod config;
pub mod error;
pub mod eviction;
pub mod logging;
pub mod store;
pub mod tracking;
pub mod types;
