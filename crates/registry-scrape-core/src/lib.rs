//! # registry-scrape core
//!
//! Shared logic for registry-scrape: data models, name/number
//! normalization, tiered entity matching, registry page extractors, the
//! scrape item lifecycle and the store traits.
//!
//! This crate does no network or database I/O. The `registry-scrape`
//! crate supplies the HTTP fetcher, the SQLite store and the worker pool.

pub mod extract;
pub mod lifecycle;
pub mod matcher;
pub mod models;
pub mod normalize;
pub mod store;
