//! # Registry Scrape
//!
//! A resumable scraper for a public corporate registry, with structured
//! extraction of company profiles, officers and charges, and a tiered
//! matcher that reconciles an external company dataset against the
//! scraped registry records.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────────┐   ┌──────────┐
//! │  seed    │──▶│ scrape     │──▶│  Controller  │──▶│  SQLite  │
//! │ (ids)    │   │ queue      │   │ fetch+parse  │   │ rows+raw │
//! └──────────┘   └─────▲──────┘   └──────┬───────┘   └────┬─────┘
//!                      │  follow-up      │                │
//!                      └─────────────────┘                ▼
//!                                                   ┌──────────┐
//!                                                   │ matcher  │
//!                                                   └──────────┘
//! ```
//!
//! Pure logic (models, normalization, matching, HTML extraction, item
//! lifecycle, store traits) lives in `registry-scrape-core`; this crate
//! adds the SQLite store, HTTP fetching, the worker pool and the CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! rgs init                         # create database
//! rgs seed 01234567 SC002116       # queue overview pages
//! rgs run --workers 4              # scrape until the queue drains
//! rgs stats                        # queue overview
//! rgs import-external land.csv     # load the external dataset
//! rgs match                        # reconcile against the registry
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the store traits |
//! | [`codec`] | Raw page compression and hashing |
//! | [`fetcher`] | Page fetching and failure classification |
//! | [`controller`] | Per-item fetch → extract → persist |
//! | [`pool`] | Concurrent workers, pacing, shutdown |
//! | [`progress`] | Per-item progress on stderr |
//! | [`scrape`] | `rgs run` wiring |
//! | [`queue`] | Seeding and requeue commands |
//! | [`matching`] | External import and registry matching |
//! | [`stats`] | Queue statistics |
//! | [`charges`] | Per-entity charge listing |

pub mod charges;
pub mod codec;
pub mod config;
pub mod controller;
pub mod db;
pub mod fetcher;
pub mod matching;
pub mod migrate;
pub mod pool;
pub mod progress;
pub mod queue;
pub mod scrape;
pub mod sqlite_store;
pub mod stats;
