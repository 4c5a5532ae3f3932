//! Storage abstraction for the scrape queue and entity tables.
//!
//! [`ScrapeStore`] owns the work queue and the rows extracted from fetched
//! pages; [`EntityStore`] owns the two record sets the matcher reconciles
//! and its results. Both are implemented by the SQLite store in the
//! runtime crate and by [`memory::InMemoryStore`] for tests.
//!
//! Implementations must be `Send + Sync` to be shared across workers.
//!
//! # Claim tokens
//!
//! [`ScrapeStore::claim_next`] stamps the item with a fresh token. Every
//! later transition for that item ([`complete`](ScrapeStore::complete),
//! [`fail`](ScrapeStore::fail)) applies only while the token still matches,
//! so a worker whose claim expired cannot overwrite another worker's result.

pub mod memory;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::lifecycle::{FailureOutcome, RetryPolicy};
use crate::models::{
    ChargeDetail, ChargeRecord, CompanyOverview, CompanyRef, ItemKey, ItemStatus, MatchResult,
    OfficerRecord, PageType, ScrapeItem,
};

/// Everything persisted when a claimed item completes successfully.
#[derive(Debug, Clone)]
pub struct CompletedPage {
    /// Compressed page bytes.
    pub raw_content: Vec<u8>,
    /// Hex SHA-256 of the uncompressed page.
    pub content_hash: Option<String>,
    /// `Parsed` or `Exhausted`.
    pub status: ItemStatus,
    pub anomalies: u32,
    pub charges: Vec<ChargeRecord>,
    pub officers: Vec<OfficerRecord>,
    pub overview: Option<CompanyOverview>,
    /// Fills the empty fields of the stored charge with the same detail id.
    pub charge_detail: Option<ChargeDetail>,
    /// Items to create in the same transaction.
    pub follow_ups: Vec<ItemKey>,
}

impl CompletedPage {
    /// A page with no extracted rows.
    pub fn bare(raw_content: Vec<u8>, status: ItemStatus) -> Self {
        Self {
            raw_content,
            content_hash: None,
            status,
            anomalies: 0,
            charges: Vec::new(),
            officers: Vec::new(),
            overview: None,
            charge_detail: None,
            follow_ups: Vec::new(),
        }
    }
}

/// Item counts by page type and status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub by_type_status: HashMap<(PageType, ItemStatus), u64>,
    /// Failed items that will not be requeued automatically.
    pub terminal_failed: u64,
}

impl QueueCounts {
    pub fn get(&self, page_type: PageType, status: ItemStatus) -> u64 {
        self.by_type_status
            .get(&(page_type, status))
            .copied()
            .unwrap_or(0)
    }

    pub fn status_total(&self, status: ItemStatus) -> u64 {
        self.by_type_status
            .iter()
            .filter(|((_, s), _)| *s == status)
            .map(|(_, n)| *n)
            .sum()
    }

    pub fn total(&self) -> u64 {
        self.by_type_status.values().sum()
    }
}

/// Persistent scrape queue plus extracted rows.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`seed`](ScrapeStore::seed) | Create Overview items for new entities |
/// | [`enqueue`](ScrapeStore::enqueue) | Create arbitrary items |
/// | [`claim_next`](ScrapeStore::claim_next) | Atomically claim one pending item |
/// | [`complete`](ScrapeStore::complete) | Persist a parsed page |
/// | [`fail`](ScrapeStore::fail) | Record a failed attempt |
/// | [`requeue_failed`](ScrapeStore::requeue_failed) | Failed → Pending once backoff elapsed |
/// | [`release_stale`](ScrapeStore::release_stale) | Fail claims held too long |
/// | [`reset_failed`](ScrapeStore::reset_failed) | Manual retry of failed items |
#[async_trait]
pub trait ScrapeStore: Send + Sync {
    /// Insert a Pending Overview item per entity; existing items are kept.
    ///
    /// Returns the number of items created.
    async fn seed(&self, entity_ids: &[String]) -> Result<usize>;

    /// Insert Pending items for the given keys; existing keys are kept.
    async fn enqueue(&self, keys: &[ItemKey]) -> Result<usize>;

    /// Claim the next Pending item whose `retry_at` has passed.
    ///
    /// Overview items come first, then dependent types in priority order,
    /// then oldest first. The claimed item has `attempts` already
    /// incremented and carries a fresh claim token.
    async fn claim_next(&self, now: i64) -> Result<Option<ScrapeItem>>;

    /// Persist a completed page atomically: raw blob, rows, status and
    /// follow-up items. Returns `false` if the claim was lost.
    ///
    /// Charges already stored for the entity are kept as they are; a
    /// charge detail only fills fields its stored charge left empty.
    async fn complete(&self, item: &ScrapeItem, page: &CompletedPage) -> Result<bool>;

    /// Mark a claimed item Failed. Returns `false` if the claim was lost.
    async fn fail(&self, item: &ScrapeItem, error: &str, outcome: FailureOutcome) -> Result<bool>;

    /// Move non-terminal Failed items whose `retry_at` has passed back to
    /// Pending. Returns the number requeued.
    async fn requeue_failed(&self, now: i64) -> Result<usize>;

    /// Fail InProgress items claimed before `claimed_before` with
    /// "claim expired", applying `policy` to decide terminality.
    async fn release_stale(&self, claimed_before: i64, policy: &RetryPolicy, now: i64)
        -> Result<usize>;

    /// Reset Failed items (terminal included) to Pending with zero
    /// attempts, optionally for one entity only.
    async fn reset_failed(&self, entity_id: Option<&str>) -> Result<usize>;

    async fn get_item(&self, key: &ItemKey) -> Result<Option<ScrapeItem>>;

    /// All items for an entity, by page type priority, page index, then
    /// detail id.
    async fn items_for(&self, entity_id: &str) -> Result<Vec<ScrapeItem>>;

    /// Stored charges for an entity, by source page then discovery order.
    async fn charges_for(&self, entity_id: &str) -> Result<Vec<ChargeRecord>>;

    async fn officers_for(&self, entity_id: &str) -> Result<Vec<OfficerRecord>>;

    async fn queue_counts(&self) -> Result<QueueCounts>;

    /// Items that still need work: Pending, InProgress, or non-terminal
    /// Failed.
    async fn outstanding(&self) -> Result<u64>;
}

/// Registry and external record tables plus match results.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Insert or update a registry company keyed by company number.
    async fn upsert_registry(&self, overview: &CompanyOverview) -> Result<()>;

    /// Registry companies in insertion order.
    async fn registry_records(&self) -> Result<Vec<CompanyRef>>;

    /// External records in insertion order.
    async fn external_records(&self) -> Result<Vec<CompanyRef>>;

    /// Insert or update external records keyed by id.
    async fn insert_external_records(&self, records: &[CompanyRef]) -> Result<usize>;

    /// Replace all stored match results in one transaction.
    async fn replace_match_results(&self, results: &[MatchResult]) -> Result<()>;

    async fn match_results(&self) -> Result<Vec<MatchResult>>;
}
