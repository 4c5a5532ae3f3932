//! In-memory [`ScrapeStore`] and [`EntityStore`] implementation for tests.
//!
//! All state lives behind one `std::sync::RwLock`, so every operation is
//! atomic with respect to every other one, matching the transactional
//! guarantees of the SQLite store.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::lifecycle::{can_transition, FailureOutcome, RetryPolicy};
use crate::models::{
    ChargeRecord, CompanyOverview, CompanyRef, ItemKey, ItemStatus, MatchResult, OfficerRecord,
    PageType, ScrapeItem,
};

use super::{CompletedPage, EntityStore, QueueCounts, ScrapeStore};

#[derive(Default)]
struct State {
    items: Vec<ScrapeItem>,
    charges: Vec<ChargeRecord>,
    officers: Vec<OfficerRecord>,
    registry: Vec<CompanyOverview>,
    external: Vec<CompanyRef>,
    matches: Vec<MatchResult>,
}

impl State {
    fn find(&self, key: &ItemKey) -> Option<&ScrapeItem> {
        self.items.iter().find(|i| {
            i.entity_id == key.entity_id
                && i.page_type == key.page_type
                && i.page_index == key.page_index
                && i.detail_id == key.detail_id
        })
    }

    fn insert_key(&mut self, key: &ItemKey, now: i64) -> bool {
        if self.find(key).is_some() {
            return false;
        }
        let id = self.items.len() as i64 + 1;
        self.items.push(ScrapeItem {
            id,
            entity_id: key.entity_id.clone(),
            page_type: key.page_type,
            page_index: key.page_index,
            detail_id: key.detail_id.clone(),
            status: ItemStatus::Pending,
            attempts: 0,
            last_error: None,
            raw_content: None,
            content_hash: None,
            anomalies: 0,
            terminal: false,
            claim_token: None,
            claimed_at: None,
            retry_at: None,
            created_at: now,
            updated_at: now,
        });
        true
    }

    /// The claimed item, if `claimed` still holds the claim.
    fn held(&mut self, claimed: &ScrapeItem) -> Option<&mut ScrapeItem> {
        let token = claimed.claim_token.as_deref()?;
        self.items.iter_mut().find(|i| {
            i.id == claimed.id
                && i.status == ItemStatus::InProgress
                && i.claim_token.as_deref() == Some(token)
        })
    }
}

/// In-memory store for tests.
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

fn fail_item(item: &mut ScrapeItem, error: &str, outcome: FailureOutcome, now: i64) {
    debug_assert!(can_transition(item.status, ItemStatus::Failed));
    item.status = ItemStatus::Failed;
    item.last_error = Some(error.to_string());
    item.terminal = outcome.terminal;
    item.retry_at = outcome.retry_at;
    item.claim_token = None;
    item.claimed_at = None;
    item.updated_at = now;
}

#[async_trait]
impl ScrapeStore for InMemoryStore {
    async fn seed(&self, entity_ids: &[String]) -> Result<usize> {
        let keys: Vec<ItemKey> = entity_ids
            .iter()
            .map(|id| ItemKey::first(id.clone(), PageType::Overview))
            .collect();
        self.enqueue(&keys).await
    }

    async fn enqueue(&self, keys: &[ItemKey]) -> Result<usize> {
        let now = now_ts();
        let mut state = self.write()?;
        Ok(keys.iter().filter(|k| state.insert_key(k, now)).count())
    }

    async fn claim_next(&self, now: i64) -> Result<Option<ScrapeItem>> {
        let mut state = self.write()?;
        let next = state
            .items
            .iter_mut()
            .filter(|i| i.status == ItemStatus::Pending && i.retry_at.map_or(true, |t| t <= now))
            .min_by_key(|i| (i.page_type.priority(), i.id));

        Ok(next.map(|item| {
            item.status = ItemStatus::InProgress;
            item.attempts += 1;
            item.claim_token = Some(uuid::Uuid::new_v4().to_string());
            item.claimed_at = Some(now);
            item.updated_at = now;
            item.clone()
        }))
    }

    async fn complete(&self, claimed: &ScrapeItem, page: &CompletedPage) -> Result<bool> {
        let now = now_ts();
        let mut state = self.write()?;

        let item = match state.held(claimed) {
            Some(i) => i,
            None => return Ok(false),
        };
        debug_assert!(can_transition(item.status, page.status));
        item.status = page.status;
        item.raw_content = Some(page.raw_content.clone());
        item.content_hash = page.content_hash.clone();
        item.anomalies = page.anomalies;
        item.last_error = None;
        item.terminal = false;
        item.retry_at = None;
        item.claim_token = None;
        item.claimed_at = None;
        item.updated_at = now;

        for charge in &page.charges {
            let exists = state
                .charges
                .iter()
                .any(|c| c.entity_id == charge.entity_id && c.charge_code == charge.charge_code);
            if !exists {
                state.charges.push(charge.clone());
            }
        }

        state.officers.retain(|o| {
            !(o.entity_id == claimed.entity_id
                && claimed.page_type == PageType::Officers
                && o.source_page_index == claimed.page_index)
        });
        state.officers.extend(page.officers.iter().cloned());

        if let Some(overview) = &page.overview {
            upsert_overview(&mut state.registry, overview);
        }

        if let Some(detail) = &page.charge_detail {
            for charge in state.charges.iter_mut().filter(|c| {
                c.entity_id == detail.entity_id && c.detail_id() == Some(detail.detail_id.as_str())
            }) {
                charge.merge_detail(detail);
            }
        }

        for key in &page.follow_ups {
            state.insert_key(key, now);
        }
        Ok(true)
    }

    async fn fail(&self, claimed: &ScrapeItem, error: &str, outcome: FailureOutcome) -> Result<bool> {
        let now = now_ts();
        let mut state = self.write()?;
        match state.held(claimed) {
            Some(item) => {
                fail_item(item, error, outcome, now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn requeue_failed(&self, now: i64) -> Result<usize> {
        let mut state = self.write()?;
        let mut n = 0;
        for item in state.items.iter_mut() {
            if item.status == ItemStatus::Failed
                && !item.terminal
                && item.retry_at.map_or(true, |t| t <= now)
            {
                item.status = ItemStatus::Pending;
                item.last_error = None;
                item.updated_at = now;
                n += 1;
            }
        }
        Ok(n)
    }

    async fn release_stale(
        &self,
        claimed_before: i64,
        policy: &RetryPolicy,
        now: i64,
    ) -> Result<usize> {
        let mut state = self.write()?;
        let mut n = 0;
        for item in state.items.iter_mut() {
            if item.status == ItemStatus::InProgress
                && item.claimed_at.is_some_and(|t| t < claimed_before)
            {
                let outcome =
                    policy.on_failure(item.attempts, crate::lifecycle::FailureKind::Transient, now);
                fail_item(item, "claim expired", outcome, now);
                n += 1;
            }
        }
        Ok(n)
    }

    async fn reset_failed(&self, entity_id: Option<&str>) -> Result<usize> {
        let now = now_ts();
        let mut state = self.write()?;
        let mut n = 0;
        for item in state.items.iter_mut() {
            if item.status == ItemStatus::Failed
                && entity_id.map_or(true, |e| e == item.entity_id)
            {
                item.status = ItemStatus::Pending;
                item.attempts = 0;
                item.terminal = false;
                item.last_error = None;
                item.retry_at = None;
                item.updated_at = now;
                n += 1;
            }
        }
        Ok(n)
    }

    async fn get_item(&self, key: &ItemKey) -> Result<Option<ScrapeItem>> {
        Ok(self.read()?.find(key).cloned())
    }

    async fn items_for(&self, entity_id: &str) -> Result<Vec<ScrapeItem>> {
        let mut items: Vec<ScrapeItem> = self
            .read()?
            .items
            .iter()
            .filter(|i| i.entity_id == entity_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            (a.page_type.priority(), a.page_index, &a.detail_id)
                .cmp(&(b.page_type.priority(), b.page_index, &b.detail_id))
        });
        Ok(items)
    }

    async fn charges_for(&self, entity_id: &str) -> Result<Vec<ChargeRecord>> {
        let mut charges: Vec<ChargeRecord> = self
            .read()?
            .charges
            .iter()
            .filter(|c| c.entity_id == entity_id)
            .cloned()
            .collect();
        // Stable sort keeps discovery order within a page.
        charges.sort_by_key(|c| c.source_page_index);
        Ok(charges)
    }

    async fn officers_for(&self, entity_id: &str) -> Result<Vec<OfficerRecord>> {
        let mut officers: Vec<OfficerRecord> = self
            .read()?
            .officers
            .iter()
            .filter(|o| o.entity_id == entity_id)
            .cloned()
            .collect();
        officers.sort_by_key(|o| o.source_page_index);
        Ok(officers)
    }

    async fn queue_counts(&self) -> Result<QueueCounts> {
        let state = self.read()?;
        let mut counts = QueueCounts::default();
        for item in &state.items {
            *counts
                .by_type_status
                .entry((item.page_type, item.status))
                .or_insert(0) += 1;
            if item.status == ItemStatus::Failed && item.terminal {
                counts.terminal_failed += 1;
            }
        }
        Ok(counts)
    }

    async fn outstanding(&self) -> Result<u64> {
        let state = self.read()?;
        Ok(state
            .items
            .iter()
            .filter(|i| match i.status {
                ItemStatus::Pending | ItemStatus::InProgress => true,
                ItemStatus::Failed => !i.terminal,
                _ => false,
            })
            .count() as u64)
    }
}

fn upsert_overview(registry: &mut Vec<CompanyOverview>, overview: &CompanyOverview) {
    match registry
        .iter_mut()
        .find(|r| r.company_number == overview.company_number)
    {
        Some(existing) => *existing = overview.clone(),
        None => registry.push(overview.clone()),
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn upsert_registry(&self, overview: &CompanyOverview) -> Result<()> {
        upsert_overview(&mut self.write()?.registry, overview);
        Ok(())
    }

    async fn registry_records(&self) -> Result<Vec<CompanyRef>> {
        Ok(self.read()?.registry.iter().map(CompanyRef::from).collect())
    }

    async fn external_records(&self) -> Result<Vec<CompanyRef>> {
        Ok(self.read()?.external.clone())
    }

    async fn insert_external_records(&self, records: &[CompanyRef]) -> Result<usize> {
        let mut state = self.write()?;
        for record in records {
            match state.external.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => state.external.push(record.clone()),
            }
        }
        Ok(records.len())
    }

    async fn replace_match_results(&self, results: &[MatchResult]) -> Result<()> {
        self.write()?.matches = results.to_vec();
        Ok(())
    }

    async fn match_results(&self) -> Result<Vec<MatchResult>> {
        Ok(self.read()?.matches.clone())
    }
}
