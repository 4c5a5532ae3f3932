//! Scrape queue controller.
//!
//! Drives one claimed item through fetch → compress → extract → persist
//! and applies the lifecycle rules from
//! [`registry_scrape_core::lifecycle`]. Every outcome is persisted before
//! [`Controller::process`] returns, so a crash between items never loses
//! more than the item in flight (whose claim later expires).

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use registry_scrape_core::extract::{extract_page, PageData};
use registry_scrape_core::lifecycle::{
    charge_detail_follow_ups, plan_completion, FailureKind, RetryPolicy,
};
use registry_scrape_core::models::{ItemStatus, PageType, ScrapeItem};
use registry_scrape_core::store::{CompletedPage, ScrapeStore};

use crate::codec;
use crate::config::ScrapeConfig;
use crate::fetcher::{page_url, Fetcher};

/// What happened to one processed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Stored as `Parsed` or `Exhausted`.
    Completed {
        status: ItemStatus,
        rows: usize,
        anomalies: usize,
        follow_ups: usize,
    },
    /// Stored as `Failed`.
    Failed {
        kind: FailureKind,
        terminal: bool,
        error: String,
    },
    /// The claim expired before the result could be stored.
    ClaimLost,
}

impl ItemOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ItemOutcome::Failed { .. })
    }
}

pub struct Controller {
    store: Arc<dyn ScrapeStore>,
    fetcher: Arc<dyn Fetcher>,
    base_url: String,
    policy: RetryPolicy,
    dependents: Vec<PageType>,
    charge_details: bool,
    compression_level: i32,
    stale_claim_secs: i64,
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

impl Controller {
    pub fn new(store: Arc<dyn ScrapeStore>, fetcher: Arc<dyn Fetcher>, config: &ScrapeConfig) -> Self {
        Self {
            store,
            fetcher,
            base_url: config.base_url.clone(),
            policy: config.retry_policy(),
            dependents: config.dependents.clone(),
            charge_details: config.charge_details,
            compression_level: config.compression_level,
            stale_claim_secs: config.stale_claim_secs,
        }
    }

    pub fn store(&self) -> &Arc<dyn ScrapeStore> {
        &self.store
    }

    /// Claim the next runnable item.
    pub async fn claim(&self) -> Result<Option<ScrapeItem>> {
        self.store.claim_next(now_ts()).await
    }

    /// Expire stale claims and requeue failed items whose backoff elapsed.
    pub async fn requeue_due(&self) -> Result<usize> {
        let now = now_ts();
        let released = self
            .store
            .release_stale(now - self.stale_claim_secs, &self.policy, now)
            .await?;
        if released > 0 {
            warn!(released, "released expired claims");
        }
        let requeued = self.store.requeue_failed(now).await?;
        if requeued > 0 {
            debug!(requeued, "requeued failed items");
        }
        Ok(requeued)
    }

    /// Claim and process a single item, if one is runnable.
    pub async fn run_one(&self) -> Result<Option<(ScrapeItem, ItemOutcome)>> {
        let item = match self.claim().await? {
            Some(item) => item,
            None => return Ok(None),
        };
        let outcome = self.process(&item).await?;
        Ok(Some((item, outcome)))
    }

    /// Process a claimed item and persist the outcome.
    ///
    /// Errors returned here are store errors that prevented even the
    /// failure from being recorded.
    pub async fn process(&self, item: &ScrapeItem) -> Result<ItemOutcome> {
        let key = item.key();
        let url = page_url(&self.base_url, &key);
        debug!(item = %key, url = %url, attempt = item.attempts, "fetching");

        let raw = match self.fetcher.fetch(&url).await {
            Ok(raw) => raw,
            Err(e) => return self.record_failure(item, e.kind(), &e.to_string()).await,
        };

        let blob = match codec::compress_page(&raw, self.compression_level) {
            Ok(b) => b,
            Err(e) => return self.record_failure(item, FailureKind::Permanent, &e.to_string()).await,
        };
        let html = match codec::decompress_html(&blob) {
            Ok(h) => h,
            Err(e) => return self.record_failure(item, FailureKind::Permanent, &e.to_string()).await,
        };

        let extracted = extract_page(&html, &key);
        for anomaly in &extracted.anomalies {
            warn!(%anomaly, "parse anomaly");
        }

        let completion = plan_completion(&key, extracted.has_next_page, &self.dependents);
        let rows = extracted.data.row_count();
        let mut page = CompletedPage::bare(blob, completion.status);
        page.content_hash = Some(codec::content_hash(&raw));
        page.anomalies = extracted.anomalies.len() as u32;
        page.follow_ups = completion.follow_ups;
        match extracted.data {
            PageData::Overview(overview) => page.overview = overview,
            PageData::Officers(officers) => page.officers = officers,
            PageData::Charges(charges) => {
                if self.charge_details {
                    page.follow_ups
                        .extend(charge_detail_follow_ups(&key.entity_id, &charges));
                }
                page.charges = charges;
            }
            PageData::ChargeDetail(detail) => page.charge_detail = detail,
            PageData::Insolvency => {}
        }

        match self.store.complete(item, &page).await {
            Ok(true) => {
                info!(
                    item = %key,
                    status = %completion.status,
                    rows,
                    anomalies = page.anomalies,
                    follow_ups = page.follow_ups.len(),
                    "page stored"
                );
                Ok(ItemOutcome::Completed {
                    status: completion.status,
                    rows,
                    anomalies: page.anomalies as usize,
                    follow_ups: page.follow_ups.len(),
                })
            }
            Ok(false) => {
                warn!(item = %key, "claim lost before page could be stored");
                Ok(ItemOutcome::ClaimLost)
            }
            Err(e) => {
                let message = format!("persist failed: {:#}", e);
                self.record_failure(item, FailureKind::Transient, &message)
                    .await
            }
        }
    }

    async fn record_failure(
        &self,
        item: &ScrapeItem,
        kind: FailureKind,
        error: &str,
    ) -> Result<ItemOutcome> {
        let outcome = self.policy.on_failure(item.attempts, kind, now_ts());
        if !self.store.fail(item, error, outcome).await? {
            warn!(item = %item.key(), "claim lost before failure could be stored");
            return Ok(ItemOutcome::ClaimLost);
        }
        warn!(
            item = %item.key(),
            attempt = item.attempts,
            terminal = outcome.terminal,
            error,
            "page failed"
        );
        Ok(ItemOutcome::Failed {
            kind,
            terminal: outcome.terminal,
            error: error.to_string(),
        })
    }
}
