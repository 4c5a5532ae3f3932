//! Scrape item state machine.
//!
//! Pure decisions about what happens to an item after each step. The
//! stores apply these decisions; the controller drives them.
//!
//! ```text
//!            claim              parsed, next page
//! Pending ─────────► InProgress ─────────────────► Parsed (+ page n+1 Pending)
//!    ▲                  │  │
//!    │ requeue          │  └── last page ──────────► Exhausted
//!    │                  ▼
//!    └───────────── Failed ── ceiling / permanent ──► Failed (terminal)
//! ```

use crate::models::{ChargeRecord, ItemKey, ItemStatus, PageType};

/// Whether a failure may succeed on a later attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// How a failed item is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    /// No automatic requeue will happen.
    pub terminal: bool,
    /// Earliest unix time at which the item may be requeued.
    pub retry_at: Option<i64>,
}

/// Attempt ceiling and persisted backoff for failed items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_base_secs: i64,
    pub retry_max_secs: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_secs: 30,
            retry_max_secs: 900,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, doubling per attempt already made.
    pub fn backoff_secs(&self, attempts: u32) -> i64 {
        let exp = attempts.saturating_sub(1).min(30);
        self.retry_base_secs
            .max(0)
            .saturating_mul(1_i64 << exp)
            .min(self.retry_max_secs.max(0))
    }

    /// Decide how to record a failure after `attempts` fetch attempts.
    pub fn on_failure(&self, attempts: u32, kind: FailureKind, now: i64) -> FailureOutcome {
        if kind == FailureKind::Permanent || attempts >= self.max_attempts {
            FailureOutcome {
                terminal: true,
                retry_at: None,
            }
        } else {
            FailureOutcome {
                terminal: false,
                retry_at: Some(now + self.backoff_secs(attempts)),
            }
        }
    }
}

/// Final status of a successfully processed item and the work it spawns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: ItemStatus,
    pub follow_ups: Vec<ItemKey>,
}

/// Plan the completion of a fetched and extracted page.
///
/// * Paginated types with a next page are `Parsed` and enqueue page n+1.
/// * Paginated types on their last page are `Exhausted`.
/// * An Overview is `Parsed` and enqueues page 1 of each dependent type.
/// * Anything else is `Parsed`.
pub fn plan_completion(key: &ItemKey, has_next_page: bool, dependents: &[PageType]) -> Completion {
    if key.page_type.is_paginated() {
        if has_next_page {
            Completion {
                status: ItemStatus::Parsed,
                follow_ups: vec![ItemKey::new(
                    key.entity_id.clone(),
                    key.page_type,
                    key.page_index + 1,
                )],
            }
        } else {
            Completion {
                status: ItemStatus::Exhausted,
                follow_ups: Vec::new(),
            }
        }
    } else if key.page_type == PageType::Overview {
        let mut follow_ups: Vec<ItemKey> = Vec::new();
        for pt in dependents {
            if *pt != PageType::Overview && !follow_ups.iter().any(|k| k.page_type == *pt) {
                follow_ups.push(ItemKey::first(key.entity_id.clone(), *pt));
            }
        }
        Completion {
            status: ItemStatus::Parsed,
            follow_ups,
        }
    } else {
        Completion {
            status: ItemStatus::Parsed,
            follow_ups: Vec::new(),
        }
    }
}

/// Detail pages for the linked charges of a parsed charges page, one per
/// detail id.
pub fn charge_detail_follow_ups(entity_id: &str, charges: &[ChargeRecord]) -> Vec<ItemKey> {
    let mut keys: Vec<ItemKey> = Vec::new();
    for id in charges.iter().filter_map(ChargeRecord::detail_id) {
        if !keys.iter().any(|k| k.detail_id.as_deref() == Some(id)) {
            keys.push(ItemKey::charge_detail(entity_id, id));
        }
    }
    keys
}

/// Whether a status change is one the lifecycle allows.
pub fn can_transition(from: ItemStatus, to: ItemStatus) -> bool {
    use ItemStatus::*;
    matches!(
        (from, to),
        (Pending, InProgress)
            | (InProgress, Parsed)
            | (InProgress, Exhausted)
            | (InProgress, Failed)
            | (Failed, Pending)
    )
}
