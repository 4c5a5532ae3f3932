//! Worker pool.
//!
//! Runs `workers` tokio tasks against one shared [`Controller`]. Each
//! worker loops claim → process → politeness delay until the queue has no
//! outstanding work, the item limit is reached, or shutdown is signalled.
//!
//! Shutdown is cooperative: the flag is checked between items, and sleeps
//! are cut short, but an item already being processed is always finished
//! and persisted.
//!
//! Pacing per worker:
//!
//! - a uniformly random delay in `[delay_min_ms, delay_max_ms]` after every
//!   fetched item;
//! - an extra `backoff_base_ms * 2^(n-1)` (capped at `backoff_max_ms`)
//!   after `n` consecutive failures;
//! - `idle_poll_ms` between polls while other workers still hold claims or
//!   failed items wait for their retry time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use registry_scrape_core::models::ItemStatus;

use crate::config::ScrapeConfig;
use crate::controller::{Controller, ItemOutcome};
use crate::progress::{ScrapeProgressEvent, ScrapeProgressReporter};

/// Options for one `run` invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolOptions {
    /// Overrides `scrape.workers` when set.
    pub workers: Option<usize>,
    /// Stop after this many items have been claimed.
    pub limit: Option<u64>,
}

/// Totals across all workers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: u64,
    pub parsed: u64,
    pub exhausted: u64,
    pub failed: u64,
    pub terminal: u64,
    pub claim_lost: u64,
    pub cancelled: bool,
}

impl RunSummary {
    fn merge(&mut self, other: &RunSummary) {
        self.processed += other.processed;
        self.parsed += other.parsed;
        self.exhausted += other.exhausted;
        self.failed += other.failed;
        self.terminal += other.terminal;
        self.claim_lost += other.claim_lost;
        self.cancelled |= other.cancelled;
    }

    fn record(&mut self, outcome: &ItemOutcome) {
        self.processed += 1;
        match outcome {
            ItemOutcome::Completed { status, .. } => match status {
                ItemStatus::Exhausted => self.exhausted += 1,
                _ => self.parsed += 1,
            },
            ItemOutcome::Failed { terminal, .. } => {
                self.failed += 1;
                if *terminal {
                    self.terminal += 1;
                }
            }
            ItemOutcome::ClaimLost => self.claim_lost += 1,
        }
    }
}

/// Pacing knobs copied out of the config for each worker.
#[derive(Debug, Clone, Copy)]
struct Pacing {
    delay_min_ms: u64,
    delay_max_ms: u64,
    backoff_base_ms: u64,
    backoff_max_ms: u64,
    idle_poll_ms: u64,
}

impl Pacing {
    fn from_config(config: &ScrapeConfig) -> Self {
        Self {
            delay_min_ms: config.delay_min_ms,
            delay_max_ms: config.delay_max_ms.max(config.delay_min_ms),
            backoff_base_ms: config.backoff_base_ms,
            backoff_max_ms: config.backoff_max_ms,
            idle_poll_ms: config.idle_poll_ms,
        }
    }

    fn jitter_ms(&self) -> u64 {
        if self.delay_max_ms <= self.delay_min_ms {
            return self.delay_min_ms;
        }
        rand::rng().random_range(self.delay_min_ms..=self.delay_max_ms)
    }

    fn backoff_ms(&self, consecutive_failures: u32) -> u64 {
        if consecutive_failures == 0 {
            return 0;
        }
        let exp = (consecutive_failures - 1).min(20);
        self.backoff_base_ms
            .saturating_mul(1_u64 << exp)
            .min(self.backoff_max_ms)
    }
}

/// Shared claim budget for `--limit`.
struct Budget {
    limit: Option<u64>,
    taken: AtomicU64,
}

impl Budget {
    fn take(&self) -> bool {
        match self.limit {
            None => true,
            Some(limit) => self
                .taken
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < limit).then_some(n + 1)
                })
                .is_ok(),
        }
    }

    fn give_back(&self) {
        if self.limit.is_some() {
            self.taken.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Create the shutdown flag shared by the pool's workers.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Flip the shutdown flag on Ctrl-C.
pub fn shutdown_on_ctrl_c(tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing in-flight items");
            let _ = tx.send(true);
        }
    });
}

/// Sleep for `ms`, returning `false` if shutdown was signalled first.
async fn pause(ms: u64, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    if ms == 0 {
        return true;
    }
    let sleep = tokio::time::sleep(Duration::from_millis(ms));
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = shutdown.changed() => match changed {
                Ok(()) if *shutdown.borrow() => return false,
                Ok(()) => continue,
                // Sender gone: nobody can signal shutdown any more.
                Err(_) => {
                    (&mut sleep).await;
                    return true;
                }
            },
        }
    }
}

/// Run the pool until the queue drains, the limit is hit, or shutdown.
pub async fn run_pool(
    controller: Arc<Controller>,
    config: &ScrapeConfig,
    options: PoolOptions,
    reporter: Arc<dyn ScrapeProgressReporter>,
    shutdown: watch::Receiver<bool>,
) -> Result<RunSummary> {
    let workers = options.workers.unwrap_or(config.workers).max(1);
    let pacing = Pacing::from_config(config);
    let budget = Arc::new(Budget {
        limit: options.limit,
        taken: AtomicU64::new(0),
    });
    let counter = Arc::new(AtomicU64::new(0));

    // Claims left behind by an interrupted run become claimable again here.
    controller.requeue_due().await?;

    info!(workers, limit = ?options.limit, "starting scrape workers");

    let mut set = JoinSet::new();
    for worker in 1..=workers {
        set.spawn(worker_loop(
            worker,
            controller.clone(),
            pacing,
            budget.clone(),
            counter.clone(),
            reporter.clone(),
            shutdown.clone(),
        ));
    }

    let mut summary = RunSummary::default();
    while let Some(joined) = set.join_next().await {
        summary.merge(&joined?);
    }
    summary.cancelled |= *shutdown.borrow();

    reporter.report(ScrapeProgressEvent::Finished {
        processed: summary.processed,
        failed: summary.failed,
        cancelled: summary.cancelled,
    });
    info!(
        processed = summary.processed,
        parsed = summary.parsed,
        exhausted = summary.exhausted,
        failed = summary.failed,
        terminal = summary.terminal,
        cancelled = summary.cancelled,
        "scrape run finished"
    );
    Ok(summary)
}

async fn worker_loop(
    worker: usize,
    controller: Arc<Controller>,
    pacing: Pacing,
    budget: Arc<Budget>,
    counter: Arc<AtomicU64>,
    reporter: Arc<dyn ScrapeProgressReporter>,
    mut shutdown: watch::Receiver<bool>,
) -> RunSummary {
    let mut summary = RunSummary::default();
    let mut consecutive_failures: u32 = 0;

    loop {
        if *shutdown.borrow() {
            summary.cancelled = true;
            break;
        }
        if !budget.take() {
            debug!(worker, "item limit reached");
            break;
        }

        match controller.run_one().await {
            Ok(Some((item, outcome))) => {
                summary.record(&outcome);
                consecutive_failures = if outcome.is_failure() {
                    consecutive_failures.saturating_add(1)
                } else {
                    0
                };
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                reporter.report(ScrapeProgressEvent::Item {
                    worker,
                    n,
                    item: item.key().to_string(),
                    result: describe(&outcome),
                });

                let wait = pacing.jitter_ms() + pacing.backoff_ms(consecutive_failures);
                if !pause(wait, &mut shutdown).await {
                    summary.cancelled = true;
                    break;
                }
            }
            Ok(None) => {
                budget.give_back();
                match idle(&controller).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(worker, "queue drained");
                        break;
                    }
                    Err(e) => {
                        error!(worker, error = %e, "queue maintenance failed");
                    }
                }
                if !pause(pacing.idle_poll_ms, &mut shutdown).await {
                    summary.cancelled = true;
                    break;
                }
            }
            Err(e) => {
                budget.give_back();
                consecutive_failures = consecutive_failures.saturating_add(1);
                error!(worker, error = %e, "store error while processing item");
                let wait = pacing.idle_poll_ms + pacing.backoff_ms(consecutive_failures);
                if !pause(wait, &mut shutdown).await {
                    summary.cancelled = true;
                    break;
                }
            }
        }
    }

    summary
}

/// Requeue what is due and report whether anything is still outstanding.
async fn idle(controller: &Controller) -> Result<bool> {
    controller.requeue_due().await?;
    Ok(controller.store().outstanding().await? > 0)
}

fn describe(outcome: &ItemOutcome) -> String {
    match outcome {
        ItemOutcome::Completed {
            status,
            rows,
            follow_ups,
            ..
        } => {
            if *follow_ups > 0 {
                format!("{}  {} rows, {} queued", status, rows, follow_ups)
            } else {
                format!("{}  {} rows", status, rows)
            }
        }
        ItemOutcome::Failed {
            terminal, error, ..
        } => {
            if *terminal {
                format!("failed (terminal)  {}", error)
            } else {
                format!("failed  {}", error)
            }
        }
        ItemOutcome::ClaimLost => "claim lost".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pacing() -> Pacing {
        Pacing {
            delay_min_ms: 1000,
            delay_max_ms: 3000,
            backoff_base_ms: 500,
            backoff_max_ms: 4000,
            idle_poll_ms: 100,
        }
    }

    #[test]
    fn test_jitter_within_bounds() {
        let p = pacing();
        for _ in 0..200 {
            let d = p.jitter_ms();
            assert!((1000..=3000).contains(&d), "{}", d);
        }
        let fixed = Pacing {
            delay_max_ms: 0,
            delay_min_ms: 0,
            ..p
        };
        assert_eq!(fixed.jitter_ms(), 0);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = pacing();
        assert_eq!(p.backoff_ms(0), 0);
        assert_eq!(p.backoff_ms(1), 500);
        assert_eq!(p.backoff_ms(2), 1000);
        assert_eq!(p.backoff_ms(3), 2000);
        assert_eq!(p.backoff_ms(4), 4000);
        assert_eq!(p.backoff_ms(10), 4000);
        assert_eq!(p.backoff_ms(u32::MAX), 4000);
    }

    #[test]
    fn test_budget_limit() {
        let b = Budget {
            limit: Some(2),
            taken: AtomicU64::new(0),
        };
        assert!(b.take());
        assert!(b.take());
        assert!(!b.take());
        b.give_back();
        assert!(b.take());

        let unlimited = Budget {
            limit: None,
            taken: AtomicU64::new(0),
        };
        for _ in 0..10 {
            assert!(unlimited.take());
        }
    }

    #[test]
    fn test_summary_counts() {
        let mut s = RunSummary::default();
        s.record(&ItemOutcome::Completed {
            status: ItemStatus::Exhausted,
            rows: 3,
            anomalies: 0,
            follow_ups: 0,
        });
        s.record(&ItemOutcome::Failed {
            kind: registry_scrape_core::lifecycle::FailureKind::Permanent,
            terminal: true,
            error: "HTTP 404".into(),
        });
        s.record(&ItemOutcome::ClaimLost);
        assert_eq!(s.processed, 3);
        assert_eq!(s.exhausted, 1);
        assert_eq!(s.failed, 1);
        assert_eq!(s.terminal, 1);
        assert_eq!(s.claim_lost, 1);
    }

    #[tokio::test]
    async fn test_pause_cut_short_by_shutdown() {
        let (tx, mut rx) = shutdown_channel();
        tx.send(true).unwrap();
        assert!(!pause(60_000, &mut rx).await);
    }
}
