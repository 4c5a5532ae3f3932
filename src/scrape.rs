//! `rgs run`: wire the SQLite store, HTTP fetcher and worker pool together.

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::controller::Controller;
use crate::fetcher::HttpFetcher;
use crate::pool::{run_pool, shutdown_channel, shutdown_on_ctrl_c, PoolOptions, RunSummary};
use crate::progress::ProgressMode;
use crate::sqlite_store::SqliteStore;

pub async fn run_scrape(
    config: &Config,
    options: PoolOptions,
    progress: ProgressMode,
) -> Result<RunSummary> {
    let store = Arc::new(SqliteStore::connect(config).await?);
    let fetcher = Arc::new(HttpFetcher::new(&config.scrape)?);
    let controller = Arc::new(Controller::new(store.clone(), fetcher, &config.scrape));

    let (tx, rx) = shutdown_channel();
    shutdown_on_ctrl_c(tx);

    let result = run_pool(
        controller,
        &config.scrape,
        options,
        Arc::from(progress.reporter()),
        rx,
    )
    .await;
    store.close().await;
    let summary = result?;

    println!(
        "Processed {} items: {} parsed, {} exhausted, {} failed ({} terminal){}",
        summary.processed,
        summary.parsed,
        summary.exhausted,
        summary.failed,
        summary.terminal,
        if summary.cancelled { ", cancelled" } else { "" }
    );
    Ok(summary)
}
