//! Queue maintenance commands: `seed`, `requeue`, `retry-failed`.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use registry_scrape_core::store::ScrapeStore;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// Parse entity ids from a seed file: one per line, `#` starts a comment.
pub fn parse_seed_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Collect ids from the command line and an optional file, keeping first
/// occurrence order.
pub fn collect_ids(ids: &[String], file: Option<&Path>) -> Result<Vec<String>> {
    let mut all: Vec<String> = ids
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if let Some(path) = file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file: {}", path.display()))?;
        all.extend(parse_seed_list(&content));
    }
    let mut seen = std::collections::HashSet::new();
    all.retain(|id| seen.insert(id.clone()));
    Ok(all)
}

pub async fn run_seed(config: &Config, ids: &[String], file: Option<&Path>) -> Result<()> {
    let ids = collect_ids(ids, file)?;
    if ids.is_empty() {
        anyhow::bail!("nothing to seed: pass entity ids or --file");
    }
    let store = SqliteStore::connect(config).await?;
    let created = store.seed(&ids).await?;
    store.close().await;

    info!(requested = ids.len(), created, "seeded overview items");
    println!(
        "Seeded {} new entities ({} already queued)",
        created,
        ids.len() - created
    );
    Ok(())
}

/// Move retryable failed items back to pending, ignoring their retry time.
pub async fn run_requeue(config: &Config, release_claims: bool) -> Result<()> {
    let store = SqliteStore::connect(config).await?;
    let now = chrono::Utc::now().timestamp();
    let policy = config.scrape.retry_policy();

    let released = if release_claims {
        // Every current claim counts as stale; only safe with no run active.
        store.release_stale(now + 1, &policy, now).await?
    } else {
        store
            .release_stale(now - config.scrape.stale_claim_secs, &policy, now)
            .await?
    };
    let requeued = store.requeue_failed(i64::MAX).await?;
    store.close().await;

    println!("Released {} expired claims", released);
    println!("Requeued {} failed items", requeued);
    Ok(())
}

/// Reset failed items, terminal ones included, with a fresh attempt budget.
pub async fn run_retry_failed(config: &Config, entity: Option<&str>) -> Result<()> {
    let store = SqliteStore::connect(config).await?;
    let reset = store.reset_failed(entity).await?;
    store.close().await;

    match entity {
        Some(e) => println!("Reset {} failed items for {}", reset, e),
        None => println!("Reset {} failed items", reset),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seed_list() {
        let content = "# companies\n01234567\n\n  SC002116  # scottish\nNI000001\n";
        assert_eq!(
            parse_seed_list(content),
            vec!["01234567", "SC002116", "NI000001"]
        );
    }

    #[test]
    fn test_collect_ids_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.txt");
        std::fs::write(&path, "B\nA\nC\n").unwrap();
        let ids = collect_ids(&["A".into(), " ".into(), "B".into()], Some(&path)).unwrap();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_collect_ids_missing_file() {
        let err = collect_ids(&[], Some(Path::new("/nonexistent/seed.txt"))).unwrap_err();
        assert!(err.to_string().contains("seed file"));
    }
}
