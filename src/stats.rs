//! Queue and database overview.
//!
//! `rgs stats` prints item counts per page type and status, how many
//! failures are terminal, the extracted row totals, and the age of the most
//! recent update. Used to watch a long run and to decide when
//! `retry-failed` is worth running.

use anyhow::Result;

use registry_scrape_core::models::{ItemStatus, PageType};
use registry_scrape_core::store::{QueueCounts, ScrapeStore};

use crate::config::Config;
use crate::progress::format_number;
use crate::sqlite_store::SqliteStore;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::connect(config).await?;
    let counts = store.queue_counts().await?;
    let pool = store.pool();

    let charges: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM charges")
        .fetch_one(pool)
        .await?;
    let officers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM officers")
        .fetch_one(pool)
        .await?;
    let companies: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM registry_companies")
        .fetch_one(pool)
        .await?;
    let external: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM external_records")
        .fetch_one(pool)
        .await?;
    let matched: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM match_results WHERE tier != 'no_match'")
            .fetch_one(pool)
            .await?;
    let stored_bytes: Option<i64> =
        sqlx::query_scalar("SELECT SUM(LENGTH(raw_content)) FROM scrape_items")
            .fetch_one(pool)
            .await?;
    let last_update: Option<i64> = sqlx::query_scalar("SELECT MAX(updated_at) FROM scrape_items")
        .fetch_one(pool)
        .await?;
    store.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Registry Scrape — Queue Stats");
    println!("=============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!(
        "  Raw pages:   {} compressed",
        format_bytes(stored_bytes.unwrap_or(0).max(0) as u64)
    );
    println!(
        "  Last update: {}",
        match last_update {
            Some(ts) => format_ts_relative(ts),
            None => "never".to_string(),
        }
    );
    println!();

    print!("{}", render_queue_table(&counts));

    println!();
    println!("  Charges:     {}", format_number(charges as u64));
    println!("  Officers:    {}", format_number(officers as u64));
    println!("  Companies:   {}", format_number(companies as u64));
    println!(
        "  Matched:     {} / {} external records",
        format_number(matched as u64),
        format_number(external as u64)
    );
    println!();
    Ok(())
}

/// Page type × status table plus totals.
pub fn render_queue_table(counts: &QueueCounts) -> String {
    let mut out = String::new();
    out.push_str(&format!("  {:<14}", "PAGE"));
    for status in ItemStatus::ALL {
        out.push_str(&format!(" {:>11}", status.as_str()));
    }
    out.push_str(&format!(" {:>9}\n", "total"));
    out.push_str(&format!("  {}\n", "-".repeat(14 + 12 * ItemStatus::ALL.len() + 10)));

    for page_type in PageType::ALL {
        out.push_str(&format!("  {:<14}", page_type.as_str()));
        let mut row_total = 0;
        for status in ItemStatus::ALL {
            let n = counts.get(page_type, status);
            row_total += n;
            out.push_str(&format!(" {:>11}", format_number(n)));
        }
        out.push_str(&format!(" {:>9}\n", format_number(row_total)));
    }

    out.push_str(&format!("  {:<14}", "all"));
    for status in ItemStatus::ALL {
        out.push_str(&format!(" {:>11}", format_number(counts.status_total(status))));
    }
    out.push_str(&format!(" {:>9}\n", format_number(counts.total())));

    let failed = counts.status_total(ItemStatus::Failed);
    if failed > 0 {
        out.push_str(&format!(
            "\n  Failed: {} retryable, {} terminal\n",
            format_number(failed - counts.terminal_failed.min(failed)),
            format_number(counts.terminal_failed)
        ));
    }
    out
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_relative_timestamps() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 120), "2 mins ago");
        assert_eq!(format_ts_relative(now - 3600), "1 hour ago");
    }

    #[test]
    fn test_queue_table() {
        let mut counts = QueueCounts::default();
        counts
            .by_type_status
            .insert((PageType::Overview, ItemStatus::Parsed), 1200);
        counts
            .by_type_status
            .insert((PageType::Charges, ItemStatus::Failed), 3);
        counts.terminal_failed = 1;

        let table = render_queue_table(&counts);
        assert!(table.contains("overview"));
        assert!(table.contains("1,200"));
        assert!(table.contains("1,203"));
        assert!(table.contains("Failed: 2 retryable, 1 terminal"));
    }
}
