use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Work queue: one row per (entity, page type, page index, detail id).
    // detail_id is '' for everything but charge detail pages.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scrape_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            page_type TEXT NOT NULL,
            page_priority INTEGER NOT NULL,
            page_index INTEGER NOT NULL DEFAULT 1,
            detail_id TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            raw_content BLOB,
            content_hash TEXT,
            anomalies INTEGER NOT NULL DEFAULT 0,
            terminal INTEGER NOT NULL DEFAULT 0,
            claim_token TEXT,
            claimed_at INTEGER,
            retry_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(entity_id, page_type, page_index, detail_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS charges (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            charge_code TEXT NOT NULL,
            status TEXT,
            persons_entitled TEXT NOT NULL DEFAULT '[]',
            particulars TEXT,
            amount_secured TEXT,
            filed_date TEXT,
            created_date TEXT,
            delivered_date TEXT,
            satisfied_date TEXT,
            link TEXT,
            detail_id TEXT,
            source_page_index INTEGER NOT NULL,
            stored_at INTEGER NOT NULL,
            UNIQUE(entity_id, charge_code)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS officers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            source_page_index INTEGER NOT NULL,
            name TEXT NOT NULL,
            role TEXT,
            status TEXT,
            appointed_on TEXT,
            resigned_on TEXT,
            date_of_birth TEXT,
            nationality TEXT,
            occupation TEXT,
            country_of_residence TEXT,
            address TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Registry side of matching, filled from Overview pages
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS registry_companies (
            company_number TEXT PRIMARY KEY,
            company_name TEXT NOT NULL,
            status TEXT,
            company_type TEXT,
            incorporated_on TEXT,
            registered_address TEXT,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS external_records (
            id TEXT PRIMARY KEY,
            name TEXT,
            number TEXT,
            imported_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS match_results (
            external_id TEXT PRIMARY KEY,
            registry_id TEXT,
            tier TEXT NOT NULL,
            confidence REAL NOT NULL,
            matched_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_scrape_items_claim ON scrape_items(status, page_priority, id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_scrape_items_entity ON scrape_items(entity_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_charges_entity ON charges(entity_id, detail_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_officers_entity_page ON officers(entity_id, source_page_index)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_match_results_tier ON match_results(tier)")
        .execute(pool)
        .await?;

    Ok(())
}
