//! SQLite-backed [`ScrapeStore`] and [`EntityStore`] implementation.
//!
//! Completing an item (status, extracted rows and follow-up items) commits
//! in one transaction. Claiming is a single
//! `UPDATE … WHERE id = (SELECT …) RETURNING` statement, so two workers can
//! never claim the same item.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use registry_scrape_core::lifecycle::{FailureKind, FailureOutcome, RetryPolicy};
use registry_scrape_core::models::{
    ChargeRecord, CompanyOverview, CompanyRef, ItemKey, MatchResult, MatchTier, OfficerRecord,
    PageType, ScrapeItem,
};
use registry_scrape_core::store::{CompletedPage, EntityStore, QueueCounts, ScrapeStore};

use crate::config::Config;
use crate::db;

const ITEM_COLUMNS: &str = "id, entity_id, page_type, page_index, detail_id, status, attempts, last_error, \
     raw_content, content_hash, anomalies, terminal, claim_token, claimed_at, retry_at, \
     created_at, updated_at";

/// SQLite implementation of the store traits.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the configured database. Tables must already exist (`rgs init`).
    pub async fn connect(config: &Config) -> Result<Self> {
        Ok(Self::new(db::connect(config).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

fn date_to_sql(d: Option<NaiveDate>) -> Option<String> {
    d.map(|d| d.format("%Y-%m-%d").to_string())
}

fn date_from_sql(s: Option<String>) -> Option<NaiveDate> {
    s.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

/// `detail_id` column value; `''` stands for no detail id.
fn detail_to_sql(detail_id: Option<&str>) -> &str {
    detail_id.unwrap_or_default()
}

fn row_to_item(row: &SqliteRow) -> Result<ScrapeItem> {
    let page_type: String = row.get("page_type");
    let status: String = row.get("status");
    let detail_id: String = row.get("detail_id");
    Ok(ScrapeItem {
        id: row.get("id"),
        entity_id: row.get("entity_id"),
        page_type: page_type.parse()?,
        page_index: row.get::<i64, _>("page_index") as u32,
        detail_id: Some(detail_id).filter(|d| !d.is_empty()),
        status: status.parse()?,
        attempts: row.get::<i64, _>("attempts") as u32,
        last_error: row.get("last_error"),
        raw_content: row.get("raw_content"),
        content_hash: row.get("content_hash"),
        anomalies: row.get::<i64, _>("anomalies") as u32,
        terminal: row.get::<i64, _>("terminal") != 0,
        claim_token: row.get("claim_token"),
        claimed_at: row.get("claimed_at"),
        retry_at: row.get("retry_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_charge(row: &SqliteRow) -> Result<ChargeRecord> {
    let persons: String = row.get("persons_entitled");
    Ok(ChargeRecord {
        entity_id: row.get("entity_id"),
        charge_code: row.get("charge_code"),
        status: row.get("status"),
        persons_entitled: serde_json::from_str(&persons)
            .context("charges.persons_entitled is not a JSON array")?,
        particulars: row.get("particulars"),
        amount_secured: row.get("amount_secured"),
        filed_date: date_from_sql(row.get("filed_date")),
        created_date: date_from_sql(row.get("created_date")),
        delivered_date: date_from_sql(row.get("delivered_date")),
        satisfied_date: date_from_sql(row.get("satisfied_date")),
        link: row.get("link"),
        source_page_index: row.get::<i64, _>("source_page_index") as u32,
    })
}

fn row_to_officer(row: &SqliteRow) -> OfficerRecord {
    OfficerRecord {
        entity_id: row.get("entity_id"),
        name: row.get("name"),
        role: row.get("role"),
        status: row.get("status"),
        appointed_on: date_from_sql(row.get("appointed_on")),
        resigned_on: date_from_sql(row.get("resigned_on")),
        date_of_birth: row.get("date_of_birth"),
        nationality: row.get("nationality"),
        occupation: row.get("occupation"),
        country_of_residence: row.get("country_of_residence"),
        address: row.get("address"),
        source_page_index: row.get::<i64, _>("source_page_index") as u32,
    }
}

async fn insert_key<'c, E>(executor: E, key: &ItemKey, now: i64) -> Result<bool>
where
    E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO scrape_items
            (entity_id, page_type, page_priority, page_index, detail_id, status,
             created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)
        "#,
    )
    .bind(&key.entity_id)
    .bind(key.page_type.as_str())
    .bind(key.page_type.priority())
    .bind(key.page_index as i64)
    .bind(detail_to_sql(key.detail_id.as_deref()))
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn upsert_overview<'c, E>(executor: E, o: &CompanyOverview, now: i64) -> Result<()>
where
    E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO registry_companies (company_number, company_name, status, company_type,
                                        incorporated_on, registered_address, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(company_number) DO UPDATE SET
            company_name = excluded.company_name,
            status = excluded.status,
            company_type = excluded.company_type,
            incorporated_on = excluded.incorporated_on,
            registered_address = excluded.registered_address,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&o.company_number)
    .bind(&o.company_name)
    .bind(&o.status)
    .bind(&o.company_type)
    .bind(date_to_sql(o.incorporated_on))
    .bind(&o.registered_address)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl ScrapeStore for SqliteStore {
    async fn seed(&self, entity_ids: &[String]) -> Result<usize> {
        let keys: Vec<ItemKey> = entity_ids
            .iter()
            .map(|id| ItemKey::first(id.clone(), PageType::Overview))
            .collect();
        self.enqueue(&keys).await
    }

    async fn enqueue(&self, keys: &[ItemKey]) -> Result<usize> {
        let now = now_ts();
        let mut tx = self.pool.begin().await?;
        let mut created = 0;
        for key in keys {
            if insert_key(&mut *tx, key, now).await? {
                created += 1;
            }
        }
        tx.commit().await?;
        Ok(created)
    }

    async fn claim_next(&self, now: i64) -> Result<Option<ScrapeItem>> {
        let token = uuid::Uuid::new_v4().to_string();
        let sql = format!(
            r#"
            UPDATE scrape_items
            SET status = 'in_progress',
                attempts = attempts + 1,
                claim_token = ?1,
                claimed_at = ?2,
                updated_at = ?2
            WHERE id = (
                SELECT id FROM scrape_items
                WHERE status = 'pending' AND (retry_at IS NULL OR retry_at <= ?2)
                ORDER BY page_priority ASC, id ASC
                LIMIT 1
            )
            RETURNING {}
            "#,
            ITEM_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(&token)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn complete(&self, item: &ScrapeItem, page: &CompletedPage) -> Result<bool> {
        let token = match item.claim_token.as_deref() {
            Some(t) => t,
            None => return Ok(false),
        };
        let now = now_ts();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE scrape_items
            SET status = ?, raw_content = ?, content_hash = ?, anomalies = ?,
                last_error = NULL, terminal = 0, retry_at = NULL,
                claim_token = NULL, claimed_at = NULL, updated_at = ?
            WHERE id = ? AND status = 'in_progress' AND claim_token = ?
            "#,
        )
        .bind(page.status.as_str())
        .bind(&page.raw_content)
        .bind(&page.content_hash)
        .bind(page.anomalies as i64)
        .bind(now)
        .bind(item.id)
        .bind(token)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for c in &page.charges {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO charges (entity_id, charge_code, status, persons_entitled,
                                               particulars, amount_secured, filed_date, created_date,
                                               delivered_date, satisfied_date, link, detail_id,
                                               source_page_index, stored_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&c.entity_id)
            .bind(&c.charge_code)
            .bind(&c.status)
            .bind(serde_json::to_string(&c.persons_entitled)?)
            .bind(&c.particulars)
            .bind(&c.amount_secured)
            .bind(date_to_sql(c.filed_date))
            .bind(date_to_sql(c.created_date))
            .bind(date_to_sql(c.delivered_date))
            .bind(date_to_sql(c.satisfied_date))
            .bind(&c.link)
            .bind(c.detail_id())
            .bind(c.source_page_index as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        if item.page_type == PageType::Officers {
            sqlx::query("DELETE FROM officers WHERE entity_id = ? AND source_page_index = ?")
                .bind(&item.entity_id)
                .bind(item.page_index as i64)
                .execute(&mut *tx)
                .await?;
        }
        for o in &page.officers {
            sqlx::query(
                r#"
                INSERT INTO officers (entity_id, source_page_index, name, role, status,
                                      appointed_on, resigned_on, date_of_birth, nationality,
                                      occupation, country_of_residence, address)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&o.entity_id)
            .bind(o.source_page_index as i64)
            .bind(&o.name)
            .bind(&o.role)
            .bind(&o.status)
            .bind(date_to_sql(o.appointed_on))
            .bind(date_to_sql(o.resigned_on))
            .bind(&o.date_of_birth)
            .bind(&o.nationality)
            .bind(&o.occupation)
            .bind(&o.country_of_residence)
            .bind(&o.address)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(overview) = &page.overview {
            upsert_overview(&mut *tx, overview, now).await?;
        }

        if let Some(d) = &page.charge_detail {
            let persons = if d.persons_entitled.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&d.persons_entitled)?)
            };
            sqlx::query(
                r#"
                UPDATE charges
                SET status = COALESCE(status, ?),
                    persons_entitled = CASE WHEN persons_entitled = '[]'
                                            THEN COALESCE(?, persons_entitled)
                                            ELSE persons_entitled END,
                    particulars = COALESCE(particulars, ?),
                    amount_secured = COALESCE(amount_secured, ?),
                    filed_date = COALESCE(filed_date, ?),
                    created_date = COALESCE(created_date, ?),
                    delivered_date = COALESCE(delivered_date, ?),
                    satisfied_date = COALESCE(satisfied_date, ?)
                WHERE entity_id = ? AND detail_id = ?
                "#,
            )
            .bind(&d.status)
            .bind(persons)
            .bind(&d.particulars)
            .bind(&d.amount_secured)
            .bind(date_to_sql(d.filed_date))
            .bind(date_to_sql(d.created_date))
            .bind(date_to_sql(d.delivered_date))
            .bind(date_to_sql(d.satisfied_date))
            .bind(&d.entity_id)
            .bind(&d.detail_id)
            .execute(&mut *tx)
            .await?;
        }

        for key in &page.follow_ups {
            insert_key(&mut *tx, key, now).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn fail(&self, item: &ScrapeItem, error: &str, outcome: FailureOutcome) -> Result<bool> {
        let token = match item.claim_token.as_deref() {
            Some(t) => t,
            None => return Ok(false),
        };
        let result = sqlx::query(
            r#"
            UPDATE scrape_items
            SET status = 'failed', last_error = ?, terminal = ?, retry_at = ?,
                claim_token = NULL, claimed_at = NULL, updated_at = ?
            WHERE id = ? AND status = 'in_progress' AND claim_token = ?
            "#,
        )
        .bind(error)
        .bind(outcome.terminal as i64)
        .bind(outcome.retry_at)
        .bind(now_ts())
        .bind(item.id)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn requeue_failed(&self, now: i64) -> Result<usize> {
        let result = sqlx::query(
            r#"
            UPDATE scrape_items
            SET status = 'pending', last_error = NULL, updated_at = ?1
            WHERE status = 'failed' AND terminal = 0 AND (retry_at IS NULL OR retry_at <= ?1)
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn release_stale(
        &self,
        claimed_before: i64,
        policy: &RetryPolicy,
        now: i64,
    ) -> Result<usize> {
        let stale = sqlx::query(
            "SELECT id, attempts, claim_token FROM scrape_items \
             WHERE status = 'in_progress' AND claimed_at < ?",
        )
        .bind(claimed_before)
        .fetch_all(&self.pool)
        .await?;

        // Each release is conditional on the token read above, so a claim
        // completed in between is left alone.

        let mut released = 0;
        for row in &stale {
            let id: i64 = row.get("id");
            let attempts = row.get::<i64, _>("attempts") as u32;
            let token: Option<String> = row.get("claim_token");
            let outcome = policy.on_failure(attempts, FailureKind::Transient, now);
            let result = sqlx::query(
                r#"
                UPDATE scrape_items
                SET status = 'failed', last_error = 'claim expired', terminal = ?, retry_at = ?,
                    claim_token = NULL, claimed_at = NULL, updated_at = ?
                WHERE id = ? AND status = 'in_progress' AND claim_token IS ?
                "#,
            )
            .bind(outcome.terminal as i64)
            .bind(outcome.retry_at)
            .bind(now)
            .bind(id)
            .bind(token)
            .execute(&self.pool)
            .await?;
            released += result.rows_affected() as usize;
        }
        Ok(released)
    }

    async fn reset_failed(&self, entity_id: Option<&str>) -> Result<usize> {
        let result = sqlx::query(
            r#"
            UPDATE scrape_items
            SET status = 'pending', attempts = 0, terminal = 0, last_error = NULL,
                retry_at = NULL, updated_at = ?1
            WHERE status = 'failed' AND (?2 IS NULL OR entity_id = ?2)
            "#,
        )
        .bind(now_ts())
        .bind(entity_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn get_item(&self, key: &ItemKey) -> Result<Option<ScrapeItem>> {
        let sql = format!(
            "SELECT {} FROM scrape_items \
             WHERE entity_id = ? AND page_type = ? AND page_index = ? AND detail_id = ?",
            ITEM_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(&key.entity_id)
            .bind(key.page_type.as_str())
            .bind(key.page_index as i64)
            .bind(detail_to_sql(key.detail_id.as_deref()))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn items_for(&self, entity_id: &str) -> Result<Vec<ScrapeItem>> {
        let sql = format!(
            "SELECT {} FROM scrape_items WHERE entity_id = ? \
             ORDER BY page_priority, page_index, detail_id",
            ITEM_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_item).collect()
    }

    async fn charges_for(&self, entity_id: &str) -> Result<Vec<ChargeRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM charges WHERE entity_id = ? ORDER BY source_page_index, id",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_charge).collect()
    }

    async fn officers_for(&self, entity_id: &str) -> Result<Vec<OfficerRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM officers WHERE entity_id = ? ORDER BY source_page_index, id",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_officer).collect())
    }

    async fn queue_counts(&self) -> Result<QueueCounts> {
        let rows = sqlx::query(
            "SELECT page_type, status, COUNT(*) AS n FROM scrape_items GROUP BY page_type, status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = QueueCounts::default();
        for row in &rows {
            let page_type: String = row.get("page_type");
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            counts
                .by_type_status
                .insert((page_type.parse()?, status.parse()?), n as u64);
        }

        let terminal: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM scrape_items WHERE status = 'failed' AND terminal = 1",
        )
        .fetch_one(&self.pool)
        .await?;
        counts.terminal_failed = terminal as u64;
        Ok(counts)
    }

    async fn outstanding(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM scrape_items
            WHERE status IN ('pending', 'in_progress') OR (status = 'failed' AND terminal = 0)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(n as u64)
    }
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn upsert_registry(&self, overview: &CompanyOverview) -> Result<()> {
        upsert_overview(&self.pool, overview, now_ts()).await
    }

    async fn registry_records(&self) -> Result<Vec<CompanyRef>> {
        let rows = sqlx::query(
            "SELECT company_number, company_name FROM registry_companies ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let number: String = row.get("company_number");
                let name: String = row.get("company_name");
                CompanyRef::new(number.clone(), Some(name.as_str()), Some(number.as_str()))
            })
            .collect())
    }

    async fn external_records(&self) -> Result<Vec<CompanyRef>> {
        let rows = sqlx::query("SELECT id, name, number FROM external_records ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| CompanyRef {
                id: row.get("id"),
                name: row.get("name"),
                number: row.get("number"),
            })
            .collect())
    }

    async fn insert_external_records(&self, records: &[CompanyRef]) -> Result<usize> {
        let now = now_ts();
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                r#"
                INSERT INTO external_records (id, name, number, imported_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    number = excluded.number,
                    imported_at = excluded.imported_at
                "#,
            )
            .bind(&r.id)
            .bind(&r.name)
            .bind(&r.number)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }

    async fn replace_match_results(&self, results: &[MatchResult]) -> Result<()> {
        let now = now_ts();
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM match_results")
            .execute(&mut *tx)
            .await?;
        for r in results {
            sqlx::query(
                "INSERT INTO match_results (external_id, registry_id, tier, confidence, matched_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&r.external_id)
            .bind(&r.registry_id)
            .bind(r.tier.as_str())
            .bind(r.confidence)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn match_results(&self) -> Result<Vec<MatchResult>> {
        let rows = sqlx::query(
            "SELECT external_id, registry_id, tier FROM match_results ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let tier: String = row.get("tier");
                let tier: MatchTier = tier.parse()?;
                Ok(MatchResult::new(
                    row.get::<String, _>("external_id"),
                    row.get("registry_id"),
                    tier,
                ))
            })
            .collect()
    }
}
