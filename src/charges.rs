//! Charge listing for one entity.
//!
//! `rgs charges <entity>` shows the scrape state of the entity's pages and
//! every stored charge, in source page order. `--json` prints the same
//! report as one JSON document on stdout.

use anyhow::{bail, Result};
use serde::Serialize;

use registry_scrape_core::models::{ChargeRecord, ScrapeItem};
use registry_scrape_core::store::ScrapeStore;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, Serialize)]
pub struct ItemSummary {
    pub page_type: String,
    pub page_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail_id: Option<String>,
    pub status: String,
    pub attempts: u32,
    pub anomalies: u32,
    pub terminal: bool,
    pub last_error: Option<String>,
    pub content_hash: Option<String>,
}

impl From<&ScrapeItem> for ItemSummary {
    fn from(item: &ScrapeItem) -> Self {
        Self {
            page_type: item.page_type.to_string(),
            page_index: item.page_index,
            detail_id: item.detail_id.clone(),
            status: item.status.to_string(),
            attempts: item.attempts,
            anomalies: item.anomalies,
            terminal: item.terminal,
            last_error: item.last_error.clone(),
            content_hash: item.content_hash.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChargeReport {
    pub entity_id: String,
    pub items: Vec<ItemSummary>,
    pub officers: usize,
    pub charges: Vec<ChargeRecord>,
}

/// Build the report for one entity. Fails if the entity was never queued.
pub async fn charge_report(store: &dyn ScrapeStore, entity_id: &str) -> Result<ChargeReport> {
    let items = store.items_for(entity_id).await?;
    if items.is_empty() {
        bail!("entity not queued: {}", entity_id);
    }
    let charges = store.charges_for(entity_id).await?;
    let officers = store.officers_for(entity_id).await?.len();
    Ok(ChargeReport {
        entity_id: entity_id.to_string(),
        items: items.iter().map(ItemSummary::from).collect(),
        officers,
        charges,
    })
}

/// CLI entry point: builds the report and prints it to stdout.
pub async fn run_charges(config: &Config, entity_id: &str, json: bool) -> Result<()> {
    let store = SqliteStore::connect(config).await?;
    let report = charge_report(&store, entity_id).await;
    store.close().await;
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("--- {} ---", report.entity_id);
    for item in &report.items {
        let page = match &item.detail_id {
            Some(id) => id.clone(),
            None => format!("p{}", item.page_index),
        };
        let mut line = format!(
            "{:<13} {:<6} {:<11} attempts={}",
            item.page_type, page, item.status, item.attempts
        );
        if item.anomalies > 0 {
            line.push_str(&format!(" anomalies={}", item.anomalies));
        }
        if item.terminal {
            line.push_str(" terminal");
        }
        if let Some(ref err) = item.last_error {
            line.push_str(&format!(" error={}", err));
        }
        println!("{}", line);
    }
    println!("officers:    {}", report.officers);
    println!();

    println!("--- Charges ({}) ---", report.charges.len());
    for c in &report.charges {
        println!(
            "[{}] {}",
            c.charge_code,
            c.status.as_deref().unwrap_or("(no status)")
        );
        if let Some(d) = c.created_date {
            println!("  created:    {}", d);
        }
        if let Some(d) = c.delivered_date {
            println!("  delivered:  {}", d);
        }
        if let Some(d) = c.satisfied_date {
            println!("  satisfied:  {}", d);
        }
        if let Some(ref a) = c.amount_secured {
            println!("  secured:    {}", a);
        }
        if !c.persons_entitled.is_empty() {
            println!("  entitled:   {}", c.persons_entitled.join("; "));
        }
        if let Some(ref p) = c.particulars {
            println!("  particulars: {}", p);
        }
        println!("  page:       {}", c.source_page_index);
    }

    Ok(())
}
