//! External dataset import and registry matching.
//!
//! `rgs import-external <file>` loads a CSV of `id,name,number` rows into
//! `external_records`. `rgs match` resolves every external record against
//! the registry companies scraped from Overview pages and replaces the
//! stored match results.
//!
//! Header names are matched case-insensitively; `company_name` and
//! `company_number` are accepted as aliases. Blank cells are treated as
//! missing values.
//!
//! Land registry ownership files list up to four proprietors per title in
//! `proprietor_N_name` / `company_N_reg_no` / `proprietorship_N_category`
//! column sets. When those columns are present every filled slot becomes
//! its own record with id `<title>#<N>`. Rows whose category column is
//! filled and not one of `matching.company_categories` are skipped.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use registry_scrape_core::matcher::{tier_counts, RegistryIndex};
use registry_scrape_core::models::{CompanyRef, MatchTier};
use registry_scrape_core::store::EntityStore;

use crate::config::{Config, MatchingConfig};
use crate::sqlite_store::SqliteStore;

/// Counts from one matching pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchReport {
    pub registry_records: usize,
    pub external_records: usize,
    pub stored: usize,
    pub tiers: Vec<(MatchTier, usize)>,
}

impl MatchReport {
    pub fn count(&self, tier: MatchTier) -> usize {
        self.tiers
            .iter()
            .find(|(t, _)| *t == tier)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

/// Proprietor slots per title in land registry ownership files.
const PROPRIETOR_SLOTS: usize = 4;

/// Column positions of one company within a row.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    /// 1-based proprietor slot; `None` for one-company-per-row files.
    number: Option<usize>,
    name: Option<usize>,
    reg_no: Option<usize>,
    category: Option<usize>,
}

#[derive(Debug)]
struct Columns {
    id: usize,
    slots: Vec<Slot>,
}

impl Columns {
    fn locate(headers: &csv::StringRecord) -> Result<Self> {
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        };
        let id = match find(&["id", "external_id", "title_number"]) {
            Some(i) => i,
            None => bail!("CSV has no 'id' column"),
        };

        let slots: Vec<Slot> = (1..=PROPRIETOR_SLOTS)
            .map(|n| Slot {
                number: Some(n),
                name: find(&[&format!("proprietor_{}_name", n)]),
                reg_no: find(&[&format!("company_{}_reg_no", n)]),
                category: find(&[&format!("proprietorship_{}_category", n)]),
            })
            .filter(|slot| slot.name.is_some() || slot.reg_no.is_some())
            .collect();
        if !slots.is_empty() {
            return Ok(Self { id, slots });
        }

        let name = find(&["name", "company_name"]);
        let number = find(&["number", "company_number"]);
        if name.is_none() && number.is_none() {
            bail!("CSV needs a 'name' or 'number' column, or proprietor_N_name columns");
        }
        Ok(Self {
            id,
            slots: vec![Slot {
                number: None,
                name,
                reg_no: number,
                category: find(&["category", "proprietorship_category"]),
            }],
        })
    }
}

/// Whether a company in this category should be imported.
fn category_allowed(category: Option<&str>, allowed: &[String]) -> bool {
    match category {
        None => true,
        Some(_) if allowed.is_empty() => true,
        Some(c) => allowed.iter().any(|a| a.trim().eq_ignore_ascii_case(c)),
    }
}

fn cell(row: &csv::StringRecord, index: Option<usize>) -> Option<&str> {
    index
        .and_then(|i| row.get(i))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Parse external records from CSV. Rows without an id are skipped, as
/// are companies whose category is not in `categories`.
pub fn read_external_csv<R: std::io::Read>(
    reader: R,
    categories: &[String],
) -> Result<Vec<CompanyRef>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let columns = Columns::locate(reader.headers()?)?;

    let mut records = Vec::new();
    let mut other_categories = 0usize;
    for (idx, result) in reader.records().enumerate() {
        let row = result.with_context(|| format!("Failed to read row {}", idx + 1))?;
        let id = match cell(&row, Some(columns.id)) {
            Some(id) => id,
            None => {
                warn!(row = idx + 1, "skipping external record without id");
                continue;
            }
        };
        for slot in &columns.slots {
            let name = cell(&row, slot.name);
            let number = cell(&row, slot.reg_no);
            if name.is_none() && number.is_none() {
                continue;
            }
            if !category_allowed(cell(&row, slot.category), categories) {
                other_categories += 1;
                continue;
            }
            let record_id = match slot.number {
                Some(n) => format!("{}#{}", id, n),
                None => id.to_string(),
            };
            records.push(CompanyRef::new(record_id, name, number));
        }
    }
    if other_categories > 0 {
        debug!(skipped = other_categories, "skipped proprietors outside company categories");
    }
    Ok(records)
}

pub async fn import_external(
    store: &dyn EntityStore,
    path: &Path,
    config: &MatchingConfig,
) -> Result<usize> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
    let records = read_external_csv(file, &config.company_categories)?;
    let n = store.insert_external_records(&records).await?;
    info!(records = n, path = %path.display(), "imported external records");
    Ok(n)
}

/// Match every external record and replace the stored results.
pub async fn match_records(store: &dyn EntityStore, config: &MatchingConfig) -> Result<MatchReport> {
    let registry = store.registry_records().await?;
    let external = store.external_records().await?;

    let index = RegistryIndex::build(&registry);
    let (by_both, by_number, by_name) = index.key_counts();
    info!(
        registry = index.len(),
        name_number_keys = by_both,
        number_keys = by_number,
        name_keys = by_name,
        "built registry index"
    );

    let results = index.match_all(&external);
    let tiers = tier_counts(&results);

    let stored: Vec<_> = if config.store_no_match {
        results
    } else {
        results
            .into_iter()
            .filter(|r| r.tier != MatchTier::NoMatch)
            .collect()
    };
    store.replace_match_results(&stored).await?;

    Ok(MatchReport {
        registry_records: registry.len(),
        external_records: external.len(),
        stored: stored.len(),
        tiers,
    })
}

pub async fn run_import_external(config: &Config, path: &Path) -> Result<()> {
    let store = SqliteStore::connect(config).await?;
    let n = import_external(&store, path, &config.matching).await?;
    store.close().await;
    println!("Imported {} external records from {}", n, path.display());
    Ok(())
}

pub async fn run_match(config: &Config) -> Result<()> {
    let store = SqliteStore::connect(config).await?;
    let report = match_records(&store, &config.matching).await?;
    store.close().await;

    println!("Registry records:  {}", report.registry_records);
    println!("External records:  {}", report.external_records);
    println!();
    println!("  {:<18} {:>8} {:>7}", "TIER", "COUNT", "SHARE");
    println!("  {}", "-".repeat(35));
    for (tier, n) in &report.tiers {
        let share = if report.external_records > 0 {
            (*n as f64 * 100.0) / report.external_records as f64
        } else {
            0.0
        };
        println!("  {:<18} {:>8} {:>6.1}%", tier.as_str(), n, share);
    }
    println!();
    println!("Stored {} match results", report.stored);
    Ok(())
}
