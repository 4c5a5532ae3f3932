use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use registry_scrape_core::lifecycle::RetryPolicy;
use registry_scrape_core::models::PageType;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub scrape: ScrapeConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScrapeConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_min_ms")]
    pub delay_min_ms: u64,
    #[serde(default = "default_delay_max_ms")]
    pub delay_max_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: i64,
    #[serde(default = "default_retry_max_secs")]
    pub retry_max_secs: i64,
    #[serde(default = "default_stale_claim_secs")]
    pub stale_claim_secs: i64,
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
    /// Page types enqueued when an Overview is parsed.
    #[serde(default = "default_dependents")]
    pub dependents: Vec<PageType>,
    /// Fetch each linked charge's detail page after its charges list.
    #[serde(default = "default_charge_details")]
    pub charge_details: bool,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            delay_min_ms: default_delay_min_ms(),
            delay_max_ms: default_delay_max_ms(),
            timeout_secs: default_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            retry_base_secs: default_retry_base_secs(),
            retry_max_secs: default_retry_max_secs(),
            stale_claim_secs: default_stale_claim_secs(),
            idle_poll_ms: default_idle_poll_ms(),
            user_agent: default_user_agent(),
            compression_level: default_compression_level(),
            dependents: default_dependents(),
            charge_details: default_charge_details(),
        }
    }
}

impl ScrapeConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            retry_base_secs: self.retry_base_secs,
            retry_max_secs: self.retry_max_secs,
        }
    }
}

fn default_base_url() -> String {
    "https://find-and-update.company-information.service.gov.uk".to_string()
}
fn default_workers() -> usize {
    2
}
fn default_max_attempts() -> u32 {
    3
}
fn default_delay_min_ms() -> u64 {
    1_000
}
fn default_delay_max_ms() -> u64 {
    3_000
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_max_ms() -> u64 {
    60_000
}
fn default_retry_base_secs() -> i64 {
    30
}
fn default_retry_max_secs() -> i64 {
    900
}
fn default_stale_claim_secs() -> i64 {
    600
}
fn default_idle_poll_ms() -> u64 {
    1_000
}
fn default_user_agent() -> String {
    concat!("registry-scrape/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_compression_level() -> i32 {
    3
}
fn default_dependents() -> Vec<PageType> {
    vec![PageType::Officers, PageType::Charges, PageType::Insolvency]
}
fn default_charge_details() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    /// Store NoMatch rows alongside matches.
    #[serde(default = "default_store_no_match")]
    pub store_no_match: bool,
    /// Proprietor categories imported from CSVs that carry a category
    /// column. Compared case-insensitively; empty keeps every row.
    #[serde(default = "default_company_categories")]
    pub company_categories: Vec<String>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            store_no_match: default_store_no_match(),
            company_categories: default_company_categories(),
        }
    }
}

fn default_store_no_match() -> bool {
    true
}
fn default_company_categories() -> Vec<String> {
    vec![
        "Limited Company or Public Limited Company".to_string(),
        "Limited Liability Partnership".to_string(),
    ]
}

impl Config {
    /// Config with defaults for everything but the database path.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: path.into(),
                busy_timeout_ms: default_busy_timeout_ms(),
            },
            scrape: ScrapeConfig::default(),
            matching: MatchingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let s = &config.scrape;

    if s.base_url.trim().is_empty() {
        anyhow::bail!("scrape.base_url must not be empty");
    }
    if !(s.base_url.starts_with("http://") || s.base_url.starts_with("https://")) {
        anyhow::bail!("scrape.base_url must start with http:// or https://");
    }
    if s.workers == 0 {
        anyhow::bail!("scrape.workers must be >= 1");
    }
    if s.max_attempts == 0 {
        anyhow::bail!("scrape.max_attempts must be >= 1");
    }
    if s.delay_min_ms > s.delay_max_ms {
        anyhow::bail!(
            "scrape.delay_min_ms ({}) must be <= scrape.delay_max_ms ({})",
            s.delay_min_ms,
            s.delay_max_ms
        );
    }
    if s.timeout_secs == 0 {
        anyhow::bail!("scrape.timeout_secs must be > 0");
    }
    if s.backoff_base_ms > s.backoff_max_ms {
        anyhow::bail!("scrape.backoff_base_ms must be <= scrape.backoff_max_ms");
    }
    if s.retry_base_secs < 0 || s.retry_base_secs > s.retry_max_secs {
        anyhow::bail!("scrape.retry_base_secs must be in [0, scrape.retry_max_secs]");
    }
    if s.stale_claim_secs <= 0 {
        anyhow::bail!("scrape.stale_claim_secs must be > 0");
    }
    if !(1..=22).contains(&s.compression_level) {
        anyhow::bail!("scrape.compression_level must be in [1, 22]");
    }
    if let Some(pt) = s
        .dependents
        .iter()
        .find(|pt| matches!(pt, PageType::Overview | PageType::ChargeDetail))
    {
        anyhow::bail!("scrape.dependents must not include {}", pt);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = toml::from_str("[db]\npath = \"./data/rgs.sqlite\"\n").unwrap();
        assert_eq!(config.scrape.workers, 2);
        assert_eq!(config.scrape.max_attempts, 3);
        assert_eq!(config.scrape.timeout_secs, 15);
        assert_eq!(
            config.scrape.dependents,
            vec![PageType::Officers, PageType::Charges, PageType::Insolvency]
        );
        assert!(config.scrape.charge_details);
        assert!(config.matching.store_no_match);
        assert_eq!(config.matching.company_categories.len(), 2);
        validate(&config).unwrap();
    }

    #[test]
    fn test_page_types_parse_from_toml() {
        let config: Config = toml::from_str(
            r#"
[db]
path = "x.sqlite"

[scrape]
dependents = ["charges"]
delay_min_ms = 0
delay_max_ms = 0
"#,
        )
        .unwrap();
        assert_eq!(config.scrape.dependents, vec![PageType::Charges]);
        validate(&config).unwrap();
    }

    #[test]
    fn test_rejects_inverted_delay() {
        let mut config = Config::with_db_path("x.sqlite");
        config.scrape.delay_min_ms = 5_000;
        config.scrape.delay_max_ms = 1_000;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("delay_min_ms"), "{}", err);
    }

    #[test]
    fn test_rejects_charge_detail_dependent() {
        let mut config = Config::with_db_path("x.sqlite");
        config.scrape.dependents = vec![PageType::Charges, PageType::ChargeDetail];
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("charge_detail"), "{}", err);
    }

    #[test]
    fn test_rejects_zero_workers() {
        let mut config = Config::with_db_path("x.sqlite");
        config.scrape.workers = 0;
        assert!(validate(&config).is_err());
    }
}
