//! End-to-end tests of the scrape pipeline.
//!
//! A scripted in-process fetcher stands in for the registry so the real
//! controller, worker pool and SQLite store run against known pages.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use registry_scrape::codec;
use registry_scrape::config::{Config, MatchingConfig};
use registry_scrape::controller::{Controller, ItemOutcome};
use registry_scrape::db;
use registry_scrape::fetcher::{FetchError, Fetcher};
use registry_scrape::matching::match_records;
use registry_scrape::migrate;
use registry_scrape::pool::{run_pool, shutdown_channel, PoolOptions};
use registry_scrape::progress::NoProgress;
use registry_scrape::sqlite_store::SqliteStore;
use registry_scrape_core::models::{CompanyRef, ItemKey, ItemStatus, MatchTier, PageType};
use registry_scrape_core::store::{EntityStore, ScrapeStore};
use tempfile::TempDir;
use tokio::sync::watch;

const BASE: &str = "http://registry.test";

// ─── Scripted fetcher ───────────────────────────────────────────────

enum Reply {
    Page(String),
    Status(u16),
}

/// Serves scripted replies per URL. The last reply for a URL repeats;
/// unknown URLs are 404.
#[derive(Default)]
struct ScriptedFetcher {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<String>>,
    on_fetch: Option<watch::Sender<bool>>,
}

impl ScriptedFetcher {
    fn page(self, path: &str, html: &str) -> Self {
        self.reply(path, Reply::Page(html.to_string()))
    }

    fn status(self, path: &str, status: u16) -> Self {
        self.reply(path, Reply::Status(status))
    }

    fn reply(self, path: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(format!("{}{}", BASE, path))
            .or_default()
            .push_back(reply);
        self
    }

    fn calls_to(&self, path: &str) -> usize {
        let url = format!("{}{}", BASE, path);
        self.calls.lock().unwrap().iter().filter(|u| **u == url).count()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(tx) = &self.on_fetch {
            let _ = tx.send(true);
        }
        let mut replies = self.replies.lock().unwrap();
        let queue = match replies.get_mut(url) {
            Some(q) => q,
            None => return Err(FetchError::from_status(url, 404)),
        };
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().map(|r| match r {
                Reply::Page(p) => Reply::Page(p.clone()),
                Reply::Status(s) => Reply::Status(*s),
            })
        };
        match reply {
            Some(Reply::Page(html)) => Ok(html.into_bytes()),
            Some(Reply::Status(s)) => Err(FetchError::from_status(url, s)),
            None => Err(FetchError::from_status(url, 404)),
        }
    }
}

// ─── Pages ──────────────────────────────────────────────────────────

fn overview_page(name: &str, number: &str) -> String {
    format!(
        r#"<html><body>
            <div class="company-header">
              <p class="heading-xlarge">{name}</p>
              <p id="company-number">Company number <strong>{number}</strong></p>
            </div>
            <dl>
              <dt>Registered office address</dt>
              <dd class="text data">1 Dock Road<br>Glasgow<br>G1 1AA</dd>
            </dl>
            <dl>
              <dt>Company status</dt><dd class="text data" id="company-status">Active</dd>
              <dt>Incorporated on</dt><dd id="company-incorporation-date">3 March 1998</dd>
            </dl>
          </body></html>"#
    )
}

fn officers_page(names: &[&str]) -> String {
    let blocks: String = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            format!(
                r#"<div class="appointment-{n}">
                    <h2 class="heading-medium"><span id="officer-name-{n}">{name}</span></h2>
                    <dl><dt>Role</dt><dd>Director</dd>
                        <dt>Appointed on</dt><dd>4 January 2015</dd></dl>
                  </div>"#,
                n = i + 1
            )
        })
        .collect();
    format!(
        r#"<html><body><div class="appointments-list">{}</div></body></html>"#,
        blocks
    )
}

fn charges_page(codes: &[&str], next: bool) -> String {
    let blocks: String = codes
        .iter()
        .enumerate()
        .map(|(i, code)| {
            format!(
                r#"<div class="mortgage-{n}">
                    <h2 class="heading-medium">Charge code {code}</h2>
                    <span class="status-tag">Outstanding</span>
                    <dl><dt>Created</dt><dd>1 July 2019</dd>
                        <dt>Persons entitled</dt><dd>Bank of Scotland PLC</dd></dl>
                  </div>"#,
                n = i + 1
            )
        })
        .collect();
    let pager = if next {
        r#"<ul class="pager"><li><a id="next-page" href="?page=2">Next</a></li></ul>"#
    } else {
        ""
    };
    format!("<html><body>{}{}</body></html>", blocks, pager)
}

/// Charges list whose blocks link to detail pages and omit the amount.
fn linked_charges_page(entity: &str, ids: &[&str]) -> String {
    let blocks: String = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            format!(
                r#"<div class="mortgage-{n}">
                    <h2 class="heading-medium">
                      <a href="/company/{entity}/charges/{id}">Charge code {entity}{n:04}</a>
                    </h2>
                    <span class="status-tag">Outstanding</span>
                  </div>"#,
                n = i + 1
            )
        })
        .collect();
    format!("<html><body>{}</body></html>", blocks)
}

fn charge_detail_page(amount: &str) -> String {
    format!(
        r#"<html><body>
            <dl>
              <dt id="mortgage-created-on-label">Created</dt>
              <dd id="mortgage-created-on">1 July 2019</dd>
              <dt id="mortgage-delivered-on-label">Delivered</dt>
              <dd id="mortgage-delivered-on">5 July 2019</dd>
            </dl>
            <h3 id="mortgage-amount-secured-label">Amount secured</h3>
            <p>{amount}</p>
            <h3 id="mortgage-particulars-label">Short particulars</h3>
            <p><span id="mortgage-particulars">Fixed charge over 1 Dock Road</span></p>
          </body></html>"#
    )
}

// ─── Harness ────────────────────────────────────────────────────────

async fn setup() -> (TempDir, Config, Arc<SqliteStore>) {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::with_db_path(tmp.path().join("data/rgs.sqlite"));
    config.scrape.base_url = BASE.to_string();
    config.scrape.delay_min_ms = 0;
    config.scrape.delay_max_ms = 0;
    config.scrape.backoff_base_ms = 0;
    config.scrape.backoff_max_ms = 0;
    config.scrape.retry_base_secs = 0;
    config.scrape.idle_poll_ms = 10;
    config.scrape.workers = 2;

    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    (tmp, config, Arc::new(SqliteStore::new(pool)))
}

async fn run(
    config: &Config,
    store: &Arc<SqliteStore>,
    fetcher: Arc<ScriptedFetcher>,
    options: PoolOptions,
) -> registry_scrape::pool::RunSummary {
    let controller = Arc::new(Controller::new(store.clone(), fetcher, &config.scrape));
    let (_tx, rx) = shutdown_channel();
    run_pool(controller, &config.scrape, options, Arc::new(NoProgress), rx)
        .await
        .unwrap()
}

async fn status_of(store: &SqliteStore, entity: &str, pt: PageType, page: u32) -> ItemStatus {
    store
        .get_item(&ItemKey::new(entity, pt, page))
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("missing item {} {} p{}", entity, pt, page))
        .status
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_overview_spawns_dependents_and_pages_to_exhaustion() {
    let (_tmp, config, store) = setup().await;
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .page("/company/00000123", &overview_page("ACME LIMITED", "00000123"))
            .page("/company/00000123/officers", &officers_page(&["SMITH, Jane", "JONES, Tom"]))
            .page("/company/00000123/charges", &charges_page(&["0001", "0002"], true))
            .page("/company/00000123/charges?page=2", &charges_page(&["0003"], false))
            .page("/company/00000123/insolvency", "<html><body></body></html>"),
    );

    assert_eq!(store.seed(&["00000123".to_string()]).await.unwrap(), 1);
    let summary = run(&config, &store, fetcher.clone(), PoolOptions::default()).await;

    assert_eq!(summary.processed, 5);
    assert_eq!(summary.failed, 0);
    assert!(!summary.cancelled);

    let e = "00000123";
    assert_eq!(status_of(&store, e, PageType::Overview, 1).await, ItemStatus::Parsed);
    assert_eq!(status_of(&store, e, PageType::Officers, 1).await, ItemStatus::Exhausted);
    assert_eq!(status_of(&store, e, PageType::Charges, 1).await, ItemStatus::Parsed);
    assert_eq!(status_of(&store, e, PageType::Charges, 2).await, ItemStatus::Exhausted);
    assert_eq!(status_of(&store, e, PageType::Insolvency, 1).await, ItemStatus::Parsed);
    assert!(store
        .get_item(&ItemKey::new(e, PageType::Charges, 3))
        .await
        .unwrap()
        .is_none());

    let charges = store.charges_for(e).await.unwrap();
    let codes: Vec<&str> = charges.iter().map(|c| c.charge_code.as_str()).collect();
    assert_eq!(codes, vec!["0001", "0002", "0003"]);
    assert_eq!(charges[2].source_page_index, 2);
    assert_eq!(charges[0].persons_entitled, vec!["Bank of Scotland PLC".to_string()]);

    let officers = store.officers_for(e).await.unwrap();
    assert_eq!(officers.len(), 2);
    assert_eq!(officers[0].name, "SMITH, Jane");

    let registry = store.registry_records().await.unwrap();
    assert_eq!(registry, vec![CompanyRef::new("00000123", Some("ACME LIMITED"), Some("00000123"))]);

    assert_eq!(store.outstanding().await.unwrap(), 0);
    assert_eq!(fetcher.calls_to("/company/00000123"), 1);
}

#[tokio::test]
async fn test_raw_page_is_stored_compressed_and_hashed() {
    let (_tmp, config, store) = setup().await;
    let html = overview_page("ACME LIMITED", "00000123");
    let fetcher = Arc::new(ScriptedFetcher::default().page("/company/00000123", &html));
    let mut config = config;
    config.scrape.dependents = vec![];

    store.seed(&["00000123".to_string()]).await.unwrap();
    run(&config, &store, fetcher, PoolOptions::default()).await;

    let item = store
        .get_item(&ItemKey::first("00000123", PageType::Overview))
        .await
        .unwrap()
        .unwrap();
    let raw = item.raw_content.expect("raw content stored");
    assert_ne!(raw, html.as_bytes());
    assert_eq!(codec::decompress_html(&raw).unwrap(), html);
    assert_eq!(item.content_hash, Some(codec::content_hash(html.as_bytes())));
    assert_eq!(item.attempts, 1);
    assert!(item.claim_token.is_none());
}

#[tokio::test]
async fn test_transient_failures_retry_up_to_ceiling() {
    let (_tmp, config, store) = setup().await;
    let fetcher = Arc::new(ScriptedFetcher::default().status("/company/00000777", 503));

    store.seed(&["00000777".to_string()]).await.unwrap();
    let summary = run(&config, &store, fetcher.clone(), PoolOptions::default()).await;

    assert_eq!(fetcher.calls_to("/company/00000777"), 3);
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.terminal, 1);

    let item = store
        .get_item(&ItemKey::first("00000777", PageType::Overview))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.status, ItemStatus::Failed);
    assert!(item.terminal);
    assert_eq!(item.attempts, 3);
    assert!(item.last_error.unwrap().contains("HTTP 503"));
    assert_eq!(store.outstanding().await.unwrap(), 0);
}

#[tokio::test]
async fn test_transient_failure_then_success() {
    let (_tmp, mut config, store) = setup().await;
    config.scrape.dependents = vec![];
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .status("/company/00000555", 429)
            .page("/company/00000555", &overview_page("RECOVERED LTD", "00000555")),
    );

    store.seed(&["00000555".to_string()]).await.unwrap();
    let summary = run(&config, &store, fetcher, PoolOptions::default()).await;

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.parsed, 1);
    let item = store
        .get_item(&ItemKey::first("00000555", PageType::Overview))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.status, ItemStatus::Parsed);
    assert_eq!(item.attempts, 2);
    assert!(item.last_error.is_none());
}

#[tokio::test]
async fn test_permanent_failure_is_terminal_immediately() {
    let (_tmp, config, store) = setup().await;
    let fetcher = Arc::new(ScriptedFetcher::default());

    store.seed(&["99999999".to_string()]).await.unwrap();
    let summary = run(&config, &store, fetcher.clone(), PoolOptions::default()).await;

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.terminal, 1);
    assert_eq!(fetcher.calls_to("/company/99999999"), 1);

    let items = store.items_for("99999999").await.unwrap();
    assert_eq!(items.len(), 1, "no dependents for a failed overview");
    assert!(items[0].terminal);

    // retry-failed gives terminal items a fresh budget
    assert_eq!(store.reset_failed(Some("99999999")).await.unwrap(), 1);
    let item = &store.items_for("99999999").await.unwrap()[0];
    assert_eq!(item.status, ItemStatus::Pending);
    assert_eq!(item.attempts, 0);
}

#[tokio::test]
async fn test_concurrent_claims_never_overlap() {
    let (_tmp, _config, store) = setup().await;
    let ids: Vec<String> = (1..=30).map(|n| format!("{:08}", n)).collect();
    store.seed(&ids).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            let now = chrono::Utc::now().timestamp();
            while let Some(item) = store.claim_next(now).await.unwrap() {
                claimed.push(item.entity_id);
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.unwrap());
    }
    let unique: HashSet<&String> = all.iter().collect();
    assert_eq!(all.len(), 30);
    assert_eq!(unique.len(), 30);
}

#[tokio::test]
async fn test_shutdown_before_start_claims_nothing() {
    let (_tmp, config, store) = setup().await;
    store.seed(&["00000001".to_string()]).await.unwrap();

    let controller = Arc::new(Controller::new(
        store.clone(),
        Arc::new(ScriptedFetcher::default()),
        &config.scrape,
    ));
    let (tx, rx) = shutdown_channel();
    tx.send(true).unwrap();
    let summary = run_pool(controller, &config.scrape, PoolOptions::default(), Arc::new(NoProgress), rx)
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.processed, 0);
    assert_eq!(status_of(&store, "00000001", PageType::Overview, 1).await, ItemStatus::Pending);
}

#[tokio::test]
async fn test_shutdown_mid_run_finishes_in_flight_item() {
    let (_tmp, mut config, store) = setup().await;
    config.scrape.workers = 1;
    let (tx, rx) = shutdown_channel();
    let fetcher = ScriptedFetcher {
        on_fetch: Some(tx),
        ..Default::default()
    }
    .page("/company/00000001", &overview_page("FIRST LTD", "00000001"))
    .page("/company/00000002", &overview_page("SECOND LTD", "00000002"));

    store
        .seed(&["00000001".to_string(), "00000002".to_string()])
        .await
        .unwrap();
    let controller = Arc::new(Controller::new(store.clone(), Arc::new(fetcher), &config.scrape));
    let summary = run_pool(controller, &config.scrape, PoolOptions::default(), Arc::new(NoProgress), rx)
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.processed, 1);
    assert_eq!(status_of(&store, "00000001", PageType::Overview, 1).await, ItemStatus::Parsed);
    assert_eq!(status_of(&store, "00000002", PageType::Overview, 1).await, ItemStatus::Pending);
    // The completed overview queued its dependents before shutdown.
    assert_eq!(store.items_for("00000001").await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_limit_caps_processed_items() {
    let (_tmp, config, store) = setup().await;
    let ids: Vec<String> = (1..=5).map(|n| format!("{:08}", n)).collect();
    store.seed(&ids).await.unwrap();

    let summary = run(
        &config,
        &store,
        Arc::new(ScriptedFetcher::default()),
        PoolOptions {
            workers: Some(3),
            limit: Some(2),
        },
    )
    .await;
    assert_eq!(summary.processed, 2);
    let pending = store.queue_counts().await.unwrap().status_total(ItemStatus::Pending);
    assert_eq!(pending, 3);
}

#[tokio::test]
async fn test_stale_claim_is_released_and_old_worker_cannot_complete() {
    let (_tmp, config, store) = setup().await;
    store.seed(&["00000042".to_string()]).await.unwrap();

    let long_ago = chrono::Utc::now().timestamp() - 3600;
    let abandoned = store.claim_next(long_ago).await.unwrap().unwrap();

    let fetcher = Arc::new(
        ScriptedFetcher::default().page("/company/00000042", &overview_page("STALE LTD", "00000042")),
    );
    let controller = Controller::new(store.clone(), fetcher, &config.scrape);
    assert_eq!(controller.requeue_due().await.unwrap(), 1);

    let item = store
        .get_item(&ItemKey::first("00000042", PageType::Overview))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.status, ItemStatus::Pending);
    assert_eq!(item.attempts, 1);

    // The abandoned worker's token no longer matches anything.
    let outcome = controller.process(&abandoned).await.unwrap();
    assert_eq!(outcome, ItemOutcome::ClaimLost);

    let (fresh, outcome) = controller.run_one().await.unwrap().unwrap();
    assert_eq!(fresh.attempts, 2);
    assert!(matches!(
        outcome,
        ItemOutcome::Completed {
            status: ItemStatus::Parsed,
            ..
        }
    ));
}

#[tokio::test]
async fn test_charge_repeated_across_pages_is_stored_once() {
    let (_tmp, mut config, store) = setup().await;
    config.scrape.workers = 1;
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .page("/company/SC002116/charges", &charges_page(&["A1", "B2"], true))
            .page("/company/SC002116/charges?page=2", &charges_page(&["B2", "C3"], false)),
    );
    store
        .enqueue(&[ItemKey::first("SC002116", PageType::Charges)])
        .await
        .unwrap();
    run(&config, &store, fetcher, PoolOptions::default()).await;

    let charges = store.charges_for("SC002116").await.unwrap();
    let codes: Vec<&str> = charges.iter().map(|c| c.charge_code.as_str()).collect();
    assert_eq!(codes, vec!["A1", "B2", "C3"]);
    assert_eq!(charges[1].source_page_index, 1, "first sighting wins");
}

#[tokio::test]
async fn test_scraped_registry_feeds_matching() {
    let (_tmp, mut config, store) = setup().await;
    config.scrape.dependents = vec![];
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .page("/company/00000123", &overview_page("ACME LIMITED", "00000123"))
            .page("/company/SC002116", &overview_page("GLASGOW WORKS PLC", "SC002116")),
    );
    store
        .seed(&["00000123".to_string(), "SC002116".to_string()])
        .await
        .unwrap();
    run(&config, &store, fetcher, PoolOptions::default()).await;

    store
        .insert_external_records(&[
            CompanyRef::new("T1", Some("Acme Ltd"), Some("123")),
            CompanyRef::new("T2", Some("Unrelated"), Some("SC002116")),
            CompanyRef::new("T3", Some("Glasgow Works"), None),
            CompanyRef::new("T4", None, None),
        ])
        .await
        .unwrap();

    let report = match_records(store.as_ref(), &MatchingConfig::default())
        .await
        .unwrap();
    assert_eq!(report.registry_records, 2);
    assert_eq!(report.count(MatchTier::NameAndNumber), 1);
    assert_eq!(report.count(MatchTier::NumberOnly), 1);
    assert_eq!(report.count(MatchTier::NameOnly), 1);
    assert_eq!(report.count(MatchTier::NoMatch), 1);

    let results = store.match_results().await.unwrap();
    let t1 = results.iter().find(|r| r.external_id == "T1").unwrap();
    assert_eq!(t1.registry_id.as_deref(), Some("00000123"));
    assert_eq!(t1.confidence, 1.0);
    let t4 = results.iter().find(|r| r.external_id == "T4").unwrap();
    assert!(t4.registry_id.is_none());
}

#[tokio::test]
async fn test_charge_detail_pages_fill_list_gaps() {
    let (_tmp, mut config, store) = setup().await;
    config.scrape.workers = 1;
    let e = "SC002116";
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .page("/company/SC002116/charges", &linked_charges_page(e, &["aaa", "bbb"]))
            .page("/company/SC002116/charges/aaa", &charge_detail_page("All monies"))
            .page("/company/SC002116/charges/bbb", &charge_detail_page("£250,000")),
    );
    store
        .enqueue(&[ItemKey::first(e, PageType::Charges)])
        .await
        .unwrap();
    let summary = run(&config, &store, fetcher.clone(), PoolOptions::default()).await;

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(fetcher.calls_to("/company/SC002116/charges/aaa"), 1);
    let detail = store
        .get_item(&ItemKey::charge_detail(e, "bbb"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(detail.status, ItemStatus::Parsed);

    let charges = store.charges_for(e).await.unwrap();
    assert_eq!(charges.len(), 2);
    assert_eq!(charges[0].charge_code, "SC0021160001");
    assert_eq!(charges[0].status.as_deref(), Some("Outstanding"));
    assert_eq!(charges[0].amount_secured.as_deref(), Some("All monies"));
    assert_eq!(charges[1].amount_secured.as_deref(), Some("£250,000"));
    assert_eq!(
        charges[1].particulars.as_deref(),
        Some("Fixed charge over 1 Dock Road")
    );
    assert_eq!(
        charges[1].delivered_date,
        chrono::NaiveDate::from_ymd_opt(2019, 7, 5)
    );
}

#[tokio::test]
async fn test_charge_details_can_be_disabled() {
    let (_tmp, mut config, store) = setup().await;
    config.scrape.charge_details = false;
    let e = "SC002116";
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .page("/company/SC002116/charges", &linked_charges_page(e, &["aaa"])),
    );
    store
        .enqueue(&[ItemKey::first(e, PageType::Charges)])
        .await
        .unwrap();
    let summary = run(&config, &store, fetcher.clone(), PoolOptions::default()).await;

    assert_eq!(summary.processed, 1);
    assert_eq!(fetcher.calls_to("/company/SC002116/charges/aaa"), 0);
    assert_eq!(store.items_for(e).await.unwrap().len(), 1);
    assert_eq!(store.charges_for(e).await.unwrap()[0].amount_secured, None);
}

#[tokio::test]
async fn test_uncoded_charge_blocks_are_counted_not_stored() {
    let (_tmp, config, store) = setup().await;
    let e = "00000321";
    let page = r#"<html><body>
        <div class="mortgage-1"><h2>First fixed charge over shares</h2></div>
        <div class="mortgage-2"><h2>First fixed charge over shares</h2></div>
        <div class="mortgage-3"><h2>Charge code 0321 0001</h2></div>
      </body></html>"#;
    let fetcher = Arc::new(ScriptedFetcher::default().page("/company/00000321/charges", page));
    store
        .enqueue(&[ItemKey::first(e, PageType::Charges)])
        .await
        .unwrap();
    run(&config, &store, fetcher, PoolOptions::default()).await;

    let item = store
        .get_item(&ItemKey::first(e, PageType::Charges))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.status, ItemStatus::Exhausted);
    let stored = store.charges_for(e).await.unwrap().len();
    assert_eq!(stored, 1);
    assert_eq!(stored + item.anomalies as usize, 3);
}
