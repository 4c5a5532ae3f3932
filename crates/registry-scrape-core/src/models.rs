//! Core data models used throughout registry-scrape.
//!
//! These types represent the scrape work items, the structured rows the
//! extractors produce from registry pages, and the records that flow
//! through entity matching.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The kind of registry page a [`ScrapeItem`] fetches.
///
/// Declaration order is fetch priority: an entity's Overview is fetched
/// before any of its dependent pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Overview,
    Officers,
    Charges,
    Insolvency,
    /// One charge's own page, linked from a charges list.
    ChargeDetail,
}

impl PageType {
    pub const ALL: [PageType; 5] = [
        PageType::Overview,
        PageType::Officers,
        PageType::Charges,
        PageType::Insolvency,
        PageType::ChargeDetail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::Overview => "overview",
            PageType::Officers => "officers",
            PageType::Charges => "charges",
            PageType::Insolvency => "insolvency",
            PageType::ChargeDetail => "charge_detail",
        }
    }

    /// Whether the registry splits this page type over numbered pages.
    pub fn is_paginated(&self) -> bool {
        matches!(self, PageType::Officers | PageType::Charges)
    }

    /// Path appended to the company URL to reach this page.
    ///
    /// Charge detail pages add `/<detail id>` after the suffix.
    pub fn path_suffix(&self) -> &'static str {
        match self {
            PageType::Overview => "",
            PageType::Officers => "/officers",
            PageType::Charges | PageType::ChargeDetail => "/charges",
            PageType::Insolvency => "/insolvency",
        }
    }

    /// Claim priority; lower is claimed first.
    pub fn priority(&self) -> i64 {
        match self {
            PageType::Overview => 0,
            PageType::Officers => 1,
            PageType::Charges => 2,
            PageType::Insolvency => 3,
            PageType::ChargeDetail => 4,
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overview" => Ok(PageType::Overview),
            "officers" => Ok(PageType::Officers),
            "charges" => Ok(PageType::Charges),
            "insolvency" => Ok(PageType::Insolvency),
            "charge_detail" => Ok(PageType::ChargeDetail),
            other => anyhow::bail!(
                "Unknown page type: '{}'. Must be overview, officers, charges, insolvency, \
                 or charge_detail.",
                other
            ),
        }
    }
}

/// Lifecycle status of a [`ScrapeItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InProgress,
    Parsed,
    Failed,
    Exhausted,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 5] = [
        ItemStatus::Pending,
        ItemStatus::InProgress,
        ItemStatus::Parsed,
        ItemStatus::Failed,
        ItemStatus::Exhausted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Parsed => "parsed",
            ItemStatus::Failed => "failed",
            ItemStatus::Exhausted => "exhausted",
        }
    }

    /// Parsed and Exhausted items are done; nothing will touch them again.
    pub fn is_complete(&self) -> bool {
        matches!(self, ItemStatus::Parsed | ItemStatus::Exhausted)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            "in_progress" => Ok(ItemStatus::InProgress),
            "parsed" => Ok(ItemStatus::Parsed),
            "failed" => Ok(ItemStatus::Failed),
            "exhausted" => Ok(ItemStatus::Exhausted),
            other => anyhow::bail!("Unknown item status: '{}'", other),
        }
    }
}

/// Identity of a scrape item: unique per queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub entity_id: String,
    pub page_type: PageType,
    pub page_index: u32,
    /// Registry id of the charge, for [`PageType::ChargeDetail`] only.
    pub detail_id: Option<String>,
}

impl ItemKey {
    pub fn new(entity_id: impl Into<String>, page_type: PageType, page_index: u32) -> Self {
        Self {
            entity_id: entity_id.into(),
            page_type,
            page_index: page_index.max(1),
            detail_id: None,
        }
    }

    /// First page of the given type for an entity.
    pub fn first(entity_id: impl Into<String>, page_type: PageType) -> Self {
        Self::new(entity_id, page_type, 1)
    }

    /// Detail page of one charge.
    pub fn charge_detail(entity_id: impl Into<String>, detail_id: impl Into<String>) -> Self {
        Self {
            detail_id: Some(detail_id.into()),
            ..Self::first(entity_id, PageType::ChargeDetail)
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail_id {
            Some(id) => write!(f, "{} {} {}", self.entity_id, self.page_type, id),
            None => write!(f, "{} {} p{}", self.entity_id, self.page_type, self.page_index),
        }
    }
}

/// One page-fetch unit of work tracked through its status lifecycle.
#[derive(Debug, Clone)]
pub struct ScrapeItem {
    pub id: i64,
    pub entity_id: String,
    pub page_type: PageType,
    pub page_index: u32,
    pub detail_id: Option<String>,
    pub status: ItemStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Compressed page bytes, present once fetched.
    pub raw_content: Option<Vec<u8>>,
    /// Hex SHA-256 of the uncompressed page.
    pub content_hash: Option<String>,
    pub anomalies: u32,
    pub terminal: bool,
    pub claim_token: Option<String>,
    pub claimed_at: Option<i64>,
    pub retry_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ScrapeItem {
    pub fn key(&self) -> ItemKey {
        ItemKey {
            detail_id: self.detail_id.clone(),
            ..ItemKey::new(self.entity_id.clone(), self.page_type, self.page_index)
        }
    }
}

/// Registry id of a charge from its detail link, e.g. `abc1` in
/// `/company/SC002116/charges/abc1`.
pub fn charge_detail_id(link: &str) -> Option<&str> {
    let (_, rest) = link.split_once("/charges/")?;
    let id = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .trim();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// One parsed mortgage/charge entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeRecord {
    pub entity_id: String,
    pub charge_code: String,
    pub status: Option<String>,
    pub persons_entitled: Vec<String>,
    pub particulars: Option<String>,
    pub amount_secured: Option<String>,
    pub filed_date: Option<NaiveDate>,
    pub created_date: Option<NaiveDate>,
    pub delivered_date: Option<NaiveDate>,
    pub satisfied_date: Option<NaiveDate>,
    pub link: Option<String>,
    pub source_page_index: u32,
}

impl ChargeRecord {
    /// Registry id of this charge's detail page, when the list linked it.
    pub fn detail_id(&self) -> Option<&str> {
        self.link.as_deref().and_then(charge_detail_id)
    }

    /// Fill fields the list page left empty from the charge's detail page.
    ///
    /// Values already stored are never overwritten.
    pub fn merge_detail(&mut self, detail: &ChargeDetail) {
        fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if slot.is_none() {
                *slot = value.clone();
            }
        }
        fill(&mut self.status, &detail.status);
        fill(&mut self.particulars, &detail.particulars);
        fill(&mut self.amount_secured, &detail.amount_secured);
        fill(&mut self.filed_date, &detail.filed_date);
        fill(&mut self.created_date, &detail.created_date);
        fill(&mut self.delivered_date, &detail.delivered_date);
        fill(&mut self.satisfied_date, &detail.satisfied_date);
        if self.persons_entitled.is_empty() {
            self.persons_entitled = detail.persons_entitled.clone();
        }
    }
}

/// Fields read from a single charge's detail page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeDetail {
    pub entity_id: String,
    pub detail_id: String,
    pub status: Option<String>,
    pub persons_entitled: Vec<String>,
    pub particulars: Option<String>,
    pub amount_secured: Option<String>,
    pub filed_date: Option<NaiveDate>,
    pub created_date: Option<NaiveDate>,
    pub delivered_date: Option<NaiveDate>,
    pub satisfied_date: Option<NaiveDate>,
}

/// One officer appointment listed on an officers page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfficerRecord {
    pub entity_id: String,
    pub name: String,
    pub role: Option<String>,
    pub status: Option<String>,
    pub appointed_on: Option<NaiveDate>,
    pub resigned_on: Option<NaiveDate>,
    pub date_of_birth: Option<String>,
    pub nationality: Option<String>,
    pub occupation: Option<String>,
    pub country_of_residence: Option<String>,
    pub address: Option<String>,
    pub source_page_index: u32,
}

/// Company profile scraped from an overview page.
///
/// Stored in the registry table that matching reads from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyOverview {
    pub company_number: String,
    pub company_name: String,
    pub status: Option<String>,
    pub company_type: Option<String>,
    pub incorporated_on: Option<NaiveDate>,
    pub registered_address: Option<String>,
}

/// A company as seen by the matcher: an id plus raw name and number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRef {
    pub id: String,
    pub name: Option<String>,
    pub number: Option<String>,
}

impl CompanyRef {
    pub fn new(id: impl Into<String>, name: Option<&str>, number: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.map(str::to_string),
            number: number.map(str::to_string),
        }
    }
}

impl From<&CompanyOverview> for CompanyRef {
    fn from(o: &CompanyOverview) -> Self {
        CompanyRef {
            id: o.company_number.clone(),
            name: Some(o.company_name.clone()),
            number: Some(o.company_number.clone()),
        }
    }
}

/// Confidence bucket for an entity match, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    NameAndNumber,
    NumberOnly,
    NameOnly,
    NoMatch,
}

impl MatchTier {
    pub const ALL: [MatchTier; 4] = [
        MatchTier::NameAndNumber,
        MatchTier::NumberOnly,
        MatchTier::NameOnly,
        MatchTier::NoMatch,
    ];

    /// Fixed confidence per tier.
    pub fn confidence(&self) -> f64 {
        match self {
            MatchTier::NameAndNumber => 1.0,
            MatchTier::NumberOnly => 0.9,
            MatchTier::NameOnly => 0.7,
            MatchTier::NoMatch => 0.0,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            MatchTier::NameAndNumber => 3,
            MatchTier::NumberOnly => 2,
            MatchTier::NameOnly => 1,
            MatchTier::NoMatch => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchTier::NameAndNumber => "name_and_number",
            MatchTier::NumberOnly => "number_only",
            MatchTier::NameOnly => "name_only",
            MatchTier::NoMatch => "no_match",
        }
    }
}

impl PartialOrd for MatchTier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordered by confidence: `NameAndNumber > NumberOnly > NameOnly > NoMatch`.
impl Ord for MatchTier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for MatchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name_and_number" => Ok(MatchTier::NameAndNumber),
            "number_only" => Ok(MatchTier::NumberOnly),
            "name_only" => Ok(MatchTier::NameOnly),
            "no_match" => Ok(MatchTier::NoMatch),
            other => anyhow::bail!("Unknown match tier: '{}'", other),
        }
    }
}

/// Outcome of reconciling one external record against the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub external_id: String,
    pub registry_id: Option<String>,
    pub tier: MatchTier,
    pub confidence: f64,
}

impl MatchResult {
    /// Build a result; confidence always follows from the tier.
    pub fn new(external_id: impl Into<String>, registry_id: Option<String>, tier: MatchTier) -> Self {
        let registry_id = match tier {
            MatchTier::NoMatch => None,
            _ => registry_id,
        };
        Self {
            external_id: external_id.into(),
            registry_id,
            tier,
            confidence: tier.confidence(),
        }
    }

    pub fn no_match(external_id: impl Into<String>) -> Self {
        Self::new(external_id, None, MatchTier::NoMatch)
    }
}
