//! Structured extraction from registry HTML pages.
//!
//! Each page type has its own extractor; [`extract_page`] dispatches on
//! [`PageType`]. Extractors never fail: markup they cannot make sense of
//! yields fewer records plus [`ParseAnomaly`] entries, so a page that
//! silently lost data is still visible in the counts.
//!
//! | Page | Module | Rows |
//! |------|--------|------|
//! | Overview | [`overview`] | [`CompanyOverview`] |
//! | Officers | [`officers`] | [`OfficerRecord`] |
//! | Charges | [`charges`] | [`ChargeRecord`] |
//! | Charge detail | [`charge_detail`] | [`ChargeDetail`] |
//! | Insolvency | (none) | raw page only |

pub mod charge_detail;
pub mod charges;
pub mod officers;
pub mod overview;

use std::fmt;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::models::{ChargeDetail, ChargeRecord, CompanyOverview, ItemKey, OfficerRecord, PageType};

pub use charge_detail::{extract_charge_detail, ChargeDetailPage};
pub use charges::{extract_charges, ChargePage};
pub use officers::{extract_officers, OfficerPage};
pub use overview::{extract_overview, OverviewPage};

/// What was wrong with a block the extractor had to skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnomalyKind {
    /// Charge block without a usable charge code.
    MissingChargeCode,
    /// Charge block repeating a code seen earlier on the same page.
    DuplicateChargeCode(String),
    /// Charge detail page without any known field.
    EmptyChargeDetail,
    /// Officer block without a name.
    MissingOfficerName,
    /// Overview page without a required company field.
    MissingCompanyField(&'static str),
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyKind::MissingChargeCode => f.write_str("charge block has no charge code"),
            AnomalyKind::DuplicateChargeCode(code) => {
                write!(f, "charge code {} repeated on the page", code)
            }
            AnomalyKind::EmptyChargeDetail => f.write_str("charge detail page has no fields"),
            AnomalyKind::MissingOfficerName => f.write_str("officer block has no name"),
            AnomalyKind::MissingCompanyField(field) => {
                write!(f, "overview page has no {}", field)
            }
        }
    }
}

/// A non-fatal problem found while extracting one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAnomaly {
    pub entity_id: String,
    pub page_type: PageType,
    pub page_index: u32,
    /// Zero-based position of the offending block, when block-scoped.
    pub block_index: Option<usize>,
    pub kind: AnomalyKind,
}

impl fmt::Display for ParseAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} p{}",
            self.entity_id, self.page_type, self.page_index
        )?;
        if let Some(i) = self.block_index {
            write!(f, " block {}", i)?;
        }
        write!(f, ": {}", self.kind)
    }
}

/// Structured rows extracted from one page, tagged by page type.
#[derive(Debug, Clone, PartialEq)]
pub enum PageData {
    Overview(Option<CompanyOverview>),
    Officers(Vec<OfficerRecord>),
    Charges(Vec<ChargeRecord>),
    ChargeDetail(Option<ChargeDetail>),
    Insolvency,
}

impl PageData {
    /// Number of structured rows this page produced.
    pub fn row_count(&self) -> usize {
        match self {
            PageData::Overview(o) => usize::from(o.is_some()),
            PageData::Officers(v) => v.len(),
            PageData::Charges(v) => v.len(),
            PageData::ChargeDetail(d) => usize::from(d.is_some()),
            PageData::Insolvency => 0,
        }
    }
}

/// Result of extracting any page type.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPage {
    pub data: PageData,
    pub has_next_page: bool,
    pub anomalies: Vec<ParseAnomaly>,
}

/// Extract structured rows from one decompressed page.
pub fn extract_page(html: &str, key: &ItemKey) -> ExtractedPage {
    let document = Html::parse_document(html);
    let entity_id = key.entity_id.as_str();
    let page_index = key.page_index;
    match key.page_type {
        PageType::Overview => {
            let page = extract_overview(&document, entity_id);
            ExtractedPage {
                data: PageData::Overview(page.overview),
                has_next_page: false,
                anomalies: page.anomalies,
            }
        }
        PageType::Officers => {
            let page = extract_officers(&document, entity_id, page_index);
            ExtractedPage {
                data: PageData::Officers(page.officers),
                has_next_page: page.has_next_page,
                anomalies: page.anomalies,
            }
        }
        PageType::Charges => {
            let page = extract_charges(&document, entity_id, page_index);
            ExtractedPage {
                data: PageData::Charges(page.charges),
                has_next_page: page.has_next_page,
                anomalies: page.anomalies,
            }
        }
        PageType::ChargeDetail => {
            let detail_id = key.detail_id.as_deref().unwrap_or_default();
            let page = extract_charge_detail(&document, entity_id, detail_id);
            ExtractedPage {
                data: PageData::ChargeDetail(page.detail),
                has_next_page: false,
                anomalies: page.anomalies,
            }
        }
        PageType::Insolvency => ExtractedPage {
            data: PageData::Insolvency,
            has_next_page: false,
            anomalies: Vec::new(),
        },
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Shared helpers
// ═══════════════════════════════════════════════════════════════════════

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {:?}: {:?}", css, e))
}

static DT: LazyLock<Selector> = LazyLock::new(|| selector("dt"));
static LI: LazyLock<Selector> = LazyLock::new(|| selector("li"));
static H3: LazyLock<Selector> = LazyLock::new(|| selector("h3"));

/// Pagination controls, identified by id or class rather than link text.
static NEXT_PAGE: LazyLock<Selector> = LazyLock::new(|| {
    selector(
        "a#next-page, #next-page a, .pager a.next, .pager .next a, \
         .pagination a.next, .pagination .next a, .govuk-pagination__next a, a[rel=\"next\"]",
    )
});

static DATE_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2}) ([A-Za-z]{3,9}) (\d{4})\b").expect("date pattern is valid")
});

/// Element text with runs of whitespace collapsed to single spaces.
pub(crate) fn text_of(el: &ElementRef<'_>) -> String {
    collapse_ws(&el.text().collect::<Vec<_>>().join(" "))
}

pub(crate) fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Term/definition pairs inside `scope`, keyed by lowercased term text.
///
/// A `dt` pairs with the `dd` element that immediately follows it; a `dt`
/// without one is skipped.
pub(crate) fn definition_pairs<'a>(scope: &ElementRef<'a>) -> Vec<(String, ElementRef<'a>)> {
    let mut pairs = Vec::new();
    for dt in scope.select(&DT) {
        let next = dt.next_siblings().filter_map(ElementRef::wrap).next();
        if let Some(dd) = next {
            if dd.value().name() == "dd" {
                pairs.push((text_of(&dt).to_lowercase(), dd));
            }
        }
    }
    pairs
}

/// List items of `el`, or its text lines when it has no list.
pub(crate) fn list_or_lines(el: &ElementRef<'_>) -> Vec<String> {
    let items: Vec<String> = el
        .select(&LI)
        .map(|li| text_of(&li))
        .filter(|s| !s.is_empty())
        .collect();
    if !items.is_empty() {
        return items;
    }
    el.text()
        .map(collapse_ws)
        .filter(|s| !s.is_empty())
        .collect()
}

/// The first sibling element after an `h3` whose text contains `label`.
pub(crate) fn after_heading<'a>(
    scope: &ElementRef<'a>,
    label: &str,
    tag: &str,
) -> Option<ElementRef<'a>> {
    let label = label.to_lowercase();
    scope
        .select(&H3)
        .filter(|h| text_of(h).to_lowercase().contains(&label))
        .find_map(|h| {
            h.next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|sib| sib.value().name() == tag)
        })
}

/// Parse a registry date such as `12 March 2019` or `1 Apr 2020`.
///
/// Dates embedded in longer text are found too; anything else is `None`.
pub fn parse_registry_date(text: &str) -> Option<NaiveDate> {
    let text = collapse_ws(text);
    for fmt in ["%d %B %Y", "%d %b %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(&text, fmt) {
            return Some(d);
        }
    }
    let caps = DATE_IN_TEXT.captures(&text)?;
    let candidate = format!("{} {} {}", &caps[1], &caps[2], &caps[3]);
    ["%d %B %Y", "%d %b %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&candidate, fmt).ok())
}

/// Whether the page carries a "next page" pagination control.
pub fn has_next_page(document: &Html) -> bool {
    document.select(&NEXT_PAGE).any(|el| {
        el.value().name() != "a" || el.value().attr("href").is_some_and(|h| !h.trim().is_empty())
    })
}
