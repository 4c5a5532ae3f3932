//! Company overview extraction.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use super::{
    collapse_ws, definition_pairs, non_empty, parse_registry_date, selector, text_of,
    AnomalyKind, ParseAnomaly,
};
use crate::models::{CompanyOverview, PageType};

/// Company name locations, most specific first.
static NAME: LazyLock<[Selector; 3]> = LazyLock::new(|| {
    [
        selector(".company-header .heading-xlarge"),
        selector(".company-header h1"),
        selector("h1"),
    ]
});
static NUMBER: LazyLock<Selector> = LazyLock::new(|| selector("#company-number"));
static NUMBER_STRONG: LazyLock<Selector> = LazyLock::new(|| selector("#company-number strong"));
static STATUS: LazyLock<Selector> = LazyLock::new(|| selector("dd#company-status"));
static TYPE: LazyLock<Selector> = LazyLock::new(|| selector("dd#company-type"));
static INCORPORATED: LazyLock<Selector> =
    LazyLock::new(|| selector("dd#company-incorporation-date"));
static ADDRESS: LazyLock<Selector> = LazyLock::new(|| selector("dd.address, dd.text"));
static BODY: LazyLock<Selector> = LazyLock::new(|| selector("body"));

/// Overview parsed from one page.
#[derive(Debug, Clone, PartialEq)]
pub struct OverviewPage {
    /// `None` when the page lacked the company name or number.
    pub overview: Option<CompanyOverview>,
    pub anomalies: Vec<ParseAnomaly>,
}

fn first_text(document: &Html, sel: &Selector) -> Option<String> {
    document
        .select(sel)
        .next()
        .map(|el| text_of(&el))
        .and_then(non_empty)
}

/// The dd following the first dt whose text contains `label`.
fn dd_for<'a>(pairs: &[(String, ElementRef<'a>)], label: &str) -> Option<String> {
    pairs
        .iter()
        .find(|(term, _)| term.contains(label))
        .map(|(_, dd)| text_of(dd))
        .and_then(non_empty)
}

fn company_number(document: &Html) -> Option<String> {
    if let Some(n) = first_text(document, &NUMBER_STRONG) {
        return Some(n);
    }
    let text = first_text(document, &NUMBER)?;
    let stripped = text
        .strip_prefix("Company number")
        .unwrap_or(&text)
        .trim()
        .to_string();
    non_empty(stripped)
}

pub fn extract_overview(document: &Html, entity_id: &str) -> OverviewPage {
    let company_name = NAME.iter().find_map(|sel| first_text(document, sel));
    let company_number = company_number(document);

    let mut anomalies = Vec::new();
    let anomaly = |field: &'static str| ParseAnomaly {
        entity_id: entity_id.to_string(),
        page_type: PageType::Overview,
        page_index: 1,
        block_index: None,
        kind: AnomalyKind::MissingCompanyField(field),
    };
    if company_name.is_none() {
        anomalies.push(anomaly("company name"));
    }
    if company_number.is_none() {
        anomalies.push(anomaly("company number"));
    }
    let (company_name, company_number) = match (company_name, company_number) {
        (Some(name), Some(number)) => (name, number),
        _ => {
            return OverviewPage {
                overview: None,
                anomalies,
            }
        }
    };

    let pairs = match document.select(&BODY).next() {
        Some(body) => definition_pairs(&body),
        None => Vec::new(),
    };

    let status = first_text(document, &STATUS).or_else(|| dd_for(&pairs, "company status"));
    let company_type = first_text(document, &TYPE).or_else(|| dd_for(&pairs, "company type"));
    let incorporated_on = first_text(document, &INCORPORATED)
        .or_else(|| dd_for(&pairs, "incorporated on"))
        .and_then(|d| parse_registry_date(&d));
    let registered_address = document
        .select(&ADDRESS)
        .next()
        .map(|dd| {
            dd.text()
                .map(collapse_ws)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .and_then(non_empty)
        .or_else(|| dd_for(&pairs, "registered office address"));

    OverviewPage {
        overview: Some(CompanyOverview {
            company_number,
            company_name,
            status,
            company_type,
            incorporated_on,
            registered_address,
        }),
        anomalies,
    }
}
