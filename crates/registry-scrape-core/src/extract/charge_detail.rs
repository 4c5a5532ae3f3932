//! Single charge detail pages.
//!
//! The charges list often leaves out the amount secured and the
//! particulars; the charge's own page carries them under fixed element
//! ids. Term/heading fallbacks cover pages without those ids.

use std::sync::LazyLock;

use scraper::{Html, Selector};

use super::{
    after_heading, definition_pairs, list_or_lines, non_empty, parse_registry_date, selector,
    text_of, AnomalyKind, ParseAnomaly,
};
use crate::models::{ChargeDetail, PageType};

static CREATED: LazyLock<Selector> = LazyLock::new(|| selector("dd#mortgage-created-on"));
static DELIVERED: LazyLock<Selector> = LazyLock::new(|| selector("dd#mortgage-delivered-on"));
static STATUS: LazyLock<Selector> = LazyLock::new(|| selector("#mortgage-status"));
static PERSONS: LazyLock<Selector> = LazyLock::new(|| selector("ul#persons-entitled"));
static AMOUNT_LABEL: LazyLock<Selector> =
    LazyLock::new(|| selector("h3#mortgage-amount-secured-label"));
static PARTICULARS: LazyLock<Selector> = LazyLock::new(|| selector("#mortgage-particulars"));
static BODY: LazyLock<Selector> = LazyLock::new(|| selector("body"));

/// Detail parsed from one page.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeDetailPage {
    /// `None` when the page carried none of the known fields.
    pub detail: Option<ChargeDetail>,
    pub anomalies: Vec<ParseAnomaly>,
}

fn first_text(document: &Html, sel: &Selector) -> Option<String> {
    document
        .select(sel)
        .next()
        .map(|el| text_of(&el))
        .and_then(non_empty)
}

pub fn extract_charge_detail(document: &Html, entity_id: &str, detail_id: &str) -> ChargeDetailPage {
    let body = document.select(&BODY).next();
    let pairs = body.as_ref().map(definition_pairs).unwrap_or_default();
    let term = |label: &str| {
        pairs
            .iter()
            .find(|(t, _)| t.trim() == label)
            .map(|(_, dd)| text_of(dd))
            .and_then(non_empty)
    };

    let mut detail = ChargeDetail {
        entity_id: entity_id.to_string(),
        detail_id: detail_id.to_string(),
        status: None,
        persons_entitled: Vec::new(),
        particulars: None,
        amount_secured: None,
        filed_date: term("transaction filed").and_then(|t| parse_registry_date(&t)),
        created_date: first_text(document, &CREATED)
            .or_else(|| term("created"))
            .and_then(|t| parse_registry_date(&t)),
        delivered_date: first_text(document, &DELIVERED)
            .or_else(|| term("delivered"))
            .and_then(|t| parse_registry_date(&t)),
        satisfied_date: None,
    };

    // "Satisfied on 2 May 2020" carries both the status and its date.
    if let Some(status) = first_text(document, &STATUS).or_else(|| term("status")) {
        if status.to_lowercase().starts_with("satisfied") {
            detail.satisfied_date = parse_registry_date(&status);
            detail.status = Some("Satisfied".to_string());
        } else {
            detail.status = Some(status);
        }
    }

    detail.persons_entitled = match document.select(&PERSONS).next() {
        Some(ul) => list_or_lines(&ul),
        None => body
            .as_ref()
            .and_then(|b| after_heading(b, "persons entitled", "ul"))
            .map(|ul| list_or_lines(&ul))
            .unwrap_or_default(),
    };

    detail.amount_secured = document
        .select(&AMOUNT_LABEL)
        .next()
        .and_then(|h3| {
            h3.next_siblings()
                .filter_map(scraper::ElementRef::wrap)
                .find(|sib| sib.value().name() == "p")
        })
        .or_else(|| body.as_ref().and_then(|b| after_heading(b, "amount secured", "p")))
        .map(|p| text_of(&p))
        .and_then(non_empty);

    detail.particulars = first_text(document, &PARTICULARS).or_else(|| {
        body.as_ref()
            .and_then(|b| after_heading(b, "particulars", "p"))
            .map(|p| text_of(&p))
            .and_then(non_empty)
    });

    let found_any = detail.status.is_some()
        || !detail.persons_entitled.is_empty()
        || detail.particulars.is_some()
        || detail.amount_secured.is_some()
        || detail.created_date.is_some()
        || detail.delivered_date.is_some();

    if found_any {
        ChargeDetailPage {
            detail: Some(detail),
            anomalies: Vec::new(),
        }
    } else {
        ChargeDetailPage {
            detail: None,
            anomalies: vec![ParseAnomaly {
                entity_id: entity_id.to_string(),
                page_type: PageType::ChargeDetail,
                page_index: 1,
                block_index: None,
                kind: AnomalyKind::EmptyChargeDetail,
            }],
        }
    }
}
