//! Officer appointment extraction.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::{
    collapse_ws, definition_pairs, has_next_page, non_empty, parse_registry_date, selector,
    text_of, AnomalyKind, ParseAnomaly,
};
use crate::models::{OfficerRecord, PageType};

static APPOINTMENT_BLOCK: LazyLock<Selector> =
    LazyLock::new(|| selector(".appointments-list div"));
static OFFICER_NAME: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"span[id*="officer-name"]"#));
static HEADING: LazyLock<Selector> = LazyLock::new(|| selector("h2"));
static STATUS_TAG: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"[id*="officer-status-tag"], .status-tag"#));

static APPOINTMENT_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^appointment-\d+$").expect("appointment class pattern is valid"));
static MONTH_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z]+)\s+(\d{4})").expect("month-year pattern is valid"));

/// Officers parsed from one page.
#[derive(Debug, Clone, PartialEq)]
pub struct OfficerPage {
    pub officers: Vec<OfficerRecord>,
    pub has_next_page: bool,
    pub anomalies: Vec<ParseAnomaly>,
}

pub fn extract_officers(document: &Html, entity_id: &str, page_index: u32) -> OfficerPage {
    let blocks: Vec<ElementRef<'_>> = document
        .select(&APPOINTMENT_BLOCK)
        .filter(|el| el.value().classes().any(|c| APPOINTMENT_CLASS.is_match(c)))
        .collect();

    if blocks.is_empty() {
        return OfficerPage {
            officers: Vec::new(),
            has_next_page: false,
            anomalies: Vec::new(),
        };
    }

    let mut officers = Vec::with_capacity(blocks.len());
    let mut anomalies = Vec::new();

    for (i, block) in blocks.iter().enumerate() {
        match parse_block(block, entity_id, page_index) {
            Some(officer) => officers.push(officer),
            None => anomalies.push(ParseAnomaly {
                entity_id: entity_id.to_string(),
                page_type: PageType::Officers,
                page_index,
                block_index: Some(i),
                kind: AnomalyKind::MissingOfficerName,
            }),
        }
    }

    OfficerPage {
        officers,
        has_next_page: has_next_page(document),
        anomalies,
    }
}

fn parse_block(block: &ElementRef<'_>, entity_id: &str, page_index: u32) -> Option<OfficerRecord> {
    let name = block
        .select(&OFFICER_NAME)
        .next()
        .or_else(|| block.select(&HEADING).next())
        .map(|el| text_of(&el))
        .and_then(non_empty)?;

    let mut officer = OfficerRecord {
        entity_id: entity_id.to_string(),
        name,
        role: None,
        status: block
            .select(&STATUS_TAG)
            .next()
            .map(|el| text_of(&el))
            .and_then(non_empty),
        appointed_on: None,
        resigned_on: None,
        date_of_birth: None,
        nationality: None,
        occupation: None,
        country_of_residence: None,
        address: None,
        source_page_index: page_index,
    };

    for (term, dd) in definition_pairs(block) {
        let value = text_of(&dd);
        if term.contains("role") {
            officer.role = non_empty(value);
        } else if term.contains("appointed") {
            officer.appointed_on = parse_registry_date(&value);
        } else if term.contains("resigned") {
            officer.resigned_on = parse_registry_date(&value);
        } else if term.contains("nationality") {
            officer.nationality = non_empty(value);
        } else if term.contains("country of residence") {
            officer.country_of_residence = non_empty(value);
        } else if term.contains("occupation") {
            officer.occupation = non_empty(value);
        } else if term.contains("date of birth") {
            officer.date_of_birth = MONTH_YEAR
                .captures(&value)
                .map(|c| format!("{} {}", &c[1], &c[2]));
        } else if term.contains("address") {
            let parts: Vec<String> = dd
                .text()
                .map(collapse_ws)
                .filter(|s| !s.is_empty())
                .collect();
            officer.address = non_empty(parts.join(", "));
        }
    }

    Some(officer)
}
