//! Charge list extraction.
//!
//! Registry charge pages come in several DOM shapes. Instead of assuming
//! one schema, the extractor tries [`BlockStrategy::ORDER`] in turn and
//! uses the first strategy that finds any charge blocks. Each block is
//! then read field by field. A block without a charge code, or repeating a
//! code already seen on the page, is skipped and reported as a
//! [`ParseAnomaly`], so `charges + anomalies` always equals the block count.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::{
    after_heading, definition_pairs, has_next_page, list_or_lines, non_empty,
    parse_registry_date, selector, text_of, AnomalyKind, ParseAnomaly,
};
use crate::models::{charge_detail_id, ChargeRecord, PageType};

static DIV: LazyLock<Selector> = LazyLock::new(|| selector("div"));
static CHARGE_LIST_ITEM: LazyLock<Selector> = LazyLock::new(|| {
    selector(r#"ol > li[id^="charge-"], ul > li[id^="charge-"]"#)
});
static CHARGE_ID_DIV: LazyLock<Selector> = LazyLock::new(|| selector(r#"div[id^="charge-"]"#));
static HEADING: LazyLock<Selector> = LazyLock::new(|| selector("h2, h3"));
static LINK: LazyLock<Selector> = LazyLock::new(|| selector("a"));
static STATUS_TAG: LazyLock<Selector> = LazyLock::new(|| selector(".status-tag"));

static MORTGAGE_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^mortgage-\d+$").expect("mortgage class pattern is valid"));

const CHARGE_CODE_PREFIX: &str = "charge code";

/// A named way of finding the per-charge blocks on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStrategy {
    /// `<div class="mortgage-N">` blocks, the current registry layout.
    MortgageClass,
    /// `<li id="charge-…">` items of an ordered or unordered list.
    ChargeListItem,
    /// `<div id="charge-…">` blocks.
    ChargeIdDiv,
}

impl BlockStrategy {
    /// Strategies in the order they are tried.
    pub const ORDER: [BlockStrategy; 3] = [
        BlockStrategy::MortgageClass,
        BlockStrategy::ChargeListItem,
        BlockStrategy::ChargeIdDiv,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BlockStrategy::MortgageClass => "mortgage-class",
            BlockStrategy::ChargeListItem => "charge-list-item",
            BlockStrategy::ChargeIdDiv => "charge-id-div",
        }
    }

    /// Blocks found by this strategy, or `None` when it finds nothing.
    pub fn locate<'a>(&self, document: &'a Html) -> Option<Vec<ElementRef<'a>>> {
        let blocks: Vec<ElementRef<'a>> = match self {
            BlockStrategy::MortgageClass => document
                .select(&DIV)
                .filter(|el| el.value().classes().any(|c| MORTGAGE_CLASS.is_match(c)))
                .collect(),
            BlockStrategy::ChargeListItem => document.select(&CHARGE_LIST_ITEM).collect(),
            BlockStrategy::ChargeIdDiv => document.select(&CHARGE_ID_DIV).collect(),
        };
        if blocks.is_empty() {
            None
        } else {
            Some(blocks)
        }
    }
}

/// Charge blocks together with the strategy that found them.
#[derive(Debug)]
pub struct LocatedBlocks<'a> {
    pub strategy: BlockStrategy,
    pub blocks: Vec<ElementRef<'a>>,
}

/// Run the strategies in order; the first one that finds blocks wins.
pub fn locate_blocks(document: &Html) -> Option<LocatedBlocks<'_>> {
    BlockStrategy::ORDER.iter().find_map(|strategy| {
        strategy.locate(document).map(|blocks| LocatedBlocks {
            strategy: *strategy,
            blocks,
        })
    })
}

/// Charges parsed from one page.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargePage {
    pub charges: Vec<ChargeRecord>,
    pub has_next_page: bool,
    pub anomalies: Vec<ParseAnomaly>,
    /// Strategy that located the blocks; `None` when the page had none.
    pub strategy: Option<BlockStrategy>,
}

/// Extract every charge on a charges page.
///
/// A page with no charge container yields no charges, no anomalies and
/// `has_next_page == false`: the entity simply has no charges.
pub fn extract_charges(document: &Html, entity_id: &str, page_index: u32) -> ChargePage {
    let located = match locate_blocks(document) {
        Some(l) => l,
        None => {
            return ChargePage {
                charges: Vec::new(),
                has_next_page: false,
                anomalies: Vec::new(),
                strategy: None,
            }
        }
    };

    let mut charges = Vec::with_capacity(located.blocks.len());
    let mut anomalies = Vec::new();

    for (i, block) in located.blocks.iter().enumerate() {
        let kind = match parse_block(block, entity_id, page_index) {
            Some(charge) => {
                if !charges
                    .iter()
                    .any(|c: &ChargeRecord| c.charge_code == charge.charge_code)
                {
                    charges.push(charge);
                    continue;
                }
                AnomalyKind::DuplicateChargeCode(charge.charge_code)
            }
            None => AnomalyKind::MissingChargeCode,
        };
        anomalies.push(ParseAnomaly {
            entity_id: entity_id.to_string(),
            page_type: PageType::Charges,
            page_index,
            block_index: Some(i),
            kind,
        });
    }

    ChargePage {
        charges,
        has_next_page: has_next_page(document),
        anomalies,
        strategy: Some(located.strategy),
    }
}

fn has_code_prefix(text: &str) -> bool {
    text.get(..CHARGE_CODE_PREFIX.len())
        .is_some_and(|p| p.eq_ignore_ascii_case(CHARGE_CODE_PREFIX))
}

/// The block's charge heading: the first `h2`/`h3` with a link or the
/// "Charge code" prefix. Section labels such as "Persons entitled" have
/// neither.
fn charge_heading<'a>(block: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    block
        .select(&HEADING)
        .find(|h| h.select(&LINK).next().is_some() || has_code_prefix(&text_of(h)))
}

/// Charge code and detail link from the block heading.
fn heading_code(block: &ElementRef<'_>) -> (Option<String>, Option<String>) {
    let heading = match charge_heading(block) {
        Some(h) => h,
        None => return (None, None),
    };

    let link = heading.select(&LINK).next();
    let href = link
        .and_then(|a| a.value().attr("href"))
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty());
    let text = text_of(&heading);

    let code = if has_code_prefix(&text) {
        non_empty(text[CHARGE_CODE_PREFIX.len()..].trim().to_string())
    } else {
        // Satisfied charges show a description instead of the code; the
        // detail link still ends in the charge id. Descriptions repeat
        // across charges and never stand in for a code.
        href.as_deref().and_then(charge_detail_id).map(str::to_string)
    };

    (code, href)
}

fn parse_block(block: &ElementRef<'_>, entity_id: &str, page_index: u32) -> Option<ChargeRecord> {
    let (code, link) = heading_code(block);
    let charge_code = code?;

    let mut record = ChargeRecord {
        entity_id: entity_id.to_string(),
        charge_code,
        status: block
            .select(&STATUS_TAG)
            .next()
            .map(|s| text_of(&s))
            .and_then(non_empty),
        persons_entitled: Vec::new(),
        particulars: None,
        amount_secured: None,
        filed_date: None,
        created_date: None,
        delivered_date: None,
        satisfied_date: None,
        link,
        source_page_index: page_index,
    };

    for (term, dd) in definition_pairs(block) {
        let value = text_of(&dd);
        match term.trim() {
            "transaction filed" => record.filed_date = parse_registry_date(&value),
            "amount secured" => record.amount_secured = non_empty(value),
            "short particulars" => record.particulars = non_empty(value),
            "persons entitled" => record.persons_entitled = list_or_lines(&dd),
            "created" => record.created_date = parse_registry_date(&value),
            "delivered" => record.delivered_date = parse_registry_date(&value),
            "satisfied" | "satisfied on" => record.satisfied_date = parse_registry_date(&value),
            "status" if record.status.is_none() => record.status = non_empty(value),
            _ => {}
        }
    }

    if record.persons_entitled.is_empty() {
        if let Some(ul) = after_heading(block, "persons entitled", "ul") {
            record.persons_entitled = list_or_lines(&ul);
        }
    }
    if record.particulars.is_none() {
        if let Some(p) = after_heading(block, "brief description", "p") {
            record.particulars = non_empty(text_of(&p));
        }
    }

    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn mortgage_block(n: usize, code: &str) -> String {
        format!(
            r#"<div class="mortgage-{n}">
                <h2 class="heading-medium"><a href="/company/SC002116/charges/abc{n}">Charge code {code}</a></h2>
                <span class="status-tag font-xsmall"><strong>Outstanding</strong></span>
                <dl>
                  <dt>Created</dt><dd>1 July 2019</dd>
                  <dt> Transaction Filed </dt><dd>Registered 5 July 2019 (MR01)</dd>
                  <dt>Amount secured</dt><dd>All monies due or to become due</dd>
                  <dt>Short particulars</dt><dd>The property known as 1 High Street</dd>
                  <dt>Persons entitled</dt><dd><ul><li>Bank of Scotland PLC</li><li>Lloyds Bank PLC</li></ul></dd>
                  <dt>Colour of ink</dt><dd>Blue</dd>
                </dl>
              </div>"#
        )
    }

    fn page(body: &str) -> Html {
        Html::parse_document(&format!("<html><body>{}</body></html>", body))
    }

    #[test]
    fn test_extracts_mortgage_blocks() {
        let doc = page(&format!(
            "{}{}",
            mortgage_block(1, "SC00 2116 0067"),
            mortgage_block(2, "SC00 2116 0066")
        ));
        let result = extract_charges(&doc, "SC002116", 1);
        assert_eq!(result.strategy, Some(BlockStrategy::MortgageClass));
        assert_eq!(result.charges.len(), 2);
        assert!(result.anomalies.is_empty());
        assert!(!result.has_next_page);

        let c = &result.charges[0];
        assert_eq!(c.charge_code, "SC00 2116 0067");
        assert_eq!(c.status.as_deref(), Some("Outstanding"));
        assert_eq!(c.filed_date, NaiveDate::from_ymd_opt(2019, 7, 5));
        assert_eq!(c.created_date, NaiveDate::from_ymd_opt(2019, 7, 1));
        assert_eq!(c.amount_secured.as_deref(), Some("All monies due or to become due"));
        assert_eq!(c.particulars.as_deref(), Some("The property known as 1 High Street"));
        assert_eq!(
            c.persons_entitled,
            vec!["Bank of Scotland PLC".to_string(), "Lloyds Bank PLC".to_string()]
        );
        assert_eq!(c.link.as_deref(), Some("/company/SC002116/charges/abc1"));
        assert_eq!(c.source_page_index, 1);
    }

    #[test]
    fn test_empty_page_has_no_charges() {
        let doc = page("<p>There are no charges available for this company.</p>");
        let result = extract_charges(&doc, "01234567", 1);
        assert!(result.charges.is_empty());
        assert!(result.anomalies.is_empty());
        assert!(!result.has_next_page);
        assert_eq!(result.strategy, None);
    }

    #[test]
    fn test_empty_page_ignores_pager() {
        let doc = page(r#"<ul class="pager"><li><a id="next-page" href="?page=2">Next</a></li></ul>"#);
        let result = extract_charges(&doc, "01234567", 1);
        assert!(!result.has_next_page);
    }

    #[test]
    fn test_block_without_heading_is_an_anomaly() {
        let broken = r#"<div class="mortgage-2"><dl><dt>Status</dt><dd>Satisfied</dd></dl></div>"#;
        let doc = page(&format!(
            "{}{}{}",
            mortgage_block(1, "AAA"),
            broken,
            mortgage_block(3, "CCC")
        ));
        let result = extract_charges(&doc, "01234567", 2);
        assert_eq!(result.charges.len(), 2);
        assert_eq!(result.charges[0].charge_code, "AAA");
        assert_eq!(result.charges[1].charge_code, "CCC");
        assert_eq!(result.anomalies.len(), 1);
        assert_eq!(result.anomalies[0].kind, AnomalyKind::MissingChargeCode);
        assert_eq!(result.anomalies[0].block_index, Some(1));
        assert_eq!(result.anomalies[0].page_index, 2);
    }

    #[test]
    fn test_list_item_shape_with_alternate_sections() {
        let doc = page(
            r#"<ol class="charges">
                 <li id="charge-1">
                   <h2><a href="/company/01234567/charges/XyZ123">First fixed charge over shares</a></h2>
                   <dl><dt>Status</dt><dd>Satisfied</dd><dt>Satisfied on</dt><dd>2 May 2018</dd></dl>
                   <h3 class="heading-small">Persons entitled</h3>
                   <ul><li>Barclays Bank PLC</li></ul>
                   <h3>Brief description</h3>
                   <p>All that freehold property</p>
                 </li>
               </ol>
               <ul class="pager"><li><a id="next-page" href="?page=2">Next</a></li></ul>"#,
        );
        let result = extract_charges(&doc, "01234567", 1);
        assert_eq!(result.strategy, Some(BlockStrategy::ChargeListItem));
        assert!(result.has_next_page);

        let c = &result.charges[0];
        assert_eq!(c.charge_code, "XyZ123");
        assert_eq!(c.status.as_deref(), Some("Satisfied"));
        assert_eq!(c.satisfied_date, NaiveDate::from_ymd_opt(2018, 5, 2));
        assert_eq!(c.persons_entitled, vec!["Barclays Bank PLC".to_string()]);
        assert_eq!(c.particulars.as_deref(), Some("All that freehold property"));
        assert_eq!(c.filed_date, None);
    }

    #[test]
    fn test_charge_id_div_shape_without_optional_fields() {
        let doc = page(r#"<div id="charge-7"><h2>Charge code 0123 4567 0001</h2></div>"#);
        let result = extract_charges(&doc, "01234567", 1);
        assert_eq!(result.strategy, Some(BlockStrategy::ChargeIdDiv));
        let c = &result.charges[0];
        assert_eq!(c.charge_code, "0123 4567 0001");
        assert_eq!(c.status, None);
        assert!(c.persons_entitled.is_empty());
        assert_eq!(c.link, None);
    }

    #[test]
    fn test_empty_code_after_prefix_is_an_anomaly() {
        let doc = page(r#"<div class="mortgage-1"><h2>Charge code </h2></div>"#);
        let result = extract_charges(&doc, "01234567", 1);
        assert!(result.charges.is_empty());
        assert_eq!(result.anomalies.len(), 1);
    }

    #[test]
    fn test_h3_charge_heading() {
        let doc = page(
            r#"<div class="mortgage-1">
                 <h3>Charge code 0001</h3>
                 <h3>Persons entitled</h3><ul><li>HSBC UK Bank PLC</li></ul>
               </div>"#,
        );
        let result = extract_charges(&doc, "01234567", 1);
        assert_eq!(result.charges.len(), 1);
        assert!(result.anomalies.is_empty());
        assert_eq!(result.charges[0].charge_code, "0001");
        assert_eq!(
            result.charges[0].persons_entitled,
            vec!["HSBC UK Bank PLC".to_string()]
        );
    }

    #[test]
    fn test_section_labels_are_not_charge_headings() {
        let doc = page(
            r#"<ol><li id="charge-1">
                 <h3>Persons entitled</h3><ul><li>Lloyds Bank PLC</li></ul>
                 <h3><a href="/company/01234567/charges/Q7w">Debenture</a></h3>
               </li></ol>"#,
        );
        let result = extract_charges(&doc, "01234567", 1);
        assert_eq!(result.charges.len(), 1);
        assert_eq!(result.charges[0].charge_code, "Q7w");
    }

    #[test]
    fn test_description_heading_without_link_is_an_anomaly() {
        let block = |n: usize| {
            format!(
                r#"<div class="mortgage-{n}"><h2>First fixed charge over shares</h2>
                   <dl><dt>Status</dt><dd>Satisfied</dd></dl></div>"#
            )
        };
        let doc = page(&format!("{}{}", block(1), block(2)));
        let result = extract_charges(&doc, "01234567", 1);
        assert!(result.charges.is_empty());
        assert_eq!(result.anomalies.len(), 2);
        assert!(result
            .anomalies
            .iter()
            .all(|a| a.kind == AnomalyKind::MissingChargeCode));
    }

    #[test]
    fn test_repeated_code_on_a_page_is_an_anomaly() {
        let doc = page(&format!(
            "{}{}{}",
            mortgage_block(1, "0001"),
            mortgage_block(2, "0001"),
            mortgage_block(3, "0002")
        ));
        let result = extract_charges(&doc, "01234567", 1);
        assert_eq!(result.charges.len() + result.anomalies.len(), 3);
        assert_eq!(result.charges.len(), 2);
        assert_eq!(
            result.anomalies[0].kind,
            AnomalyKind::DuplicateChargeCode("0001".to_string())
        );
        assert_eq!(result.anomalies[0].block_index, Some(1));
    }

    #[test]
    fn test_persons_entitled_as_lines() {
        let doc = page(
            r#"<div class="mortgage-1"><h2>Charge code 1</h2>
               <dl><dt>Persons entitled</dt><dd>HSBC UK Bank PLC<br>Santander UK PLC</dd></dl></div>"#,
        );
        let result = extract_charges(&doc, "01234567", 1);
        assert_eq!(
            result.charges[0].persons_entitled,
            vec!["HSBC UK Bank PLC".to_string(), "Santander UK PLC".to_string()]
        );
    }
}
