//! Canonical comparison keys for company names and registration numbers.
//!
//! Both functions are pure and total: any input yields either a key or
//! `None`, never a panic. `None` means "nothing comparable survived
//! normalization" and must never be treated as equal to another `None`
//! (see [`crate::matcher`]).

use std::sync::LazyLock;

use regex::Regex;

/// Registry numbers shorter than this are left-padded with zeros.
pub const COMPANY_NUMBER_WIDTH: usize = 8;

/// Trailing company-type suffix and everything after it.
///
/// Alternation order matters: longer, more specific tokens come first so
/// `LIMITED LIABILITY PARTNERSHIP` wins over `LIMITED` and `LTD.` over `LTD`.
/// The token must start after whitespace and end at a non-alphanumeric
/// character or the end of the string, so `TESCO` keeps its `CO`.
static SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)\s+(?:LIMITED LIABILITY PARTNERSHIP|LIMITED|COMPANY|LTD\.|LLP|LTD|PLC|CO\.|CO)(?:[^\p{L}\p{N}].*)?$",
    )
    .expect("suffix pattern is valid")
});

/// Normalize a company name into an uppercase alphanumeric key.
///
/// Returns `None` for empty or whitespace-only input, and for names that
/// normalize to nothing.
///
/// ```
/// use registry_scrape_core::normalize::normalize_name;
///
/// assert_eq!(normalize_name("Abc Limited").as_deref(), Some("ABC"));
/// assert_eq!(normalize_name("ABC LTD").as_deref(), Some("ABC"));
/// assert_eq!(normalize_name("  "), None);
/// ```
pub fn normalize_name(raw: &str) -> Option<String> {
    let upper = raw.trim().to_uppercase();
    if upper.is_empty() {
        return None;
    }

    let joined = upper.replace(" AND ", " ").replace(" & ", " ");
    let stripped = SUFFIX_RE.replace(&joined, "");

    // Keys hold uppercase letters and digits only; lowercase letters with no
    // uppercase mapping, such as `ª`, are dropped.
    let key: String = stripped
        .chars()
        .filter(|c| c.is_alphanumeric() && !c.is_lowercase())
        .collect();

    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

/// Normalize a registration number into a digit key.
///
/// Non-digits are dropped; short numbers are zero-padded to
/// [`COMPANY_NUMBER_WIDTH`], longer ones pass through unpadded.
///
/// ```
/// use registry_scrape_core::normalize::normalize_number;
///
/// assert_eq!(normalize_number("1234").as_deref(), Some("00001234"));
/// assert_eq!(normalize_number("n/a"), None);
/// ```
pub fn normalize_number(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    if digits.len() < COMPANY_NUMBER_WIDTH {
        Some(format!("{:0>width$}", digits, width = COMPANY_NUMBER_WIDTH))
    } else {
        Some(digits)
    }
}

/// Normalize an optional raw field.
pub fn normalize_name_opt(raw: Option<&str>) -> Option<String> {
    raw.and_then(normalize_name)
}

/// Normalize an optional raw field.
pub fn normalize_number_opt(raw: Option<&str>) -> Option<String> {
    raw.and_then(normalize_number)
}
