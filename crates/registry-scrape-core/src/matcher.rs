//! Tiered entity matching between an external dataset and the registry.
//!
//! A pair of records is scored by comparing their normalized names and
//! numbers ([`crate::normalize`]). Rules are evaluated strongest first:
//!
//! | Tier | Rule | Confidence |
//! |------|------|------------|
//! | `NameAndNumber` | numbers equal and names equal | 1.0 |
//! | `NumberOnly` | numbers equal | 0.9 |
//! | `NameOnly` | names equal | 0.7 |
//! | `NoMatch` | otherwise | 0.0 |
//!
//! "Equal" always means both sides normalized to `Some` and the keys are
//! identical. Two missing values never match.
//!
//! [`RegistryIndex`] applies the same rules against a whole registry table
//! at once, using lookup maps built in a single pass.

use std::collections::HashMap;

use crate::models::{CompanyRef, MatchResult, MatchTier};
use crate::normalize::{normalize_name_opt, normalize_number_opt};

/// Normalized comparison keys for one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchKeys {
    pub name: Option<String>,
    pub number: Option<String>,
}

impl MatchKeys {
    pub fn of(company: &CompanyRef) -> Self {
        Self {
            name: normalize_name_opt(company.name.as_deref()),
            number: normalize_number_opt(company.number.as_deref()),
        }
    }
}

/// `Some(a) == Some(b)`; `None` is never equal to anything, itself included.
fn keys_equal(a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Pick the tier for two sets of already-normalized keys.
pub fn tier_for(external: &MatchKeys, registry: &MatchKeys) -> MatchTier {
    let numbers = keys_equal(&external.number, &registry.number);
    let names = keys_equal(&external.name, &registry.name);

    if numbers && names {
        MatchTier::NameAndNumber
    } else if numbers {
        MatchTier::NumberOnly
    } else if names {
        MatchTier::NameOnly
    } else {
        MatchTier::NoMatch
    }
}

/// Score one external record against one registry record.
pub fn match_pair(external: &CompanyRef, registry: &CompanyRef) -> MatchResult {
    let tier = tier_for(&MatchKeys::of(external), &MatchKeys::of(registry));
    MatchResult::new(external.id.clone(), Some(registry.id.clone()), tier)
}

/// In-memory lookup over every registry record.
///
/// When several registry records share a key, the first one loaded wins.
#[derive(Debug, Default)]
pub struct RegistryIndex {
    by_name_number: HashMap<(String, String), String>,
    by_number: HashMap<String, String>,
    by_name: HashMap<String, String>,
    records: usize,
}

impl RegistryIndex {
    pub fn build<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a CompanyRef>,
    {
        let mut index = RegistryIndex::default();
        for record in records {
            index.insert(record);
        }
        index
    }

    pub fn insert(&mut self, record: &CompanyRef) {
        self.records += 1;
        let keys = MatchKeys::of(record);

        if let (Some(name), Some(number)) = (&keys.name, &keys.number) {
            self.by_name_number
                .entry((name.clone(), number.clone()))
                .or_insert_with(|| record.id.clone());
        }
        if let Some(number) = keys.number {
            self.by_number
                .entry(number)
                .or_insert_with(|| record.id.clone());
        }
        if let Some(name) = keys.name {
            self.by_name.entry(name).or_insert_with(|| record.id.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Number of distinct keys per lookup: (name+number, number, name).
    pub fn key_counts(&self) -> (usize, usize, usize) {
        (
            self.by_name_number.len(),
            self.by_number.len(),
            self.by_name.len(),
        )
    }

    /// Best registry match for one external record.
    pub fn best_match(&self, external: &CompanyRef) -> MatchResult {
        let keys = MatchKeys::of(external);

        if let (Some(name), Some(number)) = (&keys.name, &keys.number) {
            if let Some(id) = self.by_name_number.get(&(name.clone(), number.clone())) {
                return MatchResult::new(
                    external.id.clone(),
                    Some(id.clone()),
                    MatchTier::NameAndNumber,
                );
            }
        }
        if let Some(id) = keys.number.as_ref().and_then(|n| self.by_number.get(n)) {
            return MatchResult::new(external.id.clone(), Some(id.clone()), MatchTier::NumberOnly);
        }
        if let Some(id) = keys.name.as_ref().and_then(|n| self.by_name.get(n)) {
            return MatchResult::new(external.id.clone(), Some(id.clone()), MatchTier::NameOnly);
        }
        MatchResult::no_match(external.id.clone())
    }

    pub fn match_all<'a, I>(&self, externals: I) -> Vec<MatchResult>
    where
        I: IntoIterator<Item = &'a CompanyRef>,
    {
        externals.into_iter().map(|e| self.best_match(e)).collect()
    }
}

/// Per-tier counts over a set of results.
pub fn tier_counts(results: &[MatchResult]) -> Vec<(MatchTier, usize)> {
    MatchTier::ALL
        .iter()
        .map(|tier| (*tier, results.iter().filter(|r| r.tier == *tier).count()))
        .collect()
}
