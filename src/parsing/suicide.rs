//! Suicide classification by weapon/cause keyword.

use crate::config::{default_suicide_categories, SuicideRule};
use crate::types::SuicideCategory;

/// Lowercase, unify `_` and `-` with spaces, collapse whitespace.
///
/// `suicide_by_relocation`, `Suicide By Relocation` and
/// `suicide-by  relocation` all normalize to `suicide by relocation`.
pub fn normalize_weapon(weapon: &str) -> String {
    weapon
        .to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ordered keyword table. The first rule with a keyword contained in the
/// normalized weapon decides the category; no match is `Other`.
#[derive(Debug, Clone)]
pub struct SuicideClassifier {
    rules: Vec<(SuicideCategory, Vec<String>)>,
}

impl SuicideClassifier {
    pub fn new(rules: &[SuicideRule]) -> Self {
        let rules = rules
            .iter()
            .map(|r| {
                let keywords = r
                    .keywords
                    .iter()
                    .map(|k| normalize_weapon(k))
                    .filter(|k| !k.is_empty())
                    .collect();
                (r.category, keywords)
            })
            .collect();
        Self { rules }
    }

    pub fn classify(&self, weapon: &str) -> SuicideCategory {
        let normalized = normalize_weapon(weapon);
        self.rules
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| normalized.contains(k.as_str())))
            .map_or(SuicideCategory::Other, |(category, _)| *category)
    }
}

impl Default for SuicideClassifier {
    fn default() -> Self {
        Self::new(&default_suicide_categories())
    }
}
