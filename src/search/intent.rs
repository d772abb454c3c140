//! Keyword taxonomy used to enrich short or ambiguous queries before embedding.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyEntry {
    pub keyword: String,
    pub expansion: String,
}

/// Built-in keyword → expansion table. Order matters: expansions are
/// appended in this order when several keywords match.
const BUILTIN_TAXONOMY: &[(&str, &str)] = &[
    (
        "hyrox",
        "functional fitness race training endurance recovery compression apparel electrolytes",
    ),
    ("marathon", "running endurance training hydration recovery"),
    ("gym", "strength training muscle recovery protein supplements"),
    ("sleep", "deep sleep relaxation melatonin magnesium bedroom"),
    ("focus", "concentration nootropic cognitive energy"),
    ("stress", "calm relaxation adaptogen anxiety relief"),
    ("energy", "natural energy caffeine electrolytes fatigue"),
    ("gut", "digestive health probiotic prebiotic fiber"),
    ("recovery", "muscle recovery massage red light therapy compression"),
    ("skin", "skincare moisturiser hydration"),
];

static BUILTIN: Lazy<IntentTaxonomy> = Lazy::new(|| {
    IntentTaxonomy::new(BUILTIN_TAXONOMY.iter().map(|(keyword, expansion)| TaxonomyEntry {
        keyword: keyword.to_string(),
        expansion: expansion.to_string(),
    }))
});

/// Immutable ordered taxonomy. Build once at startup and share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentTaxonomy {
    entries: Vec<TaxonomyEntry>,
}

impl IntentTaxonomy {
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = TaxonomyEntry>,
    {
        let entries = entries
            .into_iter()
            .map(|e| TaxonomyEntry {
                keyword: e.keyword.trim().to_lowercase(),
                expansion: e.expansion.trim().to_string(),
            })
            .filter(|e| !e.keyword.is_empty())
            .collect();
        Self { entries }
    }

    pub fn builtin() -> &'static IntentTaxonomy {
        &BUILTIN
    }

    pub fn entries(&self) -> &[TaxonomyEntry] {
        &self.entries
    }

    /// Expansion phrases whose keyword occurs in the query, in declaration order.
    pub fn matches<'a>(&'a self, query: &str) -> impl Iterator<Item = &'a str> + 'a {
        let lowered = query.to_lowercase();
        self.entries
            .iter()
            .filter(move |e| lowered.contains(&e.keyword))
            .map(|e| e.expansion.as_str())
    }

    /// The raw query followed by every matching expansion, or the raw query
    /// unchanged when nothing matched.
    pub fn expand(&self, query: &str) -> String {
        let expansions: Vec<&str> = self.matches(query).collect();
        if expansions.is_empty() {
            return query.to_string();
        }
        format!("{} {}", query, expansions.join(" "))
    }
}

impl Default for IntentTaxonomy {
    fn default() -> Self {
        Self::builtin().clone()
    }
}
