//! Identity-key deduplication within a single ingestion run.

use std::collections::HashSet;

use super::CanonicalProduct;

/// A row whose identity key was already accepted earlier in the run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("duplicate identity key '{0}'")]
pub struct DuplicateKey(pub String);

/// Tracks identity keys seen during one run. Create a fresh one per run.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
}

fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Identity key for a merchant's source id: `"{merchant}-{id}"`, lowercased
/// merchant, all whitespace removed. An empty merchant yields `"-{id}"`.
pub fn identity_key(merchant: &str, source_id: &str) -> String {
    let merchant = strip_whitespace(merchant).to_lowercase();
    let id = strip_whitespace(source_id);

    format!("{merchant}-{id}")
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a product, replacing its source id with the identity key.
    pub fn admit(&mut self, mut product: CanonicalProduct) -> Result<CanonicalProduct, DuplicateKey> {
        let key = identity_key(&product.merchant, &product.id);
        if !self.seen.insert(key.clone()) {
            return Err(DuplicateKey(key));
        }

        product.id = key;
        Ok(product)
    }

    /// Number of distinct keys admitted so far.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Price;

    fn product(merchant: &str, id: &str) -> CanonicalProduct {
        CanonicalProduct {
            id: id.to_string(),
            merchant: merchant.to_string(),
            title: "Title".to_string(),
            description: "Description".to_string(),
            category: "Uncategorized".to_string(),
            price: Price::Unknown,
            currency: "GBP".to_string(),
            link: String::new(),
            image: None,
        }
    }

    #[test]
    fn test_identity_key_normalizes_merchant() {
        assert_eq!(identity_key("Nordic Recovery", "p_1"), "nordicrecovery-p_1");
        assert_eq!(identity_key("NeuroPeak", " p 1 "), "neuropeak-p1");
        assert_eq!(identity_key("", "p_1"), "-p_1");
    }

    #[test]
    fn test_empty_merchant_does_not_collide_with_prefixed_id() {
        assert_ne!(
            identity_key("", "neuropeak-p_1"),
            identity_key("NeuroPeak", "p_1")
        );

        let mut dedup = Deduplicator::new();
        assert!(dedup.admit(product("NeuroPeak", "p_1")).is_ok());
        assert!(dedup.admit(product("", "neuropeak-p_1")).is_ok());
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn test_second_occurrence_is_rejected() {
        let mut dedup = Deduplicator::new();

        let first = dedup.admit(product("NeuroPeak", "DUPLICATE_TEST_ID")).unwrap();
        assert_eq!(first.id, "neuropeak-DUPLICATE_TEST_ID");

        let second = dedup.admit(product("neuropeak", "DUPLICATE_TEST_ID"));
        assert_eq!(
            second,
            Err(DuplicateKey("neuropeak-DUPLICATE_TEST_ID".to_string()))
        );
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_same_id_different_merchant_is_distinct() {
        let mut dedup = Deduplicator::new();
        assert!(dedup.admit(product("NeuroPeak", "p_1")).is_ok());
        assert!(dedup.admit(product("VitalSleep", "p_1")).is_ok());
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn test_fresh_run_has_no_memory() {
        let mut run1 = Deduplicator::new();
        run1.admit(product("NeuroPeak", "p_1")).unwrap();

        let mut run2 = Deduplicator::new();
        assert!(run2.is_empty());
        assert!(run2.admit(product("NeuroPeak", "p_1")).is_ok());
    }
}
