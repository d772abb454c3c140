//! Product catalog model and the row-level stages of feed ingestion.
//!
//! - `feed`: maps feed-specific column names onto the canonical schema
//! - `sanitize`: required-field checks, markup stripping, price/category normalization
//! - `dedup`: per-run identity key tracking

pub mod dedup;
pub mod feed;
pub mod sanitize;

use std::fmt::Display;

use serde::{Deserialize, Serialize};

pub use dedup::{identity_key, Deduplicator, DuplicateKey};
pub use feed::{FeedMapping, FeedReader, MappingError, RawProduct};
pub use sanitize::{clean_html, normalize_price, parse_price, sanitize, RejectReason};

/// Fields of the canonical product schema every feed is normalized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalField {
    Id,
    Merchant,
    Title,
    Description,
    Category,
    Price,
    Currency,
    Link,
    Image,
}

impl CanonicalField {
    /// Fields a feed mapping must provide a source column for.
    pub const MANDATORY: [CanonicalField; 2] = [CanonicalField::Id, CanonicalField::Title];

    pub const ALL: [CanonicalField; 9] = [
        CanonicalField::Id,
        CanonicalField::Merchant,
        CanonicalField::Title,
        CanonicalField::Description,
        CanonicalField::Category,
        CanonicalField::Price,
        CanonicalField::Currency,
        CanonicalField::Link,
        CanonicalField::Image,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::Id => "id",
            CanonicalField::Merchant => "merchant",
            CanonicalField::Title => "title",
            CanonicalField::Description => "description",
            CanonicalField::Category => "category",
            CanonicalField::Price => "price",
            CanonicalField::Currency => "currency",
            CanonicalField::Link => "link",
            CanonicalField::Image => "image",
        }
    }
}

impl Display for CanonicalField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Product price. Unparsable feed prices stay distinguishable from free items.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "amount", rename_all = "lowercase")]
pub enum Price {
    Known(f64),
    Unknown,
}

impl Price {
    pub fn is_known(&self) -> bool {
        matches!(self, Price::Known(_))
    }

    /// Amount with the legacy 0.0 sentinel for unknown prices.
    pub fn amount_or_zero(&self) -> f64 {
        match self {
            Price::Known(amount) => *amount,
            Price::Unknown => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalProduct {
    /// Index id: the run's identity key for this row
    pub id: String,
    pub merchant: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub price: Price,
    pub currency: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl CanonicalProduct {
    /// Text handed to the embedding model for this product.
    pub fn combined_text(&self) -> String {
        format!(
            "{}. {}. Category: {}.",
            self.title, self.description, self.category
        )
    }
}

/// Metadata snapshot stored alongside a vector in the similarity index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductMetadata {
    #[serde(flatten)]
    pub product: CanonicalProduct,
    /// The exact text that was embedded
    pub raw_text: String,
}

impl From<CanonicalProduct> for ProductMetadata {
    fn from(product: CanonicalProduct) -> Self {
        let raw_text = product.combined_text();
        Self { product, raw_text }
    }
}
