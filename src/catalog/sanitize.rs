//! Per-row validation and cleanup of normalized feed rows.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::{CanonicalField, CanonicalProduct, Price, RawProduct};

pub const NO_DESCRIPTION: &str = "No description available.";
pub const UNCATEGORIZED: &str = "Uncategorized";
pub const DEFAULT_CURRENCY: &str = "GBP";

static TAG_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>").expect("Failed to compile tag regex"));

static ENTITY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(pound|amp|lt|gt|quot|#39|nbsp);").expect("Failed to compile entity regex")
});

/// Why a row was excluded before reaching the vectorizer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("missing required field '{0}'")]
    MissingRequiredField(CanonicalField),
}

/// Strip tags, decode the common entities and collapse whitespace.
pub fn clean_html(raw: &str) -> String {
    let stripped = TAG_REGEX.replace_all(raw, "");

    // single pass, so "&amp;lt;" decodes to "&lt;" and not "<"
    let decoded = ENTITY_REGEX.replace_all(&stripped, |caps: &Captures| {
        match &caps[1] {
            "pound" => "£",
            "amp" => "&",
            "lt" => "<",
            "gt" => ">",
            "quot" => "\"",
            "#39" => "'",
            _ => " ",
        }
    });

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a feed price, keeping only digits and decimal points.
pub fn parse_price(raw: &str) -> Price {
    let digits: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    match digits.parse::<f64>() {
        Ok(amount) if amount.is_finite() => Price::Known(amount),
        _ => Price::Unknown,
    }
}

/// Price as a plain number, 0.0 when the input is unparsable.
pub fn normalize_price(raw: &str) -> f64 {
    parse_price(raw).amount_or_zero()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validate and clean a normalized row.
///
/// The returned product still carries the raw source id; the deduplicator
/// replaces it with the run's identity key.
pub fn sanitize(raw: RawProduct) -> Result<CanonicalProduct, RejectReason> {
    let id = non_empty(raw.id)
        .ok_or(RejectReason::MissingRequiredField(CanonicalField::Id))?;

    let title = raw
        .title
        .map(|t| clean_html(&t))
        .filter(|t| !t.is_empty())
        .ok_or(RejectReason::MissingRequiredField(CanonicalField::Title))?;

    let description = raw
        .description
        .map(|d| clean_html(&d))
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| NO_DESCRIPTION.to_string());

    let category = non_empty(raw.category).unwrap_or_else(|| UNCATEGORIZED.to_string());

    let price = raw
        .price
        .as_deref()
        .map(parse_price)
        .unwrap_or(Price::Unknown);

    Ok(CanonicalProduct {
        id,
        merchant: non_empty(raw.merchant).unwrap_or_default(),
        title,
        description,
        category,
        price,
        currency: non_empty(raw.currency).unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        link: non_empty(raw.link).unwrap_or_default(),
        image: non_empty(raw.image),
    })
}
