//! Feed normalization: per-feed column mapping onto the canonical schema.
//!
//! A feed is a header-delimited CSV export whose column names differ between
//! affiliate networks. Each feed gets a mapping table `{source_column: canonical_field}`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::CanonicalField;

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("feed mapping has no source column for mandatory field '{0}'")]
    UnmappedField(CanonicalField),

    #[error("canonical field '{field}' is mapped from both '{first}' and '{second}'")]
    DuplicateTarget {
        field: CanonicalField,
        first: String,
        second: String,
    },

    #[error("feed header is missing column '{column}' (mapped to '{field}')")]
    MissingColumn { column: String, field: CanonicalField },

    #[error("unknown feed '{0}'")]
    UnknownFeed(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Mapping table from a feed's column names to canonical fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedMapping {
    columns: BTreeMap<String, CanonicalField>,
}

impl FeedMapping {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = (S, CanonicalField)>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// AWIN product feed export.
    pub fn awin() -> Self {
        Self::new([
            ("aw_product_id", CanonicalField::Id),
            ("merchant_name", CanonicalField::Merchant),
            ("product_name", CanonicalField::Title),
            ("description", CanonicalField::Description),
            ("merchant_category", CanonicalField::Category),
            ("search_price", CanonicalField::Price),
            ("currency", CanonicalField::Currency),
            ("aw_deep_link", CanonicalField::Link),
            ("large_image", CanonicalField::Image),
        ])
    }

    /// Older AWIN export layout with abbreviated column names.
    pub fn awin_legacy() -> Self {
        Self::new([
            ("product_id", CanonicalField::Id),
            ("merchant_name", CanonicalField::Merchant),
            ("prod_name", CanonicalField::Title),
            ("description_text", CanonicalField::Description),
            ("category_path", CanonicalField::Category),
            ("retail_price", CanonicalField::Price),
            ("deep_link_url", CanonicalField::Link),
        ])
    }

    /// Feed already using canonical column names.
    pub fn canonical() -> Self {
        Self::new(CanonicalField::ALL.map(|field| (field.as_str(), field)))
    }

    /// Built-in feed mappings keyed by feed name.
    pub fn builtin() -> BTreeMap<String, FeedMapping> {
        BTreeMap::from([
            ("awin".to_string(), Self::awin()),
            ("awin_legacy".to_string(), Self::awin_legacy()),
            ("canonical".to_string(), Self::canonical()),
        ])
    }

    /// Source column configured for a canonical field.
    pub fn source_for(&self, field: CanonicalField) -> Option<&str> {
        self.columns
            .iter()
            .find(|(_, target)| **target == field)
            .map(|(source, _)| source.as_str())
    }

    /// Check that every mandatory field has exactly one configured source.
    pub fn validate(&self) -> Result<(), MappingError> {
        let mut seen: BTreeMap<CanonicalField, &str> = BTreeMap::new();
        for (source, field) in &self.columns {
            if let Some(first) = seen.insert(*field, source) {
                return Err(MappingError::DuplicateTarget {
                    field: *field,
                    first: first.to_string(),
                    second: source.clone(),
                });
            }
        }

        for field in CanonicalField::MANDATORY {
            if !seen.contains_key(&field) {
                return Err(MappingError::UnmappedField(field));
            }
        }

        Ok(())
    }

    /// Reshape one raw record into canonical fields.
    ///
    /// Columns without a mapping are ignored; empty values are treated as absent.
    pub fn normalize<'a, I>(&self, record: I) -> RawProduct
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut raw = RawProduct::default();
        for (column, value) in record {
            if let Some(field) = self.columns.get(column) {
                raw.set(*field, value);
            }
        }
        raw
    }
}

/// A feed row reshaped into canonical fields, not yet validated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawProduct {
    pub id: Option<String>,
    pub merchant: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Option<String>,
    pub currency: Option<String>,
    pub link: Option<String>,
    pub image: Option<String>,
}

impl RawProduct {
    pub fn set(&mut self, field: CanonicalField, value: &str) {
        let value = if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        };

        let slot = match field {
            CanonicalField::Id => &mut self.id,
            CanonicalField::Merchant => &mut self.merchant,
            CanonicalField::Title => &mut self.title,
            CanonicalField::Description => &mut self.description,
            CanonicalField::Category => &mut self.category,
            CanonicalField::Price => &mut self.price,
            CanonicalField::Currency => &mut self.currency,
            CanonicalField::Link => &mut self.link,
            CanonicalField::Image => &mut self.image,
        };
        *slot = value;
    }
}

/// Streams a CSV feed through a mapping, one `RawProduct` per row.
pub struct FeedReader<R: Read> {
    reader: csv::Reader<R>,
    headers: csv::StringRecord,
    mapping: FeedMapping,
}

impl FeedReader<File> {
    pub fn open(path: &Path, mapping: FeedMapping) -> Result<Self, MappingError> {
        Self::new(File::open(path).map_err(csv::Error::from)?, mapping)
    }
}

impl<R: Read> FeedReader<R> {
    pub fn new(source: R, mapping: FeedMapping) -> Result<Self, MappingError> {
        mapping.validate()?;

        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(source);
        let headers = reader.headers()?.clone();

        for field in CanonicalField::MANDATORY {
            // validate() guarantees a source exists
            if let Some(column) = mapping.source_for(field) {
                if !headers.iter().any(|h| h.trim() == column) {
                    return Err(MappingError::MissingColumn {
                        column: column.to_string(),
                        field,
                    });
                }
            }
        }

        Ok(Self {
            reader,
            headers,
            mapping,
        })
    }
}

impl<R: Read> Iterator for FeedReader<R> {
    type Item = Result<RawProduct, csv::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut record = csv::StringRecord::new();
        match self.reader.read_record(&mut record) {
            Ok(true) => {
                let fields = self
                    .headers
                    .iter()
                    .map(str::trim)
                    .zip(record.iter());
                Some(Ok(self.mapping.normalize(fields)))
            }
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}
