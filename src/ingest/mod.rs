//! Catalog ingestion: Normalizer → Sanitizer → Deduplicator → Batcher.
//!
//! Every row ends in exactly one `RowOutcome`; outcomes are tallied into a
//! `RunSummary`. Row-level problems never abort the run. A failed index upsert
//! does, and surfaces as `IngestError::IndexCallFailure`.

pub mod batcher;

use std::path::Path;

use serde::Serialize;

use crate::catalog::{
    sanitize, CanonicalProduct, Deduplicator, DuplicateKey, FeedMapping, FeedReader, MappingError,
    RawProduct, RejectReason,
};
use crate::config::IngestConfig;
use crate::semantic::{Embedder, IndexError, SimilarityIndex};

pub use batcher::{RetryPolicy, VectorBatcher, Vectorized};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("feed mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("upsert of batch {batch} failed after {attempts} attempt(s) ({upserted_before} products already upserted): {source}")]
    IndexCallFailure {
        batch: usize,
        attempts: u32,
        upserted_before: usize,
        #[source]
        source: IndexError,
    },
}

/// What happened to a single feed row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Accepted,
    Rejected(RejectReason),
    Duplicate(DuplicateKey),
    EmbeddingFailed(String),
    Malformed(String),
}

/// Per-run tally of row outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub rows_read: usize,
    /// Rows handed to the batcher and embedded
    pub accepted: usize,
    pub missing_required: usize,
    pub duplicates: usize,
    pub embedding_failures: usize,
    pub malformed_rows: usize,
    /// Accepted rows whose price could not be parsed
    pub unknown_prices: usize,
    pub upserted: usize,
    pub batches: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &RowOutcome) {
        self.rows_read += 1;
        match outcome {
            RowOutcome::Accepted => self.accepted += 1,
            RowOutcome::Rejected(RejectReason::MissingRequiredField(_)) => {
                self.missing_required += 1
            }
            RowOutcome::Duplicate(_) => self.duplicates += 1,
            RowOutcome::EmbeddingFailed(_) => self.embedding_failures += 1,
            RowOutcome::Malformed(_) => self.malformed_rows += 1,
        }
    }
}

/// Run the sanitizer and deduplicator over one row. `Err` carries the
/// outcome of a row that must not reach the batcher.
pub fn screen(dedup: &mut Deduplicator, raw: RawProduct) -> Result<CanonicalProduct, RowOutcome> {
    let product = sanitize(raw).map_err(RowOutcome::Rejected)?;
    dedup.admit(product).map_err(RowOutcome::Duplicate)
}

pub struct Ingestor<'a> {
    embedder: &'a dyn Embedder,
    index: &'a dyn SimilarityIndex,
    batch_size: usize,
    retry: RetryPolicy,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        embedder: &'a dyn Embedder,
        index: &'a dyn SimilarityIndex,
        config: &IngestConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            batch_size: config.batch_size,
            retry: RetryPolicy::from(config),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Ingest a CSV feed file using the given column mapping.
    pub fn ingest_file(&self, path: &Path, mapping: FeedMapping) -> Result<RunSummary, IngestError> {
        log::info!("ingesting feed {}", path.display());
        let reader = FeedReader::open(path, mapping)?;
        self.run(reader)
    }

    /// Ingest already-normalized rows. Key memory lasts for this call only.
    pub fn run<I, E>(&self, rows: I) -> Result<RunSummary, IngestError>
    where
        I: IntoIterator<Item = Result<RawProduct, E>>,
        E: std::fmt::Display,
    {
        let mut summary = RunSummary::default();
        let mut dedup = Deduplicator::new();
        let mut batcher = VectorBatcher::new(self.embedder, self.index, self.batch_size, self.retry);

        for (line, row) in rows.into_iter().enumerate() {
            let outcome = match row {
                Err(err) => RowOutcome::Malformed(err.to_string()),
                Ok(raw) => match screen(&mut dedup, raw) {
                    Err(outcome) => outcome,
                    Ok(product) => {
                        let price_known = product.price.is_known();
                        match batcher.push(product)? {
                            Vectorized::Queued => {
                                if !price_known {
                                    summary.unknown_prices += 1;
                                }
                                RowOutcome::Accepted
                            }
                            Vectorized::EmbeddingFailed(err) => {
                                RowOutcome::EmbeddingFailed(err.to_string())
                            }
                        }
                    }
                },
            };

            match &outcome {
                RowOutcome::Accepted | RowOutcome::EmbeddingFailed(_) => {}
                RowOutcome::Rejected(reason) => log::debug!("row {}: rejected, {reason}", line + 1),
                RowOutcome::Duplicate(key) => log::debug!("row {}: {key}", line + 1),
                RowOutcome::Malformed(err) => log::warn!("row {}: malformed, {err}", line + 1),
            }
            summary.record(&outcome);
        }

        let (upserted, batches) = batcher.finish()?;
        summary.upserted = upserted;
        summary.batches = batches;

        log::info!(
            "ingestion finished: {} rows, {} accepted, {} missing required, {} duplicates, {} embedding failures, {} unknown prices, {} batches",
            summary.rows_read,
            summary.accepted,
            summary.missing_required,
            summary.duplicates,
            summary.embedding_failures,
            summary.unknown_prices,
            summary.batches
        );

        Ok(summary)
    }
}
