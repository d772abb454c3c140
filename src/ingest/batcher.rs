//! Embeds validated products and upserts them into the index in bounded batches.

use std::thread::sleep;
use std::time::Duration;

use rand::random;

use crate::catalog::{CanonicalProduct, ProductMetadata};
use crate::config::IngestConfig;
use crate::ingest::IngestError;
use crate::semantic::{Embedder, EmbeddingError, IndexEntry, SimilarityIndex};

/// How often a failed upsert is retried before the error propagates.
///
/// Upserts are idempotent per id, so retrying a whole batch is safe.
/// `max_retries == 0` disables retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Exponential backoff with up to 50% jitter. `attempt` starts at 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exp_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let jitter_ms = random::<u64>() % (base_ms / 2 + 1);
        Duration::from_millis(exp_ms.saturating_add(jitter_ms))
    }
}

impl From<&IngestConfig> for RetryPolicy {
    fn from(config: &IngestConfig) -> Self {
        Self {
            max_retries: config.upsert_max_retries,
            base_delay: Duration::from_millis(config.upsert_retry_base_delay_ms),
        }
    }
}

/// Result of handing one product to the batcher.
#[derive(Debug)]
pub enum Vectorized {
    Queued,
    EmbeddingFailed(EmbeddingError),
}

pub struct VectorBatcher<'a> {
    embedder: &'a dyn Embedder,
    index: &'a dyn SimilarityIndex,
    batch_size: usize,
    retry: RetryPolicy,
    pending: Vec<IndexEntry>,
    upserted: usize,
    batches: usize,
}

impl<'a> VectorBatcher<'a> {
    pub fn new(
        embedder: &'a dyn Embedder,
        index: &'a dyn SimilarityIndex,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            embedder,
            index,
            batch_size,
            retry,
            pending: Vec::with_capacity(batch_size),
            upserted: 0,
            batches: 0,
        }
    }

    /// Embed one product and queue it, flushing when the batch is full.
    ///
    /// Embedding failures are row-scoped and returned as `Vectorized::EmbeddingFailed`;
    /// only upsert failures are errors.
    pub fn push(&mut self, product: CanonicalProduct) -> Result<Vectorized, IngestError> {
        let metadata = ProductMetadata::from(product);

        let vector = match self.embedder.encode(&metadata.raw_text) {
            Ok(vector) => vector,
            Err(err) => {
                log::warn!("embedding failed for '{}': {err}", metadata.product.id);
                return Ok(Vectorized::EmbeddingFailed(err));
            }
        };

        self.pending.push(IndexEntry {
            id: metadata.product.id.clone(),
            vector,
            metadata,
        });

        if self.pending.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(Vectorized::Queued)
    }

    /// Upsert whatever is pending. Returns (rows upserted, batches issued).
    pub fn finish(mut self) -> Result<(usize, usize), IngestError> {
        self.flush()?;
        Ok((self.upserted, self.batches))
    }

    fn flush(&mut self) -> Result<(), IngestError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.pending);
        let count = batch.len();
        let batch_no = self.batches + 1;

        let mut attempt = 0u32;
        loop {
            match self.index.upsert(batch.clone()) {
                Ok(()) => break,
                Err(err) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    log::warn!(
                        "upsert of batch {batch_no} failed: {err}, retrying (attempt {attempt}/{}) after {}ms",
                        self.retry.max_retries,
                        delay.as_millis()
                    );
                    sleep(delay);
                }
                Err(err) => {
                    return Err(IngestError::IndexCallFailure {
                        batch: batch_no,
                        attempts: attempt + 1,
                        upserted_before: self.upserted,
                        source: err,
                    });
                }
            }
        }

        self.upserted += count;
        self.batches = batch_no;
        self.pending = Vec::with_capacity(self.batch_size);
        log::info!("upserted batch {batch_no} ({count} products)");
        Ok(())
    }
}
