//! Similarity retrieval with a confidence floor.

use std::sync::Arc;

use crate::config::SearchConfig;
use crate::semantic::{Embedder, EmbeddingError, IndexError, ScoredMatch, SimilarityIndex};

/// Failure of one of the external services on the query path.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("embedding call failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index call failed: {0}")]
    Index(#[from] IndexError),
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn SimilarityIndex>,
    top_k: usize,
    threshold: f32,
    min_query_chars: usize,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn SimilarityIndex>,
        config: &SearchConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            top_k: config.top_k,
            threshold: config.threshold,
            min_query_chars: config.min_query_chars,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Whether the raw query has too few non-whitespace characters to search.
    pub fn is_too_short(&self, raw_query: &str) -> bool {
        raw_query.chars().filter(|c| !c.is_whitespace()).count() < self.min_query_chars
    }

    /// Embed the expanded query and return the top-k candidates that clear
    /// the threshold, in the index's order.
    pub fn retrieve(&self, expanded_query: &str) -> Result<Vec<ScoredMatch>, RetrievalError> {
        let vector = self.embedder.encode(expanded_query)?;
        log::debug!("query embedded ({} dimensions)", vector.len());

        let candidates = self.index.query(&vector, self.top_k)?;
        log::debug!("index returned {} candidates", candidates.len());

        Ok(filter_confident(candidates, self.threshold))
    }
}

/// Drop candidates scoring below `threshold` without reordering the rest.
pub fn filter_confident(candidates: Vec<ScoredMatch>, threshold: f32) -> Vec<ScoredMatch> {
    candidates
        .into_iter()
        .filter(|m| m.score >= threshold)
        .collect()
}
