//! Query-time retrieval: Expander → Retrieval/Filter → Archive.
//!
//! Per request: RECEIVED → (too short: empty) → EXPANDED → EMBEDDED → QUERIED
//! → FILTERED → (no survivors: empty) → ARCHIVING → DONE. External failures
//! end the request with an error; no partial result is produced.

pub mod archive;
pub mod intent;
pub mod retrieval;

use std::sync::Arc;

use serde::Serialize;

use crate::semantic::ScoredMatch;

pub use archive::{ArchiveEntry, ArchiveError, ArchiveOutcome, SearchArchive};
pub use intent::{IntentTaxonomy, TaxonomyEntry};
pub use retrieval::{RetrievalError, Retriever};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
}

/// Matches for one query, best first.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResponse {
    pub matches: Vec<ScoredMatch>,
}

pub struct SearchService {
    taxonomy: Arc<IntentTaxonomy>,
    retriever: Retriever,
    archive: Arc<SearchArchive>,
}

impl SearchService {
    pub fn new(
        taxonomy: Arc<IntentTaxonomy>,
        retriever: Retriever,
        archive: Arc<SearchArchive>,
    ) -> Self {
        Self {
            taxonomy,
            retriever,
            archive,
        }
    }

    pub fn archive(&self) -> &SearchArchive {
        &self.archive
    }

    /// Run one search request.
    pub fn search(&self, raw_query: &str) -> Result<SearchResponse, SearchError> {
        if self.retriever.is_too_short(raw_query) {
            log::debug!("query {raw_query:?} too short, skipping search");
            return Ok(SearchResponse::default());
        }

        let expanded = self.taxonomy.expand(raw_query);
        log::debug!("expanded {raw_query:?} to {expanded:?}");

        let matches = self.retriever.retrieve(&expanded)?;
        if matches.is_empty() {
            log::debug!(
                "no matches above {} for {raw_query:?}",
                self.retriever.threshold()
            );
            return Ok(SearchResponse::default());
        }

        let titles: Vec<&str> = matches
            .iter()
            .map(|m| m.metadata.product.title.as_str())
            .collect();
        let outcome = self.archive.record(raw_query, &titles)?;
        log::debug!("archived {raw_query:?}: {outcome:?}");

        Ok(SearchResponse { matches })
    }
}
