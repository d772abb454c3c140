//! Deterministic test doubles for the embedding and index seams.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::semantic::{
    Embedder, EmbeddingError, IndexEntry, IndexError, LocalIndex, ScoredMatch, SimilarityIndex,
};

pub const DIMENSIONS: usize = 64;

/// Bag-of-words embedder: every lowercase alphanumeric token adds 1.0 to a
/// hashed bucket. Same text gives the same vector, shared words give
/// positive similarity, disjoint words give (almost always) zero.
#[derive(Default)]
pub struct HashingEmbedder {
    calls: AtomicUsize,
    texts: Mutex<Vec<String>>,
    fail_on: Option<String>,
}

fn bucket(token: &str) -> usize {
    // FNV-1a
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    1 + (hash % (DIMENSIONS as u64 - 1)) as usize
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every text containing `marker`.
    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_on: Some(marker.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; DIMENSIONS];
        let lowered = text.to_lowercase();
        let mut any = false;
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            vector[bucket(token)] += 1.0;
            any = true;
        }
        if !any {
            vector[0] = 1.0;
        }
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().unwrap().push(text.to_string());

        if let Some(marker) = &self.fail_on {
            if text.contains(marker.as_str()) {
                return Err(EmbeddingError::EmbeddingFailed(format!(
                    "refused text containing {marker}"
                )));
            }
        }

        Ok(Self::vector(text))
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    fn model_id(&self) -> [u8; 32] {
        [7u8; 32]
    }
}

/// In-memory index that records upsert batch sizes and can be told to fail
/// its first `failures` upserts (`usize::MAX` for always).
pub struct RecordingIndex {
    inner: LocalIndex,
    failures: usize,
    upsert_calls: AtomicUsize,
    query_calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
}

impl RecordingIndex {
    pub fn new() -> Self {
        Self::failing(0)
    }

    pub fn failing(failures: usize) -> Self {
        Self {
            inner: LocalIndex::in_memory(DIMENSIONS),
            failures,
            upsert_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            batch_sizes: Mutex::new(vec![]),
        }
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// Sizes of the upserts that succeeded, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl SimilarityIndex for RecordingIndex {
    fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        let call = self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(IndexError::Unavailable("index offline".to_string()));
        }

        let size = entries.len();
        self.inner.upsert(entries)?;
        self.batch_sizes.lock().unwrap().push(size);
        Ok(())
    }

    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredMatch>, IndexError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.query(vector, top_k)
    }
}

/// Index whose queries return a fixed candidate list, ignoring the vector.
pub struct FixedIndex {
    pub candidates: Vec<ScoredMatch>,
}

impl SimilarityIndex for FixedIndex {
    fn upsert(&self, _entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        Ok(())
    }

    fn query(&self, _vector: &[f32], top_k: usize) -> Result<Vec<ScoredMatch>, IndexError> {
        Ok(self.candidates.iter().take(top_k).cloned().collect())
    }
}

/// Header and rows of a small AWIN-layout feed.
pub const AWIN_HEADER: &str = "merchant_id,merchant_name,merchant_category,aw_product_id,product_name,description,search_price,currency,aw_deep_link,large_image";

pub fn awin_feed(rows: &[&str]) -> String {
    let mut feed = String::from(AWIN_HEADER);
    for row in rows {
        feed.push('\n');
        feed.push_str(row);
    }
    feed.push('\n');
    feed
}
