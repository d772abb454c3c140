//! Similarity index seam and the in-memory cosine implementation.
//!
//! `VectorIndex` stores product embeddings with their metadata snapshot.
//! `LocalIndex` wraps it behind a lock and persists to `vectors.bin` after
//! every upsert, so it can serve as the `SimilarityIndex` for both pipelines.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;

use crate::catalog::ProductMetadata;
use crate::semantic::storage::{VectorStorage, VectorStorageError};

/// One vector to upsert, keyed by product id.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: ProductMetadata,
}

/// A nearest-neighbour candidate returned by the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMatch {
    pub id: String,
    /// Cosine similarity score
    pub score: f32,
    pub metadata: ProductMetadata,
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,

    #[error("Index storage error: {0}")]
    Storage(#[from] VectorStorageError),

    #[error("Index unavailable: {0}")]
    Unavailable(String),
}

/// The vector store both pipelines talk to.
pub trait SimilarityIndex: Send + Sync {
    /// Insert or replace entries by id. Idempotent per id.
    fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError>;

    /// Up to `top_k` nearest entries, highest score first, with metadata.
    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredMatch>, IndexError>;
}

/// An entry in the vector index.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub embedding: Vec<f32>,
    pub metadata: ProductMetadata,
}

/// In-memory vector index keyed by product id.
pub struct VectorIndex {
    entries: HashMap<String, VectorEntry>,
    dimensions: usize,
}

impl VectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            entries: HashMap::new(),
            dimensions,
        }
    }

    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            dimensions,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&VectorEntry> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VectorEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn check_vector(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }

        if Self::l2_norm(vector) < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        Ok(())
    }

    /// Insert or replace a single entry.
    pub fn insert(
        &mut self,
        id: String,
        embedding: Vec<f32>,
        metadata: ProductMetadata,
    ) -> Result<(), IndexError> {
        self.check_vector(&embedding)?;
        self.entries.insert(id, VectorEntry { embedding, metadata });
        Ok(())
    }

    /// Insert a batch. Every vector is checked first; a bad one leaves the index untouched.
    pub fn insert_batch(&mut self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        for entry in &entries {
            self.check_vector(&entry.vector)?;
        }

        self.entries.reserve(entries.len());
        for entry in entries {
            self.entries.insert(
                entry.id,
                VectorEntry {
                    embedding: entry.vector,
                    metadata: entry.metadata,
                },
            );
        }
        Ok(())
    }

    /// Nearest entries by cosine similarity, highest first, ties by id.
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredMatch>, IndexError> {
        self.check_vector(query)?;
        let query_norm = Self::l2_norm(query);

        let mut scored: Vec<(&String, f32)> = self
            .entries
            .iter()
            .map(|(id, entry)| (id, Self::cosine_similarity(query, &entry.embedding, query_norm)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(id, score)| ScoredMatch {
                id: id.clone(),
                score,
                metadata: self.entries[id].metadata.clone(),
            })
            .collect())
    }

    fn l2_norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Assumes query_norm is precomputed.
    fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
        let target_norm = Self::l2_norm(target);
        if target_norm < f32::EPSILON {
            return 0.0;
        }

        let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
        dot_product / (query_norm * target_norm)
    }
}

/// Lock-guarded `VectorIndex`, optionally persisted after each upsert.
pub struct LocalIndex {
    index: RwLock<VectorIndex>,
    storage: Option<VectorStorage>,
    model_id: [u8; 32],
}

impl LocalIndex {
    /// Non-persistent index.
    pub fn in_memory(dimensions: usize) -> Self {
        Self {
            index: RwLock::new(VectorIndex::new(dimensions)),
            storage: None,
            model_id: [0u8; 32],
        }
    }

    /// Load the index from storage, or start empty if the file is missing or
    /// was written by a different model.
    pub fn open(
        storage: VectorStorage,
        model_id: [u8; 32],
        dimensions: usize,
    ) -> Result<Self, IndexError> {
        let index = if storage.exists() {
            match storage.load(&model_id, dimensions) {
                Ok(idx) => {
                    log::info!("Loaded {} vectors from storage", idx.len());
                    idx
                }
                Err(VectorStorageError::ModelMismatch) => {
                    log::warn!("Model changed, creating fresh index");
                    VectorIndex::new(dimensions)
                }
                Err(VectorStorageError::VersionMismatch(file_ver, _)) => {
                    log::warn!("Storage version {file_ver} unsupported, creating fresh index");
                    VectorIndex::new(dimensions)
                }
                Err(e) => {
                    log::error!("Failed to load vectors: {e}");
                    return Err(e.into());
                }
            }
        } else {
            log::info!("No existing index, starting fresh");
            VectorIndex::new(dimensions)
        };

        Ok(Self {
            index: RwLock::new(index),
            storage: Some(storage),
            model_id,
        })
    }

    pub fn len(&self) -> usize {
        self.index.read().map(|idx| idx.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SimilarityIndex for LocalIndex {
    fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        let mut index = self
            .index
            .write()
            .map_err(|e| IndexError::Unavailable(format!("Lock poisoned: {e}")))?;

        index.insert_batch(entries)?;

        if let Some(storage) = &self.storage {
            storage.save(&index, &self.model_id)?;
        }
        Ok(())
    }

    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredMatch>, IndexError> {
        let index = self
            .index
            .read()
            .map_err(|e| IndexError::Unavailable(format!("Lock poisoned: {e}")))?;

        index.search(vector, top_k)
    }
}
