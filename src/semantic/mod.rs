//! Embedding and similarity-index services shared by ingestion and search.
//!
//! # Architecture
//!
//! - `embeddings`: `Embedder` trait and the fastembed-backed model
//! - `index`: `SimilarityIndex` trait and the in-memory cosine index
//! - `storage`: Binary file I/O for vectors.bin persistence

pub mod embeddings;
pub mod index;
pub mod storage;

pub use embeddings::{Embedder, EmbeddingError, EmbeddingModel};
pub use index::{IndexEntry, IndexError, LocalIndex, ScoredMatch, SimilarityIndex, VectorIndex};
pub use storage::{VectorStorage, VectorStorageError};

/// Default embedding model name
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Default similarity threshold for a match to count as relevant
pub const DEFAULT_THRESHOLD: f32 = 0.35;
