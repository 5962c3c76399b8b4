//! Term knowledge base: embeddings, vector index, hybrid search, persistence.
//!
//! # Architecture
//!
//! - `embeddings`: the `EmbeddingProvider` trait and its fastembed-backed
//!   implementation
//! - `index`: immutable term/vector index with exact inner-product search
//! - `hybrid`: fusion of semantic similarity with lexical containment
//! - `storage`: on-disk index layout (vectors.bin + terms.json + metadata.json)
//! - `service`: swappable index handle coordinating build/save/load/query

pub mod embeddings;
pub mod hybrid;
pub mod index;
pub mod service;
pub mod storage;

pub use embeddings::{EmbeddingError, EmbeddingProvider, FastembedProvider};
pub use hybrid::{fuzzy_search, LEXICAL_DISCOUNT};
pub use index::{IndexError, Match, Term, TermIndex, UNCATEGORIZED};
pub use service::{ServiceError, TermService};
pub use storage::{IndexStorage, StorageError};

/// Default embedding model. Multilingual E5 handles the mixed
/// Japanese/English vocabulary that domain glossaries tend to contain.
pub const DEFAULT_MODEL: &str = "multilingual-e5-small";
