//! Swappable knowledge-base handle.
//!
//! Owns the embedding provider and the current index generation. Builds and
//! loads produce a whole new immutable [`TermIndex`] which is published
//! atomically; concurrent readers keep working against the previous snapshot
//! until the swap. Build, save and load are mutually exclusive through a
//! single writer lock; queries never take it.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use crate::knowledge::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::knowledge::hybrid;
use crate::knowledge::index::{IndexError, Match, Term, TermIndex};
use crate::knowledge::storage::{IndexStorage, StorageError};

/// Errors from knowledge-base operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("No index has been built or loaded")]
    NotBuilt,

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub struct TermService {
    provider: Box<dyn EmbeddingProvider>,
    /// Current index generation. `None` until the first successful build or
    /// load; queries then signal "no match available" instead of failing.
    index: RwLock<Option<Arc<TermIndex>>>,
    /// Serializes build/save/load against each other.
    writer: Mutex<()>,
}

impl TermService {
    pub fn new(provider: Box<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            index: RwLock::new(None),
            writer: Mutex::new(()),
        }
    }

    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    pub fn is_built(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Number of indexed terms; 0 when nothing is built.
    pub fn term_count(&self) -> usize {
        self.snapshot().map(|idx| idx.len()).unwrap_or(0)
    }

    /// Current index generation, if any.
    pub fn snapshot(&self) -> Option<Arc<TermIndex>> {
        self.index.read().ok().and_then(|guard| guard.clone())
    }

    /// Build a new index generation from `terms` and swap it in.
    ///
    /// Encoding happens outside the index lock; a failed build leaves the
    /// previous generation untouched. Returns the indexed term count.
    pub fn build(&self, terms: Vec<Term>) -> Result<usize, ServiceError> {
        let _writer = self
            .writer
            .lock()
            .map_err(|e| ServiceError::Internal(format!("Lock poisoned: {}", e)))?;

        let index = TermIndex::build(self.provider.as_ref(), terms)?;
        let count = index.len();
        self.install(index)?;
        Ok(count)
    }

    /// Persist the current index generation.
    pub fn save(&self, dir: &Path) -> Result<(), ServiceError> {
        let _writer = self
            .writer
            .lock()
            .map_err(|e| ServiceError::Internal(format!("Lock poisoned: {}", e)))?;

        let index = self.snapshot().ok_or(ServiceError::NotBuilt)?;
        let storage = IndexStorage::new(dir.to_path_buf());
        storage.save(&index, &self.provider.model_id_hash())?;
        Ok(())
    }

    /// Load a persisted index and swap it in. A failed load (corrupt or
    /// incompatible artifacts) installs nothing.
    pub fn load(&self, dir: &Path) -> Result<usize, ServiceError> {
        let _writer = self
            .writer
            .lock()
            .map_err(|e| ServiceError::Internal(format!("Lock poisoned: {}", e)))?;

        let storage = IndexStorage::new(dir.to_path_buf());
        let index = storage.load(
            &self.provider.model_id_hash(),
            self.provider.dimensions(),
        )?;
        let count = index.len();
        self.install(index)?;
        Ok(count)
    }

    /// Pure semantic query. An absent index is an empty result, not an error.
    pub fn query(&self, text: &str, k: usize) -> Result<Vec<Match>, ServiceError> {
        match self.snapshot() {
            Some(index) => Ok(index.query(self.provider.as_ref(), text, k)?),
            None => {
                log::warn!("semantic query before any index build; returning no matches");
                Ok(vec![])
            }
        }
    }

    /// Hybrid semantic + lexical search. An absent index is an empty result.
    pub fn fuzzy_search(&self, text: &str, k: usize) -> Result<Vec<Match>, ServiceError> {
        match self.snapshot() {
            Some(index) => Ok(hybrid::fuzzy_search(
                &index,
                self.provider.as_ref(),
                text,
                k,
            )?),
            None => {
                log::warn!("fuzzy search before any index build; returning no matches");
                Ok(vec![])
            }
        }
    }

    /// Per-term metadata for an indexed term.
    pub fn term_info(&self, term: &str) -> Option<BTreeMap<String, serde_json::Value>> {
        self.snapshot()
            .and_then(|idx| idx.term_info(term).cloned())
    }

    fn install(&self, index: TermIndex) -> Result<(), ServiceError> {
        let mut guard = self
            .index
            .write()
            .map_err(|e| ServiceError::Internal(format!("Lock poisoned: {}", e)))?;
        *guard = Some(Arc::new(index));
        Ok(())
    }
}
