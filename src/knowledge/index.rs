//! Immutable term/vector index with exact inner-product search.
//!
//! The index owns an ordered term list and a parallel list of L2-normalized
//! embedding vectors; row *i* of the vectors always belongs to term *i*.
//! Search is exact brute force over all rows (recall 1.0) — term sets are
//! glossary-sized, so an approximate structure would buy nothing.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::knowledge::embeddings::{EmbeddingError, EmbeddingProvider};

/// Category assigned to terms that matched no categorized pattern.
pub const UNCATEGORIZED: &str = "uncategorized";

/// A domain-vocabulary entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    /// Normalized term text. Non-empty, at least 2 characters.
    pub text: String,
    /// Category from the pattern library, or [`UNCATEGORIZED`].
    #[serde(default = "default_category")]
    pub category: String,
    /// Free-form per-term metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn default_category() -> String {
    UNCATEGORIZED.to_string()
}

impl Term {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category: default_category(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_category(text: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category: category.into(),
            metadata: BTreeMap::new(),
        }
    }
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    /// Matched term text.
    pub term: String,
    /// Similarity score in [0.0, 1.0].
    pub score: f32,
}

/// Errors from index construction and queries.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("cannot index or search a zero-norm vector")]
    ZeroNormVector,

    #[error("invalid term {0:?}: term text must be at least 2 characters")]
    InvalidTerm(String),

    #[error("terms and vectors are misaligned: {terms} terms, {vectors} vectors")]
    Misaligned { terms: usize, vectors: usize },
}

/// The term/vector index. Immutable once built; rebuilds produce a new value
/// that callers publish atomically (see `TermService`).
pub struct TermIndex {
    terms: Vec<Term>,
    vectors: Vec<Vec<f32>>,
    dimensions: usize,
}

impl TermIndex {
    /// Build an index from an ordered term sequence.
    ///
    /// Term texts are deduplicated case-insensitively, first occurrence wins.
    /// Every remaining term is encoded in one provider batch; any provider
    /// failure aborts the whole build, leaving no partial index. Vectors are
    /// L2-normalized so inner-product search equals cosine similarity.
    pub fn build(
        provider: &dyn EmbeddingProvider,
        terms: Vec<Term>,
    ) -> Result<Self, IndexError> {
        let mut seen: HashSet<String> = HashSet::with_capacity(terms.len());
        let mut unique: Vec<Term> = Vec::with_capacity(terms.len());

        for term in terms {
            if term.text.trim().chars().count() < 2 {
                return Err(IndexError::InvalidTerm(term.text));
            }
            if seen.insert(term.text.to_lowercase()) {
                unique.push(term);
            } else {
                log::debug!("dropping duplicate term {:?}", term.text);
            }
        }

        let texts: Vec<String> = unique.iter().map(|t| t.text.clone()).collect();
        let raw = provider.encode(&texts)?;
        if raw.len() != unique.len() {
            return Err(IndexError::Misaligned {
                terms: unique.len(),
                vectors: raw.len(),
            });
        }

        let dimensions = provider.dimensions();
        let mut vectors = Vec::with_capacity(raw.len());
        for vector in raw {
            if vector.len() != dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: dimensions,
                    got: vector.len(),
                });
            }
            vectors.push(normalized(vector)?);
        }

        log::info!("built index over {} terms ({dimensions} dims)", unique.len());
        Ok(Self {
            terms: unique,
            vectors,
            dimensions,
        })
    }

    /// Reassemble an index from already-aligned parts (storage load path).
    /// Re-checks the alignment and dimension invariants defensively.
    pub fn from_parts(
        terms: Vec<Term>,
        vectors: Vec<Vec<f32>>,
        dimensions: usize,
    ) -> Result<Self, IndexError> {
        if terms.len() != vectors.len() {
            return Err(IndexError::Misaligned {
                terms: terms.len(),
                vectors: vectors.len(),
            });
        }
        for vector in &vectors {
            if vector.len() != dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: dimensions,
                    got: vector.len(),
                });
            }
        }
        Ok(Self {
            terms,
            vectors,
            dimensions,
        })
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Ordered term list; row *i* of [`Self::vectors`] belongs to term *i*.
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    /// Per-term metadata lookup by exact term text.
    pub fn term_info(&self, text: &str) -> Option<&BTreeMap<String, serde_json::Value>> {
        self.terms
            .iter()
            .find(|t| t.text == text)
            .map(|t| &t.metadata)
    }

    /// Semantic query: encode `text`, normalize, return the `k` nearest terms
    /// by inner product, scores clamped to [0.0, 1.0].
    ///
    /// An empty index yields an empty result, not an error.
    pub fn query(
        &self,
        provider: &dyn EmbeddingProvider,
        text: &str,
        k: usize,
    ) -> Result<Vec<Match>, IndexError> {
        if self.is_empty() {
            log::debug!("query against empty index: {text:?}");
            return Ok(vec![]);
        }

        let mut encoded = provider.encode(&[text.to_string()])?;
        let raw = encoded
            .pop()
            .ok_or_else(|| EmbeddingError::EncodeFailed("no embedding returned".to_string()))?;
        let query_vector = normalized(raw)?;

        self.search(&query_vector, k)
    }

    /// Search with an already-normalized query vector.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Match>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let mut results: Vec<Match> = self
            .terms
            .iter()
            .zip(self.vectors.iter())
            .map(|(term, vector)| {
                let dot: f32 = query.iter().zip(vector.iter()).map(|(a, b)| a * b).sum();
                Match {
                    term: term.text.clone(),
                    score: dot.clamp(0.0, 1.0),
                }
            })
            .collect();

        results.sort_by(rank_order);
        results.truncate(k);
        Ok(results)
    }
}

/// Deterministic result ordering: descending score, ties broken by shorter
/// term (in characters), then lexicographic term text.
pub(crate) fn rank_order(a: &Match, b: &Match) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.term.chars().count().cmp(&b.term.chars().count()))
        .then_with(|| a.term.cmp(&b.term))
}

/// L2-normalize a vector. Zero-norm vectors cannot take part in cosine
/// search and abort the enclosing build/query.
pub(crate) fn normalized(mut vector: Vec<f32>) -> Result<Vec<f32>, IndexError> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return Err(IndexError::ZeroNormVector);
    }
    for value in &mut vector {
        *value /= norm;
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::testing::StubProvider;

    fn terms(texts: &[&str]) -> Vec<Term> {
        texts.iter().map(|t| Term::new(*t)).collect()
    }

    #[test]
    fn test_build_alignment_invariant() {
        let provider = StubProvider::new(3)
            .insert("RC造", vec![1.0, 0.0, 0.0])
            .insert("基礎工事", vec![0.0, 1.0, 0.0]);

        let index = TermIndex::build(&provider, terms(&["RC造", "基礎工事"])).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.terms().len(), index.vectors().len());
        assert_eq!(index.dimensions(), 3);
    }

    #[test]
    fn test_build_normalizes_vectors() {
        let provider = StubProvider::new(2).insert("RC造", vec![3.0, 4.0]);
        let index = TermIndex::build(&provider, terms(&["RC造"])).unwrap();

        let norm: f32 = index.vectors()[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_build_dedups_case_insensitive_first_wins() {
        let provider = StubProvider::with_fallback(2, vec![1.0, 0.0]);
        let index =
            TermIndex::build(&provider, terms(&["RC造", "rc造", "基礎工事"])).unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(index.terms()[0].text, "RC造");
        assert_eq!(index.terms()[1].text, "基礎工事");
    }

    #[test]
    fn test_build_rejects_short_term() {
        let provider = StubProvider::with_fallback(2, vec![1.0, 0.0]);
        let result = TermIndex::build(&provider, terms(&["a"]));
        assert!(matches!(result, Err(IndexError::InvalidTerm(_))));
    }

    #[test]
    fn test_build_aborts_on_provider_failure() {
        // No fallback and no vector for the second term: the whole build
        // must fail, no partial index value exists.
        let provider = StubProvider::new(2).insert("RC造", vec![1.0, 0.0]);
        let result = TermIndex::build(&provider, terms(&["RC造", "基礎工事"]));
        assert!(matches!(result, Err(IndexError::Embedding(_))));
    }

    #[test]
    fn test_build_rejects_wrong_dimension() {
        let provider = StubProvider::new(3).insert("RC造", vec![1.0, 0.0]);
        let result = TermIndex::build(&provider, terms(&["RC造"]));
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_build_rejects_zero_norm() {
        let provider = StubProvider::new(2).insert("RC造", vec![0.0, 0.0]);
        let result = TermIndex::build(&provider, terms(&["RC造"]));
        assert!(matches!(result, Err(IndexError::ZeroNormVector)));
    }

    #[test]
    fn test_query_empty_index_returns_empty() {
        let provider = StubProvider::with_fallback(2, vec![1.0, 0.0]);
        let index = TermIndex::build(&provider, vec![]).unwrap();

        let results = index.query(&provider, "RC", 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_query_ranking_and_clamp() {
        let provider = StubProvider::new(2)
            .insert("RC造", vec![1.0, 0.0])
            .insert("基礎工事", vec![0.0, 1.0])
            .insert("品質管理", vec![-1.0, 0.0])
            .insert("query", vec![1.0, 0.1]);

        let index =
            TermIndex::build(&provider, terms(&["RC造", "基礎工事", "品質管理"])).unwrap();
        let results = index.query(&provider, "query", 3).unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].term, "RC造");
        // Opposite-direction vector clamps to 0 rather than going negative.
        let worst = results.iter().find(|m| m.term == "品質管理").unwrap();
        assert_eq!(worst.score, 0.0);
        for m in &results {
            assert!((0.0..=1.0).contains(&m.score));
        }
    }

    #[test]
    fn test_query_truncates_to_k() {
        let provider = StubProvider::with_fallback(2, vec![1.0, 0.0]);
        let index = TermIndex::build(
            &provider,
            terms(&["RC造", "基礎工事", "品質管理", "施工管理"]),
        )
        .unwrap();

        let results = index.query(&provider, "なにか", 2).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_build_determinism() {
        let provider = StubProvider::new(2)
            .insert("RC造", vec![0.9, 0.1])
            .insert("基礎工事", vec![0.5, 0.5])
            .insert("query", vec![1.0, 0.0]);

        let a = TermIndex::build(&provider, terms(&["RC造", "基礎工事"])).unwrap();
        let b = TermIndex::build(&provider, terms(&["RC造", "基礎工事"])).unwrap();

        let ra = a.query(&provider, "query", 2).unwrap();
        let rb = b.query(&provider, "query", 2).unwrap();
        assert_eq!(ra, rb);
    }

    #[test]
    fn test_tie_break_shorter_then_lexical() {
        // All terms share one vector, so all scores tie exactly.
        let provider = StubProvider::with_fallback(2, vec![1.0, 0.0]);
        let index = TermIndex::build(
            &provider,
            terms(&["配筋工事", "杭工事", "土工事", "躯体工事"]),
        )
        .unwrap();

        let results = index.query(&provider, "工事の話", 4).unwrap();
        let names: Vec<&str> = results.iter().map(|m| m.term.as_str()).collect();
        // 3-char terms first in lexicographic order, then 4-char terms.
        assert_eq!(names, vec!["土工事", "杭工事", "躯体工事", "配筋工事"]);
    }

    #[test]
    fn test_from_parts_rejects_misalignment() {
        let result = TermIndex::from_parts(terms(&["RC造"]), vec![], 2);
        assert!(matches!(result, Err(IndexError::Misaligned { .. })));

        let result = TermIndex::from_parts(terms(&["RC造"]), vec![vec![1.0, 0.0, 0.0]], 2);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_term_info() {
        let mut term = Term::with_category("RC造", "構造");
        term.metadata
            .insert("source".to_string(), serde_json::json!("構造仕様書.pdf"));

        let provider = StubProvider::with_fallback(2, vec![1.0, 0.0]);
        let index = TermIndex::build(&provider, vec![term]).unwrap();

        let info = index.term_info("RC造").unwrap();
        assert_eq!(info.get("source"), Some(&serde_json::json!("構造仕様書.pdf")));
        assert!(index.term_info("PC造").is_none());
    }
}
