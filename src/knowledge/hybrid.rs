//! Hybrid "fuzzy" search: semantic similarity fused with lexical containment.
//!
//! Pure embedding similarity misses exact abbreviation/substring matches
//! common in domain jargon ("RC" as a literal substring of "RC造"), while
//! pure lexical matching misses semantically equivalent phrasing. Fusion
//! captures both without a second index structure.

use std::collections::HashMap;

use crate::knowledge::embeddings::EmbeddingProvider;
use crate::knowledge::index::{rank_order, IndexError, Match, Term, TermIndex};

/// Discount applied to lexical containment scores before fusion, reflecting
/// lower trust in pure substring matches.
///
/// Note: the discount applies even to terms with no semantic counterpart,
/// so a lexical-only candidate can never score above 0.8. Kept for ranking
/// compatibility with existing indexes.
pub const LEXICAL_DISCOUNT: f32 = 0.8;

/// Combined semantic + lexical search over the index.
///
/// 1. take the `k` nearest semantic candidates (scores already in [0, 1]);
/// 2. scan every known term for lexical containment either way, scoring
///    `min(|query|, |term|) / max(|query|, |term|)` in characters;
/// 3. merge by term with `fused = max(semantic, lexical * LEXICAL_DISCOUNT)`;
/// 4. clamp, sort descending (deterministic tie-break), return top `k`.
pub fn fuzzy_search(
    index: &TermIndex,
    provider: &dyn EmbeddingProvider,
    query: &str,
    k: usize,
) -> Result<Vec<Match>, IndexError> {
    let semantic = index.query(provider, query, k)?;
    let lexical = lexical_candidates(index.terms(), query);
    Ok(fuse(semantic, lexical, k))
}

/// Lexical candidates: a term qualifies when the lowercased query contains
/// the lowercased term or vice versa. The score is a coarse containment
/// ratio over character counts, not an edit distance. Returned undiscounted.
pub(crate) fn lexical_candidates(terms: &[Term], query: &str) -> Vec<Match> {
    let query_lower = query.to_lowercase();
    let query_chars = query.chars().count();

    terms
        .iter()
        .filter_map(|term| {
            let term_lower = term.text.to_lowercase();
            if !term_lower.contains(&query_lower) && !query_lower.contains(&term_lower) {
                return None;
            }
            let term_chars = term.text.chars().count();
            let longer = query_chars.max(term_chars);
            if longer == 0 {
                return None;
            }
            let score = query_chars.min(term_chars) as f32 / longer as f32;
            Some(Match {
                term: term.text.clone(),
                score,
            })
        })
        .collect()
}

/// Merge semantic and lexical candidate sets by term identity.
pub(crate) fn fuse(semantic: Vec<Match>, lexical: Vec<Match>, k: usize) -> Vec<Match> {
    let mut fused: HashMap<String, f32> = HashMap::new();

    for m in semantic {
        let entry = fused.entry(m.term).or_insert(0.0);
        *entry = entry.max(m.score);
    }
    for m in lexical {
        let discounted = m.score * LEXICAL_DISCOUNT;
        let entry = fused.entry(m.term).or_insert(0.0);
        *entry = entry.max(discounted);
    }

    let mut results: Vec<Match> = fused
        .into_iter()
        .map(|(term, score)| Match {
            term,
            score: score.clamp(0.0, 1.0),
        })
        .collect();

    results.sort_by(rank_order);
    results.truncate(k);
    results
}
