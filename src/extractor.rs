//! Pattern-based domain-term extraction.
//!
//! Scans raw text against a categorized library of lexical patterns and
//! returns the cleaned, validated candidates per category. Pure function of
//! (text, compiled pattern tables): unmatched or empty input yields an empty
//! result, never an error.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use crate::config::ExtractorConfig;
use crate::knowledge::Term;

/// Strips leading/trailing characters that are neither word characters nor
/// CJK ideographs (U+4E00..U+9FAF).
static TRIM_EDGES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\w\x{4E00}-\x{9FAF}]+|[^\w\x{4E00}-\x{9FAF}]+$").expect("valid trim regex")
});

#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    #[error("invalid pattern {pattern:?} in category {category:?}: {source}")]
    InvalidPattern {
        category: String,
        pattern: String,
        source: regex::Error,
    },
}

struct CompiledCategory {
    name: String,
    patterns: Vec<Regex>,
}

/// Categorized pattern-library term extractor.
pub struct TermExtractor {
    categories: Vec<CompiledCategory>,
    stop_words: HashSet<String>,
    max_term_chars: usize,
}

impl TermExtractor {
    /// Compile the pattern library. All patterns match case-insensitively.
    pub fn new(config: &ExtractorConfig) -> Result<Self, ExtractorError> {
        let mut categories = Vec::with_capacity(config.categories.len());

        for category in &config.categories {
            let mut patterns = Vec::with_capacity(category.patterns.len());
            for pattern in &category.patterns {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| ExtractorError::InvalidPattern {
                        category: category.name.clone(),
                        pattern: pattern.clone(),
                        source,
                    })?;
                patterns.push(regex);
            }
            categories.push(CompiledCategory {
                name: category.name.clone(),
                patterns,
            });
        }

        Ok(Self {
            categories,
            stop_words: config.stop_words.iter().cloned().collect(),
            max_term_chars: config.max_term_chars,
        })
    }

    /// Extract candidate terms per category.
    ///
    /// A term may legitimately appear under more than one category when
    /// several category patterns match it; duplicates are removed only
    /// within a category. Categories without matches are omitted.
    pub fn extract(&self, text: &str) -> BTreeMap<String, BTreeSet<String>> {
        let mut extracted = BTreeMap::new();

        for category in &self.categories {
            let terms = self.extract_category(category, text);
            if !terms.is_empty() {
                extracted.insert(category.name.clone(), terms);
            }
        }

        extracted
    }

    /// Extract index-ready terms: the categorized candidates flattened in
    /// library order, deduplicated case-insensitively across categories
    /// (first matching category wins).
    pub fn extract_terms(&self, text: &str) -> Vec<Term> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut terms = Vec::new();

        for category in &self.categories {
            for text in self.extract_category(category, text) {
                if seen.insert(text.to_lowercase()) {
                    terms.push(Term::with_category(text, category.name.clone()));
                }
            }
        }

        terms
    }

    fn extract_category(&self, category: &CompiledCategory, text: &str) -> BTreeSet<String> {
        let mut terms = BTreeSet::new();

        for pattern in &category.patterns {
            for found in pattern.find_iter(text) {
                let cleaned = clean_term(found.as_str());
                if self.is_valid(&cleaned) {
                    terms.insert(cleaned);
                }
            }
        }

        terms
    }

    fn is_valid(&self, term: &str) -> bool {
        let chars = term.chars().count();
        if chars < 2 || chars > self.max_term_chars {
            return false;
        }
        if term.chars().all(|c| c.is_numeric()) {
            return false;
        }
        !self.stop_words.contains(term)
    }
}

fn clean_term(raw: &str) -> String {
    TRIM_EDGES.replace_all(raw, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CategoryPatterns;

    fn extractor(config: &ExtractorConfig) -> TermExtractor {
        TermExtractor::new(config).unwrap()
    }

    fn two_category_config() -> ExtractorConfig {
        ExtractorConfig {
            categories: vec![
                CategoryPatterns::new("工事", &[r"[\x{4E00}-\x{9FAF}]{2,}工事", r"基礎工事"]),
                CategoryPatterns::new("管理", &[r"品質管理", r"安全管理", r"施工管理"]),
            ],
            ..ExtractorConfig::default()
        }
    }

    #[test]
    fn test_categorized_extraction() {
        let ex = extractor(&two_category_config());
        let result = ex.extract("基礎工事の品質管理が重要");

        assert_eq!(result.len(), 2);
        assert!(result["工事"].contains("基礎工事"));
        assert!(result["管理"].contains("品質管理"));
    }

    #[test]
    fn test_empty_text_yields_empty_map() {
        let ex = extractor(&ExtractorConfig::default());
        assert!(ex.extract("").is_empty());
        assert!(ex.extract("まったく無関係な話です").is_empty());
    }

    #[test]
    fn test_extraction_is_pure() {
        let ex = extractor(&ExtractorConfig::default());
        let text = "鉄筋コンクリート造の基礎工事において、RC造の品質管理が重要である。";
        assert_eq!(ex.extract(text), ex.extract(text));
    }

    #[test]
    fn test_term_can_appear_in_multiple_categories() {
        let ex = extractor(&ExtractorConfig::default());
        let result = ex.extract("基礎工事の品質管理が重要");

        // 基礎工事 matches both the 構造 pattern 基礎[工事構造]* and the
        // literal 工事 pattern.
        assert!(result["構造"].contains("基礎工事"));
        assert!(result["工事"].contains("基礎工事"));
        assert!(result["管理"].contains("品質管理"));
    }

    #[test]
    fn test_cleaning_strips_edge_punctuation() {
        assert_eq!(clean_term("、基礎工事。"), "基礎工事");
        assert_eq!(clean_term("（RC造）"), "RC造");
        assert_eq!(clean_term("RC造"), "RC造");
    }

    #[test]
    fn test_stop_words_filtered() {
        let config = ExtractorConfig {
            categories: vec![CategoryPatterns::new("工事", &[r"工事", r"基礎工事"])],
            ..ExtractorConfig::default()
        };
        let ex = extractor(&config);
        let result = ex.extract("工事と基礎工事");

        // Bare 工事 is a stop word; the compound survives.
        assert_eq!(result["工事"].len(), 1);
        assert!(result["工事"].contains("基礎工事"));
    }

    #[test]
    fn test_short_and_numeric_candidates_rejected() {
        let config = ExtractorConfig {
            categories: vec![CategoryPatterns::new("その他", &[r"\S+"])],
            ..ExtractorConfig::default()
        };
        let ex = extractor(&config);

        let result = ex.extract("あ 12345 2024");
        assert!(result.is_empty());
    }

    #[test]
    fn test_overlong_candidates_rejected() {
        let config = ExtractorConfig {
            categories: vec![CategoryPatterns::new("工事", &[r"\S+工事"])],
            max_term_chars: 6,
            ..ExtractorConfig::default()
        };
        let ex = extractor(&config);

        let result = ex.extract("とてもとてもとても長い名前の工事 と 杭工事");
        assert_eq!(result["工事"].len(), 1);
        assert!(result["工事"].contains("杭工事"));
    }

    #[test]
    fn test_case_insensitive_patterns() {
        let ex = extractor(&ExtractorConfig::default());
        let result = ex.extract("rc造とRC造");
        assert!(result["構造"].contains("rc造"));
        assert!(result["構造"].contains("RC造"));
    }

    #[test]
    fn test_extract_terms_flattens_and_dedups() {
        let ex = extractor(&ExtractorConfig::default());
        let terms = ex.extract_terms("基礎工事の品質管理が重要");

        // 基礎工事 matched two categories but is indexed once, under the
        // first matching category in library order.
        let texts: Vec<&str> = terms.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(
            texts.iter().filter(|t| **t == "基礎工事").count(),
            1
        );
        let kiso = terms.iter().find(|t| t.text == "基礎工事").unwrap();
        assert_eq!(kiso.category, "構造");
        let hinshitsu = terms.iter().find(|t| t.text == "品質管理").unwrap();
        assert_eq!(hinshitsu.category, "管理");
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let config = ExtractorConfig {
            categories: vec![CategoryPatterns::new("壊れた", &[r"[unclosed"])],
            ..ExtractorConfig::default()
        };
        let result = TermExtractor::new(&config);
        assert!(matches!(result, Err(ExtractorError::InvalidPattern { .. })));
    }
}
