//! Transcription correction against the term knowledge base.
//!
//! Correction is strictly token-level: each recognized token is looked up
//! independently and replaced by the best fuzzy match when its fused score
//! is strictly greater than the acceptance threshold. Multi-token phrase
//! correction is deliberately out of scope; the trade-off keeps correction
//! to a single index query per token. When no index is available the
//! pipeline is a pass-through — correction is best-effort and never fails
//! the transcription flow.

use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::config::CorrectionConfig;
use crate::knowledge::TermService;

#[derive(Debug, thiserror::Error)]
pub enum CorrectionError {
    #[error("invalid correction pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// A timed transcription segment from the upstream recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
    pub text: String,
}

/// A transcription result as produced by the upstream recognizer.
/// The pipeline only rewrites text; timing and language pass through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub duration: f64,
}

pub struct CorrectionPipeline {
    service: Arc<TermService>,
    /// Literal mis-recognition substitutions, applied before index lookups.
    patterns: Vec<(Regex, String)>,
    acceptance_threshold: f32,
    candidates: usize,
}

impl CorrectionPipeline {
    pub fn new(
        service: Arc<TermService>,
        config: &CorrectionConfig,
    ) -> Result<Self, CorrectionError> {
        let mut patterns = Vec::with_capacity(config.patterns.len());
        for p in &config.patterns {
            let regex = RegexBuilder::new(&p.pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| CorrectionError::InvalidPattern {
                    pattern: p.pattern.clone(),
                    source,
                })?;
            patterns.push((regex, p.replacement.clone()));
        }

        Ok(Self {
            service,
            patterns,
            acceptance_threshold: config.acceptance_threshold,
            candidates: config.candidates,
        })
    }

    pub fn acceptance_threshold(&self) -> f32 {
        self.acceptance_threshold
    }

    /// Correct a token stream. The result has the same length and order as
    /// the input; each token is decided independently.
    pub fn correct_tokens(&self, tokens: &[String]) -> Vec<String> {
        tokens.iter().map(|t| self.correct_token(t)).collect()
    }

    /// Correct free text: apply the literal substitution patterns, then
    /// whitespace-tokenize and correct each token, rejoining with spaces.
    pub fn correct_text(&self, text: &str) -> String {
        let substituted = self.apply_patterns(text);
        let tokens: Vec<String> = substituted
            .split_whitespace()
            .map(|t| t.to_string())
            .collect();
        self.correct_tokens(&tokens).join(" ")
    }

    /// Correct a full transcription result, segment by segment.
    pub fn correct_transcript(&self, transcript: &Transcript) -> Transcript {
        Transcript {
            text: self.correct_text(&transcript.text),
            segments: transcript
                .segments
                .iter()
                .map(|s| Segment {
                    start: s.start,
                    end: s.end,
                    text: self.correct_text(&s.text),
                })
                .collect(),
            language: transcript.language.clone(),
            duration: transcript.duration,
        }
    }

    fn apply_patterns(&self, text: &str) -> String {
        let mut corrected = text.to_string();
        for (regex, replacement) in &self.patterns {
            corrected = regex
                .replace_all(&corrected, replacement.as_str())
                .into_owned();
        }
        corrected
    }

    fn correct_token(&self, token: &str) -> String {
        match self.service.fuzzy_search(token, self.candidates) {
            Ok(matches) => match matches.first() {
                // Strictly greater: a score exactly at the threshold keeps
                // the original token.
                Some(top) if top.score > self.acceptance_threshold => {
                    log::debug!("corrected {token:?} -> {:?} ({:.3})", top.term, top.score);
                    top.term.clone()
                }
                _ => token.to_string(),
            },
            Err(err) => {
                log::warn!("correction lookup failed for {token:?}: {err}");
                token.to_string()
            }
        }
    }
}
