//! Domain-term knowledge base for correcting noisy speech-recognition output.
//!
//! The crate is organized around four pieces:
//!
//! - [`extractor`]: pattern-based extraction of candidate domain terms from
//!   raw text, driven by a categorized pattern library.
//! - [`knowledge`]: the term index (embeddings + exact inner-product search),
//!   hybrid semantic/lexical matching, and on-disk persistence.
//! - [`correction`]: token-level rewriting of transcription output against
//!   the knowledge base.
//! - [`config`]: serde-backed configuration for all of the above.

pub mod config;
pub mod correction;
pub mod extractor;
pub mod knowledge;

pub use config::Config;
pub use correction::CorrectionPipeline;
pub use extractor::TermExtractor;
pub use knowledge::{Match, Term, TermIndex, TermService};
