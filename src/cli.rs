use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to the configuration file. Created with defaults if missing.
    #[clap(short, long, default_value = "termbase.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Extract candidate domain terms from a text file
    Extract {
        /// Input text file
        input: PathBuf,

        /// Write the categorized terms as JSON to this file instead of stdout
        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Build and persist the term index
    Build {
        /// JSON terms file: either a flat list of strings or a
        /// category -> terms mapping (as produced by `extract`)
        terms: PathBuf,

        /// Index directory
        #[clap(short, long, default_value = "index")]
        index: PathBuf,
    },

    /// Query the term index
    Search {
        /// Search query
        query: String,

        /// Index directory
        #[clap(short, long, default_value = "index")]
        index: PathBuf,

        /// Number of results
        #[clap(short, long)]
        k: Option<usize>,

        /// Pure semantic search, without lexical fusion
        #[clap(long, default_value = "false")]
        semantic: bool,
    },

    /// Correct transcription text against the term index
    Correct {
        /// Text to correct (tokens separated by whitespace)
        text: String,

        /// Index directory
        #[clap(short, long, default_value = "index")]
        index: PathBuf,

        /// Acceptance threshold override, in (0.0, 1.0]
        #[clap(short, long)]
        threshold: Option<f32>,
    },
}
