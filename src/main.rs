use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;

mod cli;

use termbase::config::Config;
use termbase::correction::CorrectionPipeline;
use termbase::extractor::TermExtractor;
use termbase::knowledge::{FastembedProvider, Term, TermService};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = cli::Args::parse();
    let config = Config::load(&args.config);

    match args.command {
        cli::Command::Extract { input, output } => {
            let text = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let extractor = TermExtractor::new(&config.extractor)?;
            let terms = extractor.extract(&text);

            let json = serde_json::to_string_pretty(&terms)?;
            match output {
                Some(path) => std::fs::write(&path, json)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => println!("{json}"),
            }
        }

        cli::Command::Build { terms, index } => {
            let terms = read_terms(&terms)?;
            if terms.is_empty() {
                bail!("no terms to index");
            }

            let service = open_service(&config)?;
            let count = service.build(terms)?;
            service.save(&index)?;
            println!("indexed {count} terms into {}", index.display());
        }

        cli::Command::Search {
            query,
            index,
            k,
            semantic,
        } => {
            let service = open_service(&config)?;
            service.load(&index)?;

            let k = k.unwrap_or(config.index.fuzzy_k);
            let results = if semantic {
                service.query(&query, k)?
            } else {
                service.fuzzy_search(&query, k)?
            };

            if results.is_empty() {
                println!("no matches");
            }
            for m in results {
                println!("{:.4}\t{}", m.score, m.term);
            }
        }

        cli::Command::Correct {
            text,
            index,
            threshold,
        } => {
            let mut correction = config.correction.clone();
            if let Some(threshold) = threshold {
                if !(0.0..=1.0).contains(&threshold) || threshold == 0.0 {
                    bail!("threshold must be in (0.0, 1.0], got {threshold}");
                }
                correction.acceptance_threshold = threshold;
            }

            let service = open_service(&config)?;
            service.load(&index)?;

            let pipeline = CorrectionPipeline::new(service, &correction)?;
            println!("{}", pipeline.correct_text(&text));
        }
    }

    Ok(())
}

fn open_service(config: &Config) -> anyhow::Result<Arc<TermService>> {
    let provider = FastembedProvider::new(&config.index.model, config.index.cache_dir.clone())?;
    Ok(Arc::new(TermService::new(Box::new(provider))))
}

/// Read a terms file: either a flat JSON list of strings or a
/// category -> terms mapping as produced by `extract`.
fn read_terms(path: &Path) -> anyhow::Result<Vec<Term>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;

    if let Ok(flat) = serde_json::from_str::<Vec<String>>(&data) {
        return Ok(flat.into_iter().map(Term::new).collect());
    }

    let categorized: BTreeMap<String, Vec<String>> = serde_json::from_str(&data)
        .with_context(|| format!("{} is neither a term list nor a category mapping", path.display()))?;

    let mut seen = std::collections::HashSet::new();
    let mut terms = Vec::new();
    for (category, texts) in categorized {
        for text in texts {
            if seen.insert(text.to_lowercase()) {
                terms.push(Term::with_category(text, category.clone()));
            }
        }
    }
    Ok(terms)
}
