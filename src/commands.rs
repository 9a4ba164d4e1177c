use anyhow::{Context, Result};
use console::style;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{Config, SearchConfig};
use crate::corpus::{
    CharacterRecord, KILLED_VICTIMS_FIELD, POST_APOCALYPSE_FIELD, PRE_APOCALYPSE_FIELD,
    TRIVIA_FIELD, load_corpus_dir,
};
use crate::embeddings::OllamaClient;
use crate::generation::OllamaChatClient;
use crate::generation::answer::{NO_OVERVIEW, UNKNOWN_NAME, snippet};
use crate::index::{LanceIndex, VectorIndex};
use crate::indexer::Indexer;
use crate::pipeline::{AnswerOutcome, QueryOptions, SearchPipeline};
use crate::search::{SearchResult, TraitFilterMode};

const NO_INFORMATION: &str = "No information available.";
const NO_TRIVIA: &str = "No trivia available.";

/// Overrides for one `search` invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchArgs {
    pub top_k: Option<usize>,
    pub trait_filter: Option<String>,
    pub no_answer: bool,
    pub over_fetch: bool,
}

/// Embed every character in `corpus_dir` and upsert it into the index
#[inline]
pub async fn index_corpus(config_dir: &Path, corpus_dir: &Path, recreate: bool) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    let records = load_corpus_dir(corpus_dir)
        .with_context(|| format!("Failed to load corpus from {}", corpus_dir.display()))?;
    println!(
        "Loaded {} characters from {}",
        style(records.len()).cyan(),
        corpus_dir.display()
    );

    let encoder = OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?;
    encoder
        .health_check()
        .context("Embedding model is not available")?;

    let dimension = config.ollama.embedding_dimension as usize;
    let index = if recreate {
        LanceIndex::recreate_at(&config.vector_database_path(), &config.index.name, dimension)
            .await?
    } else {
        LanceIndex::open_or_create(&config).await?
    };

    let stats = Indexer::from_config(Arc::new(encoder), Arc::new(index), &config)
        .with_progress(true)
        .index_records(records)
        .await?;

    info!("Indexing finished: {:?}", stats);
    println!("{}", style("Indexing completed").green().bold());
    println!("  Records seen: {}", stats.records_seen);
    println!("  Upserted: {}", stats.upserted);
    println!("  Without biography: {}", stats.without_biography);
    println!("  Duplicate ids: {}", stats.duplicate_ids);
    Ok(())
}

/// Answer `query` and print the answer followed by the matching characters
#[inline]
pub async fn search(config_dir: &Path, query: &str, args: SearchArgs) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;
    let options = query_options(&config.search, args)?;
    let pipeline = SearchPipeline::connect(&config).await?;

    let outcome = pipeline.query(query, &options).await.map_err(|e| {
        error!("{}", e);
        e
    })?;

    if let AnswerOutcome::Unavailable { reason } = &outcome.answer {
        warn!("Answer unavailable: {}", reason);
        eprintln!(
            "{} {}",
            style("⚠️  Could not generate an answer, showing raw results:").yellow(),
            reason
        );
    }

    print!("{}", render_answer(&outcome.answer));
    print!(
        "{}",
        render_results(&outcome.results, config.search.snippet_chars)
    );
    Ok(())
}

/// Apply command-line overrides to the configured query defaults. An
/// explicit `--top-k` goes through the same validation as the config file.
#[inline]
pub fn query_options(search: &SearchConfig, args: SearchArgs) -> Result<QueryOptions> {
    let mut search = search.clone();
    if let Some(top_k) = args.top_k {
        search.set_top_k(top_k).context("Invalid --top-k")?;
    }

    let mut options = QueryOptions::from_config(&search);
    options.trait_filter = args.trait_filter;
    options.generate_answer = !args.no_answer;
    if args.over_fetch {
        options.filter_mode = Some(TraitFilterMode::OverFetch);
    }
    Ok(options)
}

/// Text block for a generated answer and its numbered sources
#[inline]
pub fn render_answer(answer: &AnswerOutcome) -> String {
    let AnswerOutcome::Generated(bundle) = answer else {
        return String::new();
    };

    let mut out = String::new();
    let _ = writeln!(out, "{}", style("Answer").bold().cyan());
    let _ = writeln!(out, "{}", bundle.answer);

    if !bundle.sources.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", style("Sources").bold().cyan());
        for source in &bundle.sources {
            let _ = writeln!(
                out,
                "  [{}] {} ({:.2}): {}",
                source.index, source.name, source.score, source.snippet
            );
        }
    }
    let _ = writeln!(out);
    out
}

fn detail<'a>(record: &'a CharacterRecord, field: &str, fallback: &'a str) -> &'a str {
    let value = record.field(field).trim();
    if value.is_empty() { fallback } else { value }
}

/// Text block listing each result with its score, overview and details
#[inline]
pub fn render_results(results: &[SearchResult], snippet_chars: usize) -> String {
    let mut out = String::new();

    if results.is_empty() {
        let _ = writeln!(out, "{}", style("No matching characters found.").yellow());
        return out;
    }

    let _ = writeln!(
        out,
        "{}",
        style(format!("Results ({})", results.len())).bold().cyan()
    );

    for (position, result) in results.iter().enumerate() {
        let record = &result.record;
        let name = if record.name().is_empty() {
            UNKNOWN_NAME
        } else {
            record.name()
        };
        let overview = record.overview().trim();

        let _ = writeln!(out);
        let _ = writeln!(out, "{}. {}", position + 1, style(name).bold());
        let _ = writeln!(out, "   Similarity Score: {:.2}", result.score);
        let _ = writeln!(
            out,
            "   {}",
            if overview.is_empty() {
                NO_OVERVIEW.to_string()
            } else {
                snippet(overview, snippet_chars)
            }
        );

        for (label, field, fallback) in [
            ("Pre-Apocalypse", PRE_APOCALYPSE_FIELD, NO_INFORMATION),
            ("Post-Apocalypse", POST_APOCALYPSE_FIELD, NO_INFORMATION),
            ("Killed Victims", KILLED_VICTIMS_FIELD, NO_INFORMATION),
            ("Trivia", TRIVIA_FIELD, NO_TRIVIA),
        ] {
            let _ = writeln!(
                out,
                "   {}: {}",
                style(label).dim(),
                detail(record, field, fallback)
            );
        }
    }

    out
}

/// Show index, model and configuration health
#[inline]
pub async fn show_status(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    println!("📊 TWD Search Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => match client.health_check() {
            Ok(()) => println!(
                "   ✅ Embedding model: {} ({} dimensions)",
                client.model(),
                config.ollama.embedding_dimension
            ),
            Err(e) => println!("   ❌ Embedding model unavailable - {:#}", e),
        },
        Err(e) => println!("   ❌ Ollama: Invalid configuration - {:#}", e),
    }
    match OllamaChatClient::new(&config.ollama) {
        Ok(client) => match client.health_check() {
            Ok(()) => println!("   ✅ Generation model: {}", config.ollama.generation_model),
            Err(e) => println!("   ⚠️  Generation model unavailable - {:#}", e),
        },
        Err(e) => println!("   ❌ Ollama: Invalid configuration - {:#}", e),
    }
    println!();

    println!("🔍 Vector Index Status:");
    match LanceIndex::open(&config).await {
        Ok(index) => {
            println!("   ✅ Index: {}", index.name());
            println!("   🔢 Dimension: {}", index.dimension());
            match index.count().await {
                Ok(count) => println!("   📚 Characters: {}", count),
                Err(e) => println!("   ⚠️  Could not count entries - {}", e),
            }
        }
        Err(e) => println!("   ❌ {}", e),
    }
    println!("   📁 Location: {}", config.vector_database_path().display());

    Ok(())
}
