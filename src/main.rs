use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use twd_search::commands::{SearchArgs, index_corpus, search, show_status};
use twd_search::config::{resolve_config_dir, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "twd-search")]
#[command(about = "Semantic search and cited answers over The Walking Dead character bios")]
#[command(version)]
struct Cli {
    /// Configuration directory (defaults to ~/.twd-search)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection, index and search settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Embed a directory of character JSON files into the vector index
    Index {
        /// Directory containing the character *.json files
        corpus_dir: PathBuf,
        /// Drop the existing index before loading
        #[arg(long)]
        recreate: bool,
    },
    /// Search characters and generate a cited answer
    Search {
        /// Free-text question, e.g. "Who is Rick Grimes?"
        query: String,
        /// Number of results to return
        #[arg(long)]
        top_k: Option<usize>,
        /// Only keep characters whose overview mentions this trait
        #[arg(long = "trait")]
        trait_filter: Option<String>,
        /// Skip answer generation and show results only
        #[arg(long)]
        no_answer: bool,
        /// Fetch extra candidates before applying the trait filter
        #[arg(long)]
        over_fetch: bool,
    },
    /// Show index and model status
    Status,
}

async fn run(cli: Cli) -> Result<()> {
    let config_dir = resolve_config_dir(cli.config_dir)?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Index {
            corpus_dir,
            recreate,
        } => {
            index_corpus(&config_dir, &corpus_dir, recreate).await?;
        }
        Commands::Search {
            query,
            top_k,
            trait_filter,
            no_answer,
            over_fetch,
        } => {
            let args = SearchArgs {
                top_k,
                trait_filter,
                no_answer,
                over_fetch,
            };
            search(&config_dir, &query, args).await?;
        }
        Commands::Status => {
            show_status(&config_dir).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{}", style(format!("{e:#}")).red());
        std::process::exit(1);
    }
}
