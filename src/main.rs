use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use sieve_config::SieveConfig;
use sieve_index::{
    ChatCompletionsClient, ChatProvider, HttpEmbeddings, HybridSearcher, IndexingSession,
    NamespaceManager, QdrantStore, SearchMode, VectorStore,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Incremental hybrid code search over a local project directory.
#[derive(Parser)]
#[command(name = "sieve", version, about)]
struct Cli {
    /// Configuration file (TOML). `./sieve.toml` is read when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a directory and print the final status.
    Index {
        dir: PathBuf,

        /// Drop the namespace and the change cache before indexing.
        #[arg(long)]
        rebuild: bool,
    },

    /// Search a directory, indexing it first if needed.
    Search {
        dir: PathBuf,
        query: String,

        /// Number of results; 0 uses the configured default.
        #[arg(long, short = 'n', default_value_t = 0)]
        max_results: usize,

        #[arg(long, value_enum, default_value_t = ModeArg::Hybrid)]
        mode: ModeArg,

        /// Wait for the bulk phase as well before searching.
        #[arg(long)]
        complete: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Vector,
    Lexical,
    Hybrid,
}

impl From<ModeArg> for SearchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Vector => SearchMode::VectorOnly,
            ModeArg::Lexical => SearchMode::LexicalOnly,
            ModeArg::Hybrid => SearchMode::Hybrid,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sieve_index=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(Cli::parse()))
}

async fn run(cli: Cli) -> Result<()> {
    let config = SieveConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Index { dir, rebuild } => {
            let session = open_session(&config, &dir)?;
            let handle = if rebuild {
                session.restart().await?
            } else {
                session.start()
            };
            handle.await?;
            println!("{}", serde_json::to_string_pretty(&session.status())?);
        }
        Commands::Search {
            dir,
            query,
            max_results,
            mode,
            complete,
        } => {
            let session = open_session(&config, &dir)?;
            let mut handle = session.start();
            if complete {
                handle.await?;
            } else {
                tokio::select! {
                    _ = session.wait_until_search_ready() => {}
                    finished = &mut handle => finished?,
                }
            }

            let chat: Option<Arc<dyn ChatProvider>> =
                if config.search.enhance_queries || config.search.summarize {
                    Some(Arc::new(ChatCompletionsClient::from_config(&config.chat)))
                } else {
                    None
                };
            let searcher = HybridSearcher::new(session, chat, config.search.clone());
            let response = searcher.search(mode.into(), &query, max_results).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }
    Ok(())
}

fn open_session(config: &SieveConfig, dir: &Path) -> Result<Arc<IndexingSession>> {
    let embedder = Arc::new(HttpEmbeddings::from_config(&config.embeddings));
    let store: Arc<dyn VectorStore> = Arc::new(QdrantStore::connect(&config.qdrant, embedder)?);
    let namespaces = NamespaceManager::new(store)
        .with_propagation_delay(Duration::from_millis(config.qdrant.propagation_delay_ms));

    let mut session = IndexingSession::open(dir, config.indexing.clone(), namespaces)?;
    if let Ok(cwd) = std::env::current_dir() {
        session = session.with_working_dir(cwd);
    }
    info!(root = %session.root().display(), namespace = %session.namespace(), "Session opened");
    Ok(Arc::new(session))
}
