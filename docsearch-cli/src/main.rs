use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use docsearch_rag::index::IndexMeta;
use docsearch_rag::openai::OpenAIEmbeddingProvider;
use docsearch_rag::persist::META_FILE;
use docsearch_rag::{DocumentSearchTool, IndexStore, RagConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docsearch")]
#[command(about = "Build and search a vector index over a single technical document")]
#[command(version)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index if absent, otherwise load it, and report its size
    Index,
    /// Print evidence blocks for a query
    Search {
        query: String,
        /// Number of passages to return; defaults to the configured top_k
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Print the metadata of the persisted index
    Inspect,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<RagConfig> {
    let config = match path {
        Some(path) => RagConfig::from_toml_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => RagConfig::default(),
    };
    Ok(config.apply_env()?)
}

fn open_store(config: RagConfig) -> anyhow::Result<Arc<IndexStore>> {
    let embedder = OpenAIEmbeddingProvider::from_config(&config)?;
    Ok(Arc::new(IndexStore::from_config(config, Arc::new(embedder))?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Index => {
            let store = open_store(config)?;
            let index = store.build_or_load().await?;
            println!(
                "{} chunks, {} dimensions, model {} at {}",
                index.len(),
                index.meta().dimensions,
                index.meta().embedding_model,
                store.location().display()
            );
        }
        Commands::Search { query, top_k } => {
            let tool = DocumentSearchTool::from_store(open_store(config)?);
            let top_k = top_k.unwrap_or(tool.top_k());
            info!(top_k, "searching");
            println!("{}", tool.run_with_top_k(&query, top_k).await?);
        }
        Commands::Inspect => {
            let path = config.index_location.join(META_FILE);
            if !path.is_file() {
                bail!("no index at {}", config.index_location.display());
            }
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let meta: IndexMeta = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }
    }

    Ok(())
}
