//! Management shell for the filing-chunk vector index.
//!
//! Thin wrapper over the core operations: `create` registers the index,
//! `stats` prints live counts, `search` embeds a query and runs a filtered
//! similarity search, `clear` deletes every chunk. Exits 0 on success and
//! non-zero with the error message otherwise.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use riskrag::VectorStoreSettings;
use riskrag::stores::{ChunkStore, SearchFilters, SqliteChunkStore};
use riskrag::types::RagError;

#[derive(Parser)]
#[command(name = "riskragctl", about = "Vector index management for SEC filing chunks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the vector index (idempotent).
    Create,
    /// Show live index statistics.
    Stats,
    /// Search the index for chunks similar to a query.
    Search {
        /// Search query text.
        query: String,
        /// Filter by company ticker.
        #[arg(long, short)]
        company: Option<String>,
        /// Filter by fiscal year.
        #[arg(long)]
        year: Option<i64>,
        /// Filter by form type (e.g. 10-K).
        #[arg(long)]
        form_type: Option<String>,
        /// Number of results to return. Defaults to the configured search
        /// `k` (`RISKRAG_SEARCH_K`).
        #[arg(long, short = 'k')]
        limit: Option<i64>,
    },
    /// Delete all chunks from the index.
    Clear {
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), RagError> {
    let settings = VectorStoreSettings::from_env()?;
    let store = SqliteChunkStore::open(
        &settings.store_path,
        settings.index_name.clone(),
        settings.node_label.clone(),
    )
    .await?;

    match cli.command {
        Command::Create => {
            store
                .ensure_index(&settings.index_name, settings.dimension())
                .await?;
            println!(
                "index '{}' available (dimension {})",
                settings.index_name,
                settings.dimension()
            );
        }
        Command::Stats => {
            let stats = store.stats().await?;
            println!("Vector index statistics");
            println!("  index name:   {}", stats.index_name);
            println!("  index exists: {}", stats.index_exists);
            println!("  total chunks: {}", stats.total_chunks);
            if !stats.companies.is_empty() {
                println!("  chunks by company:");
                for (company, count) in &stats.companies {
                    println!("    {company}: {count}");
                }
            }
        }
        Command::Search {
            query,
            company,
            year,
            form_type,
            limit,
        } => {
            let provider = settings.provider()?;
            let query_vector = provider.embed_one(&query).await?;
            let filters = SearchFilters {
                company,
                year,
                form_type,
            };
            let limit = limit.unwrap_or(settings.search_k as i64);
            let hits = store.search(&query_vector, limit, &filters).await?;
            println!("{} result(s) for '{query}'", hits.len());
            for (position, hit) in hits.iter().enumerate() {
                let preview: String = hit.record.text.chars().take(200).collect();
                println!("\n--- result {} (score {:.3}) ---", position + 1, hit.score);
                println!("chunk_id: {}", hit.record.chunk_id);
                println!(
                    "company:  {}  year: {}  form: {}",
                    hit.record.company, hit.record.year, hit.record.form_type
                );
                if let Some(section) = &hit.record.section_title {
                    println!("section:  {section}");
                }
                println!("text:     {preview}...");
            }
        }
        Command::Clear { yes } => {
            if !yes {
                return Err(RagError::Validation(
                    "clear deletes every chunk; pass --yes to confirm".into(),
                ));
            }
            // Caller obligation: do not run clear concurrently with an
            // indexing job against the same store.
            let deleted = store.clear().await?;
            println!("deleted {deleted} chunk(s)");
        }
    }
    Ok(())
}
