//! `crader` command line: index repositories and manage the database.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crader_engine::{EngineConfig, IndexOptions, Indexer, OpenAiProvider};
use crader_storage::Connector;

#[derive(Parser)]
#[command(name = "crader", about = "Semantic code indexing and retrieval", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index a repository into a new snapshot.
    Index {
        /// Remote URL or local path of the repository.
        repo_url: String,
        /// Branch to index; the remote's default branch when omitted.
        #[arg(long)]
        branch: Option<String>,
        /// Database URL; falls back to CRADER_DB_URL.
        #[arg(long)]
        db_url: Option<String>,
        /// Storage root for mirrors and worktrees; falls back to REPO_VOLUME.
        #[arg(long)]
        volume: Option<PathBuf>,
        /// Rebuild even if the snapshot already exists.
        #[arg(long)]
        force: bool,
        /// Prune superseded snapshots of this branch after activation.
        #[arg(long)]
        auto_prune: bool,
        /// Skip the embedding phase.
        #[arg(long)]
        no_embed: bool,
        /// Parse worker pool size; defaults to CPU count minus one.
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Database administration.
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[derive(Subcommand)]
enum DbCommand {
    /// Run schema migrations to head.
    Upgrade {
        #[arg(long)]
        db_url: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    if let Err(e) = run().await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    match Cli::parse().command {
        Command::Index {
            repo_url,
            branch,
            db_url,
            volume,
            force,
            auto_prune,
            no_embed,
            workers,
        } => {
            let mut config = EngineConfig::resolve(db_url, volume)?;
            if let Some(workers) = workers {
                config = config.with_worker_count(workers);
            }

            let mut indexer = Indexer::new(config).await.context("opening engine")?;
            if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
                indexer = indexer.with_provider(Arc::new(OpenAiProvider::new(
                    api_key,
                    "text-embedding-3-small",
                    1536,
                )));
            }

            let outcome = indexer
                .index(
                    &repo_url,
                    &IndexOptions {
                        branch,
                        force,
                        auto_prune,
                        embed: !no_embed,
                    },
                )
                .await?;
            println!("{}", outcome.snapshot_id);
            Ok(())
        }
        Command::Db { command } => match command {
            DbCommand::Upgrade { db_url } => {
                let config = EngineConfig::resolve(db_url, None)?;
                let conn = Connector::pooled(&config.db_url, 1)
                    .await
                    .context("opening database")?;
                conn.migrate().await.context("running migrations")?;
                println!("database schema is up to date");
                Ok(())
            }
        },
    }
}
