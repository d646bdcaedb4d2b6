//! HTTP server for the DataInsight NL2SQL API

use anyhow::{Context, Result};
use clap::Parser;
use datainsight::config::AppConfig;
use datainsight::logging::init_tracing;
use datainsight::pipeline::Nl2SqlService;
use datainsight::server::ApiServer;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "datainsight-server")]
#[command(about = "Natural-language to SQL API over a read-only analytical store")]
struct Args {
    /// Listen address (or set SERVER_BIND)
    #[arg(long)]
    bind: Option<String>,

    /// SQLite database URL (or set DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Tables retrieved per question (or set RAG_TOP_K)
    #[arg(long)]
    top_k: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(url) = args.database_url {
        config.database_url = url;
    }
    if let Some(top_k) = args.top_k {
        config.top_k = top_k;
    }

    info!("Starting DataInsight API server...");
    if config.llm.api_key.is_some() {
        info!("LLM API key found ({} @ {})", config.llm.model, config.llm.base_url);
    } else {
        warn!("LLM API key not found; /nl2sql and /ask will fail");
    }

    let service = Nl2SqlService::from_config(&config)
        .await
        .with_context(|| format!("Failed to open store at {}", config.database_url))?;

    // Build the schema index up front; a failure here is retried lazily on
    // the first request.
    match service.index().init_schema_index().await {
        Ok(Some(snapshot)) => info!("[RAG] Schema index ready: {} tables", snapshot.len()),
        Ok(None) => warn!("[RAG] Store has no tables; retrieval will be empty"),
        Err(e) => warn!("[RAG] Initial index build failed: {}", e),
    }

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;

    ApiServer::new(Arc::new(service)).serve(listener).await?;
    Ok(())
}
