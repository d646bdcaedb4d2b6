//! Create and seed the sample analytical database

use anyhow::{Context, Result};
use clap::Parser;
use datainsight::db::{init_pool, seed_example_data};
use datainsight::logging::init_tracing;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "init-db")]
#[command(about = "Recreate the sample users/products/orders database")]
struct Args {
    /// Database file to (re)create
    #[arg(short, long, default_value = "data/example.db")]
    path: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args = Args::parse();

    if args.path.exists() {
        std::fs::remove_file(&args.path)
            .with_context(|| format!("Failed to remove {}", args.path.display()))?;
        info!("Removed old {}", args.path.display());
    }
    if let Some(parent) = args.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let url = format!("sqlite://{}", args.path.display());
    let pool = init_pool(&url).await?;
    let today = chrono::Local::now().date_naive();
    let summary = seed_example_data(&pool, today, &mut rand::thread_rng()).await?;
    pool.close().await;

    info!(
        "Database ready at {}: {} users, {} products, {} orders",
        args.path.display(),
        summary.users,
        summary.products,
        summary.orders
    );
    Ok(())
}
