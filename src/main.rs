mod db;
mod error;
mod fetch;
mod parser;
mod pipeline;
mod reconcile;
mod settings;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use tracing::warn;

use fetch::HttpFetcher;
use pipeline::Pipeline;
use settings::{Overrides, Settings};

#[derive(Parser)]
#[command(name = "vinyl_scraper", about = "Record shop listing scraper with price history")]
struct Cli {
    /// SQLite database path (overrides SCRAPER_DB_PATH)
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the listing page and store products, listings and prices
    Run {
        /// Listing page URL (overrides SCRAPER_TARGET_URL)
        #[arg(short, long)]
        url: Option<String>,
    },
    /// Fetch and extract only, print records without touching the database
    Preview {
        #[arg(short, long)]
        url: Option<String>,
        /// Print records as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Row counts per table
    Stats,
    /// Price history of one listing, oldest first
    History {
        /// Absolute detail page URL of the listing
        detail_url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let target_url = match &cli.command {
        Commands::Run { url } | Commands::Preview { url, .. } => url.clone(),
        _ => None,
    };
    let settings = Settings::load(Overrides {
        db_path: cli.db.clone(),
        target_url,
    })
    .context("Invalid configuration")?;

    let result = match cli.command {
        Commands::Run { .. } => {
            let conn = open_store(&settings)?;
            let fetcher = HttpFetcher::new(&settings.user_agent, settings.fetch_timeout())
                .context("Failed to build HTTP client")?;
            let pipeline = Pipeline::new(&conn, fetcher, settings.site()?, settings.target_url.clone())
                .with_shutdown(shutdown_flag());

            match pipeline.run().await {
                Ok(summary) => {
                    println!("Done: {}.", summary);
                    Ok(())
                }
                Err(e) => {
                    println!("Run failed: {}", e);
                    println!("Partial: {}.", e.summary());
                    Err(e.into())
                }
            }
        }
        Commands::Preview { json, .. } => {
            let fetcher = HttpFetcher::new(&settings.user_agent, settings.fetch_timeout())
                .context("Failed to build HTTP client")?;
            let site = settings.site()?;
            let records = pipeline::scrape(&fetcher, &settings.target_url, &site.base_url).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(());
            }
            if records.is_empty() {
                println!("No records found.");
                return Ok(());
            }

            println!(
                "{:>8} | {:<24} | {:<28} | {:<6} | {:>10}",
                "ID", "Artist", "Album", "Medium", "Price"
            );
            println!("{}", "-".repeat(88));
            for r in &records {
                let price = r.price.map(|p| format!("{:.2}", p)).unwrap_or_else(|| "-".into());
                println!(
                    "{:>8} | {:<24} | {:<28} | {:<6} | {:>10}",
                    truncate(&r.external_id, 8),
                    truncate(r.artist.as_deref().unwrap_or("-"), 24),
                    truncate(r.album.as_deref().unwrap_or("-"), 28),
                    truncate(r.medium.as_deref().unwrap_or("-"), 6),
                    price
                );
            }
            println!("\n{} records", records.len());
            Ok(())
        }
        Commands::Stats => {
            let conn = open_store(&settings)?;
            let s = db::get_stats(&conn)?;
            println!("Sites:        {}", s.sites);
            println!("Products:     {}", s.products);
            println!("Listings:     {}", s.listings);
            println!("Price events: {}", s.price_events);
            Ok(())
        }
        Commands::History { detail_url } => {
            let conn = open_store(&settings)?;
            let rows = db::fetch_price_history(&conn, &detail_url)?;
            if rows.is_empty() {
                println!("No price history for {}", detail_url);
                return Ok(());
            }

            let first = &rows[0];
            println!(
                "{} - {}",
                first.artist.as_deref().unwrap_or("?"),
                first.album.as_deref().unwrap_or("?")
            );
            for r in &rows {
                let price = r.price.map(|p| format!("{:.2}", p)).unwrap_or_else(|| "-".into());
                println!(
                    "  {}  {:>10}  {}",
                    r.observed_at.format("%Y-%m-%d %H:%M"),
                    price,
                    r.site
                );
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open_store(settings: &Settings) -> anyhow::Result<Connection> {
    let path = Path::new(&settings.db_path);
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let conn = db::connect(path, settings.store_timeout())
        .with_context(|| format!("Failed to open {}", path.display()))?;
    db::init_schema(&conn)?;
    Ok(conn)
}

/// Set on Ctrl-C. The pipeline finishes the record in flight and stops.
fn shutdown_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handle = Arc::clone(&flag);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after current record");
            handle.store(true, Ordering::SeqCst);
        }
    });
    flag
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
