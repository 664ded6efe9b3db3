use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tronledger::config::Config;
use tronledger::parser::EventParser;
use tronledger::runner::Runner;
use tronledger::source::TronGridSource;
use tronledger::store::{init_db, SqliteStore};

#[derive(Parser)]
#[command(name = "tronledger")]
#[command(about = "Materializes on-chain trade events into positions and history")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process all currently available history, print a summary, and exit.
    Once,
    /// Poll for new events until interrupted.
    Tail {
        /// Seconds between polls.
        #[arg(long, default_value = "5")]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let store = Arc::new(SqliteStore::new(pool));
    let source = Arc::new(TronGridSource::new(
        config.events_base_url.clone(),
        config.contract.to_base58(),
        config.api_key.clone(),
        config.page_limit,
    ));
    let runner = Runner::new(source, store, EventParser::new(&config));

    let result = match cli.command {
        Command::Once => runner.backfill().await.map(|summary| {
            println!(
                "once: processed {} events ({} new, {} duplicate, {} skipped) across {} page(s)",
                summary.events,
                summary.applied,
                summary.duplicates,
                summary.skipped,
                summary.pages
            );
        }),
        Command::Tail { interval_secs } => {
            runner.tail(Duration::from_secs(interval_secs)).await
        }
    };

    if let Err(e) = result {
        eprintln!("Fatal: {}", e);
        std::process::exit(1);
    }
}
