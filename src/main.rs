use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tradewinds::cli::{self, Cli};
use tradewinds::config::Config;
use tradewinds::data::DataError;
use tradewinds::db::Database;

// Exit codes: 0 success, 1 usage error, 2 transient external failure,
// 3 fatal configuration error.
const EXIT_USAGE: i32 = 1;
const EXIT_TRANSIENT: i32 = 2;
const EXIT_CONFIG: i32 = 3;

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return EXIT_USAGE;
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .json();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "tradewinds starting up");

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return EXIT_CONFIG;
        }
    };

    // Replay clock: freeze "now" at 09:30 ET on the requested date.
    if let Some(date) = cli.as_of {
        match date.and_hms_opt(14, 30, 0) {
            Some(dt) => config.backtest_now = Some(dt.and_utc()),
            None => return EXIT_USAGE,
        }
        info!("Backtest mode: effective now = {:?}", config.backtest_now);
    }

    let db = match Database::new(&config.database.url, config.database.max_connections).await {
        Ok(db) => db,
        Err(e) => {
            error!("Database connection failed: {:#}", e);
            return EXIT_CONFIG;
        }
    };
    if let Err(e) = db.run_migrations().await {
        error!("Migration failure: {:#}", e);
        return EXIT_CONFIG;
    }
    if let Err(e) = db.health_check().await {
        error!("Database health check failed: {:#}", e);
        return EXIT_CONFIG;
    }
    let _ = db.check_pgvector().await;

    let initial_cash = config.trading.initial_cash_usd;
    let state = cli::build_state(config, db.pool.clone());
    if let Err(e) = state.portfolio.ensure_initialized(initial_cash).await {
        error!("Portfolio initialization failed: {:#}", e);
        return EXIT_CONFIG;
    }

    match cli::run(cli, state).await {
        Ok(()) => {
            info!("tradewinds completed successfully");
            0
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            exit_code_for(&e)
        }
    }
}

/// Classify a command failure into the documented exit codes.
fn exit_code_for(error: &anyhow::Error) -> i32 {
    for cause in error.chain() {
        if let Some(data_error) = cause.downcast_ref::<DataError>() {
            if data_error.is_retryable() {
                return EXIT_TRANSIENT;
            }
            if matches!(data_error, DataError::Config(_)) {
                return EXIT_CONFIG;
            }
        }
    }
    EXIT_USAGE
}
