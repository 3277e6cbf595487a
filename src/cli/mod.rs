//! CLI: subcommands over the pipeline, plus the long-running serve mode
//! that hosts the API façade and the scheduler together.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::analyst::Analyst;
use crate::api::{self, AppState};
use crate::config::Config;
use crate::data::QuoteStore;
use crate::enrich::{EmbeddingEnricher, OutcomeAnalyzer, SentimentEnricher};
use crate::kb::KnowledgeBase;
use crate::news::{
    rss::default_feeds, CentralBankRssFetcher, EarningsCalendarFetcher, IngestPipeline,
    LlmNewsFetcher, NewsAggregatorFetcher, NewsFetcher, SentimentFeedFetcher,
};
use crate::providers::{
    build_llm_router, select_embedder, ChartQuoteClient, HttpRsiClient, QuoteProvider,
    RsiProvider,
};
use crate::scheduler::{Job, JobSchedule, Scheduler};
use crate::session::premarket_context;
use crate::trading::{Executor, PortfolioStore, RiskLimits};

#[derive(Parser)]
#[command(
    name = "tradewinds",
    about = "Automated paper-trading assistant",
    version = "0.1.0"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Replay clock for backtests (YYYY-MM-DD, analysis as of 09:30 ET)
    #[arg(long, global = true)]
    pub as_of: Option<NaiveDate>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API and the job scheduler until interrupted
    Serve {
        /// API port
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Analyze a ticker and print the decision
    Analyze {
        #[arg(short, long)]
        ticker: String,

        /// Include LLM guidance (requires use_llm in config)
        #[arg(long)]
        use_llm: bool,
    },

    /// Run one decision-and-execution cycle over tickers
    Execute {
        /// Tickers to process (defaults to trading_cycle_tickers)
        #[arg(short, long, num_args = 0..)]
        tickers: Vec<String>,
    },

    /// Fetch daily bars and refresh indicators
    FetchQuotes {
        /// Tickers (defaults to all configured groups)
        #[arg(short, long, num_args = 0..)]
        tickers: Vec<String>,

        /// History depth in days
        #[arg(short, long, default_value = "60")]
        days: i64,
    },

    /// Run the news ingestion pipeline once
    FetchNews,

    /// Score unsentimented knowledge-base rows with the LLM
    EnrichSentiment {
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Backfill missing embeddings
    BackfillEmbeddings {
        #[arg(short, long, default_value = "200")]
        limit: i64,
    },

    /// Compute outcomes for ripe events
    AnalyzeOutcomes {
        /// Outcome horizon in days
        #[arg(short, long, default_value = "7")]
        days_after: i64,

        #[arg(short, long, default_value = "100")]
        limit: i64,
    },

    /// Show the pre-market gap context for a ticker
    Premarket {
        #[arg(short, long)]
        ticker: String,
    },

    /// Display open positions and cash
    Positions,

    /// Display recent trades
    Trades {
        #[arg(short, long, default_value = "20")]
        limit: i64,

        #[arg(long)]
        ticker: Option<String>,
    },
}

/// Wire every component once and share it between the CLI, the API, and
/// the scheduler.
pub fn build_state(config: Config, pool: PgPool) -> AppState {
    let config = Arc::new(config);
    let quotes = Arc::new(QuoteStore::new(pool.clone()));
    let embedder = select_embedder(&config);
    let kb = Arc::new(KnowledgeBase::new(pool.clone(), embedder));
    let portfolio = Arc::new(PortfolioStore::new(pool.clone()));
    let limits = RiskLimits::load(&config.trading.risk_limits_path);
    let executor = Arc::new(Executor::new(
        pool.clone(),
        Arc::clone(&quotes),
        Arc::clone(&portfolio),
        limits,
        &config,
    ));

    let quote_provider: Arc<dyn QuoteProvider> = Arc::new(ChartQuoteClient::new());
    let llm = if config.enrichment.use_llm {
        match build_llm_router(&config) {
            Ok(router) => Some(Arc::new(router)),
            Err(e) => {
                warn!("LLM router unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let analyst = Arc::new(Analyst::new(
        pool,
        Arc::clone(&quotes),
        Arc::clone(&kb),
        Arc::clone(&quote_provider),
        llm,
    ));

    AppState {
        config,
        quotes,
        kb,
        portfolio,
        executor,
        analyst,
    }
}

fn quote_provider() -> Arc<dyn QuoteProvider> {
    Arc::new(ChartQuoteClient::new())
}

fn rsi_provider(config: &Config) -> Option<Arc<dyn RsiProvider>> {
    config
        .provider_keys
        .alphavantage_api_key
        .as_ref()
        .map(|key| Arc::new(HttpRsiClient::new(key.clone())) as Arc<dyn RsiProvider>)
}

fn all_tickers(config: &Config) -> Vec<String> {
    let mut tickers = Vec::new();
    for group in [
        &config.quotes.tickers_fast,
        &config.quotes.tickers_medium,
        &config.quotes.tickers_long,
        &config.quotes.trading_cycle_tickers,
    ] {
        for ticker in group {
            if !tickers.contains(ticker) {
                tickers.push(ticker.clone());
            }
        }
    }
    tickers
}

fn build_fetchers(state: &AppState) -> Vec<Arc<dyn NewsFetcher>> {
    let config = &state.config;
    let mut fetchers: Vec<Arc<dyn NewsFetcher>> =
        vec![Arc::new(CentralBankRssFetcher::new(default_feeds()))];

    let tickers = if config.quotes.trading_cycle_tickers.is_empty() {
        all_tickers(config)
    } else {
        config.quotes.trading_cycle_tickers.clone()
    };

    if let Some(key) = &config.provider_keys.newsapi_api_key {
        fetchers.push(Arc::new(NewsAggregatorFetcher::new(
            key.clone(),
            tickers.clone(),
            Vec::new(),
        )));
    }

    if let Some(key) = &config.provider_keys.alphavantage_api_key {
        fetchers.push(Arc::new(EarningsCalendarFetcher::new(
            key.clone(),
            tickers.clone(),
        )));
        fetchers.push(Arc::new(SentimentFeedFetcher::new(
            key.clone(),
            tickers.clone(),
        )));
    }

    if config.enrichment.use_llm {
        if let Ok(router) = build_llm_router(config) {
            fetchers.push(Arc::new(LlmNewsFetcher::new(
                router.primary,
                Arc::clone(&state.kb),
                tickers,
                config.enrichment.llm_news_cooldown_hours,
            )));
        }
    }

    fetchers
}

async fn fetch_news_once(state: &AppState) -> Result<()> {
    let pipeline = IngestPipeline::new(Arc::clone(&state.kb), build_fetchers(state));
    let summary = pipeline.run().await?;
    for (source, count) in &summary.counts {
        info!("{}: {} entries", source, count);
    }
    for error in &summary.errors {
        warn!("ingest error: {}", error);
    }
    Ok(())
}

async fn fetch_quotes_once(state: &AppState, tickers: &[String], days: i64) -> Result<()> {
    let provider = quote_provider();
    let rsi = rsi_provider(&state.config);
    let inserted = state
        .quotes
        .refresh_from_provider(
            provider.as_ref(),
            rsi.as_deref(),
            tickers,
            days,
            state.config.effective_now(),
        )
        .await?;
    info!("Quote refresh done: {} new bars", inserted);
    Ok(())
}

/// Build the default job set and run the scheduler plus the API server.
async fn serve(state: AppState, port: u16) -> Result<()> {
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut scheduler = Scheduler::new();

    {
        let state = state.clone();
        scheduler.add_job(Job::new(
            "update_prices",
            vec![
                JobSchedule::DailyAt { hour: 22, minute: 0 },
                JobSchedule::MarketHoursEvery { hours: 2 },
            ],
            move || {
                let state = state.clone();
                async move {
                    let tickers = all_tickers(&state.config);
                    if let Err(e) = fetch_quotes_once(&state, &tickers, 60).await {
                        warn!("update_prices failed: {}", e);
                    }
                }
            },
        ));
    }

    {
        let state = state.clone();
        scheduler.add_job(Job::new(
            "fetch_news",
            vec![JobSchedule::HourlyAt { minute: 0 }],
            move || {
                let state = state.clone();
                async move {
                    if let Err(e) = fetch_news_once(&state).await {
                        warn!("fetch_news failed: {}", e);
                    }
                }
            },
        ));
    }

    {
        let state = state.clone();
        scheduler.add_job(Job::new(
            "backfill_embeddings",
            vec![JobSchedule::HourlyAt { minute: 10 }],
            move || {
                let state = state.clone();
                async move {
                    let embedder = select_embedder(&state.config);
                    let enricher = EmbeddingEnricher::new(Arc::clone(&state.kb), embedder);
                    if let Err(e) = enricher.backfill_embeddings(200, 16).await {
                        warn!("backfill_embeddings failed: {}", e);
                    }
                }
            },
        ));
    }

    if state.config.enrichment.use_llm && state.config.enrichment.sentiment_auto_calculate {
        let state = state.clone();
        scheduler.add_job(Job::new(
            "sentiment_enrich",
            vec![JobSchedule::HourlyAt { minute: 20 }],
            move || {
                let state = state.clone();
                async move {
                    let Ok(router) = build_llm_router(&state.config) else {
                        warn!("sentiment_enrich skipped: LLM unavailable");
                        return;
                    };
                    let enricher =
                        SentimentEnricher::new(Arc::clone(&state.kb), router.primary);
                    if let Err(e) = enricher.enrich_pending(14, 50).await {
                        warn!("sentiment_enrich failed: {}", e);
                    }
                }
            },
        ));
    }

    {
        let state = state.clone();
        scheduler.add_job(Job::new(
            "outcome_analyze",
            vec![JobSchedule::DailyAt { hour: 4, minute: 0 }],
            move || {
                let state = state.clone();
                async move {
                    let analyzer =
                        OutcomeAnalyzer::new(Arc::clone(&state.kb), Arc::clone(&state.quotes));
                    if let Err(e) = analyzer
                        .analyze_ripe_events(7, 100, state.config.effective_now())
                        .await
                    {
                        warn!("outcome_analyze failed: {}", e);
                    }
                }
            },
        ));
    }

    {
        let state = state.clone();
        scheduler.add_job(Job::new(
            "trading_cycle",
            vec![JobSchedule::WeekdaysAt {
                times: vec![(9, 0), (13, 0), (17, 0)],
            }],
            move || {
                let state = state.clone();
                async move {
                    let tickers = state.config.quotes.trading_cycle_tickers.clone();
                    if tickers.is_empty() {
                        return;
                    }
                    match state
                        .run_trading_cycle(&tickers, state.config.enrichment.use_llm)
                        .await
                    {
                        Ok(trades) => info!("trading_cycle produced {} trades", trades.len()),
                        Err(e) => warn!("trading_cycle failed: {}", e),
                    }
                }
            },
        ));
    }

    {
        // Fast-cycle tickers get a 5-minute cadence with a per-ticker
        // cooldown so one signal does not retrigger all day.
        let state = state.clone();
        let cooldown_minutes = state.config.scheduler.game_5m_cooldown_minutes;
        let last_signal: Arc<Mutex<HashMap<String, chrono::DateTime<chrono::Utc>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        scheduler.add_job(Job::new(
            "intraday_signal",
            vec![JobSchedule::WeekdaysEvery { minutes: 5 }],
            move || {
                let state = state.clone();
                let last_signal = Arc::clone(&last_signal);
                async move {
                    let now = state.config.effective_now();
                    let mut due = Vec::new();
                    {
                        let mut guard = last_signal.lock().await;
                        for ticker in &state.config.quotes.tickers_fast {
                            let cooled = guard
                                .get(ticker)
                                .map(|t| (now - *t).num_minutes() >= cooldown_minutes)
                                .unwrap_or(true);
                            if cooled {
                                guard.insert(ticker.clone(), now);
                                due.push(ticker.clone());
                            }
                        }
                    }
                    if due.is_empty() {
                        return;
                    }
                    match state.run_trading_cycle(&due, false).await {
                        Ok(trades) => {
                            if !trades.is_empty() {
                                info!("intraday_signal produced {} trades", trades.len());
                            }
                        }
                        Err(e) => warn!("intraday_signal failed: {}", e),
                    }
                }
            },
        ));
    }

    if state.config.scheduler.premarket_alert {
        let state = state.clone();
        scheduler.add_job(Job::new(
            "premarket_cron",
            vec![JobSchedule::WeekdaysAt {
                times: vec![(16, 30)],
            }],
            move || {
                let state = state.clone();
                async move {
                    let provider = quote_provider();
                    let now = state.config.effective_now();
                    for ticker in &state.config.quotes.tickers_fast {
                        match premarket_context(provider.as_ref(), ticker, now).await {
                            Ok(context) => info!(
                                ticker = %ticker,
                                gap_pct = %format!("{:+.2}", context.premarket_gap_pct),
                                "Pre-market gap"
                            ),
                            Err(e) => warn!("premarket context failed for {}: {}", ticker, e),
                        }
                    }
                }
            },
        ));
    }

    let scheduler_shutdown = shutdown_tx.subscribe();
    let scheduler_handle = tokio::spawn(scheduler.run(scheduler_shutdown));

    let api_handle = tokio::spawn(api::serve(state, port));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
    let _ = scheduler_handle.await;
    api_handle.abort();

    Ok(())
}

/// Execute the selected command against the wired state.
pub async fn run(cli: Cli, state: AppState) -> Result<()> {
    match cli.command {
        Commands::Serve { port } => serve(state, port).await?,

        Commands::Analyze { ticker, use_llm } => {
            let use_llm = use_llm && state.config.enrichment.use_llm;
            let analysis = state
                .analyst
                .analyze(&ticker, use_llm, state.config.effective_now())
                .await?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }

        Commands::Execute { tickers } => {
            let tickers = if tickers.is_empty() {
                state.config.quotes.trading_cycle_tickers.clone()
            } else {
                tickers
            };
            let trades = state
                .run_trading_cycle(&tickers, state.config.enrichment.use_llm)
                .await?;
            println!("{}", serde_json::to_string_pretty(&trades)?);
        }

        Commands::FetchQuotes { tickers, days } => {
            let tickers = if tickers.is_empty() {
                all_tickers(&state.config)
            } else {
                tickers
            };
            fetch_quotes_once(&state, &tickers, days).await?;
        }

        Commands::FetchNews => fetch_news_once(&state).await?,

        Commands::EnrichSentiment { limit } => {
            crate::enrich::sentiment::require_llm_enabled(state.config.enrichment.use_llm)?;
            let router = build_llm_router(&state.config)?;
            let enricher = SentimentEnricher::new(Arc::clone(&state.kb), router.primary);
            let report = enricher.enrich_pending(14, limit).await?;
            info!("Scored {}, skipped {}", report.scored, report.skipped);
        }

        Commands::BackfillEmbeddings { limit } => {
            let embedder = select_embedder(&state.config);
            let enricher = EmbeddingEnricher::new(Arc::clone(&state.kb), embedder);
            let report = enricher.backfill_embeddings(limit, 16).await?;
            info!("Embedded {}, failed {}", report.embedded, report.failed);
        }

        Commands::AnalyzeOutcomes { days_after, limit } => {
            let analyzer = OutcomeAnalyzer::new(Arc::clone(&state.kb), Arc::clone(&state.quotes));
            let report = analyzer
                .analyze_ripe_events(days_after, limit, state.config.effective_now())
                .await?;
            info!("Analyzed {}, skipped {}", report.analyzed, report.skipped);
        }

        Commands::Premarket { ticker } => {
            let provider = quote_provider();
            let context =
                premarket_context(provider.as_ref(), &ticker, state.config.effective_now())
                    .await?;
            println!("{}", serde_json::to_string_pretty(&context)?);
        }

        Commands::Positions => {
            let valuation = state
                .portfolio
                .valuation(&state.quotes, state.config.effective_now())
                .await?;
            println!("{}", serde_json::to_string_pretty(&valuation)?);
        }

        Commands::Trades { limit, ticker } => {
            let trades = state.executor.trades(ticker.as_deref(), limit).await?;
            println!("{}", serde_json::to_string_pretty(&trades)?);
        }
    }
    Ok(())
}
