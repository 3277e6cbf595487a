//! HTTP API façade
//! Narrow read/command surface over the pipeline for the external UI/bot.
//! Writes return the new authoritative state.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::analyst::Analyst;
use crate::config::Config;
use crate::data::{DataError, QuoteStore};
use crate::kb::{EventType, Importance, KnowledgeBase, NewKbEntry};
use crate::strategy::Signal;
use crate::trading::executor::ExecutionOutcome;
use crate::trading::{Executor, PortfolioStore, TradeRecord};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub quotes: Arc<QuoteStore>,
    pub kb: Arc<KnowledgeBase>,
    pub portfolio: Arc<PortfolioStore>,
    pub executor: Arc<Executor>,
    pub analyst: Arc<Analyst>,
}

impl AppState {
    /// One decision-and-execution pass over the given tickers, followed by
    /// the exit-rule sweep. Returns every journal row produced.
    pub async fn run_trading_cycle(
        &self,
        tickers: &[String],
        use_llm: bool,
    ) -> Result<Vec<TradeRecord>, DataError> {
        let as_of = self.config.effective_now();
        let mut produced = Vec::new();

        for ticker in tickers {
            let analysis = match self.analyst.analyze(ticker, use_llm, as_of).await {
                Ok(analysis) => analysis,
                Err(e) => {
                    error!("Analysis failed for {}: {}", ticker, e);
                    continue;
                }
            };

            let outcome = match analysis.decision {
                Signal::Buy | Signal::StrongBuy => {
                    self.executor
                        .buy(
                            ticker,
                            analysis.decision,
                            None,
                            None,
                            Some(&analysis.regime),
                            Some(analysis.weighted_sentiment),
                            as_of,
                        )
                        .await?
                }
                Signal::Sell => {
                    self.executor
                        .sell(
                            ticker,
                            "SIGNAL",
                            None,
                            Some(analysis.weighted_sentiment),
                            as_of,
                        )
                        .await?
                }
                Signal::Hold => {
                    info!("{}: HOLD, no trade", ticker);
                    continue;
                }
            };

            if let ExecutionOutcome::Executed(record) = outcome {
                produced.push(record);
            }
        }

        produced.extend(self.executor.apply_exit_rules(as_of).await?);
        Ok(produced)
    }
}

/// API error envelope; policy rejections are 200s with their structured
/// reason, everything here is an actual failure.
pub struct ApiError(DataError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DataError::NoData { .. } => StatusCode::NOT_FOUND,
            DataError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DataError::Network(_) | DataError::Timeout { .. } | DataError::RateLimit { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!("API error: {}", self.0);
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<DataError> for ApiError {
    fn from(e: DataError) -> Self {
        Self(e)
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/portfolio", get(get_portfolio))
        .route("/api/quotes/:ticker", get(get_quotes))
        .route("/api/analyze", post(post_analyze))
        .route("/api/execute", post(post_execute))
        .route("/api/news", post(post_news))
        .route("/api/trades", get(get_trades))
        .with_state(state)
        .layer(cors)
}

async fn get_portfolio(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let valuation = state
        .portfolio
        .valuation(&state.quotes, state.config.effective_now())
        .await?;
    Ok(Json(valuation))
}

#[derive(Debug, Deserialize)]
struct QuotesParams {
    days: Option<i64>,
}

async fn get_quotes(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(params): Query<QuotesParams>,
) -> Result<impl IntoResponse, ApiError> {
    let days = params.days.unwrap_or(30).clamp(1, 365);
    let bars = state
        .quotes
        .last_bars(&ticker, days, state.config.effective_now())
        .await?;
    Ok(Json(bars))
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    ticker: String,
    #[serde(default)]
    use_llm: bool,
}

async fn post_analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let use_llm = request.use_llm && state.config.enrichment.use_llm;
    let analysis = state
        .analyst
        .analyze(&request.ticker, use_llm, state.config.effective_now())
        .await?;
    Ok(Json(analysis))
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    tickers: Vec<String>,
}

async fn post_execute(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let trades = state
        .run_trading_cycle(&request.tickers, state.config.enrichment.use_llm)
        .await?;
    Ok(Json(trades))
}

#[derive(Debug, Deserialize)]
struct NewsRequest {
    ticker: String,
    source: String,
    content: String,
    sentiment_score: Option<f64>,
}

#[derive(Debug, Serialize)]
struct NewsResponse {
    id: i64,
}

async fn post_news(
    State(state): State<AppState>,
    Json(request): Json<NewsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = NewKbEntry {
        ts: Utc::now(),
        ticker: request.ticker,
        source: request.source,
        content: request.content,
        event_type: EventType::Manual,
        importance: Importance::Medium,
        region: "USA".to_string(),
        link: None,
        sentiment_score: request.sentiment_score.filter(|s| (0.0..=1.0).contains(s)),
    };
    let id = state.kb.insert(&entry).await?;
    Ok(Json(NewsResponse { id }))
}

#[derive(Debug, Deserialize)]
struct TradesParams {
    limit: Option<i64>,
    ticker: Option<String>,
}

async fn get_trades(
    State(state): State<AppState>,
    Query(params): Query<TradesParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let trades = state
        .executor
        .trades(params.ticker.as_deref(), limit)
        .await?;
    Ok(Json(trades))
}

/// Serve the API until shutdown.
pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("API listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
