//! Portfolio state: one row per held ticker plus the synthetic CASH row

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;

use crate::data::{DataResult, QuoteStore};

pub const CASH_TICKER: &str = "CASH";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Position {
    pub ticker: String,
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub last_updated: DateTime<Utc>,
}

/// One position marked at the latest close, for the API portfolio view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionView {
    pub ticker: String,
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub last_price: Option<f64>,
    pub unrealized_pnl: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioValuation {
    pub cash: f64,
    pub positions: Vec<PositionView>,
}

pub struct PortfolioStore {
    pool: PgPool,
}

impl PortfolioStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the CASH row on first run.
    pub async fn ensure_initialized(&self, initial_cash: f64) -> DataResult<()> {
        let result = sqlx::query(
            "INSERT INTO portfolio_state (ticker, quantity, avg_entry_price, last_updated) \
             VALUES ($1, $2, 0, NOW()) \
             ON CONFLICT (ticker) DO NOTHING",
        )
        .bind(CASH_TICKER)
        .bind(initial_cash)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!("Portfolio initialized with {:.2} USD", initial_cash);
        }
        Ok(())
    }

    pub async fn cash(&self) -> DataResult<f64> {
        let cash: Option<f64> =
            sqlx::query_scalar("SELECT quantity FROM portfolio_state WHERE ticker = $1")
                .bind(CASH_TICKER)
                .fetch_optional(&self.pool)
                .await?;
        Ok(cash.unwrap_or(0.0))
    }

    pub async fn position(&self, ticker: &str) -> DataResult<Option<Position>> {
        let position: Option<Position> = sqlx::query_as(
            "SELECT ticker, quantity, avg_entry_price, last_updated \
             FROM portfolio_state WHERE ticker = $1 AND ticker <> $2 AND quantity > 0",
        )
        .bind(ticker)
        .bind(CASH_TICKER)
        .fetch_optional(&self.pool)
        .await?;
        Ok(position)
    }

    pub async fn open_positions(&self) -> DataResult<Vec<Position>> {
        let positions: Vec<Position> = sqlx::query_as(
            "SELECT ticker, quantity, avg_entry_price, last_updated \
             FROM portfolio_state WHERE ticker <> $1 AND quantity > 0 \
             ORDER BY ticker",
        )
        .bind(CASH_TICKER)
        .fetch_all(&self.pool)
        .await?;
        Ok(positions)
    }

    /// Total exposure (positions marked at the latest close, entry price as
    /// fallback when no quote exists yet).
    pub async fn exposure_usd(
        &self,
        quotes: &QuoteStore,
        as_of: DateTime<Utc>,
    ) -> DataResult<f64> {
        let mut exposure = 0.0;
        for position in self.open_positions().await? {
            let price = quotes
                .latest_close(&position.ticker, as_of)
                .await?
                .unwrap_or(position.avg_entry_price);
            exposure += position.quantity * price;
        }
        Ok(exposure)
    }

    /// Cash plus every position marked at the latest close.
    pub async fn valuation(
        &self,
        quotes: &QuoteStore,
        as_of: DateTime<Utc>,
    ) -> DataResult<PortfolioValuation> {
        let cash = self.cash().await?;
        let mut views = Vec::new();

        for position in self.open_positions().await? {
            let last_price = quotes.latest_close(&position.ticker, as_of).await?;
            let unrealized_pnl =
                last_price.map(|price| (price - position.avg_entry_price) * position.quantity);
            views.push(PositionView {
                ticker: position.ticker,
                quantity: position.quantity,
                avg_entry_price: position.avg_entry_price,
                last_price,
                unrealized_pnl,
            });
        }

        Ok(PortfolioValuation {
            cash,
            positions: views,
        })
    }
}
