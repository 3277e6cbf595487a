//! Quote store: daily bars with derived indicators
//! Bars are insert-only and unique per (ticker, date); indicators are
//! recomputed from the stored closes after every ingest.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};

use super::indicators::{rsi_wilder, sma, volatility, RSI_PERIOD, SMA_WINDOW};
use super::{DataError, DataResult};
use crate::providers::{ProviderBar, QuoteProvider, RsiProvider};

/// One stored bar with its derived indicators.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QuoteBar {
    pub ticker: String,
    pub date: NaiveDate,
    pub close: f64,
    pub volume: i64,
    pub sma_5: Option<f64>,
    pub volatility_5: Option<f64>,
    pub rsi: Option<f64>,
}

const BAR_COLUMNS: &str = "ticker, date, close, volume, sma_5, volatility_5, rsi";

pub struct QuoteStore {
    pool: PgPool,
}

impl QuoteStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert bars missing by (ticker, date). Existing bars are left
    /// untouched, so re-ingestion is a no-op. Returns the inserted count.
    pub async fn upsert_bars(&self, ticker: &str, bars: &[ProviderBar]) -> DataResult<usize> {
        let mut inserted = 0;
        for bar in bars {
            let result = sqlx::query(
                "INSERT INTO quotes (date, ticker, close, volume) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (date, ticker) DO NOTHING",
            )
            .bind(bar.date)
            .bind(ticker)
            .bind(bar.close)
            .bind(bar.volume)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }

        if inserted > 0 {
            info!("Inserted {} new bars for {}", inserted, ticker);
        }
        Ok(inserted)
    }

    /// Recompute sma_5, volatility_5 and rsi for a ticker, starting at
    /// `from_date` (or the whole history when None).
    pub async fn recompute_indicators(
        &self,
        ticker: &str,
        from_date: Option<NaiveDate>,
    ) -> DataResult<usize> {
        let rows: Vec<(NaiveDate, f64)> = sqlx::query_as(
            "SELECT date, close FROM quotes WHERE ticker = $1 ORDER BY date ASC",
        )
        .bind(ticker)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(0);
        }

        let closes: Vec<f64> = rows.iter().map(|(_, c)| *c).collect();
        let mut updated = 0;

        for (i, (date, _)) in rows.iter().enumerate() {
            if let Some(from) = from_date {
                if *date < from {
                    continue;
                }
            }

            let window = &closes[..=i];
            let sma_5 = sma(window, SMA_WINDOW);
            let volatility_5 = volatility(window, SMA_WINDOW);
            let rsi = rsi_wilder(window, RSI_PERIOD);

            sqlx::query(
                "UPDATE quotes SET sma_5 = $1, volatility_5 = $2, rsi = $3 \
                 WHERE ticker = $4 AND date = $5",
            )
            .bind(sma_5)
            .bind(volatility_5)
            .bind(rsi)
            .bind(ticker)
            .bind(date)
            .execute(&self.pool)
            .await?;
            updated += 1;
        }

        Ok(updated)
    }

    /// Overwrite the latest bar's RSI with an externally provided value.
    pub async fn apply_external_rsi(&self, ticker: &str, rsi: f64) -> DataResult<()> {
        if !(0.0..=100.0).contains(&rsi) {
            return Err(DataError::Internal(format!(
                "external RSI {} out of range for {}",
                rsi, ticker
            )));
        }

        sqlx::query(
            "UPDATE quotes SET rsi = $1 \
             WHERE ticker = $2 AND date = (SELECT MAX(date) FROM quotes WHERE ticker = $2)",
        )
        .bind(rsi)
        .bind(ticker)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Last `n` bars at or before `as_of`, oldest first.
    pub async fn last_bars(
        &self,
        ticker: &str,
        n: i64,
        as_of: DateTime<Utc>,
    ) -> DataResult<Vec<QuoteBar>> {
        let rows: Vec<QuoteBar> = sqlx::query_as(&format!(
            "SELECT {BAR_COLUMNS} FROM ( \
                 SELECT {BAR_COLUMNS} FROM quotes \
                 WHERE ticker = $1 AND date <= $2 \
                 ORDER BY date DESC LIMIT $3 \
             ) recent ORDER BY date ASC"
        ))
        .bind(ticker)
        .bind(as_of.date_naive())
        .bind(n)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Latest close at or before `as_of`.
    pub async fn latest_close(
        &self,
        ticker: &str,
        as_of: DateTime<Utc>,
    ) -> DataResult<Option<f64>> {
        let close: Option<f64> = sqlx::query_scalar(
            "SELECT close FROM quotes WHERE ticker = $1 AND date <= $2 \
             ORDER BY date DESC LIMIT 1",
        )
        .bind(ticker)
        .bind(as_of.date_naive())
        .fetch_optional(&self.pool)
        .await?;

        Ok(close)
    }

    /// Average volatility_5 over the 20 most recent bars.
    pub async fn avg_volatility_20(
        &self,
        ticker: &str,
        as_of: DateTime<Utc>,
    ) -> DataResult<Option<f64>> {
        let avg: Option<f64> = sqlx::query_scalar(
            "SELECT AVG(volatility_5) FROM ( \
                 SELECT volatility_5 FROM quotes \
                 WHERE ticker = $1 AND date <= $2 AND volatility_5 IS NOT NULL \
                 ORDER BY date DESC LIMIT 20 \
             ) last_20",
        )
        .bind(ticker)
        .bind(as_of.date_naive())
        .fetch_one(&self.pool)
        .await?;

        Ok(avg)
    }

    /// First bar at or after a date (nearest trading day forward).
    pub async fn first_bar_at_or_after(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> DataResult<Option<QuoteBar>> {
        let row: Option<QuoteBar> = sqlx::query_as(&format!(
            "SELECT {BAR_COLUMNS} FROM quotes \
             WHERE ticker = $1 AND date >= $2 ORDER BY date ASC LIMIT 1"
        ))
        .bind(ticker)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Bars strictly after `from` and up to `to`, oldest first.
    pub async fn bars_between(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DataResult<Vec<QuoteBar>> {
        let rows: Vec<QuoteBar> = sqlx::query_as(&format!(
            "SELECT {BAR_COLUMNS} FROM quotes \
             WHERE ticker = $1 AND date > $2 AND date <= $3 ORDER BY date ASC"
        ))
        .bind(ticker)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Pull the last `days` of bars from the feed for each ticker and
    /// refresh indicators. One ticker's failure — feed or database write —
    /// never affects the others; it is logged and retried on the next
    /// cycle.
    pub async fn refresh_from_provider(
        &self,
        provider: &dyn QuoteProvider,
        rsi_provider: Option<&dyn RsiProvider>,
        tickers: &[String],
        days: i64,
        as_of: DateTime<Utc>,
    ) -> DataResult<usize> {
        let to = as_of.date_naive();
        let from = to - chrono::Duration::days(days);
        let mut total_inserted = 0;

        for ticker in tickers {
            match provider.get_bars(ticker, from, to).await {
                Ok(bars) => match self.upsert_bars(ticker, &bars).await {
                    Ok(inserted) => {
                        total_inserted += inserted;
                        if inserted > 0 {
                            if let Err(e) = self.recompute_indicators(ticker, Some(from)).await {
                                warn!("Indicator recompute failed for {}: {}", ticker, e);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Bar upsert failed for {}: {}", ticker, e);
                        continue;
                    }
                },
                Err(e) => {
                    warn!("Quote refresh failed for {}: {}", ticker, e);
                    continue;
                }
            }

            // Imported RSI wins over the computed value when available.
            if let Some(rsi_provider) = rsi_provider {
                match rsi_provider.get_rsi(ticker).await {
                    Ok(rsi) => {
                        if let Err(e) = self.apply_external_rsi(ticker, rsi).await {
                            warn!("External RSI write failed for {}: {}", ticker, e);
                        }
                    }
                    Err(e) => warn!("External RSI unavailable for {}: {}", ticker, e),
                }
            }
        }

        Ok(total_inserted)
    }
}
