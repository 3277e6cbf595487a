//! HTTP quote feed client
//! Daily bars and pre-market snapshots from the chart API, plus an optional
//! external RSI endpoint. Calls are rate limited with a token bucket.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{PremarketQuote, ProviderBar, QuoteProvider, RsiProvider};
use crate::data::retry::retry_with_backoff;
use crate::data::{DataError, DataResult};

/// Rate limiter for API calls (token bucket algorithm)
struct RateLimiter {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: DateTime<Utc>,
}

impl RateLimiter {
    fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            max_tokens,
            refill_rate,
            last_refill: Utc::now(),
        }
    }

    fn refill(&mut self) {
        let now = Utc::now();
        let elapsed = (now - self.last_refill).num_milliseconds() as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }

    /// Wait until a token is available, then consume it.
    async fn consume(&mut self) {
        loop {
            self.refill();
            if self.tokens >= 1.0 {
                self.tokens -= 1.0;
                return;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
    }
}

/// Quote client for the chart API (Yahoo-compatible symbol conventions).
pub struct ChartQuoteClient {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl ChartQuoteClient {
    pub fn new() -> Self {
        Self::with_base_url("https://query1.finance.yahoo.com".to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("tradewinds/0.1.0")
            .build()
            .expect("Failed to build HTTP client");

        // 30 calls per minute, bursting up to 5
        let rate_limiter = Arc::new(Mutex::new(RateLimiter::new(5.0, 30.0 / 60.0)));

        Self {
            client,
            base_url,
            rate_limiter,
        }
    }

    async fn fetch_chart(&self, ticker: &str, query: &str) -> DataResult<serde_json::Value> {
        {
            let mut limiter = self.rate_limiter.lock().await;
            limiter.consume().await;
        }

        let url = format!(
            "{}/v8/finance/chart/{}?{}",
            self.base_url,
            urlencoding::encode(ticker),
            query
        );

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status_code = response.status().as_u16();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DataError::api_error(
                status_code,
                format!("chart API for {}: {}", ticker, error_text),
            ));
        }

        let body: serde_json::Value = response.json().await?;

        if let Some(err) = body["chart"]["error"].as_object() {
            return Err(DataError::parse_error(format!(
                "chart API error for {}: {:?}",
                ticker, err
            )));
        }

        body["chart"]["result"]
            .get(0)
            .cloned()
            .ok_or_else(|| DataError::NoData {
                symbol: ticker.to_string(),
                start: "chart".to_string(),
                end: "no result".to_string(),
            })
    }
}

impl Default for ChartQuoteClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuoteProvider for ChartQuoteClient {
    async fn get_bars(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DataResult<Vec<ProviderBar>> {
        let period1 = from
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();
        let period2 = to
            .and_hms_opt(23, 59, 59)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();

        let query = format!("period1={}&period2={}&interval=1d", period1, period2);

        let result = retry_with_backoff(|| self.fetch_chart(ticker, &query), 3).await?;

        let timestamps = result["timestamp"].as_array().cloned().unwrap_or_default();
        let closes = result["indicators"]["quote"][0]["close"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        let volumes = result["indicators"]["quote"][0]["volume"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        let mut bars = Vec::with_capacity(timestamps.len());
        for (i, ts) in timestamps.iter().enumerate() {
            let (Some(ts), Some(close)) = (ts.as_i64(), closes.get(i).and_then(|c| c.as_f64()))
            else {
                // Gaps come back as nulls; skip the bar rather than invent one.
                continue;
            };
            let date = match Utc.timestamp_opt(ts, 0) {
                chrono::LocalResult::Single(dt) => dt.date_naive(),
                _ => continue,
            };
            bars.push(ProviderBar {
                date,
                close,
                volume: volumes.get(i).and_then(|v| v.as_i64()).unwrap_or(0),
            });
        }

        if bars.is_empty() {
            return Err(DataError::NoData {
                symbol: ticker.to_string(),
                start: from.to_string(),
                end: to.to_string(),
            });
        }

        tracing::info!("Fetched {} daily bars for {}", bars.len(), ticker);
        Ok(bars)
    }

    async fn get_premarket(&self, ticker: &str) -> DataResult<PremarketQuote> {
        let query = "range=1d&interval=5m&includePrePost=true";
        let result = retry_with_backoff(|| self.fetch_chart(ticker, query), 3).await?;

        let meta = &result["meta"];
        let prev_close = meta["chartPreviousClose"]
            .as_f64()
            .or_else(|| meta["previousClose"].as_f64())
            .ok_or_else(|| DataError::parse_error(format!("no previous close for {}", ticker)))?;
        let last = meta["preMarketPrice"]
            .as_f64()
            .or_else(|| meta["regularMarketPrice"].as_f64())
            .ok_or_else(|| DataError::parse_error(format!("no last price for {}", ticker)))?;

        Ok(PremarketQuote {
            last,
            prev_close,
            ts: Utc::now(),
        })
    }
}

/// External RSI endpoint (daily, period 14, close series).
pub struct HttpRsiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpRsiClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url("https://www.alphavantage.co".to_string(), api_key)
    }

    pub fn with_base_url(base_url: String, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("tradewinds/0.1.0")
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl RsiProvider for HttpRsiClient {
    async fn get_rsi(&self, ticker: &str) -> DataResult<f64> {
        let url = format!(
            "{}/query?function=RSI&symbol={}&interval=daily&time_period=14&series_type=close&apikey={}",
            self.base_url,
            urlencoding::encode(ticker),
            self.api_key
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(DataError::api_error(
                response.status().as_u16(),
                format!("RSI endpoint for {}", ticker),
            ));
        }

        let body: serde_json::Value = response.json().await?;
        let series = body["Technical Analysis: RSI"]
            .as_object()
            .ok_or_else(|| DataError::parse_error(format!("no RSI series for {}", ticker)))?;

        // The series is keyed by date; take the most recent entry.
        let latest = series
            .keys()
            .max()
            .and_then(|k| series.get(k))
            .and_then(|v| v["RSI"].as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| DataError::parse_error(format!("empty RSI series for {}", ticker)))?;

        if !(0.0..=100.0).contains(&latest) {
            return Err(DataError::parse_error(format!(
                "RSI {} out of range for {}",
                latest, ticker
            )));
        }

        Ok(latest)
    }
}
