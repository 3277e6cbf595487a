//! Pre-scored news sentiment fetcher
//! The provider scores articles on a [-1,1] scale; scores are normalized to
//! the knowledge base's [0,1] convention at this boundary, so nothing
//! downstream ever sees the centered scale.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

use super::NewsFetcher;
use crate::data::{DataError, DataResult};
use crate::kb::{EventType, Importance, NewKbEntry};

/// Map a provider score in [-1,1] onto [0,1].
fn normalize_score(raw: f64) -> f64 {
    ((raw + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// The provider timestamps articles as `YYYYMMDDTHHMMSS`.
fn parse_feed_ts(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M%S")
        .ok()
        .map(|dt| dt.and_utc())
}

pub struct SentimentFeedFetcher {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    tickers: Vec<String>,
}

impl SentimentFeedFetcher {
    pub fn new(api_key: String, tickers: Vec<String>) -> Self {
        Self::with_base_url("https://www.alphavantage.co".to_string(), api_key, tickers)
    }

    pub fn with_base_url(base_url: String, api_key: String, tickers: Vec<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("tradewinds/0.1.0")
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url,
            api_key,
            tickers,
        }
    }

    fn map_feed(&self, ticker: &str, body: &serde_json::Value) -> Vec<NewKbEntry> {
        let Some(feed) = body["feed"].as_array() else {
            return Vec::new();
        };

        let mut entries = Vec::new();
        for item in feed {
            let title = item["title"].as_str().unwrap_or_default();
            if title.is_empty() {
                continue;
            }
            let summary = item["summary"].as_str().unwrap_or_default();
            let content = if summary.is_empty() {
                title.to_string()
            } else {
                format!("{}. {}", title, summary)
            };

            let ts = item["time_published"]
                .as_str()
                .and_then(parse_feed_ts)
                .unwrap_or_else(Utc::now);

            let sentiment = item["overall_sentiment_score"]
                .as_f64()
                .map(normalize_score);

            entries.push(NewKbEntry {
                ts,
                ticker: ticker.to_string(),
                source: "sentiment_feed".to_string(),
                content,
                event_type: EventType::News,
                importance: Importance::Medium,
                region: "USA".to_string(),
                link: item["url"].as_str().map(|s| s.to_string()),
                sentiment_score: sentiment,
            });
        }

        entries
    }
}

#[async_trait]
impl NewsFetcher for SentimentFeedFetcher {
    fn source(&self) -> &str {
        "sentiment_feed"
    }

    async fn fetch(&self) -> DataResult<Vec<NewKbEntry>> {
        let mut all = Vec::new();

        for ticker in &self.tickers {
            let url = format!(
                "{}/query?function=NEWS_SENTIMENT&tickers={}&apikey={}",
                self.base_url,
                urlencoding::encode(ticker),
                self.api_key
            );

            let response = match self.client.get(&url).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Sentiment feed request failed for {}: {}", ticker, e);
                    continue;
                }
            };

            if !response.status().is_success() {
                let status = response.status().as_u16();
                if status >= 500 || status == 429 {
                    return Err(DataError::api_error(status, "sentiment feed unavailable"));
                }
                warn!("Sentiment feed returned {} for {}", status, ticker);
                continue;
            }

            let body: serde_json::Value = match response.json().await {
                Ok(body) => body,
                Err(e) => {
                    warn!("Sentiment feed payload unreadable for {}: {}", ticker, e);
                    continue;
                }
            };

            all.append(&mut self.map_feed(ticker, &body));
        }

        Ok(all)
    }
}
