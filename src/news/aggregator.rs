//! Generic news aggregator fetcher
//! Queries a NewsAPI-style endpoint per target ticker, with a source list
//! and a daily request quota.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::NewsFetcher;
use crate::data::{DataError, DataResult};
use crate::kb::{EventType, Importance, NewKbEntry};

struct QuotaState {
    day: NaiveDate,
    used: u32,
}

pub struct NewsAggregatorFetcher {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    tickers: Vec<String>,
    sources: Vec<String>,
    page_size: u32,
    daily_quota: u32,
    quota: Mutex<QuotaState>,
}

impl NewsAggregatorFetcher {
    pub fn new(api_key: String, tickers: Vec<String>, sources: Vec<String>) -> Self {
        Self::with_base_url("https://newsapi.org/v2".to_string(), api_key, tickers, sources)
    }

    pub fn with_base_url(
        base_url: String,
        api_key: String,
        tickers: Vec<String>,
        sources: Vec<String>,
    ) -> Self {
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
            sources,
            page_size: 10,
            daily_quota: 90,
            quota: Mutex::new(QuotaState {
                day: Utc::now().date_naive(),
                used: 0,
            }),
        }
    }

    pub fn with_daily_quota(mut self, quota: u32) -> Self {
        self.daily_quota = quota;
        self
    }

    /// Take one request from today's quota; false when exhausted.
    async fn take_quota(&self) -> bool {
        let mut quota = self.quota.lock().await;
        let today = Utc::now().date_naive();
        if quota.day != today {
            quota.day = today;
            quota.used = 0;
        }
        if quota.used >= self.daily_quota {
            return false;
        }
        quota.used += 1;
        true
    }

    async fn fetch_for_ticker(&self, ticker: &str) -> DataResult<Vec<NewKbEntry>> {
        let mut url = format!(
            "{}/everything?q={}&sortBy=publishedAt&pageSize={}&apiKey={}",
            self.base_url,
            urlencoding::encode(ticker),
            self.page_size,
            self.api_key
        );
        if !self.sources.is_empty() {
            url.push_str(&format!("&sources={}", self.sources.join(",")));
        }

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DataError::api_error(
                status,
                format!("news aggregator: {}", text),
            ));
        }

        let body: serde_json::Value = response.json().await?;
        let articles = body["articles"]
            .as_array()
            .ok_or_else(|| DataError::parse_error("no articles array in response"))?;

        let mut entries = Vec::new();
        for article in articles {
            let title = article["title"].as_str().unwrap_or_default();
            if title.is_empty() {
                continue;
            }
            let description = article["description"].as_str().unwrap_or_default();
            let content = if description.is_empty() {
                title.to_string()
            } else {
                format!("{}. {}", title, description)
            };

            let ts = article["publishedAt"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);

            entries.push(NewKbEntry {
                ts,
                ticker: ticker.to_string(),
                source: "newsapi".to_string(),
                content,
                event_type: EventType::News,
                importance: Importance::Medium,
                region: "USA".to_string(),
                link: article["url"].as_str().map(|s| s.to_string()),
                sentiment_score: None,
            });
        }

        Ok(entries)
    }
}

#[async_trait]
impl NewsFetcher for NewsAggregatorFetcher {
    fn source(&self) -> &str {
        "newsapi"
    }

    async fn fetch(&self) -> DataResult<Vec<NewKbEntry>> {
        let mut all = Vec::new();

        for ticker in &self.tickers {
            if !self.take_quota().await {
                info!("News aggregator daily quota exhausted, stopping batch");
                break;
            }

            match self.fetch_for_ticker(ticker).await {
                Ok(mut entries) => all.append(&mut entries),
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!("Aggregator fetch failed for {}: {}", ticker, e);
                    continue;
                }
            }
        }

        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_quota_resets_per_day_and_caps() {
        let fetcher = NewsAggregatorFetcher::new(
            "key".to_string(),
            vec!["MSFT".to_string()],
            Vec::new(),
        )
        .with_daily_quota(2);

        assert!(fetcher.take_quota().await);
        assert!(fetcher.take_quota().await);
        assert!(!fetcher.take_quota().await);
    }
}
