//! News ingestion pipeline
//! Pluggable fetchers run concurrently on a bounded worker pool with a
//! per-fetcher timeout; results funnel through a single inserter into the
//! knowledge base, whose deduplication makes the whole pipeline idempotent.

pub mod aggregator;
pub mod earnings;
pub mod llm_news;
pub mod rss;
pub mod sentiment_feed;

pub use aggregator::NewsAggregatorFetcher;
pub use earnings::EarningsCalendarFetcher;
pub use llm_news::LlmNewsFetcher;
pub use rss::CentralBankRssFetcher;
pub use sentiment_feed::SentimentFeedFetcher;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::data::DataResult;
use crate::kb::{KnowledgeBase, NewKbEntry};

/// A news source. Implementations are configured with credentials and a
/// target ticker/region set at construction time.
#[async_trait]
pub trait NewsFetcher: Send + Sync {
    /// Source label used in the ingest summary and KB rows.
    fn source(&self) -> &str;

    /// Fetch the current batch of entries.
    async fn fetch(&self) -> DataResult<Vec<NewKbEntry>>;
}

/// Per-run report: entries processed per source, plus collected errors.
#[derive(Debug, Default, Clone)]
pub struct IngestSummary {
    pub counts: HashMap<String, usize>,
    pub errors: Vec<String>,
}

pub struct IngestPipeline {
    kb: Arc<KnowledgeBase>,
    fetchers: Vec<Arc<dyn NewsFetcher>>,
    worker_limit: usize,
    fetch_timeout: Duration,
}

impl IngestPipeline {
    pub fn new(kb: Arc<KnowledgeBase>, fetchers: Vec<Arc<dyn NewsFetcher>>) -> Self {
        Self {
            kb,
            fetchers,
            worker_limit: 4,
            fetch_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_worker_limit(mut self, limit: usize) -> Self {
        self.worker_limit = limit.max(1);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Run every fetcher concurrently (bounded), then insert the merged
    /// results through the KB's deduplicating insert. A single fetcher's
    /// failure is recorded in the summary and never blocks the others.
    pub async fn run(&self) -> DataResult<IngestSummary> {
        let semaphore = Arc::new(Semaphore::new(self.worker_limit));
        let mut handles = Vec::new();

        for fetcher in &self.fetchers {
            let fetcher = Arc::clone(fetcher);
            let semaphore = Arc::clone(&semaphore);
            let fetch_timeout = self.fetch_timeout;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                let source = fetcher.source().to_string();
                let result = match tokio::time::timeout(fetch_timeout, fetcher.fetch()).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("Fetcher {} timed out after {:?}", source, fetch_timeout);
                        Err(crate::data::DataError::Timeout {
                            timeout_seconds: fetch_timeout.as_secs(),
                        })
                    }
                };
                (source, result)
            }));
        }

        let mut summary = IngestSummary::default();
        for handle in handles {
            let Ok((source, result)) = handle.await else {
                summary.errors.push("fetcher task panicked".to_string());
                continue;
            };

            match result {
                Ok(entries) => {
                    let mut inserted = 0;
                    for entry in &entries {
                        match self.kb.insert(entry).await {
                            Ok(_) => inserted += 1,
                            Err(e) => {
                                warn!("Insert failed for {} entry: {}", source, e);
                                summary.errors.push(format!("{}: insert: {}", source, e));
                            }
                        }
                    }
                    info!("Fetcher {} delivered {} entries", source, inserted);
                    *summary.counts.entry(source).or_insert(0) += inserted;
                }
                Err(e) => {
                    warn!("Fetcher {} failed: {}", source, e);
                    summary.counts.entry(source.clone()).or_insert(0);
                    summary.errors.push(format!("{}: {}", source, e));
                }
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct StaticFetcher {
        label: String,
        entries: Vec<NewKbEntry>,
        fail: bool,
    }

    #[async_trait]
    impl NewsFetcher for StaticFetcher {
        fn source(&self) -> &str {
            &self.label
        }

        async fn fetch(&self) -> DataResult<Vec<NewKbEntry>> {
            if self.fail {
                return Err(crate::data::DataError::api_error(503, "down"));
            }
            Ok(self.entries.clone())
        }
    }

    #[tokio::test]
    async fn test_fetcher_trait_objects() {
        let ok: Arc<dyn NewsFetcher> = Arc::new(StaticFetcher {
            label: "ok".to_string(),
            entries: vec![NewKbEntry::news(Utc::now(), "MSFT", "ok", "headline")],
            fail: false,
        });
        let down: Arc<dyn NewsFetcher> = Arc::new(StaticFetcher {
            label: "down".to_string(),
            entries: Vec::new(),
            fail: true,
        });

        assert_eq!(ok.source(), "ok");
        assert_eq!(ok.fetch().await.unwrap().len(), 1);
        assert!(down.fetch().await.is_err());
    }
}
