//! Central-bank RSS/Atom fetcher
//! Parses each configured feed and maps entries to macro KB rows with the
//! feed's event type and region.

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use super::NewsFetcher;
use crate::data::{DataError, DataResult};
use crate::kb::{EventType, Importance, NewKbEntry};

/// One feed to poll.
#[derive(Debug, Clone)]
pub struct RssFeedSpec {
    pub url: String,
    pub ticker: String,
    pub region: String,
    pub event_type: EventType,
}

impl RssFeedSpec {
    pub fn new(url: &str, ticker: &str, region: &str, event_type: EventType) -> Self {
        Self {
            url: url.to_string(),
            ticker: ticker.to_string(),
            region: region.to_string(),
            event_type,
        }
    }
}

/// Default central-bank feed set.
pub fn default_feeds() -> Vec<RssFeedSpec> {
    vec![
        RssFeedSpec::new(
            "https://www.federalreserve.gov/feeds/press_monetary.xml",
            "US_MACRO",
            "USA",
            EventType::FomcStatement,
        ),
        RssFeedSpec::new(
            "https://www.federalreserve.gov/feeds/speeches.xml",
            "US_MACRO",
            "USA",
            EventType::FomcSpeech,
        ),
        RssFeedSpec::new(
            "https://www.ecb.europa.eu/rss/press.html",
            "MACRO",
            "EU",
            EventType::EcbStatement,
        ),
        RssFeedSpec::new(
            "https://www.bankofengland.co.uk/rss/news",
            "MACRO",
            "UK",
            EventType::BoeStatement,
        ),
    ]
}

pub struct CentralBankRssFetcher {
    client: reqwest::Client,
    feeds: Vec<RssFeedSpec>,
}

impl CentralBankRssFetcher {
    pub fn new(feeds: Vec<RssFeedSpec>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("tradewinds/0.1.0")
            .build()
            .expect("Failed to build HTTP client");
        Self { client, feeds }
    }

    fn map_feed(&self, spec: &RssFeedSpec, bytes: &[u8]) -> DataResult<Vec<NewKbEntry>> {
        let feed = feed_rs::parser::parse(bytes)
            .map_err(|e| DataError::parse_error(format!("feed {}: {}", spec.url, e)))?;

        let mut entries = Vec::new();
        for item in feed.entries {
            let title = item
                .title
                .as_ref()
                .map(|t| t.content.clone())
                .unwrap_or_default();
            if title.is_empty() {
                continue;
            }

            let summary = item
                .summary
                .as_ref()
                .map(|s| s.content.clone())
                .unwrap_or_default();
            let content = if summary.is_empty() {
                title.clone()
            } else {
                format!("{}. {}", title, summary)
            };

            let link = item.links.first().map(|l| l.href.clone());
            let ts = item.published.or(item.updated).unwrap_or_else(Utc::now);

            entries.push(NewKbEntry {
                ts,
                ticker: spec.ticker.clone(),
                source: format!("rss:{}", feed_host(&spec.url)),
                content,
                event_type: spec.event_type,
                importance: Importance::High,
                region: spec.region.clone(),
                link,
                sentiment_score: None,
            });
        }

        Ok(entries)
    }
}

fn feed_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| url.to_string())
}

#[async_trait]
impl NewsFetcher for CentralBankRssFetcher {
    fn source(&self) -> &str {
        "rss"
    }

    /// One bad feed never poisons the batch; its error is logged and the
    /// remaining feeds still contribute.
    async fn fetch(&self) -> DataResult<Vec<NewKbEntry>> {
        let mut all = Vec::new();

        for spec in &self.feeds {
            let response = match self.client.get(&spec.url).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!("RSS fetch failed for {}: {}", spec.url, e);
                    continue;
                }
            };

            if !response.status().is_success() {
                warn!("RSS feed {} returned {}", spec.url, response.status());
                continue;
            }

            let bytes = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("RSS body read failed for {}: {}", spec.url, e);
                    continue;
                }
            };

            match self.map_feed(spec, &bytes) {
                Ok(mut entries) => all.append(&mut entries),
                Err(e) => warn!("{}", e),
            }
        }

        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATOM_SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Press Releases</title>
  <updated>2025-03-19T18:00:00Z</updated>
  <id>urn:feed:press</id>
  <entry>
    <title>Federal Reserve issues FOMC statement</title>
    <id>urn:item:1</id>
    <link href="https://www.federalreserve.gov/newsevents/pressreleases/monetary20250319a.htm"/>
    <summary>The Committee decided to maintain the target range.</summary>
    <updated>2025-03-19T18:00:00Z</updated>
    <published>2025-03-19T18:00:00Z</published>
  </entry>
</feed>"#;

    #[test]
    fn test_map_atom_feed() {
        let spec = RssFeedSpec::new(
            "https://www.federalreserve.gov/feeds/press_monetary.xml",
            "US_MACRO",
            "USA",
            EventType::FomcStatement,
        );
        let fetcher = CentralBankRssFetcher::new(vec![spec.clone()]);
        let entries = fetcher.map_feed(&spec, ATOM_SAMPLE.as_bytes()).unwrap();

        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.ticker, "US_MACRO");
        assert_eq!(entry.event_type, EventType::FomcStatement);
        assert_eq!(entry.importance, Importance::High);
        assert!(entry.content.starts_with("Federal Reserve issues FOMC statement"));
        assert!(entry.link.as_deref().unwrap().contains("federalreserve.gov"));
        assert_eq!(entry.source, "rss:www.federalreserve.gov");
    }

    #[test]
    fn test_bad_xml_is_a_parse_error() {
        let spec = RssFeedSpec::new("https://x.test/feed", "MACRO", "EU", EventType::EcbStatement);
        let fetcher = CentralBankRssFetcher::new(vec![spec.clone()]);
        assert!(fetcher.map_feed(&spec, b"not xml at all").is_err());
    }
}
