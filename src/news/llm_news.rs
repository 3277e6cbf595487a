//! LLM-synthesised news fetcher
//! Asks the model what notable news it knows for each tracked ticker.
//! Cooled down per ticker so the model is not re-asked every cycle, and
//! deduplicated downstream like any other source.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::NewsFetcher;
use crate::data::DataResult;
use crate::kb::{EventType, Importance, KnowledgeBase, NewKbEntry};
use crate::providers::llm::{parse_json_reply, LlmProvider};

pub const LLM_NEWS_SOURCE: &str = "llm_news";

const SYSTEM_PROMPT: &str = "You are a financial news assistant. Reply with strict JSON only.";

#[derive(Debug, Deserialize)]
struct LlmNewsItem {
    title: String,
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Deserialize)]
struct LlmNewsReply {
    #[serde(default)]
    items: Vec<LlmNewsItem>,
}

pub struct LlmNewsFetcher {
    llm: Arc<dyn LlmProvider>,
    kb: Arc<KnowledgeBase>,
    tickers: Vec<String>,
    cooldown_hours: i64,
}

impl LlmNewsFetcher {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        kb: Arc<KnowledgeBase>,
        tickers: Vec<String>,
        cooldown_hours: i64,
    ) -> Self {
        Self {
            llm,
            kb,
            tickers,
            cooldown_hours,
        }
    }

    fn prompt_for(ticker: &str) -> String {
        format!(
            "List up to 3 notable recent news items about {} that could move its price. \
             Respond as JSON: {{\"items\": [{{\"title\": \"...\", \"summary\": \"...\"}}]}}. \
             If you know of none, return {{\"items\": []}}.",
            ticker
        )
    }
}

#[async_trait]
impl NewsFetcher for LlmNewsFetcher {
    fn source(&self) -> &str {
        LLM_NEWS_SOURCE
    }

    async fn fetch(&self) -> DataResult<Vec<NewKbEntry>> {
        let now = Utc::now();
        let mut entries = Vec::new();

        for ticker in &self.tickers {
            // Per-ticker cooldown keyed off the last stored row.
            if let Some(last) = self
                .kb
                .last_entry_ts_for_source(ticker, LLM_NEWS_SOURCE)
                .await?
            {
                if now - last < Duration::hours(self.cooldown_hours) {
                    debug!("LLM news for {} still cooling down", ticker);
                    continue;
                }
            }

            let reply = match self
                .llm
                .generate(SYSTEM_PROMPT, &Self::prompt_for(ticker), 512, 0.3)
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("LLM news generation failed for {}: {}", ticker, e);
                    continue;
                }
            };

            let parsed: LlmNewsReply = match parse_json_reply(&reply.text) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("LLM news reply unparseable for {}: {}", ticker, e);
                    continue;
                }
            };

            for item in parsed.items {
                if item.title.trim().is_empty() {
                    continue;
                }
                let content = if item.summary.is_empty() {
                    item.title.clone()
                } else {
                    format!("{}. {}", item.title, item.summary)
                };
                entries.push(NewKbEntry {
                    ts: now,
                    ticker: ticker.clone(),
                    source: LLM_NEWS_SOURCE.to_string(),
                    content,
                    event_type: EventType::News,
                    importance: Importance::Low,
                    region: "USA".to_string(),
                    link: None,
                    sentiment_score: None,
                });
            }
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_mentions_ticker_and_shape() {
        let prompt = LlmNewsFetcher::prompt_for("SNDK");
        assert!(prompt.contains("SNDK"));
        assert!(prompt.contains("\"items\""));
    }

    #[test]
    fn test_reply_parsing() {
        let reply: LlmNewsReply = parse_json_reply(
            r#"{"items": [{"title": "Sandisk raises guidance", "summary": "NAND pricing firmed."}]}"#,
        )
        .unwrap();
        assert_eq!(reply.items.len(), 1);
        assert_eq!(reply.items[0].title, "Sandisk raises guidance");

        let empty: LlmNewsReply = parse_json_reply(r#"{"items": []}"#).unwrap();
        assert!(empty.items.is_empty());
    }
}
