//! Sentiment enricher
//! Scores unsentimented KB rows with the LLM: a strict-JSON prompt yields
//! `{"score": 0..1, "insight": str}`. Paced between calls and cost-bounded
//! by the batch limit. A parse failure skips the row; a transport failure
//! stops the batch.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::data::{DataError, DataResult};
use crate::kb::KnowledgeBase;
use crate::providers::llm::{parse_json_reply, LlmProvider};

const SYSTEM_PROMPT: &str = "You are a financial sentiment rater. Reply with strict JSON only: \
     {\"score\": <float 0..1, 0 = very negative for the instrument, 1 = very positive>, \
     \"insight\": \"<one-sentence key takeaway>\"}";

#[derive(Debug, Deserialize)]
struct SentimentReply {
    score: f64,
    #[serde(default)]
    insight: String,
}

#[derive(Debug, Default)]
pub struct SentimentReport {
    pub scored: usize,
    pub skipped: usize,
}

pub struct SentimentEnricher {
    kb: Arc<KnowledgeBase>,
    llm: Arc<dyn LlmProvider>,
    pace: Duration,
}

impl SentimentEnricher {
    pub fn new(kb: Arc<KnowledgeBase>, llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            kb,
            llm,
            pace: Duration::from_millis(500),
        }
    }

    pub async fn enrich_pending(
        &self,
        max_age_days: i64,
        limit: i64,
    ) -> DataResult<SentimentReport> {
        let pending = self.kb.select_unsentimented(max_age_days, limit).await?;
        if pending.is_empty() {
            return Ok(SentimentReport::default());
        }
        info!("Scoring sentiment for {} KB rows", pending.len());

        let mut report = SentimentReport::default();
        for entry in pending {
            let user_prompt = format!(
                "Rate the sentiment of this item for {}:\n\n{}",
                entry.ticker, entry.content
            );

            let reply = match self.llm.generate(SYSTEM_PROMPT, &user_prompt, 256, 0.0).await {
                Ok(reply) => reply,
                Err(e) => {
                    // Transport trouble: back off and let the next scheduled
                    // run pick the batch up again.
                    warn!("Sentiment batch stopped on transport error: {}", e);
                    return if report.scored > 0 {
                        Ok(report)
                    } else {
                        Err(e)
                    };
                }
            };

            let parsed: SentimentReply = match parse_json_reply(&reply.text) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("Unparseable sentiment reply for KB {}: {}", entry.id, e);
                    report.skipped += 1;
                    continue;
                }
            };

            if !(0.0..=1.0).contains(&parsed.score) {
                warn!(
                    "Sentiment score {} out of range for KB {}, row left untouched",
                    parsed.score, entry.id
                );
                report.skipped += 1;
                continue;
            }

            if self
                .kb
                .update_sentiment(entry.id, parsed.score, &parsed.insight)
                .await?
            {
                report.scored += 1;
            }

            tokio::time::sleep(self.pace).await;
        }

        info!(
            "Sentiment enrichment done: {} scored, {} skipped",
            report.scored, report.skipped
        );
        Ok(report)
    }
}

/// Shared guard used by callers that gate on LLM availability.
pub fn require_llm_enabled(use_llm: bool) -> DataResult<()> {
    if use_llm {
        Ok(())
    } else {
        Err(DataError::Config(
            "LLM enrichment requested but use_llm is disabled".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_shape() {
        let parsed: SentimentReply = parse_json_reply(
            r#"{"score": 0.82, "insight": "Guidance raised above consensus."}"#,
        )
        .unwrap();
        assert!((parsed.score - 0.82).abs() < 1e-9);
        assert!(!parsed.insight.is_empty());
    }

    #[test]
    fn test_reply_score_only() {
        let parsed: SentimentReply = parse_json_reply(r#"{"score": 0.5}"#).unwrap();
        assert_eq!(parsed.insight, "");
    }

    #[test]
    fn test_llm_gate() {
        assert!(require_llm_enabled(true).is_ok());
        assert!(require_llm_enabled(false).is_err());
    }
}
