//! Unified knowledge base for news and events
//! One table holds every item; sentiment, embeddings, and outcomes are
//! enriched in place by targeted updates on NULL columns. Deduplication is
//! enforced by the schema, so repeated ingestion is idempotent.

mod pgvector;
pub use pgvector::PgVector;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::data::{DataError, DataResult};
use crate::providers::{is_macro_ticker, Embedder};

/// Event classification carried by every KB row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    News,
    Earnings,
    EconomicIndicator,
    FomcStatement,
    FomcSpeech,
    FomcMinutes,
    BoeStatement,
    EcbStatement,
    BojStatement,
    TradeSignal,
    Manual,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::News => "NEWS",
            EventType::Earnings => "EARNINGS",
            EventType::EconomicIndicator => "ECONOMIC_INDICATOR",
            EventType::FomcStatement => "FOMC_STATEMENT",
            EventType::FomcSpeech => "FOMC_SPEECH",
            EventType::FomcMinutes => "FOMC_MINUTES",
            EventType::BoeStatement => "BOE_STATEMENT",
            EventType::EcbStatement => "ECB_STATEMENT",
            EventType::BojStatement => "BOJ_STATEMENT",
            EventType::TradeSignal => "TRADE_SIGNAL",
            EventType::Manual => "MANUAL",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "EARNINGS" => EventType::Earnings,
            "ECONOMIC_INDICATOR" => EventType::EconomicIndicator,
            "FOMC_STATEMENT" => EventType::FomcStatement,
            "FOMC_SPEECH" => EventType::FomcSpeech,
            "FOMC_MINUTES" => EventType::FomcMinutes,
            "BOE_STATEMENT" => EventType::BoeStatement,
            "ECB_STATEMENT" => EventType::EcbStatement,
            "BOJ_STATEMENT" => EventType::BojStatement,
            "TRADE_SIGNAL" => EventType::TradeSignal,
            "MANUAL" => EventType::Manual,
            _ => EventType::News,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Importance {
    High,
    Medium,
    Low,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::High => "HIGH",
            Importance::Medium => "MEDIUM",
            Importance::Low => "LOW",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "HIGH" => Importance::High,
            "LOW" => Importance::Low,
            _ => Importance::Medium,
        }
    }
}

/// Post-event price outcome, stored as JSON on the originating row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventOutcome {
    pub price_at_event: f64,
    pub price_after: f64,
    pub price_change_pct: f64,
    pub max_up_pct: f64,
    pub max_down_pct: f64,
    pub volatility_change_pct: Option<f64>,
    pub outcome: String,
    pub sentiment_match: Option<bool>,
    pub days_after: i64,
}

/// Insert form; enrichment fields may be pre-populated by sources that
/// already carry them (e.g. a sentiment feed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewKbEntry {
    pub ts: DateTime<Utc>,
    pub ticker: String,
    pub source: String,
    pub content: String,
    pub event_type: EventType,
    pub importance: Importance,
    pub region: String,
    pub link: Option<String>,
    pub sentiment_score: Option<f64>,
}

impl NewKbEntry {
    pub fn news(ts: DateTime<Utc>, ticker: &str, source: &str, content: &str) -> Self {
        Self {
            ts,
            ticker: ticker.to_string(),
            source: source.to_string(),
            content: content.to_string(),
            event_type: EventType::News,
            importance: Importance::Medium,
            region: "USA".to_string(),
            link: None,
            sentiment_score: None,
        }
    }
}

/// Full KB row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbEntry {
    pub id: i64,
    pub ts: DateTime<Utc>,
    pub ticker: String,
    pub source: String,
    pub content: String,
    pub event_type: EventType,
    pub importance: Importance,
    pub region: String,
    pub link: Option<String>,
    pub sentiment_score: Option<f64>,
    pub insight: Option<String>,
    pub outcome: Option<EventOutcome>,
}

impl KbEntry {
    pub fn is_macro(&self) -> bool {
        is_macro_ticker(&self.ticker)
    }

    fn from_row(row: &sqlx::postgres::PgRow) -> Self {
        let event_type: String = row.get("event_type");
        let importance: String = row.get("importance");
        let outcome_json: Option<serde_json::Value> = row.get("outcome_json");
        Self {
            id: row.get("id"),
            ts: row.get("ts"),
            ticker: row.get("ticker"),
            source: row.get("source"),
            content: row.get("content"),
            event_type: EventType::parse(&event_type),
            importance: Importance::parse(&importance),
            region: row.get("region"),
            link: row.get("link"),
            sentiment_score: row.get("sentiment_score"),
            insight: row.get("insight"),
            outcome: outcome_json.and_then(|v| serde_json::from_value(v).ok()),
        }
    }
}

const SELECT_COLUMNS: &str = "id, ts, ticker, source, content, event_type, importance, region, \
                              link, sentiment_score, insight, outcome_json";

/// Similar-event match with its cosine similarity.
#[derive(Debug, Clone)]
pub struct SimilarEvent {
    pub entry: KbEntry,
    pub similarity: f32,
}

pub struct KnowledgeBase {
    pool: PgPool,
    embedder: Arc<dyn Embedder>,
}

impl KnowledgeBase {
    pub fn new(pool: PgPool, embedder: Arc<dyn Embedder>) -> Self {
        Self { pool, embedder }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert an entry, returning the new id — or the id of the existing
    /// dedup match: same `(source, link)` when the link is non-empty, same
    /// `(ts, ticker, content)` otherwise.
    pub async fn insert(&self, entry: &NewKbEntry) -> DataResult<i64> {
        let link = entry.link.as_deref().filter(|l| !l.is_empty());

        let inserted = sqlx::query(
            r#"
            INSERT INTO knowledge_base
                (ts, ticker, source, content, event_type, importance, region, link, sentiment_score)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(entry.ts)
        .bind(&entry.ticker)
        .bind(&entry.source)
        .bind(&entry.content)
        .bind(entry.event_type.as_str())
        .bind(entry.importance.as_str())
        .bind(&entry.region)
        .bind(link)
        .bind(entry.sentiment_score)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(row.get("id"));
        }

        // Conflict: resolve the existing row's id with the same dedup key.
        let existing = match link {
            Some(link) => {
                sqlx::query("SELECT id FROM knowledge_base WHERE source = $1 AND link = $2")
                    .bind(&entry.source)
                    .bind(link)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(
                    "SELECT id FROM knowledge_base \
                     WHERE ts = $1 AND ticker = $2 AND md5(content) = md5($3)",
                )
                .bind(entry.ts)
                .bind(&entry.ticker)
                .bind(&entry.content)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        existing
            .map(|row| row.get("id"))
            .ok_or_else(|| DataError::Internal("dedup conflict without a matching row".into()))
    }

    /// Write sentiment enrichment; never overwrites a non-null score.
    pub async fn update_sentiment(&self, id: i64, score: f64, insight: &str) -> DataResult<bool> {
        if !(0.0..=1.0).contains(&score) {
            return Err(DataError::Internal(format!(
                "sentiment score {} out of [0,1] for entry {}",
                score, id
            )));
        }

        let result = sqlx::query(
            "UPDATE knowledge_base SET sentiment_score = $1, insight = $2 \
             WHERE id = $3 AND sentiment_score IS NULL",
        )
        .bind(score)
        .bind(insight)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Write an embedding; never overwrites a non-null vector.
    pub async fn update_embedding(&self, id: i64, embedding: Vec<f32>) -> DataResult<bool> {
        let vector = PgVector::with_dimension(embedding, self.embedder.dimension())
            .map_err(|e| DataError::Internal(format!("entry {}: {}", id, e)))?;
        let norm: f32 = vector.as_slice().iter().map(|x| x * x).sum::<f32>().sqrt();
        if !(0.99..=1.01).contains(&norm) {
            return Err(DataError::Internal(format!(
                "embedding for entry {} is not unit-norm ({:.4})",
                id, norm
            )));
        }

        let result = sqlx::query(
            "UPDATE knowledge_base SET embedding = $1 WHERE id = $2 AND embedding IS NULL",
        )
        .bind(vector)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Write an outcome record; never overwrites a non-null one.
    pub async fn update_outcome(&self, id: i64, outcome: &EventOutcome) -> DataResult<bool> {
        let result = sqlx::query(
            "UPDATE knowledge_base SET outcome_json = $1 \
             WHERE id = $2 AND outcome_json IS NULL",
        )
        .bind(serde_json::to_value(outcome)?)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// News relevant to a ticker analysis: ticker rows from the last 24h
    /// plus macro rows from the last 72h, newest first. `as_of` bounds the
    /// window so backtests never read the future.
    pub async fn recent_news(&self, ticker: &str, as_of: DateTime<Utc>) -> DataResult<Vec<KbEntry>> {
        let ticker_cutoff = as_of - Duration::hours(24);
        let macro_cutoff = as_of - Duration::hours(72);

        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM knowledge_base \
             WHERE ts <= $1 AND ( \
                 (ticker = $2 AND ts >= $3) \
                 OR (ticker IN ('MACRO', 'US_MACRO') AND ts >= $4) \
             ) \
             ORDER BY ts DESC"
        ))
        .bind(as_of)
        .bind(ticker)
        .bind(ticker_cutoff)
        .bind(macro_cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(KbEntry::from_row).collect())
    }

    /// Most recent content for a ticker, used as the similar-event query.
    pub async fn latest_news_content(
        &self,
        ticker: &str,
        as_of: DateTime<Utc>,
    ) -> DataResult<Option<String>> {
        let row = sqlx::query(
            "SELECT content FROM knowledge_base \
             WHERE ticker = $1 AND ts <= $2 ORDER BY ts DESC LIMIT 1",
        )
        .bind(ticker)
        .bind(as_of)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("content")))
    }

    /// Filtered query over the KB: any combination of ticker, time window,
    /// event type, and a full-text needle against content.
    pub async fn query(
        &self,
        ticker: Option<&str>,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        event_type: Option<EventType>,
        text: Option<&str>,
        limit: i64,
    ) -> DataResult<Vec<KbEntry>> {
        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM knowledge_base WHERE TRUE");
        // Dynamic filter assembly with positional binds.
        let mut n = 0;
        if ticker.is_some() {
            n += 1;
            sql.push_str(&format!(" AND ticker = ${}", n));
        }
        if since.is_some() {
            n += 1;
            sql.push_str(&format!(" AND ts >= ${}", n));
        }
        if until.is_some() {
            n += 1;
            sql.push_str(&format!(" AND ts <= ${}", n));
        }
        if event_type.is_some() {
            n += 1;
            sql.push_str(&format!(" AND event_type = ${}", n));
        }
        if text.is_some() {
            n += 1;
            sql.push_str(&format!(" AND content ILIKE ${}", n));
        }
        n += 1;
        sql.push_str(&format!(" ORDER BY ts DESC LIMIT ${}", n));

        let mut query = sqlx::query(&sql);
        if let Some(t) = ticker {
            query = query.bind(t.to_string());
        }
        if let Some(s) = since {
            query = query.bind(s);
        }
        if let Some(u) = until {
            query = query.bind(u);
        }
        if let Some(et) = event_type {
            query = query.bind(et.as_str());
        }
        if let Some(needle) = text {
            query = query.bind(format!("%{}%", needle));
        }
        query = query.bind(limit);

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(KbEntry::from_row).collect())
    }

    /// KNN search over embedded rows: embed the query text, rank by cosine
    /// similarity, keep matches at or above `min_similarity`.
    ///
    /// Degrades to an empty result when the embedding capability fails.
    pub async fn similar_to(
        &self,
        query_text: &str,
        ticker: Option<&str>,
        time_window_days: i64,
        limit: i64,
        min_similarity: f32,
        as_of: DateTime<Utc>,
    ) -> DataResult<Vec<SimilarEvent>> {
        let query_vector = match self.embedder.embed(query_text).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!("Embedding unavailable for similar-event search: {}", e);
                return Ok(Vec::new());
            }
        };
        let query_vector =
            match PgVector::with_dimension(query_vector, self.embedder.dimension()) {
                Ok(vector) => vector,
                Err(e) => {
                    warn!("Bad query embedding for similar-event search: {}", e);
                    return Ok(Vec::new());
                }
            };

        let cutoff = as_of - Duration::days(time_window_days);

        let sql = if ticker.is_some() {
            format!(
                "SELECT {SELECT_COLUMNS}, 1 - (embedding <=> $1) AS similarity \
                 FROM knowledge_base \
                 WHERE embedding IS NOT NULL AND ts >= $2 AND ts <= $3 AND ticker = $4 \
                 ORDER BY embedding <=> $1 LIMIT $5"
            )
        } else {
            format!(
                "SELECT {SELECT_COLUMNS}, 1 - (embedding <=> $1) AS similarity \
                 FROM knowledge_base \
                 WHERE embedding IS NOT NULL AND ts >= $2 AND ts <= $3 \
                 ORDER BY embedding <=> $1 LIMIT $4"
            )
        };

        let mut query = sqlx::query(&sql)
            .bind(query_vector)
            .bind(cutoff)
            .bind(as_of);
        if let Some(t) = ticker {
            query = query.bind(t.to_string());
        }
        query = query.bind(limit);

        let rows = query.fetch_all(&self.pool).await?;

        let results: Vec<SimilarEvent> = rows
            .iter()
            .map(|row| {
                let similarity: f64 = row.get("similarity");
                SimilarEvent {
                    entry: KbEntry::from_row(row),
                    similarity: similarity as f32,
                }
            })
            .filter(|s| s.similarity >= min_similarity)
            .collect();

        debug!(
            "Similar-event search returned {} matches above {:.2}",
            results.len(),
            min_similarity
        );
        Ok(results)
    }

    /// Create the IVF-flat cosine index once enough rows carry embeddings.
    pub async fn ensure_vector_index(&self) -> DataResult<()> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_base WHERE embedding IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;

        if count < 10 {
            debug!("Only {} embedded rows, skipping IVF-flat index", count);
            return Ok(());
        }

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_kb_embedding_ivfflat \
             ON knowledge_base USING ivfflat (embedding vector_cosine_ops) \
             WHERE embedding IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;

        info!("IVF-flat cosine index ensured ({} embedded rows)", count);
        Ok(())
    }

    /// Rows awaiting sentiment enrichment: NULL score, content long enough
    /// to be scoreable, no older than `max_age_days`.
    pub async fn select_unsentimented(
        &self,
        max_age_days: i64,
        limit: i64,
    ) -> DataResult<Vec<KbEntry>> {
        let cutoff = Utc::now() - Duration::days(max_age_days);
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM knowledge_base \
             WHERE sentiment_score IS NULL AND length(content) >= 20 AND ts >= $1 \
             ORDER BY ts DESC LIMIT $2"
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(KbEntry::from_row).collect())
    }

    /// Rows awaiting an embedding backfill.
    pub async fn select_unembedded(&self, limit: i64) -> DataResult<Vec<KbEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM knowledge_base \
             WHERE embedding IS NULL AND length(content) > 0 \
             ORDER BY ts DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(KbEntry::from_row).collect())
    }

    /// Ripe events for outcome analysis: old enough, no outcome yet, and
    /// tied to a real instrument (macro sentinels carry no price anchor).
    pub async fn select_ripe(
        &self,
        days_after: i64,
        limit: i64,
        as_of: DateTime<Utc>,
    ) -> DataResult<Vec<KbEntry>> {
        let cutoff = as_of - Duration::days(days_after);
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM knowledge_base \
             WHERE outcome_json IS NULL AND ts <= $1 \
               AND ticker NOT IN ('MACRO', 'US_MACRO') \
             ORDER BY ts ASC LIMIT $2"
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(KbEntry::from_row).collect())
    }

    /// Most recent LLM-synthesised news timestamp per ticker, for cooldowns.
    pub async fn last_entry_ts_for_source(
        &self,
        ticker: &str,
        source: &str,
    ) -> DataResult<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT MAX(ts) AS last_ts FROM knowledge_base WHERE ticker = $1 AND source = $2",
        )
        .bind(ticker)
        .bind(source)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("last_ts"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_roundtrip() {
        for event_type in [
            EventType::News,
            EventType::Earnings,
            EventType::EconomicIndicator,
            EventType::FomcStatement,
            EventType::FomcSpeech,
            EventType::FomcMinutes,
            EventType::BoeStatement,
            EventType::EcbStatement,
            EventType::BojStatement,
            EventType::TradeSignal,
            EventType::Manual,
        ] {
            assert_eq!(EventType::parse(event_type.as_str()), event_type);
        }
        assert_eq!(EventType::parse("SOMETHING_ELSE"), EventType::News);
    }

    #[test]
    fn test_importance_roundtrip() {
        assert_eq!(Importance::parse("HIGH"), Importance::High);
        assert_eq!(Importance::parse("LOW"), Importance::Low);
        assert_eq!(Importance::parse("unknown"), Importance::Medium);
    }

    #[test]
    fn test_outcome_json_shape() {
        let outcome = EventOutcome {
            price_at_event: 300.0,
            price_after: 315.0,
            price_change_pct: 5.0,
            max_up_pct: 6.1,
            max_down_pct: -0.4,
            volatility_change_pct: Some(12.0),
            outcome: "POSITIVE".to_string(),
            sentiment_match: Some(true),
            days_after: 7,
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["outcome"], "POSITIVE");
        assert_eq!(value["days_after"], 7);
        let back: EventOutcome = serde_json::from_value(value).unwrap();
        assert_eq!(back, outcome);
    }
}
