//! Outcome analyzer
//! For each ripe event, anchors the price at the event date and at
//! `days_after` later (nearest trading day forward), computes the move and
//! its extremes, classifies the outcome, and records whether the stored
//! sentiment called the direction.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::data::{DataResult, QuoteBar, QuoteStore};
use crate::kb::{EventOutcome, KnowledgeBase};

/// Thresholds for classifying the post-event move, in percent.
const POSITIVE_THRESHOLD_PCT: f64 = 2.0;
const NEGATIVE_THRESHOLD_PCT: f64 = -2.0;

pub fn classify_outcome(price_change_pct: f64) -> &'static str {
    if price_change_pct >= POSITIVE_THRESHOLD_PCT {
        "POSITIVE"
    } else if price_change_pct <= NEGATIVE_THRESHOLD_PCT {
        "NEGATIVE"
    } else {
        "NEUTRAL"
    }
}

/// Pure outcome computation over the interval bars. `event_bar` is the
/// first bar at or after the event; `interval` holds the bars after it up
/// to the horizon, oldest first. Returns None when the interval is empty.
pub fn compute_outcome(
    event_bar: &QuoteBar,
    interval: &[QuoteBar],
    sentiment: Option<f64>,
    days_after: i64,
) -> Option<EventOutcome> {
    let final_bar = interval.last()?;
    let event_price = event_bar.close;
    if event_price <= 0.0 {
        return None;
    }

    let price_change_pct = (final_bar.close - event_price) / event_price * 100.0;

    let mut max_up_pct = f64::MIN;
    let mut max_down_pct = f64::MAX;
    for bar in interval {
        let change = (bar.close - event_price) / event_price * 100.0;
        max_up_pct = max_up_pct.max(change);
        max_down_pct = max_down_pct.min(change);
    }

    let volatility_change_pct = match event_bar.volatility_5 {
        Some(event_vol) if event_vol > 0.0 => {
            let after: Vec<f64> = interval.iter().filter_map(|b| b.volatility_5).collect();
            if after.is_empty() {
                None
            } else {
                let avg_after = after.iter().sum::<f64>() / after.len() as f64;
                Some((avg_after - event_vol) / event_vol * 100.0)
            }
        }
        _ => None,
    };

    let sentiment_match =
        sentiment.map(|score| (score > 0.5) == (price_change_pct > 0.0));

    Some(EventOutcome {
        price_at_event: event_price,
        price_after: final_bar.close,
        price_change_pct,
        max_up_pct,
        max_down_pct,
        volatility_change_pct,
        outcome: classify_outcome(price_change_pct).to_string(),
        sentiment_match,
        days_after,
    })
}

pub struct OutcomeAnalyzer {
    kb: Arc<KnowledgeBase>,
    quotes: Arc<QuoteStore>,
}

#[derive(Debug, Default)]
pub struct OutcomeReport {
    pub analyzed: usize,
    pub skipped: usize,
}

impl OutcomeAnalyzer {
    pub fn new(kb: Arc<KnowledgeBase>, quotes: Arc<QuoteStore>) -> Self {
        Self { kb, quotes }
    }

    /// Analyze events older than `days_after` that have no outcome yet.
    /// Events whose anchor quotes are missing are skipped and retried by
    /// the next scheduled sweep.
    pub async fn analyze_ripe_events(
        &self,
        days_after: i64,
        limit: i64,
        as_of: DateTime<Utc>,
    ) -> DataResult<OutcomeReport> {
        let ripe = self.kb.select_ripe(days_after, limit, as_of).await?;
        if ripe.is_empty() {
            return Ok(OutcomeReport::default());
        }
        info!("Analyzing outcomes for {} ripe events", ripe.len());

        let mut report = OutcomeReport::default();
        for event in ripe {
            let event_date = event.ts.date_naive();

            let Some(event_bar) = self
                .quotes
                .first_bar_at_or_after(&event.ticker, event_date)
                .await?
            else {
                debug!("No anchor quote for {} at {}, skipping", event.ticker, event_date);
                report.skipped += 1;
                continue;
            };

            let horizon = event_date + Duration::days(days_after);
            let interval = self
                .quotes
                .bars_between(&event.ticker, event_bar.date, horizon)
                .await?;

            match compute_outcome(&event_bar, &interval, event.sentiment_score, days_after) {
                Some(outcome) => {
                    if self.kb.update_outcome(event.id, &outcome).await? {
                        report.analyzed += 1;
                        debug!(
                            "Event {} ({}): {:+.2}% -> {}",
                            event.id, event.ticker, outcome.price_change_pct, outcome.outcome
                        );
                    }
                }
                None => {
                    debug!(
                        "No quotes after event {} for {}, skipping",
                        event.id, event.ticker
                    );
                    report.skipped += 1;
                }
            }
        }

        info!(
            "Outcome analysis done: {} analyzed, {} skipped",
            report.analyzed, report.skipped
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(date: &str, close: f64, volatility: Option<f64>) -> QuoteBar {
        QuoteBar {
            ticker: "MSFT".to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            close,
            volume: 1_000_000,
            sma_5: None,
            volatility_5: volatility,
            rsi: None,
        }
    }

    #[test]
    fn test_classification_thresholds() {
        assert_eq!(classify_outcome(5.0), "POSITIVE");
        assert_eq!(classify_outcome(2.0), "POSITIVE");
        assert_eq!(classify_outcome(1.9), "NEUTRAL");
        assert_eq!(classify_outcome(-1.9), "NEUTRAL");
        assert_eq!(classify_outcome(-2.0), "NEGATIVE");
        assert_eq!(classify_outcome(-8.0), "NEGATIVE");
    }

    #[test]
    fn test_positive_outcome_with_matching_sentiment() {
        // Event at 2025-03-10 close 300, a week later 315: +5%.
        let event_bar = bar("2025-03-10", 300.0, Some(2.0));
        let interval = vec![
            bar("2025-03-11", 303.0, Some(2.1)),
            bar("2025-03-12", 298.0, Some(2.4)),
            bar("2025-03-17", 315.0, Some(2.5)),
        ];

        let outcome = compute_outcome(&event_bar, &interval, Some(0.80), 7).unwrap();
        assert!((outcome.price_change_pct - 5.0).abs() < 1e-9);
        assert_eq!(outcome.outcome, "POSITIVE");
        assert_eq!(outcome.sentiment_match, Some(true));
        assert_eq!(outcome.price_at_event, 300.0);
        assert_eq!(outcome.price_after, 315.0);
        assert!((outcome.max_up_pct - 5.0).abs() < 1e-9);
        assert!((outcome.max_down_pct - (-2.0 / 3.0)).abs() < 1e-6);
        assert_eq!(outcome.days_after, 7);
    }

    #[test]
    fn test_bearish_sentiment_mismatch() {
        let event_bar = bar("2025-03-10", 100.0, None);
        let interval = vec![bar("2025-03-14", 104.0, None)];
        let outcome = compute_outcome(&event_bar, &interval, Some(0.2), 4).unwrap();
        assert_eq!(outcome.outcome, "POSITIVE");
        assert_eq!(outcome.sentiment_match, Some(false));
    }

    #[test]
    fn test_unknown_sentiment_leaves_match_null() {
        let event_bar = bar("2025-03-10", 100.0, None);
        let interval = vec![bar("2025-03-14", 100.5, None)];
        let outcome = compute_outcome(&event_bar, &interval, None, 4).unwrap();
        assert_eq!(outcome.sentiment_match, None);
        assert_eq!(outcome.outcome, "NEUTRAL");
    }

    #[test]
    fn test_empty_interval_skips() {
        let event_bar = bar("2025-03-10", 100.0, None);
        assert!(compute_outcome(&event_bar, &[], Some(0.5), 7).is_none());
    }

    #[test]
    fn test_volatility_change() {
        let event_bar = bar("2025-03-10", 100.0, Some(2.0));
        let interval = vec![
            bar("2025-03-11", 101.0, Some(3.0)),
            bar("2025-03-12", 102.0, Some(3.0)),
        ];
        let outcome = compute_outcome(&event_bar, &interval, None, 2).unwrap();
        assert!((outcome.volatility_change_pct.unwrap() - 50.0).abs() < 1e-9);
    }
}
