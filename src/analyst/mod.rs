//! Analyst: fuses technicals, weighted news sentiment, similar-event
//! history, optional LLM guidance, and session context into one discrete
//! decision per ticker.
//!
//! The decision combination itself is a pure function over an
//! [`AnalysisSnapshot`]; only the data gathering touches the database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::data::{DataResult, QuoteStore};
use crate::kb::{KbEntry, KnowledgeBase};
use crate::providers::llm::{parse_json_reply, LlmRouter};
use crate::providers::QuoteProvider;
use crate::session::{premarket_context, session_phase, PremarketContext, SessionPhase};
use crate::strategy::{MarketState, Signal, StrategySelector};

/// Technical trend read: BUY only when price sits above the short average
/// while volatility is below its 20-day mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TechSignal {
    Buy,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryAdvice {
    Normal,
    Caution,
    Avoid,
}

/// What to do with a pre-market entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PremarketRecommendation {
    EnterNow,
    WaitOpen,
    LimitBelow(f64),
}

/// Aggregate of similar past events and how they resolved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimilarEventsPrior {
    pub events: usize,
    pub avg_price_change_pct: f64,
    /// Fraction of similar events that resolved POSITIVE.
    pub success_rate: f64,
    /// How much weight the prior deserves, scaled by sample size.
    pub confidence: f64,
}

/// Strict-JSON guidance from the LLM. Only the strategy label and
/// confidence are deferred to; the BUY/SELL mapping never is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmGuidance {
    pub strategy: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub entry_price: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
}

/// Everything the pure decision step needs, gathered up front.
#[derive(Debug, Clone)]
pub struct AnalysisSnapshot {
    pub ticker: String,
    pub bars_count: usize,
    pub state: MarketState,
    pub session: SessionPhase,
    pub premarket: Option<PremarketContext>,
}

/// The analyst's full answer for one ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub ticker: String,
    pub decision: Signal,
    pub regime: String,
    pub strategy_label: String,
    pub tech_signal: TechSignal,
    pub weighted_sentiment: f64,
    pub confidence: f64,
    pub entry_price: f64,
    pub stop_pct: Option<f64>,
    pub target_pct: Option<f64>,
    pub estimated_upside_pct_day: f64,
    pub suggested_take_profit_price: Option<f64>,
    pub entry_advice: EntryAdvice,
    pub premarket_recommendation: Option<PremarketRecommendation>,
    pub prior: Option<SimilarEventsPrior>,
    pub llm: Option<LlmGuidance>,
    pub reason: String,
}

/// Weighted news sentiment: weight 2.0 when the entry is about the ticker
/// (same ticker, or the symbol appears in the content), 1.0 for macro
/// entries, 0 otherwise. 0.5 when no scored news is in the window.
pub fn weighted_sentiment(entries: &[KbEntry], ticker: &str) -> f64 {
    let ticker_upper = ticker.to_uppercase();
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;

    for entry in entries {
        let Some(score) = entry.sentiment_score else {
            continue;
        };
        let mentions_ticker =
            entry.ticker == ticker || entry.content.to_uppercase().contains(&ticker_upper);
        let weight = if mentions_ticker {
            2.0
        } else if entry.is_macro() {
            1.0
        } else {
            0.0
        };
        weighted_sum += score * weight;
        total_weight += weight;
    }

    if total_weight > 0.0 {
        weighted_sum / total_weight
    } else {
        0.5
    }
}

/// BUY iff close > sma_5 and volatility_5 < avg_volatility_20; anything
/// missing or off-trend is HOLD.
pub fn technical_signal(state: &MarketState) -> TechSignal {
    match (state.sma_5, state.volatility_5, state.avg_volatility_20) {
        (Some(sma), Some(vol), Some(avg_vol))
            if state.close > sma && vol < avg_vol =>
        {
            TechSignal::Buy
        }
        _ => TechSignal::Hold,
    }
}

/// Map regime + technical signal + weighted sentiment to the final
/// decision. Mean reversion's bearish edge fires already below 0.5: in a
/// reverting market with no technical support, soft sentiment is a reason
/// to exit, not to wait for outright gloom.
pub fn combine_decision(regime: &str, tech: TechSignal, sentiment: f64) -> Signal {
    match regime {
        "Momentum" => {
            if tech == TechSignal::Buy && sentiment >= 0.7 {
                Signal::StrongBuy
            } else if tech == TechSignal::Buy && sentiment >= 0.5 {
                Signal::Buy
            } else {
                Signal::Hold
            }
        }
        "MeanReversion" => {
            if tech == TechSignal::Buy && sentiment >= 0.7 {
                Signal::Buy
            } else if tech == TechSignal::Hold && sentiment < 0.5 {
                Signal::Sell
            } else {
                Signal::Hold
            }
        }
        "VolatileGap" => {
            if tech == TechSignal::Buy && sentiment >= 0.7 {
                Signal::StrongBuy
            } else if tech == TechSignal::Buy && sentiment >= 0.5 {
                Signal::Buy
            } else if tech == TechSignal::Hold && sentiment < 0.3 {
                Signal::Sell
            } else {
                Signal::Hold
            }
        }
        _ => Signal::Hold,
    }
}

/// Pre-market gap advice: a gap beyond 2.5% warrants caution with a limit
/// below the prior close, beyond 5% the entry should wait for the open.
pub fn premarket_advice(
    premarket: Option<&PremarketContext>,
) -> (EntryAdvice, Option<PremarketRecommendation>) {
    let Some(context) = premarket else {
        return (EntryAdvice::Normal, None);
    };

    let gap = context.premarket_gap_pct.abs();
    if gap >= 5.0 {
        (EntryAdvice::Avoid, Some(PremarketRecommendation::WaitOpen))
    } else if gap > 2.5 {
        (
            EntryAdvice::Caution,
            Some(PremarketRecommendation::LimitBelow(context.prev_close)),
        )
    } else {
        (EntryAdvice::Normal, Some(PremarketRecommendation::EnterNow))
    }
}

/// Aggregate similar events into a prior over the expected move.
pub fn aggregate_prior(outcomes: &[(f64, &str)], searched_limit: usize) -> Option<SimilarEventsPrior> {
    if outcomes.is_empty() {
        return None;
    }
    let events = outcomes.len();
    let avg_price_change_pct =
        outcomes.iter().map(|(change, _)| change).sum::<f64>() / events as f64;
    let positive = outcomes
        .iter()
        .filter(|(_, label)| *label == "POSITIVE")
        .count();

    Some(SimilarEventsPrior {
        events,
        avg_price_change_pct,
        success_rate: positive as f64 / events as f64,
        confidence: (events as f64 / searched_limit.max(1) as f64).min(1.0),
    })
}

/// The pure decision step: everything after data gathering.
pub fn decide(snapshot: &AnalysisSnapshot, selector: &StrategySelector) -> Analysis {
    let state = &snapshot.state;
    let strategy_signal = selector.pick(state);
    let regime = strategy_signal.strategy;
    let tech = technical_signal(state);
    let decision = combine_decision(regime, tech, state.sentiment);
    let (entry_advice, premarket_recommendation) = premarket_advice(snapshot.premarket.as_ref());

    let estimated_upside_pct_day =
        strategy_signal.target_pct.unwrap_or(0.0) * strategy_signal.confidence;
    let suggested_take_profit_price = strategy_signal
        .target_pct
        .map(|target| state.close * (1.0 + target / 100.0));

    Analysis {
        ticker: snapshot.ticker.clone(),
        decision,
        regime: regime.to_string(),
        strategy_label: regime.to_string(),
        tech_signal: tech,
        weighted_sentiment: state.sentiment,
        confidence: strategy_signal.confidence,
        entry_price: state.close,
        stop_pct: strategy_signal.stop_pct,
        target_pct: strategy_signal.target_pct,
        estimated_upside_pct_day,
        suggested_take_profit_price,
        entry_advice,
        premarket_recommendation,
        prior: None,
        llm: None,
        reason: strategy_signal.reason,
    }
}

pub struct Analyst {
    pool: PgPool,
    quotes: Arc<QuoteStore>,
    kb: Arc<KnowledgeBase>,
    quote_provider: Arc<dyn QuoteProvider>,
    llm: Option<Arc<LlmRouter>>,
    selector: StrategySelector,
}

impl Analyst {
    pub fn new(
        pool: PgPool,
        quotes: Arc<QuoteStore>,
        kb: Arc<KnowledgeBase>,
        quote_provider: Arc<dyn QuoteProvider>,
        llm: Option<Arc<LlmRouter>>,
    ) -> Self {
        Self {
            pool,
            quotes,
            kb,
            quote_provider,
            llm,
            selector: StrategySelector::new(),
        }
    }

    /// Full analysis for one ticker as of `as_of`. Reads quotes and news,
    /// consults similar history, optionally asks the LLM, and combines.
    pub async fn analyze(
        &self,
        ticker: &str,
        use_llm: bool,
        as_of: DateTime<Utc>,
    ) -> DataResult<Analysis> {
        // 1. Technicals from the last 20 bars.
        let bars = self.quotes.last_bars(ticker, 20, as_of).await?;
        let latest = bars.last();

        let mut state = MarketState {
            close: latest.map(|b| b.close).unwrap_or_default(),
            sma_5: latest.and_then(|b| b.sma_5),
            volatility_5: latest.and_then(|b| b.volatility_5),
            avg_volatility_20: self.quotes.avg_volatility_20(ticker, as_of).await?,
            news_count: 0,
            has_macro_news: false,
            sentiment: 0.5,
        };

        // 2. Weighted sentiment from the news window.
        let news = self.kb.recent_news(ticker, as_of).await?;
        state.news_count = news.len();
        state.has_macro_news = news.iter().any(|entry| entry.is_macro());
        state.sentiment = weighted_sentiment(&news, ticker);

        // 3. Similar-event prior from the latest news for the ticker.
        let prior = match self.kb.latest_news_content(ticker, as_of).await? {
            Some(content) => {
                let similar = self
                    .kb
                    .similar_to(&content, None, 365, 5, 0.35, as_of)
                    .await?;
                let outcomes: Vec<(f64, &str)> = similar
                    .iter()
                    .filter_map(|event| {
                        event
                            .entry
                            .outcome
                            .as_ref()
                            .map(|o| (o.price_change_pct, o.outcome.as_str()))
                    })
                    .collect();
                aggregate_prior(&outcomes, 5)
            }
            None => None,
        };

        // 4. Session context; pre-market snapshot only in pre-market.
        let session = session_phase(as_of);
        let premarket = if session == SessionPhase::PreMarket {
            match premarket_context(self.quote_provider.as_ref(), ticker, as_of).await {
                Ok(context) => Some(context),
                Err(e) => {
                    warn!("Pre-market context unavailable for {}: {}", ticker, e);
                    None
                }
            }
        } else {
            None
        };

        let snapshot = AnalysisSnapshot {
            ticker: ticker.to_string(),
            bars_count: bars.len(),
            state,
            session,
            premarket,
        };

        let mut analysis = decide(&snapshot, &self.selector);
        analysis.prior = prior.clone();

        // 5. Optional LLM guidance: strategy label and confidence only.
        if use_llm {
            if let Some(router) = &self.llm {
                match self.ask_llm(router, &snapshot, prior.as_ref(), as_of).await {
                    Ok(Some(guidance)) => {
                        analysis.strategy_label = guidance.strategy.clone();
                        if guidance.confidence > 0.0 {
                            analysis.confidence = guidance.confidence.clamp(0.0, 1.0);
                        }
                        analysis.llm = Some(guidance);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("LLM guidance failed for {}: {}", ticker, e),
                }
            }
        }

        info!(
            ticker = %ticker,
            decision = %analysis.decision,
            regime = %analysis.regime,
            sentiment = %format!("{:.3}", analysis.weighted_sentiment),
            "Analysis complete"
        );
        Ok(analysis)
    }

    async fn ask_llm(
        &self,
        router: &LlmRouter,
        snapshot: &AnalysisSnapshot,
        prior: Option<&SimilarEventsPrior>,
        as_of: DateTime<Utc>,
    ) -> DataResult<Option<LlmGuidance>> {
        let system = "You are a trading strategy advisor. Reply with strict JSON only: \
                      {\"strategy\": \"Momentum|MeanReversion|VolatileGap|Hold\", \
                      \"reasoning\": str, \"confidence\": float 0..1, \
                      \"entry_price\": float|null, \"stop_loss\": float|null, \
                      \"take_profit\": float|null}";

        let state = &snapshot.state;
        let mut user = format!(
            "Instrument: {}\nClose: {:.2}\nSMA_5: {}\nVolatility_5: {}\nAvg volatility (20d): {}\n\
             Weighted news sentiment [0..1]: {:.3}\nNews in window: {}\nMacro news present: {}\n\
             Session phase: {}",
            snapshot.ticker,
            state.close,
            state.sma_5.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "n/a".into()),
            state.volatility_5.map(|v| format!("{:.3}", v)).unwrap_or_else(|| "n/a".into()),
            state.avg_volatility_20.map(|v| format!("{:.3}", v)).unwrap_or_else(|| "n/a".into()),
            state.sentiment,
            state.news_count,
            state.has_macro_news,
            snapshot.session.as_str(),
        );
        if let Some(prior) = prior {
            user.push_str(&format!(
                "\nSimilar past events: {} (avg move {:+.2}%, success rate {:.0}%)",
                prior.events,
                prior.avg_price_change_pct,
                prior.success_rate * 100.0
            ));
        }
        if let Some(premarket) = &snapshot.premarket {
            user.push_str(&format!(
                "\nPre-market gap: {:+.2}% (last {:.2} vs prev close {:.2})",
                premarket.premarket_gap_pct, premarket.premarket_last, premarket.prev_close
            ));
        }
        user.push_str("\n\nPick the strategy that fits, or Hold.");

        let reply = router.generate(system, &user, 512, 0.2).await?;

        // Comparison side-channel: same prompt to every secondary, results
        // stored per provider, never surfaced to the decision path.
        if !router.secondaries.is_empty() {
            let comparisons = router.compare(system, &user, 512, 0.2).await;
            for (provider, model, result) in comparisons {
                let (response, error) = match result {
                    Ok(r) => (
                        parse_json_reply::<serde_json::Value>(&r.text).ok(),
                        None,
                    ),
                    Err(e) => (None, Some(e)),
                };
                if let Err(e) = sqlx::query(
                    "INSERT INTO llm_comparison (ts, ticker, provider, model, response, error) \
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(as_of)
                .bind(&snapshot.ticker)
                .bind(&provider)
                .bind(&model)
                .bind(response)
                .bind(error)
                .execute(&self.pool)
                .await
                {
                    warn!("Failed to record LLM comparison for {}: {}", provider, e);
                }
            }
        }

        match parse_json_reply::<LlmGuidance>(&reply.text) {
            Ok(guidance) => {
                debug!(
                    "LLM guidance for {}: {} ({:.0}%)",
                    snapshot.ticker,
                    guidance.strategy,
                    guidance.confidence * 100.0
                );
                Ok(Some(guidance))
            }
            Err(e) => {
                warn!("LLM guidance unparseable: {}", e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb::{EventType, Importance};
    use chrono::Duration;

    fn entry(ticker: &str, content: &str, sentiment: Option<f64>, hours_ago: i64) -> KbEntry {
        KbEntry {
            id: 1,
            ts: Utc::now() - Duration::hours(hours_ago),
            ticker: ticker.to_string(),
            source: "test".to_string(),
            content: content.to_string(),
            event_type: EventType::News,
            importance: Importance::Medium,
            region: "USA".to_string(),
            link: None,
            sentiment_score: sentiment,
            insight: None,
            outcome: None,
        }
    }

    #[test]
    fn test_weighted_sentiment_default() {
        assert_eq!(weighted_sentiment(&[], "MSFT"), 0.5);
        // Unscored news contributes nothing.
        let unscored = vec![entry("MSFT", "headline", None, 1)];
        assert_eq!(weighted_sentiment(&unscored, "MSFT"), 0.5);
    }

    #[test]
    fn test_weighted_sentiment_ticker_weight() {
        // Ticker entry at 0.9 (weight 2), macro at 0.3 (weight 1):
        // (0.9*2 + 0.3*1) / 3 = 0.7
        let entries = vec![
            entry("MSFT", "Microsoft beats", Some(0.9), 2),
            entry("US_MACRO", "CPI above forecast", Some(0.3), 5),
        ];
        let ws = weighted_sentiment(&entries, "MSFT");
        assert!((ws - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_sentiment_symbol_mention_counts_double() {
        // A macro-tickered row that names the symbol gets ticker weight.
        let entries = vec![entry("US_MACRO", "Tariffs to hit MSFT suppliers", Some(0.2), 1)];
        let ws = weighted_sentiment(&entries, "MSFT");
        assert!((ws - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_sentiment_bounded() {
        let entries = vec![
            entry("MSFT", "MSFT up", Some(1.0), 1),
            entry("MACRO", "macro calm", Some(0.0), 1),
        ];
        let ws = weighted_sentiment(&entries, "MSFT");
        assert!((0.0..=1.0).contains(&ws));
    }

    #[test]
    fn test_technical_signal() {
        let buy = MarketState {
            close: 350.0,
            sma_5: Some(345.0),
            volatility_5: Some(2.5),
            avg_volatility_20: Some(3.0),
            ..Default::default()
        };
        assert_eq!(technical_signal(&buy), TechSignal::Buy);

        let below_sma = MarketState {
            close: 340.0,
            ..buy.clone()
        };
        assert_eq!(technical_signal(&below_sma), TechSignal::Hold);

        let missing = MarketState {
            close: 350.0,
            ..Default::default()
        };
        assert_eq!(technical_signal(&missing), TechSignal::Hold);
    }

    #[test]
    fn test_decision_table_momentum() {
        assert_eq!(combine_decision("Momentum", TechSignal::Buy, 0.8), Signal::StrongBuy);
        assert_eq!(combine_decision("Momentum", TechSignal::Buy, 0.6), Signal::Buy);
        assert_eq!(combine_decision("Momentum", TechSignal::Buy, 0.4), Signal::Hold);
        assert_eq!(combine_decision("Momentum", TechSignal::Hold, 0.8), Signal::Hold);
        assert_eq!(combine_decision("Momentum", TechSignal::Hold, 0.1), Signal::Hold);
    }

    #[test]
    fn test_decision_table_mean_reversion() {
        assert_eq!(combine_decision("MeanReversion", TechSignal::Buy, 0.8), Signal::Buy);
        assert_eq!(combine_decision("MeanReversion", TechSignal::Buy, 0.6), Signal::Hold);
        assert_eq!(combine_decision("MeanReversion", TechSignal::Hold, 0.45), Signal::Sell);
        assert_eq!(combine_decision("MeanReversion", TechSignal::Hold, 0.6), Signal::Hold);
    }

    #[test]
    fn test_decision_table_volatile_gap() {
        assert_eq!(combine_decision("VolatileGap", TechSignal::Buy, 0.85), Signal::StrongBuy);
        assert_eq!(combine_decision("VolatileGap", TechSignal::Buy, 0.55), Signal::Buy);
        assert_eq!(combine_decision("VolatileGap", TechSignal::Hold, 0.15), Signal::Sell);
        assert_eq!(combine_decision("VolatileGap", TechSignal::Hold, 0.5), Signal::Hold);
    }

    #[test]
    fn test_decision_table_neutral() {
        assert_eq!(combine_decision("Neutral", TechSignal::Buy, 0.9), Signal::Hold);
        assert_eq!(combine_decision("Neutral", TechSignal::Hold, 0.1), Signal::Hold);
    }

    fn premarket(gap: f64) -> PremarketContext {
        PremarketContext {
            ticker: "MSFT".to_string(),
            prev_close: 350.0,
            premarket_last: 350.0 * (1.0 + gap / 100.0),
            premarket_gap_pct: gap,
            minutes_until_open: Some(45),
        }
    }

    #[test]
    fn test_premarket_advice_thresholds() {
        let (advice, rec) = premarket_advice(Some(&premarket(2.86)));
        assert_eq!(advice, EntryAdvice::Caution);
        assert_eq!(rec, Some(PremarketRecommendation::LimitBelow(350.0)));

        let (advice, rec) = premarket_advice(Some(&premarket(5.0)));
        assert_eq!(advice, EntryAdvice::Avoid);
        assert_eq!(rec, Some(PremarketRecommendation::WaitOpen));

        let (advice, rec) = premarket_advice(Some(&premarket(-6.0)));
        assert_eq!(advice, EntryAdvice::Avoid);
        assert_eq!(rec, Some(PremarketRecommendation::WaitOpen));

        let (advice, rec) = premarket_advice(Some(&premarket(1.0)));
        assert_eq!(advice, EntryAdvice::Normal);
        assert_eq!(rec, Some(PremarketRecommendation::EnterNow));

        let (advice, rec) = premarket_advice(None);
        assert_eq!(advice, EntryAdvice::Normal);
        assert_eq!(rec, None);
    }

    #[test]
    fn test_aggregate_prior() {
        let outcomes = vec![(5.0, "POSITIVE"), (3.0, "POSITIVE"), (-1.0, "NEUTRAL")];
        let prior = aggregate_prior(&outcomes, 5).unwrap();
        assert_eq!(prior.events, 3);
        assert!((prior.avg_price_change_pct - 7.0 / 3.0).abs() < 1e-9);
        assert!((prior.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((prior.confidence - 0.6).abs() < 1e-9);

        assert!(aggregate_prior(&[], 5).is_none());
    }

    fn snapshot(state: MarketState) -> AnalysisSnapshot {
        AnalysisSnapshot {
            ticker: "MSFT".to_string(),
            bars_count: 20,
            state,
            session: SessionPhase::Regular,
            premarket: None,
        }
    }

    #[test]
    fn test_momentum_strong_buy_end_to_end() {
        // Seed scenario 1: MSFT at 350 over SMA 345, calm volatility,
        // sentiment 0.80 from a 2h-old ticker item.
        let entries = vec![entry("MSFT", "Microsoft launches new AI tier", Some(0.80), 2)];
        let state = MarketState {
            close: 350.0,
            sma_5: Some(345.0),
            volatility_5: Some(2.5),
            avg_volatility_20: Some(3.0),
            news_count: entries.len(),
            has_macro_news: false,
            sentiment: weighted_sentiment(&entries, "MSFT"),
        };
        let analysis = decide(&snapshot(state), &StrategySelector::new());

        assert_eq!(analysis.regime, "Momentum");
        assert_eq!(analysis.decision, Signal::StrongBuy);
        assert_eq!(analysis.stop_pct, Some(3.0));
        assert_eq!(analysis.target_pct, Some(8.0));
        assert!((analysis.suggested_take_profit_price.unwrap() - 378.0).abs() < 1e-9);
        assert!(analysis.estimated_upside_pct_day > 0.0);
    }

    #[test]
    fn test_mean_reversion_sell_end_to_end() {
        // Seed scenario 2: TER 4% below SMA, elevated volatility,
        // sentiment 0.45 -> MeanReversion with tech HOLD sells.
        let state = MarketState {
            close: 120.0,
            sma_5: Some(125.0),
            volatility_5: Some(4.0),
            avg_volatility_20: Some(2.5),
            news_count: 1,
            has_macro_news: false,
            sentiment: 0.45,
        };
        let analysis = decide(&snapshot(state), &StrategySelector::new());

        assert_eq!(analysis.regime, "MeanReversion");
        assert_eq!(analysis.tech_signal, TechSignal::Hold);
        assert_eq!(analysis.decision, Signal::Sell);
    }

    #[test]
    fn test_volatile_gap_sell_on_macro_shock() {
        // Seed scenario 3: bearish FOMC statement 30 minutes ago.
        let entries = vec![{
            let mut e = entry("US_MACRO", "FOMC signals higher for longer", Some(0.15), 0);
            e.event_type = EventType::FomcStatement;
            e
        }];
        let state = MarketState {
            close: 100.0,
            sma_5: Some(100.5),
            volatility_5: Some(6.0),
            avg_volatility_20: Some(3.0),
            news_count: entries.len(),
            has_macro_news: true,
            sentiment: weighted_sentiment(&entries, "SNDK"),
        };
        let analysis = decide(&snapshot(state), &StrategySelector::new());

        assert_eq!(analysis.regime, "VolatileGap");
        assert_eq!(analysis.decision, Signal::Sell);
        assert_eq!(analysis.stop_pct, Some(7.0));
        assert_eq!(analysis.target_pct, Some(12.0));
    }

    #[test]
    fn test_short_history_holds() {
        // Fewer than 5 bars: no SMA/volatility, Neutral regime, HOLD.
        let state = MarketState {
            close: 100.0,
            sentiment: 0.9,
            ..Default::default()
        };
        let mut snap = snapshot(state);
        snap.bars_count = 3;
        let analysis = decide(&snap, &StrategySelector::new());
        assert_eq!(analysis.regime, "Neutral");
        assert_eq!(analysis.decision, Signal::Hold);
    }
}
