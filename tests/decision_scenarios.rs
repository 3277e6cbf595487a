//! End-to-end decision scenarios over the pure pipeline: market state in,
//! decision and risk parameters out, plus the sizing arithmetic the
//! executor applies.

use tradewinds::analyst::{
    decide, premarket_advice, weighted_sentiment, AnalysisSnapshot, EntryAdvice,
    PremarketRecommendation, TechSignal,
};
use tradewinds::enrich::outcomes::compute_outcome;
use tradewinds::kb::{EventType, Importance, KbEntry};
use tradewinds::session::{PremarketContext, SessionPhase};
use tradewinds::strategy::{MarketState, Signal, StrategySelector};
use tradewinds::QuoteBar;

use chrono::{Duration, NaiveDate, Utc};

fn news(ticker: &str, content: &str, sentiment: f64, hours_ago: i64) -> KbEntry {
    KbEntry {
        id: 0,
        ts: Utc::now() - Duration::hours(hours_ago),
        ticker: ticker.to_string(),
        source: "test".to_string(),
        content: content.to_string(),
        event_type: EventType::News,
        importance: Importance::Medium,
        region: "USA".to_string(),
        link: None,
        sentiment_score: Some(sentiment),
        insight: None,
        outcome: None,
    }
}

fn snapshot(ticker: &str, state: MarketState) -> AnalysisSnapshot {
    AnalysisSnapshot {
        ticker: ticker.to_string(),
        bars_count: 20,
        state,
        session: SessionPhase::Regular,
        premarket: None,
    }
}

#[test]
fn momentum_buy_scenario() {
    // MSFT: 20 bars ending close=350, sma_5=345, vol_5=2.5, avg_vol_20=3.0,
    // one 2h-old MSFT item at 0.80.
    let items = vec![news("MSFT", "Microsoft guidance raised", 0.80, 2)];
    let sentiment = weighted_sentiment(&items, "MSFT");
    assert!((sentiment - 0.80).abs() < 1e-9);

    let state = MarketState {
        close: 350.0,
        sma_5: Some(345.0),
        volatility_5: Some(2.5),
        avg_volatility_20: Some(3.0),
        news_count: items.len(),
        has_macro_news: false,
        sentiment,
    };

    let analysis = decide(&snapshot("MSFT", state), &StrategySelector::new());
    assert_eq!(analysis.regime, "Momentum");
    assert_eq!(analysis.decision, Signal::StrongBuy);
    assert_eq!(analysis.stop_pct, Some(3.0));
    assert_eq!(analysis.target_pct, Some(8.0));

    // Executor sizing: floor(capital * 1.0 / price), cash debited with
    // commission on top.
    let capital: f64 = 100_000.0;
    let commission_rate = 0.001;
    let qty = (capital / 350.0).floor();
    assert_eq!(qty, 285.0);
    let cash_delta = qty * 350.0 * (1.0 + commission_rate);
    assert!((cash_delta - 99_849.75).abs() < 1e-6);
    assert!(cash_delta <= capital);
}

#[test]
fn mean_reversion_sell_scenario() {
    // TER: close=120 vs sma=125 (-4%), vol 4.0 > avg 2.5, sentiment 0.45.
    let state = MarketState {
        close: 120.0,
        sma_5: Some(125.0),
        volatility_5: Some(4.0),
        avg_volatility_20: Some(2.5),
        news_count: 1,
        has_macro_news: false,
        sentiment: 0.45,
    };

    let analysis = decide(&snapshot("TER", state), &StrategySelector::new());
    assert_eq!(analysis.regime, "MeanReversion");
    assert_eq!(analysis.tech_signal, TechSignal::Hold);
    assert_eq!(analysis.decision, Signal::Sell);
}

#[test]
fn volatile_gap_macro_scenario() {
    // A bearish FOMC statement 30 minutes old, volatility at 2x average.
    let mut fomc = news("US_MACRO", "FOMC statement surprises hawkish", 0.15, 0);
    fomc.event_type = EventType::FomcStatement;
    let items = vec![fomc];

    let sentiment = weighted_sentiment(&items, "SNDK");
    let state = MarketState {
        close: 100.0,
        sma_5: Some(100.2),
        volatility_5: Some(6.0),
        avg_volatility_20: Some(3.0),
        news_count: items.len(),
        has_macro_news: true,
        sentiment,
    };

    let analysis = decide(&snapshot("SNDK", state), &StrategySelector::new());
    assert_eq!(analysis.regime, "VolatileGap");
    assert_eq!(analysis.decision, Signal::Sell);
    assert_eq!(analysis.stop_pct, Some(7.0));
    assert_eq!(analysis.target_pct, Some(12.0));
}

#[test]
fn premarket_gap_advice_scenario() {
    // last=360 vs prev_close=350: +2.857% -> caution with a limit below.
    let caution = PremarketContext {
        ticker: "MSFT".to_string(),
        prev_close: 350.0,
        premarket_last: 360.0,
        premarket_gap_pct: (360.0 - 350.0) / 350.0 * 100.0,
        minutes_until_open: Some(45),
    };
    let (advice, recommendation) = premarket_advice(Some(&caution));
    assert_eq!(advice, EntryAdvice::Caution);
    assert_eq!(
        recommendation,
        Some(PremarketRecommendation::LimitBelow(350.0))
    );

    // +5% instead -> avoid, wait for the open.
    let avoid = PremarketContext {
        premarket_last: 367.5,
        premarket_gap_pct: 5.0,
        ..caution
    };
    let (advice, recommendation) = premarket_advice(Some(&avoid));
    assert_eq!(advice, EntryAdvice::Avoid);
    assert_eq!(recommendation, Some(PremarketRecommendation::WaitOpen));
}

#[test]
fn outcome_analysis_scenario() {
    // Event 2025-03-10 at 300, close 315 a week later: +5%, POSITIVE,
    // bullish sentiment called it.
    fn bar(date: &str, close: f64) -> QuoteBar {
        QuoteBar {
            ticker: "MSFT".to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            close,
            volume: 0,
            sma_5: None,
            volatility_5: None,
            rsi: None,
        }
    }

    let event_bar = bar("2025-03-10", 300.0);
    let interval = vec![
        bar("2025-03-11", 305.0),
        bar("2025-03-13", 296.0),
        bar("2025-03-17", 315.0),
    ];

    let outcome = compute_outcome(&event_bar, &interval, Some(0.80), 7).unwrap();
    assert!((outcome.price_change_pct - 5.0).abs() < 1e-9);
    assert_eq!(outcome.outcome, "POSITIVE");
    assert_eq!(outcome.sentiment_match, Some(true));
}

#[test]
fn weighted_sentiment_stays_bounded() {
    // Law: weighted sentiment lies in [0,1] for any scored window.
    let windows = vec![
        vec![],
        vec![news("MSFT", "MSFT soars", 1.0, 1)],
        vec![
            news("MSFT", "MSFT slides", 0.0, 1),
            news("MACRO", "calm markets", 1.0, 10),
            news("US_MACRO", "mixed data", 0.5, 20),
        ],
        vec![news("OTHER", "unrelated stock pops", 0.9, 1)],
    ];

    for window in windows {
        let ws = weighted_sentiment(&window, "MSFT");
        assert!((0.0..=1.0).contains(&ws), "out of bounds: {}", ws);
    }
}

#[test]
fn zero_news_defaults_to_neutral_sentiment() {
    assert_eq!(weighted_sentiment(&[], "MSFT"), 0.5);

    // Momentum needs sentiment >= 0.55, so the neutral default falls
    // through to Neutral even in a calm uptrend.
    let state = MarketState {
        close: 350.0,
        sma_5: Some(345.0),
        volatility_5: Some(2.5),
        avg_volatility_20: Some(3.0),
        news_count: 0,
        has_macro_news: false,
        sentiment: 0.5,
    };
    let analysis = decide(&snapshot("MSFT", state), &StrategySelector::new());
    assert_eq!(analysis.regime, "Neutral");
    assert_eq!(analysis.decision, Signal::Hold);
}
