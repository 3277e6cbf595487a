//! Trading regimes and the regime selector
//! Each regime is a stateless unit struct behind a common trait; the
//! selector evaluates them in a fixed order and the first suitable regime
//! wins, falling back to Neutral (hold everything).

pub mod mean_reversion;
pub mod momentum;
pub mod neutral;
pub mod volatile_gap;

pub use mean_reversion::MeanReversion;
pub use momentum::Momentum;
pub use neutral::Neutral;
pub use volatile_gap::VolatileGap;

use serde::{Deserialize, Serialize};

/// Discrete trade signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    StrongBuy,
    Buy,
    Hold,
    Sell,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::StrongBuy => "STRONG_BUY",
            Signal::Buy => "BUY",
            Signal::Hold => "HOLD",
            Signal::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Market snapshot a regime decides on. Sentiment is the weighted [0,1]
/// news score; indicator fields are None when history is too short.
#[derive(Debug, Clone, Default)]
pub struct MarketState {
    pub close: f64,
    pub sma_5: Option<f64>,
    pub volatility_5: Option<f64>,
    pub avg_volatility_20: Option<f64>,
    pub news_count: usize,
    pub has_macro_news: bool,
    pub sentiment: f64,
}

impl MarketState {
    /// All four technical inputs present.
    fn technicals(&self) -> Option<(f64, f64, f64, f64)> {
        match (self.sma_5, self.volatility_5, self.avg_volatility_20) {
            (Some(sma), Some(vol), Some(avg_vol)) if self.close > 0.0 && sma > 0.0 => {
                Some((self.close, sma, vol, avg_vol))
            }
            _ => None,
        }
    }
}

/// Signal a regime produces, with its risk parameters.
#[derive(Debug, Clone, Serialize)]
pub struct StrategySignal {
    pub strategy: &'static str,
    pub signal: Signal,
    pub confidence: f64,
    pub entry_price: f64,
    /// Stop distance in percent below entry; None for Neutral.
    pub stop_pct: Option<f64>,
    /// Target distance in percent above entry; None for Neutral.
    pub target_pct: Option<f64>,
    pub reason: String,
}

/// A trading regime: a suitability predicate plus a signal calculation.
/// Implementations hold no mutable state.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_suitable(&self, state: &MarketState) -> bool;
    fn calculate_signal(&self, state: &MarketState) -> StrategySignal;
}

/// Evaluate regimes in declaration order; first match wins. Adding a
/// regime means adding it to this list, nothing else changes.
pub struct StrategySelector {
    strategies: Vec<Box<dyn Strategy>>,
    neutral: Neutral,
}

impl StrategySelector {
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(Momentum),
                Box::new(MeanReversion),
                Box::new(VolatileGap),
            ],
            neutral: Neutral,
        }
    }

    pub fn select(&self, state: &MarketState) -> &dyn Strategy {
        for strategy in &self.strategies {
            if strategy.is_suitable(state) {
                return strategy.as_ref();
            }
        }
        &self.neutral
    }

    /// Convenience: pick the regime and compute its signal in one step.
    pub fn pick(&self, state: &MarketState) -> StrategySignal {
        let strategy = self.select(state);
        tracing::debug!(strategy = strategy.name(), "Regime selected");
        strategy.calculate_signal(state)
    }

    /// Stop/target percentages for a regime by journal name, used when an
    /// exit must honor the entry-time strategy.
    pub fn risk_params_for(&self, strategy_name: &str) -> Option<(f64, f64)> {
        match strategy_name {
            "Momentum" => Some((3.0, 8.0)),
            "MeanReversion" => Some((5.0, 4.0)),
            "VolatileGap" => Some((7.0, 12.0)),
            _ => None,
        }
    }
}

impl Default for StrategySelector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(close: f64, sma: f64, vol: f64, avg_vol: f64, sentiment: f64) -> MarketState {
        MarketState {
            close,
            sma_5: Some(sma),
            volatility_5: Some(vol),
            avg_volatility_20: Some(avg_vol),
            news_count: 1,
            has_macro_news: false,
            sentiment,
        }
    }

    #[test]
    fn test_momentum_selected_first() {
        // Uptrend, calm volatility, positive sentiment
        let s = state(350.0, 345.0, 2.5, 3.0, 0.80);
        let selector = StrategySelector::new();
        assert_eq!(selector.select(&s).name(), "Momentum");
        let signal = selector.pick(&s);
        assert_eq!(signal.stop_pct, Some(3.0));
        assert_eq!(signal.target_pct, Some(8.0));
    }

    #[test]
    fn test_mean_reversion_on_stretched_price() {
        // 4% below SMA, elevated volatility, neutral sentiment
        let s = state(120.0, 125.0, 4.0, 2.5, 0.45);
        let selector = StrategySelector::new();
        assert_eq!(selector.select(&s).name(), "MeanReversion");
        let signal = selector.pick(&s);
        assert_eq!(signal.stop_pct, Some(5.0));
        assert_eq!(signal.target_pct, Some(4.0));
    }

    #[test]
    fn test_volatile_gap_on_macro_shock() {
        let mut s = state(100.0, 100.5, 6.0, 3.0, 0.15);
        s.has_macro_news = true;
        let selector = StrategySelector::new();
        assert_eq!(selector.select(&s).name(), "VolatileGap");
        let signal = selector.pick(&s);
        assert_eq!(signal.stop_pct, Some(7.0));
        assert_eq!(signal.target_pct, Some(12.0));
    }

    #[test]
    fn test_neutral_fallback() {
        // Nothing matches: downtrend, calm vol, mid sentiment
        let s = state(100.0, 101.0, 2.0, 3.0, 0.50);
        let selector = StrategySelector::new();
        assert_eq!(selector.select(&s).name(), "Neutral");
        let signal = selector.pick(&s);
        assert_eq!(signal.signal, Signal::Hold);
        assert_eq!(signal.stop_pct, None);
    }

    #[test]
    fn test_missing_indicators_fall_to_neutral() {
        let s = MarketState {
            close: 100.0,
            sentiment: 0.9,
            ..Default::default()
        };
        let selector = StrategySelector::new();
        assert_eq!(selector.select(&s).name(), "Neutral");
    }

    #[test]
    fn test_first_match_tiebreak_order() {
        // Qualifies for both MeanReversion (stretched, volatile, mid
        // sentiment) and VolatileGap (2x volatility with macro news).
        let mut s = state(97.0, 100.0, 6.0, 3.0, 0.50);
        s.has_macro_news = true;
        let selector = StrategySelector::new();
        assert!(MeanReversion.is_suitable(&s));
        assert!(VolatileGap.is_suitable(&s));
        // MeanReversion is evaluated earlier and wins the tie.
        assert_eq!(selector.select(&s).name(), "MeanReversion");
    }
}
