//! Mean-reversion regime: fade a stretched move when volatility is elevated
//! and the news flow is not taking a side.

use super::{MarketState, Signal, Strategy, StrategySignal};

pub struct MeanReversion;

impl Strategy for MeanReversion {
    fn name(&self) -> &'static str {
        "MeanReversion"
    }

    fn is_suitable(&self, state: &MarketState) -> bool {
        let Some((close, sma, vol, avg_vol)) = state.technicals() else {
            return false;
        };
        let stretch = (close - sma).abs() / sma;
        stretch > 0.02 && vol > avg_vol && (0.30..=0.70).contains(&state.sentiment)
    }

    fn calculate_signal(&self, state: &MarketState) -> StrategySignal {
        let sma = state.sma_5.unwrap_or(state.close);
        let deviation_pct = if sma > 0.0 {
            (state.close - sma) / sma * 100.0
        } else {
            0.0
        };

        // Below the mean: a bounce candidate. Above it: stretched, no entry.
        let (signal, confidence) = if deviation_pct < -2.0 {
            (Signal::Buy, (0.5 + deviation_pct.abs() / 20.0).min(0.75))
        } else {
            (Signal::Hold, 0.4)
        };

        StrategySignal {
            strategy: self.name(),
            signal,
            confidence,
            entry_price: state.close,
            stop_pct: Some(5.0),
            target_pct: Some(4.0),
            reason: format!(
                "price {:.2} stretched {:+.2}% from SMA_5 {:.2} with elevated volatility",
                state.close, deviation_pct, sma
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_state() -> MarketState {
        MarketState {
            close: 120.0,
            sma_5: Some(125.0),
            volatility_5: Some(4.0),
            avg_volatility_20: Some(2.5),
            news_count: 1,
            has_macro_news: false,
            sentiment: 0.45,
        }
    }

    #[test]
    fn test_suitable_when_stretched_and_volatile() {
        assert!(MeanReversion.is_suitable(&base_state()));
    }

    #[test]
    fn test_not_suitable_near_mean() {
        let mut state = base_state();
        state.close = 124.0; // 0.8% from SMA
        assert!(!MeanReversion.is_suitable(&state));
    }

    #[test]
    fn test_not_suitable_with_extreme_sentiment() {
        let mut state = base_state();
        state.sentiment = 0.85;
        assert!(!MeanReversion.is_suitable(&state));
        state.sentiment = 0.20;
        assert!(!MeanReversion.is_suitable(&state));
    }

    #[test]
    fn test_buy_below_mean_hold_above() {
        let below = MeanReversion.calculate_signal(&base_state());
        assert_eq!(below.signal, Signal::Buy);

        let mut above = base_state();
        above.close = 130.0;
        let signal = MeanReversion.calculate_signal(&above);
        assert_eq!(signal.signal, Signal::Hold);
    }
}
