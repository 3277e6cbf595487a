//! Momentum regime: ride an established uptrend while volatility stays calm
//! and the news flow supports it.

use super::{MarketState, Signal, Strategy, StrategySignal};

pub struct Momentum;

impl Strategy for Momentum {
    fn name(&self) -> &'static str {
        "Momentum"
    }

    fn is_suitable(&self, state: &MarketState) -> bool {
        let Some((close, sma, vol, avg_vol)) = state.technicals() else {
            return false;
        };
        close > sma && vol <= avg_vol && state.sentiment >= 0.55
    }

    fn calculate_signal(&self, state: &MarketState) -> StrategySignal {
        let sma = state.sma_5.unwrap_or(state.close);
        let deviation_pct = if sma > 0.0 {
            (state.close - sma) / sma * 100.0
        } else {
            0.0
        };

        // Stronger trends carry more conviction, capped well below certainty.
        let (signal, confidence) = if deviation_pct > 2.0 && state.sentiment >= 0.7 {
            (Signal::StrongBuy, (0.6 + deviation_pct / 10.0).min(0.9))
        } else if deviation_pct > 0.0 && state.sentiment >= 0.55 {
            (Signal::Buy, (0.5 + deviation_pct / 10.0).min(0.8))
        } else {
            (Signal::Hold, 0.4)
        };

        StrategySignal {
            strategy: self.name(),
            signal,
            confidence,
            entry_price: state.close,
            stop_pct: Some(3.0),
            target_pct: Some(8.0),
            reason: format!(
                "price {:.2} above SMA_5 {:.2} ({:+.2}%), volatility calm, sentiment {:.2}",
                state.close, sma, deviation_pct, state.sentiment
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_state() -> MarketState {
        MarketState {
            close: 350.0,
            sma_5: Some(345.0),
            volatility_5: Some(2.5),
            avg_volatility_20: Some(3.0),
            news_count: 1,
            has_macro_news: false,
            sentiment: 0.80,
        }
    }

    #[test]
    fn test_suitable_in_calm_uptrend() {
        assert!(Momentum.is_suitable(&base_state()));
    }

    #[test]
    fn test_not_suitable_below_sma() {
        let mut state = base_state();
        state.close = 340.0;
        assert!(!Momentum.is_suitable(&state));
    }

    #[test]
    fn test_not_suitable_when_volatility_elevated() {
        let mut state = base_state();
        state.volatility_5 = Some(3.5);
        assert!(!Momentum.is_suitable(&state));
    }

    #[test]
    fn test_not_suitable_with_weak_sentiment() {
        let mut state = base_state();
        state.sentiment = 0.50;
        assert!(!Momentum.is_suitable(&state));
    }

    #[test]
    fn test_signal_carries_regime_risk_params() {
        let signal = Momentum.calculate_signal(&base_state());
        assert_eq!(signal.stop_pct, Some(3.0));
        assert_eq!(signal.target_pct, Some(8.0));
        assert_eq!(signal.entry_price, 350.0);
        assert!(signal.confidence > 0.0 && signal.confidence <= 1.0);
    }
}
