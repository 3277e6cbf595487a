//! Volatile-gap regime: volatility well above its average with a macro
//! catalyst or extreme sentiment. Wide stop, wide target.

use super::{MarketState, Signal, Strategy, StrategySignal};

pub struct VolatileGap;

impl Strategy for VolatileGap {
    fn name(&self) -> &'static str {
        "VolatileGap"
    }

    fn is_suitable(&self, state: &MarketState) -> bool {
        let Some((_, _, vol, avg_vol)) = state.technicals() else {
            return false;
        };
        let extreme_sentiment = state.sentiment > 0.8 || state.sentiment < 0.2;
        vol > 1.5 * avg_vol && (state.has_macro_news || extreme_sentiment)
    }

    fn calculate_signal(&self, state: &MarketState) -> StrategySignal {
        let vol_ratio = match (state.volatility_5, state.avg_volatility_20) {
            (Some(vol), Some(avg)) if avg > 0.0 => vol / avg,
            _ => 1.0,
        };

        // Direction comes from which side the sentiment shock is on.
        let (signal, confidence) = if state.sentiment > 0.8 {
            (Signal::StrongBuy, (0.5 + vol_ratio / 10.0).min(0.85))
        } else if state.sentiment < 0.2 {
            (Signal::Sell, (0.5 + vol_ratio / 10.0).min(0.85))
        } else {
            (Signal::Hold, 0.45)
        };

        StrategySignal {
            strategy: self.name(),
            signal,
            confidence,
            entry_price: state.close,
            stop_pct: Some(7.0),
            target_pct: Some(12.0),
            reason: format!(
                "volatility {:.1}x its 20-day average, macro news: {}, sentiment {:.2}",
                vol_ratio, state.has_macro_news, state.sentiment
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_state() -> MarketState {
        MarketState {
            close: 100.0,
            sma_5: Some(101.0),
            volatility_5: Some(6.0),
            avg_volatility_20: Some(3.0),
            news_count: 2,
            has_macro_news: true,
            sentiment: 0.15,
        }
    }

    #[test]
    fn test_suitable_on_volatility_spike_with_macro() {
        assert!(VolatileGap.is_suitable(&base_state()));
    }

    #[test]
    fn test_suitable_on_extreme_sentiment_without_macro() {
        let mut state = base_state();
        state.has_macro_news = false;
        state.sentiment = 0.9;
        assert!(VolatileGap.is_suitable(&state));
    }

    #[test]
    fn test_not_suitable_without_catalyst() {
        let mut state = base_state();
        state.has_macro_news = false;
        state.sentiment = 0.5;
        assert!(!VolatileGap.is_suitable(&state));
    }

    #[test]
    fn test_not_suitable_when_volatility_only_slightly_elevated() {
        let mut state = base_state();
        state.volatility_5 = Some(4.0); // 1.33x < 1.5x
        assert!(!VolatileGap.is_suitable(&state));
    }

    #[test]
    fn test_bearish_shock_sells() {
        let signal = VolatileGap.calculate_signal(&base_state());
        assert_eq!(signal.signal, Signal::Sell);
        assert_eq!(signal.stop_pct, Some(7.0));
        assert_eq!(signal.target_pct, Some(12.0));
    }

    #[test]
    fn test_bullish_shock_buys() {
        let mut state = base_state();
        state.sentiment = 0.9;
        let signal = VolatileGap.calculate_signal(&state);
        assert_eq!(signal.signal, Signal::StrongBuy);
    }
}
