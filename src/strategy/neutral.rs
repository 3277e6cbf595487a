//! Neutral regime: the conservative fallback when no other regime's
//! conditions hold. Always HOLD, no stop or target.

use super::{MarketState, Signal, Strategy, StrategySignal};

pub struct Neutral;

impl Strategy for Neutral {
    fn name(&self) -> &'static str {
        "Neutral"
    }

    fn is_suitable(&self, _state: &MarketState) -> bool {
        true
    }

    fn calculate_signal(&self, state: &MarketState) -> StrategySignal {
        StrategySignal {
            strategy: self.name(),
            signal: Signal::Hold,
            confidence: 0.3,
            entry_price: state.close,
            stop_pct: None,
            target_pct: None,
            reason: "no regime conditions met, holding".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_suitable_and_always_holds() {
        let state = MarketState::default();
        assert!(Neutral.is_suitable(&state));
        let signal = Neutral.calculate_signal(&state);
        assert_eq!(signal.signal, Signal::Hold);
        assert!(signal.stop_pct.is_none() && signal.target_pct.is_none());
    }
}
