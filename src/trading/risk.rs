//! Risk limits: file-backed configuration and the pre-trade checks
//! Every BUY must pass all checks; a veto returns a structured verdict and
//! leaves no partial state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::session::within_trading_hours;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    pub total_capital_usd: f64,
    pub max_position_size_usd: f64,
    pub min_trade_size_usd: f64,
    pub max_portfolio_exposure_pct: f64,
    pub max_single_ticker_exposure_pct: f64,
    pub max_positions_open: usize,
    pub max_daily_loss_usd: f64,
    pub max_daily_loss_pct: f64,
    /// Allow entries during the pre-market session.
    pub allow_premarket: bool,
}

impl Default for RiskLimits {
    fn default() -> Self {
        // Conservative defaults used when no limits file is present.
        Self {
            total_capital_usd: 100_000.0,
            max_position_size_usd: 10_000.0,
            min_trade_size_usd: 1_000.0,
            max_portfolio_exposure_pct: 80.0,
            max_single_ticker_exposure_pct: 20.0,
            max_positions_open: 10,
            max_daily_loss_usd: 5_000.0,
            max_daily_loss_pct: 5.0,
            allow_premarket: false,
        }
    }
}

impl RiskLimits {
    /// Load from a JSON file; falls back to defaults when the file is
    /// missing or unreadable.
    pub fn load(path: &str) -> Self {
        let path = Path::new(path);
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(limits) => limits,
                Err(e) => {
                    warn!("Invalid risk limits file {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                warn!(
                    "Risk limits file {} not found, using conservative defaults",
                    path.display()
                );
                Self::default()
            }
        }
    }
}

/// Inputs to the pre-trade check, assembled by the executor.
#[derive(Debug, Clone)]
pub struct BuyCheck {
    pub ticker: String,
    pub position_size_usd: f64,
    pub current_exposure_usd: f64,
    pub ticker_exposure_usd: f64,
    pub open_positions: usize,
    pub daily_loss_usd: f64,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub allow: bool,
    pub reason: String,
}

impl RiskVerdict {
    fn allow() -> Self {
        Self {
            allow: true,
            reason: String::new(),
        }
    }

    fn deny(reason: String) -> Self {
        Self {
            allow: false,
            reason,
        }
    }
}

impl RiskLimits {
    /// Run all pre-trade checks. The first failing check decides the
    /// verdict; ordering mirrors the cheapest-to-compute first.
    pub fn check_buy(&self, check: &BuyCheck) -> RiskVerdict {
        if check.position_size_usd < self.min_trade_size_usd {
            return RiskVerdict::deny(format!(
                "position {:.2} USD below minimum trade size {:.2} USD",
                check.position_size_usd, self.min_trade_size_usd
            ));
        }
        if check.position_size_usd > self.max_position_size_usd {
            return RiskVerdict::deny(format!(
                "position {:.2} USD exceeds per-position limit {:.2} USD",
                check.position_size_usd, self.max_position_size_usd
            ));
        }

        let new_exposure = check.current_exposure_usd + check.position_size_usd;
        let max_exposure = self.max_portfolio_exposure_pct / 100.0 * self.total_capital_usd;
        if new_exposure > max_exposure {
            return RiskVerdict::deny(format!(
                "portfolio exposure {:.2} USD would exceed {:.1}% of capital ({:.2} USD)",
                new_exposure, self.max_portfolio_exposure_pct, max_exposure
            ));
        }

        let new_ticker_exposure = check.ticker_exposure_usd + check.position_size_usd;
        let max_ticker_exposure =
            self.max_single_ticker_exposure_pct / 100.0 * self.total_capital_usd;
        if new_ticker_exposure > max_ticker_exposure {
            return RiskVerdict::deny(format!(
                "{} exposure {:.2} USD would exceed {:.1}% of capital ({:.2} USD)",
                check.ticker,
                new_ticker_exposure,
                self.max_single_ticker_exposure_pct,
                max_ticker_exposure
            ));
        }

        if check.open_positions >= self.max_positions_open {
            return RiskVerdict::deny(format!(
                "{} positions already open (limit {})",
                check.open_positions, self.max_positions_open
            ));
        }

        if !within_trading_hours(check.now, self.allow_premarket) {
            return RiskVerdict::deny("outside exchange trading hours".to_string());
        }

        let max_loss_usd = self
            .max_daily_loss_usd
            .min(self.max_daily_loss_pct / 100.0 * self.total_capital_usd);
        if check.daily_loss_usd >= max_loss_usd {
            return RiskVerdict::deny(format!(
                "daily loss {:.2} USD at or above limit {:.2} USD",
                check.daily_loss_usd, max_loss_usd
            ));
        }

        RiskVerdict::allow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regular_hours() -> DateTime<Utc> {
        // Monday 2025-01-06, 10:00 ET
        DateTime::parse_from_rfc3339("2025-01-06T15:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn check_with_size(size: f64) -> BuyCheck {
        BuyCheck {
            ticker: "MSFT".to_string(),
            position_size_usd: size,
            current_exposure_usd: 0.0,
            ticker_exposure_usd: 0.0,
            open_positions: 0,
            daily_loss_usd: 0.0,
            now: regular_hours(),
        }
    }

    #[test]
    fn test_passes_within_limits() {
        let limits = RiskLimits::default();
        let verdict = limits.check_buy(&check_with_size(5_000.0));
        assert!(verdict.allow, "{}", verdict.reason);
    }

    #[test]
    fn test_rejects_size_bounds() {
        let limits = RiskLimits::default();
        assert!(!limits.check_buy(&check_with_size(500.0)).allow);
        assert!(!limits.check_buy(&check_with_size(20_000.0)).allow);
    }

    #[test]
    fn test_rejects_portfolio_exposure() {
        let limits = RiskLimits::default();
        let mut check = check_with_size(5_000.0);
        check.current_exposure_usd = 78_000.0; // 83k > 80% of 100k
        let verdict = limits.check_buy(&check);
        assert!(!verdict.allow);
        assert!(verdict.reason.contains("portfolio exposure"));
    }

    #[test]
    fn test_rejects_ticker_concentration() {
        let limits = RiskLimits::default();
        let mut check = check_with_size(5_000.0);
        check.ticker_exposure_usd = 18_000.0; // 23k > 20% of 100k
        assert!(!limits.check_buy(&check).allow);
    }

    #[test]
    fn test_rejects_position_count() {
        let limits = RiskLimits::default();
        let mut check = check_with_size(5_000.0);
        check.open_positions = 10;
        assert!(!limits.check_buy(&check).allow);
    }

    #[test]
    fn test_rejects_outside_hours() {
        let limits = RiskLimits::default();
        let mut check = check_with_size(5_000.0);
        // Saturday
        check.now = DateTime::parse_from_rfc3339("2025-01-04T15:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let verdict = limits.check_buy(&check);
        assert!(!verdict.allow);
        assert!(verdict.reason.contains("trading hours"));
    }

    #[test]
    fn test_premarket_allowed_by_flag() {
        let limits = RiskLimits {
            allow_premarket: true,
            ..Default::default()
        };
        let mut check = check_with_size(5_000.0);
        // Monday 08:30 ET
        check.now = DateTime::parse_from_rfc3339("2025-01-06T13:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(limits.check_buy(&check).allow);
    }

    #[test]
    fn test_rejects_daily_loss_breach() {
        let limits = RiskLimits::default();
        let mut check = check_with_size(5_000.0);
        check.daily_loss_usd = 5_000.0;
        assert!(!limits.check_buy(&check).allow);
    }

    #[test]
    fn test_defaults_when_file_missing() {
        let limits = RiskLimits::load("/nonexistent/risk_limits.json");
        assert_eq!(limits.max_positions_open, 10);
        assert_eq!(limits.total_capital_usd, 100_000.0);
    }
}
