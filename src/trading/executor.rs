//! Paper-trade executor
//! Applies risk-gated buys, full-position sells, and scheduled exit rules.
//! All mutations for one decision happen in a single transaction holding
//! row locks on the ticker and CASH rows, so a crash between decision and
//! execution leaves state unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::{info, warn};

use super::portfolio::{PortfolioStore, CASH_TICKER};
use super::risk::{BuyCheck, RiskLimits};
use crate::config::Config;
use crate::data::{DataResult, QuoteStore};
use crate::session::trading_days_between;
use crate::strategy::{Signal, StrategySelector};

/// One journal row. The journal is append-only and is the single source of
/// truth for what actually happened.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TradeRecord {
    pub id: i64,
    pub ts: DateTime<Utc>,
    pub ticker: String,
    pub side: String,
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
    pub signal_type: String,
    pub strategy_name: Option<String>,
    pub total_value: f64,
    pub sentiment_at_trade: Option<f64>,
}

const TRADE_COLUMNS: &str = "id, ts, ticker, side, quantity, price, commission, signal_type, \
                             strategy_name, total_value, sentiment_at_trade";

/// Result of a buy/sell request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    Executed(TradeRecord),
    /// Risk veto: structured reason, no state change.
    Rejected { reason: String },
    /// Nothing to do (position already open, no quotes, zero size).
    Skipped { reason: String },
}

impl ExecutionOutcome {
    pub fn record(&self) -> Option<&TradeRecord> {
        match self {
            ExecutionOutcome::Executed(record) => Some(record),
            _ => None,
        }
    }
}

fn signal_weight(signal: Signal) -> f64 {
    match signal {
        Signal::StrongBuy => 1.0,
        Signal::Buy => 0.5,
        _ => 0.0,
    }
}

pub struct Executor {
    pool: PgPool,
    quotes: Arc<QuoteStore>,
    portfolio: Arc<PortfolioStore>,
    limits: RiskLimits,
    selector: StrategySelector,
    commission_rate: f64,
    stop_loss_level: f64,
    sell_slippage_pct: f64,
    fast_tickers: Vec<String>,
}

impl Executor {
    pub fn new(
        pool: PgPool,
        quotes: Arc<QuoteStore>,
        portfolio: Arc<PortfolioStore>,
        limits: RiskLimits,
        config: &Config,
    ) -> Self {
        Self {
            pool,
            quotes,
            portfolio,
            limits,
            selector: StrategySelector::new(),
            commission_rate: config.trading.commission_rate,
            stop_loss_level: config.trading.stop_loss_level,
            sell_slippage_pct: config.trading.sandbox_slippage_sell_pct,
            fast_tickers: config.quotes.tickers_fast.clone(),
        }
    }

    /// Open a position on a BUY/STRONG_BUY signal. Default sizing:
    /// floor(cash * signal_weight / price), stepped down until the total
    /// cost including commission fits in cash. At most one open position
    /// per ticker; a repeat buy is a no-op.
    #[allow(clippy::too_many_arguments)]
    pub async fn buy(
        &self,
        ticker: &str,
        signal: Signal,
        quantity: Option<f64>,
        price: Option<f64>,
        strategy_name: Option<&str>,
        sentiment: Option<f64>,
        as_of: DateTime<Utc>,
    ) -> DataResult<ExecutionOutcome> {
        if self.portfolio.position(ticker).await?.is_some() {
            info!("Position in {} already open, buy skipped", ticker);
            return Ok(ExecutionOutcome::Skipped {
                reason: format!("position in {} already open", ticker),
            });
        }

        let weight = signal_weight(signal);
        if weight <= 0.0 && quantity.is_none() {
            return Ok(ExecutionOutcome::Skipped {
                reason: format!("signal {} does not open positions", signal),
            });
        }

        let resolved_price = match price {
            Some(p) => Some(p),
            None => self.quotes.latest_close(ticker, as_of).await?,
        };
        let Some(price) = resolved_price else {
            warn!("No quotes for {}, buy impossible", ticker);
            return Ok(ExecutionOutcome::Skipped {
                reason: format!("no quotes for {}", ticker),
            });
        };

        if price <= 0.0 {
            return Ok(ExecutionOutcome::Skipped {
                reason: format!("invalid price {} for {}", price, ticker),
            });
        }

        let cash = self.portfolio.cash().await?;
        let mut qty = match quantity {
            Some(q) => q.floor(),
            None => (cash * weight / price).floor(),
        };
        // Step the size down until notional + commission fits in cash.
        while qty > 0.0 && qty * price * (1.0 + self.commission_rate) > cash {
            qty -= 1.0;
        }
        if qty <= 0.0 {
            return Ok(ExecutionOutcome::Skipped {
                reason: format!("allocation too small to buy {} at {:.2}", ticker, price),
            });
        }

        let notional = qty * price;

        // Risk gate: all checks must pass before any state changes.
        let check = BuyCheck {
            ticker: ticker.to_string(),
            position_size_usd: notional,
            current_exposure_usd: self.portfolio.exposure_usd(&self.quotes, as_of).await?,
            ticker_exposure_usd: 0.0,
            open_positions: self.portfolio.open_positions().await?.len(),
            daily_loss_usd: self.daily_loss_usd(as_of).await?,
            now: as_of,
        };
        let verdict = self.limits.check_buy(&check);
        if !verdict.allow {
            info!("BUY {} vetoed by risk: {}", ticker, verdict.reason);
            return Ok(ExecutionOutcome::Rejected {
                reason: verdict.reason,
            });
        }

        let commission = notional * self.commission_rate;
        let total_cost = notional + commission;

        let mut tx = self.pool.begin().await?;

        let cash_in_tx = Self::lock_cash(&mut tx).await?;
        if total_cost > cash_in_tx {
            tx.rollback().await?;
            warn!(
                "Insufficient cash ({:.2}) to buy {} for {:.2}",
                cash_in_tx, ticker, total_cost
            );
            return Ok(ExecutionOutcome::Rejected {
                reason: format!("insufficient cash: {:.2} < {:.2}", cash_in_tx, total_cost),
            });
        }

        sqlx::query("UPDATE portfolio_state SET quantity = quantity - $1, last_updated = $2 WHERE ticker = $3")
            .bind(total_cost)
            .bind(as_of)
            .bind(CASH_TICKER)
            .execute(&mut *tx)
            .await?;

        // New position, or weighted-average entry on top of an existing one.
        sqlx::query(
            "INSERT INTO portfolio_state (ticker, quantity, avg_entry_price, last_updated) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (ticker) DO UPDATE SET \
                 avg_entry_price = (portfolio_state.quantity * portfolio_state.avg_entry_price \
                                    + EXCLUDED.quantity * EXCLUDED.avg_entry_price) \
                                   / (portfolio_state.quantity + EXCLUDED.quantity), \
                 quantity = portfolio_state.quantity + EXCLUDED.quantity, \
                 last_updated = EXCLUDED.last_updated",
        )
        .bind(ticker)
        .bind(qty)
        .bind(price)
        .bind(as_of)
        .execute(&mut *tx)
        .await?;

        let record = Self::insert_trade(
            &mut tx,
            as_of,
            ticker,
            "BUY",
            qty,
            price,
            commission,
            signal.as_str(),
            strategy_name,
            total_cost,
            sentiment,
        )
        .await?;

        tx.commit().await?;

        info!(
            ticker = %ticker,
            quantity = %qty,
            price = %price,
            total_cost = %total_cost,
            signal = %signal,
            strategy = strategy_name.unwrap_or("-"),
            "BUY executed"
        );

        Ok(ExecutionOutcome::Executed(record))
    }

    /// Close the full position at `price` (latest close when None), with
    /// optional sandbox sell slippage applied to the fill.
    pub async fn sell(
        &self,
        ticker: &str,
        signal_type: &str,
        price: Option<f64>,
        sentiment: Option<f64>,
        as_of: DateTime<Utc>,
    ) -> DataResult<ExecutionOutcome> {
        let Some(position) = self.portfolio.position(ticker).await? else {
            return Ok(ExecutionOutcome::Skipped {
                reason: format!("no open position in {}", ticker),
            });
        };

        let resolved_price = match price {
            Some(p) => Some(p),
            None => self.quotes.latest_close(ticker, as_of).await?,
        };
        let Some(market_price) = resolved_price else {
            warn!("No quotes for {}, sell impossible", ticker);
            return Ok(ExecutionOutcome::Skipped {
                reason: format!("no quotes for {}", ticker),
            });
        };

        let fill_price = market_price * (1.0 - self.sell_slippage_pct / 100.0);
        let quantity = position.quantity;
        let notional = quantity * fill_price;
        let commission = notional * self.commission_rate;
        let proceeds = notional - commission;
        let strategy_name = self.last_buy_strategy(ticker).await?;

        let mut tx = self.pool.begin().await?;

        Self::lock_cash(&mut tx).await?;
        // Lock the position row for the duration of the close.
        sqlx::query("SELECT quantity FROM portfolio_state WHERE ticker = $1 FOR UPDATE")
            .bind(ticker)
            .fetch_optional(&mut *tx)
            .await?;

        sqlx::query("UPDATE portfolio_state SET quantity = quantity + $1, last_updated = $2 WHERE ticker = $3")
            .bind(proceeds)
            .bind(as_of)
            .bind(CASH_TICKER)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM portfolio_state WHERE ticker = $1")
            .bind(ticker)
            .execute(&mut *tx)
            .await?;

        let record = Self::insert_trade(
            &mut tx,
            as_of,
            ticker,
            "SELL",
            quantity,
            fill_price,
            commission,
            signal_type,
            strategy_name.as_deref(),
            proceeds,
            sentiment,
        )
        .await?;

        tx.commit().await?;

        let pnl = (fill_price - position.avg_entry_price) * quantity - commission;
        info!(
            ticker = %ticker,
            quantity = %quantity,
            fill_price = %fill_price,
            proceeds = %proceeds,
            pnl = %pnl,
            signal_type = %signal_type,
            "SELL executed"
        );

        Ok(ExecutionOutcome::Executed(record))
    }

    /// Sweep open positions for stop-loss, take-profit, and fast-cycle
    /// timeout exits. Returns the trades produced.
    pub async fn apply_exit_rules(&self, as_of: DateTime<Utc>) -> DataResult<Vec<TradeRecord>> {
        let mut exits = Vec::new();

        for position in self.portfolio.open_positions().await? {
            let ticker = position.ticker.clone();
            let Some(price) = self.quotes.latest_close(&ticker, as_of).await? else {
                warn!("No current price for {}, exit checks skipped", ticker);
                continue;
            };

            let strategy_name = self.last_buy_strategy(&ticker).await?;
            let (stop_pct, target_pct) = match strategy_name
                .as_deref()
                .and_then(|name| self.selector.risk_params_for(name))
            {
                Some((stop, target)) => (stop, Some(target)),
                None => ((1.0 - self.stop_loss_level) * 100.0, None),
            };

            let entry = position.avg_entry_price;
            let outcome = if price <= entry * (1.0 - stop_pct / 100.0) {
                info!(
                    "Stop-loss hit for {}: {:.2} <= {:.2} - {:.0}%",
                    ticker, price, entry, stop_pct
                );
                Some("STOP_LOSS")
            } else if target_pct
                .map(|t| price >= entry * (1.0 + t / 100.0))
                .unwrap_or(false)
            {
                info!(
                    "Take-profit hit for {}: {:.2} >= {:.2} + {:.0}%",
                    ticker,
                    price,
                    entry,
                    target_pct.unwrap_or_default()
                );
                Some("TAKE_PROFIT")
            } else if self.fast_tickers.contains(&ticker)
                && trading_days_between(position.last_updated.date_naive(), as_of.date_naive()) > 2
            {
                info!("Fast-cycle position in {} timed out", ticker);
                Some("TIMEOUT")
            } else {
                None
            };

            if let Some(signal_type) = outcome {
                if let ExecutionOutcome::Executed(record) = self
                    .sell(&ticker, signal_type, Some(price), None, as_of)
                    .await?
                {
                    exits.push(record);
                }
            }
        }

        Ok(exits)
    }

    /// Recent trades for the API, newest first.
    pub async fn trades(&self, ticker: Option<&str>, limit: i64) -> DataResult<Vec<TradeRecord>> {
        let rows: Vec<TradeRecord> = match ticker {
            Some(ticker) => {
                sqlx::query_as(&format!(
                    "SELECT {TRADE_COLUMNS} FROM trade_history \
                     WHERE ticker = $1 ORDER BY ts DESC LIMIT $2"
                ))
                .bind(ticker)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {TRADE_COLUMNS} FROM trade_history ORDER BY ts DESC LIMIT $1"
                ))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    /// Strategy recorded on the most recent BUY, reused for exits.
    async fn last_buy_strategy(&self, ticker: &str) -> DataResult<Option<String>> {
        let row = sqlx::query(
            "SELECT strategy_name FROM trade_history \
             WHERE ticker = $1 AND side = 'BUY' ORDER BY ts DESC LIMIT 1",
        )
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|r| r.get("strategy_name")))
    }

    /// Today's realized PnL (journal replay) plus unrealized PnL on open
    /// positions, folded into a single loss figure for the risk gate.
    async fn daily_loss_usd(&self, as_of: DateTime<Utc>) -> DataResult<f64> {
        let today = as_of.date_naive();

        // Tickers that sold today; replay their journals to recover the
        // entry cost each sale closed out.
        let sold_tickers: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT ticker FROM trade_history \
             WHERE side = 'SELL' AND ts::date = $1",
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await?;

        let mut realized = 0.0;
        for ticker in &sold_tickers {
            let trades: Vec<TradeRecord> = sqlx::query_as(&format!(
                "SELECT {TRADE_COLUMNS} FROM trade_history \
                 WHERE ticker = $1 AND ts <= $2 ORDER BY ts ASC"
            ))
            .bind(ticker)
            .bind(as_of)
            .fetch_all(&self.pool)
            .await?;

            let mut held_qty = 0.0;
            let mut avg_cost = 0.0;
            for trade in trades {
                if trade.side == "BUY" {
                    let new_qty = held_qty + trade.quantity;
                    if new_qty > 0.0 {
                        avg_cost =
                            (held_qty * avg_cost + trade.quantity * trade.price) / new_qty;
                    }
                    held_qty = new_qty;
                } else {
                    if trade.ts.date_naive() == today {
                        realized +=
                            (trade.price - avg_cost) * trade.quantity - trade.commission;
                    }
                    held_qty = 0.0;
                    avg_cost = 0.0;
                }
            }
        }

        let mut unrealized = 0.0;
        for position in self.portfolio.open_positions().await? {
            if let Some(price) = self.quotes.latest_close(&position.ticker, as_of).await? {
                unrealized += (price - position.avg_entry_price) * position.quantity;
            }
        }

        Ok((-(realized + unrealized)).max(0.0))
    }

    async fn lock_cash(tx: &mut Transaction<'_, Postgres>) -> DataResult<f64> {
        let row =
            sqlx::query("SELECT quantity FROM portfolio_state WHERE ticker = $1 FOR UPDATE")
                .bind(CASH_TICKER)
                .fetch_optional(&mut **tx)
                .await?;
        Ok(row.map(|r| r.get::<f64, _>("quantity")).unwrap_or(0.0))
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_trade(
        tx: &mut Transaction<'_, Postgres>,
        ts: DateTime<Utc>,
        ticker: &str,
        side: &str,
        quantity: f64,
        price: f64,
        commission: f64,
        signal_type: &str,
        strategy_name: Option<&str>,
        total_value: f64,
        sentiment: Option<f64>,
    ) -> DataResult<TradeRecord> {
        let record: TradeRecord = sqlx::query_as(&format!(
            "INSERT INTO trade_history \
                 (ts, ticker, side, quantity, price, commission, signal_type, strategy_name, \
                  total_value, sentiment_at_trade) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {TRADE_COLUMNS}"
        ))
        .bind(ts)
        .bind(ticker)
        .bind(side)
        .bind(quantity)
        .bind(price)
        .bind(commission)
        .bind(signal_type)
        .bind(strategy_name)
        .bind(total_value)
        .bind(sentiment)
        .fetch_one(&mut **tx)
        .await?;

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_weights() {
        assert_eq!(signal_weight(Signal::StrongBuy), 1.0);
        assert_eq!(signal_weight(Signal::Buy), 0.5);
        assert_eq!(signal_weight(Signal::Hold), 0.0);
        assert_eq!(signal_weight(Signal::Sell), 0.0);
    }

    #[test]
    fn test_default_sizing_rule() {
        // floor(capital * weight / price): the momentum seed scenario.
        let cash = 100_000.0;
        let price = 350.0;
        let qty = (cash * signal_weight(Signal::StrongBuy) / price).floor();
        assert_eq!(qty, 285.0);

        let commission_rate = 0.001;
        let mut q = qty;
        while q > 0.0 && q * price * (1.0 + commission_rate) > cash {
            q -= 1.0;
        }
        // Floor slack covers the commission here; no step-down needed.
        assert_eq!(q, 285.0);
        assert!(q * price * (1.0 + commission_rate) <= cash);
    }

    #[test]
    fn test_half_weight_sizing() {
        let cash = 100_000.0;
        let price = 350.0;
        let qty = (cash * signal_weight(Signal::Buy) / price).floor();
        assert_eq!(qty, 142.0);
    }
}
