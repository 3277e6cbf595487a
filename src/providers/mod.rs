//! Pluggable external capabilities: quotes, LLM, embeddings, RSI.
//! Everything behind object-safe async traits so the pipeline degrades
//! gracefully when a provider is unavailable and tests can substitute
//! fixtures.

pub mod embeddings;
pub mod llm;
pub mod quotes;

pub use embeddings::{select_embedder, Embedder};
pub use llm::{build_llm_router, LlmProvider, LlmResponse, LlmRouter};
pub use quotes::{ChartQuoteClient, HttpRsiClient};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::data::DataResult;

/// One daily bar as returned by a quote feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderBar {
    pub date: NaiveDate,
    pub close: f64,
    pub volume: i64,
}

/// Off-hours snapshot used by the session oracle for pre-market context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PremarketQuote {
    pub last: f64,
    pub prev_close: f64,
    pub ts: DateTime<Utc>,
}

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn get_bars(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DataResult<Vec<ProviderBar>>;

    async fn get_premarket(&self, ticker: &str) -> DataResult<PremarketQuote>;
}

/// Optional external RSI source; imported values overwrite computed ones
/// when fresher.
#[async_trait]
pub trait RsiProvider: Send + Sync {
    async fn get_rsi(&self, ticker: &str) -> DataResult<f64>;
}

/// Symbol conventions of the de-facto quote feed: plain for stocks,
/// `XXXYYY=X` for FX, `=F` for futures, `-USD` for crypto, `^NAME` for
/// indexes.
pub fn fx_symbol(pair: &str) -> String {
    format!("{}=X", pair)
}

pub fn futures_symbol(root: &str) -> String {
    format!("{}=F", root)
}

pub fn crypto_symbol(coin: &str) -> String {
    format!("{}-USD", coin)
}

pub fn index_symbol(name: &str) -> String {
    format!("^{}", name)
}

/// Pseudo-tickers marking non-instrument macro items in the knowledge base.
pub const MACRO_TICKERS: [&str; 2] = ["MACRO", "US_MACRO"];

pub fn is_macro_ticker(ticker: &str) -> bool {
    MACRO_TICKERS.contains(&ticker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_conventions() {
        assert_eq!(fx_symbol("EURUSD"), "EURUSD=X");
        assert_eq!(futures_symbol("GC"), "GC=F");
        assert_eq!(crypto_symbol("BTC"), "BTC-USD");
        assert_eq!(index_symbol("GSPC"), "^GSPC");
    }

    #[test]
    fn test_macro_sentinels() {
        assert!(is_macro_ticker("MACRO"));
        assert!(is_macro_ticker("US_MACRO"));
        assert!(!is_macro_ticker("MSFT"));
    }
}
