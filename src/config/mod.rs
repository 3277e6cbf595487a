//! Layered key/value configuration
//! Load order: process environment -> `config.env` -> `config.local.env`,
//! later layers override earlier ones. Typed accessors parse into `Config`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub quotes: QuoteConfig,
    pub trading: TradingConfig,
    pub enrichment: EnrichmentConfig,
    pub llm: LlmConfig,
    pub scheduler: SchedulerConfig,
    pub provider_keys: ProviderKeys,

    // Replay clock for backtests (set programmatically, not from config files).
    // When set, every KB/quote read filters by ts <= effective_now().
    #[serde(skip)]
    pub backtest_now: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteConfig {
    /// Fast-cycle (5m strategy) tickers.
    pub tickers_fast: Vec<String>,
    pub tickers_medium: Vec<String>,
    pub tickers_long: Vec<String>,
    /// Tickers the scheduled trading cycle analyzes and executes.
    pub trading_cycle_tickers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub initial_cash_usd: f64,
    pub commission_rate: f64,
    /// Fallback stop level as a fraction of entry (0.95 = sell at -5%).
    pub stop_loss_level: f64,
    /// Extra slippage applied to simulated SELL fills, in percent.
    pub sandbox_slippage_sell_pct: f64,
    /// Path to the risk limits JSON file.
    pub risk_limits_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    pub use_llm: bool,
    pub sentiment_auto_calculate: bool,
    pub llm_news_cooldown_hours: i64,
    pub use_openai_embeddings: bool,
    pub use_gemini_embeddings: bool,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub gemini_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f64,
    pub timeout_seconds: u64,
    /// Extra `provider|model` pairs the analyst prompt is mirrored to.
    pub compare_models: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub game_5m_cooldown_minutes: i64,
    pub premarket_alert: bool,
}

/// Credentials for the concrete news/quote providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderKeys {
    pub newsapi_api_key: Option<String>,
    pub alphavantage_api_key: Option<String>,
}

/// Raw layered key/value view, before typing. Kept public so one-off
/// accessors (provider API keys etc.) can reach keys the struct omits.
#[derive(Debug, Clone, Default)]
pub struct ConfigMap {
    values: HashMap<String, String>,
}

impl ConfigMap {
    /// Load layers in override order: config.env, config.local.env, env vars.
    pub fn load() -> Self {
        dotenv::dotenv().ok();

        let mut values = HashMap::new();
        for file in ["config.env", "config.local.env"] {
            if let Some(layer) = Self::parse_file(Path::new(file)) {
                tracing::debug!("Loaded {} keys from {}", layer.len(), file);
                values.extend(layer);
            }
        }
        Self { values }
    }

    fn parse_file(path: &Path) -> Option<HashMap<String, String>> {
        let text = std::fs::read_to_string(path).ok()?;
        let mut map = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                map.insert(key.trim().to_uppercase(), value.trim().to_string());
            }
        }
        Some(map)
    }

    /// File layers take precedence; the process environment is the base layer.
    pub fn get(&self, key: &str) -> Option<String> {
        let upper = key.to_uppercase();
        self.values
            .get(&upper)
            .cloned()
            .or_else(|| env::var(&upper).ok())
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
            None => default,
        }
    }

    fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let map = ConfigMap::load();
        Self::from_map(&map)
    }

    pub fn from_map(map: &ConfigMap) -> Result<Self> {
        let database_url = map
            .get("DATABASE_URL")
            .context("DATABASE_URL is required but not set in config.env or the environment")?;

        let compare_models = map
            .get_list("LLM_COMPARE_MODELS")
            .iter()
            .filter_map(|entry| {
                entry
                    .split_once('|')
                    .map(|(p, m)| (p.trim().to_string(), m.trim().to_string()))
            })
            .collect();

        Ok(Config {
            database: DatabaseConfig {
                url: database_url,
                max_connections: map
                    .get_or("DB_MAX_CONNECTIONS", "8")
                    .parse()
                    .context("Invalid DB_MAX_CONNECTIONS value")?,
            },
            quotes: QuoteConfig {
                tickers_fast: map.get_list("TICKERS_FAST"),
                tickers_medium: map.get_list("TICKERS_MEDIUM"),
                tickers_long: map.get_list("TICKERS_LONG"),
                trading_cycle_tickers: map.get_list("TRADING_CYCLE_TICKERS"),
            },
            trading: TradingConfig {
                initial_cash_usd: map
                    .get_or("INITIAL_CASH_USD", "100000")
                    .parse()
                    .context("Invalid INITIAL_CASH_USD value")?,
                commission_rate: map
                    .get_or("COMMISSION_RATE", "0.001")
                    .parse()
                    .context("Invalid COMMISSION_RATE value")?,
                stop_loss_level: map
                    .get_or("STOP_LOSS_LEVEL", "0.95")
                    .parse()
                    .context("Invalid STOP_LOSS_LEVEL value")?,
                sandbox_slippage_sell_pct: map
                    .get_or("SANDBOX_SLIPPAGE_SELL_PCT", "0.0")
                    .parse()
                    .context("Invalid SANDBOX_SLIPPAGE_SELL_PCT value")?,
                risk_limits_path: map.get_or("RISK_LIMITS_PATH", "local/risk_limits.json"),
            },
            enrichment: EnrichmentConfig {
                use_llm: map.get_bool("USE_LLM", false),
                sentiment_auto_calculate: map.get_bool("SENTIMENT_AUTO_CALCULATE", true),
                llm_news_cooldown_hours: map
                    .get_or("LLM_NEWS_COOLDOWN_HOURS", "12")
                    .parse()
                    .context("Invalid LLM_NEWS_COOLDOWN_HOURS value")?,
                use_openai_embeddings: map.get_bool("USE_OPENAI_EMBEDDINGS", false),
                use_gemini_embeddings: map.get_bool("USE_GEMINI_EMBEDDINGS", false),
                openai_api_key: map.get("OPENAI_API_KEY"),
                openai_base_url: map.get_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
                gemini_api_key: map.get("GEMINI_API_KEY"),
            },
            llm: LlmConfig {
                base_url: map.get_or("LLM_BASE_URL", "https://api.openai.com/v1"),
                model: map.get_or("LLM_MODEL", "gpt-4o-mini"),
                api_key: map.get("LLM_API_KEY"),
                temperature: map
                    .get_or("LLM_TEMPERATURE", "0.2")
                    .parse()
                    .context("Invalid LLM_TEMPERATURE value")?,
                timeout_seconds: map
                    .get_or("LLM_TIMEOUT", "60")
                    .parse()
                    .context("Invalid LLM_TIMEOUT value")?,
                compare_models,
            },
            scheduler: SchedulerConfig {
                game_5m_cooldown_minutes: map
                    .get_or("GAME_5M_COOLDOWN_MINUTES", "30")
                    .parse()
                    .context("Invalid GAME_5M_COOLDOWN_MINUTES value")?,
                premarket_alert: map.get_bool("PREMARKET_ALERT", false),
            },
            provider_keys: ProviderKeys {
                newsapi_api_key: map.get("NEWSAPI_API_KEY"),
                alphavantage_api_key: map.get("ALPHAVANTAGE_API_KEY"),
            },
            backtest_now: None,
        })
    }

    /// Effective "now", respecting backtest replay mode. All time-windowed
    /// queries must go through this so backtests never see the future.
    pub fn effective_now(&self) -> DateTime<Utc> {
        self.backtest_now.unwrap_or_else(Utc::now)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/tradewinds".to_string(),
                max_connections: 8,
            },
            quotes: QuoteConfig {
                tickers_fast: Vec::new(),
                tickers_medium: Vec::new(),
                tickers_long: Vec::new(),
                trading_cycle_tickers: Vec::new(),
            },
            trading: TradingConfig {
                initial_cash_usd: 100_000.0,
                commission_rate: 0.001,
                stop_loss_level: 0.95,
                sandbox_slippage_sell_pct: 0.0,
                risk_limits_path: "local/risk_limits.json".to_string(),
            },
            enrichment: EnrichmentConfig {
                use_llm: false,
                sentiment_auto_calculate: true,
                llm_news_cooldown_hours: 12,
                use_openai_embeddings: false,
                use_gemini_embeddings: false,
                openai_api_key: None,
                openai_base_url: "https://api.openai.com/v1".to_string(),
                gemini_api_key: None,
            },
            llm: LlmConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                api_key: None,
                temperature: 0.2,
                timeout_seconds: 60,
                compare_models: Vec::new(),
            },
            scheduler: SchedulerConfig {
                game_5m_cooldown_minutes: 30,
                premarket_alert: false,
            },
            provider_keys: ProviderKeys::default(),
            backtest_now: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(pairs: &[(&str, &str)]) -> ConfigMap {
        let mut values = HashMap::new();
        for (k, v) in pairs {
            values.insert(k.to_uppercase(), v.to_string());
        }
        ConfigMap { values }
    }

    #[test]
    fn test_parses_lists_and_compare_models() {
        let map = map_with(&[
            ("database_url", "postgresql://localhost/x"),
            ("tickers_fast", "SNDK, TER"),
            ("trading_cycle_tickers", "MSFT,SNDK,TER"),
            ("llm_compare_models", "openai|gpt-4o, ollama|llama3.2:3b"),
        ]);
        let config = Config::from_map(&map).unwrap();
        assert_eq!(config.quotes.tickers_fast, vec!["SNDK", "TER"]);
        assert_eq!(config.quotes.trading_cycle_tickers.len(), 3);
        assert_eq!(
            config.llm.compare_models,
            vec![
                ("openai".to_string(), "gpt-4o".to_string()),
                ("ollama".to_string(), "llama3.2:3b".to_string())
            ]
        );
    }

    #[test]
    fn test_backtest_clock() {
        let mut config = Config::default();
        assert!(config.backtest_now.is_none());
        let frozen = DateTime::parse_from_rfc3339("2025-03-10T14:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        config.backtest_now = Some(frozen);
        assert_eq!(config.effective_now(), frozen);
    }
}
