//! Earnings-calendar fetcher
//! Pulls the provider's CSV calendar and maps rows for tracked tickers to
//! EARNINGS events.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use super::NewsFetcher;
use crate::data::{DataError, DataResult};
use crate::kb::{EventType, Importance, NewKbEntry};

#[derive(Debug, Deserialize)]
struct CalendarRow {
    symbol: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "reportDate")]
    report_date: String,
    #[serde(default)]
    estimate: String,
    #[serde(default)]
    currency: String,
}

pub struct EarningsCalendarFetcher {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    tickers: Vec<String>,
}

impl EarningsCalendarFetcher {
    pub fn new(api_key: String, tickers: Vec<String>) -> Self {
        Self::with_base_url("https://www.alphavantage.co".to_string(), api_key, tickers)
    }

    pub fn with_base_url(base_url: String, api_key: String, tickers: Vec<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("tradewinds/0.1.0")
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url,
            api_key,
            tickers,
        }
    }

    fn map_csv(&self, csv_text: &str) -> DataResult<Vec<NewKbEntry>> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(csv_text.as_bytes());

        let mut entries = Vec::new();
        for row in reader.deserialize::<CalendarRow>() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    tracing::debug!("Skipping malformed calendar row: {}", e);
                    continue;
                }
            };

            if !self.tickers.is_empty() && !self.tickers.contains(&row.symbol) {
                continue;
            }

            let Ok(report_date) = NaiveDate::parse_from_str(&row.report_date, "%Y-%m-%d") else {
                continue;
            };
            let ts = report_date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
                .unwrap_or_else(Utc::now);

            let mut content = format!("{} reports earnings on {}", row.symbol, report_date);
            if !row.name.is_empty() {
                content = format!("{} ({}) reports earnings on {}", row.symbol, row.name, report_date);
            }
            if !row.estimate.is_empty() {
                content.push_str(&format!(", EPS estimate {} {}", row.estimate, row.currency));
            }

            entries.push(NewKbEntry {
                ts,
                ticker: row.symbol,
                source: "earnings_calendar".to_string(),
                content,
                event_type: EventType::Earnings,
                importance: Importance::High,
                region: "USA".to_string(),
                link: None,
                sentiment_score: None,
            });
        }

        Ok(entries)
    }
}

#[async_trait]
impl NewsFetcher for EarningsCalendarFetcher {
    fn source(&self) -> &str {
        "earnings_calendar"
    }

    async fn fetch(&self) -> DataResult<Vec<NewKbEntry>> {
        let url = format!(
            "{}/query?function=EARNINGS_CALENDAR&horizon=3month&apikey={}",
            self.base_url, self.api_key
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(DataError::api_error(
                response.status().as_u16(),
                "earnings calendar request failed",
            ));
        }

        let csv_text = response.text().await?;
        self.map_csv(&csv_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV_SAMPLE: &str = "\
symbol,name,reportDate,fiscalDateEnding,estimate,currency
MSFT,Microsoft Corporation,2025-04-24,2025-03-31,3.22,USD
SNDK,Sandisk Corp,2025-05-07,2025-03-31,,USD
AAPL,Apple Inc,2025-05-01,2025-03-31,1.62,USD
";

    fn fetcher_for(tickers: &[&str]) -> EarningsCalendarFetcher {
        EarningsCalendarFetcher::new(
            "demo".to_string(),
            tickers.iter().map(|t| t.to_string()).collect(),
        )
    }

    #[test]
    fn test_maps_only_tracked_tickers() {
        let entries = fetcher_for(&["MSFT", "SNDK"]).map_csv(CSV_SAMPLE).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.event_type == EventType::Earnings));
        assert!(entries.iter().all(|e| e.importance == Importance::High));

        let msft = entries.iter().find(|e| e.ticker == "MSFT").unwrap();
        assert!(msft.content.contains("2025-04-24"));
        assert!(msft.content.contains("3.22"));
        assert_eq!(msft.ts.date_naive().to_string(), "2025-04-24");
    }

    #[test]
    fn test_empty_ticker_set_takes_all() {
        let entries = fetcher_for(&[]).map_csv(CSV_SAMPLE).unwrap();
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn test_malformed_rows_skipped() {
        let csv = "symbol,name,reportDate,fiscalDateEnding,estimate,currency\nMSFT,Microsoft,not-a-date,2025-03-31,1.0,USD\n";
        let entries = fetcher_for(&[]).map_csv(csv).unwrap();
        assert!(entries.is_empty());
    }
}
