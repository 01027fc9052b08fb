//! Stock market data from the Yahoo Finance chart API.

use super::{required_str, Tool};
use crate::error::{Result, TroupeError};
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

const CHART_ENDPOINT: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const VALID_PERIODS: &[&str] = &["1d", "5d", "1mo", "3mo", "6mo", "1y", "2y", "5y", "10y", "ytd", "max"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinanceToolKind {
    CurrentPrice,
    History,
}

impl FinanceToolKind {
    pub const ALL: [FinanceToolKind; 2] = [FinanceToolKind::CurrentPrice, FinanceToolKind::History];
}

pub struct FinanceTool {
    kind: FinanceToolKind,
    http: reqwest::Client,
}

impl FinanceTool {
    pub fn new(kind: FinanceToolKind, http: reqwest::Client) -> Self {
        Self { kind, http }
    }

    #[instrument(skip(self))]
    async fn fetch_chart(&self, symbol: &str, range: &str) -> Result<ChartResult> {
        let url = format!("{}/{}", CHART_ENDPOINT, symbol.trim().to_uppercase());
        let response = self
            .http
            .get(url)
            .query(&[("range", range), ("interval", "1d")])
            .header(reqwest::header::USER_AGENT, "Mozilla/5.0 (compatible; troupe)")
            .send()
            .await?;

        let status = response.status();
        let body: ChartResponse = response.json().await?;
        parse_chart(symbol, status.is_success(), body)
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    symbol: String,
    currency: Option<String>,
    regular_market_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Quote {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<u64>>,
}

fn parse_chart(symbol: &str, success: bool, body: ChartResponse) -> Result<ChartResult> {
    if let Some(error) = body.chart.error {
        return Err(TroupeError::Tool(format!("{}: {}", symbol, error.description)));
    }
    if !success {
        return Err(TroupeError::Tool(format!("Could not fetch data for {}", symbol)));
    }
    body.chart
        .result
        .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
        .ok_or_else(|| TroupeError::Tool(format!("No data found for {}", symbol)))
}

fn format_price(chart: &ChartResult) -> Result<String> {
    let price = chart
        .meta
        .regular_market_price
        .ok_or_else(|| TroupeError::Tool(format!("No current price for {}", chart.meta.symbol)))?;
    Ok(format!(
        "{:.4} {}",
        price,
        chart.meta.currency.as_deref().unwrap_or("USD")
    ))
}

fn format_history(chart: &ChartResult) -> String {
    let Some(quote) = chart.indicators.quote.first() else {
        return "[]".to_string();
    };

    let rows: Vec<Value> = chart
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            let close = quote.close.get(i).copied().flatten()?;
            let date = DateTime::from_timestamp(*ts, 0)?.format("%Y-%m-%d").to_string();
            Some(json!({
                "date": date,
                "open": quote.open.get(i).copied().flatten(),
                "high": quote.high.get(i).copied().flatten(),
                "low": quote.low.get(i).copied().flatten(),
                "close": close,
                "volume": quote.volume.get(i).copied().flatten(),
            }))
        })
        .collect();

    Value::Array(rows).to_string()
}

#[async_trait]
impl Tool for FinanceTool {
    fn name(&self) -> &str {
        match self.kind {
            FinanceToolKind::CurrentPrice => "get_current_stock_price",
            FinanceToolKind::History => "get_stock_history",
        }
    }

    fn description(&self) -> &str {
        match self.kind {
            FinanceToolKind::CurrentPrice => "Get the current stock price for a ticker symbol.",
            FinanceToolKind::History => {
                "Get daily historical prices (open, high, low, close, volume) for a ticker symbol as JSON."
            }
        }
    }

    fn parameters(&self) -> Value {
        match self.kind {
            FinanceToolKind::CurrentPrice => json!({
                "type": "object",
                "properties": {
                    "symbol": {"type": "string", "description": "Stock ticker symbol, e.g. NVDA"}
                },
                "required": ["symbol"]
            }),
            FinanceToolKind::History => json!({
                "type": "object",
                "properties": {
                    "symbol": {"type": "string", "description": "Stock ticker symbol, e.g. NVDA"},
                    "period": {
                        "type": "string",
                        "description": "Range of history to return (default: 1mo)",
                        "enum": VALID_PERIODS
                    }
                },
                "required": ["symbol"]
            }),
        }
    }

    async fn invoke(&self, args: Value) -> Result<String> {
        let symbol = required_str(&args, "symbol")?;
        match self.kind {
            FinanceToolKind::CurrentPrice => {
                let chart = self.fetch_chart(symbol, "1d").await?;
                format_price(&chart)
            }
            FinanceToolKind::History => {
                let period = args.get("period").and_then(|v| v.as_str()).unwrap_or("1mo");
                if !VALID_PERIODS.contains(&period) {
                    return Err(TroupeError::InvalidArgument(format!("Unsupported period '{}'", period)));
                }
                let chart = self.fetch_chart(symbol, period).await?;
                Ok(format_history(&chart))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHART: &str = r#"{
        "chart": {
            "result": [{
                "meta": {"symbol": "NVDA", "currency": "USD", "regularMarketPrice": 181.5},
                "timestamp": [1717372800, 1717459200],
                "indicators": {"quote": [{
                    "open": [114.0, 115.2],
                    "high": [115.6, 116.0],
                    "low": [113.1, 112.9],
                    "close": [115.0, null],
                    "volume": [1000, 2000]
                }]}
            }],
            "error": null
        }
    }"#;

    #[test]
    fn test_parse_price_and_history() {
        let body: ChartResponse = serde_json::from_str(CHART).unwrap();
        let chart = parse_chart("NVDA", true, body).unwrap();

        assert_eq!(format_price(&chart).unwrap(), "181.5000 USD");

        let rows: Vec<Value> = serde_json::from_str(&format_history(&chart)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["date"], "2024-06-03");
        assert_eq!(rows[0]["close"], 115.0);
    }

    #[test]
    fn test_parse_chart_error() {
        let body: ChartResponse = serde_json::from_str(
            r#"{"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}}"#,
        )
        .unwrap();
        let err = parse_chart("XXXX", false, body).unwrap_err();
        assert!(err.to_string().contains("delisted"));
    }
}
