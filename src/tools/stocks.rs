//! Closing-price lookup over a pluggable market-data source.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{PipelineError, Result};
use crate::tool::{parse_args, Tool, ToolContext};

const DATE_FORMAT: &str = "%Y-%m-%d";
/// Days searched from a requested date, to step over weekends and holidays.
const LOOKUP_WINDOW_DAYS: u64 = 5;

/// One daily close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyClose {
    pub date: NaiveDate,
    pub close: f64,
}

/// Source of daily closing prices.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Closes for trading days in `[start, end)`, oldest first.
    async fn daily_closes(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyClose>>;
}

/// Yahoo Finance chart API client.
#[derive(Clone)]
pub struct YahooFinance {
    http: reqwest::Client,
    base_url: String,
}

impl YahooFinance {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (compatible; agent-pipelines)")
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

fn epoch_seconds(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

#[async_trait]
impl MarketData for YahooFinance {
    async fn daily_closes(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyClose>> {
        let url = format!(
            "{}/v8/finance/chart/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(ticker)
        );
        let resp = self
            .http
            .get(url)
            .query(&[
                ("period1", epoch_seconds(start).to_string()),
                ("period2", epoch_seconds(end).to_string()),
                ("interval", "1d".to_string()),
            ])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        let envelope: ChartEnvelope = serde_json::from_str(&body).map_err(|err| {
            PipelineError::Protocol(format!("unexpected chart response ({status}): {err}"))
        })?;
        if let Some(error) = envelope.chart.error {
            return Err(PipelineError::Protocol(format!(
                "{}: {}",
                error.code, error.description
            )));
        }
        if !status.is_success() {
            return Err(PipelineError::Protocol(format!("chart request failed with {status}")));
        }

        let Some(result) = envelope.chart.result.and_then(|r| r.into_iter().next()) else {
            return Ok(Vec::new());
        };
        let closes = result
            .indicators
            .quote
            .into_iter()
            .next()
            .map(|q| q.close)
            .unwrap_or_default();

        let mut out = Vec::new();
        for (ts, close) in result.timestamp.into_iter().zip(closes) {
            let (Some(close), Some(when)) = (close, chrono::DateTime::from_timestamp(ts, 0)) else {
                continue;
            };
            out.push(DailyClose {
                date: when.date_naive(),
                close,
            });
        }
        Ok(out)
    }
}

/// Start and end closes for one ticker; `None` when no trading day fell in the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePair {
    pub start_date_price: Option<f64>,
    pub end_date_price: Option<f64>,
}

/// Per-ticker outcome. Failures are values, never propagated errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TickerQuote {
    Prices(PricePair),
    Error { error: String },
}

#[derive(Debug, Deserialize)]
struct PriceArgs {
    tickers: Vec<String>,
    start_date: String,
    end_date: String,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Looks up start/end closing prices for a list of tickers.
#[derive(Clone)]
pub struct StockPriceTool {
    source: Arc<dyn MarketData>,
}

impl StockPriceTool {
    pub fn new(source: Arc<dyn MarketData>) -> Self {
        Self { source }
    }

    async fn first_close_from(&self, ticker: &str, date: NaiveDate) -> Result<Option<f64>> {
        let end = date
            .checked_add_days(Days::new(LOOKUP_WINDOW_DAYS))
            .ok_or_else(|| PipelineError::Protocol(format!("date {date} out of range")))?;
        let closes = self.source.daily_closes(ticker, date, end).await?;
        Ok(closes.first().map(|c| round2(c.close)))
    }

    async fn quote(&self, ticker: &str, start_date: &str, end_date: &str) -> Result<PricePair> {
        let parse = |raw: &str| {
            NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|err| {
                let msg = format!("invalid date `{raw}` (expected YYYY-MM-DD): {err}");
                PipelineError::Protocol(msg)
            })
        };
        let start = parse(start_date)?;
        let end = parse(end_date)?;
        Ok(PricePair {
            start_date_price: self.first_close_from(ticker, start).await?,
            end_date_price: self.first_close_from(ticker, end).await?,
        })
    }

    /// Resolve every ticker; a failing ticker yields an error entry instead of an `Err`.
    pub async fn prices(
        &self,
        tickers: &[String],
        start_date: &str,
        end_date: &str,
    ) -> Vec<(String, TickerQuote)> {
        let mut out = Vec::with_capacity(tickers.len());
        for ticker in tickers {
            let quote = match self.quote(ticker, start_date, end_date).await {
                Ok(prices) => TickerQuote::Prices(prices),
                Err(err) => {
                    tracing::warn!(ticker = %ticker, error = %err, "price lookup failed");
                    TickerQuote::Error {
                        error: format!("Could not retrieve data for {ticker}: {err}"),
                    }
                }
            };
            out.push((ticker.clone(), quote));
        }
        out
    }
}

#[async_trait]
impl Tool for StockPriceTool {
    fn name(&self) -> &str {
        "get_stock_prices"
    }

    fn description(&self) -> &str {
        "Get closing prices for a list of tickers on a start date and an end date (YYYY-MM-DD)."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "tickers": {"type": "array", "items": {"type": "string"}},
                "start_date": {"type": "string", "description": "YYYY-MM-DD"},
                "end_date": {"type": "string", "description": "YYYY-MM-DD, usually today"}
            },
            "required": ["tickers", "start_date", "end_date"]
        }))
    }

    async fn call(&self, input: Value, _ctx: &mut ToolContext<'_>) -> Result<Value> {
        let args: PriceArgs = parse_args(self.name(), input)?;
        let mut out = Map::new();
        for (ticker, quote) in self.prices(&args.tickers, &args.start_date, &args.end_date).await {
            out.insert(ticker, serde_json::to_value(quote)?);
        }
        Ok(Value::Object(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::state::SessionState;

    #[derive(Default)]
    struct FixedMarket {
        closes: HashMap<String, Vec<DailyClose>>,
    }

    impl FixedMarket {
        fn with(mut self, ticker: &str, date: &str, close: f64) -> Self {
            self.closes.entry(ticker.into()).or_default().push(DailyClose {
                date: NaiveDate::parse_from_str(date, DATE_FORMAT).unwrap(),
                close,
            });
            self
        }
    }

    #[async_trait]
    impl MarketData for FixedMarket {
        async fn daily_closes(
            &self,
            ticker: &str,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<DailyClose>> {
            let closes = self
                .closes
                .get(ticker)
                .ok_or_else(|| {
                    PipelineError::Protocol("No data found, symbol may be delisted".into())
                })?;
            Ok(closes
                .iter()
                .filter(|c| c.date >= start && c.date < end)
                .copied()
                .collect())
        }
    }

    async fn call(tool: &StockPriceTool, input: Value) -> Value {
        let mut state = SessionState::new();
        let mut ctx = ToolContext::new(&mut state, "stock_agent");
        tool.call(input, &mut ctx).await.unwrap()
    }

    #[tokio::test]
    async fn reports_rounded_closes_inside_the_window() {
        let market = FixedMarket::default()
            .with("GOOGL", "2024-01-02", 150.004)
            .with("GOOGL", "2024-06-03", 170.456);
        let tool = StockPriceTool::new(Arc::new(market));

        // 2024-06-01 is a Saturday; the Monday close is used.
        let out = call(
            &tool,
            json!({"tickers": ["GOOGL"], "start_date": "2024-01-01", "end_date": "2024-06-01"}),
        )
        .await;

        assert_eq!(
            out,
            json!({"GOOGL": {"start_date_price": 150.0, "end_date_price": 170.46}})
        );
    }

    #[tokio::test]
    async fn empty_windows_are_null() {
        let market = FixedMarket::default().with("AAPL", "2024-01-02", 185.0);
        let tool = StockPriceTool::new(Arc::new(market));

        let out = call(
            &tool,
            json!({"tickers": ["AAPL"], "start_date": "2024-01-01", "end_date": "2024-03-01"}),
        )
        .await;

        assert_eq!(out["AAPL"]["start_date_price"], json!(185.0));
        assert!(out["AAPL"]["end_date_price"].is_null());
    }

    #[tokio::test]
    async fn unknown_tickers_and_bad_dates_become_error_entries() {
        let market = FixedMarket::default().with("MSFT", "2024-01-02", 370.0);
        let tool = StockPriceTool::new(Arc::new(market));

        let out = call(
            &tool,
            json!({
                "tickers": ["NOPE", "MSFT"],
                "start_date": "2024-01-01",
                "end_date": "2024-01-02"
            }),
        )
        .await;
        let error = out["NOPE"]["error"].as_str().unwrap();
        assert!(error.starts_with("Could not retrieve data for NOPE:"));
        assert_eq!(out["MSFT"]["start_date_price"], json!(370.0));

        let out = call(
            &tool,
            json!({"tickers": ["MSFT"], "start_date": "01/02/2024", "end_date": "2024-01-02"}),
        )
        .await;
        assert!(out["MSFT"]["error"].as_str().unwrap().contains("invalid date"));
    }

    #[tokio::test]
    async fn yahoo_client_parses_chart_payloads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/GOOGL"))
            .and(query_param("interval", "1d"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "chart": {
                    "result": [{
                        "timestamp": [1704205800, 1704292200],
                        "indicators": {"quote": [{"close": [null, 138.92]}]}
                    }],
                    "error": null
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/ZZZZ"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "chart": {
                    "result": null,
                    "error": {
                        "code": "Not Found",
                        "description": "No data found, symbol may be delisted"
                    }
                }
            })))
            .mount(&server)
            .await;

        let yahoo = YahooFinance::new(server.uri(), Duration::from_secs(5)).unwrap();
        let tool = StockPriceTool::new(Arc::new(yahoo));
        let out = call(
            &tool,
            json!({
                "tickers": ["GOOGL", "ZZZZ"],
                "start_date": "2024-01-02",
                "end_date": "2024-01-02"
            }),
        )
        .await;

        assert_eq!(out["GOOGL"]["start_date_price"], json!(138.92));
        assert_eq!(out["GOOGL"]["end_date_price"], json!(138.92));
        assert!(out["ZZZZ"]["error"]
            .as_str()
            .unwrap()
            .contains("No data found"));
    }

    #[tokio::test]
    async fn unreachable_source_is_still_an_error_entry() {
        let yahoo = YahooFinance::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let tool = StockPriceTool::new(Arc::new(yahoo));

        let out = call(
            &tool,
            json!({"tickers": ["GOOGL"], "start_date": "2024-01-02", "end_date": "2024-01-03"}),
        )
        .await;

        assert!(out["GOOGL"]["error"].is_string());
    }
}
