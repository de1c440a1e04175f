//! Yahoo Finance chart adapter.
//!
//! The foreign-market source: US and TW symbols route here exclusively.
//! The chart API returns adjusted OHLC without turnover, so `amount` is
//! reconstructed as `volume * close` during normalization.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};

use crate::domain::candle::{Candle, CandleSeries};
use crate::domain::errors::{FetchError, FetchResult};
use crate::domain::ports::{DailyFetcher, ListingFetcher, QuoteFetcher, Source};
use crate::domain::quote::RealtimeQuote;
use crate::domain::symbol::Symbol;
use crate::infrastructure::core::http_client_factory::build_url_with_query;
use crate::infrastructure::sources::{SourceContext, parse_f64};

pub const KEY: &str = "yahoo";

const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

pub struct YahooFetcher {
    ctx: SourceContext,
    priority: i32,
}

impl YahooFetcher {
    pub fn new(ctx: SourceContext, priority: i32) -> Self {
        Self { ctx, priority }
    }

    async fn fetch_chart(
        &self,
        symbol: &Symbol,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> FetchResult<serde_json::Value> {
        self.ctx.gate.wait(KEY).await;

        let code = symbol.yahoo_code();
        let url = format!("{}/{}", CHART_URL, code);
        let url = match (start, end) {
            (Some(s), Some(e)) => {
                let p1 = s
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| dt.and_utc().timestamp())
                    .unwrap_or(0)
                    .to_string();
                let p2 = e
                    .and_hms_opt(23, 59, 59)
                    .map(|dt| dt.and_utc().timestamp())
                    .unwrap_or(0)
                    .to_string();
                build_url_with_query(
                    &url,
                    &[
                        ("period1", p1.as_str()),
                        ("period2", p2.as_str()),
                        ("interval", "1d"),
                        ("events", "div,split"),
                    ],
                )
            }
            _ => build_url_with_query(&url, &[("range", "5d"), ("interval", "1d")]),
        };

        let resp = self
            .ctx
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::network(KEY, e))?;
        if !resp.status().is_success() {
            return Err(FetchError::network(
                KEY,
                format!("HTTP {} for {}", resp.status(), code),
            ));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| FetchError::normalization(KEY, e))?;

        if let Some(err) = body
            .get("chart")
            .and_then(|c| c.get("error"))
            .filter(|e| !e.is_null())
        {
            return Err(FetchError::network(KEY, format!("chart error: {}", err)));
        }

        body.get("chart")
            .and_then(|c| c.get("result"))
            .and_then(|r| r.as_array())
            .and_then(|a| a.first())
            .cloned()
            .ok_or_else(|| FetchError::normalization(KEY, "empty chart result"))
    }
}

impl Source for YahooFetcher {
    fn key(&self) -> &'static str {
        KEY
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn daily(&self) -> Option<&dyn DailyFetcher> {
        Some(self)
    }

    fn quotes(&self) -> Option<&dyn QuoteFetcher> {
        Some(self)
    }

    fn listing(&self) -> Option<&dyn ListingFetcher> {
        Some(self)
    }
}

#[async_trait]
impl DailyFetcher for YahooFetcher {
    async fn daily(
        &self,
        symbol: &Symbol,
        start: NaiveDate,
        end: NaiveDate,
    ) -> FetchResult<CandleSeries> {
        let result = self.fetch_chart(symbol, Some(start), Some(end)).await?;

        let timestamps: Vec<i64> = result
            .get("timestamp")
            .and_then(|t| t.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_i64()).collect())
            .unwrap_or_default();
        let quote = result
            .get("indicators")
            .and_then(|i| i.get("quote"))
            .and_then(|q| q.as_array())
            .and_then(|a| a.first())
            .cloned()
            .ok_or_else(|| FetchError::normalization(KEY, "missing indicators.quote"))?;

        let col = |name: &str| -> Vec<Option<f64>> {
            quote
                .get(name)
                .and_then(|v| v.as_array())
                .map(|a| a.iter().map(parse_f64).collect())
                .unwrap_or_default()
        };
        let (opens, highs, lows, closes) = (col("open"), col("high"), col("low"), col("close"));
        let volumes = col("volume");

        let mut candles = Vec::with_capacity(timestamps.len());
        let mut prev_close: Option<f64> = None;
        for (i, ts) in timestamps.iter().enumerate() {
            let Some(date) = DateTime::from_timestamp(*ts, 0).map(|dt| dt.date_naive()) else {
                continue;
            };
            // Yahoo pads suspension days with nulls.
            let (Some(Some(open)), Some(Some(high)), Some(Some(low)), Some(Some(close))) = (
                opens.get(i).copied(),
                highs.get(i).copied(),
                lows.get(i).copied(),
                closes.get(i).copied(),
            ) else {
                continue;
            };
            let volume = volumes.get(i).copied().flatten().unwrap_or(0.0);

            let pct_chg = prev_close
                .filter(|p| *p > 0.0)
                .map(|p| 100.0 * (close - p) / p)
                .unwrap_or(0.0);
            prev_close = Some(close);

            candles.push(Candle {
                date,
                open,
                high,
                low,
                close,
                volume: volume as u64,
                // Chart feed carries no turnover column.
                amount: volume * close,
                pct_chg,
            });
        }

        CandleSeries::from_raw(candles).map_err(|e| FetchError::normalization(KEY, e))
    }
}

#[async_trait]
impl QuoteFetcher for YahooFetcher {
    async fn quote(&self, symbol: &Symbol) -> FetchResult<Option<RealtimeQuote>> {
        let result = match self.fetch_chart(symbol, None, None).await {
            Ok(r) => r,
            // Unknown foreign symbols surface as chart errors, not rows.
            Err(FetchError::Network { message, .. }) if message.contains("Not Found") => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let meta = result
            .get("meta")
            .cloned()
            .ok_or_else(|| FetchError::normalization(KEY, "missing chart meta"))?;

        let mut q = RealtimeQuote::new(symbol.code.clone(), KEY);
        q.name = meta
            .get("shortName")
            .or_else(|| meta.get("symbol"))
            .and_then(|v| v.as_str())
            .map(String::from);
        q.price = meta.get("regularMarketPrice").and_then(parse_f64);
        q.pre_close = meta
            .get("chartPreviousClose")
            .or_else(|| meta.get("previousClose"))
            .and_then(parse_f64);
        q.high = meta.get("regularMarketDayHigh").and_then(parse_f64);
        q.low = meta.get("regularMarketDayLow").and_then(parse_f64);
        q.volume = meta.get("regularMarketVolume").and_then(parse_f64);
        q.high_52w = meta.get("fiftyTwoWeekHigh").and_then(parse_f64);
        q.low_52w = meta.get("fiftyTwoWeekLow").and_then(parse_f64);
        q.derive_change_fields();

        Ok(q.is_basically_valid().then_some(q))
    }
}

#[async_trait]
impl ListingFetcher for YahooFetcher {
    async fn name(&self, symbol: &Symbol) -> FetchResult<Option<String>> {
        Ok(self.quote(symbol).await?.and_then(|q| q.name))
    }

    async fn stock_list(&self) -> FetchResult<Option<Vec<(String, String)>>> {
        Ok(None)
    }
}
