//! Tushare Pro adapter.
//!
//! Token-paid source with a strict per-minute quota (free tier: 80
//! calls/min, enforced by the shared rate gate). High-quality daily bars
//! and the authoritative listing. When a token is configured the
//! source's priority is elevated above every free upstream.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;

use crate::domain::candle::{Candle, CandleSeries};
use crate::domain::errors::{FetchError, FetchResult};
use crate::domain::ports::{DailyFetcher, ListingFetcher, Source};
use crate::domain::symbol::{Market, Symbol};
use crate::infrastructure::sources::{SourceContext, parse_f64};

pub const KEY: &str = "tushare";

const API_URL: &str = "https://api.tushare.pro";

/// Priority used when a token is configured: beats every free source.
pub const ELEVATED_PRIORITY: i32 = -1;

pub struct TushareFetcher {
    ctx: SourceContext,
    token: Option<String>,
    priority: i32,
}

impl TushareFetcher {
    pub fn new(ctx: SourceContext, token: Option<String>, default_priority: i32) -> Self {
        let priority = if token.is_some() {
            ELEVATED_PRIORITY
        } else {
            default_priority
        };
        Self {
            ctx,
            token,
            priority,
        }
    }

    fn token(&self) -> FetchResult<&str> {
        self.token
            .as_deref()
            .ok_or_else(|| FetchError::configuration(KEY, "TUSHARE_TOKEN missing"))
    }

    /// One Tushare RPC: `{api_name, token, params, fields}` in,
    /// `{code, msg, data: {fields, items}}` out.
    async fn call(
        &self,
        api_name: &str,
        params: serde_json::Value,
        fields: &str,
    ) -> FetchResult<(Vec<String>, Vec<serde_json::Value>)> {
        let token = self.token()?.to_string();
        self.ctx.gate.wait(KEY).await;

        let body = json!({
            "api_name": api_name,
            "token": token,
            "params": params,
            "fields": fields,
        });

        let resp = self
            .ctx
            .client
            .post(API_URL)
            .json(&body)
            .send()
            .await
            .map_err(|e| FetchError::network(KEY, e))?;
        if !resp.status().is_success() {
            return Err(FetchError::network(
                KEY,
                format!("HTTP {} from {}", resp.status(), api_name),
            ));
        }

        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| FetchError::normalization(KEY, e))?;

        let code = payload.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
        if code != 0 {
            let msg = payload
                .get("msg")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string();
            // Quota exhaustion comes back as a semantic error message.
            return if msg.contains("每分钟") || msg.contains("访问频次") {
                Err(FetchError::rate_limited(KEY, msg))
            } else {
                Err(FetchError::network(KEY, format!("{}: {}", api_name, msg)))
            };
        }

        let data = payload
            .get("data")
            .ok_or_else(|| FetchError::normalization(KEY, "missing data"))?;
        let fields: Vec<String> = data
            .get("fields")
            .and_then(|f| f.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        let items = data
            .get("items")
            .and_then(|i| i.as_array())
            .cloned()
            .unwrap_or_default();
        Ok((fields, items))
    }

    fn column(fields: &[String], name: &str) -> Option<usize> {
        fields.iter().position(|f| f == name)
    }
}

impl Source for TushareFetcher {
    fn key(&self) -> &'static str {
        KEY
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn daily(&self) -> Option<&dyn DailyFetcher> {
        Some(self)
    }

    fn listing(&self) -> Option<&dyn ListingFetcher> {
        Some(self)
    }
}

#[async_trait]
impl DailyFetcher for TushareFetcher {
    async fn daily(
        &self,
        symbol: &Symbol,
        start: NaiveDate,
        end: NaiveDate,
    ) -> FetchResult<CandleSeries> {
        if !symbol.market.is_a_share() {
            return Err(FetchError::unsupported(KEY, "仅支持 A 股日线"));
        }

        let (fields, items) = self
            .call(
                "daily",
                json!({
                    "ts_code": symbol.tushare_code(),
                    "start_date": start.format("%Y%m%d").to_string(),
                    "end_date": end.format("%Y%m%d").to_string(),
                }),
                "ts_code,trade_date,open,high,low,close,vol,amount,pct_chg",
            )
            .await?;

        let idx = |name: &str| {
            Self::column(&fields, name)
                .ok_or_else(|| FetchError::normalization(KEY, format!("missing column {}", name)))
        };
        let (i_date, i_open, i_high, i_low, i_close, i_vol, i_amount, i_pct) = (
            idx("trade_date")?,
            idx("open")?,
            idx("high")?,
            idx("low")?,
            idx("close")?,
            idx("vol")?,
            idx("amount")?,
            idx("pct_chg")?,
        );

        let mut candles = Vec::with_capacity(items.len());
        for row in &items {
            let cols = row
                .as_array()
                .ok_or_else(|| FetchError::normalization(KEY, "row not an array"))?;
            let date = cols
                .get(i_date)
                .and_then(|v| v.as_str())
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y%m%d").ok())
                .ok_or_else(|| FetchError::normalization(KEY, "bad trade_date"))?;
            let num = |i: usize| cols.get(i).and_then(parse_f64).unwrap_or(0.0);

            candles.push(Candle {
                date,
                open: num(i_open),
                high: num(i_high),
                low: num(i_low),
                close: num(i_close),
                // vol in lots of 100 shares, amount in thousand yuan.
                volume: (num(i_vol) * 100.0) as u64,
                amount: num(i_amount) * 1_000.0,
                pct_chg: num(i_pct),
            });
        }

        CandleSeries::from_raw(candles).map_err(|e| FetchError::normalization(KEY, e))
    }
}

#[async_trait]
impl ListingFetcher for TushareFetcher {
    async fn name(&self, symbol: &Symbol) -> FetchResult<Option<String>> {
        if !symbol.market.is_a_share() {
            return Ok(None);
        }
        let (fields, items) = self
            .call(
                "stock_basic",
                json!({ "ts_code": symbol.tushare_code() }),
                "ts_code,symbol,name",
            )
            .await?;
        let Some(i_name) = Self::column(&fields, "name") else {
            return Ok(None);
        };
        Ok(items
            .first()
            .and_then(|row| row.as_array())
            .and_then(|cols| cols.get(i_name))
            .and_then(|v| v.as_str())
            .map(String::from))
    }

    async fn stock_list(&self) -> FetchResult<Option<Vec<(String, String)>>> {
        let (fields, items) = self
            .call(
                "stock_basic",
                json!({ "list_status": "L" }),
                "ts_code,symbol,name",
            )
            .await?;
        let (Some(i_symbol), Some(i_name)) = (
            Self::column(&fields, "symbol"),
            Self::column(&fields, "name"),
        ) else {
            return Ok(None);
        };

        let listing: Vec<(String, String)> = items
            .iter()
            .filter_map(|row| {
                let cols = row.as_array()?;
                Some((
                    cols.get(i_symbol)?.as_str()?.to_string(),
                    cols.get(i_name)?.as_str()?.to_string(),
                ))
            })
            .collect();
        Ok((!listing.is_empty()).then_some(listing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::core::circuit_breaker::BreakerRegistry;
    use crate::infrastructure::core::http_client_factory::HttpClientFactory;
    use crate::infrastructure::core::rate_gate::RateGate;
    use crate::infrastructure::core::ttl_cache::SnapshotCache;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx() -> SourceContext {
        SourceContext {
            client: HttpClientFactory::create_client(None),
            gate: Arc::new(RateGate::new(HashMap::new())),
            breakers: Arc::new(BreakerRegistry::new(3, Duration::from_secs(300))),
            snapshots: Arc::new(SnapshotCache::new()),
        }
    }

    #[test]
    fn token_elevates_priority() {
        let with_token = TushareFetcher::new(ctx(), Some("tok".into()), 4);
        assert_eq!(with_token.priority(), ELEVATED_PRIORITY);

        let without = TushareFetcher::new(ctx(), None, 4);
        assert_eq!(without.priority(), 4);
    }

    #[tokio::test]
    async fn missing_token_is_a_configuration_error() {
        let fetcher = TushareFetcher::new(ctx(), None, 4);
        let symbol = Symbol::classify("600519").unwrap();
        let err = DailyFetcher::daily(
            &fetcher,
            &symbol,
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FetchError::Configuration { .. }));
        assert_eq!(err.breaker_weight(), 0);
    }

    #[test]
    fn non_a_share_is_unsupported() {
        let symbol = Symbol::classify("AAPL").unwrap();
        assert_eq!(symbol.market, Market::Us);
        // Unsupported markets never reach the network.
        let fetcher = TushareFetcher::new(ctx(), Some("tok".into()), 4);
        let err = tokio_test::block_on(DailyFetcher::daily(
            &fetcher,
            &symbol,
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
        ))
        .unwrap_err();
        assert!(matches!(err, FetchError::Unsupported { .. }));
    }
}
