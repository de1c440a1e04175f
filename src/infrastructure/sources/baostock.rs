//! Baostock adapter.
//!
//! Session-based source: every operation is bracketed by an explicit
//! login/logout pair, and the logout must run on every exit path; a
//! leaked session blocks subsequent logins from the same address for
//! minutes. Slowest of the domestic sources, so it sits last in the
//! failover chain, but it keeps working when the commercial feeds ban.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use tracing::warn;

use crate::domain::candle::{Candle, CandleSeries};
use crate::domain::errors::{FetchError, FetchResult};
use crate::domain::ports::{DailyFetcher, ListingFetcher, Source};
use crate::domain::symbol::Symbol;
use crate::infrastructure::sources::{SourceContext, field_f64};

pub const KEY: &str = "baostock";

const BASE_URL: &str = "http://www.baostock.com/api/v1";

pub struct BaostockFetcher {
    ctx: SourceContext,
    priority: i32,
}

struct Session {
    token: String,
}

impl BaostockFetcher {
    pub fn new(ctx: SourceContext, priority: i32) -> Self {
        Self { ctx, priority }
    }

    async fn login(&self) -> FetchResult<Session> {
        self.ctx.gate.wait(KEY).await;
        let resp = self
            .ctx
            .client
            .post(format!("{}/login", BASE_URL))
            .json(&json!({ "user": "anonymous", "password": "123456" }))
            .send()
            .await
            .map_err(|e| FetchError::network(KEY, e))?;
        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| FetchError::normalization(KEY, e))?;
        let code = payload
            .get("error_code")
            .and_then(|c| c.as_str())
            .unwrap_or("-1");
        if code != "0" {
            return Err(FetchError::network(
                KEY,
                format!(
                    "login failed: {}",
                    payload
                        .get("error_msg")
                        .and_then(|m| m.as_str())
                        .unwrap_or("?")
                ),
            ));
        }
        let token = payload
            .get("token")
            .and_then(|t| t.as_str())
            .ok_or_else(|| FetchError::normalization(KEY, "login response missing token"))?
            .to_string();
        Ok(Session { token })
    }

    async fn logout(&self, session: Session) {
        let result = self
            .ctx
            .client
            .post(format!("{}/logout", BASE_URL))
            .json(&json!({ "token": session.token }))
            .send()
            .await;
        if let Err(e) = result {
            // Nothing to do beyond noting it; the server expires the
            // session on its own eventually.
            warn!("Baostock logout failed: {}", e);
        }
    }

    /// Run `op` inside a login/logout bracket. Logout runs on every exit
    /// path, including when `op` fails.
    async fn with_session<T, F, Fut>(&self, op: F) -> FetchResult<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: std::future::Future<Output = FetchResult<T>>,
    {
        let session = self.login().await?;
        let token = session.token.clone();
        let result = op(token).await;
        self.logout(session).await;
        result
    }

    async fn query_history(
        &self,
        token: String,
        symbol: &Symbol,
        start: NaiveDate,
        end: NaiveDate,
    ) -> FetchResult<CandleSeries> {
        self.ctx.gate.wait(KEY).await;
        let resp = self
            .ctx
            .client
            .post(format!("{}/query_history_k_data", BASE_URL))
            .json(&json!({
                "token": token,
                "code": symbol.baostock_code(),
                "fields": "date,open,high,low,close,volume,amount,pctChg",
                "start_date": start.format("%Y-%m-%d").to_string(),
                "end_date": end.format("%Y-%m-%d").to_string(),
                "frequency": "d",
                "adjustflag": "2",
            }))
            .send()
            .await
            .map_err(|e| FetchError::network(KEY, e))?;
        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| FetchError::normalization(KEY, e))?;

        let rows = payload
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| FetchError::normalization(KEY, "missing data rows"))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let cols: Vec<&str> = row
                .as_array()
                .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
                .unwrap_or_default();
            if cols.len() < 8 {
                return Err(FetchError::normalization(KEY, "history row too short"));
            }
            let date = cols[0]
                .parse::<NaiveDate>()
                .map_err(|e| FetchError::normalization(KEY, e))?;
            let num = |i: usize| field_f64(cols[i]).unwrap_or(0.0);
            // Suspension days come through with empty price fields.
            if field_f64(cols[4]).is_none() {
                continue;
            }
            candles.push(Candle {
                date,
                open: num(1),
                high: num(2),
                low: num(3),
                close: num(4),
                // Baostock reports volume in shares already.
                volume: num(5) as u64,
                amount: num(6),
                pct_chg: num(7),
            });
        }

        CandleSeries::from_raw(candles).map_err(|e| FetchError::normalization(KEY, e))
    }
}

impl Source for BaostockFetcher {
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
impl DailyFetcher for BaostockFetcher {
    async fn daily(
        &self,
        symbol: &Symbol,
        start: NaiveDate,
        end: NaiveDate,
    ) -> FetchResult<CandleSeries> {
        if !symbol.market.is_a_share() {
            return Err(FetchError::unsupported(KEY, "仅支持 A 股日线"));
        }
        self.with_session(|token| self.query_history(token, symbol, start, end))
            .await
    }
}

#[async_trait]
impl ListingFetcher for BaostockFetcher {
    async fn name(&self, symbol: &Symbol) -> FetchResult<Option<String>> {
        if !symbol.market.is_a_share() {
            return Ok(None);
        }
        self.with_session(|token| async move {
            self.ctx.gate.wait(KEY).await;
            let resp = self
                .ctx
                .client
                .post(format!("{}/query_stock_basic", BASE_URL))
                .json(&json!({ "token": token, "code": symbol.baostock_code() }))
                .send()
                .await
                .map_err(|e| FetchError::network(KEY, e))?;
            let payload: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| FetchError::normalization(KEY, e))?;
            Ok(payload
                .get("data")
                .and_then(|d| d.as_array())
                .and_then(|rows| rows.first())
                .and_then(|row| row.as_array())
                .and_then(|cols| cols.get(1))
                .and_then(|v| v.as_str())
                .map(String::from))
        })
        .await
    }

    async fn stock_list(&self) -> FetchResult<Option<Vec<(String, String)>>> {
        // The bulk listing endpoint is slow enough to trip the session
        // timeout; rely on the richer sources for listings.
        Ok(None)
    }
}
