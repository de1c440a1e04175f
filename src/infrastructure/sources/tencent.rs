//! Tencent gtimg quote adapter.
//!
//! Per-symbol source: one cheap request per ticker, no whole-market pull.
//! The richest per-symbol feed for A shares (volume ratio, turnover,
//! pe/pb, market caps); also serves HK symbols.

use async_trait::async_trait;

use crate::domain::errors::{FetchError, FetchResult};
use crate::domain::ports::{ListingFetcher, QuoteFetcher, Source};
use crate::domain::quote::RealtimeQuote;
use crate::domain::symbol::{Market, Symbol};
use crate::infrastructure::sources::{SourceContext, field_f64};

pub const KEY: &str = "tencent";

const QUOTE_URL: &str = "https://qt.gtimg.cn/q=";

pub struct TencentFetcher {
    ctx: SourceContext,
    priority: i32,
}

impl TencentFetcher {
    pub fn new(ctx: SourceContext, priority: i32) -> Self {
        Self { ctx, priority }
    }

    async fn fetch_raw(&self, qt_code: &str) -> FetchResult<Option<String>> {
        self.ctx.gate.wait(KEY).await;

        let url = format!("{}{}", QUOTE_URL, qt_code);
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
                format!("HTTP {} for {}", resp.status(), qt_code),
            ));
        }

        // GBK upstream; the fields we parse are ASCII and the name is
        // passed through lossily when the encoding bites.
        let bytes = resp.bytes().await.map_err(|e| FetchError::network(KEY, e))?;
        let text = String::from_utf8_lossy(&bytes).to_string();

        // v_sh600519="1~贵州茅台~600519~...~";  pv_none for unknown codes.
        if text.contains("v_pv_none") || !text.contains('=') {
            return Ok(None);
        }
        let payload = text
            .split_once('=')
            .map(|(_, rhs)| rhs.trim().trim_matches(|c| c == '"' || c == ';').to_string())
            .unwrap_or_default();
        if payload.is_empty() {
            return Ok(None);
        }
        Ok(Some(payload))
    }

    fn parse_quote(&self, symbol: &Symbol, payload: &str) -> Option<RealtimeQuote> {
        let parts: Vec<&str> = payload.split('~').collect();
        if parts.len() < 40 {
            return None;
        }

        let mut q = RealtimeQuote::new(symbol.code.clone(), KEY);
        q.name = Some(parts[1].to_string()).filter(|s| !s.is_empty());
        q.price = field_f64(parts[3]);
        q.pre_close = field_f64(parts[4]);
        q.open = field_f64(parts[5]);
        q.change_amount = field_f64(parts[31]);
        q.change_pct = field_f64(parts[32]);
        q.high = field_f64(parts[33]);
        q.low = field_f64(parts[34]);
        // Volume arrives in lots of 100 shares, amount in 10k yuan.
        q.volume = field_f64(parts[36]).map(|v| v * 100.0);
        q.amount = field_f64(parts[37]).map(|v| v * 10_000.0);
        if parts.len() > 49 {
            q.turnover_rate = field_f64(parts[38]);
            q.pe = field_f64(parts[39]);
            q.amplitude = field_f64(parts[43]);
            q.circ_mv = field_f64(parts[44]).map(|v| v * 1e8);
            q.total_mv = field_f64(parts[45]).map(|v| v * 1e8);
            q.pb = field_f64(parts[46]);
            q.volume_ratio = field_f64(parts[49]);
        }
        q.derive_change_fields();

        q.is_basically_valid().then_some(q)
    }
}

impl Source for TencentFetcher {
    fn key(&self) -> &'static str {
        KEY
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn quotes(&self) -> Option<&dyn QuoteFetcher> {
        Some(self)
    }

    fn listing(&self) -> Option<&dyn ListingFetcher> {
        Some(self)
    }
}

#[async_trait]
impl QuoteFetcher for TencentFetcher {
    async fn quote(&self, symbol: &Symbol) -> FetchResult<Option<RealtimeQuote>> {
        if matches!(symbol.market, Market::Us | Market::Tw | Market::Index) {
            return Ok(None);
        }
        let Some(payload) = self.fetch_raw(&symbol.tencent_code()).await? else {
            return Ok(None);
        };
        Ok(self.parse_quote(symbol, &payload))
    }
}

#[async_trait]
impl ListingFetcher for TencentFetcher {
    async fn name(&self, symbol: &Symbol) -> FetchResult<Option<String>> {
        Ok(self.quote(symbol).await?.and_then(|q| q.name))
    }

    async fn stock_list(&self) -> FetchResult<Option<Vec<(String, String)>>> {
        // Per-symbol source; no bulk listing endpoint.
        Ok(None)
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

    fn fetcher() -> TencentFetcher {
        let ctx = SourceContext {
            client: HttpClientFactory::create_client(None),
            gate: Arc::new(RateGate::new(HashMap::new())),
            breakers: Arc::new(BreakerRegistry::new(3, Duration::from_secs(300))),
            snapshots: Arc::new(SnapshotCache::new()),
        };
        TencentFetcher::new(ctx, 1)
    }

    #[test]
    fn parses_gtimg_payload() {
        // 52 "~"-separated fields, trimmed to the ones we read.
        let mut parts = vec![""; 52];
        parts[1] = "贵州茅台";
        parts[2] = "600519";
        parts[3] = "1700.00";
        parts[4] = "1690.00";
        parts[5] = "1692.00";
        parts[31] = "10.00";
        parts[32] = "0.59";
        parts[33] = "1705.00";
        parts[34] = "1688.00";
        parts[36] = "25000";
        parts[37] = "425000";
        parts[38] = "0.20";
        parts[39] = "32.5";
        parts[43] = "1.01";
        parts[44] = "21350";
        parts[45] = "21350";
        parts[46] = "8.9";
        parts[49] = "1.15";
        let payload = parts.join("~");

        let symbol = Symbol::classify("600519").unwrap();
        let q = fetcher().parse_quote(&symbol, &payload).unwrap();

        assert_eq!(q.name.as_deref(), Some("贵州茅台"));
        assert_eq!(q.price, Some(1700.0));
        assert_eq!(q.volume, Some(2_500_000.0));
        assert_eq!(q.amount, Some(4_250_000_000.0));
        assert_eq!(q.volume_ratio, Some(1.15));
        assert!((q.change_pct.unwrap() - 0.59).abs() < 1e-9);
    }

    #[test]
    fn short_payload_is_rejected() {
        let symbol = Symbol::classify("600519").unwrap();
        assert!(fetcher().parse_quote(&symbol, "1~x~600519").is_none());
    }
}
