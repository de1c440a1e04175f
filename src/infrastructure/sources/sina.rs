//! Sina hq adapter.
//!
//! Per-symbol source with fewer fields than Tencent: basic OHLC, volume
//! and amount, no volume ratio or valuation columns. Stable under load,
//! which is why it sits high in the default quote preference list.

use async_trait::async_trait;

use crate::domain::errors::{FetchError, FetchResult};
use crate::domain::ports::{ListingFetcher, QuoteFetcher, Source};
use crate::domain::quote::RealtimeQuote;
use crate::domain::symbol::{Market, Symbol};
use crate::infrastructure::sources::{SourceContext, field_f64};

pub const KEY: &str = "sina";

const QUOTE_URL: &str = "https://hq.sinajs.cn/list=";

pub struct SinaFetcher {
    ctx: SourceContext,
    priority: i32,
}

impl SinaFetcher {
    pub fn new(ctx: SourceContext, priority: i32) -> Self {
        Self { ctx, priority }
    }

    async fn fetch_payload(&self, list_code: &str) -> FetchResult<Option<String>> {
        self.ctx.gate.wait(KEY).await;

        let url = format!("{}{}", QUOTE_URL, list_code);
        let resp = self
            .ctx
            .client
            .get(&url)
            // Sina rejects requests without a finance referer.
            .header("Referer", "https://finance.sina.com.cn/")
            .send()
            .await
            .map_err(|e| FetchError::network(KEY, e))?;
        if !resp.status().is_success() {
            return Err(FetchError::network(
                KEY,
                format!("HTTP {} for {}", resp.status(), list_code),
            ));
        }

        let bytes = resp.bytes().await.map_err(|e| FetchError::network(KEY, e))?;
        let text = String::from_utf8_lossy(&bytes).to_string();

        // var hq_str_sh600519="贵州茅台,1692.00,1690.00,1700.00,...";
        let payload = text
            .split_once('=')
            .map(|(_, rhs)| rhs.trim().trim_matches(|c| c == '"' || c == ';').to_string())
            .unwrap_or_default();
        Ok((!payload.is_empty()).then_some(payload))
    }

    fn parse_quote(&self, symbol: &Symbol, payload: &str) -> Option<RealtimeQuote> {
        let parts: Vec<&str> = payload.split(',').collect();
        if parts.len() < 10 {
            return None;
        }

        let mut q = RealtimeQuote::new(symbol.code.clone(), KEY);
        q.name = Some(parts[0].to_string()).filter(|s| !s.is_empty());
        q.open = field_f64(parts[1]);
        q.pre_close = field_f64(parts[2]);
        q.price = field_f64(parts[3]);
        q.high = field_f64(parts[4]);
        q.low = field_f64(parts[5]);
        // Already in shares / yuan.
        q.volume = field_f64(parts[8]);
        q.amount = field_f64(parts[9]);
        q.derive_change_fields();

        q.is_basically_valid().then_some(q)
    }
}

impl Source for SinaFetcher {
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
impl QuoteFetcher for SinaFetcher {
    async fn quote(&self, symbol: &Symbol) -> FetchResult<Option<RealtimeQuote>> {
        if !(symbol.market.is_a_share() || symbol.market.is_etf()) {
            return Ok(None);
        }
        let Some(payload) = self.fetch_payload(&symbol.sina_code()).await? else {
            return Ok(None);
        };
        Ok(self.parse_quote(symbol, &payload))
    }
}

#[async_trait]
impl ListingFetcher for SinaFetcher {
    async fn name(&self, symbol: &Symbol) -> FetchResult<Option<String>> {
        Ok(self.quote(symbol).await?.and_then(|q| q.name))
    }

    async fn stock_list(&self) -> FetchResult<Option<Vec<(String, String)>>> {
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

    fn fetcher() -> SinaFetcher {
        let ctx = SourceContext {
            client: HttpClientFactory::create_client(None),
            gate: Arc::new(RateGate::new(HashMap::new())),
            breakers: Arc::new(BreakerRegistry::new(3, Duration::from_secs(300))),
            snapshots: Arc::new(SnapshotCache::new()),
        };
        SinaFetcher::new(ctx, 2)
    }

    #[test]
    fn parses_sina_payload() {
        let payload = "贵州茅台,1692.00,1690.00,1700.00,1705.00,1688.00,1699.99,1700.00,2500000,4250000000.00,100,1699.99,2025-07-01,15:00:00,00";
        let symbol = Symbol::classify("600519").unwrap();
        let q = fetcher().parse_quote(&symbol, payload).unwrap();

        assert_eq!(q.name.as_deref(), Some("贵州茅台"));
        assert_eq!(q.price, Some(1700.0));
        assert_eq!(q.pre_close, Some(1690.0));
        assert_eq!(q.volume, Some(2_500_000.0));
        // change derived from price vs pre_close
        assert!((q.change_pct.unwrap() - 100.0 * 10.0 / 1690.0).abs() < 1e-9);
        // no volume ratio on this feed
        assert!(q.volume_ratio.is_none());
    }

    #[test]
    fn suspended_stub_payload_is_rejected() {
        let symbol = Symbol::classify("600519").unwrap();
        assert!(fetcher().parse_quote(&symbol, "").is_none());
        assert!(fetcher().parse_quote(&symbol, "x,1,2").is_none());
    }
}
