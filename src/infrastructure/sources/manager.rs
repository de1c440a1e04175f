use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::candle::CandleSeries;
use crate::domain::chips::ChipDistribution;
use crate::domain::errors::{FetchError, FetchResult};
use crate::domain::overview::{IndexQuote, MarketOverview, MarketStats, SectorRankings};
use crate::domain::ports::Source;
use crate::domain::quote::RealtimeQuote;
use crate::domain::symbol::{Market, Symbol};
use crate::infrastructure::core::circuit_breaker::BreakerRegistry;
use crate::infrastructure::sources::yahoo;

/// Chip distribution runs on its own breaker key: the upstream endpoint
/// is flaky and must not poison the quote/daily breaker for the source.
const CHIPS_BREAKER_KEY: &str = "chips";

/// Quote prefetch only pays off when one snapshot covers the whole batch.
const PREFETCH_MIN_CODES: usize = 5;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Source keys to try for quotes, in order. Distinct from raw
    /// priority: quote endpoints trade completeness for stability.
    pub quote_preference: Vec<String>,
    pub enable_realtime_quote: bool,
    pub enable_chip_distribution: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            quote_preference: vec![
                "tencent".to_string(),
                "sina".to_string(),
                "eastmoney".to_string(),
            ],
            enable_realtime_quote: true,
            enable_chip_distribution: true,
        }
    }
}

/// Federates every configured source behind one interface: sequential
/// failover in priority order, per-source breaker accounting, and the
/// shared name cache.
pub struct FetcherManager {
    sources: Vec<Arc<dyn Source>>,
    breakers: Arc<BreakerRegistry>,
    config: ManagerConfig,
    name_cache: Mutex<HashMap<String, String>>,
}

impl FetcherManager {
    pub fn new(
        mut sources: Vec<Arc<dyn Source>>,
        breakers: Arc<BreakerRegistry>,
        config: ManagerConfig,
    ) -> Self {
        sources.sort_by_key(|s| s.priority());
        info!(
            "FetcherManager: sources by priority: {}",
            sources
                .iter()
                .map(|s| format!("{}({})", s.key(), s.priority()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Self {
            sources,
            breakers,
            config,
            name_cache: Mutex::new(HashMap::new()),
        }
    }

    fn source_by_key(&self, key: &str) -> Option<&Arc<dyn Source>> {
        self.sources.iter().find(|s| s.key() == key)
    }

    fn record<T>(&self, key: &str, outcome: &FetchResult<T>) {
        match outcome {
            Ok(_) => self.breakers.record_success(key),
            Err(e) => self.breakers.record_failure(key, e.breaker_weight(), &e.to_string()),
        }
    }

    /// Daily history with failover. Returns the series plus the key of
    /// the source that produced it, for report attribution.
    pub async fn daily(
        &self,
        symbol: &Symbol,
        start: NaiveDate,
        end: NaiveDate,
    ) -> FetchResult<(CandleSeries, String)> {
        let mut failures = Vec::new();

        for source in &self.sources {
            let Some(fetcher) = source.daily() else {
                continue;
            };
            let key = source.key();
            if !self.breakers.is_available(key) {
                debug!("daily[{}]: breaker open for {}, skipping", symbol, key);
                continue;
            }

            let outcome = fetcher.daily(symbol, start, end).await;
            self.record(key, &outcome);
            match outcome {
                Ok(series) if !series.is_empty() => {
                    debug!("daily[{}]: {} rows from {}", symbol, series.len(), key);
                    return Ok((series, key.to_string()));
                }
                Ok(_) => {
                    debug!("daily[{}]: {} returned no rows", symbol, key);
                }
                Err(e) => {
                    warn!("daily[{}]: {} failed: {}", symbol, key, e);
                    failures.push(format!("{}: {}", key, e));
                }
            }
        }

        Err(FetchError::Aggregate {
            messages: if failures.is_empty() {
                vec![format!("no source returned history for {}", symbol)]
            } else {
                failures
            },
        })
    }

    /// Realtime quote. Foreign markets (US and TW) route exclusively to
    /// the foreign-market source, which is the only upstream that quotes
    /// them; everything else walks the configured preference list.
    pub async fn quote(&self, symbol: &Symbol) -> Option<RealtimeQuote> {
        if !self.config.enable_realtime_quote {
            return None;
        }

        if matches!(symbol.market, Market::Us | Market::Tw) {
            return self.quote_from(yahoo::KEY, symbol).await;
        }

        for key in self.config.quote_preference.clone() {
            if let Some(quote) = self.quote_from(&key, symbol).await {
                return Some(quote);
            }
        }
        None
    }

    async fn quote_from(&self, key: &str, symbol: &Symbol) -> Option<RealtimeQuote> {
        let source = self.source_by_key(key)?;
        let fetcher = source.quotes()?;
        if !self.breakers.is_available(key) {
            debug!("quote[{}]: breaker open for {}", symbol, key);
            return None;
        }

        let outcome = fetcher.quote(symbol).await;
        self.record(key, &outcome);
        match outcome {
            Ok(Some(q)) if q.is_basically_valid() => Some(q),
            Ok(_) => None,
            Err(e) => {
                warn!("quote[{}]: {} failed: {}", symbol, key, e);
                None
            }
        }
    }

    /// Chip distribution, gated by feature flag and its own breaker.
    /// ETFs, indices and foreign symbols never have one.
    pub async fn chips(&self, symbol: &Symbol) -> Option<ChipDistribution> {
        if !self.config.enable_chip_distribution {
            return None;
        }
        if !symbol.market.is_a_share() {
            return None;
        }
        if !self.breakers.is_available(CHIPS_BREAKER_KEY) {
            debug!("chips[{}]: breaker open", symbol);
            return None;
        }

        for source in &self.sources {
            let Some(fetcher) = source.chips() else {
                continue;
            };
            match fetcher.chips(symbol).await {
                Ok(Some(chips)) => {
                    self.breakers.record_success(CHIPS_BREAKER_KEY);
                    return Some(chips);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("chips[{}]: {} failed: {}", symbol, source.key(), e);
                    self.breakers
                        .record_failure(CHIPS_BREAKER_KEY, e.breaker_weight(), &e.to_string());
                }
            }
        }
        None
    }

    /// Resolve display names for a batch: name cache first, then bulk
    /// listings, then per-symbol lookups for the residue.
    pub async fn batch_names(&self, symbols: &[Symbol]) -> HashMap<String, String> {
        let mut resolved = HashMap::new();
        let mut missing: Vec<&Symbol> = Vec::new();

        {
            let cache = self.name_cache.lock().await;
            for symbol in symbols {
                match cache.get(&symbol.code) {
                    Some(name) => {
                        resolved.insert(symbol.code.clone(), name.clone());
                    }
                    None => missing.push(symbol),
                }
            }
        }
        if missing.is_empty() {
            return resolved;
        }

        // One bulk listing can cover the whole residue.
        for source in &self.sources {
            let Some(listing) = source.listing() else {
                continue;
            };
            let key = source.key();
            if !self.breakers.is_available(key) {
                continue;
            }
            let outcome = listing.stock_list().await;
            self.record(key, &outcome);
            if let Ok(Some(list)) = outcome {
                let by_code: HashMap<_, _> = list.into_iter().collect();
                let mut cache = self.name_cache.lock().await;
                missing.retain(|symbol| match by_code.get(&symbol.code) {
                    Some(name) => {
                        cache.insert(symbol.code.clone(), name.clone());
                        resolved.insert(symbol.code.clone(), name.clone());
                        false
                    }
                    None => true,
                });
                if missing.is_empty() {
                    return resolved;
                }
            }
        }

        // Per-symbol fallback for whatever is left.
        for symbol in missing {
            if let Some(name) = self.name(symbol).await {
                resolved.insert(symbol.code.clone(), name);
            }
        }
        resolved
    }

    pub async fn name(&self, symbol: &Symbol) -> Option<String> {
        if let Some(name) = self.name_cache.lock().await.get(&symbol.code) {
            return Some(name.clone());
        }

        for source in &self.sources {
            let Some(listing) = source.listing() else {
                continue;
            };
            let key = source.key();
            if !self.breakers.is_available(key) {
                continue;
            }
            let outcome = listing.name(symbol).await;
            self.record(key, &outcome);
            if let Ok(Some(name)) = outcome {
                self.name_cache
                    .lock()
                    .await
                    .insert(symbol.code.clone(), name.clone());
                return Some(name);
            }
        }
        None
    }

    /// Warm the snapshot cache ahead of a batch. No-op unless the
    /// preferred quote source is snapshot-oriented and the batch is big
    /// enough for one market pull to beat per-symbol calls.
    pub async fn prefetch_quotes(&self, symbols: &[Symbol]) {
        if !self.config.enable_realtime_quote || symbols.len() < PREFETCH_MIN_CODES {
            return;
        }
        let Some(preferred) = self
            .config
            .quote_preference
            .first()
            .and_then(|key| self.source_by_key(key))
        else {
            return;
        };
        if !preferred.snapshot_oriented() {
            return;
        }
        let Some(probe) = symbols
            .iter()
            .find(|s| s.market.is_a_share() || s.market.is_etf())
        else {
            return;
        };

        info!(
            "Prefetching {} snapshot for a batch of {} symbols",
            preferred.key(),
            symbols.len()
        );
        let _ = self.quote_from(preferred.key(), probe).await;
    }

    pub async fn indices(&self) -> Option<Vec<IndexQuote>> {
        for source in &self.sources {
            let Some(agg) = source.aggregates() else { continue };
            let key = source.key();
            if !self.breakers.is_available(key) {
                continue;
            }
            let outcome = agg.indices().await;
            self.record(key, &outcome);
            if let Ok(Some(indices)) = outcome {
                return Some(indices);
            }
        }
        None
    }

    pub async fn market_stats(&self) -> Option<MarketStats> {
        for source in &self.sources {
            let Some(agg) = source.aggregates() else { continue };
            let key = source.key();
            if !self.breakers.is_available(key) {
                continue;
            }
            let outcome = agg.market_stats().await;
            self.record(key, &outcome);
            if let Ok(Some(stats)) = outcome {
                return Some(stats);
            }
        }
        None
    }

    pub async fn sectors(&self, n: usize) -> Option<SectorRankings> {
        for source in &self.sources {
            let Some(agg) = source.aggregates() else { continue };
            let key = source.key();
            if !self.breakers.is_available(key) {
                continue;
            }
            let outcome = agg.sectors(n).await;
            self.record(key, &outcome);
            if let Ok(Some(sectors)) = outcome {
                return Some(sectors);
            }
        }
        None
    }

    /// Everything the market-review phase needs, in one call.
    pub async fn market_overview(&self, sector_count: usize) -> MarketOverview {
        MarketOverview {
            indices: self.indices().await.unwrap_or_default(),
            stats: self.market_stats().await,
            sectors: self.sectors(sector_count).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Candle;
    use crate::domain::ports::{DailyFetcher, QuoteFetcher};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScriptedSource {
        key: &'static str,
        priority: i32,
        snapshot: bool,
        daily_error: Option<fn() -> FetchError>,
        quote_price: Option<f64>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn ok(key: &'static str, priority: i32) -> Self {
            Self {
                key,
                priority,
                snapshot: false,
                daily_error: None,
                quote_price: Some(10.0),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(key: &'static str, priority: i32, err: fn() -> FetchError) -> Self {
            Self {
                key,
                priority,
                snapshot: false,
                daily_error: Some(err),
                quote_price: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Source for ScriptedSource {
        fn key(&self) -> &'static str {
            self.key
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn snapshot_oriented(&self) -> bool {
            self.snapshot
        }
        fn daily(&self) -> Option<&dyn DailyFetcher> {
            Some(self)
        }
        fn quotes(&self) -> Option<&dyn QuoteFetcher> {
            Some(self)
        }
    }

    #[async_trait]
    impl DailyFetcher for ScriptedSource {
        async fn daily(
            &self,
            _symbol: &Symbol,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> FetchResult<CandleSeries> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(make_err) = self.daily_error {
                return Err(make_err());
            }
            let candle = Candle {
                date: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
                open: 10.0,
                high: 10.5,
                low: 9.8,
                close: 10.2,
                volume: 1000,
                amount: 10_200.0,
                pct_chg: 1.0,
            };
            Ok(CandleSeries::from_raw(vec![candle]).unwrap())
        }
    }

    #[async_trait]
    impl QuoteFetcher for ScriptedSource {
        async fn quote(&self, symbol: &Symbol) -> FetchResult<Option<RealtimeQuote>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.quote_price.map(|p| {
                let mut q = RealtimeQuote::new(symbol.code.clone(), self.key);
                q.price = Some(p);
                q
            }))
        }
    }

    fn manager_with(sources: Vec<Arc<dyn Source>>, config: ManagerConfig) -> FetcherManager {
        let breakers = Arc::new(BreakerRegistry::new(3, Duration::from_secs(300)));
        FetcherManager::new(sources, breakers, config)
    }

    #[tokio::test]
    async fn daily_fails_over_to_next_source() {
        let bad = Arc::new(ScriptedSource::failing("bad", 0, || {
            FetchError::network("bad", "connection refused")
        }));
        let good = Arc::new(ScriptedSource::ok("good", 1));
        let manager = manager_with(vec![bad.clone(), good.clone()], ManagerConfig::default());

        let symbol = Symbol::classify("600519").unwrap();
        let (series, source) = manager
            .daily(
                &symbol,
                NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(source, "good");
        assert_eq!(series.len(), 1);
        assert_eq!(bad.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsupported_rejection_does_not_open_breaker() {
        let rejecting = Arc::new(ScriptedSource::failing("domestic", 0, || {
            FetchError::unsupported("domestic", "不支持美股")
        }));
        let foreign = Arc::new(ScriptedSource::ok("yahoo", 5));
        let manager = manager_with(
            vec![rejecting.clone(), foreign],
            ManagerConfig::default(),
        );

        let symbol = Symbol::classify("AAPL").unwrap();
        for _ in 0..5 {
            let (_, source) = manager
                .daily(
                    &symbol,
                    NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                    NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(source, "yahoo");
        }
        // The rejecting source keeps being consulted: its breaker never
        // opened on unsupported-market errors.
        assert_eq!(rejecting.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn aggregate_error_lists_every_failure() {
        let a = Arc::new(ScriptedSource::failing("a", 0, || {
            FetchError::network("a", "boom")
        }));
        let b = Arc::new(ScriptedSource::failing("b", 1, || {
            FetchError::network("b", "bust")
        }));
        let manager = manager_with(vec![a, b], ManagerConfig::default());

        let symbol = Symbol::classify("600519").unwrap();
        let err = manager
            .daily(
                &symbol,
                NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            )
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("boom"));
        assert!(text.contains("bust"));
    }

    #[tokio::test]
    async fn us_quotes_route_to_yahoo_only() {
        let domestic = Arc::new(ScriptedSource::ok("tencent", 0));
        let foreign = Arc::new(ScriptedSource::ok("yahoo", 9));
        let manager = manager_with(
            vec![domestic.clone(), foreign.clone()],
            ManagerConfig::default(),
        );

        let symbol = Symbol::classify("TSLA").unwrap();
        let quote = manager.quote(&symbol).await.unwrap();
        assert_eq!(quote.source, "yahoo");
        assert_eq!(domestic.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tw_quotes_route_to_yahoo_only() {
        // The preference-list sources all reject TW; routing must not
        // even consult them.
        let domestic = Arc::new(ScriptedSource::ok("tencent", 0));
        let foreign = Arc::new(ScriptedSource::ok("yahoo", 9));
        let manager = manager_with(
            vec![domestic.clone(), foreign.clone()],
            ManagerConfig::default(),
        );

        let symbol = Symbol::classify("2330.TW").unwrap();
        let quote = manager.quote(&symbol).await.unwrap();
        assert_eq!(quote.source, "yahoo");
        assert_eq!(domestic.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn quote_respects_preference_order_not_priority() {
        // "second" has the better raw priority but the preference list
        // starts with "first".
        let first = Arc::new(ScriptedSource::ok("first", 9));
        let second = Arc::new(ScriptedSource::ok("second", 0));
        let manager = manager_with(
            vec![first, second],
            ManagerConfig {
                quote_preference: vec!["first".into(), "second".into()],
                ..Default::default()
            },
        );

        let symbol = Symbol::classify("600519").unwrap();
        let quote = manager.quote(&symbol).await.unwrap();
        assert_eq!(quote.source, "first");
    }

    #[tokio::test]
    async fn chips_skipped_for_etf_and_us() {
        let manager = manager_with(
            vec![Arc::new(ScriptedSource::ok("eastmoney", 0))],
            ManagerConfig::default(),
        );
        assert!(manager.chips(&Symbol::classify("510300").unwrap()).await.is_none());
        assert!(manager.chips(&Symbol::classify("TSLA").unwrap()).await.is_none());
    }

    #[tokio::test]
    async fn prefetch_is_noop_for_small_batches() {
        let snapshot = Arc::new(ScriptedSource {
            key: "eastmoney",
            priority: 0,
            snapshot: true,
            daily_error: None,
            quote_price: Some(1.0),
            calls: AtomicUsize::new(0),
        });
        let manager = manager_with(
            vec![snapshot.clone()],
            ManagerConfig {
                quote_preference: vec!["eastmoney".into()],
                ..Default::default()
            },
        );

        let few: Vec<Symbol> = ["600519", "000001"]
            .iter()
            .map(|c| Symbol::classify(c).unwrap())
            .collect();
        manager.prefetch_quotes(&few).await;
        assert_eq!(snapshot.calls.load(Ordering::SeqCst), 0);

        let many: Vec<Symbol> = ["600519", "000001", "601318", "000002", "600036"]
            .iter()
            .map(|c| Symbol::classify(c).unwrap())
            .collect();
        manager.prefetch_quotes(&many).await;
        assert_eq!(snapshot.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn breaker_short_circuits_after_failures() {
        let flaky = Arc::new(ScriptedSource::failing("flaky", 0, || {
            FetchError::rate_limited("flaky", "too many requests")
        }));
        let manager = manager_with(vec![flaky.clone()], ManagerConfig::default());

        let symbol = Symbol::classify("600519").unwrap();
        // Two rate-limited failures at weight 2 reach the threshold of 3.
        for _ in 0..2 {
            let _ = manager
                .daily(
                    &symbol,
                    NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                    NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
                )
                .await;
        }
        let before = flaky.calls.load(Ordering::SeqCst);

        // Breaker now open: the source is skipped without a network call.
        let _ = manager
            .daily(
                &symbol,
                NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            )
            .await;
        assert_eq!(flaky.calls.load(Ordering::SeqCst), before);
    }
}
