use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::analysis::{AnalysisResult, NewsItem, ReportType};
use crate::domain::candle::{CandleSeries, EnrichedCandle};
use crate::domain::chips::ChipDistribution;
use crate::domain::errors::FetchResult;
use crate::domain::overview::{IndexQuote, MarketOverview, MarketStats, SectorRankings};
use crate::domain::quote::RealtimeQuote;
use crate::domain::symbol::Symbol;

// Capability traits. A source implements only what its upstream can do;
// the manager filters by capability instead of probing method names.

#[async_trait]
pub trait DailyFetcher: Send + Sync {
    /// Normalized daily candles for [start, end], ascending.
    async fn daily(
        &self,
        symbol: &Symbol,
        start: NaiveDate,
        end: NaiveDate,
    ) -> FetchResult<CandleSeries>;
}

#[async_trait]
pub trait QuoteFetcher: Send + Sync {
    /// `Ok(None)` when the upstream has no row for the symbol.
    async fn quote(&self, symbol: &Symbol) -> FetchResult<Option<RealtimeQuote>>;
}

#[async_trait]
pub trait ChipsFetcher: Send + Sync {
    /// Latest-day chip distribution, if the upstream publishes one.
    async fn chips(&self, symbol: &Symbol) -> FetchResult<Option<ChipDistribution>>;
}

#[async_trait]
pub trait ListingFetcher: Send + Sync {
    async fn name(&self, symbol: &Symbol) -> FetchResult<Option<String>>;
    /// Bulk (code, name) listing of the whole exchange.
    async fn stock_list(&self) -> FetchResult<Option<Vec<(String, String)>>>;
}

#[async_trait]
pub trait MarketAggregatesFetcher: Send + Sync {
    async fn indices(&self) -> FetchResult<Option<Vec<IndexQuote>>>;
    async fn market_stats(&self) -> FetchResult<Option<MarketStats>>;
    async fn sectors(&self, n: usize) -> FetchResult<Option<SectorRankings>>;
}

/// One upstream market-data source. Smaller `priority` wins.
pub trait Source: Send + Sync {
    /// Stable key scoping rate-gate, breaker and cache state.
    fn key(&self) -> &'static str;
    fn priority(&self) -> i32;
    /// True when the cheapest quote call returns the whole market and the
    /// snapshot cache / prefetch heuristic apply.
    fn snapshot_oriented(&self) -> bool {
        false
    }

    fn daily(&self) -> Option<&dyn DailyFetcher> {
        None
    }
    fn quotes(&self) -> Option<&dyn QuoteFetcher> {
        None
    }
    fn chips(&self) -> Option<&dyn ChipsFetcher> {
        None
    }
    fn listing(&self) -> Option<&dyn ListingFetcher> {
        None
    }
    fn aggregates(&self) -> Option<&dyn MarketAggregatesFetcher> {
        None
    }
}

/// Everything the per-symbol analysis prompt is built from. Serialized
/// verbatim as the context snapshot when snapshotting is enabled.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AnalysisContext {
    pub symbol: Symbol,
    pub name: String,
    pub query_id: String,
    pub report_type: ReportType,
    /// Most recent rows, indicator-enriched.
    pub history: Vec<EnrichedCandle>,
    pub quote: Option<RealtimeQuote>,
    pub chips: Option<ChipDistribution>,
    pub news: Vec<NewsItem>,
    pub data_sources: Vec<String>,
}

/// LLM client boundary. Implementations live in infrastructure; the
/// pipeline only sees this contract.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn is_available(&self) -> bool;
    /// Produce a draft result; the pipeline finalizes scores/decisions.
    async fn analyze(&self, ctx: &AnalysisContext) -> anyhow::Result<AnalysisResult>;
    /// Narrative daily review from market-wide aggregates.
    async fn review_market(
        &self,
        overview: &MarketOverview,
        news: &[NewsItem],
    ) -> anyhow::Result<String>;
}

/// Web-search boundary.
#[async_trait]
pub trait SearchService: Send + Sync {
    fn is_available(&self) -> bool;
    async fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<NewsItem>>;
}
