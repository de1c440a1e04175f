use serde::{Deserialize, Serialize};

/// One market index snapshot (e.g. SSE Composite).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexQuote {
    pub code: String,
    pub name: String,
    pub price: f64,
    pub change_pct: f64,
    pub amount: Option<f64>,
}

/// Breadth statistics for the whole market on one day.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketStats {
    pub advancing: u32,
    pub declining: u32,
    pub unchanged: u32,
    pub limit_up: u32,
    pub limit_down: u32,
    /// Total turnover in base currency units.
    pub total_amount: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorRow {
    pub name: String,
    pub change_pct: f64,
    /// Best-performing constituent, when the upstream reports one.
    pub leader: Option<String>,
}

/// Top and bottom sector rankings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectorRankings {
    pub gainers: Vec<SectorRow>,
    pub losers: Vec<SectorRow>,
}

/// Everything the market-review phase feeds to the analyzer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketOverview {
    pub indices: Vec<IndexQuote>,
    pub stats: Option<MarketStats>,
    pub sectors: Option<SectorRankings>,
}

impl MarketOverview {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty() && self.stats.is_none() && self.sectors.is_none()
    }
}
