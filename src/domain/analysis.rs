use serde::{Deserialize, Serialize};

use crate::domain::quote::RealtimeQuote;

/// Report verbosity requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    #[default]
    Simple,
    Full,
}

impl ReportType {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "full" => ReportType::Full,
            _ => ReportType::Simple,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Simple => "simple",
            ReportType::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DecisionType {
    Buy,
    #[default]
    Hold,
    Sell,
}

impl DecisionType {
    /// Map a free-text advice string onto {buy, hold, sell}. Total:
    /// unknown strings fall through to Hold.
    pub fn from_advice(advice: &str) -> Self {
        const BUY_MARKERS: [&str; 6] = ["買入", "买入", "加倉", "加仓", "增持", "buy"];
        const SELL_MARKERS: [&str; 8] = [
            "賣出", "卖出", "減倉", "减仓", "清倉", "清仓", "離場", "sell",
        ];

        let lower = advice.to_lowercase();
        if SELL_MARKERS.iter().any(|m| lower.contains(m)) {
            DecisionType::Sell
        } else if BUY_MARKERS.iter().any(|m| lower.contains(m)) {
            DecisionType::Buy
        } else {
            DecisionType::Hold
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionType::Buy => "buy",
            DecisionType::Hold => "hold",
            DecisionType::Sell => "sell",
        }
    }
}

/// One hit from the news search step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Preformatted report sections produced by the analyzer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dashboard {
    pub core_conclusion: String,
    pub data_perspective: String,
    pub intelligence: String,
    pub battle_plan: String,
}

/// Condensed live-market section attached to a result when a quote was
/// available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub source: String,
    pub price: f64,
    pub change_pct: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub turnover_rate: Option<f64>,
    pub pe: Option<f64>,
    pub pb: Option<f64>,
}

impl MarketSnapshot {
    pub fn from_quote(quote: &RealtimeQuote) -> Option<Self> {
        Some(Self {
            source: quote.source.clone(),
            price: quote.price?,
            change_pct: quote.change_pct,
            volume_ratio: quote.volume_ratio,
            turnover_rate: quote.turnover_rate,
            pe: quote.pe,
            pb: quote.pb,
        })
    }
}

/// The product of one pipeline run for one symbol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub code: String,
    pub name: String,
    pub query_id: String,

    pub sentiment_score: i32,
    pub operation_advice: String,
    pub decision_type: DecisionType,
    pub trend_prediction: String,
    pub confidence: f64,

    pub analysis_summary: String,
    pub technical_analysis: String,
    pub fundamental_analysis: String,

    pub dashboard: Dashboard,
    pub market_snapshot: Option<MarketSnapshot>,
    pub news_items: Vec<NewsItem>,

    pub success: bool,
    pub error_message: Option<String>,
    pub data_sources: Vec<String>,
    pub search_performed: bool,
}

impl AnalysisResult {
    pub fn failed(code: impl Into<String>, query_id: impl Into<String>, error: String) -> Self {
        Self {
            code: code.into(),
            query_id: query_id.into(),
            success: false,
            error_message: Some(error),
            ..Default::default()
        }
    }

    /// Clamp the score into [0, 100] and recompute the decision from the
    /// advice text.
    pub fn finalize(&mut self) {
        self.sentiment_score = self.sentiment_score.clamp(0, 100);
        self.decision_type = DecisionType::from_advice(&self.operation_advice);
        self.confidence = self.confidence.clamp(0.0, 1.0);
    }

    /// Signal glyph used by the batch summary log and reports.
    pub fn emoji(&self) -> &'static str {
        match self.decision_type {
            DecisionType::Buy => "🔴",
            DecisionType::Sell => "🟢",
            DecisionType::Hold => {
                if self.sentiment_score >= 60 {
                    "🟡"
                } else {
                    "⚪"
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_mapping_is_total() {
        assert_eq!(DecisionType::from_advice("建議買入"), DecisionType::Buy);
        assert_eq!(DecisionType::from_advice("逢高減倉"), DecisionType::Sell);
        assert_eq!(DecisionType::from_advice("持有觀望"), DecisionType::Hold);
        assert_eq!(DecisionType::from_advice("分批加仓"), DecisionType::Buy);
        assert_eq!(DecisionType::from_advice(""), DecisionType::Hold);
        assert_eq!(DecisionType::from_advice("nonsense"), DecisionType::Hold);
    }

    #[test]
    fn sell_wins_over_buy_when_both_present() {
        // "高位賣出，勿加倉" mentions both; the cautious reading wins.
        assert_eq!(
            DecisionType::from_advice("高位賣出，勿加倉"),
            DecisionType::Sell
        );
    }

    #[test]
    fn finalize_clamps_score() {
        let mut r = AnalysisResult {
            sentiment_score: 140,
            operation_advice: "持有".into(),
            ..Default::default()
        };
        r.finalize();
        assert_eq!(r.sentiment_score, 100);
        assert_eq!(r.decision_type, DecisionType::Hold);

        r.sentiment_score = -5;
        r.finalize();
        assert_eq!(r.sentiment_score, 0);
    }
}
