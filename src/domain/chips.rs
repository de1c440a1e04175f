use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Cost-basis distribution statistics for one symbol on one day. Only the
/// most recent observation is retained per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChipDistribution {
    pub code: String,
    pub date: NaiveDate,
    /// Share of holders currently in profit, in [0, 1].
    pub profit_ratio: f64,
    pub avg_cost: f64,
    pub cost_90_low: f64,
    pub cost_90_high: f64,
    pub concentration_90: f64,
    pub cost_70_low: f64,
    pub cost_70_high: f64,
    pub concentration_70: f64,
}

impl ChipDistribution {
    /// Width of the 90% cost band relative to its midpoint; a narrow band
    /// means concentrated chips.
    pub fn band_width_90(&self) -> Option<f64> {
        let mid = (self.cost_90_low + self.cost_90_high) / 2.0;
        if mid > 0.0 {
            Some((self.cost_90_high - self.cost_90_low) / mid)
        } else {
            None
        }
    }
}
