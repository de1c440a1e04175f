use serde::{Deserialize, Serialize};

/// Snapshot of a symbol's live trading state. Every numeric field is
/// optional, since upstreams differ widely in coverage. A quote is usable for
/// analysis as soon as `price` is present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimeQuote {
    pub code: String,
    pub name: Option<String>,
    /// Tag of the upstream that produced this quote (e.g. "tencent").
    pub source: String,
    pub price: Option<f64>,
    pub change_pct: Option<f64>,
    pub change_amount: Option<f64>,
    pub volume: Option<f64>,
    pub amount: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub turnover_rate: Option<f64>,
    pub amplitude: Option<f64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub pre_close: Option<f64>,
    pub pe: Option<f64>,
    pub pb: Option<f64>,
    pub total_mv: Option<f64>,
    pub circ_mv: Option<f64>,
    pub high_52w: Option<f64>,
    pub low_52w: Option<f64>,
    pub change_60d: Option<f64>,
}

impl RealtimeQuote {
    pub fn new(code: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn is_basically_valid(&self) -> bool {
        self.price.is_some()
    }

    /// Fill change_pct/change_amount from price and pre_close when the
    /// upstream omitted them.
    pub fn derive_change_fields(&mut self) {
        if let (Some(price), Some(pre)) = (self.price, self.pre_close) {
            if pre > 0.0 {
                if self.change_amount.is_none() {
                    self.change_amount = Some(price - pre);
                }
                if self.change_pct.is_none() {
                    self.change_pct = Some(100.0 * (price - pre) / pre);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_requires_price() {
        let mut q = RealtimeQuote::new("600519", "tencent");
        assert!(!q.is_basically_valid());
        q.price = Some(1700.0);
        assert!(q.is_basically_valid());
    }

    #[test]
    fn derives_change_consistently() {
        let mut q = RealtimeQuote::new("600519", "tencent");
        q.price = Some(102.0);
        q.pre_close = Some(100.0);
        q.derive_change_fields();
        let pct = q.change_pct.unwrap();
        assert!((pct - 100.0 * (102.0 - 100.0) / 100.0).abs() < 1e-6);
        assert!((q.change_amount.unwrap() - 2.0).abs() < 1e-9);
    }
}
