use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One trading day for one symbol, in canonical units: volume in shares,
/// amount in base currency units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub amount: f64,
    /// Signed percentage vs prior close.
    pub pct_chg: f64,
}

#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("candle {date}: price outside [low, high] band (o={open} h={high} l={low} c={close})")]
    PriceBand {
        date: NaiveDate,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
    #[error("candle {date}: non-positive price")]
    NonPositivePrice { date: NaiveDate },
    #[error("dates not strictly ascending around {date}")]
    OutOfOrder { date: NaiveDate },
}

/// Normalized, validated daily series. Dates are strictly ascending with
/// no duplicates; missing amounts are reconstructed as `volume * close`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandleSeries(Vec<Candle>);

impl CandleSeries {
    /// Build a series from raw candles: sorts by date, drops duplicate
    /// dates (keeping the last occurrence), reconstructs missing amounts,
    /// and validates the per-candle invariants.
    pub fn from_raw(mut candles: Vec<Candle>) -> Result<Self, SeriesError> {
        candles.sort_by_key(|c| c.date);
        candles.dedup_by(|next, prev| {
            if next.date == prev.date {
                // Keep the later row for the same trading day.
                *prev = next.clone();
                true
            } else {
                false
            }
        });

        for c in candles.iter_mut() {
            if c.open <= 0.0 || c.high <= 0.0 || c.low <= 0.0 || c.close <= 0.0 {
                return Err(SeriesError::NonPositivePrice { date: c.date });
            }
            let lo = c.open.min(c.close);
            let hi = c.open.max(c.close);
            // Some upstreams round low/high one tick inside open/close.
            // Widen the band rather than rejecting the whole series.
            if c.low > lo {
                c.low = lo;
            }
            if c.high < hi {
                c.high = hi;
            }
            if c.low > c.high {
                return Err(SeriesError::PriceBand {
                    date: c.date,
                    open: c.open,
                    high: c.high,
                    low: c.low,
                    close: c.close,
                });
            }
            if c.amount <= 0.0 {
                c.amount = c.volume as f64 * c.close;
            }
        }

        Ok(CandleSeries(candles))
    }

    pub fn candles(&self) -> &[Candle] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.0.last()
    }

    /// Keep only the most recent `n` rows.
    pub fn tail(mut self, n: usize) -> Self {
        if self.0.len() > n {
            self.0.drain(..self.0.len() - n);
        }
        self
    }
}

/// Candle plus the derived indicator columns. Moving averages degrade
/// gracefully on short history (mean over whatever rows exist).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedCandle {
    #[serde(flatten)]
    pub candle: Candle,
    pub ma5: f64,
    pub ma10: f64,
    pub ma20: f64,
    /// Volume vs the mean of the five prior sessions; 1.0 when undefined.
    pub volume_ratio: f64,
    /// (close - ma5) / ma5.
    pub bias_ma5: f64,
    /// Rolling 20-day low/high.
    pub support: f64,
    pub resistance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(date: &str, close: f64) -> Candle {
        Candle {
            date: date.parse().unwrap(),
            open: close * 0.99,
            high: close * 1.01,
            low: close * 0.98,
            close,
            volume: 1_000_000,
            amount: 0.0,
            pct_chg: 0.0,
        }
    }

    #[test]
    fn sorts_dedups_and_reconstructs_amount() {
        let series = CandleSeries::from_raw(vec![
            candle("2025-07-03", 11.0),
            candle("2025-07-01", 10.0),
            candle("2025-07-01", 10.5),
            candle("2025-07-02", 10.8),
        ])
        .unwrap();

        let rows = series.candles();
        assert_eq!(rows.len(), 3);
        assert!(rows.windows(2).all(|w| w[0].date < w[1].date));
        assert_eq!(rows[0].close, 10.5);
        // amount reconstructed from volume * close
        assert!((rows[0].amount - 1_000_000.0 * 10.5).abs() < 1e-6);
    }

    #[test]
    fn rejects_non_positive_prices() {
        let mut bad = candle("2025-07-01", 10.0);
        bad.close = 0.0;
        assert!(CandleSeries::from_raw(vec![bad]).is_err());
    }

    #[test]
    fn widens_band_when_upstream_rounds_inside() {
        let mut c = candle("2025-07-01", 10.0);
        c.low = 9.95;
        c.open = 9.90; // open below reported low
        let series = CandleSeries::from_raw(vec![c]).unwrap();
        let row = &series.candles()[0];
        assert!(row.low <= row.open.min(row.close));
        assert!(row.high >= row.open.max(row.close));
    }

    #[test]
    fn tail_keeps_most_recent_rows() {
        let series = CandleSeries::from_raw(vec![
            candle("2025-07-01", 10.0),
            candle("2025-07-02", 10.1),
            candle("2025-07-03", 10.2),
        ])
        .unwrap()
        .tail(2);
        assert_eq!(series.len(), 2);
        assert_eq!(series.candles()[0].date, "2025-07-02".parse().unwrap());
    }
}
