//! Indicator enrichment over a normalized candle series.
//!
//! Pure and deterministic. Moving averages use whatever rows exist when
//! the window is not yet full, so short series degrade gracefully
//! instead of producing holes.

use crate::domain::candle::{CandleSeries, EnrichedCandle};

const SUPPORT_WINDOW: usize = 20;

fn tail_mean(values: &[f64], end: usize, window: usize) -> f64 {
    let start = end.saturating_sub(window - 1);
    let slice = &values[start..=end];
    slice.iter().sum::<f64>() / slice.len() as f64
}

/// Add MA5/MA10/MA20, volume ratio, MA5 bias and rolling 20-day
/// support/resistance to every row.
pub fn enrich(series: &CandleSeries) -> Vec<EnrichedCandle> {
    let candles = series.candles();
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume as f64).collect();

    candles
        .iter()
        .enumerate()
        .map(|(t, candle)| {
            let ma5 = tail_mean(&closes, t, 5);
            let ma10 = tail_mean(&closes, t, 10);
            let ma20 = tail_mean(&closes, t, 20);

            // Today's volume against the mean of up to five prior
            // sessions; 1.0 when there is no prior session or no volume.
            let volume_ratio = if t == 0 {
                1.0
            } else {
                let start = t.saturating_sub(5);
                let prior = &volumes[start..t];
                let mean = prior.iter().sum::<f64>() / prior.len() as f64;
                if mean > 0.0 { volumes[t] / mean } else { 1.0 }
            };

            let bias_ma5 = if ma5 > 0.0 {
                (candle.close - ma5) / ma5
            } else {
                0.0
            };

            let window_start = t.saturating_sub(SUPPORT_WINDOW - 1);
            let support = candles[window_start..=t]
                .iter()
                .map(|c| c.low)
                .fold(f64::INFINITY, f64::min);
            let resistance = candles[window_start..=t]
                .iter()
                .map(|c| c.high)
                .fold(f64::NEG_INFINITY, f64::max);

            EnrichedCandle {
                candle: candle.clone(),
                ma5,
                ma10,
                ma20,
                volume_ratio,
                bias_ma5,
                support,
                resistance,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Candle;
    use chrono::NaiveDate;

    fn series(closes: &[f64]) -> CandleSeries {
        let candles: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() + chrono::Days::new(i as u64),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1000 + i as u64 * 100,
                amount: 0.0,
                pct_chg: 0.0,
            })
            .collect();
        CandleSeries::from_raw(candles).unwrap()
    }

    #[test]
    fn ma20_matches_mean_of_last_twenty_closes() {
        let closes: Vec<f64> = (1..=30).map(|i| i as f64).collect();
        let enriched = enrich(&series(&closes));

        for t in 19..closes.len() {
            let expected: f64 = closes[t - 19..=t].iter().sum::<f64>() / 20.0;
            assert!(
                (enriched[t].ma20 - expected).abs() < 1e-9,
                "ma20 mismatch at {}",
                t
            );
        }
    }

    #[test]
    fn short_series_degrades_to_available_rows() {
        let enriched = enrich(&series(&[10.0, 12.0, 14.0]));
        assert_eq!(enriched.len(), 3);
        // ma20 over three rows is just their mean.
        assert!((enriched[2].ma20 - 12.0).abs() < 1e-9);
        assert!((enriched[0].ma5 - 10.0).abs() < 1e-9);
    }

    #[test]
    fn volume_ratio_uses_prior_five_sessions() {
        let closes: Vec<f64> = vec![10.0; 10];
        let enriched = enrich(&series(&closes));

        // volumes are 1000, 1100, ..., 1900
        let t = 7;
        let prior_mean = (1200.0 + 1300.0 + 1400.0 + 1500.0 + 1600.0) / 5.0;
        assert!((enriched[t].volume_ratio - 1700.0 / prior_mean).abs() < 1e-9);
        // First row has no prior sessions.
        assert!((enriched[0].volume_ratio - 1.0).abs() < 1e-9);
    }

    #[test]
    fn bias_and_support_resistance() {
        let closes: Vec<f64> = (1..=25).map(|i| i as f64).collect();
        let enriched = enrich(&series(&closes));
        let last = enriched.last().unwrap();

        let expected_bias = (last.candle.close - last.ma5) / last.ma5;
        assert!((last.bias_ma5 - expected_bias).abs() < 1e-12);

        // Rising series: support is the low 19 rows back, resistance is
        // the current high.
        assert!((last.support - (closes[5] - 1.0)).abs() < 1e-9);
        assert!((last.resistance - (closes[24] + 1.0)).abs() < 1e-9);
    }
}
