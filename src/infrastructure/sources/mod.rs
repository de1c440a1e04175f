pub mod baostock;
pub mod eastmoney;
pub mod manager;
pub mod sina;
pub mod tencent;
pub mod tushare;
pub mod yahoo;

pub use self::manager::FetcherManager;

use reqwest_middleware::ClientWithMiddleware;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::quote::RealtimeQuote;
use crate::infrastructure::core::circuit_breaker::BreakerRegistry;
use crate::infrastructure::core::rate_gate::RateGate;
use crate::infrastructure::core::ttl_cache::SnapshotCache;

/// Shared handles every source is built with. These registries are the
/// only mutable state sources may share.
#[derive(Clone)]
pub struct SourceContext {
    pub client: ClientWithMiddleware,
    pub gate: Arc<RateGate>,
    pub breakers: Arc<BreakerRegistry>,
    pub snapshots: Arc<SnapshotCache<HashMap<String, RealtimeQuote>>>,
}

/// Lenient numeric parsing for upstream payloads that mix numbers,
/// numeric strings and placeholder dashes.
pub(crate) fn parse_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s == "-" || s == "--" {
                None
            } else {
                s.parse().ok()
            }
        }
        _ => None,
    }
}

pub(crate) fn field_f64(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || s == "-" || s == "--" {
        None
    } else {
        s.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lenient_numeric_parsing() {
        assert_eq!(parse_f64(&json!(1.5)), Some(1.5));
        assert_eq!(parse_f64(&json!("2.5")), Some(2.5));
        assert_eq!(parse_f64(&json!("-")), None);
        assert_eq!(parse_f64(&json!(null)), None);
        assert_eq!(field_f64(" 3.14 "), Some(3.14));
        assert_eq!(field_f64("--"), None);
    }
}
