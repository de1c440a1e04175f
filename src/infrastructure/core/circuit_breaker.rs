use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_weight: u32,
    opened_at: Option<Instant>,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_weight: 0,
            opened_at: None,
        }
    }
}

/// Per-source circuit breakers behind one registry, keyed by source
/// string. The breaker is always per source, never per symbol.
pub struct BreakerRegistry {
    failure_threshold: u32,
    cooldown: Duration,
    states: Mutex<HashMap<String, BreakerState>>,
}

impl BreakerRegistry {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Closed and HalfOpen admit calls; Open flips to HalfOpen (one probe)
    /// once the cooldown has elapsed.
    pub fn is_available(&self, key: &str) -> bool {
        let mut states = self.states.lock().expect("breaker lock poisoned");
        let entry = states.entry(key.to_string()).or_default();

        match entry.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = entry
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.cooldown {
                    info!("Breaker [{}]: Open -> HalfOpen (cooldown elapsed)", key);
                    entry.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, key: &str) {
        let mut states = self.states.lock().expect("breaker lock poisoned");
        let entry = states.entry(key.to_string()).or_default();
        if entry.state != CircuitState::Closed {
            info!("Breaker [{}]: {:?} -> Closed", key, entry.state);
        }
        entry.state = CircuitState::Closed;
        entry.failure_weight = 0;
        entry.opened_at = None;
    }

    /// `weight` lets ban-like failures burn the budget faster; weight 0 is
    /// recorded for observability but never trips the breaker.
    pub fn record_failure(&self, key: &str, weight: u32, reason: &str) {
        if weight == 0 {
            return;
        }

        let mut states = self.states.lock().expect("breaker lock poisoned");
        let entry = states.entry(key.to_string()).or_default();
        entry.failure_weight += weight;

        match entry.state {
            CircuitState::Closed => {
                if entry.failure_weight >= self.failure_threshold {
                    warn!(
                        "Breaker [{}]: Closed -> Open (weight {} >= {}): {}",
                        key, entry.failure_weight, self.failure_threshold, reason
                    );
                    entry.state = CircuitState::Open;
                    entry.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                // A failed probe reopens immediately.
                warn!("Breaker [{}]: HalfOpen -> Open (probe failed): {}", key, reason);
                entry.state = CircuitState::Open;
                entry.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self, key: &str) -> CircuitState {
        let mut states = self.states.lock().expect("breaker lock poisoned");
        states.entry(key.to_string()).or_default().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let reg = BreakerRegistry::new(3, Duration::from_secs(60));

        for _ in 0..3 {
            assert!(reg.is_available("em"));
            reg.record_failure("em", 1, "boom");
        }

        assert_eq!(reg.state("em"), CircuitState::Open);
        assert!(!reg.is_available("em"));
        // Other keys unaffected.
        assert!(reg.is_available("sina"));
    }

    #[test]
    fn heavier_failures_open_faster() {
        let reg = BreakerRegistry::new(3, Duration::from_secs(60));
        reg.record_failure("em", 2, "rate limited");
        reg.record_failure("em", 2, "rate limited");
        assert_eq!(reg.state("em"), CircuitState::Open);
    }

    #[test]
    fn success_resets_failure_count() {
        let reg = BreakerRegistry::new(3, Duration::from_secs(60));
        reg.record_failure("em", 1, "x");
        reg.record_failure("em", 1, "x");
        reg.record_success("em");
        reg.record_failure("em", 1, "x");
        assert_eq!(reg.state("em"), CircuitState::Closed);
    }

    #[test]
    fn probe_after_cooldown_then_close_on_success() {
        let reg = BreakerRegistry::new(1, Duration::from_millis(30));
        reg.record_failure("em", 1, "x");
        assert!(!reg.is_available("em"));

        std::thread::sleep(Duration::from_millis(40));

        // Cooldown elapsed: one probe is admitted.
        assert!(reg.is_available("em"));
        assert_eq!(reg.state("em"), CircuitState::HalfOpen);

        reg.record_success("em");
        assert_eq!(reg.state("em"), CircuitState::Closed);
    }

    #[test]
    fn failed_probe_reopens() {
        let reg = BreakerRegistry::new(1, Duration::from_millis(30));
        reg.record_failure("em", 1, "x");
        std::thread::sleep(Duration::from_millis(40));
        assert!(reg.is_available("em"));

        reg.record_failure("em", 1, "probe failed");
        assert_eq!(reg.state("em"), CircuitState::Open);
        assert!(!reg.is_available("em"));
    }

    #[test]
    fn zero_weight_never_trips() {
        let reg = BreakerRegistry::new(1, Duration::from_secs(60));
        for _ in 0..10 {
            reg.record_failure("em", 0, "unsupported market");
        }
        assert_eq!(reg.state("em"), CircuitState::Closed);
    }
}
