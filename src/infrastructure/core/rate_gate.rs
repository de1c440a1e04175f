use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Per-source pacing policy.
#[derive(Debug, Clone)]
pub struct GatePolicy {
    /// Minimum / maximum gap between requests; the actual gap is drawn
    /// uniformly from this range on every call.
    pub sleep_min: Duration,
    pub sleep_max: Duration,
    /// Hard cap on calls inside any rolling 60-second window.
    pub per_minute: Option<u32>,
}

impl GatePolicy {
    pub fn jittered(min_secs: f64, max_secs: f64) -> Self {
        Self {
            sleep_min: Duration::from_secs_f64(min_secs),
            sleep_max: Duration::from_secs_f64(max_secs.max(min_secs)),
            per_minute: None,
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self {
            sleep_min: Duration::ZERO,
            sleep_max: Duration::ZERO,
            per_minute: Some(limit),
        }
    }
}

#[derive(Default)]
struct GateState {
    last_request: Option<Instant>,
    window: VecDeque<Instant>,
}

const WINDOW: Duration = Duration::from_secs(60);

/// Process-wide request pacer, keyed by source. Combines the jittered
/// anti-ban gap with a rolling minute-window counter.
///
/// The lock is never held across a sleep, so concurrent callers for the
/// same key queue up on real time rather than deadlocking.
pub struct RateGate {
    policies: HashMap<String, GatePolicy>,
    default_policy: GatePolicy,
    states: Mutex<HashMap<String, GateState>>,
}

impl RateGate {
    pub fn new(policies: HashMap<String, GatePolicy>) -> Self {
        Self {
            policies,
            default_policy: GatePolicy::jittered(0.5, 1.5),
            states: Mutex::new(HashMap::new()),
        }
    }

    fn policy(&self, key: &str) -> &GatePolicy {
        self.policies.get(key).unwrap_or(&self.default_policy)
    }

    /// Block until a request for `key` is allowed, then record it.
    pub async fn wait(&self, key: &str) {
        let policy = self.policy(key).clone();
        let mut total_slept = Duration::ZERO;

        loop {
            let sleep_for = {
                let mut states = self.states.lock().expect("rate gate lock poisoned");
                let state = states.entry(key.to_string()).or_default();
                let now = Instant::now();

                while let Some(&front) = state.window.front() {
                    if now.duration_since(front) >= WINDOW {
                        state.window.pop_front();
                    } else {
                        break;
                    }
                }

                // Minute cap first: when full, wait for the window to roll.
                let cap_wait = match policy.per_minute {
                    Some(limit) if state.window.len() >= limit as usize => {
                        let oldest = *state.window.front().expect("window non-empty at cap");
                        let until_roll = WINDOW.saturating_sub(now.duration_since(oldest));
                        Some(until_roll.max(Duration::from_millis(10)))
                    }
                    _ => None,
                };

                // Then the jittered inter-request gap.
                let gap_wait = if cap_wait.is_none() {
                    let gap = if policy.sleep_max > Duration::ZERO {
                        let min = policy.sleep_min.as_secs_f64();
                        let max = policy.sleep_max.as_secs_f64();
                        let drawn = if max > min {
                            rand::rng().random_range(min..=max)
                        } else {
                            min
                        };
                        Duration::from_secs_f64(drawn)
                    } else {
                        Duration::ZERO
                    };
                    match state.last_request {
                        Some(last) if now.duration_since(last) < gap => {
                            Some(gap - now.duration_since(last))
                        }
                        _ => None,
                    }
                } else {
                    None
                };

                let wait = cap_wait.or(gap_wait);
                if wait.is_none() {
                    // Clear to go: record the request while still locked.
                    state.last_request = Some(now);
                    state.window.push_back(now);
                }
                wait
            };

            match sleep_for {
                Some(d) => {
                    total_slept += d;
                    tokio::time::sleep(d).await;
                }
                None => break,
            }
        }

        if total_slept > Duration::ZERO {
            debug!(
                "RateGate [{}]: slept {:.2}s before request",
                key,
                total_slept.as_secs_f64()
            );
        }
    }

    /// Calls recorded for `key` inside the current minute window.
    pub fn window_count(&self, key: &str) -> usize {
        let mut states = self.states.lock().expect("rate gate lock poisoned");
        let state = states.entry(key.to_string()).or_default();
        let now = Instant::now();
        state
            .window
            .iter()
            .filter(|t| now.duration_since(**t) < WINDOW)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_requests_in_window() {
        let mut policies = HashMap::new();
        policies.insert("t".to_string(), GatePolicy::per_minute(100));
        let gate = RateGate::new(policies);

        for _ in 0..5 {
            gate.wait("t").await;
        }
        assert_eq!(gate.window_count("t"), 5);
    }

    #[tokio::test]
    async fn enforces_jittered_gap() {
        let mut policies = HashMap::new();
        policies.insert(
            "slow".to_string(),
            GatePolicy::jittered(0.05, 0.05),
        );
        let gate = RateGate::new(policies);

        let start = Instant::now();
        gate.wait("slow").await;
        gate.wait("slow").await;
        gate.wait("slow").await;
        // Two enforced gaps of ~50ms each.
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn minute_cap_blocks_until_roll() {
        let mut policies = HashMap::new();
        policies.insert("cap".to_string(), GatePolicy::per_minute(3));
        let gate = RateGate::new(policies);

        for _ in 0..3 {
            gate.wait("cap").await;
        }
        assert_eq!(gate.window_count("cap"), 3);

        // The fourth call must block; give it a short budget and verify
        // it has not completed.
        let blocked =
            tokio::time::timeout(Duration::from_millis(100), gate.wait("cap")).await;
        assert!(blocked.is_err(), "fourth call should wait for the window");
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let mut policies = HashMap::new();
        policies.insert("a".to_string(), GatePolicy::per_minute(1));
        let gate = RateGate::new(policies);

        gate.wait("a").await;
        // Different key, default policy: must not be blocked by "a".
        tokio::time::timeout(Duration::from_secs(3), gate.wait("b"))
            .await
            .expect("independent key should pass");
    }
}
