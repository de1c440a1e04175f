//! Daily scheduler.
//!
//! Fires the full-analysis entrypoint once per day at a configured local
//! `HH:MM`. No missed-run compensation: if the process was down at the
//! trigger time, the run happens at the next day's slot.

use anyhow::{Result, bail};
use chrono::{Duration as ChronoDuration, Local, NaiveTime};
use std::future::Future;
use tracing::info;

pub fn parse_schedule_time(value: &str) -> Result<NaiveTime> {
    match NaiveTime::parse_from_str(value.trim(), "%H:%M") {
        Ok(t) => Ok(t),
        Err(_) => bail!("SCHEDULE_TIME must be HH:MM, got {:?}", value),
    }
}

/// Seconds until the next local occurrence of `at`.
pub fn seconds_until_next(at: NaiveTime) -> u64 {
    let now = Local::now();
    let today_target = now.date_naive().and_time(at);
    let target = if today_target > now.naive_local() {
        today_target
    } else {
        today_target + ChronoDuration::days(1)
    };
    (target - now.naive_local()).num_seconds().max(1) as u64
}

/// Run `task` every day at `schedule_time`, optionally once immediately
/// on startup. Runs until the surrounding future is dropped (ctrl-c in
/// the CLI selects against this loop).
pub async fn run_with_schedule<F, Fut>(schedule_time: &str, run_immediately: bool, task: F) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    let at = parse_schedule_time(schedule_time)?;

    if run_immediately {
        info!("Scheduler: running once at startup");
        task().await;
    }

    loop {
        let wait = seconds_until_next(at);
        info!(
            "Scheduler: next run at {} (in {}h{:02}m)",
            at,
            wait / 3600,
            (wait % 3600) / 60
        );
        tokio::time::sleep(std::time::Duration::from_secs(wait)).await;
        task().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_times() {
        assert_eq!(
            parse_schedule_time("18:00").unwrap(),
            NaiveTime::from_hms_opt(18, 0, 0).unwrap()
        );
        assert_eq!(
            parse_schedule_time(" 07:30 ").unwrap(),
            NaiveTime::from_hms_opt(7, 30, 0).unwrap()
        );
    }

    #[test]
    fn rejects_malformed_times() {
        assert!(parse_schedule_time("25:00").is_err());
        assert!(parse_schedule_time("six pm").is_err());
        assert!(parse_schedule_time("").is_err());
    }

    #[test]
    fn next_occurrence_is_within_a_day() {
        let at = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        let wait = seconds_until_next(at);
        assert!(wait >= 1);
        assert!(wait <= 24 * 3600);
    }
}
