use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::analysis::ReportType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Running,
    Completed,
    Failed,
}

/// In-process ledger entry for one async analysis task. Durable history
/// lives in the database; this is what the status endpoints serve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: String,
    pub code: String,
    pub report_type: ReportType,
    /// Where the task came from: bot / api / cli / system.
    pub source: String,
    pub state: TaskState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Compact result summary for completed tasks.
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl TaskInfo {
    pub fn new(code: &str, report_type: ReportType, source: &str) -> Self {
        Self {
            task_id: make_task_id(code),
            code: code.to_string(),
            report_type,
            source: source.to_string(),
            state: TaskState::Running,
            start_time: Utc::now(),
            end_time: None,
            result: None,
            error: None,
        }
    }
}

/// Task ids embed the local submission instant down to microseconds so
/// repeated submissions of the same code stay distinct.
pub fn make_task_id(code: &str) -> String {
    format!("{}_{}", code, Local::now().format("%Y%m%d_%H%M%S_%6f"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_embed_code_and_stay_unique() {
        let a = make_task_id("600519");
        let b = make_task_id("600519");
        assert!(a.starts_with("600519_"));
        assert_ne!(a, b);
    }
}
