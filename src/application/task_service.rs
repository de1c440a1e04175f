//! Asynchronous analysis task service.
//!
//! Accepts submissions from the bot/API surface, runs them on a bounded
//! worker pool and tracks state in an in-process ledger. Ledger entries
//! move monotonically running → completed|failed; durable history lives
//! in the database.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

use crate::application::pipeline::AnalysisPipeline;
use crate::domain::analysis::ReportType;
use crate::domain::task::{TaskInfo, TaskState};
use crate::infrastructure::persistence::AnalysisRecord;

pub struct TaskService {
    pipeline: AnalysisPipeline,
    workers: Arc<Semaphore>,
    ledger: Arc<Mutex<HashMap<String, TaskInfo>>>,
}

impl TaskService {
    pub fn new(pipeline: AnalysisPipeline, max_workers: usize) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
            ledger: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Register the task, kick off the worker, and return immediately
    /// with the running ledger entry.
    pub async fn submit(
        self: &Arc<Self>,
        code: &str,
        report_type: ReportType,
        source: &str,
    ) -> TaskInfo {
        let task = TaskInfo::new(code, report_type, source);
        info!(
            "[TaskService] submitted {} as {} ({})",
            code, task.task_id, source
        );

        self.ledger
            .lock()
            .await
            .insert(task.task_id.clone(), task.clone());
        if let Err(e) = self.pipeline.db.record_task(&task).await {
            warn!("[TaskService] ledger persist failed: {}", e);
        }

        let service = self.clone();
        let spawned = task.clone();
        tokio::spawn(async move {
            let _permit = service
                .workers
                .clone()
                .acquire_owned()
                .await
                .expect("worker pool closed");
            service.run_task(spawned).await;
        });

        task
    }

    async fn run_task(&self, task: TaskInfo) {
        let result = self
            .pipeline
            .process_single_stock(&task.code, task.report_type, &task.task_id, true)
            .await;

        let mut updated = task;
        updated.end_time = Some(chrono::Utc::now());
        if result.success {
            updated.state = TaskState::Completed;
            updated.result = Some(json!({
                "code": result.code,
                "name": result.name,
                "sentiment_score": result.sentiment_score,
                "operation_advice": result.operation_advice,
                "decision_type": result.decision_type.as_str(),
                "trend_prediction": result.trend_prediction,
            }));
            info!(
                "[TaskService] {} completed: {}",
                updated.task_id, result.operation_advice
            );
        } else {
            updated.state = TaskState::Failed;
            updated.error = result.error_message.clone();
            warn!(
                "[TaskService] {} failed: {}",
                updated.task_id,
                updated.error.as_deref().unwrap_or("unknown")
            );
        }

        if let Err(e) = self.pipeline.db.record_task(&updated).await {
            warn!("[TaskService] ledger persist failed: {}", e);
        }
        self.ledger
            .lock()
            .await
            .insert(updated.task_id.clone(), updated);
    }

    pub async fn get_task_status(&self, task_id: &str) -> Option<TaskInfo> {
        self.ledger.lock().await.get(task_id).cloned()
    }

    /// Most recent tasks first.
    pub async fn list_tasks(&self, limit: usize) -> Vec<TaskInfo> {
        let ledger = self.ledger.lock().await;
        let mut tasks: Vec<TaskInfo> = ledger.values().cloned().collect();
        tasks.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        tasks.truncate(limit);
        tasks
    }

    pub async fn get_analysis_history(
        &self,
        code: Option<&str>,
        query_id: Option<&str>,
        days: u32,
        limit: u32,
    ) -> anyhow::Result<Vec<AnalysisRecord>> {
        self.pipeline
            .db
            .get_analysis_history(code, query_id, days, limit)
            .await
    }
}
