use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

use crate::domain::analysis::AnalysisResult;
use crate::domain::task::{TaskInfo, TaskState};

/// Singleton database wrapper around the SQLite file at DATABASE_PATH.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

/// One persisted analysis row, as served by the history endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AnalysisRecord {
    pub query_id: String,
    pub code: String,
    pub name: String,
    pub sentiment_score: i32,
    pub operation_advice: String,
    pub decision_type: String,
    pub trend_prediction: String,
    pub confidence: f64,
    pub success: bool,
    pub error_message: Option<String>,
    pub data_sources: String,
    pub created_at: String,
}

impl Database {
    pub async fn new(db_path: &str) -> Result<Self> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_path);

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_history (
                query_id TEXT NOT NULL,
                code TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                sentiment_score INTEGER NOT NULL DEFAULT 50,
                operation_advice TEXT NOT NULL DEFAULT '',
                decision_type TEXT NOT NULL DEFAULT 'hold',
                trend_prediction TEXT NOT NULL DEFAULT '',
                confidence REAL NOT NULL DEFAULT 0,
                success BOOLEAN NOT NULL DEFAULT 1,
                error_message TEXT,
                data_sources TEXT NOT NULL DEFAULT '',
                detail_json TEXT NOT NULL DEFAULT '{}',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (query_id, code)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create analysis_history table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_analysis_code_time
            ON analysis_history (code, created_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create analysis index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_ledger (
                task_id TEXT PRIMARY KEY,
                code TEXT NOT NULL,
                report_type TEXT NOT NULL DEFAULT 'simple',
                source TEXT NOT NULL DEFAULT 'api',
                state TEXT NOT NULL,
                start_time DATETIME NOT NULL,
                end_time DATETIME,
                error TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create task_ledger table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS context_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query_id TEXT NOT NULL,
                code TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create context_snapshots table")?;

        info!("Database schema initialized.");
        Ok(())
    }

    pub async fn insert_analysis(&self, result: &AnalysisResult) -> Result<()> {
        let detail = serde_json::to_string(result).unwrap_or_else(|_| "{}".to_string());
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO analysis_history
                (query_id, code, name, sentiment_score, operation_advice,
                 decision_type, trend_prediction, confidence, success,
                 error_message, data_sources, detail_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&result.query_id)
        .bind(&result.code)
        .bind(&result.name)
        .bind(result.sentiment_score)
        .bind(&result.operation_advice)
        .bind(result.decision_type.as_str())
        .bind(&result.trend_prediction)
        .bind(result.confidence)
        .bind(result.success)
        .bind(&result.error_message)
        .bind(result.data_sources.join(","))
        .bind(detail)
        .execute(&self.pool)
        .await
        .context("Failed to insert analysis result")?;
        Ok(())
    }

    pub async fn get_analysis_history(
        &self,
        code: Option<&str>,
        query_id: Option<&str>,
        days: u32,
        limit: u32,
    ) -> Result<Vec<AnalysisRecord>> {
        let mut sql = String::from(
            "SELECT query_id, code, name, sentiment_score, operation_advice, \
             decision_type, trend_prediction, confidence, success, error_message, \
             data_sources, created_at \
             FROM analysis_history \
             WHERE created_at >= datetime('now', ?)",
        );
        if code.is_some() {
            sql.push_str(" AND code = ?");
        }
        if query_id.is_some() {
            sql.push_str(" AND query_id = ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");

        let mut query = sqlx::query(&sql).bind(format!("-{} days", days));
        if let Some(code) = code {
            query = query.bind(code.to_string());
        }
        if let Some(query_id) = query_id {
            query = query.bind(query_id.to_string());
        }
        query = query.bind(limit);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("Failed to query analysis history")?;

        Ok(rows
            .into_iter()
            .map(|row| AnalysisRecord {
                query_id: row.get("query_id"),
                code: row.get("code"),
                name: row.get("name"),
                sentiment_score: row.get("sentiment_score"),
                operation_advice: row.get("operation_advice"),
                decision_type: row.get("decision_type"),
                trend_prediction: row.get("trend_prediction"),
                confidence: row.get("confidence"),
                success: row.get("success"),
                error_message: row.get("error_message"),
                data_sources: row.get("data_sources"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    pub async fn record_task(&self, task: &TaskInfo) -> Result<()> {
        let state = match task.state {
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        };
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO task_ledger
                (task_id, code, report_type, source, state, start_time, end_time, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.task_id)
        .bind(&task.code)
        .bind(task.report_type.as_str())
        .bind(&task.source)
        .bind(state)
        .bind(task.start_time)
        .bind(task.end_time)
        .bind(&task.error)
        .execute(&self.pool)
        .await
        .context("Failed to record task")?;
        Ok(())
    }

    pub async fn insert_context_snapshot(
        &self,
        query_id: &str,
        code: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO context_snapshots (query_id, code, payload_json, created_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(query_id)
        .bind(code)
        .bind(payload.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to insert context snapshot")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::analysis::DecisionType;

    async fn memory_db() -> Database {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        let db = Database { pool };
        db.init().await.unwrap();
        db
    }

    #[tokio::test]
    async fn analysis_roundtrip() {
        let db = memory_db().await;

        let mut result = AnalysisResult {
            code: "600519".into(),
            name: "贵州茅台".into(),
            query_id: "q1".into(),
            sentiment_score: 72,
            operation_advice: "持有".into(),
            trend_prediction: "震荡上行".into(),
            confidence: 0.8,
            success: true,
            data_sources: vec!["eastmoney".into(), "tencent".into()],
            ..Default::default()
        };
        result.finalize();
        db.insert_analysis(&result).await.unwrap();

        let records = db
            .get_analysis_history(Some("600519"), None, 30, 10)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sentiment_score, 72);
        assert_eq!(records[0].decision_type, DecisionType::Hold.as_str());
        assert!(records[0].data_sources.contains("eastmoney"));
    }

    #[tokio::test]
    async fn same_query_and_code_upserts() {
        let db = memory_db().await;
        let mut result = AnalysisResult {
            code: "600519".into(),
            query_id: "q1".into(),
            sentiment_score: 50,
            success: true,
            ..Default::default()
        };
        db.insert_analysis(&result).await.unwrap();
        result.sentiment_score = 80;
        db.insert_analysis(&result).await.unwrap();

        let records = db.get_analysis_history(None, Some("q1"), 30, 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sentiment_score, 80);
    }

    #[tokio::test]
    async fn task_ledger_records_transitions() {
        let db = memory_db().await;
        let mut task = TaskInfo::new("600519", Default::default(), "api");
        db.record_task(&task).await.unwrap();

        task.state = TaskState::Completed;
        task.end_time = Some(Utc::now());
        db.record_task(&task).await.unwrap();

        let row = sqlx::query("SELECT state FROM task_ledger WHERE task_id = ?")
            .bind(&task.task_id)
            .fetch_one(&db.pool)
            .await
            .unwrap();
        let state: String = row.get("state");
        assert_eq!(state, "completed");
    }
}
