//! SQLite-based state for reports, executions, and schedules.
//!
//! The database lives at `~/.aidly/aidly.db`. Report definitions and their
//! execution history are the durable records; the data the reports query
//! lives in the same database. Declared columns and schedule parameters are
//! JSON text columns, (de)serialized only at this boundary.

use std::path::PathBuf;

use rusqlite::{params, Connection};
use thiserror::Error;

use crate::types::{
    now_ts, ExecutionStatus, ExecutionType, ExportFormat, Report, ReportExecution, ScheduledReport,
};

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),
}

/// Raw execution aggregates over a trailing window, straight from SQL.
#[derive(Debug, Clone, Default)]
pub struct ExecutionAggregates {
    pub total: i64,
    pub successful: i64,
    pub failed: i64,
    pub avg_time_ms: Option<f64>,
    pub avg_rows: Option<f64>,
    pub last_execution_at: Option<String>,
    pub last_success_at: Option<String>,
}

/// SQLite connection wrapper for report state.
///
/// Intentionally not `Clone` or `Sync`; callers that share it across threads
/// hold it behind a mutex.
pub struct ReportDb {
    conn: Connection,
}

impl ReportDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Open (or create) the database at `~/.aidly/aidly.db` and apply the schema.
    pub fn open() -> Result<Self, DbError> {
        Self::open_at(Self::db_path()?)
    }

    /// Open a database at an explicit path. Used by tests and by the worker
    /// when the config overrides the location.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL for concurrent-read friendliness
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        // Idempotent: every statement is IF NOT EXISTS
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.aidly/aidly.db`.
    fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".aidly").join("aidly.db"))
    }

    // =========================================================================
    // Reports
    // =========================================================================

    pub fn insert_report(&self, report: &Report) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO reports (id, name, query, columns, output_format, created_by,
                                  last_executed_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                report.id,
                report.name,
                report.query,
                serde_json::to_string(&report.columns).unwrap_or_else(|_| "[]".to_string()),
                report.output_format.as_str(),
                report.created_by,
                report.last_executed_at,
                report.created_at,
                report.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_report(&self, id: &str) -> Result<Option<Report>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, query, columns, output_format, created_by,
                    last_executed_at, created_at, updated_at
             FROM reports WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], |row| {
            let columns_json: String = row.get(3)?;
            let format_str: String = row.get(4)?;
            Ok(Report {
                id: row.get(0)?,
                name: row.get(1)?,
                query: row.get(2)?,
                columns: serde_json::from_str(&columns_json).unwrap_or_default(),
                output_format: ExportFormat::parse(&format_str).unwrap_or(ExportFormat::Csv),
                created_by: row.get(5)?,
                last_executed_at: row.get(6)?,
                created_at: row.get(7)?,
                updated_at: row.get(8)?,
            })
        })?;
        rows.next().transpose().map_err(DbError::from)
    }

    /// Stamp a report's `last_executed_at` after a successful run.
    pub fn update_last_executed(&self, report_id: &str, at: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE reports SET last_executed_at = ?2, updated_at = ?2 WHERE id = ?1",
            params![report_id, at],
        )?;
        Ok(())
    }

    // =========================================================================
    // Executions
    // =========================================================================

    pub fn insert_execution(&self, execution: &ReportExecution) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO report_executions (id, report_id, executed_by, execution_type, status,
                                            started_at, completed_at, execution_time_ms,
                                            row_count, file_path, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                execution.id,
                execution.report_id,
                execution.executed_by,
                execution.execution_type.as_str(),
                execution.status.as_str(),
                execution.started_at,
                execution.completed_at,
                execution.execution_time_ms,
                execution.row_count,
                execution.file_path,
                execution.error_message,
            ],
        )?;
        Ok(())
    }

    pub fn get_execution(&self, id: &str) -> Result<Option<ReportExecution>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, report_id, executed_by, execution_type, status, started_at,
                    completed_at, execution_time_ms, row_count, file_path, error_message
             FROM report_executions WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], |row| {
            let type_str: String = row.get(3)?;
            let status_str: String = row.get(4)?;
            Ok(ReportExecution {
                id: row.get(0)?,
                report_id: row.get(1)?,
                executed_by: row.get(2)?,
                execution_type: ExecutionType::parse(&type_str).unwrap_or(ExecutionType::Manual),
                status: ExecutionStatus::parse(&status_str).unwrap_or(ExecutionStatus::Pending),
                started_at: row.get(5)?,
                completed_at: row.get(6)?,
                execution_time_ms: row.get(7)?,
                row_count: row.get(8)?,
                file_path: row.get(9)?,
                error_message: row.get(10)?,
            })
        })?;
        rows.next().transpose().map_err(DbError::from)
    }

    /// Finalize an execution as `completed`. Called exactly once per row.
    pub fn complete_execution(
        &self,
        id: &str,
        row_count: i64,
        elapsed_ms: i64,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE report_executions
             SET status = 'completed', completed_at = ?2, execution_time_ms = ?3, row_count = ?4
             WHERE id = ?1 AND status = 'running'",
            params![id, now_ts(), elapsed_ms, row_count],
        )?;
        Ok(())
    }

    /// Finalize an execution as `failed`. Called exactly once per row.
    pub fn fail_execution(&self, id: &str, error: &str, elapsed_ms: i64) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE report_executions
             SET status = 'failed', completed_at = ?2, execution_time_ms = ?3, error_message = ?4
             WHERE id = ?1 AND status = 'running'",
            params![id, now_ts(), elapsed_ms, error],
        )?;
        Ok(())
    }

    pub fn set_execution_file_path(&self, id: &str, path: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE report_executions SET file_path = ?2 WHERE id = ?1",
            params![id, path],
        )?;
        Ok(())
    }

    pub fn clear_execution_file_path(&self, id: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE report_executions SET file_path = NULL WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Aggregate execution counts/averages for a report since `since`.
    /// Averages cover completed runs only.
    pub fn execution_aggregates(
        &self,
        report_id: &str,
        since: &str,
    ) -> Result<ExecutionAggregates, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'completed'), 0),
                    COALESCE(SUM(status = 'failed'), 0),
                    AVG(CASE WHEN status = 'completed' THEN execution_time_ms END),
                    AVG(CASE WHEN status = 'completed' THEN row_count END),
                    MAX(started_at),
                    MAX(CASE WHEN status = 'completed' THEN started_at END)
             FROM report_executions
             WHERE report_id = ?1 AND started_at >= ?2",
        )?;
        let aggregates = stmt.query_row(params![report_id, since], |row| {
            Ok(ExecutionAggregates {
                total: row.get(0)?,
                successful: row.get(1)?,
                failed: row.get(2)?,
                avg_time_ms: row.get(3)?,
                avg_rows: row.get(4)?,
                last_execution_at: row.get(5)?,
                last_success_at: row.get(6)?,
            })
        })?;
        Ok(aggregates)
    }

    /// Executions started before `cutoff` that still have an export file.
    /// Returns (execution id, relative file path) pairs.
    pub fn exports_older_than(&self, cutoff: &str) -> Result<Vec<(String, String)>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, file_path FROM report_executions
             WHERE file_path IS NOT NULL AND started_at < ?1",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // =========================================================================
    // Scheduled reports
    // =========================================================================

    pub fn insert_scheduled_report(&self, schedule: &ScheduledReport) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO scheduled_reports (id, report_id, cron, timezone, parameters, enabled,
                                            last_run_at, next_run_at, last_status, last_error,
                                            consecutive_failures, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                schedule.id,
                schedule.report_id,
                schedule.cron,
                schedule.timezone,
                serde_json::to_string(&schedule.parameters).unwrap_or_else(|_| "[]".to_string()),
                schedule.enabled as i32,
                schedule.last_run_at,
                schedule.next_run_at,
                schedule.last_status,
                schedule.last_error,
                schedule.consecutive_failures,
                schedule.created_at,
                schedule.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_scheduled_report(&self, id: &str) -> Result<Option<ScheduledReport>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "{SCHEDULED_SELECT} WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![id], map_scheduled_row)?;
        rows.next().transpose().map_err(DbError::from)
    }

    /// Enabled schedules whose `next_run_at` has passed. A `next_run_at` left
    /// in the past (e.g. worker downtime) fires once on the next poll.
    pub fn due_scheduled_reports(&self, now: &str) -> Result<Vec<ScheduledReport>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "{SCHEDULED_SELECT}
             WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1
             ORDER BY next_run_at"
        ))?;
        let rows = stmt.query_map(params![now], map_scheduled_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Record a successful scheduled run and advance the fire time.
    pub fn record_schedule_success(
        &self,
        id: &str,
        ran_at: &str,
        next_run_at: Option<&str>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE scheduled_reports
             SET last_run_at = ?2, next_run_at = ?3, last_status = 'completed',
                 last_error = NULL, consecutive_failures = 0, updated_at = ?2
             WHERE id = ?1",
            params![id, ran_at, next_run_at],
        )?;
        Ok(())
    }

    /// Record a failed scheduled run. The failure count increments and the
    /// schedule is disabled once it reaches `max_consecutive`. Returns the
    /// new count and whether the schedule is still enabled.
    pub fn record_schedule_failure(
        &self,
        id: &str,
        error: &str,
        ran_at: &str,
        next_run_at: Option<&str>,
        max_consecutive: i64,
    ) -> Result<(i64, bool), DbError> {
        self.conn.execute(
            "UPDATE scheduled_reports
             SET last_run_at = ?2, next_run_at = ?3, last_status = 'failed',
                 last_error = ?4,
                 consecutive_failures = consecutive_failures + 1,
                 enabled = CASE WHEN consecutive_failures + 1 >= ?5 THEN 0 ELSE enabled END,
                 updated_at = ?2
             WHERE id = ?1",
            params![id, ran_at, next_run_at, error, max_consecutive],
        )?;
        let (count, enabled): (i64, i64) = self.conn.query_row(
            "SELECT consecutive_failures, enabled FROM scheduled_reports WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((count, enabled != 0))
    }
}

const SCHEDULED_SELECT: &str = "SELECT id, report_id, cron, timezone, parameters, enabled,
        last_run_at, next_run_at, last_status, last_error,
        consecutive_failures, created_at, updated_at
 FROM scheduled_reports";

fn map_scheduled_row(row: &rusqlite::Row) -> rusqlite::Result<ScheduledReport> {
    let parameters_json: String = row.get(4)?;
    let enabled: i64 = row.get(5)?;
    Ok(ScheduledReport {
        id: row.get(0)?,
        report_id: row.get(1)?,
        cron: row.get(2)?,
        timezone: row.get(3)?,
        parameters: serde_json::from_str(&parameters_json).unwrap_or_default(),
        enabled: enabled != 0,
        last_run_at: row.get(6)?,
        next_run_at: row.get(7)?,
        last_status: row.get(8)?,
        last_error: row.get(9)?,
        consecutive_failures: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}
