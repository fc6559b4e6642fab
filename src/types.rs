//! Core record types for reports, executions, and schedules.
//!
//! Timestamps are RFC 3339 UTC strings ("2026-02-04T09:00:00Z") everywhere
//! they cross the storage boundary; `now_ts`/`format_ts` keep the format
//! fixed-width so string comparison orders chronologically.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current time as a storage timestamp.
pub fn now_ts() -> String {
    format_ts(&Utc::now())
}

/// Format a timestamp for storage.
pub fn format_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Output format for materialized report results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "csv" => Some(ExportFormat::Csv),
            "json" => Some(ExportFormat::Json),
            _ => None,
        }
    }
}

/// How an execution was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionType {
    Manual,
    Scheduled,
}

impl ExecutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionType::Manual => "manual",
            ExecutionType::Scheduled => "scheduled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(ExecutionType::Manual),
            "scheduled" => Some(ExecutionType::Scheduled),
            _ => None,
        }
    }
}

/// Execution lifecycle. Transitions only move forward:
/// pending -> running -> completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExecutionStatus::Pending),
            "running" => Some(ExecutionStatus::Running),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }
}

/// An admin-authored report definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub name: String,
    /// Read-only SELECT with positional `$1..$n` placeholders.
    pub query: String,
    /// Declared output columns, in SELECT order.
    pub columns: Vec<String>,
    pub output_format: ExportFormat,
    pub created_by: Option<String>,
    pub last_executed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Report {
    pub fn new(name: &str, query: &str, columns: Vec<String>, output_format: ExportFormat) -> Self {
        let now = now_ts();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            query: query.to_string(),
            columns,
            output_format,
            created_by: None,
            last_executed_at: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// One concrete run of a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportExecution {
    pub id: String,
    pub report_id: String,
    pub executed_by: Option<String>,
    pub execution_type: ExecutionType,
    pub status: ExecutionStatus,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub row_count: Option<i64>,
    pub file_path: Option<String>,
    pub error_message: Option<String>,
}

impl ReportExecution {
    /// A fresh execution row in `running` state, so that concurrent or
    /// duplicate triggers are observable from the moment work begins.
    pub fn start(report_id: &str, execution_type: ExecutionType, user_id: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            report_id: report_id.to_string(),
            executed_by: user_id.map(String::from),
            execution_type,
            status: ExecutionStatus::Running,
            started_at: now_ts(),
            completed_at: None,
            execution_time_ms: None,
            row_count: None,
            file_path: None,
            error_message: None,
        }
    }
}

/// A recurring schedule for a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledReport {
    pub id: String,
    pub report_id: String,
    /// 5-field cron expression, evaluated in `timezone`.
    pub cron: String,
    pub timezone: String,
    /// Positional parameters passed to the report on each run.
    pub parameters: Vec<String>,
    pub enabled: bool,
    pub last_run_at: Option<String>,
    pub next_run_at: Option<String>,
    pub last_status: Option<String>,
    pub last_error: Option<String>,
    pub consecutive_failures: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl ScheduledReport {
    pub fn new(report_id: &str, cron: &str, timezone: &str, parameters: Vec<String>) -> Self {
        let now = now_ts();
        Self {
            id: Uuid::new_v4().to_string(),
            report_id: report_id.to_string(),
            cron: cron.to_string(),
            timezone: timezone.to_string(),
            parameters,
            enabled: true,
            last_run_at: None,
            next_run_at: None,
            last_status: None,
            last_error: None,
            consecutive_failures: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Aggregate execution statistics over a trailing window.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    pub total_executions: i64,
    pub successful_executions: i64,
    pub failed_executions: i64,
    /// Percentage, 0 when there were no executions in the window.
    pub success_rate: f64,
    /// Averages cover successful runs only.
    pub avg_execution_time_ms: Option<f64>,
    pub avg_row_count: Option<f64>,
    pub last_execution_at: Option<String>,
    pub last_success_at: Option<String>,
}
