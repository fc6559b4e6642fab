//! Report Execution Engine: runs admin-authored read-only queries, records
//! timing and row counts, and optionally materializes results to a file.
//!
//! Every call inserts a fresh execution row in `running` state before any
//! work happens, so concurrent or duplicate triggers are observable as
//! independent rows; no mutual exclusion is attempted. Query validation and
//! placeholder substitution are deliberately crude allow-lists kept for
//! compatibility with existing report definitions; they are best-effort
//! guards, not a security boundary.

use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;

use crate::db::ReportDb;
use crate::error::ExecutionError;
use crate::export;
use crate::storage::Storage;
use crate::types::{
    format_ts, now_ts, ExecutionStats, ExecutionType, ExportFormat, Report, ReportExecution,
};

/// Stats cover the trailing 30 days.
const STATS_WINDOW_DAYS: i64 = 30;

/// Result set pulled from a report query.
struct QueryOutput {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// Executes reports against the database, recording one execution row per run.
pub struct ReportEngine<'a> {
    db: &'a ReportDb,
    storage: &'a dyn Storage,
    statement_timeout_secs: u64,
}

impl<'a> ReportEngine<'a> {
    pub fn new(db: &'a ReportDb, storage: &'a dyn Storage, statement_timeout_secs: u64) -> Self {
        Self {
            db,
            storage,
            statement_timeout_secs,
        }
    }

    /// Run a report. The returned execution row is finalized (`completed`);
    /// on error the row is finalized `failed` and the error re-raised.
    pub fn execute(
        &self,
        report: &Report,
        parameters: &[String],
        execution_type: ExecutionType,
        user_id: Option<&str>,
    ) -> Result<ReportExecution, ExecutionError> {
        self.execute_inner(report, parameters, None, execution_type, user_id)
    }

    /// Run a report and materialize the result set under
    /// `report_{executionId}_{timestamp}.{format}`. Zero rows is a hard
    /// error: there is nothing to export.
    pub fn execute_with_export(
        &self,
        report: &Report,
        parameters: &[String],
        format: ExportFormat,
        execution_type: ExecutionType,
        user_id: Option<&str>,
    ) -> Result<ReportExecution, ExecutionError> {
        self.execute_inner(report, parameters, Some(format), execution_type, user_id)
    }

    fn execute_inner(
        &self,
        report: &Report,
        parameters: &[String],
        export_format: Option<ExportFormat>,
        execution_type: ExecutionType,
        user_id: Option<&str>,
    ) -> Result<ReportExecution, ExecutionError> {
        let started = Instant::now();
        let execution = ReportExecution::start(&report.id, execution_type, user_id);
        self.db.insert_execution(&execution)?;

        match self.run_and_export(report, parameters, export_format, &execution.id) {
            Ok((row_count, file_path)) => {
                let elapsed = started.elapsed().as_millis() as i64;
                if let Some(path) = &file_path {
                    self.db.set_execution_file_path(&execution.id, path)?;
                }
                self.db.complete_execution(&execution.id, row_count, elapsed)?;
                self.db.update_last_executed(&report.id, &now_ts())?;
                log::info!(
                    "Report '{}' completed: {} row(s) in {}ms",
                    report.name,
                    row_count,
                    elapsed
                );
                self.db
                    .get_execution(&execution.id)?
                    .ok_or_else(|| ExecutionError::Query("execution row vanished".to_string()))
            }
            Err(e) => {
                let elapsed = started.elapsed().as_millis() as i64;
                if let Err(db_err) = self.db.fail_execution(&execution.id, &e.to_string(), elapsed)
                {
                    log::warn!("Failed to record execution failure: {db_err}");
                }
                log::warn!("Report '{}' failed after {}ms: {}", report.name, elapsed, e);
                Err(e)
            }
        }
    }

    fn run_and_export(
        &self,
        report: &Report,
        parameters: &[String],
        export_format: Option<ExportFormat>,
        execution_id: &str,
    ) -> Result<(i64, Option<String>), ExecutionError> {
        validate_query(&report.query)?;
        let sql = bind_parameters(&report.query, parameters)?;
        let output = self.run_query(&sql)?;
        let row_count = output.rows.len() as i64;

        let Some(format) = export_format else {
            return Ok((row_count, None));
        };

        if output.rows.is_empty() {
            return Err(ExecutionError::NoData);
        }

        // Declared columns drive the header; fall back to the statement's
        // own column names for reports defined without them.
        let columns = if report.columns.is_empty() {
            &output.columns
        } else {
            &report.columns
        };
        let contents = match format {
            ExportFormat::Csv => export::to_csv(columns, &output.rows),
            ExportFormat::Json => export::to_json(columns, &output.rows),
        };

        let filename = format!(
            "report_{}_{}.{}",
            execution_id,
            Utc::now().format("%Y%m%d%H%M%S"),
            format.as_str()
        );
        self.storage.put(&filename, contents.as_bytes())?;
        Ok((row_count, Some(filename)))
    }

    /// Run the bound SQL under the statement timeout. SQLite has no
    /// server-side `statement_timeout`; a watchdog thread interrupts the
    /// connection when the budget runs out, which surfaces as an interrupted
    /// statement error here.
    fn run_query(&self, sql: &str) -> Result<QueryOutput, ExecutionError> {
        let conn = self.db.conn_ref();
        let handle = conn.get_interrupt_handle();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let budget = Duration::from_secs(self.statement_timeout_secs);
        let watchdog = thread::spawn(move || {
            if done_rx.recv_timeout(budget).is_err() {
                // Interrupting an idle connection is a no-op, so the race
                // with a just-finished query is harmless.
                handle.interrupt();
            }
        });

        let result = collect_rows(conn, sql);

        let _ = done_tx.send(());
        let _ = watchdog.join();

        result.map_err(|e| {
            if e.sqlite_error_code() == Some(rusqlite::ErrorCode::OperationInterrupted) {
                ExecutionError::Timeout(self.statement_timeout_secs)
            } else {
                ExecutionError::Query(e.to_string())
            }
        })
    }

    /// Execution statistics for a report over the trailing 30 days.
    pub fn execution_stats(&self, report_id: &str) -> Result<ExecutionStats, ExecutionError> {
        let since = format_ts(&(Utc::now() - chrono::Duration::days(STATS_WINDOW_DAYS)));
        let agg = self.db.execution_aggregates(report_id, &since)?;
        let success_rate = if agg.total == 0 {
            0.0
        } else {
            ((agg.successful as f64 / agg.total as f64) * 10_000.0).round() / 100.0
        };
        Ok(ExecutionStats {
            total_executions: agg.total,
            successful_executions: agg.successful,
            failed_executions: agg.failed,
            success_rate,
            avg_execution_time_ms: agg.avg_time_ms,
            avg_row_count: agg.avg_rows,
            last_execution_at: agg.last_execution_at,
            last_success_at: agg.last_success_at,
        })
    }

    /// Delete export files for executions older than the retention window
    /// and null their path column. Per-file errors are logged and skipped;
    /// one bad file never blocks the rest of the batch.
    pub fn cleanup_old_executions(&self, retention_days: i64) -> Result<usize, ExecutionError> {
        let cutoff = format_ts(&(Utc::now() - chrono::Duration::days(retention_days)));
        let stale = self.db.exports_older_than(&cutoff)?;
        let mut cleaned = 0;
        for (id, path) in stale {
            if self.storage.exists(&path) {
                if let Err(e) = self.storage.delete(&path) {
                    log::warn!("Failed to delete export {path}: {e}");
                    continue;
                }
            } else {
                log::debug!("Export {path} already gone; clearing reference");
            }
            if let Err(e) = self.db.clear_execution_file_path(&id) {
                log::warn!("Failed to clear file path for execution {id}: {e}");
                continue;
            }
            cleaned += 1;
        }
        if cleaned > 0 {
            log::info!("Cleaned up {cleaned} report export(s)");
        }
        Ok(cleaned)
    }
}

fn collect_rows(conn: &Connection, sql: &str) -> Result<QueryOutput, rusqlite::Error> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let width = columns.len();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Vec::with_capacity(width);
        for i in 0..width {
            record.push(value_ref_to_json(row.get_ref(i)?));
        }
        out.push(record);
    }
    Ok(QueryOutput { columns, rows: out })
}

fn value_ref_to_json(value: ValueRef) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

/// Must start with SELECT and contain none of the mutating keywords as
/// whole words. Crude, per the module docs.
fn validate_query(query: &str) -> Result<(), ExecutionError> {
    static SELECT_RE: OnceLock<Regex> = OnceLock::new();
    static FORBIDDEN_RE: OnceLock<Regex> = OnceLock::new();

    let select = SELECT_RE.get_or_init(|| Regex::new(r"(?i)^SELECT\s+").unwrap());
    let forbidden = FORBIDDEN_RE
        .get_or_init(|| Regex::new(r"(?i)\b(DROP|DELETE|UPDATE|INSERT|ALTER|CREATE)\b").unwrap());

    let trimmed = query.trim();
    if !select.is_match(trimmed) {
        return Err(ExecutionError::InvalidQuery(
            "only SELECT statements are allowed".to_string(),
        ));
    }
    if let Some(m) = forbidden.find(trimmed) {
        return Err(ExecutionError::InvalidQuery(format!(
            "forbidden keyword '{}'",
            m.as_str()
        )));
    }
    Ok(())
}

/// Substitute `$1..$n` placeholders with literal values. Quotes are escaped
/// and bare numerics pass through unquoted; the placeholder syntax is kept
/// for compatibility with existing report definitions.
fn bind_parameters(query: &str, parameters: &[String]) -> Result<String, ExecutionError> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\$(\d+)").unwrap());

    for caps in re.captures_iter(query) {
        let index: usize = caps[1]
            .parse()
            .map_err(|_| ExecutionError::InvalidQuery(format!("bad placeholder ${}", &caps[1])))?;
        if index == 0 || index > parameters.len() {
            return Err(ExecutionError::MissingParameter(index));
        }
    }

    let bound = re.replace_all(query, |caps: &regex::Captures| {
        let index: usize = caps[1].parse().unwrap_or(0);
        sql_literal(&parameters[index - 1])
    });
    Ok(bound.into_owned())
}

fn sql_literal(value: &str) -> String {
    if value.parse::<i64>().is_ok() || value.parse::<f64>().is_ok() {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "''"))
    }
}
