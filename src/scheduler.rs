//! Scheduler for recurring report execution.
//!
//! Polls `scheduled_reports` for due rows and runs them through the engine.
//! A `next_run_at` left in the past (worker downtime, sleep/wake) fires once
//! on the next poll, then advances to the next cron fire time. Repeated
//! failures disable a schedule rather than letting it fail forever.

use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::db::ReportDb;
use crate::error::ExecutionError;
use crate::reports::ReportEngine;
use crate::types::{format_ts, ExecutionType, ScheduledReport};

/// Disable a schedule after this many consecutive failures.
const MAX_CONSECUTIVE_FAILURES: i64 = 3;

/// Interval between retention-cleanup passes (24 hours).
const CLEANUP_INTERVAL_HOURS: i64 = 24;

pub struct Scheduler<'a> {
    db: &'a ReportDb,
    engine: ReportEngine<'a>,
    poll_interval_secs: u64,
    retention_days: i64,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        db: &'a ReportDb,
        engine: ReportEngine<'a>,
        poll_interval_secs: u64,
        retention_days: i64,
    ) -> Self {
        Self {
            db,
            engine,
            poll_interval_secs,
            retention_days,
        }
    }

    /// Run the scheduler loop indefinitely: poll for due schedules every
    /// interval, plus a daily retention-cleanup tick.
    pub async fn run(&self) {
        let mut last_cleanup = Utc::now();

        loop {
            tokio::time::sleep(Duration::from_secs(self.poll_interval_secs)).await;

            let now = Utc::now();
            self.run_due_reports(now);

            if (now - last_cleanup).num_hours() >= CLEANUP_INTERVAL_HOURS {
                match self.engine.cleanup_old_executions(self.retention_days) {
                    Ok(count) => log::info!("Retention cleanup pass done ({count} cleared)"),
                    Err(e) => log::warn!("Retention cleanup failed: {e}"),
                }
                last_cleanup = now;
            }
        }
    }

    /// One poll pass. Split out so tests can drive it directly.
    pub fn run_due_reports(&self, now: DateTime<Utc>) {
        let due = match self.db.due_scheduled_reports(&format_ts(&now)) {
            Ok(due) => due,
            Err(e) => {
                log::warn!("Failed to query due schedules: {e}");
                return;
            }
        };

        for schedule in due {
            self.run_schedule(&schedule, now);
        }
    }

    fn run_schedule(&self, schedule: &ScheduledReport, now: DateTime<Utc>) {
        let ran_at = format_ts(&now);
        // A schedule whose cron/timezone no longer parses gets a NULL next
        // fire time and stops being picked up.
        let next_run = match next_run_time(&schedule.cron, &schedule.timezone) {
            Ok(t) => Some(format_ts(&t)),
            Err(e) => {
                log::warn!("Schedule {} has an invalid cron entry: {e}", schedule.id);
                None
            }
        };

        let report = match self.db.get_report(&schedule.report_id) {
            Ok(Some(report)) => report,
            Ok(None) => {
                let err = ExecutionError::ReportNotFound(schedule.report_id.clone());
                log::warn!("Schedule {}: {err}", schedule.id);
                self.record_failure(schedule, &err.to_string(), &ran_at, next_run.as_deref());
                return;
            }
            Err(e) => {
                log::warn!("Failed to load report {}: {e}", schedule.report_id);
                return;
            }
        };

        // Scheduled runs always materialize a file in the report's format.
        let result = self.engine.execute_with_export(
            &report,
            &schedule.parameters,
            report.output_format,
            ExecutionType::Scheduled,
            None,
        );

        match result {
            Ok(execution) => {
                log::info!(
                    "Scheduled report '{}' ran: {} row(s), next run {}",
                    report.name,
                    execution.row_count.unwrap_or(0),
                    next_run.as_deref().unwrap_or("never")
                );
                if let Err(e) =
                    self.db
                        .record_schedule_success(&schedule.id, &ran_at, next_run.as_deref())
                {
                    log::warn!("Failed to record schedule success for {}: {e}", schedule.id);
                }
            }
            Err(e) => {
                // The execution row already holds the failure; this marks
                // the scheduled report itself.
                self.record_failure(schedule, &e.to_string(), &ran_at, next_run.as_deref());
            }
        }
    }

    fn record_failure(
        &self,
        schedule: &ScheduledReport,
        error: &str,
        ran_at: &str,
        next_run: Option<&str>,
    ) {
        match self.db.record_schedule_failure(
            &schedule.id,
            error,
            ran_at,
            next_run,
            MAX_CONSECUTIVE_FAILURES,
        ) {
            Ok((count, enabled)) if !enabled => {
                log::error!(
                    "Schedule {} disabled after {count} consecutive failures: {error}",
                    schedule.id
                );
            }
            Ok((count, _)) => {
                log::warn!(
                    "Scheduled report failed ({count} consecutive): {error}"
                );
            }
            Err(db_err) => {
                log::warn!("Failed to record schedule failure for {}: {db_err}", schedule.id);
            }
        }
    }
}

/// Validate cron + timezone, compute the first fire time, and insert the
/// schedule. Invalid entries are rejected here rather than discovered at
/// poll time.
pub fn schedule_report(
    db: &ReportDb,
    report_id: &str,
    cron: &str,
    timezone: &str,
    parameters: Vec<String>,
) -> Result<ScheduledReport, ExecutionError> {
    let first_run = next_run_time(cron, timezone)?;
    let mut schedule = ScheduledReport::new(report_id, cron, timezone, parameters);
    schedule.next_run_at = Some(format_ts(&first_run));
    db.insert_scheduled_report(&schedule)?;
    Ok(schedule)
}

/// Parse a 5-field cron expression. The cron crate expects 6 fields (with
/// seconds), so "0" is prepended.
pub fn parse_cron(expr: &str) -> Result<Schedule, ExecutionError> {
    let full_expr = format!("0 {}", expr);
    full_expr.parse::<Schedule>().map_err(|e| {
        ExecutionError::Configuration(format!("Invalid cron expression '{}': {}", expr, e))
    })
}

/// The next fire time for a cron expression evaluated in `timezone`.
pub fn next_run_time(expr: &str, timezone: &str) -> Result<DateTime<Utc>, ExecutionError> {
    let schedule = parse_cron(expr)?;
    let tz: Tz = timezone
        .parse()
        .map_err(|_| ExecutionError::Configuration(format!("Invalid timezone: {timezone}")))?;

    let next = schedule
        .upcoming(tz)
        .next()
        .ok_or_else(|| ExecutionError::Configuration("No upcoming scheduled time".to_string()))?;

    Ok(next.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use crate::types::{ExportFormat, Report};

    fn test_fixture() -> (tempfile::TempDir, ReportDb, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let db = ReportDb::open_at(dir.path().join("test.db")).unwrap();
        db.conn_ref()
            .execute_batch(
                "CREATE TABLE tickets (id INTEGER PRIMARY KEY, subject TEXT NOT NULL);
                 INSERT INTO tickets VALUES (1, 'Printer broken'), (2, 'VPN down');",
            )
            .unwrap();
        let storage = LocalStorage::new(dir.path().join("exports"));
        (dir, db, storage)
    }

    fn seed_report(db: &ReportDb, query: &str) -> Report {
        let report = Report::new(
            "Scheduled tickets",
            query,
            vec!["id".to_string(), "subject".to_string()],
            ExportFormat::Csv,
        );
        db.insert_report(&report).unwrap();
        report
    }

    fn make_due(db: &ReportDb, schedule_id: &str) {
        db.conn_ref()
            .execute(
                "UPDATE scheduled_reports SET next_run_at = '2020-01-01T00:00:00Z', enabled = 1
                 WHERE id = ?1",
                [schedule_id],
            )
            .unwrap();
    }

    #[test]
    fn test_parse_cron_weekdays_8am() {
        assert!(parse_cron("0 8 * * 1-5").is_ok());
    }

    #[test]
    fn test_parse_cron_invalid() {
        assert!(parse_cron("not a cron").is_err());
    }

    #[test]
    fn test_next_run_time_is_in_future() {
        let next = next_run_time("0 8 * * 1-5", "America/New_York").unwrap();
        assert!(next > Utc::now());
    }

    #[test]
    fn test_next_run_time_invalid_timezone() {
        assert!(matches!(
            next_run_time("0 8 * * *", "Mars/Olympus"),
            Err(ExecutionError::Configuration(_))
        ));
    }

    #[test]
    fn test_schedule_report_sets_first_run() {
        let (_dir, db, _storage) = test_fixture();
        let report = seed_report(&db, "SELECT id, subject FROM tickets");
        let schedule = schedule_report(&db, &report.id, "0 8 * * *", "UTC", vec![]).unwrap();
        assert!(schedule.next_run_at.is_some());
        assert!(schedule_report(&db, &report.id, "junk", "UTC", vec![]).is_err());
    }

    #[test]
    fn test_due_schedule_runs_and_advances() {
        let (_dir, db, storage) = test_fixture();
        let report = seed_report(&db, "SELECT id, subject FROM tickets");
        let schedule = schedule_report(&db, &report.id, "0 8 * * *", "UTC", vec![]).unwrap();
        make_due(&db, &schedule.id);

        let engine = ReportEngine::new(&db, &storage, 30);
        let scheduler = Scheduler::new(&db, engine, 60, 90);
        let now = Utc::now();
        scheduler.run_due_reports(now);

        let loaded = db.get_scheduled_report(&schedule.id).unwrap().unwrap();
        assert_eq!(loaded.last_status.as_deref(), Some("completed"));
        assert_eq!(loaded.consecutive_failures, 0);
        assert!(loaded.next_run_at.unwrap() > format_ts(&now));

        // Exactly one completed, exported execution.
        let count: i64 = db
            .conn_ref()
            .query_row(
                "SELECT COUNT(*) FROM report_executions
                 WHERE report_id = ?1 AND status = 'completed'
                   AND execution_type = 'scheduled' AND file_path IS NOT NULL",
                [&report.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_not_due_schedule_is_left_alone() {
        let (_dir, db, storage) = test_fixture();
        let report = seed_report(&db, "SELECT id, subject FROM tickets");
        let schedule = schedule_report(&db, &report.id, "0 8 * * *", "UTC", vec![]).unwrap();

        let engine = ReportEngine::new(&db, &storage, 30);
        let scheduler = Scheduler::new(&db, engine, 60, 90);
        scheduler.run_due_reports(Utc::now());

        let loaded = db.get_scheduled_report(&schedule.id).unwrap().unwrap();
        assert!(loaded.last_run_at.is_none());
    }

    #[test]
    fn test_three_failures_disable_schedule() {
        let (_dir, db, storage) = test_fixture();
        let report = seed_report(&db, "DELETE FROM tickets");
        let schedule = schedule_report(&db, &report.id, "0 8 * * *", "UTC", vec![]).unwrap();

        let engine = ReportEngine::new(&db, &storage, 30);
        let scheduler = Scheduler::new(&db, engine, 60, 90);

        for expected_failures in 1..=3 {
            make_due(&db, &schedule.id);
            scheduler.run_due_reports(Utc::now());
            let loaded = db.get_scheduled_report(&schedule.id).unwrap().unwrap();
            assert_eq!(loaded.consecutive_failures, expected_failures);
        }

        let loaded = db.get_scheduled_report(&schedule.id).unwrap().unwrap();
        assert!(!loaded.enabled);
        assert_eq!(loaded.last_status.as_deref(), Some("failed"));
        assert!(loaded.last_error.is_some());
    }

    #[test]
    fn test_missing_report_marks_schedule_failed() {
        let (_dir, db, storage) = test_fixture();
        let schedule = schedule_report(&db, "no-such-report", "0 8 * * *", "UTC", vec![]).unwrap();
        make_due(&db, &schedule.id);

        let engine = ReportEngine::new(&db, &storage, 30);
        let scheduler = Scheduler::new(&db, engine, 60, 90);
        scheduler.run_due_reports(Utc::now());

        let loaded = db.get_scheduled_report(&schedule.id).unwrap().unwrap();
        assert_eq!(loaded.last_status.as_deref(), Some("failed"));
        assert_eq!(loaded.consecutive_failures, 1);
    }

    #[test]
    fn test_scheduled_run_passes_parameters() {
        let (_dir, db, storage) = test_fixture();
        let report = seed_report(&db, "SELECT id, subject FROM tickets WHERE id = $1");
        let schedule =
            schedule_report(&db, &report.id, "0 8 * * *", "UTC", vec!["2".to_string()]).unwrap();
        make_due(&db, &schedule.id);

        let engine = ReportEngine::new(&db, &storage, 30);
        let scheduler = Scheduler::new(&db, engine, 60, 90);
        scheduler.run_due_reports(Utc::now());

        let row_count: i64 = db
            .conn_ref()
            .query_row(
                "SELECT row_count FROM report_executions WHERE report_id = ?1",
                [&report.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(row_count, 1);
    }
}
