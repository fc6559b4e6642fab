//! aidlyd, the AidlY worker daemon.
//!
//! Loads configuration, validates it eagerly, then polls for due scheduled
//! reports and runs the daily export-retention cleanup.

use std::path::PathBuf;

use chrono::Utc;

use aidly::business_hours::BusinessHours;
use aidly::config::Config;
use aidly::db::ReportDb;
use aidly::reports::ReportEngine;
use aidly::scheduler::Scheduler;
use aidly::storage::LocalStorage;
use aidly::types::format_ts;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        log::error!("aidlyd failed to start: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    // Malformed business-hours config must fail the boot, not the first
    // SLA calculation.
    let business_hours = BusinessHours::new(&config.business_hours)?;
    log::info!(
        "Business-hours clock in {}; next window opens {}",
        business_hours.timezone(),
        format_ts(&business_hours.next_start(Utc::now()))
    );

    let db = match &config.database_path {
        Some(path) => ReportDb::open_at(PathBuf::from(path))?,
        None => ReportDb::open()?,
    };
    let storage = LocalStorage::new(config.export_dir()?);
    let engine = ReportEngine::new(&db, &storage, config.reports.statement_timeout_secs);

    if !config.scheduler.enabled {
        log::info!("Scheduler disabled by config; nothing to do");
        return Ok(());
    }

    let scheduler = Scheduler::new(
        &db,
        engine,
        config.scheduler.poll_interval_secs,
        config.reports.retention_days,
    );
    log::info!(
        "aidlyd started; polling for due reports every {}s",
        config.scheduler.poll_interval_secs
    );
    scheduler.run().await;
    Ok(())
}
