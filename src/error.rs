//! Error types for report execution.
//!
//! Validation failures and execution failures both finalize the execution
//! row as `failed` before being re-raised to the caller; configuration
//! problems surface at construction time, not call time.

use thiserror::Error;

/// Errors raised while validating, running, or exporting a report.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Query validation failed: {0}")]
    InvalidQuery(String),

    #[error("Missing parameter ${0}")]
    MissingParameter(usize),

    #[error("Query timed out after {0} seconds")]
    Timeout(u64),

    #[error("Query execution failed: {0}")]
    Query(String),

    #[error("No data to export")]
    NoData,

    #[error("Report not found: {0}")]
    ReportNotFound(String),

    #[error("Database error: {0}")]
    Db(#[from] crate::db::DbError),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}
