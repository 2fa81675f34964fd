use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction, TransactionBehavior};
use tracing::debug;

use crate::config::Settings;
use crate::error::{PipelineError, Result};

// ============================================================================
// CONNECTIONS & TRANSACTIONS
// ============================================================================

/// Open (or create) the pipeline database and make sure the schema exists
pub fn open_database(path: &Path, settings: &Settings) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_millis(settings.busy_timeout_ms))?;
    setup_database(&conn)?;
    debug!(path = %path.display(), "database opened");
    Ok(conn)
}

/// Begin a write transaction that takes the database write lock up front.
///
/// Every domain transition runs inside one of these, so a reader never
/// observes a partial application and two writers never interleave their
/// check-then-write sequences.
pub fn write_tx(conn: &mut Connection) -> Result<Transaction<'_>> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

/// True when a statement failed on a UNIQUE / CHECK / FOREIGN KEY constraint
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Conditional updates must touch exactly one row, otherwise a concurrent
/// writer won the race and the transition is a conflict
pub(crate) fn expect_one_row(affected: usize, conflict: &str) -> Result<()> {
    if affected == 1 {
        Ok(())
    } else {
        Err(PipelineError::conflict(conflict))
    }
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// TIME COLUMNS
// ============================================================================

/// Fixed-width RFC 3339 so text ordering matches time ordering
pub(crate) fn to_db_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn to_db_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_time(idx, &raw)
}

pub(crate) fn opt_time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_time(idx, &s)).transpose()
}

pub(crate) fn date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Parse an admin-supplied `YYYY-MM-DD` task date
pub fn parse_task_date(raw: &str) -> Result<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.len() != 10 {
        return Err(PipelineError::validation("Invalid date format"));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|_| PipelineError::validation("Invalid date format"))
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery and concurrent readers
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", true)?;

    // ==========================================================================
    // Identities
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS admins (
            id TEXT PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS parents (
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL,
            phone TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (email, phone)
        )",
        [],
    )?;

    // username UNIQUE closes the credential-issuance race
    conn.execute(
        "CREATE TABLE IF NOT EXISTS children (
            id TEXT PRIMARY KEY,
            parent_id TEXT NOT NULL REFERENCES parents(id),
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            grade INTEGER NOT NULL,
            status TEXT NOT NULL CHECK (status IN (
                'pending_payment', 'approved_pending_login', 'assessment_required', 'active', 'rejected'
            )),
            level TEXT CHECK (level IS NULL OR level IN (
                'foundational', 'functional', 'transitional', 'advanced'
            )),
            username TEXT UNIQUE,
            password_hash TEXT,
            credentials_created_at TEXT,
            credentials_created_by TEXT,
            level_assigned_at TEXT,
            level_assigned_by TEXT,
            last_daily_submission_at TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Uploaded blobs (references + integrity hash, never bytes)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            blob_ref TEXT NOT NULL,
            original_name TEXT,
            mime_type TEXT NOT NULL,
            byte_size INTEGER NOT NULL,
            sha256 TEXT NOT NULL,
            uploaded_by_child_id TEXT REFERENCES children(id),
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Payments
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            child_id TEXT UNIQUE NOT NULL REFERENCES children(id),
            method TEXT NOT NULL CHECK (method IN ('transaction_id', 'receipt_upload')),
            status TEXT NOT NULL CHECK (status IN ('pending', 'approved', 'rejected')),
            transaction_id TEXT,
            receipt_file_id TEXT REFERENCES files(id),
            review_note TEXT,
            reviewed_by TEXT,
            reviewed_at TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Content
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS content_items (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            skill TEXT NOT NULL,
            content_type TEXT NOT NULL,
            level TEXT,
            text_body TEXT,
            asset_url TEXT,
            mime_type TEXT,
            is_assessment_default INTEGER NOT NULL DEFAULT 0,
            created_by TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Assessment
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessments (
            id TEXT PRIMARY KEY,
            child_id TEXT NOT NULL REFERENCES children(id),
            kind TEXT NOT NULL,
            started_at TEXT,
            submitted_at TEXT,
            assigned_level TEXT,
            reviewed_by TEXT,
            reviewed_at TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (child_id, kind)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessment_artifacts (
            id TEXT PRIMARY KEY,
            assessment_id TEXT NOT NULL REFERENCES assessments(id),
            skill TEXT NOT NULL,
            text_body TEXT,
            file_id TEXT REFERENCES files(id),
            created_at TEXT NOT NULL,
            CHECK ((text_body IS NULL) <> (file_id IS NULL))
        )",
        [],
    )?;

    // ==========================================================================
    // Daily tasks
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS daily_tasks (
            id TEXT PRIMARY KEY,
            task_date TEXT NOT NULL,
            skill TEXT NOT NULL,
            level TEXT,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS daily_task_content (
            daily_task_id TEXT NOT NULL REFERENCES daily_tasks(id),
            content_item_id TEXT NOT NULL REFERENCES content_items(id),
            position INTEGER NOT NULL,
            PRIMARY KEY (daily_task_id, content_item_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS daily_submissions (
            id TEXT PRIMARY KEY,
            child_id TEXT NOT NULL REFERENCES children(id),
            daily_task_id TEXT NOT NULL REFERENCES daily_tasks(id),
            is_completed INTEGER NOT NULL DEFAULT 0,
            submitted_at TEXT,
            rp_earned INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            UNIQUE (child_id, daily_task_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS daily_submission_artifacts (
            id TEXT PRIMARY KEY,
            daily_submission_id TEXT NOT NULL REFERENCES daily_submissions(id),
            skill TEXT NOT NULL,
            text_body TEXT,
            file_id TEXT REFERENCES files(id),
            created_at TEXT NOT NULL,
            CHECK ((text_body IS NULL) <> (file_id IS NULL))
        )",
        [],
    )?;

    // daily_submission_id UNIQUE: RP is credited exactly once per submission
    conn.execute(
        "CREATE TABLE IF NOT EXISTS rp_events (
            id TEXT PRIMARY KEY,
            child_id TEXT NOT NULL REFERENCES children(id),
            daily_submission_id TEXT UNIQUE NOT NULL REFERENCES daily_submissions(id),
            delta INTEGER NOT NULL,
            reason TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Audit log (append-only)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_log (
            id TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            admin_id TEXT NOT NULL,
            action TEXT NOT NULL,
            target_child_id TEXT,
            target_payment_id TEXT,
            target_assessment_id TEXT,
            target_daily_task_id TEXT,
            metadata TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Append-only enforcement
    // ==========================================================================
    for table in ["audit_log", "rp_events"] {
        for op in ["UPDATE", "DELETE"] {
            conn.execute(
                &format!(
                    "CREATE TRIGGER IF NOT EXISTS {table}_no_{op_lower}
                     BEFORE {op} ON {table}
                     BEGIN
                         SELECT RAISE(ABORT, '{table} is append-only');
                     END",
                    table = table,
                    op = op,
                    op_lower = op.to_lowercase(),
                ),
                [],
            )?;
        }
    }

    // ==========================================================================
    // Indexes
    // ==========================================================================

    // Natural identity of a daily task; NULL level folds to 'all' so the
    // everyone-task is unique too
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_daily_tasks_key
         ON daily_tasks(task_date, skill, COALESCE(level, 'all'))",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_children_status ON children(status)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_status ON payments(status)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submission_artifacts_skill
         ON daily_submission_artifacts(daily_submission_id, skill)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_child ON audit_log(target_child_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp)",
        [],
    )?;

    Ok(())
}
