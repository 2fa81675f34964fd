// 📅 Daily tasks, submissions and the RP ledger
//
// A daily task is identified by (date, skill, level-or-null). Each child has
// at most one submission per task: absent → draft → completed.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::db::{date_col, opt_time_col, time_col};
use crate::entities::child::Level;
use crate::entities::content::Skill;
use crate::error::{PipelineError, Result};

// ============================================================================
// DAILY TASK
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyTask {
    pub id: String,
    pub task_date: NaiveDate,
    pub skill: Skill,
    /// None applies to every active child
    pub level: Option<Level>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DailyTask {
    pub(crate) const COLUMNS: &'static str =
        "id, task_date, skill, level, created_by, created_at, updated_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DailyTask {
            id: row.get(0)?,
            task_date: date_col(row, 1)?,
            skill: row.get(2)?,
            level: row.get(3)?,
            created_by: row.get(4)?,
            created_at: time_col(row, 5)?,
            updated_at: time_col(row, 6)?,
        })
    }
}

pub fn get_daily_task(conn: &Connection, id: &str) -> Result<Option<DailyTask>> {
    let sql = format!("SELECT {} FROM daily_tasks WHERE id = ?1", DailyTask::COLUMNS);
    Ok(conn.query_row(&sql, [id], DailyTask::from_row).optional()?)
}

pub fn require_daily_task(conn: &Connection, id: &str) -> Result<DailyTask> {
    get_daily_task(conn, id)?.ok_or_else(|| PipelineError::not_found("Task"))
}

/// Look a task up by its natural key; `level IS ?3` matches NULL to NULL
pub fn find_daily_task(
    conn: &Connection,
    task_date: NaiveDate,
    skill: Skill,
    level: Option<Level>,
) -> Result<Option<DailyTask>> {
    let sql = format!(
        "SELECT {} FROM daily_tasks WHERE task_date = ?1 AND skill = ?2 AND level IS ?3",
        DailyTask::COLUMNS
    );
    Ok(conn
        .query_row(
            &sql,
            params![task_date.format("%Y-%m-%d").to_string(), skill, level],
            DailyTask::from_row,
        )
        .optional()?)
}

// ============================================================================
// SUBMISSION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySubmission {
    pub id: String,
    pub child_id: String,
    pub daily_task_id: String,
    /// Monotonic false → true
    pub is_completed: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    pub rp_earned: i64,
    pub created_at: DateTime<Utc>,
}

impl DailySubmission {
    pub(crate) const COLUMNS: &'static str =
        "id, child_id, daily_task_id, is_completed, submitted_at, rp_earned, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DailySubmission {
            id: row.get(0)?,
            child_id: row.get(1)?,
            daily_task_id: row.get(2)?,
            is_completed: row.get(3)?,
            submitted_at: opt_time_col(row, 4)?,
            rp_earned: row.get(5)?,
            created_at: time_col(row, 6)?,
        })
    }
}

pub fn find_submission(
    conn: &Connection,
    child_id: &str,
    daily_task_id: &str,
) -> Result<Option<DailySubmission>> {
    let sql = format!(
        "SELECT {} FROM daily_submissions WHERE child_id = ?1 AND daily_task_id = ?2",
        DailySubmission::COLUMNS
    );
    Ok(conn
        .query_row(&sql, [child_id, daily_task_id], DailySubmission::from_row)
        .optional()?)
}

pub fn submissions_for_task(conn: &Connection, daily_task_id: &str) -> Result<Vec<DailySubmission>> {
    let sql = format!(
        "SELECT {} FROM daily_submissions WHERE daily_task_id = ?1 ORDER BY created_at ASC",
        DailySubmission::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let submissions = stmt
        .query_map([daily_task_id], DailySubmission::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(submissions)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySubmissionArtifact {
    pub id: String,
    pub daily_submission_id: String,
    pub skill: Skill,
    pub text_body: Option<String>,
    pub file_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DailySubmissionArtifact {
    pub(crate) const COLUMNS: &'static str =
        "id, daily_submission_id, skill, text_body, file_id, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DailySubmissionArtifact {
            id: row.get(0)?,
            daily_submission_id: row.get(1)?,
            skill: row.get(2)?,
            text_body: row.get(3)?,
            file_id: row.get(4)?,
            created_at: time_col(row, 5)?,
        })
    }

    pub fn has_blob(&self) -> bool {
        self.file_id.is_some()
    }
}

pub fn artifacts_for_submission(
    conn: &Connection,
    daily_submission_id: &str,
) -> Result<Vec<DailySubmissionArtifact>> {
    let sql = format!(
        "SELECT {} FROM daily_submission_artifacts WHERE daily_submission_id = ?1
         ORDER BY created_at ASC",
        DailySubmissionArtifact::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let artifacts = stmt
        .query_map([daily_submission_id], DailySubmissionArtifact::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(artifacts)
}

// ============================================================================
// RP LEDGER
// ============================================================================

/// Append-only point credit, at most one per completed submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpEvent {
    pub id: String,
    pub child_id: String,
    pub daily_submission_id: String,
    pub delta: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl RpEvent {
    pub(crate) const COLUMNS: &'static str =
        "id, child_id, daily_submission_id, delta, reason, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RpEvent {
            id: row.get(0)?,
            child_id: row.get(1)?,
            daily_submission_id: row.get(2)?,
            delta: row.get(3)?,
            reason: row.get(4)?,
            created_at: time_col(row, 5)?,
        })
    }
}

pub fn rp_events_for_child(conn: &Connection, child_id: &str) -> Result<Vec<RpEvent>> {
    let sql = format!(
        "SELECT {} FROM rp_events WHERE child_id = ?1 ORDER BY created_at ASC",
        RpEvent::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let events = stmt
        .query_map([child_id], RpEvent::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(events)
}

/// Sum of the child's RP ledger
pub fn rp_balance(conn: &Connection, child_id: &str) -> Result<i64> {
    let balance: i64 = conn.query_row(
        "SELECT COALESCE(SUM(delta), 0) FROM rp_events WHERE child_id = ?1",
        [child_id],
        |row| row.get(0),
    )?;
    Ok(balance)
}
