// 🧒 Child & Parent - the central aggregate of the pipeline
//
// Child.status is the lifecycle state machine:
//
//   pending_payment ──approve──▶ approved_pending_login ──credentials──▶ assessment_required ──level──▶ active
//          │
//          └──reject──▶ rejected
//
// rejected and active have no further forward transition.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::db::{opt_time_col, time_col};
use crate::error::{PipelineError, Result};

// ============================================================================
// STATUS & LEVEL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildStatus {
    PendingPayment,
    ApprovedPendingLogin,
    AssessmentRequired,
    Active,
    Rejected,
}

text_enum!(ChildStatus, "status", {
    PendingPayment => "pending_payment",
    ApprovedPendingLogin => "approved_pending_login",
    AssessmentRequired => "assessment_required",
    Active => "active",
    Rejected => "rejected",
});

impl ChildStatus {
    /// No transition defined here leaves these states
    pub fn is_final(&self) -> bool {
        matches!(self, ChildStatus::Active | ChildStatus::Rejected)
    }
}

/// Literacy tier, ordered foundational < functional < transitional < advanced
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Foundational,
    Functional,
    Transitional,
    Advanced,
}

text_enum!(Level, "level", {
    Foundational => "foundational",
    Functional => "functional",
    Transitional => "transitional",
    Advanced => "advanced",
});

// ============================================================================
// PARENT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parent {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    /// Normalized (trimmed, lowercase)
    pub email: String,
    pub phone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Parent {
    pub(crate) const COLUMNS: &'static str =
        "id, first_name, last_name, email, phone, created_at, updated_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Parent {
            id: row.get(0)?,
            first_name: row.get(1)?,
            last_name: row.get(2)?,
            email: row.get(3)?,
            phone: row.get(4)?,
            created_at: time_col(row, 5)?,
            updated_at: time_col(row, 6)?,
        })
    }
}

pub fn get_parent(conn: &Connection, id: &str) -> Result<Option<Parent>> {
    let sql = format!("SELECT {} FROM parents WHERE id = ?1", Parent::COLUMNS);
    Ok(conn.query_row(&sql, [id], Parent::from_row).optional()?)
}

// ============================================================================
// CHILD
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Child {
    pub id: String,
    pub parent_id: String,
    pub first_name: String,
    pub last_name: String,
    pub grade: i64,
    pub status: ChildStatus,
    pub level: Option<Level>,
    pub username: Option<String>,
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub credentials_created_at: Option<DateTime<Utc>>,
    pub credentials_created_by: Option<String>,
    pub level_assigned_at: Option<DateTime<Utc>>,
    pub level_assigned_by: Option<String>,
    pub last_daily_submission_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Child {
    pub(crate) const COLUMNS: &'static str = "id, parent_id, first_name, last_name, grade, status, level, \
         username, password_hash, credentials_created_at, credentials_created_by, \
         level_assigned_at, level_assigned_by, last_daily_submission_at, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Child {
            id: row.get(0)?,
            parent_id: row.get(1)?,
            first_name: row.get(2)?,
            last_name: row.get(3)?,
            grade: row.get(4)?,
            status: row.get(5)?,
            level: row.get(6)?,
            username: row.get(7)?,
            password_hash: row.get(8)?,
            credentials_created_at: opt_time_col(row, 9)?,
            credentials_created_by: row.get(10)?,
            level_assigned_at: opt_time_col(row, 11)?,
            level_assigned_by: row.get(12)?,
            last_daily_submission_at: opt_time_col(row, 13)?,
            created_at: time_col(row, 14)?,
        })
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

pub fn get_child(conn: &Connection, id: &str) -> Result<Option<Child>> {
    let sql = format!("SELECT {} FROM children WHERE id = ?1", Child::COLUMNS);
    Ok(conn.query_row(&sql, [id], Child::from_row).optional()?)
}

/// Load a child or fail with NotFound
pub fn require_child(conn: &Connection, id: &str) -> Result<Child> {
    get_child(conn, id)?.ok_or_else(|| PipelineError::not_found("Child"))
}

pub fn find_child_by_username(conn: &Connection, username: &str) -> Result<Option<Child>> {
    let sql = format!("SELECT {} FROM children WHERE username = ?1", Child::COLUMNS);
    Ok(conn.query_row(&sql, [username], Child::from_row).optional()?)
}

/// Children in a given status, oldest registration first
pub fn children_with_status(conn: &Connection, status: ChildStatus) -> Result<Vec<Child>> {
    let sql = format!(
        "SELECT {} FROM children WHERE status = ?1 ORDER BY created_at ASC",
        Child::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let children = stmt
        .query_map(params![status], Child::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(children)
}

/// Active children eligible for a task scoped to `level` (None = every level)
pub fn active_children_for_level(conn: &Connection, level: Option<Level>) -> Result<Vec<Child>> {
    let sql = format!(
        "SELECT {} FROM children
         WHERE status = 'active' AND (?1 IS NULL OR level = ?1)
         ORDER BY first_name ASC, last_name ASC",
        Child::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let children = stmt
        .query_map(params![level], Child::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(children)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text_round_trip() {
        for status in ChildStatus::ALL {
            let parsed: ChildStatus = status.as_str().parse().unwrap();
            assert_eq!(&parsed, status);
        }
        assert!("pending_level_review".parse::<ChildStatus>().is_err());
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Foundational < Level::Functional);
        assert!(Level::Functional < Level::Transitional);
        assert!(Level::Transitional < Level::Advanced);
    }

    #[test]
    fn test_final_states() {
        assert!(ChildStatus::Active.is_final());
        assert!(ChildStatus::Rejected.is_final());
        assert!(!ChildStatus::AssessmentRequired.is_final());
    }

    #[test]
    fn test_level_serde_uses_snake_case() {
        let json = serde_json::to_string(&Level::Transitional).unwrap();
        assert_eq!(json, "\"transitional\"");
    }
}
