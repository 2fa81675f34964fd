// 📝 Assessment - the one-per-child initial evaluation that gates leveling

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::db::{opt_time_col, time_col};
use crate::entities::child::Level;
use crate::entities::content::Skill;
use crate::error::{PipelineError, Result};

/// The only assessment kind the pipeline creates; unique per child
pub const ASSESSMENT_KIND_INITIAL: &str = "initial";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub id: String,
    pub child_id: String,
    pub kind: String,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    /// Write-once
    pub assigned_level: Option<Level>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Assessment {
    pub(crate) const COLUMNS: &'static str = "id, child_id, kind, started_at, submitted_at, \
         assigned_level, reviewed_by, reviewed_at, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Assessment {
            id: row.get(0)?,
            child_id: row.get(1)?,
            kind: row.get(2)?,
            started_at: opt_time_col(row, 3)?,
            submitted_at: opt_time_col(row, 4)?,
            assigned_level: row.get(5)?,
            reviewed_by: row.get(6)?,
            reviewed_at: opt_time_col(row, 7)?,
            created_at: time_col(row, 8)?,
        })
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted_at.is_some()
    }

    pub fn is_leveled(&self) -> bool {
        self.assigned_level.is_some()
    }
}

/// A student work item for one skill: inline text or a blob reference, never both
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentArtifact {
    pub id: String,
    pub assessment_id: String,
    pub skill: Skill,
    pub text_body: Option<String>,
    pub file_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AssessmentArtifact {
    pub(crate) const COLUMNS: &'static str =
        "id, assessment_id, skill, text_body, file_id, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(AssessmentArtifact {
            id: row.get(0)?,
            assessment_id: row.get(1)?,
            skill: row.get(2)?,
            text_body: row.get(3)?,
            file_id: row.get(4)?,
            created_at: time_col(row, 5)?,
        })
    }
}

pub fn get_assessment(conn: &Connection, id: &str) -> Result<Option<Assessment>> {
    let sql = format!("SELECT {} FROM assessments WHERE id = ?1", Assessment::COLUMNS);
    Ok(conn.query_row(&sql, [id], Assessment::from_row).optional()?)
}

pub fn require_assessment(conn: &Connection, id: &str) -> Result<Assessment> {
    get_assessment(conn, id)?.ok_or_else(|| PipelineError::not_found("Assessment"))
}

pub fn initial_assessment_for_child(conn: &Connection, child_id: &str) -> Result<Option<Assessment>> {
    let sql = format!(
        "SELECT {} FROM assessments WHERE child_id = ?1 AND kind = ?2",
        Assessment::COLUMNS
    );
    Ok(conn
        .query_row(&sql, [child_id, ASSESSMENT_KIND_INITIAL], Assessment::from_row)
        .optional()?)
}

pub fn artifacts_for_assessment(
    conn: &Connection,
    assessment_id: &str,
) -> Result<Vec<AssessmentArtifact>> {
    let sql = format!(
        "SELECT {} FROM assessment_artifacts WHERE assessment_id = ?1
         ORDER BY skill ASC, created_at ASC",
        AssessmentArtifact::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let artifacts = stmt
        .query_map([assessment_id], AssessmentArtifact::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(artifacts)
}
