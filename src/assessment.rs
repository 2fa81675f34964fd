// 📝 Assessment Workflow
//
// One initial assessment per child. The student may upload recordings and
// (re)submit text responses until an admin assigns a level; assigning the
// level is the transition that makes the child active.

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audit::{self, AuditAction, AuditTargets};
use crate::auth::{AdminActor, StudentActor};
use crate::blob::{persist_upload, BlobStore, Upload};
use crate::db::{expect_one_row, new_id, to_db_time, write_tx};
use crate::entities::assessment::{
    artifacts_for_assessment, initial_assessment_for_child, require_assessment, Assessment,
    AssessmentArtifact, ASSESSMENT_KIND_INITIAL,
};
use crate::entities::child::{require_child, Child, ChildStatus, Level};
use crate::entities::content::{list_assessment_defaults, ContentItem, Skill};
use crate::error::{PipelineError, Result};
use crate::guard::{self, Operation};

/// What a student sees when opening the assessment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentSession {
    pub assessment: Assessment,
    pub content: Vec<ContentItem>,
    pub artifacts: Vec<AssessmentArtifact>,
}

/// Free-text answers keyed by skill. Only listening and writing answers are
/// stored; recordings arrive through `upload_assessment_artifact`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssessmentResponses {
    pub text_by_skill: BTreeMap<Skill, String>,
}

impl AssessmentResponses {
    pub fn with(mut self, skill: Skill, text: impl Into<String>) -> Self {
        self.text_by_skill.insert(skill, text.into());
        self
    }
}

/// Student-owned assessment, or NotFound so ids of other children stay opaque
fn owned_assessment(conn: &Connection, student: &StudentActor, assessment_id: &str) -> Result<Assessment> {
    let assessment = require_assessment(conn, assessment_id)?;
    if assessment.child_id != student.child_id {
        debug!(assessment_id, child_id = %student.child_id, "assessment owned by another child");
        return Err(PipelineError::not_found("Assessment"));
    }
    if assessment.kind != ASSESSMENT_KIND_INITIAL {
        return Err(PipelineError::validation("Invalid assessment kind"));
    }
    Ok(assessment)
}

fn student_child(conn: &Connection, student: &StudentActor) -> Result<Child> {
    let child = require_child(conn, &student.child_id)?;
    guard::authorize_child(&child, Operation::Assessment)
        .inspect_err(|e| debug!(child_id = %child.id, error = %e, "assessment refused"))?;
    Ok(child)
}

// ============================================================================
// STUDENT SIDE
// ============================================================================

/// Fetch the child's initial assessment, creating it on first visit.
/// `started_at` is stamped once, at creation.
pub fn get_or_start_assessment(conn: &mut Connection, student: &StudentActor) -> Result<AssessmentSession> {
    let tx = write_tx(conn)?;
    let child = student_child(&tx, student)?;
    let now = to_db_time(&Utc::now());
    let created = tx.execute(
        "INSERT OR IGNORE INTO assessments (id, child_id, kind, started_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![new_id(), child.id, ASSESSMENT_KIND_INITIAL, now],
    )?;
    let assessment = initial_assessment_for_child(&tx, &child.id)?
        .ok_or_else(|| PipelineError::not_found("Assessment"))?;
    tx.commit()?;

    if created == 1 {
        info!(assessment_id = %assessment.id, child_id = %child.id, "assessment started");
    }

    Ok(AssessmentSession {
        content: list_assessment_defaults(conn)?,
        artifacts: artifacts_for_assessment(conn, &assessment.id)?,
        assessment,
    })
}

/// Store a recording for one skill, replacing whatever that skill had
pub fn upload_assessment_artifact(
    conn: &mut Connection,
    blobs: &dyn BlobStore,
    student: &StudentActor,
    assessment_id: &str,
    skill: Skill,
    upload: &Upload,
) -> Result<AssessmentArtifact> {
    let tx = write_tx(conn)?;
    let child = student_child(&tx, student)?;
    let assessment = owned_assessment(&tx, student, assessment_id)?;
    if assessment.is_submitted() {
        return Err(PipelineError::conflict("Assessment already submitted"));
    }

    let stored = persist_upload(&tx, blobs, upload, Some(&child.id))?;
    tx.execute(
        "DELETE FROM assessment_artifacts WHERE assessment_id = ?1 AND skill = ?2",
        params![assessment.id, skill],
    )?;

    let artifact = AssessmentArtifact {
        id: new_id(),
        assessment_id: assessment.id.clone(),
        skill,
        text_body: None,
        file_id: Some(stored.id),
        created_at: Utc::now(),
    };
    tx.execute(
        "INSERT INTO assessment_artifacts (id, assessment_id, skill, text_body, file_id, created_at)
         VALUES (?1, ?2, ?3, NULL, ?4, ?5)",
        params![
            artifact.id,
            artifact.assessment_id,
            artifact.skill,
            artifact.file_id,
            to_db_time(&artifact.created_at)
        ],
    )?;
    tx.commit()?;

    info!(assessment_id = %assessment.id, %skill, child_id = %child.id, "assessment artifact uploaded");
    Ok(artifact)
}

/// Record text answers and mark the assessment submitted.
///
/// Repeatable until a level is assigned. Previous text artifacts are
/// replaced; uploaded recordings are kept. The child's status is untouched.
pub fn submit_assessment(
    conn: &mut Connection,
    student: &StudentActor,
    assessment_id: &str,
    responses: &AssessmentResponses,
) -> Result<Assessment> {
    let tx = write_tx(conn)?;
    let child = student_child(&tx, student)?;
    let assessment = owned_assessment(&tx, student, assessment_id)?;
    if assessment.is_leveled() {
        return Err(PipelineError::conflict("Level already assigned"));
    }

    tx.execute(
        "DELETE FROM assessment_artifacts WHERE assessment_id = ?1 AND file_id IS NULL",
        [&assessment.id],
    )?;

    let now = to_db_time(&Utc::now());
    let mut stored = 0;
    for skill in [Skill::Listening, Skill::Writing] {
        let text = responses
            .text_by_skill
            .get(&skill)
            .map(|t| t.trim())
            .unwrap_or_default();
        if text.is_empty() {
            continue;
        }
        tx.execute(
            "INSERT INTO assessment_artifacts (id, assessment_id, skill, text_body, file_id, created_at)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
            params![new_id(), assessment.id, skill, text, now],
        )?;
        stored += 1;
    }

    let updated = tx.execute(
        "UPDATE assessments SET submitted_at = ?1 WHERE id = ?2 AND assigned_level IS NULL",
        params![now, assessment.id],
    )?;
    expect_one_row(updated, "Level already assigned")?;

    let submitted = require_assessment(&tx, &assessment.id)?;
    tx.commit()?;

    info!(
        assessment_id = %submitted.id,
        child_id = %child.id,
        text_responses = stored,
        "assessment submitted"
    );
    Ok(submitted)
}

// ============================================================================
// ADMIN SIDE
// ============================================================================

/// Set the level once and activate the child, atomically with the audit entry
pub fn assign_level(
    conn: &mut Connection,
    admin: &AdminActor,
    assessment_id: &str,
    level: Level,
) -> Result<Assessment> {
    let tx = write_tx(conn)?;

    let assessment = require_assessment(&tx, assessment_id)?;
    if !assessment.is_submitted() {
        return Err(PipelineError::conflict("Assessment not submitted yet"));
    }
    if assessment.is_leveled() {
        return Err(PipelineError::conflict("Level already assigned"));
    }
    let child = require_child(&tx, &assessment.child_id)?;
    guard::authorize_child(&child, Operation::AssignLevel)
        .inspect_err(|e| debug!(assessment_id, error = %e, "level assignment refused"))?;

    store_level(&tx, admin, &assessment.id, &child.id, level)?;

    audit::record(
        &tx,
        admin,
        AuditAction::LevelAssigned,
        AuditTargets::child(&child.id).with_assessment(&assessment.id),
        serde_json::json!({ "level": level }),
    )?;

    let leveled = require_assessment(&tx, &assessment.id)?;
    tx.commit()?;

    info!(
        assessment_id = %leveled.id,
        child_id = %child.id,
        %level,
        actor = %admin.admin_id,
        "level assigned"
    );
    Ok(leveled)
}

/// The write-once step of `assign_level`: both rows move only while the level
/// is still unset, so a second writer gets a Conflict instead of a new level
fn store_level(
    conn: &Connection,
    admin: &AdminActor,
    assessment_id: &str,
    child_id: &str,
    level: Level,
) -> Result<()> {
    let now = to_db_time(&Utc::now());
    let updated = conn.execute(
        "UPDATE assessments SET assigned_level = ?1, reviewed_by = ?2, reviewed_at = ?3
         WHERE id = ?4 AND assigned_level IS NULL AND submitted_at IS NOT NULL",
        params![level, admin.admin_id, now, assessment_id],
    )?;
    expect_one_row(updated, "Level already assigned")?;

    let updated = conn.execute(
        "UPDATE children SET level = ?1, status = ?2, level_assigned_at = ?3, level_assigned_by = ?4
         WHERE id = ?5 AND status = 'assessment_required'",
        params![level, ChildStatus::Active, now, admin.admin_id, child_id],
    )?;
    expect_one_row(updated, "Level already assigned")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentReviewItem {
    pub assessment: Assessment,
    pub child_name: String,
    pub grade: i64,
    pub parent_email: String,
}

/// Submitted assessments still waiting for a level, newest submission first
pub fn list_assessments_for_review(
    conn: &Connection,
    admin: &AdminActor,
) -> Result<Vec<AssessmentReviewItem>> {
    let columns = Assessment::COLUMNS
        .split(',')
        .map(|c| format!("a.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {}, c.first_name || ' ' || c.last_name, c.grade, p.email
         FROM assessments a
         JOIN children c ON c.id = a.child_id
         JOIN parents p ON p.id = c.parent_id
         WHERE a.kind = ?1 AND a.submitted_at IS NOT NULL AND a.assigned_level IS NULL
         ORDER BY a.submitted_at DESC",
        columns
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map([ASSESSMENT_KIND_INITIAL], |row| {
            Ok(AssessmentReviewItem {
                assessment: Assessment::from_row(row)?,
                child_name: row.get(9)?,
                grade: row.get(10)?,
                parent_email: row.get(11)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    debug!(actor = %admin.admin_id, pending = items.len(), "assessment review queue read");
    Ok(items)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentDetail {
    pub assessment: Assessment,
    pub child: Child,
    pub artifacts: Vec<AssessmentArtifact>,
}

pub fn assessment_detail(
    conn: &Connection,
    admin: &AdminActor,
    assessment_id: &str,
) -> Result<AssessmentDetail> {
    let assessment = require_assessment(conn, assessment_id)?;
    debug!(assessment_id, actor = %admin.admin_id, "assessment detail read");
    let child = require_child(conn, &assessment.child_id)?;
    let artifacts = artifacts_for_assessment(conn, &assessment.id)?;
    Ok(AssessmentDetail {
        assessment,
        child,
        artifacts,
    })
}

// ============================================================================
// TESTS
// ============================================================================
