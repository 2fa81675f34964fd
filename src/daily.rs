// 📅 Daily Task Workflow
//
// Admins publish one task per (date, skill, level-or-everyone). Eligible
// students attach work to a draft submission and then submit it; submission
// locks the row, credits RP once and stamps the child's activity time.
//
// All student operations apply the same eligibility rule: an active child,
// and a task that is either for everyone or for the child's level. Any
// violation is reported as NotFound.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audit::{self, AuditAction, AuditTargets};
use crate::auth::{AdminActor, StudentActor};
use crate::blob::{persist_upload, BlobStore, Upload};
use crate::config::Settings;
use crate::db::{expect_one_row, new_id, parse_task_date, to_db_date, to_db_time, write_tx};
use crate::entities::child::{active_children_for_level, get_child, Child, Level};
use crate::entities::content::{content_for_task, list_daily_content, require_content_item, ContentItem, Skill};
use crate::entities::daily::{
    artifacts_for_submission, find_daily_task, find_submission, get_daily_task,
    require_daily_task, submissions_for_task, DailySubmission, DailySubmissionArtifact, DailyTask,
};
use crate::error::{PipelineError, Result};
use crate::guard::{self, Operation};

pub const RP_REASON_DAILY_SUBMISSION: &str = "daily_submission";

// ============================================================================
// ADMIN: AUTHORING
// ============================================================================

/// One task to publish; `level: None` targets every active child
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyTaskDraft {
    pub task_date: NaiveDate,
    pub skill: Skill,
    pub level: Option<Level>,
    /// Order is kept as the display order
    pub content_item_ids: Vec<String>,
}

impl DailyTaskDraft {
    /// Build from an admin-supplied `YYYY-MM-DD` date
    pub fn parse(
        task_date: &str,
        skill: Skill,
        level: Option<Level>,
        content_item_ids: Vec<String>,
    ) -> Result<Self> {
        Ok(DailyTaskDraft {
            task_date: parse_task_date(task_date)?,
            skill,
            level,
            content_item_ids,
        })
    }
}

/// Find-or-create the task by its natural key and overwrite its content links
fn save_task(conn: &Connection, admin: &AdminActor, draft: &DailyTaskDraft) -> Result<DailyTask> {
    let mut seen = HashSet::new();
    let content_ids: Vec<&str> = draft
        .content_item_ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty() && seen.insert(*id))
        .collect();
    for id in &content_ids {
        require_content_item(conn, id)?;
    }

    let now = to_db_time(&Utc::now());
    let created = conn.execute(
        "INSERT OR IGNORE INTO daily_tasks (id, task_date, skill, level, created_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            new_id(),
            to_db_date(&draft.task_date),
            draft.skill,
            draft.level,
            admin.admin_id,
            now
        ],
    )?;
    let task = find_daily_task(conn, draft.task_date, draft.skill, draft.level)?
        .ok_or_else(|| PipelineError::not_found("Task"))?;
    if created == 0 {
        conn.execute(
            "UPDATE daily_tasks SET updated_at = ?1 WHERE id = ?2",
            params![now, task.id],
        )?;
    }

    conn.execute(
        "DELETE FROM daily_task_content WHERE daily_task_id = ?1",
        [&task.id],
    )?;
    for (position, content_id) in content_ids.iter().enumerate() {
        conn.execute(
            "INSERT INTO daily_task_content (daily_task_id, content_item_id, position)
             VALUES (?1, ?2, ?3)",
            params![task.id, content_id, position as i64],
        )?;
    }

    audit::record(
        conn,
        admin,
        AuditAction::DailyTaskSaved,
        AuditTargets::daily_task(&task.id),
        serde_json::json!({
            "task_date": to_db_date(&draft.task_date),
            "skill": draft.skill,
            "level": draft.level,
            "content_item_ids": content_ids,
            "created": created == 1,
        }),
    )?;

    info!(
        task_id = %task.id,
        date = %draft.task_date,
        skill = %draft.skill,
        level = ?draft.level,
        content_items = content_ids.len(),
        actor = %admin.admin_id,
        "daily task saved"
    );

    require_daily_task(conn, &task.id)
}

pub fn create_or_update_daily_task(
    conn: &mut Connection,
    admin: &AdminActor,
    draft: &DailyTaskDraft,
) -> Result<DailyTask> {
    let tx = write_tx(conn)?;
    let task = save_task(&tx, admin, draft)?;
    tx.commit()?;
    Ok(task)
}

/// Publish several skills for one date and level in a single transaction
pub fn save_daily_plan(
    conn: &mut Connection,
    admin: &AdminActor,
    task_date: NaiveDate,
    level: Option<Level>,
    content_by_skill: &BTreeMap<Skill, Vec<String>>,
) -> Result<Vec<DailyTask>> {
    if content_by_skill.is_empty() {
        return Err(PipelineError::validation("Select at least one skill"));
    }

    let tx = write_tx(conn)?;
    let mut tasks = Vec::with_capacity(content_by_skill.len());
    for (skill, content_item_ids) in content_by_skill {
        let draft = DailyTaskDraft {
            task_date,
            skill: *skill,
            level,
            content_item_ids: content_item_ids.clone(),
        };
        tasks.push(save_task(&tx, admin, &draft)?);
    }
    tx.commit()?;
    Ok(tasks)
}

// ============================================================================
// STUDENT: WORK ON A TASK
// ============================================================================

/// Load the child and task and apply the eligibility rule
fn eligible_task(conn: &Connection, student: &StudentActor, task_id: &str) -> Result<(Child, DailyTask)> {
    let child = get_child(conn, &student.child_id)?
        .ok_or_else(|| PipelineError::Unauthorized("Unknown student".into()))?;
    let task = require_daily_task(conn, task_id)?;
    guard::authorize_child(&child, Operation::DailyTask { task_level: task.level })
        .inspect_err(|_| {
            debug!(child_id = %child.id, task_id, status = %child.status, "task not eligible")
        })?;
    Ok((child, task))
}

/// Reading and speaking only, and only the task's own skill
fn check_audio_skill(task: &DailyTask, skill: Skill) -> Result<()> {
    if !skill.requires_audio() {
        return Err(PipelineError::validation("Audio not allowed for this task."));
    }
    if skill != task.skill {
        return Err(PipelineError::validation("Skill does not match this task."));
    }
    Ok(())
}

fn find_or_create_submission(conn: &Connection, child_id: &str, task_id: &str) -> Result<DailySubmission> {
    conn.execute(
        "INSERT OR IGNORE INTO daily_submissions (id, child_id, daily_task_id, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![new_id(), child_id, task_id, to_db_time(&Utc::now())],
    )?;
    find_submission(conn, child_id, task_id)?.ok_or_else(|| PipelineError::not_found("Submission"))
}

fn already_submitted() -> PipelineError {
    PipelineError::conflict("Already submitted")
}

/// Attach a recording to the child's draft, replacing the skill's previous one
pub fn upload_daily_artifact(
    conn: &mut Connection,
    blobs: &dyn BlobStore,
    student: &StudentActor,
    task_id: &str,
    skill: Skill,
    upload: &Upload,
) -> Result<DailySubmissionArtifact> {
    let tx = write_tx(conn)?;
    let (child, task) = eligible_task(&tx, student, task_id)?;
    check_audio_skill(&task, skill)?;

    let submission = find_or_create_submission(&tx, &child.id, &task.id)?;
    if submission.is_completed {
        return Err(already_submitted());
    }

    let stored = persist_upload(&tx, blobs, upload, Some(&child.id))?;
    tx.execute(
        "DELETE FROM daily_submission_artifacts WHERE daily_submission_id = ?1 AND skill = ?2",
        params![submission.id, skill],
    )?;

    let artifact = DailySubmissionArtifact {
        id: new_id(),
        daily_submission_id: submission.id.clone(),
        skill,
        text_body: None,
        file_id: Some(stored.id),
        created_at: Utc::now(),
    };
    tx.execute(
        "INSERT INTO daily_submission_artifacts (id, daily_submission_id, skill, text_body, file_id, created_at)
         VALUES (?1, ?2, ?3, NULL, ?4, ?5)",
        params![
            artifact.id,
            artifact.daily_submission_id,
            artifact.skill,
            artifact.file_id,
            to_db_time(&artifact.created_at)
        ],
    )?;
    tx.commit()?;

    info!(task_id = %task.id, child_id = %child.id, %skill, "daily recording uploaded");
    Ok(artifact)
}

/// Remove the skill's recording from the draft. Returns false when there
/// was nothing to remove.
pub fn delete_daily_artifact(
    conn: &mut Connection,
    student: &StudentActor,
    task_id: &str,
    skill: Skill,
) -> Result<bool> {
    let tx = write_tx(conn)?;
    let (child, task) = eligible_task(&tx, student, task_id)?;
    check_audio_skill(&task, skill)?;

    let Some(submission) = find_submission(&tx, &child.id, &task.id)? else {
        return Ok(false);
    };
    if submission.is_completed {
        return Err(already_submitted());
    }

    let removed = tx.execute(
        "DELETE FROM daily_submission_artifacts WHERE daily_submission_id = ?1 AND skill = ?2",
        params![submission.id, skill],
    )?;
    tx.commit()?;

    if removed > 0 {
        info!(task_id = %task.id, child_id = %child.id, %skill, "daily recording removed");
    }
    Ok(removed > 0)
}

/// Complete the child's submission for a task.
///
/// Reading/speaking need an uploaded recording; listening/writing need a
/// non-empty text response, which replaces any earlier text. On success the
/// submission is locked and exactly one RP event is appended.
pub fn submit_daily_task(
    conn: &mut Connection,
    settings: &Settings,
    student: &StudentActor,
    task_id: &str,
    text_response: Option<&str>,
) -> Result<DailySubmission> {
    let tx = write_tx(conn)?;
    let (child, task) = eligible_task(&tx, student, task_id)?;

    let submission = find_or_create_submission(&tx, &child.id, &task.id)?;
    if submission.is_completed {
        debug!(task_id, child_id = %child.id, "resubmission refused");
        return Err(already_submitted());
    }

    if task.skill.requires_audio() {
        let has_audio = artifacts_for_submission(&tx, &submission.id)?
            .iter()
            .any(|a| a.skill == task.skill && a.has_blob());
        if !has_audio {
            return Err(PipelineError::validation("Audio is required"));
        }
    } else {
        let text = text_response.map(str::trim).unwrap_or_default();
        if text.is_empty() {
            return Err(PipelineError::validation("Text is required"));
        }
        tx.execute(
            "DELETE FROM daily_submission_artifacts WHERE daily_submission_id = ?1 AND skill = ?2",
            params![submission.id, task.skill],
        )?;
        tx.execute(
            "INSERT INTO daily_submission_artifacts (id, daily_submission_id, skill, text_body, file_id, created_at)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
            params![new_id(), submission.id, task.skill, text, to_db_time(&Utc::now())],
        )?;
    }

    let rp = settings.rp_per_submission;
    lock_submission(&tx, &submission, rp)?;

    let completed = find_submission(&tx, &child.id, &task.id)?
        .ok_or_else(|| PipelineError::not_found("Submission"))?;
    tx.commit()?;

    info!(
        task_id = %task.id,
        child_id = %child.id,
        skill = %task.skill,
        rp_earned = rp,
        "daily task submitted"
    );
    Ok(completed)
}

/// Lock a submission and credit its RP. The lock is the conditional update;
/// zero rows means another submit got there first and nothing is credited.
fn lock_submission(conn: &Connection, submission: &DailySubmission, rp: i64) -> Result<()> {
    let now = to_db_time(&Utc::now());
    let updated = conn.execute(
        "UPDATE daily_submissions SET is_completed = 1, submitted_at = ?1, rp_earned = ?2
         WHERE id = ?3 AND is_completed = 0",
        params![now, rp, submission.id],
    )?;
    expect_one_row(updated, "Already submitted")?;

    conn.execute(
        "INSERT INTO rp_events (id, child_id, daily_submission_id, delta, reason, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![new_id(), submission.child_id, submission.id, rp, RP_REASON_DAILY_SUBMISSION, now],
    )?;
    conn.execute(
        "UPDATE children SET last_daily_submission_at = ?1 WHERE id = ?2",
        params![now, submission.child_id],
    )?;
    Ok(())
}

// ============================================================================
// STUDENT: VIEWS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildTaskSummary {
    pub task: DailyTask,
    pub is_completed: bool,
    pub submitted_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChildTaskListing {
    /// Set when the child may not do daily tasks yet; `tasks` is then empty
    pub blocked: bool,
    pub tasks: Vec<ChildTaskSummary>,
}

/// Tasks the child is eligible for on `date`, with their completion state
pub fn list_tasks_for_child(
    conn: &Connection,
    student: &StudentActor,
    date: NaiveDate,
) -> Result<ChildTaskListing> {
    let child = get_child(conn, &student.child_id)?
        .ok_or_else(|| PipelineError::Unauthorized("Unknown student".into()))?;
    if guard::authorize_child(&child, Operation::ListDailyTasks).is_err() {
        debug!(child_id = %child.id, status = %child.status, "daily listing blocked");
        return Ok(ChildTaskListing {
            blocked: true,
            tasks: Vec::new(),
        });
    }

    let mut stmt = conn.prepare(
        "SELECT t.id FROM daily_tasks t
         WHERE t.task_date = ?1 AND (t.level IS NULL OR t.level = ?2)
         ORDER BY t.created_at ASC",
    )?;
    let task_ids = stmt
        .query_map(params![to_db_date(&date), child.level], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut tasks = Vec::with_capacity(task_ids.len());
    for task_id in task_ids {
        let task = require_daily_task(conn, &task_id)?;
        let submission = find_submission(conn, &child.id, &task.id)?;
        tasks.push(ChildTaskSummary {
            is_completed: submission.as_ref().is_some_and(|s| s.is_completed),
            submitted_at: submission.and_then(|s| s.submitted_at),
            task,
        });
    }

    Ok(ChildTaskListing {
        blocked: false,
        tasks,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetail {
    pub task: DailyTask,
    pub content: Vec<ContentItem>,
    pub submission: Option<DailySubmission>,
    pub artifacts: Vec<DailySubmissionArtifact>,
}

pub fn task_detail_for_child(conn: &Connection, student: &StudentActor, task_id: &str) -> Result<TaskDetail> {
    let (child, task) = eligible_task(conn, student, task_id)?;
    let submission = find_submission(conn, &child.id, &task.id)?;
    let artifacts = match &submission {
        Some(s) => artifacts_for_submission(conn, &s.id)?,
        None => Vec::new(),
    };
    Ok(TaskDetail {
        content: content_for_task(conn, &task.id)?,
        task,
        submission,
        artifacts,
    })
}

// ============================================================================
// ADMIN: VIEWS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskWithContent {
    pub task: DailyTask,
    pub content: Vec<ContentItem>,
}

/// Authoring screen data: the assignable content and the tasks already saved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyPlanView {
    pub content: Vec<ContentItem>,
    pub tasks: Vec<TaskWithContent>,
}

/// Tasks for `date` targeted exactly at `level` (None = the everyone-tasks)
pub fn list_daily_tasks(
    conn: &Connection,
    admin: &AdminActor,
    date: NaiveDate,
    level: Option<Level>,
) -> Result<DailyPlanView> {
    let mut stmt = conn.prepare(
        "SELECT id FROM daily_tasks WHERE task_date = ?1 AND level IS ?2 ORDER BY created_at DESC",
    )?;
    let task_ids = stmt
        .query_map(params![to_db_date(&date), level], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut tasks = Vec::with_capacity(task_ids.len());
    for task_id in task_ids {
        if let Some(task) = get_daily_task(conn, &task_id)? {
            tasks.push(TaskWithContent {
                content: content_for_task(conn, &task.id)?,
                task,
            });
        }
    }

    debug!(actor = %admin.admin_id, %date, ?level, tasks = tasks.len(), "daily plan read");
    Ok(DailyPlanView {
        content: list_daily_content(conn, level)?,
        tasks,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentReview {
    pub child: Child,
    pub submission: Option<DailySubmission>,
    pub artifacts: Vec<DailySubmissionArtifact>,
}

impl StudentReview {
    pub fn state(&self) -> &'static str {
        match &self.submission {
            None => "not_started",
            Some(s) if s.is_completed => "completed",
            Some(_) => "draft",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReview {
    pub task: DailyTask,
    pub content: Vec<ContentItem>,
    /// Every eligible active child, with or without a submission
    pub students: Vec<StudentReview>,
}

pub fn daily_review(conn: &Connection, admin: &AdminActor, date: NaiveDate) -> Result<Vec<TaskReview>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM daily_tasks WHERE task_date = ?1 ORDER BY skill ASC, created_at ASC",
    )?;
    let task_ids = stmt
        .query_map([to_db_date(&date)], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut review = Vec::with_capacity(task_ids.len());
    for task_id in task_ids {
        let task = require_daily_task(conn, &task_id)?;
        let mut by_child: BTreeMap<String, DailySubmission> = submissions_for_task(conn, &task.id)?
            .into_iter()
            .map(|s| (s.child_id.clone(), s))
            .collect();

        let mut students = Vec::new();
        for child in active_children_for_level(conn, task.level)? {
            let submission = by_child.remove(&child.id);
            let artifacts = match &submission {
                Some(s) => artifacts_for_submission(conn, &s.id)?,
                None => Vec::new(),
            };
            students.push(StudentReview {
                child,
                submission,
                artifacts,
            });
        }

        review.push(TaskReview {
            content: content_for_task(conn, &task.id)?,
            task,
            students,
        });
    }
    debug!(actor = %admin.admin_id, %date, tasks = review.len(), "daily review read");
    Ok(review)
}

#[derive(Debug, Serialize)]
struct ReviewRow<'a> {
    task_date: String,
    skill: Skill,
    task_level: Option<Level>,
    child_id: &'a str,
    child_name: String,
    username: Option<&'a str>,
    child_level: Option<Level>,
    state: &'static str,
    submitted_at: Option<String>,
    rp_earned: i64,
    artifacts: usize,
}

/// Write the review roster for `date` as CSV, one row per (task, child).
/// Returns the number of data rows.
pub fn export_daily_review_csv<W: Write>(
    conn: &Connection,
    admin: &AdminActor,
    date: NaiveDate,
    writer: W,
) -> Result<usize> {
    let review = daily_review(conn, admin, date)?;
    let mut wtr = csv::Writer::from_writer(writer);
    let mut rows = 0;

    for task_review in &review {
        for student in &task_review.students {
            wtr.serialize(ReviewRow {
                task_date: to_db_date(&task_review.task.task_date),
                skill: task_review.task.skill,
                task_level: task_review.task.level,
                child_id: &student.child.id,
                child_name: student.child.display_name(),
                username: student.child.username.as_deref(),
                child_level: student.child.level,
                state: student.state(),
                submitted_at: student
                    .submission
                    .as_ref()
                    .and_then(|s| s.submitted_at)
                    .map(|t| to_db_time(&t)),
                rp_earned: student.submission.as_ref().map_or(0, |s| s.rp_earned),
                artifacts: student.artifacts.len(),
            })?;
            rows += 1;
        }
    }

    wtr.flush().map_err(csv::Error::from)?;
    info!(date = %date, rows, "daily review exported");
    Ok(rows)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::entities::child::require_child;
    use crate::entities::content::{create_content_item, ContentType, NewContentItem};
    use crate::entities::daily::{rp_balance, rp_events_for_child};
    use crate::error::ErrorKind;
    use crate::testing::{active_student, admin, fresh_db, student};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn publish(conn: &mut Connection, skill: Skill, level: Option<Level>) -> DailyTask {
        let draft = DailyTaskDraft {
            task_date: today(),
            skill,
            level,
            content_item_ids: Vec::new(),
        };
        create_or_update_daily_task(conn, &admin(), &draft).unwrap()
    }

    fn passage(conn: &Connection, title: &str) -> ContentItem {
        create_content_item(
            conn,
            &admin(),
            &NewContentItem {
                title: title.to_string(),
                description: None,
                skill: Skill::Reading,
                content_type: ContentType::PassageText,
                level: Some(Level::Functional),
                text_body: Some("Once upon a time".to_string()),
                asset_url: None,
                mime_type: None,
                is_assessment_default: false,
            },
        )
        .unwrap()
    }

    fn audio() -> Upload {
        Upload::new(b"OggS-audio".to_vec(), "audio/webm")
    }

    #[test]
    fn test_save_is_idempotent_and_replaces_links() {
        let mut conn = fresh_db();
        let a = passage(&conn, "A");
        let b = passage(&conn, "B");

        let mut draft = DailyTaskDraft::parse(
            "2025-03-14",
            Skill::Reading,
            Some(Level::Functional),
            vec![a.id.clone(), b.id.clone(), a.id.clone()],
        )
        .unwrap();
        let first = create_or_update_daily_task(&mut conn, &admin(), &draft).unwrap();
        assert_eq!(content_for_task(&conn, &first.id).unwrap().len(), 2);

        draft.content_item_ids = vec![b.id.clone()];
        let second = create_or_update_daily_task(&mut conn, &admin(), &draft).unwrap();
        assert_eq!(first.id, second.id);

        let linked = content_for_task(&conn, &second.id).unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].id, b.id);
        assert_eq!(audit::count_entries(&conn, AuditAction::DailyTaskSaved).unwrap(), 2);
    }

    #[test]
    fn test_everyone_task_is_unique_per_key() {
        let mut conn = fresh_db();
        let first = publish(&mut conn, Skill::Writing, None);
        let again = publish(&mut conn, Skill::Writing, None);
        let leveled = publish(&mut conn, Skill::Writing, Some(Level::Advanced));

        assert_eq!(first.id, again.id);
        assert_ne!(first.id, leveled.id);
    }

    #[test]
    fn test_unknown_content_and_bad_date_are_rejected() {
        let mut conn = fresh_db();
        let draft = DailyTaskDraft {
            task_date: today(),
            skill: Skill::Reading,
            level: None,
            content_item_ids: vec!["nope".into()],
        };
        let err = create_or_update_daily_task(&mut conn, &admin(), &draft).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(find_daily_task(&conn, today(), Skill::Reading, None).unwrap().is_none());

        let err = DailyTaskDraft::parse("14/03/2025", Skill::Reading, None, vec![]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_save_daily_plan_requires_a_skill() {
        let mut conn = fresh_db();
        let err = save_daily_plan(&mut conn, &admin(), today(), None, &BTreeMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut plan = BTreeMap::new();
        plan.insert(Skill::Reading, vec![]);
        plan.insert(Skill::Writing, vec![]);
        let tasks = save_daily_plan(&mut conn, &admin(), today(), Some(Level::Foundational), &plan).unwrap();
        assert_eq!(tasks.len(), 2);
    }

    #[test]
    fn test_eligibility_is_not_found() {
        let mut conn = fresh_db();
        let functional = active_student(&mut conn, "func", Level::Functional);
        let pending = student(&mut conn, "pending");
        let advanced_task = publish(&mut conn, Skill::Writing, Some(Level::Advanced));
        let everyone = publish(&mut conn, Skill::Listening, None);

        let err = submit_daily_task(&mut conn, &Settings::default(), &functional, &advanced_task.id, Some("hi"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = task_detail_for_child(&conn, &pending, &everyone.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        assert!(task_detail_for_child(&conn, &functional, &everyone.id).is_ok());
        assert!(find_submission(&conn, &functional.child_id, &advanced_task.id)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_upload_delete_round_trip() {
        let mut conn = fresh_db();
        let blobs = MemoryBlobStore::new();
        let stu = active_student(&mut conn, "stu1", Level::Functional);
        let task = publish(&mut conn, Skill::Reading, Some(Level::Functional));

        // Nothing to delete yet
        assert!(!delete_daily_artifact(&mut conn, &stu, &task.id, Skill::Reading).unwrap());

        upload_daily_artifact(&mut conn, &blobs, &stu, &task.id, Skill::Reading, &audio()).unwrap();
        upload_daily_artifact(&mut conn, &blobs, &stu, &task.id, Skill::Reading, &audio()).unwrap();
        let detail = task_detail_for_child(&conn, &stu, &task.id).unwrap();
        assert_eq!(detail.artifacts.len(), 1);
        assert!(!detail.submission.unwrap().is_completed);

        assert!(delete_daily_artifact(&mut conn, &stu, &task.id, Skill::Reading).unwrap());
        let detail = task_detail_for_child(&conn, &stu, &task.id).unwrap();
        assert!(detail.artifacts.is_empty());
    }

    #[test]
    fn test_upload_skill_restrictions() {
        let mut conn = fresh_db();
        let blobs = MemoryBlobStore::new();
        let stu = active_student(&mut conn, "stu1", Level::Functional);
        let reading = publish(&mut conn, Skill::Reading, None);
        let writing = publish(&mut conn, Skill::Writing, None);

        let err = upload_daily_artifact(&mut conn, &blobs, &stu, &writing.id, Skill::Writing, &audio())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = upload_daily_artifact(&mut conn, &blobs, &stu, &reading.id, Skill::Speaking, &audio())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(blobs.is_empty());
    }

    #[test]
    fn test_audio_task_requires_recording() {
        let mut conn = fresh_db();
        let blobs = MemoryBlobStore::new();
        let settings = Settings::default();
        let stu = active_student(&mut conn, "stu1", Level::Functional);
        let task = publish(&mut conn, Skill::Speaking, None);

        let err = submit_daily_task(&mut conn, &settings, &stu, &task.id, None).unwrap_err();
        assert_eq!(err.message(), "Audio is required");
        // The draft created during the failed attempt was rolled back
        assert!(find_submission(&conn, &stu.child_id, &task.id).unwrap().is_none());

        upload_daily_artifact(&mut conn, &blobs, &stu, &task.id, Skill::Speaking, &audio()).unwrap();
        let done = submit_daily_task(&mut conn, &settings, &stu, &task.id, None).unwrap();
        assert!(done.is_completed);
        assert_eq!(done.rp_earned, 10);
    }

    #[test]
    fn test_text_task_submission_locks_and_credits_once() {
        let mut conn = fresh_db();
        let blobs = MemoryBlobStore::new();
        let settings = Settings::default();
        let stu = active_student(&mut conn, "stu1", Level::Functional);
        let task = publish(&mut conn, Skill::Writing, Some(Level::Functional));

        let err = submit_daily_task(&mut conn, &settings, &stu, &task.id, Some("   ")).unwrap_err();
        assert_eq!(err.message(), "Text is required");

        let done = submit_daily_task(&mut conn, &settings, &stu, &task.id, Some(" My essay ")).unwrap();
        assert!(done.is_completed);
        assert!(done.submitted_at.is_some());

        let artifacts = artifacts_for_submission(&conn, &done.id).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].text_body.as_deref(), Some("My essay"));

        let err = submit_daily_task(&mut conn, &settings, &stu, &task.id, Some("again")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        assert_eq!(rp_events_for_child(&conn, &stu.child_id).unwrap().len(), 1);
        assert_eq!(rp_balance(&conn, &stu.child_id).unwrap(), 10);
        assert!(require_child(&conn, &stu.child_id)
            .unwrap()
            .last_daily_submission_at
            .is_some());

        // Writing tasks don't take recordings at all
        let err = upload_daily_artifact(&mut conn, &blobs, &stu, &task.id, Skill::Writing, &audio())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_completed_submission_refuses_changes() {
        let mut conn = fresh_db();
        let blobs = MemoryBlobStore::new();
        let stu = active_student(&mut conn, "stu1", Level::Functional);
        let task = publish(&mut conn, Skill::Reading, None);

        upload_daily_artifact(&mut conn, &blobs, &stu, &task.id, Skill::Reading, &audio()).unwrap();
        submit_daily_task(&mut conn, &Settings::default(), &stu, &task.id, None).unwrap();

        let err = upload_daily_artifact(&mut conn, &blobs, &stu, &task.id, Skill::Reading, &audio())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let err = delete_daily_artifact(&mut conn, &stu, &task.id, Skill::Reading).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let detail = task_detail_for_child(&conn, &stu, &task.id).unwrap();
        assert_eq!(detail.artifacts.len(), 1);
        assert_eq!(blobs.len(), 1);
    }

    #[test]
    fn test_lock_credits_only_the_first_writer() {
        let mut conn = fresh_db();
        let blobs = MemoryBlobStore::new();
        let stu = active_student(&mut conn, "stu1", Level::Functional);
        let task = publish(&mut conn, Skill::Speaking, None);

        upload_daily_artifact(&mut conn, &blobs, &stu, &task.id, Skill::Speaking, &audio()).unwrap();
        let draft = find_submission(&conn, &stu.child_id, &task.id).unwrap().unwrap();
        assert!(!draft.is_completed);

        submit_daily_task(&mut conn, &Settings::default(), &stu, &task.id, None).unwrap();

        // A second submit holding the same draft snapshot loses at the lock
        let err = lock_submission(&conn, &draft, 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.message(), "Already submitted");
        assert_eq!(rp_events_for_child(&conn, &stu.child_id).unwrap().len(), 1);
        assert_eq!(rp_balance(&conn, &stu.child_id).unwrap(), 10);
    }

    #[test]
    fn test_configured_rp_amount() {
        let mut conn = fresh_db();
        let settings = Settings {
            rp_per_submission: 25,
            ..Settings::default()
        };
        let stu = active_student(&mut conn, "stu1", Level::Advanced);
        let task = publish(&mut conn, Skill::Listening, None);

        submit_daily_task(&mut conn, &settings, &stu, &task.id, Some("answer")).unwrap();
        assert_eq!(rp_balance(&conn, &stu.child_id).unwrap(), 25);
    }

    #[test]
    fn test_child_listing() {
        let mut conn = fresh_db();
        let stu = active_student(&mut conn, "stu1", Level::Functional);
        let waiting = student(&mut conn, "waiting");
        let everyone = publish(&mut conn, Skill::Listening, None);
        publish(&mut conn, Skill::Writing, Some(Level::Functional));
        publish(&mut conn, Skill::Reading, Some(Level::Advanced));

        submit_daily_task(&mut conn, &Settings::default(), &stu, &everyone.id, Some("heard it")).unwrap();

        let listing = list_tasks_for_child(&conn, &stu, today()).unwrap();
        assert!(!listing.blocked);
        assert_eq!(listing.tasks.len(), 2);
        let done = listing.tasks.iter().find(|t| t.task.id == everyone.id).unwrap();
        assert!(done.is_completed);

        let other_day = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();
        assert!(list_tasks_for_child(&conn, &stu, other_day).unwrap().tasks.is_empty());

        let blocked = list_tasks_for_child(&conn, &waiting, today()).unwrap();
        assert!(blocked.blocked);
        assert!(blocked.tasks.is_empty());
    }

    #[test]
    fn test_admin_plan_view_filters_by_exact_level() {
        let mut conn = fresh_db();
        passage(&conn, "Functional passage");
        publish(&mut conn, Skill::Reading, None);
        publish(&mut conn, Skill::Reading, Some(Level::Functional));
        publish(&mut conn, Skill::Writing, Some(Level::Functional));

        let everyone = list_daily_tasks(&conn, &admin(), today(), None).unwrap();
        assert_eq!(everyone.tasks.len(), 1);
        assert_eq!(everyone.content.len(), 1);

        let functional = list_daily_tasks(&conn, &admin(), today(), Some(Level::Functional)).unwrap();
        assert_eq!(functional.tasks.len(), 2);
        assert!(list_daily_tasks(&conn, &admin(), today(), Some(Level::Advanced))
            .unwrap()
            .content
            .is_empty());
    }

    #[test]
    fn test_review_roster_and_csv() {
        let mut conn = fresh_db();
        let settings = Settings::default();
        let ada = active_student(&mut conn, "ada", Level::Functional);
        active_student(&mut conn, "bob", Level::Functional);
        active_student(&mut conn, "cy", Level::Advanced);
        let task = publish(&mut conn, Skill::Writing, Some(Level::Functional));
        publish(&mut conn, Skill::Listening, None);

        submit_daily_task(&mut conn, &settings, &ada, &task.id, Some("essay")).unwrap();

        let review = daily_review(&conn, &admin(), today()).unwrap();
        assert_eq!(review.len(), 2);
        let writing = review.iter().find(|r| r.task.id == task.id).unwrap();
        assert_eq!(writing.students.len(), 2);
        let states: Vec<&str> = writing.students.iter().map(|s| s.state()).collect();
        assert!(states.contains(&"completed"));
        assert!(states.contains(&"not_started"));

        let listening = review.iter().find(|r| r.task.skill == Skill::Listening).unwrap();
        assert_eq!(listening.students.len(), 3);

        let mut out = Vec::new();
        let rows = export_daily_review_csv(&conn, &admin(), today(), &mut out).unwrap();
        assert_eq!(rows, 5);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("task_date,skill,task_level,child_id"));
        assert!(text.contains("2025-03-14,writing,functional"));
        assert_eq!(text.lines().count(), 6);
    }
}
