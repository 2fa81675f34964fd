// 📚 Content items - admin-authored instructional material
//
// Assessment defaults are the fixed material shown during the initial
// assessment; everything else is day-to-day content linked to daily tasks.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::AdminActor;
use crate::db::{new_id, time_col, to_db_time};
use crate::entities::child::Level;
use crate::error::{PipelineError, Result};

// ============================================================================
// SKILL & CONTENT TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Skill {
    Reading,
    Listening,
    Writing,
    Speaking,
}

text_enum!(Skill, "skill", {
    Reading => "reading",
    Listening => "listening",
    Writing => "writing",
    Speaking => "speaking",
});

impl Skill {
    /// Reading and speaking work is a recording; listening and writing work is text
    pub fn requires_audio(&self) -> bool {
        matches!(self, Skill::Reading | Skill::Speaking)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    PdfDocument,
    PassageText,
    PassageAudio,
    WritingPrompt,
    SpeakingPrompt,
    Video,
}

text_enum!(ContentType, "content type", {
    PdfDocument => "pdf_document",
    PassageText => "passage_text",
    PassageAudio => "passage_audio",
    WritingPrompt => "writing_prompt",
    SpeakingPrompt => "speaking_prompt",
    Video => "video",
});

// ============================================================================
// CONTENT ITEM
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub skill: Skill,
    pub content_type: ContentType,
    pub level: Option<Level>,
    pub text_body: Option<String>,
    pub asset_url: Option<String>,
    pub mime_type: Option<String>,
    pub is_assessment_default: bool,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ContentItem {
    pub(crate) const COLUMNS: &'static str = "id, title, description, skill, content_type, level, \
         text_body, asset_url, mime_type, is_assessment_default, created_by, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ContentItem {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            skill: row.get(3)?,
            content_type: row.get(4)?,
            level: row.get(5)?,
            text_body: row.get(6)?,
            asset_url: row.get(7)?,
            mime_type: row.get(8)?,
            is_assessment_default: row.get(9)?,
            created_by: row.get(10)?,
            created_at: time_col(row, 11)?,
        })
    }
}

/// Input for authoring a content item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewContentItem {
    pub title: String,
    pub description: Option<String>,
    pub skill: Skill,
    pub content_type: ContentType,
    pub level: Option<Level>,
    pub text_body: Option<String>,
    pub asset_url: Option<String>,
    pub mime_type: Option<String>,
    #[serde(default)]
    pub is_assessment_default: bool,
}

fn insert_content_item(
    conn: &Connection,
    item: &NewContentItem,
    created_by: Option<&str>,
) -> Result<ContentItem> {
    let title = item.title.trim();
    if title.is_empty() {
        return Err(PipelineError::validation("Title is required"));
    }
    if item.text_body.is_none() && item.asset_url.is_none() {
        return Err(PipelineError::validation(
            "Content needs a text body or an asset url",
        ));
    }

    let id = new_id();
    let now = Utc::now();
    conn.execute(
        "INSERT INTO content_items (
            id, title, description, skill, content_type, level,
            text_body, asset_url, mime_type, is_assessment_default, created_by, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            id,
            title,
            item.description,
            item.skill,
            item.content_type,
            item.level,
            item.text_body,
            item.asset_url,
            item.mime_type,
            item.is_assessment_default,
            created_by,
            to_db_time(&now),
        ],
    )?;

    require_content_item(conn, &id)
}

/// Author a new content item on behalf of a verified admin
pub fn create_content_item(
    conn: &Connection,
    admin: &AdminActor,
    item: &NewContentItem,
) -> Result<ContentItem> {
    let created = insert_content_item(conn, item, Some(&admin.admin_id))?;
    info!(
        content_id = %created.id,
        skill = %created.skill,
        actor = %admin.admin_id,
        "content item created"
    );
    Ok(created)
}

pub fn get_content_item(conn: &Connection, id: &str) -> Result<Option<ContentItem>> {
    let sql = format!("SELECT {} FROM content_items WHERE id = ?1", ContentItem::COLUMNS);
    Ok(conn.query_row(&sql, [id], ContentItem::from_row).optional()?)
}

pub fn require_content_item(conn: &Connection, id: &str) -> Result<ContentItem> {
    get_content_item(conn, id)?.ok_or_else(|| PipelineError::not_found("Content item"))
}

/// The fixed material shown during the initial assessment
pub fn list_assessment_defaults(conn: &Connection) -> Result<Vec<ContentItem>> {
    let sql = format!(
        "SELECT {} FROM content_items
         WHERE is_assessment_default = 1
         ORDER BY skill ASC, created_at ASC",
        ContentItem::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map([], ContentItem::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

/// Day-to-day content, optionally restricted to one level
pub fn list_daily_content(conn: &Connection, level: Option<Level>) -> Result<Vec<ContentItem>> {
    let sql = format!(
        "SELECT {} FROM content_items
         WHERE is_assessment_default = 0 AND (?1 IS NULL OR level = ?1)
         ORDER BY skill ASC, created_at DESC",
        ContentItem::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params![level], ContentItem::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

/// Content linked to a daily task, in the order the admin supplied it
pub fn content_for_task(conn: &Connection, daily_task_id: &str) -> Result<Vec<ContentItem>> {
    let columns = ContentItem::COLUMNS
        .split(", ")
        .map(|c| format!("c.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {} FROM daily_task_content l
         JOIN content_items c ON c.id = l.content_item_id
         WHERE l.daily_task_id = ?1
         ORDER BY l.position ASC",
        columns
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map([daily_task_id], ContentItem::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

/// The four initial-assessment items every deployment starts with
pub fn default_assessment_content() -> Vec<NewContentItem> {
    vec![
        NewContentItem {
            title: "Initial Reading Passage (PDF)".to_string(),
            description: None,
            skill: Skill::Reading,
            content_type: ContentType::PdfDocument,
            level: None,
            text_body: None,
            asset_url: Some("/assessment/reading.pdf".to_string()),
            mime_type: Some("application/pdf".to_string()),
            is_assessment_default: true,
        },
        NewContentItem {
            title: "Initial Listening Audio".to_string(),
            description: None,
            skill: Skill::Listening,
            content_type: ContentType::PassageAudio,
            level: None,
            text_body: None,
            asset_url: Some("/assessment/listening.mp3".to_string()),
            mime_type: Some("audio/mpeg".to_string()),
            is_assessment_default: true,
        },
        NewContentItem {
            title: "Initial Writing Prompt".to_string(),
            description: None,
            skill: Skill::Writing,
            content_type: ContentType::WritingPrompt,
            level: None,
            text_body: Some("Write 5-8 sentences about your favorite hobby.".to_string()),
            asset_url: None,
            mime_type: None,
            is_assessment_default: true,
        },
        NewContentItem {
            title: "Initial Speaking Prompt".to_string(),
            description: None,
            skill: Skill::Speaking,
            content_type: ContentType::SpeakingPrompt,
            level: None,
            text_body: Some(
                "Speak for 60 seconds: introduce yourself and your school.".to_string(),
            ),
            asset_url: None,
            mime_type: None,
            is_assessment_default: true,
        },
    ]
}

/// Insert the default assessment items that are not present yet (matched by title)
pub fn seed_assessment_defaults(conn: &Connection) -> Result<usize> {
    let mut inserted = 0;
    for item in default_assessment_content() {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM content_items WHERE title = ?1 AND is_assessment_default = 1)",
            [&item.title],
            |row| row.get(0),
        )?;
        if !exists {
            insert_content_item(conn, &item, None)?;
            inserted += 1;
        }
    }
    info!(inserted, "assessment defaults seeded");
    Ok(inserted)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn admin() -> AdminActor {
        AdminActor {
            admin_id: "admin-1".to_string(),
            email: "admin@local.test".to_string(),
        }
    }

    fn passage(level: Option<Level>) -> NewContentItem {
        NewContentItem {
            title: "Short passage".to_string(),
            description: None,
            skill: Skill::Reading,
            content_type: ContentType::PassageText,
            level,
            text_body: Some("The cat sat.".to_string()),
            asset_url: None,
            mime_type: None,
            is_assessment_default: false,
        }
    }

    #[test]
    fn test_seed_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        assert_eq!(seed_assessment_defaults(&conn).unwrap(), 4);
        assert_eq!(seed_assessment_defaults(&conn).unwrap(), 0);
        assert_eq!(list_assessment_defaults(&conn).unwrap().len(), 4);
    }

    #[test]
    fn test_daily_content_excludes_assessment_defaults() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        seed_assessment_defaults(&conn).unwrap();

        create_content_item(&conn, &admin(), &passage(Some(Level::Functional))).unwrap();
        create_content_item(&conn, &admin(), &passage(Some(Level::Advanced))).unwrap();

        assert_eq!(list_daily_content(&conn, None).unwrap().len(), 2);
        let functional = list_daily_content(&conn, Some(Level::Functional)).unwrap();
        assert_eq!(functional.len(), 1);
        assert_eq!(functional[0].level, Some(Level::Functional));
    }

    #[test]
    fn test_content_requires_title_and_body() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let mut item = passage(None);
        item.title = "   ".to_string();
        assert!(create_content_item(&conn, &admin(), &item).is_err());

        let mut item = passage(None);
        item.text_body = None;
        assert!(create_content_item(&conn, &admin(), &item).is_err());
    }

    #[test]
    fn test_audio_skills() {
        assert!(Skill::Reading.requires_audio());
        assert!(Skill::Speaking.requires_audio());
        assert!(!Skill::Listening.requires_audio());
        assert!(!Skill::Writing.requires_audio());
    }
}
