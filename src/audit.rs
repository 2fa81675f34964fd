// 🧾 Audit Log - append-only record of privileged admin actions
//
// Written inside the same transaction as the transition it records; never
// consulted for authorization. The table carries UPDATE/DELETE triggers that
// abort, so entries cannot be rewritten after the fact.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::auth::AdminActor;
use crate::db::{new_id, time_col, to_db_time};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    PaymentApproved,
    PaymentRejected,
    CredentialsCreated,
    LevelAssigned,
    DailyTaskSaved,
}

text_enum!(AuditAction, "audit action", {
    PaymentApproved => "PAYMENT_APPROVED",
    PaymentRejected => "PAYMENT_REJECTED",
    CredentialsCreated => "CREDENTIALS_CREATED",
    LevelAssigned => "LEVEL_ASSIGNED",
    DailyTaskSaved => "DAILY_TASK_SAVED",
});

/// Entities an action touched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTargets {
    pub child_id: Option<String>,
    pub payment_id: Option<String>,
    pub assessment_id: Option<String>,
    pub daily_task_id: Option<String>,
}

impl AuditTargets {
    pub fn child(child_id: &str) -> Self {
        AuditTargets {
            child_id: Some(child_id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_payment(mut self, payment_id: &str) -> Self {
        self.payment_id = Some(payment_id.to_string());
        self
    }

    pub fn with_assessment(mut self, assessment_id: &str) -> Self {
        self.assessment_id = Some(assessment_id.to_string());
        self
    }

    pub fn daily_task(daily_task_id: &str) -> Self {
        AuditTargets {
            daily_task_id: Some(daily_task_id.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Verified actor, never a looked-up stand-in
    pub admin_id: String,
    pub action: AuditAction,
    pub targets: AuditTargets,
    pub metadata: serde_json::Value,
}

impl AuditLogEntry {
    pub fn new(
        admin: &AdminActor,
        action: AuditAction,
        targets: AuditTargets,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: new_id(),
            timestamp: Utc::now(),
            admin_id: admin.admin_id.clone(),
            action,
            targets,
            metadata,
        }
    }

    const COLUMNS: &'static str = "id, timestamp, admin_id, action, target_child_id, \
         target_payment_id, target_assessment_id, target_daily_task_id, metadata";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let metadata_json: String = row.get(8)?;
        Ok(AuditLogEntry {
            id: row.get(0)?,
            timestamp: time_col(row, 1)?,
            admin_id: row.get(2)?,
            action: row.get(3)?,
            targets: AuditTargets {
                child_id: row.get(4)?,
                payment_id: row.get(5)?,
                assessment_id: row.get(6)?,
                daily_task_id: row.get(7)?,
            },
            metadata: serde_json::from_str(&metadata_json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
            })?,
        })
    }
}

/// Append an entry; pass the open write transaction so it commits with the change
pub fn append(conn: &Connection, entry: &AuditLogEntry) -> Result<()> {
    let metadata_json = serde_json::to_string(&entry.metadata)?;

    conn.execute(
        "INSERT INTO audit_log (
            id, timestamp, admin_id, action, target_child_id,
            target_payment_id, target_assessment_id, target_daily_task_id, metadata
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            entry.id,
            to_db_time(&entry.timestamp),
            entry.admin_id,
            entry.action,
            entry.targets.child_id,
            entry.targets.payment_id,
            entry.targets.assessment_id,
            entry.targets.daily_task_id,
            metadata_json,
        ],
    )?;

    Ok(())
}

/// Convenience wrapper: build and append in one call
pub(crate) fn record(
    conn: &Connection,
    admin: &AdminActor,
    action: AuditAction,
    targets: AuditTargets,
    metadata: serde_json::Value,
) -> Result<AuditLogEntry> {
    let entry = AuditLogEntry::new(admin, action, targets, metadata);
    append(conn, &entry)?;
    Ok(entry)
}

/// Entries touching a child, newest first
pub fn entries_for_child(conn: &Connection, child_id: &str) -> Result<Vec<AuditLogEntry>> {
    let sql = format!(
        "SELECT {} FROM audit_log WHERE target_child_id = ?1 ORDER BY timestamp DESC",
        AuditLogEntry::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map([child_id], AuditLogEntry::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

/// Most recent entries across all targets
pub fn recent_entries(conn: &Connection, limit: usize) -> Result<Vec<AuditLogEntry>> {
    let sql = format!(
        "SELECT {} FROM audit_log ORDER BY timestamp DESC LIMIT ?1",
        AuditLogEntry::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map([limit as i64], AuditLogEntry::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

pub fn count_entries(conn: &Connection, action: AuditAction) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM audit_log WHERE action = ?1",
        params![action],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn admin() -> AdminActor {
        AdminActor {
            admin_id: "admin-7".into(),
            email: "ops@local.test".into(),
        }
    }

    #[test]
    fn test_event_log() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        record(
            &conn,
            &admin(),
            AuditAction::PaymentApproved,
            AuditTargets::child("child-1").with_payment("pay-1"),
            serde_json::json!({"method": "transaction_id"}),
        )
        .unwrap();

        let entries = entries_for_child(&conn, "child-1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::PaymentApproved);
        assert_eq!(entries[0].admin_id, "admin-7");
        assert_eq!(entries[0].targets.payment_id.as_deref(), Some("pay-1"));
        assert_eq!(entries[0].metadata["method"], "transaction_id");
    }

    #[test]
    fn test_counts_and_recent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        for _ in 0..3 {
            record(
                &conn,
                &admin(),
                AuditAction::DailyTaskSaved,
                AuditTargets::daily_task("task-1"),
                serde_json::json!({}),
            )
            .unwrap();
        }

        assert_eq!(count_entries(&conn, AuditAction::DailyTaskSaved).unwrap(), 3);
        assert_eq!(count_entries(&conn, AuditAction::LevelAssigned).unwrap(), 0);
        assert_eq!(recent_entries(&conn, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_action_text_form() {
        assert_eq!(AuditAction::LevelAssigned.as_str(), "LEVEL_ASSIGNED");
        assert_eq!(
            "CREDENTIALS_CREATED".parse::<AuditAction>().unwrap(),
            AuditAction::CredentialsCreated
        );
    }
}
