// 💳 Payment - one per registration, reviewed by an admin

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::db::{opt_time_col, time_col};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Parent typed the bank transaction reference
    TransactionId,
    /// Parent uploaded a receipt image
    ReceiptUpload,
}

text_enum!(PaymentMethod, "payment method", {
    TransactionId => "transaction_id",
    ReceiptUpload => "receipt_upload",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Rejected,
}

text_enum!(PaymentStatus, "payment status", {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub child_id: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    /// Blob reference of the uploaded receipt
    pub receipt_file_id: Option<String>,
    pub review_note: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub(crate) const COLUMNS: &'static str = "id, child_id, method, status, transaction_id, \
         receipt_file_id, review_note, reviewed_by, reviewed_at, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Payment {
            id: row.get(0)?,
            child_id: row.get(1)?,
            method: row.get(2)?,
            status: row.get(3)?,
            transaction_id: row.get(4)?,
            receipt_file_id: row.get(5)?,
            review_note: row.get(6)?,
            reviewed_by: row.get(7)?,
            reviewed_at: opt_time_col(row, 8)?,
            created_at: time_col(row, 9)?,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.status == PaymentStatus::Pending
    }
}

pub fn get_payment(conn: &Connection, id: &str) -> Result<Option<Payment>> {
    let sql = format!("SELECT {} FROM payments WHERE id = ?1", Payment::COLUMNS);
    Ok(conn.query_row(&sql, [id], Payment::from_row).optional()?)
}

pub fn require_payment(conn: &Connection, id: &str) -> Result<Payment> {
    get_payment(conn, id)?.ok_or_else(|| PipelineError::not_found("Payment"))
}

pub fn payment_for_child(conn: &Connection, child_id: &str) -> Result<Option<Payment>> {
    let sql = format!("SELECT {} FROM payments WHERE child_id = ?1", Payment::COLUMNS);
    Ok(conn
        .query_row(&sql, params![child_id], Payment::from_row)
        .optional()?)
}
