// 📥 Enrollment & Payment Workflow
//
// Registration intake, admin payment review and credential issuance.
//
//   Register          → Child.pending_payment,        Payment.pending
//   ApprovePayment    → Child.approved_pending_login, Payment.approved
//   RejectPayment     → Child.rejected,               Payment.rejected
//   IssueCredentials  → Child.assessment_required

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audit::{self, AuditAction, AuditTargets};
use crate::auth::{AdminActor, CredentialHasher};
use crate::blob::{persist_upload, BlobStore, Upload};
use crate::config::Settings;
use crate::db::{expect_one_row, is_constraint_violation, new_id, to_db_time, write_tx};
use crate::entities::child::{
    children_with_status, find_child_by_username, require_child, Child, ChildStatus,
};
use crate::entities::payment::{require_payment, Payment, PaymentMethod, PaymentStatus};
use crate::error::{PipelineError, Result};
use crate::guard::{self, Operation};

// ============================================================================
// REGISTRATION INPUT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildInfo {
    pub first_name: String,
    pub last_name: String,
    pub grade: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentInfo {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone)]
pub enum PaymentProof {
    TransactionId(String),
    ReceiptUpload(Upload),
}

impl PaymentProof {
    pub fn method(&self) -> PaymentMethod {
        match self {
            PaymentProof::TransactionId(_) => PaymentMethod::TransactionId,
            PaymentProof::ReceiptUpload(_) => PaymentMethod::ReceiptUpload,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub child: ChildInfo,
    pub parent: ParentInfo,
    pub payment: PaymentProof,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationReceipt {
    pub parent_id: String,
    pub child_id: String,
    pub payment_id: String,
    pub receipt_file_id: Option<String>,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Trim every field and check the intake rules; returns the cleaned input
fn validate_registration(
    registration: &Registration,
    settings: &Settings,
) -> Result<(ChildInfo, ParentInfo)> {
    let child = ChildInfo {
        first_name: registration.child.first_name.trim().to_string(),
        last_name: registration.child.last_name.trim().to_string(),
        grade: registration.child.grade,
    };
    let parent = ParentInfo {
        first_name: registration.parent.first_name.trim().to_string(),
        last_name: registration.parent.last_name.trim().to_string(),
        email: normalize_email(&registration.parent.email),
        phone: registration.parent.phone.trim().to_string(),
    };

    if child.first_name.is_empty() || child.last_name.is_empty() {
        return Err(PipelineError::validation("Child name is required."));
    }
    if child.grade < settings.min_grade || child.grade > settings.max_grade {
        return Err(PipelineError::Validation(format!(
            "Grade must be between {} and {}.",
            settings.min_grade, settings.max_grade
        )));
    }
    if parent.first_name.is_empty()
        || parent.last_name.is_empty()
        || parent.email.is_empty()
        || parent.phone.is_empty()
    {
        return Err(PipelineError::validation("Parent info is required."));
    }

    match &registration.payment {
        PaymentProof::TransactionId(reference) => {
            if reference.trim().is_empty() {
                return Err(PipelineError::validation("Transaction ID is required."));
            }
        }
        PaymentProof::ReceiptUpload(upload) => {
            if !upload.is_image() {
                return Err(PipelineError::validation(
                    "Receipt must be an image (jpg/png/webp/gif). PDFs are not allowed.",
                ));
            }
            if upload.bytes.is_empty() {
                return Err(PipelineError::validation("Receipt image is empty."));
            }
            if upload.bytes.len() > settings.max_receipt_bytes {
                return Err(PipelineError::Validation(format!(
                    "Receipt image must be <= {} bytes.",
                    settings.max_receipt_bytes
                )));
            }
        }
    }

    Ok((child, parent))
}

// ============================================================================
// REGISTER
// ============================================================================

/// Upsert the parent by (email, phone) and create child + payment atomically
pub fn register(
    conn: &mut Connection,
    blobs: &dyn BlobStore,
    settings: &Settings,
    registration: Registration,
) -> Result<RegistrationReceipt> {
    let (child, parent) = validate_registration(&registration, settings)
        .inspect_err(|e| debug!(error = %e, "registration rejected"))?;

    let tx = write_tx(conn)?;
    let now = to_db_time(&Utc::now());

    tx.execute(
        "INSERT INTO parents (id, first_name, last_name, email, phone, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT (email, phone) DO UPDATE SET
            first_name = excluded.first_name,
            last_name = excluded.last_name,
            updated_at = excluded.updated_at",
        params![
            new_id(),
            parent.first_name,
            parent.last_name,
            parent.email,
            parent.phone,
            now
        ],
    )?;
    let parent_id: String = tx.query_row(
        "SELECT id FROM parents WHERE email = ?1 AND phone = ?2",
        params![parent.email, parent.phone],
        |row| row.get(0),
    )?;

    let child_id = new_id();
    tx.execute(
        "INSERT INTO children (id, parent_id, first_name, last_name, grade, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            child_id,
            parent_id,
            child.first_name,
            child.last_name,
            child.grade,
            ChildStatus::PendingPayment,
            now
        ],
    )?;

    let (transaction_id, receipt_file_id) = match &registration.payment {
        PaymentProof::TransactionId(reference) => (Some(reference.trim().to_string()), None),
        PaymentProof::ReceiptUpload(upload) => {
            let stored = persist_upload(&tx, blobs, upload, Some(&child_id))?;
            (None, Some(stored.id))
        }
    };

    let payment_id = new_id();
    tx.execute(
        "INSERT INTO payments (id, child_id, method, status, transaction_id, receipt_file_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            payment_id,
            child_id,
            registration.payment.method(),
            PaymentStatus::Pending,
            transaction_id,
            receipt_file_id,
            now
        ],
    )?;

    tx.commit()?;

    info!(
        %parent_id,
        %child_id,
        %payment_id,
        method = %registration.payment.method(),
        "registration received"
    );

    Ok(RegistrationReceipt {
        parent_id,
        child_id,
        payment_id,
        receipt_file_id,
    })
}

// ============================================================================
// PAYMENT REVIEW
// ============================================================================

enum PaymentDecision<'a> {
    Approve,
    Reject { reason: Option<&'a str> },
}

/// Single implementation behind approve and reject
fn review_payment(
    conn: &mut Connection,
    admin: &AdminActor,
    payment_id: &str,
    decision: PaymentDecision<'_>,
) -> Result<Payment> {
    let tx = write_tx(conn)?;

    let payment = require_payment(&tx, payment_id)?;
    if !payment.is_pending() {
        return Err(PipelineError::conflict("Payment is not pending"));
    }
    let child = require_child(&tx, &payment.child_id)?;
    guard::authorize_child(&child, Operation::ReviewPayment)?;

    let (payment_status, child_status, action, note) = match decision {
        PaymentDecision::Approve => (
            PaymentStatus::Approved,
            ChildStatus::ApprovedPendingLogin,
            AuditAction::PaymentApproved,
            None,
        ),
        PaymentDecision::Reject { reason } => (
            PaymentStatus::Rejected,
            ChildStatus::Rejected,
            AuditAction::PaymentRejected,
            reason.map(str::trim).filter(|r| !r.is_empty()).map(str::to_string),
        ),
    };
    let now = to_db_time(&Utc::now());

    let updated = tx.execute(
        "UPDATE payments SET status = ?1, review_note = ?2, reviewed_by = ?3, reviewed_at = ?4
         WHERE id = ?5 AND status = 'pending'",
        params![payment_status, note, admin.admin_id, now, payment.id],
    )?;
    expect_one_row(updated, "Payment is not pending")?;

    let updated = tx.execute(
        "UPDATE children SET status = ?1 WHERE id = ?2 AND status = 'pending_payment'",
        params![child_status, child.id],
    )?;
    expect_one_row(updated, "Payment is not pending")?;

    audit::record(
        &tx,
        admin,
        action,
        AuditTargets::child(&child.id).with_payment(&payment.id),
        serde_json::json!({ "method": payment.method, "reason": note }),
    )?;

    let reviewed = require_payment(&tx, &payment.id)?;
    tx.commit()?;

    info!(
        payment_id = %reviewed.id,
        child_id = %child.id,
        status = %reviewed.status,
        actor = %admin.admin_id,
        "payment reviewed"
    );

    Ok(reviewed)
}

pub fn approve_payment(conn: &mut Connection, admin: &AdminActor, payment_id: &str) -> Result<Payment> {
    review_payment(conn, admin, payment_id, PaymentDecision::Approve)
        .inspect_err(|e| debug!(payment_id, error = %e, "payment approval refused"))
}

pub fn reject_payment(
    conn: &mut Connection,
    admin: &AdminActor,
    payment_id: &str,
    reason: Option<&str>,
) -> Result<Payment> {
    review_payment(conn, admin, payment_id, PaymentDecision::Reject { reason })
        .inspect_err(|e| debug!(payment_id, error = %e, "payment rejection refused"))
}

// ============================================================================
// CREDENTIALS
// ============================================================================

/// Give an approved child a login. Username uniqueness is enforced by the
/// UNIQUE index on children.username, not by the pre-check alone.
pub fn issue_credentials(
    conn: &mut Connection,
    hasher: &dyn CredentialHasher,
    admin: &AdminActor,
    child_id: &str,
    username: &str,
    password: &str,
) -> Result<Child> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Err(PipelineError::validation("Username and password are required."));
    }

    let password_hash = hasher.hash(password)?;

    let tx = write_tx(conn)?;
    let child = require_child(&tx, child_id)?;
    guard::authorize_child(&child, Operation::IssueCredentials)
        .inspect_err(|e| debug!(child_id, error = %e, "credential issuance refused"))?;
    if find_child_by_username(&tx, username)?.is_some() {
        return Err(PipelineError::conflict("Username already exists"));
    }

    store_credentials(&tx, admin, &child.id, username, &password_hash)?;

    audit::record(
        &tx,
        admin,
        AuditAction::CredentialsCreated,
        AuditTargets::child(&child.id),
        serde_json::json!({ "username": username }),
    )?;

    let updated_child = require_child(&tx, &child.id)?;
    tx.commit()?;

    info!(child_id = %child.id, %username, actor = %admin.admin_id, "credentials issued");
    Ok(updated_child)
}

/// Conditional write behind `issue_credentials`. The status condition and the
/// UNIQUE index on username decide the outcome, whatever was read earlier.
fn store_credentials(
    conn: &Connection,
    admin: &AdminActor,
    child_id: &str,
    username: &str,
    password_hash: &str,
) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE children
             SET username = ?1, password_hash = ?2, status = ?3,
                 credentials_created_at = ?4, credentials_created_by = ?5
             WHERE id = ?6 AND status = 'approved_pending_login'",
            params![
                username,
                password_hash,
                ChildStatus::AssessmentRequired,
                to_db_time(&Utc::now()),
                admin.admin_id,
                child_id
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                PipelineError::conflict("Username already exists")
            } else {
                PipelineError::Storage(e)
            }
        })?;
    expect_one_row(updated, "Child is not awaiting credentials")
}

// ============================================================================
// ADMIN QUEUES
// ============================================================================

/// Payment row joined with the people it concerns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub payment: Payment,
    pub child_name: String,
    pub grade: i64,
    pub parent_name: String,
    pub parent_email: String,
    pub parent_phone: String,
}

pub fn list_payments(
    conn: &Connection,
    admin: &AdminActor,
    status: Option<PaymentStatus>,
) -> Result<Vec<PaymentSummary>> {
    let columns = Payment::COLUMNS
        .split(',')
        .map(|c| format!("p.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {}, c.first_name || ' ' || c.last_name, c.grade,
                par.first_name || ' ' || par.last_name, par.email, par.phone
         FROM payments p
         JOIN children c ON c.id = p.child_id
         JOIN parents par ON par.id = c.parent_id
         WHERE (?1 IS NULL OR p.status = ?1)
         ORDER BY p.created_at ASC",
        columns
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![status], |row| {
            Ok(PaymentSummary {
                payment: Payment::from_row(row)?,
                child_name: row.get(10)?,
                grade: row.get(11)?,
                parent_name: row.get(12)?,
                parent_email: row.get(13)?,
                parent_phone: row.get(14)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    debug!(actor = %admin.admin_id, ?status, count = rows.len(), "payments listed");
    Ok(rows)
}

/// Approved children still waiting for a login
pub fn list_awaiting_credentials(conn: &Connection, admin: &AdminActor) -> Result<Vec<Child>> {
    debug!(actor = %admin.admin_id, "credential queue read");
    children_with_status(conn, ChildStatus::ApprovedPendingLogin)
}

// ============================================================================
// TESTS
// ============================================================================
