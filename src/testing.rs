// Shared fixtures for unit tests

use rusqlite::Connection;

use crate::assessment::{assign_level, get_or_start_assessment, submit_assessment, AssessmentResponses};
use crate::auth::{AdminActor, CredentialHasher, StudentActor};
use crate::blob::MemoryBlobStore;
use crate::config::Settings;
use crate::db::setup_database;
use crate::enrollment::{approve_payment, issue_credentials, register, ChildInfo, ParentInfo, PaymentProof, Registration, RegistrationReceipt};
use crate::entities::child::Level;
use crate::error::Result;

/// Reversible stand-in so tests don't pay for Argon2
pub(crate) struct PlainHasher;

impl CredentialHasher for PlainHasher {
    fn hash(&self, plaintext: &str) -> Result<String> {
        Ok(format!("plain:{}", plaintext))
    }

    fn verify(&self, plaintext: &str, hash: &str) -> Result<bool> {
        Ok(hash == format!("plain:{}", plaintext))
    }
}

pub(crate) fn fresh_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    setup_database(&conn).unwrap();
    conn
}

pub(crate) fn admin() -> AdminActor {
    AdminActor {
        admin_id: "admin-1".to_string(),
        email: "admin@local.test".to_string(),
    }
}

pub(crate) fn registration(email: &str) -> Registration {
    Registration {
        child: ChildInfo {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            grade: 4,
        },
        parent: ParentInfo {
            first_name: "Anne".to_string(),
            last_name: "Lovelace".to_string(),
            email: email.to_string(),
            phone: "555-0100".to_string(),
        },
        payment: PaymentProof::TransactionId("TX-1001".to_string()),
    }
}

pub(crate) fn registered(conn: &mut Connection, email: &str) -> RegistrationReceipt {
    register(conn, &MemoryBlobStore::new(), &Settings::default(), registration(email)).unwrap()
}

/// Child with credentials issued, status assessment_required
pub(crate) fn student(conn: &mut Connection, username: &str) -> StudentActor {
    let receipt = registered(conn, &format!("{}@example.com", username));
    approve_payment(conn, &admin(), &receipt.payment_id).unwrap();
    let child = issue_credentials(conn, &PlainHasher, &admin(), &receipt.child_id, username, "pw").unwrap();
    StudentActor {
        child_id: child.id,
        username: username.to_string(),
    }
}

/// Child that went through the assessment and was leveled
pub(crate) fn active_student(conn: &mut Connection, username: &str, level: Level) -> StudentActor {
    let student = student(conn, username);
    let session = get_or_start_assessment(conn, &student).unwrap();
    submit_assessment(
        conn,
        &student,
        &session.assessment.id,
        &AssessmentResponses::default(),
    )
    .unwrap();
    assign_level(conn, &admin(), &session.assessment.id, level).unwrap();
    student
}
