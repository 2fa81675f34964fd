// 🔑 Accounts - admin provisioning and login for both actor kinds
//
// Login is the only way to turn a password into a verified actor; every
// other entry point takes the actor (or a token verified into one).

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::auth::{AdminActor, CredentialHasher, StudentActor, TokenGateway};
use crate::db::{is_constraint_violation, new_id, to_db_time};
use crate::enrollment::normalize_email;
use crate::entities::child::find_child_by_username;
use crate::error::{PipelineError, Result};
use crate::guard::{self, Operation};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session<A> {
    pub actor: A,
    pub token: String,
}

fn invalid_credentials() -> PipelineError {
    PipelineError::Unauthorized("Invalid credentials".into())
}

/// Provision an administrator. Email is stored normalized and must be unique.
pub fn create_admin(
    conn: &Connection,
    hasher: &dyn CredentialHasher,
    email: &str,
    password: &str,
    first_name: &str,
    last_name: &str,
) -> Result<AdminActor> {
    let email = normalize_email(email);
    if email.is_empty() || password.is_empty() {
        return Err(PipelineError::validation("Email and password are required."));
    }

    let password_hash = hasher.hash(password)?;
    let id = new_id();
    conn.execute(
        "INSERT INTO admins (id, email, password_hash, first_name, last_name, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            email,
            password_hash,
            first_name.trim(),
            last_name.trim(),
            to_db_time(&Utc::now())
        ],
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            PipelineError::conflict("Admin already exists")
        } else {
            PipelineError::Storage(e)
        }
    })?;

    info!(admin_id = %id, %email, "admin created");
    Ok(AdminActor { admin_id: id, email })
}

pub fn find_admin_by_email(conn: &Connection, email: &str) -> Result<Option<AdminActor>> {
    let email = normalize_email(email);
    Ok(conn
        .query_row(
            "SELECT id, email FROM admins WHERE email = ?1",
            [&email],
            |row| {
                Ok(AdminActor {
                    admin_id: row.get(0)?,
                    email: row.get(1)?,
                })
            },
        )
        .optional()?)
}

pub fn admin_login(
    conn: &Connection,
    hasher: &dyn CredentialHasher,
    tokens: &TokenGateway,
    email: &str,
    password: &str,
) -> Result<Session<AdminActor>> {
    let email = normalize_email(email);
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT id, password_hash FROM admins WHERE email = ?1",
            [&email],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((admin_id, password_hash)) = row else {
        debug!("admin login for unknown email");
        return Err(invalid_credentials());
    };
    if !hasher.verify(password, &password_hash)? {
        debug!(%admin_id, "admin login with wrong password");
        return Err(invalid_credentials());
    }

    let actor = AdminActor { admin_id, email };
    let token = tokens.issue_admin(&actor)?;
    info!(admin_id = %actor.admin_id, "admin logged in");
    Ok(Session { actor, token })
}

/// Credentials are checked before status, so a wrong password on a
/// not-yet-ready account is still Unauthorized
pub fn student_login(
    conn: &Connection,
    hasher: &dyn CredentialHasher,
    tokens: &TokenGateway,
    username: &str,
    password: &str,
) -> Result<Session<StudentActor>> {
    let username = username.trim();
    let child = find_child_by_username(conn, username)?.ok_or_else(|| {
        debug!("student login for unknown username");
        invalid_credentials()
    })?;
    let password_hash = child.password_hash.as_deref().ok_or_else(invalid_credentials)?;
    if !hasher.verify(password, password_hash)? {
        debug!(child_id = %child.id, "student login with wrong password");
        return Err(invalid_credentials());
    }

    guard::authorize_child(&child, Operation::StudentLogin)
        .inspect_err(|e| debug!(child_id = %child.id, error = %e, "student login refused"))?;

    let actor = StudentActor {
        child_id: child.id.clone(),
        username: username.to_string(),
    };
    let token = tokens.issue_student(&actor)?;
    info!(child_id = %actor.child_id, status = %child.status, "student logged in");
    Ok(Session { actor, token })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{admin, fresh_db, registered, PlainHasher};
    use crate::enrollment::{approve_payment, issue_credentials, reject_payment};

    #[test]
    fn test_admin_login_normalizes_email() {
        let conn = fresh_db();
        let tokens = TokenGateway::new_dev();
        let created = create_admin(&conn, &PlainHasher, " Ops@Example.COM", "secret", "Op", "S").unwrap();
        assert_eq!(created.email, "ops@example.com");

        let session = admin_login(&conn, &PlainHasher, &tokens, "OPS@example.com ", "secret").unwrap();
        assert_eq!(session.actor, created);
        assert_eq!(tokens.verify_admin(&session.token).unwrap(), created);

        let err = admin_login(&conn, &PlainHasher, &tokens, "ops@example.com", "nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn test_duplicate_admin_conflicts() {
        let conn = fresh_db();
        create_admin(&conn, &PlainHasher, "a@example.com", "pw", "A", "B").unwrap();
        let err = create_admin(&conn, &PlainHasher, "A@example.com", "pw", "A", "B").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(find_admin_by_email(&conn, "a@EXAMPLE.com").unwrap().is_some());
    }

    #[test]
    fn test_student_login_after_credentials() {
        let mut conn = fresh_db();
        let tokens = TokenGateway::new_dev();
        let receipt = registered(&mut conn, "p@example.com");
        approve_payment(&mut conn, &admin(), &receipt.payment_id).unwrap();
        issue_credentials(&mut conn, &PlainHasher, &admin(), &receipt.child_id, "stu1", "pw").unwrap();

        let session = student_login(&conn, &PlainHasher, &tokens, "stu1", "pw").unwrap();
        assert_eq!(session.actor.child_id, receipt.child_id);
        let verified = tokens.verify_student(&session.token).unwrap();
        assert_eq!(verified.username, "stu1");

        let err = student_login(&conn, &PlainHasher, &tokens, "stu1", "wrong").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        let err = student_login(&conn, &PlainHasher, &tokens, "nobody", "pw").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn test_student_without_credentials_cannot_log_in() {
        let mut conn = fresh_db();
        let tokens = TokenGateway::new_dev();
        let receipt = registered(&mut conn, "p@example.com");
        reject_payment(&mut conn, &admin(), &receipt.payment_id, None).unwrap();

        let err = student_login(&conn, &PlainHasher, &tokens, "", "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn test_login_gate_checks_status() {
        let mut conn = fresh_db();
        let tokens = TokenGateway::new_dev();
        let receipt = registered(&mut conn, "p@example.com");
        approve_payment(&mut conn, &admin(), &receipt.payment_id).unwrap();
        issue_credentials(&mut conn, &PlainHasher, &admin(), &receipt.child_id, "stu1", "pw").unwrap();

        // Force the account into a state that may not log in
        conn.execute(
            "UPDATE children SET status = 'rejected' WHERE id = ?1",
            [&receipt.child_id],
        )
        .unwrap();

        let err = student_login(&conn, &PlainHasher, &tokens, "stu1", "pw").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(err.message(), "Account not ready for login");
    }
}
