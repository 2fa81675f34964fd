//! Credential and token gateways
//!
//! Provides:
//! - Password hashing with Argon2 behind the `CredentialHasher` trait
//! - Signed, time-limited actor tokens (HS256)
//! - The verified actor identities every privileged workflow takes
//!
//! Workflows never see tokens or plaintext passwords after this layer: they
//! receive an `AdminActor` or `StudentActor`, which can only be obtained
//! from a verified token or a successful login.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{PipelineError, Result};

// ============================================================================
// ACTORS
// ============================================================================

/// Verified administrator identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminActor {
    pub admin_id: String,
    pub email: String,
}

/// Verified student identity (one child)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentActor {
    pub child_id: String,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Admin,
    Student,
}

// ============================================================================
// CREDENTIAL GATEWAY
// ============================================================================

/// Opaque password hashing; implementations never log plaintext
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, plaintext: &str) -> Result<String>;
    fn verify(&self, plaintext: &str, hash: &str) -> Result<bool>;
}

/// Argon2id with default parameters, PHC string output
#[derive(Debug, Default, Clone)]
pub struct Argon2Hasher;

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| PipelineError::Collaborator(format!("Failed to hash password: {e}")))
    }

    fn verify(&self, plaintext: &str, hash: &str) -> Result<bool> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| PipelineError::Collaborator(format!("Invalid password hash format: {e}")))?;
        Ok(Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok())
    }
}

// ============================================================================
// TOKEN GATEWAY
// ============================================================================

/// Payload of an actor token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Admin id or child id
    pub sub: String,
    /// Admin email or student username
    pub login: String,
    pub kind: ActorKind,
    pub iat: u64,
    pub exp: u64,
}

#[derive(Clone)]
pub struct TokenGateway {
    secret: String,
    ttl_seconds: u64,
}

impl TokenGateway {
    /// Returns an error if the secret is shorter than 32 characters
    pub fn new(secret: impl Into<String>, ttl_seconds: u64) -> Result<Self> {
        let secret = secret.into();
        if secret.len() < 32 {
            return Err(PipelineError::Collaborator(
                "Token secret must be at least 32 characters".into(),
            ));
        }
        Ok(TokenGateway {
            secret,
            ttl_seconds,
        })
    }

    /// Gateway with a fixed secret for development and tests
    pub fn new_dev() -> Self {
        TokenGateway {
            secret: "dev-mode-secret-not-for-production-use-123456".into(),
            ttl_seconds: 3600,
        }
    }

    fn issue(&self, sub: &str, login: &str, kind: ActorKind) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| PipelineError::Collaborator(format!("System time error: {e}")))?
            .as_secs();

        let claims = Claims {
            sub: sub.to_string(),
            login: login.to_string(),
            kind,
            iat: now,
            exp: now + self.ttl_seconds,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| PipelineError::Collaborator(format!("Failed to sign token: {e}")))
    }

    pub fn issue_admin(&self, admin: &AdminActor) -> Result<String> {
        self.issue(&admin.admin_id, &admin.email, ActorKind::Admin)
    }

    pub fn issue_student(&self, student: &StudentActor) -> Result<String> {
        self.issue(&student.child_id, &student.username, ActorKind::Student)
    }

    /// Signature and expiry check; any failure is Unauthorized
    pub fn verify(&self, token: &str) -> Result<Claims> {
        if token.trim().is_empty() {
            return Err(PipelineError::Unauthorized("Missing token".into()));
        }
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|_| PipelineError::Unauthorized("Invalid token".into()))
    }

    /// Verify a token and require it to belong to an admin
    pub fn verify_admin(&self, token: &str) -> Result<AdminActor> {
        let claims = self.verify(token)?;
        match claims.kind {
            ActorKind::Admin => Ok(AdminActor {
                admin_id: claims.sub,
                email: claims.login,
            }),
            ActorKind::Student => Err(PipelineError::Forbidden("Admin access required".into())),
        }
    }

    /// Verify a token and require it to belong to a student
    pub fn verify_student(&self, token: &str) -> Result<StudentActor> {
        let claims = self.verify(token)?;
        match claims.kind {
            ActorKind::Student => Ok(StudentActor {
                child_id: claims.sub,
                username: claims.login,
            }),
            ActorKind::Admin => Err(PipelineError::Forbidden("Student access required".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn student() -> StudentActor {
        StudentActor {
            child_id: "child-1".into(),
            username: "stu1".into(),
        }
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = Argon2Hasher;
        let hash = hasher.hash("correct-horse").unwrap();

        assert!(hash.starts_with("$argon2"));
        assert!(hasher.verify("correct-horse", &hash).unwrap());
        assert!(!hasher.verify("wrong", &hash).unwrap());
    }

    #[test]
    fn test_invalid_hash_format() {
        assert!(Argon2Hasher.verify("password", "not-a-hash").is_err());
    }

    #[test]
    fn test_student_token_round_trip() {
        let gateway = TokenGateway::new_dev();
        let token = gateway.issue_student(&student()).unwrap();
        assert_eq!(gateway.verify_student(&token).unwrap(), student());
    }

    #[test]
    fn test_wrong_kind_is_forbidden() {
        let gateway = TokenGateway::new_dev();
        let token = gateway.issue_student(&student()).unwrap();
        let err = gateway.verify_admin(&token).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn test_tampered_or_missing_token_is_unauthorized() {
        let gateway = TokenGateway::new_dev();
        let other = TokenGateway::new("another-secret-that-is-long-enough-0000", 60).unwrap();
        let token = other.issue_student(&student()).unwrap();

        assert_eq!(gateway.verify(&token).unwrap_err().kind(), ErrorKind::Unauthorized);
        assert_eq!(gateway.verify("").unwrap_err().kind(), ErrorKind::Unauthorized);
        assert_eq!(gateway.verify("abc.def.ghi").unwrap_err().kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(TokenGateway::new("short", 60).is_err());
    }
}
