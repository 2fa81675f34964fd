//! Configuration for the enrollment pipeline
//!
//! `Args` is the CLI/environment surface (clap); `Settings` carries the
//! tunables the library itself reads.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::auth::{AdminActor, TokenGateway};

/// Library tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Reward points credited for one completed daily submission
    pub rp_per_submission: i64,
    /// Upper bound for receipt images at registration
    pub max_receipt_bytes: usize,
    pub min_grade: i64,
    pub max_grade: i64,
    /// How long a writer waits for the database lock
    pub busy_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            rp_per_submission: 10,
            max_receipt_bytes: 5 * 1024 * 1024,
            min_grade: 1,
            max_grade: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Literacy enrollment pipeline
#[derive(Parser, Debug, Clone)]
#[command(name = "literacy-enrollment")]
#[command(about = "Enrollment, assessment and daily-task lifecycle for a literacy program")]
pub struct Args {
    /// SQLite database file
    #[arg(long, env = "DATABASE_PATH", default_value = "enrollment.db")]
    pub database: PathBuf,

    /// Directory the filesystem blob store writes uploads to
    #[arg(long, env = "UPLOADS_DIR", default_value = "uploads")]
    pub uploads_dir: PathBuf,

    /// Secret used to sign actor tokens (required outside dev mode)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Admin token for the commands that read admin views (see `admin-login`)
    #[arg(long, env = "ADMIN_TOKEN")]
    pub admin_token: Option<String>,

    /// Actor token lifetime in seconds
    #[arg(long, env = "TOKEN_TTL_SECONDS", default_value = "604800")]
    pub token_ttl_seconds: u64,

    /// Reward points per completed daily submission
    #[arg(long, env = "RP_PER_SUBMISSION", default_value = "10")]
    pub rp_per_submission: i64,

    /// Milliseconds a writer waits on a locked database
    #[arg(long, env = "BUSY_TIMEOUT_MS", default_value = "5000")]
    pub busy_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Development mode (allows a built-in token secret)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the database schema
    Init,
    /// Create an admin account and the default assessment content
    Seed {
        #[arg(long, env = "ADMIN_EMAIL")]
        admin_email: String,
        #[arg(long, env = "ADMIN_PASSWORD")]
        admin_password: String,
    },
    /// List payments, optionally filtered by status
    Payments {
        #[arg(long)]
        status: Option<String>,
    },
    /// Export the daily review roster for a date as CSV
    ReviewExport {
        /// YYYY-MM-DD
        #[arg(long)]
        date: String,
        /// Output file (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show audit entries touching a child
    Audit {
        #[arg(long)]
        child: String,
    },
    /// Check admin credentials and print a signed admin token
    AdminLogin {
        #[arg(long, env = "ADMIN_EMAIL")]
        email: String,
        #[arg(long, env = "ADMIN_PASSWORD")]
        password: String,
    },
    /// Copy an uploaded file (receipt or recording) out of the blob store
    File {
        #[arg(long)]
        id: String,
        #[arg(long)]
        out: PathBuf,
    },
}

impl Args {
    /// Validate configuration that clap cannot express
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode {
            match &self.jwt_secret {
                None => return Err("JWT_SECRET is required outside dev mode".into()),
                Some(secret) if secret.len() < 32 => {
                    return Err("JWT_SECRET must be at least 32 characters".into())
                }
                Some(_) => {}
            }
        }
        if self.rp_per_submission < 0 {
            return Err("RP_PER_SUBMISSION must not be negative".into());
        }
        Ok(())
    }

    /// Token gateway for the configured secret; dev mode falls back to a fixed one
    pub fn token_gateway(&self) -> crate::error::Result<TokenGateway> {
        match &self.jwt_secret {
            Some(secret) => TokenGateway::new(secret.clone(), self.token_ttl_seconds),
            None if self.dev_mode => Ok(TokenGateway::new_dev()),
            None => Err(crate::error::PipelineError::Collaborator(
                "JWT_SECRET is not set".into(),
            )),
        }
    }

    /// The admin behind `--admin-token`, verified against the configured secret
    pub fn admin_actor(&self) -> crate::error::Result<AdminActor> {
        let token = self.admin_token.as_deref().unwrap_or_default();
        self.token_gateway()?.verify_admin(token)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            rp_per_submission: self.rp_per_submission,
            busy_timeout_ms: self.busy_timeout_ms,
            ..Settings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.rp_per_submission, 10);
        assert_eq!(settings.max_receipt_bytes, 5 * 1024 * 1024);
        assert_eq!((settings.min_grade, settings.max_grade), (1, 8));
    }

    #[test]
    fn test_args_require_secret_outside_dev_mode() {
        let args = Args::parse_from(["literacy-enrollment", "init"]);
        assert!(args.validate().is_err());

        let args = Args::parse_from(["literacy-enrollment", "--dev-mode", "init"]);
        assert!(args.validate().is_ok());

        let args = Args::parse_from([
            "literacy-enrollment",
            "--jwt-secret",
            "short",
            "init",
        ]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_settings_from_args() {
        let args = Args::parse_from([
            "literacy-enrollment",
            "--dev-mode",
            "--rp-per-submission",
            "25",
            "init",
        ]);
        assert_eq!(args.settings().rp_per_submission, 25);
    }

    #[test]
    fn test_token_gateway_selection() {
        let args = Args::parse_from(["literacy-enrollment", "--dev-mode", "init"]);
        assert!(args.token_gateway().is_ok());

        let args = Args::parse_from([
            "literacy-enrollment",
            "--jwt-secret",
            "0123456789abcdef0123456789abcdef",
            "init",
        ]);
        assert!(args.token_gateway().is_ok());
    }

    #[test]
    fn test_admin_token_is_verified() {
        let admin = AdminActor {
            admin_id: "admin-1".into(),
            email: "admin@local.test".into(),
        };
        let token = TokenGateway::new_dev().issue_admin(&admin).unwrap();

        let args = Args::parse_from([
            "literacy-enrollment",
            "--dev-mode",
            "--admin-token",
            token.as_str(),
            "payments",
        ]);
        assert_eq!(args.admin_actor().unwrap().admin_id, "admin-1");

        let args = Args::parse_from(["literacy-enrollment", "--dev-mode", "payments"]);
        assert_eq!(
            args.admin_actor().unwrap_err().kind(),
            crate::error::ErrorKind::Unauthorized
        );
    }

    #[test]
    fn test_settings_deserialize_partial() {
        let settings: Settings = serde_json::from_str(r#"{"rp_per_submission": 3}"#).unwrap();
        assert_eq!(settings.rp_per_submission, 3);
        assert_eq!(settings.max_grade, 8);
    }
}
