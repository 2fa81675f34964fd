// Literacy Enrollment Pipeline - Core Library
// Exposes all modules for use in the CLI and tests

#[macro_use]
mod macros;

pub mod error;
pub mod config;
pub mod db;
pub mod entities;
pub mod auth;          // Credential + token gateways, verified actors
pub mod blob;          // Upload storage behind BlobStore
pub mod audit;         // Append-only admin action log
pub mod guard;         // (status, level, operation) → allow/deny
pub mod enrollment;    // Registration, payment review, credentials
pub mod accounts;      // Admin provisioning, logins
pub mod assessment;    // Initial assessment + level assignment
pub mod daily;         // Daily tasks, submissions, RP

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use error::{ErrorKind, PipelineError, Result};
pub use config::{Args, Command, Settings};
pub use db::{open_database, parse_task_date, setup_database, write_tx};
pub use entities::{
    Assessment, AssessmentArtifact, Child, ChildStatus, ContentItem, ContentType,
    DailySubmission, DailySubmissionArtifact, DailyTask, Level, Parent, Payment,
    PaymentMethod, PaymentStatus, RpEvent, Skill,
};
pub use auth::{AdminActor, Argon2Hasher, CredentialHasher, StudentActor, TokenGateway};
pub use blob::{BlobRef, BlobStore, FsBlobStore, MemoryBlobStore, Upload};
pub use audit::{AuditAction, AuditLogEntry, AuditTargets};
pub use guard::{authorize, Operation};
pub use enrollment::{
    approve_payment, issue_credentials, list_awaiting_credentials, list_payments, register,
    reject_payment, ChildInfo, ParentInfo, PaymentProof, Registration, RegistrationReceipt,
};
pub use accounts::{admin_login, create_admin, student_login, Session};
pub use assessment::{
    assessment_detail, assign_level, get_or_start_assessment, list_assessments_for_review,
    submit_assessment, upload_assessment_artifact, AssessmentResponses, AssessmentSession,
};
pub use daily::{
    create_or_update_daily_task, daily_review, delete_daily_artifact, export_daily_review_csv,
    list_daily_tasks, list_tasks_for_child, save_daily_plan, submit_daily_task,
    task_detail_for_child, upload_daily_artifact, DailyTaskDraft,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
