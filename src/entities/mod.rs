// Persisted records for the enrollment pipeline
//
// Enum-valued columns are stored as their snake_case text form so the
// schema's CHECK constraints and ad-hoc SQL stay readable.

pub mod assessment;
pub mod child;
pub mod content;
pub mod daily;
pub mod payment;

pub use assessment::{Assessment, AssessmentArtifact, ASSESSMENT_KIND_INITIAL};
pub use child::{Child, ChildStatus, Level, Parent};
pub use content::{ContentItem, ContentType, Skill};
pub use daily::{DailySubmission, DailySubmissionArtifact, DailyTask, RpEvent};
pub use payment::{Payment, PaymentMethod, PaymentStatus};
