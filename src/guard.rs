// 🚦 Lifecycle guard - one decision point for (status, level, operation)
//
// Every workflow entry point asks this module before touching storage. The
// denial kind is part of the rule: state-machine violations are Conflict,
// status gates are Forbidden, and daily-task eligibility is NotFound so a
// child cannot probe for tasks outside their cohort.

use crate::entities::child::{Child, ChildStatus, Level};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Admin approves or rejects the registration payment
    ReviewPayment,
    IssueCredentials,
    StudentLogin,
    /// Start, upload to, or submit the initial assessment
    Assessment,
    AssignLevel,
    /// Any operation scoped to one daily task
    DailyTask { task_level: Option<Level> },
    /// Listing today's tasks
    ListDailyTasks,
}

/// Decide whether a child in `status` at `level` may perform `op`
pub fn authorize(status: ChildStatus, level: Option<Level>, op: Operation) -> Result<()> {
    use ChildStatus::*;

    match op {
        Operation::ReviewPayment => match status {
            PendingPayment => Ok(()),
            _ => Err(PipelineError::conflict("Payment is not pending")),
        },

        Operation::IssueCredentials => match status {
            ApprovedPendingLogin => Ok(()),
            _ => Err(PipelineError::conflict("Child is not awaiting credentials")),
        },

        Operation::StudentLogin => match status {
            AssessmentRequired | Active => Ok(()),
            _ => Err(PipelineError::Forbidden("Account not ready for login".into())),
        },

        Operation::Assessment => match status {
            AssessmentRequired | Active => Ok(()),
            _ => Err(PipelineError::Forbidden("Assessment not available".into())),
        },

        Operation::AssignLevel => match status {
            AssessmentRequired => Ok(()),
            Active => Err(PipelineError::conflict("Level already assigned")),
            _ => Err(PipelineError::conflict("Child is not awaiting level assignment")),
        },

        Operation::DailyTask { task_level } => {
            let level_matches = match task_level {
                None => true,
                Some(required) => level == Some(required),
            };
            if status == Active && level_matches {
                Ok(())
            } else {
                Err(PipelineError::not_found("Task"))
            }
        }

        Operation::ListDailyTasks => match status {
            Active => Ok(()),
            _ => Err(PipelineError::Forbidden("Daily tasks are not available yet".into())),
        },
    }
}

pub fn authorize_child(child: &Child, op: Operation) -> Result<()> {
    authorize(child.status, child.level, op)
}

pub fn is_allowed(status: ChildStatus, level: Option<Level>, op: Operation) -> bool {
    authorize(status, level, op).is_ok()
}
