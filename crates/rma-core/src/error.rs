//! Error types for RMA Core
//!
//! Provides error handling for:
//! - Unknown cases
//! - Step ordering violations
//! - Input validation (step names, field names)
//! - Record store and notifier failures

use crate::case::{CaseId, Revision};
use crate::step::Step;

/// Main RMA error type
#[derive(Debug, thiserror::Error)]
pub enum RmaError {
    /// Case does not exist
    #[error("case not found: {0}")]
    NotFound(CaseId),

    /// Step requested before its prerequisite was complete
    #[error("Hold on — you can't send \"{step} Email\" until \"{prerequisite} Email\" is sent.")]
    PrerequisiteViolation {
        /// Display name of the requested step
        step: &'static str,
        /// Display name of the missing prerequisite
        prerequisite: &'static str,
    },

    /// Invalid input
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Conditional write kept losing to concurrent updates
    #[error("conflicting updates on case {case_id} after {attempts} attempts")]
    Conflict { case_id: CaseId, attempts: u32 },

    /// External dependency unavailable
    #[error("dependency failure: {0}")]
    Dependency(#[from] DependencyError),
}

impl RmaError {
    /// Build a prerequisite violation for `step`
    #[must_use]
    pub fn prerequisite_violation(step: Step, prerequisite: Step) -> Self {
        Self::PrerequisiteViolation {
            step: step.display_name(),
            prerequisite: prerequisite.display_name(),
        }
    }

    /// Check if the caller caused the error
    #[inline]
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::PrerequisiteViolation { .. } | Self::Validation(_)
        )
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Dependency(_))
    }
}

impl From<StoreError> for RmaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::Conflict { case_id, .. } => Self::Conflict {
                case_id,
                attempts: 1,
            },
            StoreError::Rejected(violation) => {
                Self::Validation(ValidationError::Invariant(violation))
            }
            StoreError::Unavailable(message) => Self::Dependency(DependencyError::Store(message)),
        }
    }
}

/// Input validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Step name not in the step table
    #[error("unknown step: '{0}'")]
    UnknownStep(String),

    /// Field name not in the editable allow-list
    #[error("field is not editable: '{0}'")]
    UnknownField(String),

    /// Required field absent or blank
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Case id could not be parsed
    #[error("invalid case id: '{0}'")]
    InvalidCaseId(String),

    /// Patch would break a case invariant
    #[error("invariant violation: {0}")]
    Invariant(InvariantViolation),
}

/// Case invariants a patch may not break
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    /// Step marked done before its prerequisite
    #[error("{step} cannot be done before {prerequisite}")]
    OutOfOrder { step: Step, prerequisite: Step },

    /// Completion recorded for a step that is not done
    #[error("{0} completed without being done")]
    CompletedNotDone(Step),
}

/// External dependency failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DependencyError {
    /// Record store failure
    #[error("record store unavailable: {0}")]
    Store(String),

    /// Notifier failure
    #[error("notifier unavailable: {0}")]
    Notifier(String),
}

/// Record store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No document with this id
    #[error("case not found: {0}")]
    NotFound(CaseId),

    /// Expected revision did not match
    #[error("revision conflict on {case_id}: expected {expected}, found {actual}")]
    Conflict {
        case_id: CaseId,
        expected: Revision,
        actual: Revision,
    },

    /// Patch refused because it would break an invariant
    #[error("patch rejected: {0}")]
    Rejected(InvariantViolation),

    /// Backend failure
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Notification delivery errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    /// Recipient address missing or malformed
    #[error("invalid recipient: '{0}'")]
    InvalidRecipient(String),

    /// Transport failed to deliver
    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl From<NotifyError> for DependencyError {
    fn from(err: NotifyError) -> Self {
        Self::Notifier(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prerequisite_message_names_both_steps() {
        let err = RmaError::prerequisite_violation(Step::InProgress, Step::Investigating);
        let msg = err.to_string();
        assert!(msg.contains("\"In Progress Email\""));
        assert!(msg.contains("\"Investigation Underway Email\""));
        assert!(err.is_user_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn store_errors_map_to_taxonomy() {
        let id = CaseId::new();
        assert!(matches!(
            RmaError::from(StoreError::NotFound(id)),
            RmaError::NotFound(found) if found == id
        ));
        assert!(matches!(
            RmaError::from(StoreError::Unavailable("down".into())),
            RmaError::Dependency(DependencyError::Store(_))
        ));
        let conflict = RmaError::from(StoreError::Conflict {
            case_id: id,
            expected: Revision(1),
            actual: Revision(2),
        });
        assert!(conflict.is_retryable());
    }

    #[test]
    fn notify_error_becomes_dependency() {
        let dep: DependencyError = NotifyError::Delivery("smtp".into()).into();
        assert!(dep.to_string().contains("smtp"));
    }
}
