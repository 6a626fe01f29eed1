//! Invariant violations raised by entity constructors and transitions.

use thiserror::Error;

use super::user::UserStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("{0} cannot be empty")]
    EmptyField(&'static str),

    #[error("System administrators cannot be disabled")]
    SystemAdminCannotBeDisabled,

    #[error("Only locked users can be unlocked (current status: {0})")]
    NotLocked(UserStatus),
}

impl ModelError {
    /// True for business-rule violations on existing state, as opposed to
    /// malformed constructor input.
    pub fn is_state_conflict(&self) -> bool {
        match self {
            ModelError::EmptyField(_) => false,
            ModelError::SystemAdminCannotBeDisabled | ModelError::NotLocked(_) => true,
        }
    }
}
