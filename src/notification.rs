use crate::error::ReconciliationError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ExternalComputation,
    Persistence,
}

/// A non-blocking, user-visible report of a collaborator failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
    pub retryable: bool,
}

impl Notification {
    /// Converts a collaborator failure. Contract violations are caller bugs
    /// and have no notification.
    pub fn from_error(error: &ReconciliationError) -> Option<Self> {
        match error {
            ReconciliationError::ExternalComputation(_) => Some(Self {
                kind: NotificationKind::ExternalComputation,
                message: error.to_string(),
                retryable: true,
            }),
            ReconciliationError::Persistence(_) => Some(Self {
                kind: NotificationKind::Persistence,
                message: error.to_string(),
                retryable: false,
            }),
            _ => None,
        }
    }
}
