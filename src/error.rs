use std::fmt;

use thiserror::Error;

use crate::workflow::{LockState, RoleId, TicketId};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("role {actor} is not authorized: {reason}")]
    Authorization { actor: RoleId, reason: String },

    #[error("ticket #{ticket} is locked ({lock}); revoke the lock first")]
    Locked { ticket: TicketId, lock: LockState },

    #[error("ticket #{ticket} changed underneath the request: {reason}")]
    Conflict { ticket: TicketId, reason: String },

    #[error("workflow store unavailable: {0}")]
    Persistence(#[from] StoreError),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Validation(_) => ErrorKind::Validation,
            WorkflowError::Authorization { .. } => ErrorKind::Authorization,
            WorkflowError::Locked { .. } => ErrorKind::Locked,
            WorkflowError::Conflict { .. } => ErrorKind::Conflict,
            WorkflowError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    pub(crate) fn unauthorized(actor: RoleId, reason: impl Into<String>) -> Self {
        WorkflowError::Authorization {
            actor,
            reason: reason.into(),
        }
    }

    pub(crate) fn conflict(ticket: TicketId, reason: impl Into<String>) -> Self {
        WorkflowError::Conflict {
            ticket,
            reason: reason.into(),
        }
    }
}

/// Coarse classification of a [`WorkflowError`], used by callers to decide on retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    Locked,
    Conflict,
    Persistence,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Authorization => write!(f, "authorization"),
            ErrorKind::Locked => write!(f, "locked"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::Persistence => write!(f, "persistence"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("table `{0}` does not exist; initialise the database first")]
    MissingTable(String),

    #[error("column `{table}.{column}` does not exist; the schema predates lock support and must be migrated")]
    MissingColumn { table: String, column: String },

    #[error("corrupt data in `{table}`: {detail}")]
    Corrupt { table: String, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_display() {
        let err = WorkflowError::Locked {
            ticket: TicketId(4),
            lock: LockState::OnHold,
        };
        assert_eq!(
            err.to_string(),
            "ticket #4 is locked (on_hold); revoke the lock first"
        );
        assert_eq!(err.kind(), ErrorKind::Locked);
    }

    #[test]
    fn store_errors_become_persistence() {
        let err: WorkflowError = StoreError::MissingColumn {
            table: "tickets".into(),
            column: "lock_type".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(err.to_string().contains("tickets.lock_type"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WorkflowError>();
    }
}
