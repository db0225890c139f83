//! Error taxonomy for the payroll pipeline
use sled::transaction::TransactionError;

/// Broad category of a [`PayrollError`], used by callers to decide whether to
/// retry, prompt the user, or surface a hard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    StateConflict,
    NotFound,
    IntegrityGuard,
    Storage,
}

#[derive(thiserror::Error, Debug)]
pub enum PayrollError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("No valid clock-in/clock-out pairs for worker {worker_id} on {date}")]
    NoValidPairs { worker_id: String, date: String },
    #[error("{count} pending timesheets found for payroll {payroll_id}, continue anyway?")]
    PendingTimesheets { payroll_id: String, count: usize },
    #[error("Invalid state transition: {0}")]
    StateConflict(String),
    #[error("Timesheet already exists for {0}")]
    TimesheetAlreadyExists(String),
    #[error("Payroll {payroll_id} is {status}; regeneration must be requested explicitly")]
    RequiresRegeneration { payroll_id: String, status: String },
    #[error("{0} not found")]
    NotFound(String),
    #[error("Integrity guard: {0}")]
    IntegrityGuard(String),
    #[error("Storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("Failed to encode or decode {0}")]
    Codec(String),
}

impl PayrollError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PayrollError::Validation(_)
            | PayrollError::NoValidPairs { .. }
            | PayrollError::PendingTimesheets { .. } => ErrorKind::Validation,
            PayrollError::StateConflict(_)
            | PayrollError::TimesheetAlreadyExists(_)
            | PayrollError::RequiresRegeneration { .. } => ErrorKind::StateConflict,
            PayrollError::NotFound(_) => ErrorKind::NotFound,
            PayrollError::IntegrityGuard(_) => ErrorKind::IntegrityGuard,
            PayrollError::Storage(_) | PayrollError::Codec(_) => ErrorKind::Storage,
        }
    }

    /// Validation and state conflicts can be retried or confirmed by the user.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::StateConflict
        )
    }
}

impl From<TransactionError<PayrollError>> for PayrollError {
    fn from(value: TransactionError<PayrollError>) -> Self {
        match value {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => PayrollError::Storage(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, PayrollError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            PayrollError::Validation("amount".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            PayrollError::RequiresRegeneration {
                payroll_id: "p".into(),
                status: "confirmed".into()
            }
            .kind(),
            ErrorKind::StateConflict
        );
        assert_eq!(
            PayrollError::IntegrityGuard("over".into()).kind(),
            ErrorKind::IntegrityGuard
        );
        assert!(!PayrollError::IntegrityGuard("over".into()).is_recoverable());
        assert!(PayrollError::TimesheetAlreadyExists("k".into()).is_recoverable());
    }

    #[test]
    fn aborted_transaction_keeps_inner_error() {
        let err: PayrollError =
            TransactionError::Abort(PayrollError::NotFound("payroll x".into())).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
