use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendError;

/// Every way a messaging operation can end other than success.
///
/// `Clone` because one in-flight thread load may be shared by several
/// waiters, each of which receives its own copy of the result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessagingError {
    /// No active session. The caller must re-authenticate.
    #[error("sign in to continue")]
    AuthRequired,

    #[error("request timed out after {0:?}")]
    NetworkTimeout(Duration),

    #[error("server error: {0}")]
    ServerError(String),

    /// The named procedure is not deployed. Handled by fallbacks and never
    /// shown to the user.
    #[error("procedure `{0}` is not available")]
    ProcedureMissing(String),

    /// Duplicate conversation creation. Resolved by re-reading the pair.
    #[error("conversation already exists")]
    Conflict,

    /// Deliberate cancellation, not a failure.
    #[error("request aborted")]
    Aborted,

    #[error("{0}")]
    InvalidInput(String),
}

impl MessagingError {
    /// Whether the user should be offered a retry for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkTimeout(_) | Self::ServerError(_))
    }

    pub fn decode(what: &str, err: serde_json::Error) -> Self {
        Self::ServerError(format!("malformed {} row: {}", what, err))
    }
}

/// SQLSTATE / gateway codes the hosted service uses for a missing function.
const MISSING_PROCEDURE_CODES: &[&str] = &["PGRST202", "42883"];
const MISSING_PROCEDURE_MESSAGE: &str = "Could not find the function";
const UNIQUE_VIOLATION: &str = "23505";
const AUTH_CODES: &[&str] = &["401", "PGRST301"];

impl From<BackendError> for MessagingError {
    fn from(err: BackendError) -> Self {
        if err.is_missing_procedure() {
            Self::ProcedureMissing(err.message)
        } else if err.code == UNIQUE_VIOLATION {
            Self::Conflict
        } else if AUTH_CODES.contains(&err.code.as_str()) {
            Self::AuthRequired
        } else {
            Self::ServerError(err.message)
        }
    }
}

impl BackendError {
    pub fn is_missing_procedure(&self) -> bool {
        MISSING_PROCEDURE_CODES.contains(&self.code.as_str())
            || self.message.contains(MISSING_PROCEDURE_MESSAGE)
    }
}

/// Result of an operation that may have been cancelled.
///
/// Keeping `Aborted` separate from `Failed` means a view can never render a
/// deliberate cancellation as an error banner.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Ok(T),
    Failed(MessagingError),
    Aborted,
}

impl<T> Outcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&MessagingError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl<T> From<Result<T, MessagingError>> for Outcome<T> {
    fn from(result: Result<T, MessagingError>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(MessagingError::Aborted) => Self::Aborted,
            Err(err) => Self::Failed(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_backend_errors() {
        let missing = BackendError::new(
            "PGRST202",
            "Could not find the function public.mark_conversation_read",
        );
        assert!(matches!(
            MessagingError::from(missing),
            MessagingError::ProcedureMissing(_)
        ));

        let by_message = BackendError::new(
            "XX000",
            "Could not find the function public.unread_total(role, account_id)",
        );
        assert!(by_message.is_missing_procedure());

        assert_eq!(
            MessagingError::from(BackendError::new("23505", "duplicate key")),
            MessagingError::Conflict
        );
        assert_eq!(
            MessagingError::from(BackendError::new("PGRST301", "JWT expired")),
            MessagingError::AuthRequired
        );
        assert_eq!(
            MessagingError::from(BackendError::new("XX000", "disk I/O error")),
            MessagingError::ServerError("disk I/O error".into())
        );
    }

    #[test]
    fn aborts_are_not_failures() {
        let outcome: Outcome<()> = Err(MessagingError::Aborted).into();
        assert!(outcome.is_aborted());
        assert!(outcome.error().is_none());

        let outcome: Outcome<()> = Err(MessagingError::NetworkTimeout(Duration::from_secs(12))).into();
        assert!(outcome.error().is_some_and(MessagingError::is_retryable));
    }
}
