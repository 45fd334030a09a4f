use thiserror::Error;
use uuid::Uuid;

/// Failures reported by a remote collaborator (row store, blob storage, auth).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("could not decode response: {0}")]
    Decode(String),
}

/// Local checks run before anything goes over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("email must not be empty")]
    EmptyEmail,
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("password must be at least {min} characters")]
    PasswordTooShort { min: usize },
    #[error("unknown category: {0}")]
    UnknownCategory(String),
    #[error("task has no due date")]
    MissingDueDate,
}

/// Errors surfaced by the entity cache at its operation boundary.
///
/// Raw gateway failures never escape as-is: a transport or status failure
/// becomes `Fetch`, a store call that affected zero rows becomes `Denied`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("request failed: {0}")]
    Fetch(#[from] GatewayError),
    #[error("operation on {id} was denied or the item no longer exists")]
    Denied { id: Uuid },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("another change to {id} is still in progress")]
    Busy { id: Uuid },
    #[error("no cached entity with id {id}")]
    UnknownEntity { id: Uuid },
    #[error("cache has been disposed")]
    Closed,
}

impl CacheError {
    /// Wording suitable for an alert or inline message.
    pub fn user_message(&self) -> String {
        match self {
            Self::Fetch(GatewayError::PermissionDenied(_)) => {
                "You are not signed in or your session has expired.".to_string()
            }
            Self::Fetch(e) => format!("Could not reach the server ({}). Please try again.", e),
            Self::Denied { .. } => {
                "You don't have permission, or the item no longer exists.".to_string()
            }
            Self::Validation(e) => {
                let mut msg = e.to_string();
                if let Some(first) = msg.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                msg.push('.');
                msg
            }
            Self::Busy { .. } => "Please wait for the previous change to finish.".to_string(),
            Self::UnknownEntity { .. } => "That item is no longer in the list.".to_string(),
            Self::Closed => "The session has ended. Please sign in again.".to_string(),
        }
    }
}

/// Best-effort blob removal failure. Logged, never returned to callers of a save or delete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not remove {} blob(s): {source}", paths.len())]
pub struct BlobCleanupError {
    pub paths: Vec<String>,
    pub source: GatewayError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_convert_to_fetch() {
        let err: CacheError = GatewayError::Transport("timed out".into()).into();
        assert!(matches!(err, CacheError::Fetch(GatewayError::Transport(_))));
        assert!(err.user_message().contains("timed out"));
    }

    #[test]
    fn denial_message_is_distinct() {
        let err = CacheError::Denied { id: Uuid::new_v4() };
        assert_eq!(
            err.user_message(),
            "You don't have permission, or the item no longer exists."
        );
    }

    #[test]
    fn validation_message_is_capitalized() {
        let err = CacheError::from(ValidationError::EmptyTitle);
        assert_eq!(err.user_message(), "Title must not be empty.");
    }
}
