//! Error types for vaultwright operations.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`VaultwrightError`].
pub type Result<T> = std::result::Result<T, VaultwrightError>;

/// Errors that can occur while managing Key Vault resources.
///
/// All errors implement `std::error::Error` and can be chained with `source()`.
/// Every error is scoped to a single resource operation; nothing here is fatal
/// to the process.
#[derive(Debug, Error)]
pub enum VaultwrightError {
    /// The remote resource does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote API reported a conflict (HTTP 409), typically a name held
    /// by a soft-deleted item.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A live resource already exists and must be imported before it can be managed.
    #[error("a resource with the ID {id:?} already exists - to be managed via vaultwright this resource needs to be imported ({kind})")]
    AlreadyExists {
        /// Resource kind (e.g. "key_vault_secret")
        kind: String,
        /// Identifier of the existing resource
        id: String,
    },

    /// A soft-deleted vault holds the name and recovery has been disabled.
    #[error("an existing soft-deleted Key Vault exists with the name {name:?} in the location {location:?}, however automatically recovering it has been disabled - recover it manually and import it, or pick a different name/location")]
    SoftDeleted {
        /// Vault name
        name: String,
        /// Azure location
        location: String,
    },

    /// Resource name failed validation.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Resource identifier could not be parsed.
    #[error("invalid resource ID: {0}")]
    InvalidId(String),

    /// Configuration is inconsistent or violates a constraint.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The remote API returned an error response.
    #[error("unexpected status {status} ({code}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Azure error code
        code: String,
        /// Azure error message
        message: String,
    },

    /// Deadline exceeded while the observed state was still pending.
    #[error("timeout while waiting for state to become '{}' (last state: '{}', timeout: {timeout:?})", .expected.join(", "), .last_state.as_deref().unwrap_or(""))]
    WaitTimeout {
        /// Target states
        expected: Vec<String>,
        /// Last observed state, if any
        last_state: Option<String>,
        /// Configured timeout
        timeout: Duration,
    },

    /// The observed state was neither pending nor a target.
    #[error("unexpected state '{state}', wanted target '{}'", .expected.join(", "))]
    UnexpectedState {
        /// Observed state
        state: String,
        /// Target states
        expected: Vec<String>,
    },

    /// The resource kept reporting "not found" while waiting for it.
    #[error("couldn't find resource ({retries} retries)")]
    NotFoundChecksExceeded {
        /// Number of consecutive not-found observations
        retries: usize,
    },

    /// The remote operation reached a terminal failure state.
    #[error("{0}")]
    StateFailed(String),

    /// An HTTP request could not be completed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A remote operation failed; wraps the cause with what was being done.
    #[error("{operation} {target}: {source}")]
    Operation {
        /// Operation description ("creating", "purging", ...)
        operation: String,
        /// Resource description
        target: String,
        /// Underlying error
        #[source]
        source: Box<VaultwrightError>,
    },

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error (catch-all).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VaultwrightError {
    /// Wraps an error with the operation and resource it belongs to.
    ///
    /// # Example
    ///
    /// ```
    /// use vaultwright::VaultwrightError;
    ///
    /// let err = VaultwrightError::NotFound("secret s1".to_string());
    /// let wrapped = VaultwrightError::op("retrieving", "Secret \"s1\"", err);
    ///
    /// assert_eq!(
    ///     wrapped.to_string(),
    ///     "retrieving Secret \"s1\": not found: secret s1"
    /// );
    /// ```
    pub fn op(
        operation: impl Into<String>,
        target: impl Into<String>,
        err: VaultwrightError,
    ) -> Self {
        Self::Operation {
            operation: operation.into(),
            target: target.into(),
            source: Box::new(err),
        }
    }

    /// Builds the "needs to be imported" error for a live resource.
    pub fn already_exists(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Returns the innermost error, skipping [`Operation`](Self::Operation) wrappers.
    pub fn root(&self) -> &VaultwrightError {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// HTTP status carried by this error, if it came from the remote API.
    pub fn status(&self) -> Option<u16> {
        match self.root() {
            Self::NotFound(_) => Some(404),
            Self::Conflict(_) => Some(409),
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the remote API answered 404.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// True when the remote API answered 409.
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    /// True when the remote API answered 403.
    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(403)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_error_display() {
        let err = VaultwrightError::NotFound("vault v1".to_string());
        assert_eq!(err.to_string(), "not found: vault v1");
    }

    #[test]
    fn test_operation_error() {
        let inner = VaultwrightError::Conflict("secret is soft-deleted".to_string());
        let err = VaultwrightError::op("creating", "Secret \"api-key\"", inner);

        let error_string = err.to_string();
        assert!(error_string.contains("creating"));
        assert!(error_string.contains("api-key"));
        assert!(error_string.contains("soft-deleted"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_status_predicates_see_through_wrappers() {
        let err = VaultwrightError::op(
            "deleting",
            "Key \"k1\"",
            VaultwrightError::op("purging", "Key \"k1\"", VaultwrightError::NotFound("k1".into())),
        );
        assert!(err.is_not_found());
        assert!(!err.is_conflict());

        let forbidden = VaultwrightError::Api {
            status: 403,
            code: "Forbidden".into(),
            message: "caller lacks permission".into(),
        };
        assert!(forbidden.is_forbidden());
        assert_eq!(forbidden.status(), Some(403));
    }

    #[test]
    fn test_wait_timeout_display() {
        let err = VaultwrightError::WaitTimeout {
            expected: vec!["Ready".into()],
            last_state: Some("Provisioning".into()),
            timeout: Duration::from_secs(60),
        };
        let msg = err.to_string();
        assert!(msg.contains("timeout"));
        assert!(msg.contains("Ready"));
        assert!(msg.contains("Provisioning"));
    }

    #[test]
    fn test_validation_errors_have_no_status() {
        let err = VaultwrightError::InvalidName("bad".into());
        assert_eq!(err.status(), None);
        assert!(!err.is_not_found());
    }
}
