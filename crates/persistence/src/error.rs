//! Error types for the collection store.
//!
//! Errors are organised the same way callers are expected to handle them:
//! validation and not-found errors are reported synchronously and never
//! retried, concurrency errors surface only once the write queue has given up,
//! and backend errors cover every other remote or local failure.

use thiserror::Error;

use crate::remote::RemoteStoreError;

/// The primary error type for all store operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Schema and naming errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Document state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Concurrency and write-queue errors
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    /// Remote store and encoding errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors raised while validating a candidate document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A schema-required field is absent or `null`.
    #[error("missing required field '{field}' in collection '{collection}'")]
    MissingRequiredField { collection: String, field: String },

    /// The collection name cannot be mapped onto a store path.
    #[error("invalid collection name: '{name}'")]
    InvalidCollectionName { name: String },

    /// The payload handed to a mutating operation was not a JSON object.
    #[error("document for collection '{collection}' must be a JSON object")]
    NotAnObject { collection: String },

    /// The largest stored numeric id leaves no room for another one.
    #[error("no sequential id left in collection '{collection}'")]
    IdSpaceExhausted { collection: String },
}

/// Errors related to document state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// No document in the collection carries the given `id` or `uid`.
    #[error("document not found: {collection}/{key}")]
    NotFound { collection: String, key: String },
}

/// Errors related to optimistic concurrency.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConcurrencyError {
    /// Every write attempt hit a stale concurrency token.
    #[error("write to '{collection}' abandoned after {attempts} conflicting attempts")]
    RetriesExhausted { collection: String, attempts: u32 },

    /// A conditional update found the document in an unexpected state.
    #[error("precondition failed for {collection}/{key}")]
    PreconditionFailed { collection: String, key: String },
}

/// Errors originating from the remote store or local plumbing.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The remote store rejected or failed a request.
    #[error("{backend_name} request failed: {message}")]
    Transport {
        backend_name: String,
        message: String,
        #[source]
        source: Option<RemoteStoreError>,
    },

    /// Collection content could not be (de)serialized.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Transport encoding was malformed.
    #[error("content encoding error: {message}")]
    Encoding { message: String },

    /// The write queue worker is no longer running.
    #[error("write queue closed before '{collection}' was written")]
    QueueClosed { collection: String },

    /// Store configuration is unusable.
    #[error("invalid store configuration: {message}")]
    InvalidConfig { message: String },

    /// Internal store error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Result type alias for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Wraps a remote store failure that the caller must see.
    pub(crate) fn transport(backend_name: &str, err: RemoteStoreError) -> Self {
        StorageError::Backend(BackendError::Transport {
            backend_name: backend_name.to_string(),
            message: err.to_string(),
            source: Some(err),
        })
    }

    /// Returns true for errors that a caller could reasonably retry later.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Concurrency(ConcurrencyError::RetriesExhausted { .. }) => true,
            StorageError::Backend(BackendError::Transport {
                source: Some(source),
                ..
            }) => matches!(
                source,
                RemoteStoreError::Throttled(_) | RemoteStoreError::Unavailable(_)
            ),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::Serialization {
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = StorageError::Validation(ValidationError::MissingRequiredField {
            collection: "appointments".to_string(),
            field: "patient_id".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "missing required field 'patient_id' in collection 'appointments'"
        );
    }

    #[test]
    fn test_not_found_display() {
        let err = StorageError::Resource(ResourceError::NotFound {
            collection: "doctors".to_string(),
            key: "42".to_string(),
        });
        assert_eq!(err.to_string(), "document not found: doctors/42");
    }

    #[test]
    fn test_retries_exhausted_is_retryable() {
        let err: StorageError = ConcurrencyError::RetriesExhausted {
            collection: "orders".to_string(),
            attempts: 5,
        }
        .into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("5 conflicting attempts"));
    }

    #[test]
    fn test_transport_error_classification() {
        let throttled = StorageError::transport("github", RemoteStoreError::Throttled("slow".into()));
        assert!(throttled.is_retryable());

        let internal = StorageError::transport("github", RemoteStoreError::Internal("boom".into()));
        assert!(!internal.is_retryable());
        assert!(internal.to_string().starts_with("github request failed"));
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: StorageError = parse_err.into();
        assert!(matches!(
            err,
            StorageError::Backend(BackendError::Serialization { .. })
        ));
    }
}
