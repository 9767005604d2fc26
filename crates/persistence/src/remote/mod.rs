//! Remote document store client.
//!
//! The store persists each collection as a single file in a version-controlled
//! repository. [`DocumentStoreApi`] is the thin transport the rest of the
//! crate talks to: read a file (conditionally), learn its current version
//! token, and write it with compare-and-swap semantics.
//!
//! Two implementations ship with the crate:
//!
//! - [`github::ContentsApiClient`] - GitHub-style contents API over HTTP
//!   (feature `github`)
//! - [`memory::InMemoryDocumentStore`] - in-process store for tests and local
//!   development

pub mod encoding;
#[cfg(feature = "github")]
pub mod github;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Concurrency token identifying the exact remote state of a file.
///
/// `sha` is the content hash writes are predicated on. `etag` is an optional
/// transport-level validator used to make conditional reads cheaper.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionToken {
    pub sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl VersionToken {
    pub fn new(sha: impl Into<String>) -> Self {
        Self {
            sha: sha.into(),
            etag: None,
        }
    }

    pub fn with_etag(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }
}

/// Decoded file content together with its version token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub content: String,
    pub token: VersionToken,
}

/// Result of a conditional read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The file differs from the known token (or no token was supplied).
    Modified(RemoteObject),
    /// The file still matches the known token.
    NotModified,
}

/// Failures reported by a [`DocumentStoreApi`] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteStoreError {
    /// The file does not exist.
    #[error("object not found")]
    NotFound,
    /// The supplied token does not match the file's current token.
    #[error("version token conflict")]
    Conflict,
    /// The remote rate-limited the request.
    #[error("throttled: {0}")]
    Throttled(String),
    /// The remote could not be reached or failed transiently.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// The request was rejected as malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Anything else.
    #[error("internal: {0}")]
    Internal(String),
}

/// Read/write access to files in the backing repository.
#[async_trait]
pub trait DocumentStoreApi: Send + Sync {
    /// Short backend name used in logs and errors.
    fn backend_name(&self) -> &'static str;

    /// Reads `path`, answering [`ReadOutcome::NotModified`] when the file
    /// still matches `known`.
    async fn read_object(
        &self,
        path: &str,
        known: Option<&VersionToken>,
    ) -> Result<ReadOutcome, RemoteStoreError>;

    /// Returns the current token of `path`, or `None` if it does not exist.
    async fn head_object(&self, path: &str) -> Result<Option<VersionToken>, RemoteStoreError>;

    /// Writes `content` to `path` if its current token is `expected`.
    ///
    /// `expected == None` means "create": it conflicts when the file exists.
    /// A stale or missing token yields [`RemoteStoreError::Conflict`].
    async fn write_object(
        &self,
        path: &str,
        content: &str,
        expected: Option<&VersionToken>,
    ) -> Result<VersionToken, RemoteStoreError>;
}
