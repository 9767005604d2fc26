//! In-process [`DocumentStoreApi`] implementation.
//!
//! Behaves like the remote content API (compare-and-swap writes, conditional
//! reads, base64 payloads at rest) and adds failure injection and call
//! counters so queue and cache behavior can be exercised deterministically.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::encoding::{decode_content, encode_content};
use super::{DocumentStoreApi, ReadOutcome, RemoteObject, RemoteStoreError, VersionToken};

#[derive(Debug, Clone)]
struct StoredObject {
    encoded: String,
    sha: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: HashMap<String, StoredObject>,
    version_counter: u64,
    reads: u64,
    heads: u64,
    writes: u64,
    pending_conflicts: u32,
    always_conflict: bool,
    write_failure: Option<RemoteStoreError>,
    held_read: Option<HeldRead>,
}

#[derive(Debug)]
struct HeldRead {
    entered: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// Handle on a read parked by [`InMemoryDocumentStore::hold_next_read`].
#[derive(Debug)]
pub struct ReadGate {
    entered: Option<oneshot::Receiver<()>>,
    release: oneshot::Sender<()>,
}

impl ReadGate {
    /// Waits until the held read has captured the file's state.
    pub async fn entered(&mut self) {
        if let Some(entered) = self.entered.take() {
            let _ = entered.await;
        }
    }

    /// Lets the held read return what it captured.
    pub fn release(self) {
        let _ = self.release.send(());
    }
}

impl MemoryState {
    fn next_sha(&mut self) -> String {
        self.version_counter += 1;
        format!("mem-{:08}", self.version_counter)
    }
}

/// Shared in-memory store. Clones observe the same files.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `content` unconditionally, bypassing failure injection and
    /// counters. Simulates a change made by another process.
    pub fn seed(&self, path: &str, content: &str) -> VersionToken {
        let mut state = self.state.lock();
        let sha = state.next_sha();
        state.objects.insert(
            path.to_string(),
            StoredObject {
                encoded: encode_content(content),
                sha: sha.clone(),
            },
        );
        VersionToken::new(sha)
    }

    /// Current decoded content of `path`.
    pub fn content(&self, path: &str) -> Option<String> {
        let state = self.state.lock();
        let object = state.objects.get(path)?;
        decode_content(&object.encoded).ok()
    }

    /// Current token of `path`.
    pub fn token(&self, path: &str) -> Option<VersionToken> {
        let state = self.state.lock();
        state
            .objects
            .get(path)
            .map(|object| VersionToken::new(object.sha.clone()))
    }

    /// Makes the next `count` writes fail with a conflict.
    pub fn fail_next_conflicts(&self, count: u32) {
        self.state.lock().pending_conflicts = count;
    }

    /// Makes every write fail with a conflict while set.
    pub fn set_always_conflict(&self, enabled: bool) {
        self.state.lock().always_conflict = enabled;
    }

    /// Makes every write fail with `error` while set.
    pub fn fail_writes_with(&self, error: Option<RemoteStoreError>) {
        self.state.lock().write_failure = error;
    }

    /// Parks the next `read_object` after it has captured the file's state,
    /// so its answer reaches the caller only once the gate is released.
    pub fn hold_next_read(&self) -> ReadGate {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.state.lock().held_read = Some(HeldRead {
            entered: entered_tx,
            release: release_rx,
        });
        ReadGate {
            entered: Some(entered_rx),
            release: release_tx,
        }
    }

    /// Number of `read_object` calls.
    pub fn read_count(&self) -> u64 {
        self.state.lock().reads
    }

    /// Number of `head_object` calls.
    pub fn head_count(&self) -> u64 {
        self.state.lock().heads
    }

    /// Number of `write_object` calls, including failed attempts.
    pub fn write_count(&self) -> u64 {
        self.state.lock().writes
    }

    /// Total remote calls of any kind.
    pub fn call_count(&self) -> u64 {
        let state = self.state.lock();
        state.reads + state.heads + state.writes
    }

    fn read_locked(
        state: &MemoryState,
        path: &str,
        known: Option<&VersionToken>,
    ) -> Result<ReadOutcome, RemoteStoreError> {
        let Some(object) = state.objects.get(path) else {
            return Err(RemoteStoreError::NotFound);
        };

        if known.is_some_and(|token| token.sha == object.sha) {
            return Ok(ReadOutcome::NotModified);
        }

        let content = decode_content(&object.encoded)
            .map_err(|e| RemoteStoreError::Internal(e.to_string()))?;
        Ok(ReadOutcome::Modified(RemoteObject {
            content,
            token: VersionToken::new(object.sha.clone()),
        }))
    }
}

#[async_trait]
impl DocumentStoreApi for InMemoryDocumentStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn read_object(
        &self,
        path: &str,
        known: Option<&VersionToken>,
    ) -> Result<ReadOutcome, RemoteStoreError> {
        let (outcome, held) = {
            let mut state = self.state.lock();
            state.reads += 1;
            let held = state.held_read.take();
            (Self::read_locked(&state, path, known), held)
        };

        if let Some(held) = held {
            let _ = held.entered.send(());
            let _ = held.release.await;
        }
        outcome
    }

    async fn head_object(&self, path: &str) -> Result<Option<VersionToken>, RemoteStoreError> {
        let mut state = self.state.lock();
        state.heads += 1;
        Ok(state
            .objects
            .get(path)
            .map(|object| VersionToken::new(object.sha.clone())))
    }

    async fn write_object(
        &self,
        path: &str,
        content: &str,
        expected: Option<&VersionToken>,
    ) -> Result<VersionToken, RemoteStoreError> {
        let mut state = self.state.lock();
        state.writes += 1;

        if let Some(err) = state.write_failure.clone() {
            return Err(err);
        }
        if state.always_conflict {
            return Err(RemoteStoreError::Conflict);
        }
        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            return Err(RemoteStoreError::Conflict);
        }

        let current = state.objects.get(path).map(|object| object.sha.as_str());
        let matches = match (current, expected) {
            (None, None) => true,
            (Some(current), Some(expected)) => current == expected.sha,
            _ => false,
        };
        if !matches {
            return Err(RemoteStoreError::Conflict);
        }

        let sha = state.next_sha();
        state.objects.insert(
            path.to_string(),
            StoredObject {
                encoded: encode_content(content),
                sha: sha.clone(),
            },
        );
        Ok(VersionToken::new(sha))
    }
}
