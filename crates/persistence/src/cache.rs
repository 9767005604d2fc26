//! Read cache over the remote document store.
//!
//! One entry per collection holds the last known document array, the version
//! token it was read at, and the number of optimistic writes staged but not
//! yet confirmed by the write queue. While writes are pending the cached
//! array is authoritative: reads never go remote, and remote content that
//! arrives in the meantime is not allowed to replace staged state.
//!
//! Every change to an entry stamps it with a fresh generation. A refresh
//! installs what it read only if the entry still carries the generation it
//! saw before going remote, so a slow response can never roll the cache back
//! over a write confirmed in the meantime.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::document::Document;
use crate::error::{BackendError, StorageError, StorageResult};
use crate::remote::{DocumentStoreApi, ReadOutcome, RemoteStoreError, VersionToken};
use crate::subscribe::SubscriberRegistry;

/// Attempts at creating a missing collection file before giving up.
const MAX_SEED_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Default)]
struct CacheEntry {
    documents: Vec<Document>,
    token: Option<VersionToken>,
    pending_writes: usize,
    generation: u64,
}

/// Per-collection snapshot cache.
pub struct CollectionCache {
    remote: Arc<dyn DocumentStoreApi>,
    subscribers: Arc<SubscriberRegistry>,
    entries: RwLock<HashMap<String, CacheEntry>>,
    generations: AtomicU64,
}

impl std::fmt::Debug for CollectionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionCache")
            .field("backend", &self.remote.backend_name())
            .field("collections", &self.entries.read().len())
            .finish()
    }
}

impl CollectionCache {
    pub fn new(remote: Arc<dyn DocumentStoreApi>, subscribers: Arc<SubscriberRegistry>) -> Self {
        Self {
            remote,
            subscribers,
            entries: RwLock::new(HashMap::new()),
            generations: AtomicU64::new(1),
        }
    }

    /// Returns the documents of `collection`, stored at `path`.
    ///
    /// A cached entry is returned as is unless `force` is set; an entry with
    /// pending writes is returned as is even when forced. Otherwise the remote
    /// is read conditionally on the cached token, and a missing file is
    /// created empty.
    pub async fn read(
        &self,
        collection: &str,
        path: &str,
        force: bool,
    ) -> StorageResult<Vec<Document>> {
        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(collection)
                && (!force || entry.pending_writes > 0)
            {
                return Ok(entry.documents.clone());
            }
        }
        self.refresh(collection, path).await
    }

    /// Replaces the cached array with locally staged content and notifies
    /// subscribers. Must be paired with [`write_succeeded`] or
    /// [`write_failed`] once the queued write resolves.
    ///
    /// [`write_succeeded`]: Self::write_succeeded
    /// [`write_failed`]: Self::write_failed
    pub fn stage(&self, collection: &str, documents: Vec<Document>) {
        {
            let mut entries = self.entries.write();
            let entry = entries.entry(collection.to_string()).or_default();
            entry.documents = documents.clone();
            entry.pending_writes += 1;
            entry.generation = self.next_generation();
            debug!(collection, pending = entry.pending_writes, "staged optimistic write");
        }
        self.subscribers.notify(collection, &documents);
    }

    /// Records a confirmed write.
    ///
    /// With other writes still pending only the token advances. Once the
    /// collection has drained, the entry is refreshed from the remote so that
    /// subscribers see the confirmed state.
    pub async fn write_succeeded(&self, collection: &str, path: &str, token: VersionToken) {
        {
            let mut entries = self.entries.write();
            let Some(entry) = entries.get_mut(collection) else {
                return;
            };
            entry.pending_writes = entry.pending_writes.saturating_sub(1);
            entry.generation = self.next_generation();
            if entry.pending_writes > 0 {
                entry.token = Some(token);
                return;
            }
        }

        if let Err(err) = self.refresh(collection, path).await {
            warn!(collection, path, error = %err, "post-write refresh failed");
            if let Some(entry) = self.entries.write().get_mut(collection)
                && entry.pending_writes == 0
            {
                entry.token = Some(token);
            }
        }
    }

    /// Records a write that was abandoned. Once nothing is pending, the
    /// entry is dropped so the next read goes back to the remote.
    pub fn write_failed(&self, collection: &str) {
        let mut entries = self.entries.write();
        let drained = match entries.get_mut(collection) {
            Some(entry) => {
                entry.pending_writes = entry.pending_writes.saturating_sub(1);
                entry.pending_writes == 0
            }
            None => false,
        };
        if drained {
            entries.remove(collection);
            debug!(collection, "cache entry invalidated after failed write");
        }
    }

    /// Drops the entry for `collection` unless writes are pending.
    pub fn invalidate(&self, collection: &str) -> bool {
        let mut entries = self.entries.write();
        match entries.get(collection) {
            Some(entry) if entry.pending_writes == 0 => {
                entries.remove(collection);
                true
            }
            _ => false,
        }
    }

    /// Cached documents, without touching the remote.
    pub fn snapshot(&self, collection: &str) -> Option<Vec<Document>> {
        self.entries
            .read()
            .get(collection)
            .map(|entry| entry.documents.clone())
    }

    pub fn pending_writes(&self, collection: &str) -> usize {
        self.entries
            .read()
            .get(collection)
            .map_or(0, |entry| entry.pending_writes)
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    /// Generation and token of the entry as it stands before going remote.
    fn observe(&self, collection: &str) -> (Option<u64>, Option<VersionToken>) {
        self.entries
            .read()
            .get(collection)
            .map_or((None, None), |entry| (Some(entry.generation), entry.token.clone()))
    }

    async fn refresh(&self, collection: &str, path: &str) -> StorageResult<Vec<Document>> {
        let backend = self.remote.backend_name();
        let mut seed_attempts = 0;

        loop {
            let (observed, known) = self.observe(collection);
            let (documents, token) = match self.remote.read_object(path, known.as_ref()).await {
                Ok(ReadOutcome::NotModified) => {
                    if let Some(documents) = self.snapshot(collection) {
                        return Ok(documents);
                    }
                    // Entry vanished while the request was in flight.
                    continue;
                }
                Ok(ReadOutcome::Modified(object)) => {
                    let documents = parse_collection(collection, &object.content)?;
                    (documents, object.token)
                }
                Err(RemoteStoreError::NotFound) => {
                    seed_attempts += 1;
                    if seed_attempts > MAX_SEED_ATTEMPTS {
                        return Err(StorageError::Backend(BackendError::Internal {
                            message: format!("could not create collection file {path}"),
                        }));
                    }
                    match self.remote.write_object(path, "[]", None).await {
                        Ok(token) => {
                            debug!(collection, path, "created empty collection file");
                            (Vec::new(), token)
                        }
                        // Someone else created it first; read theirs.
                        Err(RemoteStoreError::Conflict) => continue,
                        Err(err) => return Err(StorageError::transport(backend, err)),
                    }
                }
                Err(err) => return Err(StorageError::transport(backend, err)),
            };

            if let Some(current) = self.apply_remote(collection, observed, documents, token) {
                return Ok(current);
            }
        }
    }

    /// Installs remote content read while the entry was at `observed`.
    ///
    /// Staged writes always win. When the entry moved on in the meantime the
    /// read is stale: the newer entry is returned untouched, or `None` if it
    /// has since been dropped and the caller must read again.
    fn apply_remote(
        &self,
        collection: &str,
        observed: Option<u64>,
        documents: Vec<Document>,
        token: VersionToken,
    ) -> Option<Vec<Document>> {
        {
            let mut entries = self.entries.write();
            if let Some(entry) = entries.get(collection)
                && entry.pending_writes > 0
            {
                return Some(entry.documents.clone());
            }
            if entries.get(collection).map(|entry| entry.generation) != observed {
                debug!(collection, "discarding stale remote read");
                return entries.get(collection).map(|entry| entry.documents.clone());
            }
            let generation = self.next_generation();
            let entry = entries.entry(collection.to_string()).or_default();
            entry.documents = documents.clone();
            entry.token = Some(token);
            entry.generation = generation;
        }
        self.subscribers.notify(collection, &documents);
        Some(documents)
    }
}

fn parse_collection(collection: &str, content: &str) -> StorageResult<Vec<Document>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(content).map_err(|e| {
        StorageError::Backend(BackendError::Serialization {
            message: format!("collection '{collection}' is not an array of objects: {e}"),
        })
    })
}
