//! CareHub collection store
//!
//! This crate persists the platform's state as per-collection JSON arrays kept
//! in a version-controlled repository and accessed through a content API. It
//! provides collection-oriented CRUD on top of that file-level storage:
//!
//! - **Optimistic concurrency**: every write is a compare-and-swap on the
//!   file's version token
//! - **Read cache**: per-collection snapshots with conditional refresh
//! - **Write queue**: a single worker serializes remote writes and retries
//!   conflicts a bounded number of times
//! - **Schemas**: required fields and defaults applied at write time
//! - **Audit and subscriptions**: in-memory audit trail and change callbacks
//!
//! # Backend Features
//!
//! - `github` (default) - GitHub-style repository contents API via `reqwest`
//!
//! [`remote::memory::InMemoryDocumentStore`] is always available for tests
//! and local development.
//!
//! # Architecture
//!
//! - [`store`] - The [`CollectionStore`] façade consumers call
//! - [`cache`] - Snapshot cache with optimistic staging
//! - [`queue`] - Serialized write queue with conflict retry
//! - [`remote`] - Remote document store trait and implementations
//! - [`schema`] - Schema registry and the built-in platform catalog
//! - [`error`] - Error types for all operations
//!
//! # Writes are two-phase
//!
//! Mutations return a [`StagedWrite`]. The change is visible to readers of the
//! same store immediately; [`StagedWrite::durable`] resolves once the write
//! queue has stored it, or with the error that made it give up.
//!
//! ```no_run
//! use carehub_persistence::schema::catalog::platform_schemas;
//! use carehub_persistence::{CollectionStore, StoreConfig};
//! use serde_json::json;
//!
//! # async fn book() -> Result<(), carehub_persistence::StorageError> {
//! let mut config = StoreConfig::new("carehub", "platform-data");
//! config.auth_token = std::env::var("GITHUB_TOKEN").ok();
//! let store = CollectionStore::github(config, platform_schemas())?;
//!
//! let staged = store
//!     .insert(
//!         "appointments",
//!         json!({"patient_id": "12", "doctor_id": "3", "date": "2026-11-02", "time": "09:30"}),
//!     )
//!     .await?;
//! println!("booked {}", staged.value()["id"]);
//! staged.durable().await?;
//! # Ok(())
//! # }
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

pub mod audit;
pub mod cache;
pub mod collaborators;
pub mod config;
pub mod document;
pub mod error;
pub mod queue;
pub mod remote;
pub mod schema;
pub mod store;
pub mod subscribe;

// Re-export commonly used types at crate root
pub use audit::{AuditAction, AuditEntry};
pub use config::StoreConfig;
pub use document::Document;
pub use error::{StorageError, StorageResult};
pub use queue::{PendingWrite, WriteReceipt};
pub use remote::{DocumentStoreApi, VersionToken};
pub use schema::{FieldType, SchemaDefinition, SchemaRegistry};
pub use store::{CollectionStore, Filter, StagedWrite};
pub use subscribe::SubscriptionId;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
