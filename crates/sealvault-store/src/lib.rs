//! # SealVault Store
//!
//! Storage abstraction for SealVault. Provides trait-based interfaces for
//! encrypted blob storage and audit chain persistence, with SQLite and
//! in-memory implementations.
//!
//! ## Key Types
//!
//! - [`ContentStore`] - Content-addressed, write-once blob storage
//! - [`LedgerStore`] - Append-only storage for audit events
//! - [`SqliteStore`] - SQLite-based persistent storage implementing both
//! - [`MemoryContentStore`] / [`MemoryLedgerStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use sealvault_core::hash_content;
//! use sealvault_store::{ContentStore, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("vault.db").unwrap();
//!
//!     let blob = Bytes::from_static(b"nonce||ciphertext");
//!     let hash = hash_content(&blob);
//!     store.put(&hash, blob).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent puts**: Storing the same blob twice returns `AlreadyExists`
//! - **Verified addresses**: A blob whose hash differs from its key is rejected
//! - **Idempotent appends**: Re-appending a stored batch returns `AlreadyPresent`
//! - **Conflict detection**: A batch that does not extend the tail is rejected

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{LedgerError, LedgerResult, Result, StoreError};
pub use memory::{MemoryContentStore, MemoryLedgerStore};
pub use sqlite::SqliteStore;
pub use traits::{AppendResult, ChainTail, ContentStore, LedgerStore, PutResult};
