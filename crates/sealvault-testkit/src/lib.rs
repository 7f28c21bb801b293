//! # SealVault Testkit
//!
//! Testing utilities for SealVault.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: A vault on a manual clock with handles to its stores
//! - **Faults**: Store wrappers that fail or stall writes on demand
//! - **Generators**: Proptest strategies, including random vault workloads
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use sealvault_testkit::fixtures::{parties, TestVault, DAY_SECS};
//! use sealvault::FileScope;
//!
//! async fn example() {
//!     let tv = TestVault::new().await;
//!     let (alice, doctor, _) = parties();
//!     let file = tv.seal(&alice, "report-A", b"report-A").await;
//!     let cap = tv
//!         .approved_capability(&alice, &doctor, FileScope::files([file.id]), DAY_SECS)
//!         .await;
//!     tv.advance_secs(2 * DAY_SECS);
//!     let decision = tv.vault.check_access(cap.id, &file.id).await.unwrap();
//!     assert!(!decision.is_authorized());
//! }
//! ```
//!
//! ## Failure Injection
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sealvault_store::MemoryLedgerStore;
//! use sealvault_testkit::faults::FlakyLedgerStore;
//!
//! let ledger = FlakyLedgerStore::failing(Arc::new(MemoryLedgerStore::new()), 2);
//! ledger.fail_always();
//! ```

pub mod faults;
pub mod fixtures;
pub mod generators;

pub use faults::{FlakyContentStore, FlakyLedgerStore};
pub use fixtures::{fast_config, parties, principal, TestVault, Workload, DAY_SECS, START_MILLIS};
pub use generators::{workload, VaultOp};
