//! Exchange Reconcile
//!
//! Batch reconciliation and migration for the exchange-program entity store.
//! Each pass scans whole collections, plans corrective operations, applies
//! them in small atomic chunks and verifies the result.
//!
//! ## Passes
//!
//! - `duplicate-users` / `duplicate-profiles` - collapse equivalent records
//! - `orphan-profiles` - remove profiles whose user is gone
//! - `fix-approvals` / `fix-change-queue` - repair review metadata
//! - `migrate-comprehensive` - move embedded application data into applications
//! - `check-references` - report dangling references, never writes
//!
//! Every pass is idempotent: a second run against the corrected store plans
//! nothing.

pub mod config;
pub mod consistency;
pub mod dedup;
pub mod error;
pub mod executor;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod operation;
pub mod passes;
pub mod references;
pub mod report;
pub mod runner;
pub mod scanner;
pub mod store;
pub mod verify;

pub use error::{ReconcileError, Result, TransformError};
pub use executor::{BatchExecutor, ExecutionSummary, ExecutorConfig};
pub use operation::{Operation, OperationGroup, OperationKind};
pub use passes::{Detection, Pass, PassSettings};
pub use report::{PassReport, RunSummary};
pub use runner::Reconciler;
pub use store::{Entity, EntityStore, EntityType, Filter, HttpStore, MemoryStore, Snapshot};
