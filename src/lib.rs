//! # recovery_sync
//!
//! Reconciles a target document collection with a queue of pending change
//! records. Each queue record is tagged `new` (insert its payload) or
//! `deleted` (remove the identity); a run applies the deletes, then the
//! inserts, one record at a time, checking the target before every change so
//! that re-running over the same queue never duplicates an effect.
//!
//! ```rust,no_run
//! use recovery_sync::{RunController, SyncConfigLoader};
//!
//! # async fn run() -> Result<(), recovery_sync::ReconcileError> {
//! let config = SyncConfigLoader::new().load(None)?;
//! let report = RunController::new(config).run().await?;
//! println!("inserted {}", report.inserts.mutations());
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod config;
pub mod constants;
pub mod controller;
pub mod engine;
pub mod error;
pub mod logging;
pub mod store;

pub use classifier::{
    ChangeClassifier, ChangeRecord, ChangeStatus, Classification, ListKind, ReconciliationList,
};
pub use config::{ConnectionConfig, LoggingSettings, QueueFields, SyncConfig, SyncConfigLoader};
pub use controller::{RunController, RunReport};
pub use engine::{
    ActionKind, ListState, ListSummary, ReconciliationEngine, StepAction, StepReport,
};
pub use error::{ReconcileError, ReconcileResult, RunStage, StoreError, StoreResult};
pub use store::{
    CollectionLocation, DeleteOutcome, Document, DocumentId, FindOptions, InsertOutcome,
    SledGateway, SortDirection, StoreGateway,
};
