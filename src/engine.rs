//! Reconciliation engine.
//!
//! Each list is driven through the same state machine, one record per step:
//! look the record's identity up in the target, then delete it (delete list)
//! or insert its payload (insert list) unless the target is already in the
//! desired state. Skips advance the cursor just like mutations do. Any store
//! failure freezes the cursor on the failing record and ends the list.
//!
//! Because the target, not the queue, decides whether a change has been
//! applied, re-running over the same queue only applies what is missing.

use crate::classifier::{ChangeRecord, ListKind, ReconciliationList};
use crate::error::{ReconcileError, ReconcileResult};
use crate::store::{CollectionLocation, DocumentId, StoreGateway};
use log::{info, warn};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListState {
    Running,
    Done,
    Failed,
}

/// What one step did to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Inserted { acknowledged: bool, affected: u64 },
    Deleted { acknowledged: bool, affected: u64 },
    /// Insert skipped, target already present
    SkippedExists,
    /// Delete skipped, target already absent
    SkippedAbsent,
}

/// Kind of a [`StepAction`], without the store's counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Inserted,
    Deleted,
    SkippedExists,
    SkippedAbsent,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Inserted => "inserted",
            ActionKind::Deleted => "deleted",
            ActionKind::SkippedExists => "skipped-exists",
            ActionKind::SkippedAbsent => "skipped-absent",
        }
    }
}

impl StepAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            StepAction::Inserted { .. } => ActionKind::Inserted,
            StepAction::Deleted { .. } => ActionKind::Deleted,
            StepAction::SkippedExists => ActionKind::SkippedExists,
            StepAction::SkippedAbsent => ActionKind::SkippedAbsent,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(
            self.kind(),
            ActionKind::SkippedExists | ActionKind::SkippedAbsent
        )
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind().as_str())
    }
}

/// Observable record of one processed list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub list: ListKind,
    /// Cursor position the record was taken from
    pub index: usize,
    pub id: DocumentId,
    pub action: StepAction,
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{} id={} {}", self.list, self.index, self.id, self.action)?;
        match self.action {
            StepAction::Inserted {
                acknowledged,
                affected,
            }
            | StepAction::Deleted {
                acknowledged,
                affected,
            } => write!(f, " affected={} acknowledged={}", affected, acknowledged),
            _ => Ok(()),
        }
    }
}

/// Outcome of driving one list to `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSummary {
    pub kind: ListKind,
    pub count: usize,
    pub index: usize,
    pub reports: Vec<StepReport>,
}

impl ListSummary {
    /// Number of steps whose action was of `kind`.
    pub fn count_of(&self, kind: ActionKind) -> usize {
        self.reports
            .iter()
            .filter(|r| r.action.kind() == kind)
            .count()
    }

    pub fn mutations(&self) -> usize {
        self.reports.iter().filter(|r| !r.action.is_skip()).count()
    }

    pub fn skips(&self) -> usize {
        self.reports.iter().filter(|r| r.action.is_skip()).count()
    }
}

/// Applies reconciliation lists to one target collection.
pub struct ReconciliationEngine<'a, G: StoreGateway + ?Sized> {
    gateway: &'a G,
    target: &'a CollectionLocation,
    /// List that failed and the cursor it froze at
    failed: Option<(ListKind, usize)>,
}

impl<'a, G: StoreGateway + ?Sized> ReconciliationEngine<'a, G> {
    pub fn new(gateway: &'a G, target: &'a CollectionLocation) -> Self {
        Self {
            gateway,
            target,
            failed: None,
        }
    }

    /// Current state of `list` as seen by this engine.
    pub fn state(&self, list: &ReconciliationList) -> ListState {
        if self.failed_at(list.kind()).is_some() {
            ListState::Failed
        } else if list.is_complete() {
            ListState::Done
        } else {
            ListState::Running
        }
    }

    fn failed_at(&self, kind: ListKind) -> Option<usize> {
        match self.failed {
            Some((failed_kind, index)) if failed_kind == kind => Some(index),
            _ => None,
        }
    }

    /// Performs one step. `Ok(None)` means the list is done.
    ///
    /// `Failed` is terminal: once a list has failed, further steps return
    /// [`ReconcileError::Halted`] without touching the store.
    pub async fn step(
        &mut self,
        list: &mut ReconciliationList,
    ) -> ReconcileResult<Option<StepReport>> {
        if let Some(index) = self.failed_at(list.kind()) {
            return Err(ReconcileError::Halted {
                list: list.kind(),
                index,
            });
        }

        let index = list.index();
        let record = match list.current() {
            Some(record) => record.clone(),
            None => return Ok(None),
        };

        let outcome = match list.kind() {
            ListKind::Delete => self.apply_delete(index, &record).await,
            ListKind::Insert => self.apply_insert(index, &record).await,
        };
        let action = match outcome {
            Ok(action) => action,
            Err(err) => {
                self.failed = Some((list.kind(), index));
                return Err(err);
            }
        };

        list.advance();
        let report = StepReport {
            list: list.kind(),
            index,
            id: record.id,
            action,
        };
        match action {
            StepAction::Inserted {
                acknowledged: false,
                ..
            }
            | StepAction::Deleted {
                acknowledged: false,
                ..
            } => warn!("{} (not acknowledged)", report),
            _ => info!("{}", report),
        }
        Ok(Some(report))
    }

    /// Drives `list` until it is done or a step fails.
    pub async fn run_list(&mut self, list: &mut ReconciliationList) -> ReconcileResult<ListSummary> {
        info!(
            "Processing {} list: {} records from index {}",
            list.kind(),
            list.count(),
            list.index()
        );

        let mut reports = Vec::with_capacity(list.count() - list.index());
        while let Some(report) = self.step(list).await? {
            reports.push(report);
        }

        let summary = ListSummary {
            kind: list.kind(),
            count: list.count(),
            index: list.index(),
            reports,
        };
        info!(
            "Finished {} list: {} applied, {} skipped",
            summary.kind,
            summary.mutations(),
            summary.skips()
        );
        Ok(summary)
    }

    async fn target_exists(
        &self,
        list: ListKind,
        index: usize,
        id: &DocumentId,
    ) -> ReconcileResult<bool> {
        self.gateway
            .find_one(self.target, &id.filter())
            .await
            .map(|found| found.is_some())
            .map_err(|source| ReconcileError::Lookup {
                list,
                index,
                id: id.to_string(),
                source,
            })
    }

    async fn apply_delete(&self, index: usize, record: &ChangeRecord) -> ReconcileResult<StepAction> {
        if !self.target_exists(ListKind::Delete, index, &record.id).await? {
            return Ok(StepAction::SkippedAbsent);
        }

        let outcome = self
            .gateway
            .delete_one(self.target, &record.id.filter())
            .await
            .map_err(|source| ReconcileError::Mutation {
                list: ListKind::Delete,
                index,
                id: record.id.to_string(),
                source,
            })?;
        Ok(StepAction::Deleted {
            acknowledged: outcome.acknowledged,
            affected: outcome.deleted_count,
        })
    }

    async fn apply_insert(&self, index: usize, record: &ChangeRecord) -> ReconcileResult<StepAction> {
        if self.target_exists(ListKind::Insert, index, &record.id).await? {
            return Ok(StepAction::SkippedExists);
        }

        let outcome = self
            .gateway
            .insert_one(self.target, record.target_document())
            .await
            .map_err(|source| ReconcileError::Mutation {
                list: ListKind::Insert,
                index,
                id: record.id.to_string(),
                source,
            })?;
        Ok(StepAction::Inserted {
            acknowledged: outcome.acknowledged,
            affected: outcome.inserted_count,
        })
    }
}
