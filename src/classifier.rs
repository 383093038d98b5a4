//! Change classifier: reads one page of the queue collection and partitions
//! it into an insert list and a delete list.
//!
//! Records whose status is neither `new` nor `deleted` are dropped on
//! purpose: they land in no list, are counted, and are logged. Records that
//! are kept must carry a usable identity, and `new` records an object
//! payload; a record that does not is rejected, counted and logged at error,
//! and the rest of the page is still reconciled.

use crate::config::QueueFields;
use crate::constants::{ID_FIELD, STATUS_DELETED, STATUS_NEW};
use crate::error::{ReconcileError, ReconcileResult, RunStage};
use crate::store::{CollectionLocation, Document, DocumentId, FindOptions, StoreGateway};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::fmt;

/// Status tag of a queue record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeStatus {
    New,
    Deleted,
    /// Any other tag, including a missing or non-string one
    Unknown(String),
}

impl ChangeStatus {
    pub fn parse(raw: Option<&Value>) -> Self {
        match raw {
            Some(Value::String(s)) if s == STATUS_NEW => ChangeStatus::New,
            Some(Value::String(s)) if s == STATUS_DELETED => ChangeStatus::Deleted,
            Some(Value::String(s)) => ChangeStatus::Unknown(s.clone()),
            Some(other) => ChangeStatus::Unknown(other.to_string()),
            None => ChangeStatus::Unknown(String::new()),
        }
    }
}

/// Which of the two lists a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    Insert,
    Delete,
}

impl ListKind {
    pub fn stage(self) -> RunStage {
        match self {
            ListKind::Insert => RunStage::Insert,
            ListKind::Delete => RunStage::Delete,
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListKind::Insert => f.write_str("insert"),
            ListKind::Delete => f.write_str("delete"),
        }
    }
}

/// One pending change read from the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub id: DocumentId,
    pub status: ChangeStatus,
    /// Document to write; present for `new` records
    pub payload: Option<Document>,
}

impl ChangeRecord {
    /// Document inserted for this record: the payload with `_id` set to the record identity.
    pub fn target_document(&self) -> Document {
        let mut doc = self.payload.clone().unwrap_or_default();
        doc.insert(ID_FIELD.to_string(), Value::String(self.id.to_string()));
        doc
    }
}

/// Ordered records plus the cursor of the next one to process.
///
/// `index` only ever moves forward, one record at a time, and only the
/// reconciliation engine moves it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationList {
    kind: ListKind,
    records: Vec<ChangeRecord>,
    index: usize,
}

impl ReconciliationList {
    pub fn new(kind: ListKind, records: Vec<ChangeRecord>) -> Self {
        Self {
            kind,
            records,
            index: 0,
        }
    }

    pub fn kind(&self) -> ListKind {
        self.kind
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn is_complete(&self) -> bool {
        self.index >= self.records.len()
    }

    /// Record under the cursor, or `None` once the list is complete.
    pub fn current(&self) -> Option<&ChangeRecord> {
        self.records.get(self.index)
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub(crate) fn advance(&mut self) {
        debug_assert!(self.index < self.records.len());
        self.index += 1;
    }
}

/// Result of classifying one queue page.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub inserts: ReconciliationList,
    pub deletes: ReconciliationList,
    /// Records with an unrecognised status
    pub dropped: usize,
    /// Kept-status records with an unusable identity or payload
    pub rejected: usize,
}

/// Reads and partitions the queue.
pub struct ChangeClassifier<'a> {
    fields: &'a QueueFields,
}

impl<'a> ChangeClassifier<'a> {
    pub fn new(fields: &'a QueueFields) -> Self {
        Self { fields }
    }

    /// Reads up to `page_limit` queue records and partitions them.
    pub async fn classify<G>(
        &self,
        gateway: &G,
        queue: &CollectionLocation,
        page_limit: usize,
    ) -> ReconcileResult<Classification>
    where
        G: StoreGateway + ?Sized,
    {
        let options = FindOptions::new()
            .exclude(ID_FIELD)
            .skip(0)
            .limit(page_limit);
        let docs = gateway
            .find(queue, &options)
            .await
            .map_err(ReconcileError::Classify)?;

        info!("Read {} queue records from {}", docs.len(), queue);
        if docs.len() == page_limit {
            warn!(
                "Queue page is full ({} records); remaining records wait for the next run",
                page_limit
            );
        }

        Ok(self.partition(docs))
    }

    /// Partitions already-read queue documents, keeping their order.
    pub fn partition(&self, docs: Vec<Document>) -> Classification {
        let mut inserts = Vec::new();
        let mut deletes = Vec::new();
        let mut dropped = 0;
        let mut rejected = 0;

        for (position, doc) in docs.into_iter().enumerate() {
            let record = match ChangeStatus::parse(doc.get(&self.fields.status)) {
                ChangeStatus::New => self.new_record(doc),
                ChangeStatus::Deleted => self.identity(&doc).map(|id| ChangeRecord {
                    id,
                    status: ChangeStatus::Deleted,
                    payload: None,
                }),
                ChangeStatus::Unknown(tag) => {
                    debug!("Dropping queue record {} with status '{}'", position, tag);
                    dropped += 1;
                    continue;
                }
            };

            match record {
                Ok(record) if record.status == ChangeStatus::New => inserts.push(record),
                Ok(record) => deletes.push(record),
                Err(reason) => {
                    error!("Rejecting queue record {}: {}", position, reason);
                    rejected += 1;
                }
            }
        }

        if dropped > 0 {
            warn!("Dropped {} queue records with unrecognised status", dropped);
        }
        if rejected > 0 {
            warn!(
                "Rejected {} queue records with an unusable identity or payload",
                rejected
            );
        }
        info!(
            "Classified queue: {} to insert, {} to delete",
            inserts.len(),
            deletes.len()
        );

        Classification {
            inserts: ReconciliationList::new(ListKind::Insert, inserts),
            deletes: ReconciliationList::new(ListKind::Delete, deletes),
            dropped,
            rejected,
        }
    }

    fn identity(&self, doc: &Document) -> Result<DocumentId, String> {
        match doc.get(&self.fields.id) {
            Some(Value::String(raw)) => {
                DocumentId::parse(raw).map_err(|e| format!("field '{}': {}", self.fields.id, e))
            }
            Some(other) => Err(format!(
                "field '{}' must be a string, got {}",
                self.fields.id, other
            )),
            None => Err(format!("missing identity field '{}'", self.fields.id)),
        }
    }

    fn new_record(&self, mut doc: Document) -> Result<ChangeRecord, String> {
        let id = self.identity(&doc)?;
        let payload = match doc.remove(&self.fields.payload) {
            Some(Value::Object(payload)) => payload,
            Some(other) => {
                return Err(format!(
                    "payload field '{}' must be a document, got {}",
                    self.fields.payload, other
                ))
            }
            None => return Err(format!("missing payload field '{}'", self.fields.payload)),
        };

        if let Some(payload_id) = payload.get(ID_FIELD) {
            if payload_id.as_str() != Some(id.as_str()) {
                return Err(format!(
                    "payload {} {} does not match record identity '{}'",
                    ID_FIELD, payload_id, id
                ));
            }
        }

        Ok(ChangeRecord {
            id,
            status: ChangeStatus::New,
            payload: Some(payload),
        })
    }
}
