//! Store gateway: the document-store capability the reconciliation runs against.
//!
//! The [`StoreGateway`] trait exposes `find`, `find_one`, `insert_one` and
//! `delete_one` against a [`CollectionLocation`]. Missing documents are a
//! normal `Ok(None)` outcome; only connectivity and query failures are
//! errors. Idempotency is the caller's job, so every operation is safe to
//! repeat with identical arguments.

pub mod query;
pub mod sled_gateway;

pub use sled_gateway::SledGateway;

use crate::constants::ID_FIELD;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A stored document: a JSON object.
pub type Document = serde_json::Map<String, Value>;

/// Logical connection + database + collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionLocation {
    pub connection: String,
    pub database: String,
    pub collection: String,
}

impl CollectionLocation {
    pub fn new(
        connection: impl Into<String>,
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            connection: connection.into(),
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Backend namespace holding this collection.
    pub fn namespace(&self) -> String {
        format!("{}/{}", self.database, self.collection)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.connection.trim().is_empty() {
            return Err("connection must not be empty".to_string());
        }
        if self.database.trim().is_empty() || self.collection.trim().is_empty() {
            return Err("database and collection must not be empty".to_string());
        }
        if self.database.contains('/') {
            return Err(format!("database name '{}' must not contain '/'", self.database));
        }
        Ok(())
    }
}

impl fmt::Display for CollectionLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.connection, self.database, self.collection)
    }
}

/// Native identity of a target document, stored under `_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Validates a raw identity string.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        if raw.trim().is_empty() {
            return Err(StoreError::InvalidDocument(
                "identity must not be empty".to_string(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    /// Reads the `_id` of a document, if it is a usable string identity.
    pub fn of(doc: &Document) -> Option<Self> {
        doc.get(ID_FIELD)
            .and_then(Value::as_str)
            .and_then(|raw| Self::parse(raw).ok())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identity-keyed filter `{ "_id": <id> }`.
    pub fn filter(&self) -> Document {
        let mut filter = Document::new();
        filter.insert(ID_FIELD.to_string(), Value::String(self.0.clone()));
        filter
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Arguments of a multi-document read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub filter: Document,
    /// Empty means store order
    pub sort: Vec<(String, SortDirection)>,
    pub projection: Document,
    pub skip: usize,
    /// Zero means unbounded
    pub limit: usize,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Document) -> Self {
        self.filter = filter;
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push((field.into(), direction));
        self
    }

    /// Leaves `field` out of every returned document.
    pub fn exclude(mut self, field: impl Into<String>) -> Self {
        self.projection.insert(field.into(), Value::from(0));
        self
    }

    pub fn include(mut self, field: impl Into<String>) -> Self {
        self.projection.insert(field.into(), Value::from(1));
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOutcome {
    pub acknowledged: bool,
    pub inserted_count: u64,
    pub inserted_id: DocumentId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

/// Single-document operations against named collections.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// Reads documents matching `options`.
    async fn find(
        &self,
        location: &CollectionLocation,
        options: &FindOptions,
    ) -> StoreResult<Vec<Document>>;

    /// Reads the first document matching `filter`; `Ok(None)` when there is none.
    async fn find_one(
        &self,
        location: &CollectionLocation,
        filter: &Document,
    ) -> StoreResult<Option<Document>>;

    /// Inserts `document`, never overwriting an existing identity.
    async fn insert_one(
        &self,
        location: &CollectionLocation,
        document: Document,
    ) -> StoreResult<InsertOutcome>;

    /// Removes the first document matching `filter`, if any.
    async fn delete_one(
        &self,
        location: &CollectionLocation,
        filter: &Document,
    ) -> StoreResult<DeleteOutcome>;
}
