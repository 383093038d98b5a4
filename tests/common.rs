//! Shared fixtures for the reconciliation integration tests.
//!
//! `TestStore` holds a temporary sled-backed gateway with the stock queue
//! and target locations. `FaultyGateway` wraps any gateway and fails chosen
//! calls, recording every identity it was asked about.

#![allow(dead_code)]

use async_trait::async_trait;
use recovery_sync::{
    CollectionLocation, ConnectionConfig, DeleteOutcome, Document, FindOptions, InsertOutcome,
    SledGateway, StoreError, StoreGateway, StoreResult, SyncConfig,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn init_logging() {
    recovery_sync::logging::init_for_tests();
}

pub fn doc(value: Value) -> Document {
    value.as_object().cloned().expect("fixture must be a JSON object")
}

/// Config pointing at in-memory stores; only locations and fields matter when
/// a gateway is passed to `run_with`.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        connections: vec![
            ConnectionConfig::new("source", "memory:queue"),
            ConnectionConfig::new("destination", "memory:target"),
        ],
        ..SyncConfig::default()
    }
}

pub struct TestStore {
    pub gateway: SledGateway,
    pub queue: CollectionLocation,
    pub target: CollectionLocation,
}

impl TestStore {
    pub fn new() -> Self {
        init_logging();
        let config = SyncConfig::default();
        Self {
            gateway: SledGateway::temporary(&["source", "destination"])
                .expect("Failed to open temporary database"),
            queue: config.queue,
            target: config.target,
        }
    }

    pub async fn enqueue_new(&self, queue_id: &str, id: &str, payload: Value) {
        self.gateway
            .insert_one(
                &self.queue,
                doc(json!({"_id": queue_id, "id": id, "status": "new", "payload": payload})),
            )
            .await
            .unwrap();
    }

    pub async fn enqueue_deleted(&self, queue_id: &str, id: &str) {
        self.gateway
            .insert_one(
                &self.queue,
                doc(json!({"_id": queue_id, "id": id, "status": "deleted"})),
            )
            .await
            .unwrap();
    }

    pub async fn enqueue_raw(&self, record: Value) {
        self.gateway
            .insert_one(&self.queue, doc(record))
            .await
            .unwrap();
    }

    pub async fn seed_target(&self, id: &str, body: Value) {
        let mut document = doc(body);
        document.insert("_id".to_string(), json!(id));
        self.gateway.insert_one(&self.target, document).await.unwrap();
    }

    pub async fn target_doc(&self, id: &str) -> Option<Value> {
        self.gateway
            .find_one(&self.target, &doc(json!({"_id": id})))
            .await
            .unwrap()
            .map(Value::Object)
    }

    /// Whole target collection, in identity order.
    pub async fn target_snapshot(&self) -> Vec<Value> {
        self.gateway
            .find(&self.target, &FindOptions::new())
            .await
            .unwrap()
            .into_iter()
            .map(Value::Object)
            .collect()
    }
}

/// Which call of which operation should fail (0-based per operation).
#[derive(Debug, Default, Clone)]
pub struct Faults {
    pub find: bool,
    pub find_one_at: Option<usize>,
    pub insert_at: Option<usize>,
    pub delete_at: Option<usize>,
    /// Mutations succeed but report `acknowledged: false`
    pub unacknowledged: bool,
}

pub struct FaultyGateway<G> {
    inner: G,
    faults: Faults,
    find_one_calls: AtomicUsize,
    insert_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    /// Identities passed to find_one, in call order
    pub lookups: Mutex<Vec<String>>,
    pub mutations: Mutex<Vec<String>>,
}

impl<G> FaultyGateway<G> {
    pub fn new(inner: G, faults: Faults) -> Self {
        Self {
            inner,
            faults,
            find_one_calls: AtomicUsize::new(0),
            insert_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            lookups: Mutex::new(Vec::new()),
            mutations: Mutex::new(Vec::new()),
        }
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().unwrap().clone()
    }
}

fn id_of(filter: &Document) -> String {
    filter
        .get("_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn injected(operation: &str) -> StoreError {
    StoreError::backend(operation, "injected failure")
}

#[async_trait]
impl<G: StoreGateway> StoreGateway for FaultyGateway<G> {
    async fn find(
        &self,
        location: &CollectionLocation,
        options: &FindOptions,
    ) -> StoreResult<Vec<Document>> {
        if self.faults.find {
            return Err(injected("find"));
        }
        self.inner.find(location, options).await
    }

    async fn find_one(
        &self,
        location: &CollectionLocation,
        filter: &Document,
    ) -> StoreResult<Option<Document>> {
        let call = self.find_one_calls.fetch_add(1, Ordering::SeqCst);
        self.lookups.lock().unwrap().push(id_of(filter));
        if self.faults.find_one_at == Some(call) {
            return Err(injected("find_one"));
        }
        self.inner.find_one(location, filter).await
    }

    async fn insert_one(
        &self,
        location: &CollectionLocation,
        document: Document,
    ) -> StoreResult<InsertOutcome> {
        let call = self.insert_calls.fetch_add(1, Ordering::SeqCst);
        self.mutations
            .lock()
            .unwrap()
            .push(format!("insert:{}", id_of(&document)));
        if self.faults.insert_at == Some(call) {
            return Err(injected("insert_one"));
        }
        let mut outcome = self.inner.insert_one(location, document).await?;
        if self.faults.unacknowledged {
            outcome.acknowledged = false;
        }
        Ok(outcome)
    }

    async fn delete_one(
        &self,
        location: &CollectionLocation,
        filter: &Document,
    ) -> StoreResult<DeleteOutcome> {
        let call = self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.mutations
            .lock()
            .unwrap()
            .push(format!("delete:{}", id_of(filter)));
        if self.faults.delete_at == Some(call) {
            return Err(injected("delete_one"));
        }
        let mut outcome = self.inner.delete_one(location, filter).await?;
        if self.faults.unacknowledged {
            outcome.acknowledged = false;
        }
        Ok(outcome)
    }
}
