use super::query::{self, identity_key, Projection};
use super::{
    CollectionLocation, DeleteOutcome, Document, DocumentId, FindOptions, InsertOutcome,
    StoreGateway,
};
use crate::config::ConnectionConfig;
use crate::constants::{ID_FIELD, MEMORY_ADDRESS_PREFIX};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use tokio::task;

/// Embedded document store on sled.
///
/// Each logical connection name maps to a `sled::Db`; connections with the
/// same address share one database. Each `database/collection` pair is a
/// tree keyed by document identity, holding JSON-encoded documents.
#[derive(Clone)]
pub struct SledGateway {
    connections: HashMap<String, sled::Db>,
}

fn open_db(address: &str) -> Result<sled::Db, sled::Error> {
    if address.starts_with(MEMORY_ADDRESS_PREFIX) {
        sled::Config::new().temporary(true).open()
    } else {
        sled::open(address)
    }
}

fn decode(bytes: &[u8]) -> StoreResult<Document> {
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Object(doc) => Ok(doc),
        other => Err(StoreError::InvalidDocument(format!(
            "stored value is not a document: {}",
            other
        ))),
    }
}

impl SledGateway {
    /// Opens every configured connection, each bounded by its connect timeout.
    pub async fn connect(configs: &[ConnectionConfig]) -> StoreResult<Self> {
        let mut by_address: HashMap<String, sled::Db> = HashMap::new();
        let mut connections = HashMap::new();

        for config in configs {
            if config.use_cache {
                warn!(
                    "Connection '{}' requests a read cache (ttl {}s); caching is not applied",
                    config.name, config.cache_ttl_secs
                );
            }

            if let Some(db) = by_address.get(&config.address) {
                debug!(
                    "Connection '{}' shares the database at '{}'",
                    config.name, config.address
                );
                connections.insert(config.name.clone(), db.clone());
                continue;
            }

            let address = config.address.clone();
            let opening = task::spawn_blocking(move || open_db(&address));
            let db = match tokio::time::timeout(config.connect_timeout(), opening).await {
                Ok(Ok(Ok(db))) => db,
                Ok(Ok(Err(e))) => {
                    return Err(StoreError::Connect {
                        name: config.name.clone(),
                        message: e.to_string(),
                    })
                }
                Ok(Err(join_error)) => {
                    return Err(StoreError::Connect {
                        name: config.name.clone(),
                        message: format!("open task failed: {}", join_error),
                    })
                }
                Err(_) => {
                    return Err(StoreError::Connect {
                        name: config.name.clone(),
                        message: format!("timed out after {}ms", config.connect_timeout_ms),
                    })
                }
            };

            info!("Connected '{}' to '{}'", config.name, config.address);
            by_address.insert(config.address.clone(), db.clone());
            connections.insert(config.name.clone(), db);
        }

        Ok(Self { connections })
    }

    /// Opens a fresh temporary database per connection name.
    pub fn temporary(names: &[&str]) -> StoreResult<Self> {
        let mut connections = HashMap::new();
        for name in names {
            let db = sled::Config::new().temporary(true).open()?;
            connections.insert(name.to_string(), db);
        }
        Ok(Self { connections })
    }

    fn db(&self, location: &CollectionLocation) -> StoreResult<sled::Db> {
        self.connections
            .get(&location.connection)
            .cloned()
            .ok_or_else(|| StoreError::UnknownConnection(location.connection.clone()))
    }

    /// Runs `op` against the location's tree on the blocking thread pool.
    async fn with_tree<T, F>(
        &self,
        location: &CollectionLocation,
        operation: &'static str,
        op: F,
    ) -> StoreResult<T>
    where
        F: FnOnce(&sled::Tree) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db(location)?;
        let namespace = location.namespace();
        task::spawn_blocking(move || {
            let tree = db
                .open_tree(namespace)
                .map_err(|e| StoreError::backend("open_tree", e))?;
            op(&tree)
        })
        .await
        .map_err(|e| StoreError::backend(operation, format!("blocking task failed: {}", e)))?
    }

    /// Finds the key of the first document matching `filter`.
    fn first_match(
        tree: &sled::Tree,
        filter: &Document,
    ) -> StoreResult<Option<(sled::IVec, Document)>> {
        if let Some(id) = identity_key(filter) {
            return match tree.get(id.as_bytes())? {
                Some(bytes) => Ok(Some((sled::IVec::from(id.as_bytes()), decode(&bytes)?))),
                None => Ok(None),
            };
        }

        for entry in tree.iter() {
            let (key, bytes) = entry?;
            let doc = decode(&bytes)?;
            if query::matches(&doc, filter) {
                return Ok(Some((key, doc)));
            }
        }
        Ok(None)
    }

    fn scan(tree: &sled::Tree, options: &FindOptions) -> StoreResult<Vec<Document>> {
        if !options.sort.is_empty() {
            let mut docs = Vec::new();
            for entry in tree.iter() {
                let (_, bytes) = entry?;
                docs.push(decode(&bytes)?);
            }
            return query::evaluate(docs, options);
        }

        // Store order: stop reading as soon as the page is full.
        let projection = Projection::parse(&options.projection)?;
        let limit = if options.limit == 0 {
            usize::MAX
        } else {
            options.limit
        };
        let mut skipped = 0;
        let mut docs = Vec::new();
        for entry in tree.iter() {
            if docs.len() >= limit {
                break;
            }
            let (_, bytes) = entry?;
            let doc = decode(&bytes)?;
            if !query::matches(&doc, &options.filter) {
                continue;
            }
            if skipped < options.skip {
                skipped += 1;
                continue;
            }
            docs.push(projection.apply(doc));
        }
        Ok(docs)
    }
}

#[async_trait]
impl StoreGateway for SledGateway {
    async fn find(
        &self,
        location: &CollectionLocation,
        options: &FindOptions,
    ) -> StoreResult<Vec<Document>> {
        let options = options.clone();
        let docs = self
            .with_tree(location, "find", move |tree| Self::scan(tree, &options))
            .await?;
        debug!("find on {} returned {} documents", location, docs.len());
        Ok(docs)
    }

    async fn find_one(
        &self,
        location: &CollectionLocation,
        filter: &Document,
    ) -> StoreResult<Option<Document>> {
        let filter = filter.clone();
        self.with_tree(location, "find_one", move |tree| {
            Ok(Self::first_match(tree, &filter)?.map(|(_, doc)| doc))
        })
        .await
    }

    async fn insert_one(
        &self,
        location: &CollectionLocation,
        mut document: Document,
    ) -> StoreResult<InsertOutcome> {
        let id = match document.get(ID_FIELD) {
            None => {
                let id = DocumentId::generate();
                document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
                id
            }
            Some(_) => DocumentId::of(&document).ok_or_else(|| {
                StoreError::InvalidDocument(format!("{} must be a non-empty string", ID_FIELD))
            })?,
        };
        let bytes = serde_json::to_vec(&Value::Object(document))?;

        let key = id.clone();
        self.with_tree(location, "insert_one", move |tree| {
            match tree.compare_and_swap(key.as_str().as_bytes(), None::<&[u8]>, Some(bytes))? {
                Ok(()) => {}
                Err(_) => return Err(StoreError::DuplicateKey(key.to_string())),
            }
            tree.flush().map_err(|e| StoreError::backend("flush", e))?;
            Ok(())
        })
        .await?;

        Ok(InsertOutcome {
            acknowledged: true,
            inserted_count: 1,
            inserted_id: id,
        })
    }

    async fn delete_one(
        &self,
        location: &CollectionLocation,
        filter: &Document,
    ) -> StoreResult<DeleteOutcome> {
        let filter = filter.clone();
        let deleted_count = self
            .with_tree(location, "delete_one", move |tree| {
                match Self::first_match(tree, &filter)? {
                    Some((key, _)) => {
                        let removed = tree.remove(key)?;
                        tree.flush().map_err(|e| StoreError::backend("flush", e))?;
                        Ok(u64::from(removed.is_some()))
                    }
                    None => Ok(0),
                }
            })
            .await?;

        Ok(DeleteOutcome {
            acknowledged: true,
            deleted_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn location() -> CollectionLocation {
        CollectionLocation::new("destination", "recovery", "supercontent_old")
    }

    #[tokio::test]
    async fn insert_then_find_one_by_identity() {
        let gateway = SledGateway::temporary(&["destination"]).unwrap();
        let outcome = gateway
            .insert_one(&location(), doc(json!({"_id": "1", "v": 1})))
            .await
            .unwrap();
        assert!(outcome.acknowledged);
        assert_eq!(outcome.inserted_count, 1);

        let id = DocumentId::parse("1").unwrap();
        let found = gateway.find_one(&location(), &id.filter()).await.unwrap();
        assert_eq!(found.map(Value::Object), Some(json!({"_id": "1", "v": 1})));
    }

    #[tokio::test]
    async fn find_one_missing_is_none_not_error() {
        let gateway = SledGateway::temporary(&["destination"]).unwrap();
        let id = DocumentId::parse("nope").unwrap();
        assert!(gateway.find_one(&location(), &id.filter()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_never_overwrites() {
        let gateway = SledGateway::temporary(&["destination"]).unwrap();
        gateway
            .insert_one(&location(), doc(json!({"_id": "1", "v": 1})))
            .await
            .unwrap();
        let err = gateway
            .insert_one(&location(), doc(json!({"_id": "1", "v": 2})))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateKey("1".to_string()));

        let found = gateway
            .find_one(&location(), &doc(json!({"_id": "1"})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.get("v"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn insert_without_identity_generates_one() {
        let gateway = SledGateway::temporary(&["destination"]).unwrap();
        let outcome = gateway
            .insert_one(&location(), doc(json!({"v": 1})))
            .await
            .unwrap();
        let found = gateway
            .find_one(&location(), &outcome.inserted_id.filter())
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn delete_one_reports_count() {
        let gateway = SledGateway::temporary(&["destination"]).unwrap();
        gateway
            .insert_one(&location(), doc(json!({"_id": "2"})))
            .await
            .unwrap();
        let filter = doc(json!({"_id": "2"}));

        let first = gateway.delete_one(&location(), &filter).await.unwrap();
        assert_eq!(first.deleted_count, 1);
        let second = gateway.delete_one(&location(), &filter).await.unwrap();
        assert_eq!(second.deleted_count, 0);
        assert!(second.acknowledged);
    }

    #[tokio::test]
    async fn delete_one_by_field_filter() {
        let gateway = SledGateway::temporary(&["destination"]).unwrap();
        for (id, tag) in [("a", "x"), ("b", "y")] {
            gateway
                .insert_one(&location(), doc(json!({"_id": id, "tag": tag})))
                .await
                .unwrap();
        }
        let outcome = gateway
            .delete_one(&location(), &doc(json!({"tag": "y"})))
            .await
            .unwrap();
        assert_eq!(outcome.deleted_count, 1);
        let remaining = gateway.find(&location(), &FindOptions::new()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].get("_id"), Some(&json!("a")));
    }

    #[tokio::test]
    async fn find_applies_projection_and_limit() {
        let gateway = SledGateway::temporary(&["source"]).unwrap();
        let queue = CollectionLocation::new("source", "recovery", "process-list");
        for i in 0..5 {
            gateway
                .insert_one(&queue, doc(json!({"_id": format!("q{}", i), "id": i.to_string()})))
                .await
                .unwrap();
        }
        let options = FindOptions::new().exclude(ID_FIELD).limit(3);
        let docs = gateway.find(&queue, &options).await.unwrap();
        assert_eq!(docs.len(), 3);
        assert!(docs.iter().all(|d| !d.contains_key(ID_FIELD) && d.contains_key("id")));
    }

    #[tokio::test]
    async fn find_with_inclusion_projection_keeps_named_fields() {
        let gateway = SledGateway::temporary(&["source"]).unwrap();
        let queue = CollectionLocation::new("source", "recovery", "process-list");
        gateway
            .insert_one(
                &queue,
                doc(json!({"_id": "q1", "id": "1", "status": "new", "payload": {"v": 1}})),
            )
            .await
            .unwrap();

        let options = FindOptions::new().include("id").include("status");
        let docs = gateway.find(&queue, &options).await.unwrap();
        assert_eq!(
            docs.into_iter().map(Value::Object).collect::<Vec<_>>(),
            vec![json!({"_id": "q1", "id": "1", "status": "new"})]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn gateway_is_usable_from_spawned_tasks() {
        let gateway = SledGateway::temporary(&["destination"]).unwrap();
        let mut handles = Vec::new();
        for i in 0..8 {
            let gateway = gateway.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("doc{}", i);
                gateway
                    .insert_one(&location(), doc(json!({"_id": id.clone(), "n": i})))
                    .await?;
                gateway.find_one(&location(), &doc(json!({"_id": id}))).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_some());
        }

        let all = gateway.find(&location(), &FindOptions::new()).await.unwrap();
        assert_eq!(all.len(), 8);
    }

    #[tokio::test]
    async fn unknown_connection_is_an_error() {
        let gateway = SledGateway::temporary(&["source"]).unwrap();
        let err = gateway
            .find_one(&location(), &Document::new())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::UnknownConnection("destination".to_string()));
    }

    #[tokio::test]
    async fn connect_shares_databases_with_the_same_address() {
        let configs = vec![
            ConnectionConfig::new("source", "memory:shared"),
            ConnectionConfig::new("destination", "memory:shared"),
        ];
        let gateway = SledGateway::connect(&configs).await.unwrap();
        let a = CollectionLocation::new("source", "recovery", "c");
        let b = CollectionLocation::new("destination", "recovery", "c");
        gateway.insert_one(&a, doc(json!({"_id": "1"}))).await.unwrap();
        assert!(gateway.find_one(&b, &doc(json!({"_id": "1"}))).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn connect_opens_on_disk_databases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        let configs = vec![ConnectionConfig::new("destination", path.to_string_lossy())];
        let gateway = SledGateway::connect(&configs).await.unwrap();
        gateway
            .insert_one(&location(), doc(json!({"_id": "1"})))
            .await
            .unwrap();
        assert!(path.exists());
    }
}
