//! Persistence layer (§6 "document store exposing insert/find/update/
//! delete by filter"). `JsonFileStore` is the in-process stand-in for the
//! external document store spec.md treats as out of scope: one JSON file
//! per collection, documents keyed by an `id` field.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed document in {collection}: {source}")]
    Malformed {
        collection: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("document {id} not found in {collection}")]
    NotFound { collection: String, id: String },
}

/// A narrow filter: every (key, value) pair must match the document's
/// top-level field. Good enough for the controller's lookups (by name,
/// by vlan id, by operation id) without pulling in a query DSL.
#[derive(Debug, Clone, Default)]
pub struct Filter(pub Vec<(String, Value)>);

impl Filter {
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self(vec![(key.into(), value.into())])
    }

    pub fn and(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    fn matches(&self, doc: &Value) -> bool {
        self.0.iter().all(|(k, v)| doc.get(k) == Some(v))
    }
}

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn insert(&self, collection: &str, id: &str, doc: Value) -> Result<(), StoreError>;
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>, StoreError>;
    async fn update(&self, collection: &str, id: &str, doc: Value) -> Result<(), StoreError>;
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    async fn get_typed<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<Option<T>, StoreError> {
        let filter = Filter::eq("id", id.to_string());
        let docs = self.find(collection, &filter).await?;
        docs.into_iter()
            .next()
            .map(|doc| serde_json::from_value(doc).map_err(|source| StoreError::Malformed {
                collection: collection.to_string(),
                source,
            }))
            .transpose()
    }

    async fn put_typed<T: Serialize + Send + Sync>(&self, collection: &str, id: &str, value: &T) -> Result<(), StoreError> {
        let doc = serde_json::to_value(value).map_err(|source| StoreError::Malformed {
            collection: collection.to_string(),
            source,
        })?;
        self.update(collection, id, doc).await
    }
}

/// One JSON array file per collection, `{collection}.json` under
/// `base_dir`, loaded in memory and rewritten wholesale on every write —
/// matches the scale implied by "tens of devices" (§9).
pub struct JsonFileStore {
    base_dir: PathBuf,
    collections: Mutex<HashMap<String, Vec<Value>>>,
}

impl JsonFileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            collections: Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, collection: &str) -> PathBuf {
        self.base_dir.join(format!("{collection}.json"))
    }

    async fn load(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let path = self.path_for(collection);
        if !Path::new(&path).exists() {
            return Ok(Vec::new());
        }
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| StoreError::Io { path: path.clone(), source })?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&text).map_err(|source| StoreError::Malformed {
            collection: collection.to_string(),
            source,
        })
    }

    async fn save(&self, collection: &str, docs: &[Value]) -> Result<(), StoreError> {
        let path = self.path_for(collection);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io { path: path.clone(), source })?;
        }
        let text = serde_json::to_string_pretty(docs).map_err(|source| StoreError::Malformed {
            collection: collection.to_string(),
            source,
        })?;
        tokio::fs::write(&path, text)
            .await
            .map_err(|source| StoreError::Io { path, source })
    }

    async fn with_collection<F, T>(&self, collection: &str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<Value>) -> T,
    {
        let mut guard = self.collections.lock().await;
        if !guard.contains_key(collection) {
            let loaded = self.load(collection).await?;
            guard.insert(collection.to_string(), loaded);
        }
        let docs = guard.get_mut(collection).expect("just populated");
        let result = f(docs);
        self.save(collection, docs).await?;
        Ok(result)
    }
}

#[async_trait::async_trait]
impl Store for JsonFileStore {
    async fn insert(&self, collection: &str, id: &str, mut doc: Value) -> Result<(), StoreError> {
        if let Value::Object(map) = &mut doc {
            map.insert("id".to_string(), Value::String(id.to_string()));
        }
        self.with_collection(collection, |docs| docs.push(doc)).await
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        self.with_collection(collection, |docs| {
            docs.iter().filter(|d| filter.matches(d)).cloned().collect()
        })
        .await
    }

    async fn update(&self, collection: &str, id: &str, mut doc: Value) -> Result<(), StoreError> {
        if let Value::Object(map) = &mut doc {
            map.insert("id".to_string(), Value::String(id.to_string()));
        }
        self.with_collection(collection, |docs| {
            if let Some(existing) = docs.iter_mut().find(|d| d.get("id") == Some(&Value::String(id.to_string()))) {
                *existing = doc;
                Ok(())
            } else {
                docs.push(doc);
                Ok(())
            }
        })
        .await?
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.with_collection(collection, |docs| {
            let before = docs.len();
            docs.retain(|d| d.get("id") != Some(&Value::String(id.to_string())));
            if docs.len() == before {
                Err(StoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })
            } else {
                Ok(())
            }
        })
        .await?
    }
}

pub fn shared(base_dir: impl Into<PathBuf>) -> Arc<dyn Store> {
    Arc::new(JsonFileStore::new(base_dir))
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_then_find_round_trips() {
        let dir = tempdir("insert-find");
        let store = JsonFileStore::new(&dir);
        store.insert("switches", "sw1", json!({"name": "sw1", "family": "A"})).await.unwrap();
        let found = store.find("switches", &Filter::eq("name", "sw1")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["family"], "A");
    }

    #[tokio::test]
    async fn delete_missing_document_is_reported() {
        let dir = tempdir("delete-missing");
        let store = JsonFileStore::new(&dir);
        let err = store.delete("switches", "ghost").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    fn tempdir(label: &str) -> PathBuf {
        static COUNTER: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut dir = std::env::temp_dir();
        dir.push(format!("fabric-store-test-{label}-{}-{n}", std::process::id()));
        dir
    }
}
