use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use super::{apply_query, DataProvider, IndexQuery};
use crate::error::ApiError;
use crate::resource::source::{id_value, BackendKind, BackendRecord};

/// Array-backed records kept in process memory, keyed by their `id` value
pub struct MemoryDataProvider {
    records: RwLock<BTreeMap<u64, Map<String, Value>>>,
    next_id: AtomicU64,
}

impl Default for MemoryDataProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDataProvider {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Seed records; each must carry a numeric `id`
    pub fn with_records<I: IntoIterator<Item = Value>>(records: I) -> Self {
        let mut map = BTreeMap::new();
        let mut max_id = 0;
        for record in records {
            if let Value::Object(fields) = record {
                if let Some(id) = fields.get("id").and_then(Value::as_u64) {
                    max_id = max_id.max(id);
                    map.insert(id, fields);
                }
            }
        }
        Self {
            records: RwLock::new(map),
            next_id: AtomicU64::new(max_id + 1),
        }
    }

    fn parse_id(id: &str) -> Option<u64> {
        id.parse().ok()
    }
}

#[async_trait]
impl DataProvider for MemoryDataProvider {
    fn backend(&self) -> BackendKind {
        BackendKind::Array
    }

    async fn index(&self, query: &IndexQuery) -> Result<Vec<BackendRecord>, ApiError> {
        let records = self.records.read().await;
        let all = records.values().cloned().map(BackendRecord::Array).collect();
        Ok(apply_query(all, query))
    }

    async fn count(&self, query: &IndexQuery) -> Result<u64, ApiError> {
        let unpaged = IndexQuery {
            offset: 0,
            limit: None,
            sort: Vec::new(),
            ..query.clone()
        };
        Ok(self.index(&unpaged).await?.len() as u64)
    }

    async fn view(&self, id: &str) -> Result<Option<BackendRecord>, ApiError> {
        let Some(id) = Self::parse_id(id) else {
            return Ok(None);
        };
        Ok(self.records.read().await.get(&id).cloned().map(BackendRecord::Array))
    }

    async fn create(&self, mut values: Map<String, Value>) -> Result<String, ApiError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        values.insert("id".to_string(), id_value(&id.to_string()));
        self.records.write().await.insert(id, values);
        Ok(id.to_string())
    }

    async fn update(
        &self,
        id: &str,
        values: Map<String, Value>,
        replace: bool,
    ) -> Result<bool, ApiError> {
        let Some(numeric) = Self::parse_id(id) else {
            return Ok(false);
        };
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&numeric) else {
            return Ok(false);
        };
        if replace {
            let record_id = record.get("id").cloned();
            record.clear();
            if let Some(record_id) = record_id {
                record.insert("id".to_string(), record_id);
            }
        }
        for (key, value) in values {
            if key != "id" {
                record.insert(key, value);
            }
        }
        Ok(true)
    }

    async fn remove(&self, id: &str) -> Result<bool, ApiError> {
        let Some(id) = Self::parse_id(id) else {
            return Ok(false);
        };
        Ok(self.records.write().await.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::source::scalar_to_string;
    use serde_json::json;

    fn values(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn create_assigns_following_ids() {
        let provider = MemoryDataProvider::with_records([json!({"id": 3, "label": "a"})]);
        let id = provider.create(values(json!({"label": "b"}))).await.unwrap();
        assert_eq!(id, "4");

        let record = provider.view("4").await.unwrap().unwrap();
        assert_eq!(record.id().as_deref(), Some("4"));
        assert_eq!(provider.count(&IndexQuery::default()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn replace_drops_missing_properties() {
        let provider = MemoryDataProvider::with_records([json!({"id": 1, "a": 1, "b": 2})]);
        assert!(provider.update("1", values(json!({"a": 5})), false).await.unwrap());
        assert!(provider.update("1", values(json!({"b": 7})), true).await.unwrap());

        let Some(BackendRecord::Array(map)) = provider.view("1").await.unwrap() else {
            panic!("record missing");
        };
        assert_eq!(map.get("a"), None);
        assert_eq!(map.get("b"), Some(&json!(7)));
        assert_eq!(map.get("id").and_then(scalar_to_string).as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn unknown_ids_are_absent() {
        let provider = MemoryDataProvider::new();
        assert!(provider.view("abc").await.unwrap().is_none());
        assert!(!provider.remove("9").await.unwrap());
        assert!(!provider.update("9", Map::new(), false).await.unwrap());
    }
}
