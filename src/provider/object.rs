use async_trait::async_trait;
use std::sync::Arc;

use super::{apply_query, DataProvider, IndexQuery};
use crate::error::ApiError;
use crate::resource::source::{BackendKind, BackendRecord, ObjectRecord};

/// Read-only collection of domain objects
pub struct ObjectDataProvider {
    objects: Vec<Arc<dyn ObjectRecord>>,
}

impl ObjectDataProvider {
    pub fn new(objects: Vec<Arc<dyn ObjectRecord>>) -> Self {
        Self { objects }
    }

    fn records(&self) -> Vec<BackendRecord> {
        self.objects
            .iter()
            .cloned()
            .map(BackendRecord::Object)
            .collect()
    }
}

#[async_trait]
impl DataProvider for ObjectDataProvider {
    fn backend(&self) -> BackendKind {
        BackendKind::Object
    }

    async fn index(&self, query: &IndexQuery) -> Result<Vec<BackendRecord>, ApiError> {
        Ok(apply_query(self.records(), query))
    }

    async fn count(&self, query: &IndexQuery) -> Result<u64, ApiError> {
        let unpaged = IndexQuery {
            offset: 0,
            limit: None,
            sort: Vec::new(),
            ..query.clone()
        };
        Ok(apply_query(self.records(), &unpaged).len() as u64)
    }

    async fn view(&self, id: &str) -> Result<Option<BackendRecord>, ApiError> {
        Ok(self
            .objects
            .iter()
            .find(|object| object.id() == id)
            .cloned()
            .map(BackendRecord::Object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    #[derive(Debug)]
    struct Account {
        id: u32,
        name: &'static str,
    }

    impl ObjectRecord for Account {
        fn id(&self) -> String {
            self.id.to_string()
        }

        fn property(&self, name: &str) -> Option<Value> {
            match name {
                "id" => Some(json!(self.id)),
                "name" => Some(json!(self.name)),
                _ => None,
            }
        }
    }

    #[tokio::test]
    async fn views_and_refuses_writes() {
        let provider = ObjectDataProvider::new(vec![
            Arc::new(Account { id: 1, name: "ada" }),
            Arc::new(Account { id: 2, name: "bob" }),
        ]);
        assert!(provider.view("2").await.unwrap().is_some());
        assert!(provider.view("3").await.unwrap().is_none());

        let err = provider.create(Map::new()).await.unwrap_err();
        assert_eq!(err.status_code(), 500);

        let query = IndexQuery {
            filters: vec![("name".into(), "ada".into())],
            ..Default::default()
        };
        assert_eq!(provider.count(&query).await.unwrap(), 1);
    }
}
