use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use super::{apply_query, DataProvider, IndexQuery};
use crate::error::ApiError;
use crate::resource::source::{
    id_value, BackendKind, BackendRecord, Cardinality, EntityField, EntityRecord,
};

/// Entity wrappers held in memory.
///
/// Writes keep each field's declared cardinality and main column; new fields
/// become multiple when the written value is a sequence.
pub struct EntityDataProvider {
    entities: RwLock<BTreeMap<u64, EntityRecord>>,
    next_id: AtomicU64,
}

impl Default for EntityDataProvider {
    fn default() -> Self {
        Self::with_entities(Vec::new())
    }
}

impl EntityDataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entities<I: IntoIterator<Item = EntityRecord>>(entities: I) -> Self {
        let mut map = BTreeMap::new();
        let mut max_id = 0;
        for entity in entities {
            if let Ok(id) = entity.id.parse::<u64>() {
                max_id = max_id.max(id);
                map.insert(id, entity);
            }
        }
        Self {
            entities: RwLock::new(map),
            next_id: AtomicU64::new(max_id + 1),
        }
    }

    fn write_field(entity: &mut EntityRecord, name: String, value: Value) {
        let existing = entity.fields.get(&name);
        let cardinality = match (existing, &value) {
            (Some(field), _) => field.cardinality,
            (None, Value::Array(_)) => Cardinality::Multiple,
            (None, _) => Cardinality::Single,
        };
        let main_column = existing
            .map(|f| f.main_column.clone())
            .unwrap_or_else(|| EntityField::DEFAULT_COLUMN.to_string());

        let values = match (cardinality, value) {
            (Cardinality::Multiple, Value::Array(items)) => items,
            (_, Value::Null) => Vec::new(),
            (_, other) => vec![other],
        };
        let items = values
            .into_iter()
            .map(|v| match v {
                Value::Object(map) => map,
                other => {
                    let mut item = Map::new();
                    item.insert(main_column.clone(), other);
                    item
                }
            })
            .collect();

        entity.fields.insert(
            name,
            EntityField {
                cardinality,
                main_column,
                items,
            },
        );
    }
}

#[async_trait]
impl DataProvider for EntityDataProvider {
    fn backend(&self) -> BackendKind {
        BackendKind::Entity
    }

    async fn index(&self, query: &IndexQuery) -> Result<Vec<BackendRecord>, ApiError> {
        let entities = self.entities.read().await;
        let all = entities.values().cloned().map(BackendRecord::Entity).collect();
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
        let Ok(id) = id.parse::<u64>() else {
            return Ok(None);
        };
        Ok(self.entities.read().await.get(&id).cloned().map(BackendRecord::Entity))
    }

    async fn create(&self, values: Map<String, Value>) -> Result<String, ApiError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut entity = EntityRecord::new(id.to_string());
        for (name, value) in values {
            if name != "id" {
                Self::write_field(&mut entity, name, value);
            }
        }
        self.entities.write().await.insert(id, entity);
        Ok(id.to_string())
    }

    async fn update(
        &self,
        id: &str,
        values: Map<String, Value>,
        replace: bool,
    ) -> Result<bool, ApiError> {
        let Ok(numeric) = id.parse::<u64>() else {
            return Ok(false);
        };
        let mut entities = self.entities.write().await;
        let Some(entity) = entities.get_mut(&numeric) else {
            return Ok(false);
        };
        if replace {
            // Keep the field layout, drop the values
            for (name, field) in entity.fields.iter_mut() {
                if name != "id" {
                    field.items.clear();
                }
            }
        }
        for (name, value) in values {
            if name != "id" {
                Self::write_field(entity, name, value);
            }
        }
        entity
            .fields
            .insert("id".to_string(), EntityField::single(id_value(id)));
        Ok(true)
    }

    async fn remove(&self, id: &str) -> Result<bool, ApiError> {
        let Ok(id) = id.parse::<u64>() else {
            return Ok(false);
        };
        Ok(self.entities.write().await.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::source::PropertySource;
    use serde_json::json;

    #[tokio::test]
    async fn writes_keep_declared_cardinality() {
        let provider = EntityDataProvider::with_entities([EntityRecord::new("1")
            .with_values("tags", [json!(3)])
            .with_value("title", json!("Hello"))]);

        let mut values = Map::new();
        values.insert("tags".into(), json!(7));
        values.insert("title".into(), json!("Hi"));
        assert!(provider.update("1", values, false).await.unwrap());

        let source = PropertySource::new(provider.view("1").await.unwrap().unwrap());
        assert!(source.is_multiple("tags"));
        assert_eq!(source.get("tags", Some(0), None), Some(json!(7)));
        assert_eq!(source.get("title", None, None), Some(json!("Hi")));
    }

    #[tokio::test]
    async fn create_infers_multiple_from_sequences() {
        let provider = EntityDataProvider::new();
        let mut values = Map::new();
        values.insert("tags".into(), json!([]));
        let id = provider.create(values).await.unwrap();

        let source = PropertySource::new(provider.view(&id).await.unwrap().unwrap());
        assert!(source.is_multiple("tags"));
        assert_eq!(source.count("tags"), 0);
        assert_eq!(source.get("id", None, None), Some(json!(1)));
    }
}
