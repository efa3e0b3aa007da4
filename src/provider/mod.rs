//! Data providers: the storage side of a resource.
//!
//! Providers speak storage property names, never public field names; the
//! pipeline translates through the resource's field schema before calling in.

pub mod entity;
pub mod memory;
pub mod object;
pub mod query;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::error::ApiError;
use crate::resource::source::{scalar_to_string, BackendKind, BackendRecord};
use crate::types::SortDirection;

pub use entity::EntityDataProvider;
pub use memory::MemoryDataProvider;
pub use object::ObjectDataProvider;
pub use query::DbQueryDataProvider;

/// Listing parameters in storage terms
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexQuery {
    /// `(property, value)` equality filters, compared as text
    pub filters: Vec<(String, String)>,
    pub sort: Vec<(String, SortDirection)>,
    pub offset: u64,
    pub limit: Option<u64>,
}

#[async_trait]
pub trait DataProvider: Send + Sync {
    fn backend(&self) -> BackendKind;

    async fn index(&self, query: &IndexQuery) -> Result<Vec<BackendRecord>, ApiError>;

    /// Total matching records, ignoring offset and limit
    async fn count(&self, query: &IndexQuery) -> Result<u64, ApiError>;

    async fn view(&self, id: &str) -> Result<Option<BackendRecord>, ApiError>;

    /// Store a new record; returns its id
    async fn create(&self, _values: Map<String, Value>) -> Result<String, ApiError> {
        Err(self.read_only())
    }

    /// Merge (`replace == false`) or overwrite the record; `false` when it does not exist
    async fn update(
        &self,
        _id: &str,
        _values: Map<String, Value>,
        _replace: bool,
    ) -> Result<bool, ApiError> {
        Err(self.read_only())
    }

    /// `false` when the record did not exist
    async fn remove(&self, _id: &str) -> Result<bool, ApiError> {
        Err(self.read_only())
    }

    fn read_only(&self) -> ApiError {
        ApiError::server_configuration(format!(
            "The {} data provider does not support writes",
            self.backend()
        ))
    }
}

/// Plain value of a storage property, for filtering and sorting in memory
pub fn record_property(record: &BackendRecord, property: &str) -> Option<Value> {
    match record {
        BackendRecord::Array(map) | BackendRecord::Row { columns: map, .. } => {
            map.get(property).cloned()
        }
        BackendRecord::Object(object) => object.property(property),
        BackendRecord::Entity(entity) => entity.fields.get(property).map(|f| f.to_value()),
    }
}

/// Filter, sort and page records held in memory
pub fn apply_query(records: Vec<BackendRecord>, query: &IndexQuery) -> Vec<BackendRecord> {
    let mut matched: Vec<BackendRecord> = records
        .into_iter()
        .filter(|record| matches_filters(record, &query.filters))
        .collect();

    if !query.sort.is_empty() {
        matched.sort_by(|a, b| {
            for (property, direction) in &query.sort {
                let ordering = compare_values(
                    record_property(a, property).as_ref(),
                    record_property(b, property).as_ref(),
                );
                let ordering = match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    let iter = matched
        .into_iter()
        .skip(usize::try_from(query.offset).unwrap_or(usize::MAX));
    match query.limit {
        Some(limit) => iter.take(usize::try_from(limit).unwrap_or(usize::MAX)).collect(),
        None => iter.collect(),
    }
}

pub fn matches_filters(record: &BackendRecord, filters: &[(String, String)]) -> bool {
    filters.iter().all(|(property, expected)| {
        match record_property(record, property) {
            // A multi-valued property matches when any item does
            Some(Value::Array(items)) => items
                .iter()
                .any(|item| scalar_to_string(item).as_deref() == Some(expected.as_str())),
            Some(value) => scalar_to_string(&value).as_deref() == Some(expected.as_str()),
            None => false,
        }
    })
}

/// Total order over JSON scalars: null < bool < number < string < other
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
