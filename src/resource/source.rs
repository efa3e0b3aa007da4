//! Uniform read access over one backing record.
//!
//! Providers hand records out as [`BackendRecord`] variants; the field engine
//! wraps each in a fresh [`PropertySource`] for one resolution pass and never
//! looks at the variant itself.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Storage shape a resource declares at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Array,
    Object,
    Entity,
    Row,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Array => "array",
            BackendKind::Object => "object",
            BackendKind::Entity => "entity",
            BackendKind::Row => "row",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Cardinality {
    #[default]
    Single,
    Multiple,
}

/// A domain object exposing its state through getters
pub trait ObjectRecord: fmt::Debug + Send + Sync {
    fn id(&self) -> String;

    fn property(&self, name: &str) -> Option<Value>;

    /// Whether `name` is a collection, populated or not
    fn is_multiple(&self, name: &str) -> bool {
        matches!(self.property(name), Some(Value::Array(_)))
    }
}

/// One value column set of an entity field
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityField {
    pub cardinality: Cardinality,
    /// Column rendered when no sub-property is requested
    pub main_column: String,
    pub items: Vec<Map<String, Value>>,
}

impl EntityField {
    pub const DEFAULT_COLUMN: &'static str = "value";

    pub fn single(value: Value) -> Self {
        Self {
            cardinality: Cardinality::Single,
            main_column: Self::DEFAULT_COLUMN.to_string(),
            items: vec![Self::item(value)],
        }
    }

    pub fn multiple<I: IntoIterator<Item = Value>>(values: I) -> Self {
        Self {
            cardinality: Cardinality::Multiple,
            main_column: Self::DEFAULT_COLUMN.to_string(),
            items: values.into_iter().map(Self::item).collect(),
        }
    }

    fn item(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert(Self::DEFAULT_COLUMN.to_string(), other);
                map
            }
        }
    }

    /// Flatten back to a plain value (main column per item)
    pub fn to_value(&self) -> Value {
        let project = |item: &Map<String, Value>| {
            item.get(&self.main_column).cloned().unwrap_or(Value::Null)
        };
        match self.cardinality {
            Cardinality::Multiple => Value::Array(self.items.iter().map(project).collect()),
            Cardinality::Single => self.items.first().map(project).unwrap_or(Value::Null),
        }
    }
}

/// Entity wrapper: every property is a field with typed items
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub fields: BTreeMap<String, EntityField>,
}

impl EntityRecord {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), EntityField::single(id_value(&id)));
        Self { id, fields }
    }

    pub fn with_field(mut self, name: impl Into<String>, field: EntityField) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn with_value(self, name: impl Into<String>, value: Value) -> Self {
        self.with_field(name, EntityField::single(value))
    }

    pub fn with_values<I: IntoIterator<Item = Value>>(self, name: impl Into<String>, values: I) -> Self {
        self.with_field(name, EntityField::multiple(values))
    }
}

/// Numeric ids stay numbers in output, anything else is a string
pub fn id_value(id: &str) -> Value {
    id.parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(id.to_string()))
}

/// A record as handed out by a data provider
#[derive(Debug, Clone)]
pub enum BackendRecord {
    Array(Map<String, Value>),
    Object(Arc<dyn ObjectRecord>),
    Entity(EntityRecord),
    Row {
        columns: Map<String, Value>,
        multiple: Arc<HashSet<String>>,
    },
}

impl BackendRecord {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendRecord::Array(_) => BackendKind::Array,
            BackendRecord::Object(_) => BackendKind::Object,
            BackendRecord::Entity(_) => BackendKind::Entity,
            BackendRecord::Row { .. } => BackendKind::Row,
        }
    }

    pub fn id(&self) -> Option<String> {
        match self {
            BackendRecord::Array(map) | BackendRecord::Row { columns: map, .. } => {
                map.get("id").and_then(scalar_to_string)
            }
            BackendRecord::Object(object) => Some(object.id()),
            BackendRecord::Entity(entity) => Some(entity.id.clone()),
        }
    }
}

/// Text form of a scalar, used for ids and equality filters
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Undefined or null: the only values treated as "no value"
pub fn is_empty(value: &Option<Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Per-pass accessor over one record.
///
/// Reads are referentially stable: the same key and index return the same
/// value for the lifetime of the source, even when an object getter would
/// compute a new one.
#[derive(Debug)]
pub struct PropertySource {
    record: BackendRecord,
    context: HashMap<String, Value>,
    memo: Mutex<HashMap<(String, Option<usize>), Option<Value>>>,
}

impl PropertySource {
    pub fn new(record: BackendRecord) -> Self {
        Self {
            record,
            context: HashMap::new(),
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.record.kind()
    }

    pub fn record(&self) -> &BackendRecord {
        &self.record
    }

    pub fn id(&self) -> Option<String> {
        self.record.id()
    }

    /// Resolution state (current field, sub-property) visible to callbacks
    pub fn context(&self) -> &HashMap<String, Value> {
        &self.context
    }

    pub fn set_context(&mut self, key: impl Into<String>, value: Value) {
        self.context.insert(key.into(), value);
    }

    pub fn clear_context(&mut self) {
        self.context.clear();
    }

    /// Rendered value of `key`, item `index` when multiple.
    ///
    /// For entities this is the field's main column; otherwise the stored value.
    /// `sub_property` selects a key inside an object value or entity item.
    pub fn get(&self, key: &str, index: Option<usize>, sub_property: Option<&str>) -> Option<Value> {
        match &self.record {
            BackendRecord::Entity(entity) => {
                let field = entity.fields.get(key)?;
                let item = field.items.get(index.unwrap_or(0))?;
                item.get(sub_property.unwrap_or(&field.main_column)).cloned()
            }
            _ => {
                let value = self.get_raw(key, index)?;
                match sub_property {
                    Some(sub) => value.get(sub).cloned(),
                    None => Some(value),
                }
            }
        }
    }

    /// Unrendered value: whole entity items, no sub-property projection
    pub fn get_raw(&self, key: &str, index: Option<usize>) -> Option<Value> {
        match &self.record {
            BackendRecord::Entity(entity) => {
                let field = entity.fields.get(key)?;
                field
                    .items
                    .get(index.unwrap_or(0))
                    .map(|item| Value::Object(item.clone()))
            }
            BackendRecord::Array(map) | BackendRecord::Row { columns: map, .. } => {
                index_into(map.get(key)?, index)
            }
            BackendRecord::Object(object) => {
                let memo_key = (key.to_string(), index);
                let mut memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
                memo.entry(memo_key)
                    .or_insert_with(|| object.property(key).and_then(|v| index_into(&v, index)))
                    .clone()
            }
        }
    }

    /// Declared cardinality of `key`, independent of how many items exist
    pub fn is_multiple(&self, key: &str) -> bool {
        match &self.record {
            BackendRecord::Entity(entity) => entity
                .fields
                .get(key)
                .is_some_and(|f| f.cardinality == Cardinality::Multiple),
            BackendRecord::Row { columns, multiple } => {
                multiple.contains(key) || matches!(columns.get(key), Some(Value::Array(_)))
            }
            BackendRecord::Array(map) => matches!(map.get(key), Some(Value::Array(_))),
            BackendRecord::Object(object) => object.is_multiple(key),
        }
    }

    /// Number of populated items under `key`
    pub fn count(&self, key: &str) -> usize {
        match &self.record {
            BackendRecord::Entity(entity) => entity.fields.get(key).map_or(0, |f| f.items.len()),
            _ => match self.get_raw(key, None) {
                Some(Value::Array(items)) => items.len(),
                Some(Value::Null) | None => 0,
                Some(_) => 1,
            },
        }
    }
}

fn index_into(value: &Value, index: Option<usize>) -> Option<Value> {
    match (value, index) {
        (Value::Array(items), Some(i)) => items.get(i).cloned(),
        (other, Some(0)) | (other, None) => Some(other.clone()),
        _ => None,
    }
}
