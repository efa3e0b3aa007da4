use serde_json::{json, Map, Value};

use super::{Document, DocumentBody, Formatter, Links};
use crate::error::ApiError;

/// Plain JSON: records as objects, listings wrapped with `count` and `links`
pub struct JsonFormatter;

/// HAL+JSON: `_links` on every document, listings under `_embedded`
pub struct HalJsonFormatter;

impl JsonFormatter {
    pub fn to_value(document: &Document) -> Value {
        match &document.body {
            DocumentBody::Record(record) => Value::Object(record.clone()),
            DocumentBody::Records(records) => {
                Value::Array(records.iter().cloned().map(Value::Object).collect())
            }
            DocumentBody::Collection { items, count } => json!({
                "data": items,
                "count": count,
                "links": links_value(&document.links, |href| Value::String(href.to_string())),
            }),
        }
    }
}

impl Formatter for JsonFormatter {
    fn name(&self) -> &str {
        "json"
    }

    fn content_type(&self) -> &str {
        "application/json; charset=utf-8"
    }

    fn render(&self, document: &Document) -> Result<Vec<u8>, ApiError> {
        serialize(&Self::to_value(document))
    }
}

impl HalJsonFormatter {
    pub fn to_value(document: &Document) -> Value {
        let links = links_value(&document.links, |href| json!({ "href": href }));
        match &document.body {
            DocumentBody::Record(record) => {
                let mut record = record.clone();
                record.insert("_links".into(), links);
                Value::Object(record)
            }
            DocumentBody::Records(records) => embedded(&document.resource, records, None, links),
            DocumentBody::Collection { items, count } => {
                embedded(&document.resource, items, Some(*count), links)
            }
        }
    }
}

impl Formatter for HalJsonFormatter {
    fn name(&self) -> &str {
        "hal_json"
    }

    fn content_type(&self) -> &str {
        "application/hal+json; charset=utf-8"
    }

    fn render(&self, document: &Document) -> Result<Vec<u8>, ApiError> {
        serialize(&Self::to_value(document))
    }
}

fn embedded(resource: &str, items: &[Map<String, Value>], count: Option<u64>, links: Value) -> Value {
    let mut embedded = Map::new();
    embedded.insert(resource.to_string(), json!(items));

    let mut output = Map::new();
    output.insert("_links".into(), links);
    output.insert("_embedded".into(), Value::Object(embedded));
    if let Some(count) = count {
        output.insert("count".into(), json!(count));
    }
    Value::Object(output)
}

fn links_value<F: Fn(&str) -> Value>(links: &Links, link: F) -> Value {
    let mut output = Map::new();
    output.insert("self".into(), link(&links.self_link));
    if let Some(next) = &links.next {
        output.insert("next".into(), link(next));
    }
    if let Some(previous) = &links.previous {
        output.insert("previous".into(), link(previous));
    }
    Value::Object(output)
}

fn serialize(value: &Value) -> Result<Vec<u8>, ApiError> {
    serde_json::to_vec(value).map_err(|e| {
        tracing::error!("Failed to serialize response: {}", e);
        ApiError::internal_server_error("Failed to serialize response")
    })
}
