//! Row <-> JSON conversion for tables whose shape is only known at runtime.

use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row};

/// Convert one row into a column-name keyed JSON map
pub fn row_to_json(row: &PgRow) -> Map<String, Value> {
    let mut map = Map::new();

    for i in 0..row.len() {
        let column_name = row.column(i).name();
        let value: Result<Option<Value>, _> = row.try_get(i);

        let json_value = match value {
            Ok(Some(v)) => v,
            Ok(None) => Value::Null,
            Err(_) => {
                // Try different types if direct JSON extraction fails
                if let Ok(s) = row.try_get::<Option<String>, _>(i) {
                    s.map(Value::String).unwrap_or(Value::Null)
                } else if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
                    v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null)
                } else if let Ok(v) = row.try_get::<Option<i32>, _>(i) {
                    v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null)
                } else if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
                    v.and_then(serde_json::Number::from_f64)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                } else if let Ok(v) = row.try_get::<Option<bool>, _>(i) {
                    v.map(Value::Bool).unwrap_or(Value::Null)
                } else if let Ok(v) = row.try_get::<Option<uuid::Uuid>, _>(i) {
                    v.map(|u| Value::String(u.to_string())).unwrap_or(Value::Null)
                } else if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i) {
                    v.map(|t| Value::String(t.to_rfc3339())).unwrap_or(Value::Null)
                } else if let Ok(v) = row.try_get::<Option<Vec<String>>, _>(i) {
                    v.map(|items| Value::Array(items.into_iter().map(Value::String).collect()))
                        .unwrap_or(Value::Null)
                } else if let Ok(v) = row.try_get::<Option<Vec<i64>>, _>(i) {
                    v.map(|items| Value::Array(items.into_iter().map(Value::from).collect()))
                        .unwrap_or(Value::Null)
                } else {
                    Value::Null
                }
            }
        };

        map.insert(column_name.to_string(), json_value);
    }

    map
}

/// Bind a JSON value as a positional parameter
pub fn bind_param<'q>(
    q: Query<'q, Postgres, PgArguments>,
    v: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match v {
        Value::Null => {
            let none: Option<String> = None;
            q.bind(none)
        }
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(u) = n.as_u64() {
                q.bind(u as i64)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => q.bind(s.as_str()),
        Value::Array(items) => {
            // Postgres arrays are homogeneous; bind as text[] unless every item is an integer
            if items.iter().all(|i| i.as_i64().is_some()) {
                q.bind(items.iter().filter_map(Value::as_i64).collect::<Vec<i64>>())
            } else {
                q.bind(
                    items
                        .iter()
                        .map(|i| match i {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect::<Vec<String>>(),
                )
            }
        }
        Value::Object(_) => q.bind(v.clone()),
    }
}
