use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::source::PropertySource;
use crate::error::ApiError;

/// Produces a field's primary value from the record
pub type ValueCallback =
    Arc<dyn Fn(&PropertySource, &[Value]) -> Result<Option<Value>, ApiError> + Send + Sync>;

/// Transforms an already retrieved value (process pipeline and display formatters)
pub type ProcessCallback = Arc<dyn Fn(Value, &[Value]) -> Result<Option<Value>, ApiError> + Send + Sync>;

/// Callback reference in a field definition: a registered name plus bound arguments
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackSpec {
    pub name: String,
    pub args: Vec<Value>,
}

impl CallbackSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I: IntoIterator<Item = Value>>(mut self, args: I) -> Self {
        self.args = args.into_iter().collect();
        self
    }
}

impl From<&str> for CallbackSpec {
    fn from(name: &str) -> Self {
        CallbackSpec::new(name)
    }
}

/// A callback resolved against the registry, ready to call
#[derive(Clone)]
pub struct Bound<F> {
    pub name: String,
    pub args: Vec<Value>,
    pub func: F,
}

impl<F> fmt::Debug for Bound<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bound")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish()
    }
}

impl Bound<ValueCallback> {
    pub fn call(&self, source: &PropertySource) -> Result<Option<Value>, ApiError> {
        (self.func)(source, &self.args)
    }
}

impl Bound<ProcessCallback> {
    pub fn call(&self, value: Value) -> Result<Option<Value>, ApiError> {
        (self.func)(value, &self.args)
    }
}

/// Named callbacks that field definitions refer to.
///
/// Names are resolved once when a resource registers; an unknown name fails
/// registration instead of the first request that touches the field.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    values: HashMap<String, ValueCallback>,
    processes: HashMap<String, ProcessCallback>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the stock process callbacks
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_process("trim", |value, _| {
            Ok(Some(match value {
                Value::String(s) => Value::String(s.trim().to_string()),
                other => other,
            }))
        });
        registry.register_process("lowercase", |value, _| Ok(Some(map_strings(value, |s| s.to_lowercase()))));
        registry.register_process("uppercase", |value, _| Ok(Some(map_strings(value, |s| s.to_uppercase()))));
        registry.register_process("to_string", |value, _| {
            Ok(Some(match value {
                Value::String(s) => Value::String(s),
                Value::Array(items) => Value::Array(
                    items
                        .into_iter()
                        .map(|v| match v {
                            Value::String(s) => Value::String(s),
                            other => Value::String(other.to_string()),
                        })
                        .collect(),
                ),
                other => Value::String(other.to_string()),
            }))
        });
        // Empty string becomes "no value", stopping the rest of the pipeline
        registry.register_process("null_if_blank", |value, _| {
            Ok(match value {
                Value::String(s) if s.trim().is_empty() => None,
                other => Some(other),
            })
        });
        registry.register_process("truncate", |value, args| {
            let max = args.first().and_then(Value::as_u64).ok_or_else(|| {
                ApiError::server_configuration("truncate expects a length argument")
            })? as usize;
            Ok(Some(map_strings(value, |s| s.chars().take(max).collect())))
        });
        registry
    }

    pub fn register_value<F>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        F: Fn(&PropertySource, &[Value]) -> Result<Option<Value>, ApiError> + Send + Sync + 'static,
    {
        self.values.insert(name.into(), Arc::new(func));
        self
    }

    pub fn register_process<F>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        F: Fn(Value, &[Value]) -> Result<Option<Value>, ApiError> + Send + Sync + 'static,
    {
        self.processes.insert(name.into(), Arc::new(func));
        self
    }

    pub fn bind_value(&self, spec: &CallbackSpec) -> Result<Bound<ValueCallback>, ApiError> {
        let func = self.values.get(&spec.name).cloned().ok_or_else(|| {
            ApiError::server_configuration(format!("Unknown value callback '{}'", spec.name))
        })?;
        Ok(Bound {
            name: spec.name.clone(),
            args: spec.args.clone(),
            func,
        })
    }

    pub fn bind_process(&self, spec: &CallbackSpec) -> Result<Bound<ProcessCallback>, ApiError> {
        let func = self.processes.get(&spec.name).cloned().ok_or_else(|| {
            ApiError::server_configuration(format!("Unknown process callback '{}'", spec.name))
        })?;
        Ok(Bound {
            name: spec.name.clone(),
            args: spec.args.clone(),
            func,
        })
    }
}

fn map_strings(value: Value, f: impl Fn(&str) -> String + Copy) -> Value {
    match value {
        Value::String(s) => Value::String(f(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| map_strings(v, f)).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_names_fail_at_bind_time() {
        let registry = CallbackRegistry::with_builtins();
        let err = registry.bind_process(&CallbackSpec::new("nope")).unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert!(err.message().contains("nope"));
        assert!(registry.bind_value(&"nope".into()).is_err());
    }

    #[test]
    fn builtins_transform_values() {
        let registry = CallbackRegistry::with_builtins();
        let upper = registry.bind_process(&"uppercase".into()).unwrap();
        assert_eq!(upper.call(json!(["a", "b"])).unwrap(), Some(json!(["A", "B"])));

        let truncate = registry
            .bind_process(&CallbackSpec::new("truncate").with_args([json!(3)]))
            .unwrap();
        assert_eq!(truncate.call(json!("Hello")).unwrap(), Some(json!("Hel")));

        let blank = registry.bind_process(&"null_if_blank".into()).unwrap();
        assert_eq!(blank.call(json!("  ")).unwrap(), None);
        assert_eq!(blank.call(json!(0)).unwrap(), Some(json!(0)));
    }
}
