//! Primary value retrieval for one field.
//!
//! Precedence is fixed: a value callback wins over everything; a metadata
//! view without a display formatter reads raw values; everything else goes
//! through the basic retriever.

use serde_json::Value;

use super::field::CompiledField;
use super::source::PropertySource;
use crate::error::ApiError;

pub trait PropertyRetriever: Send + Sync {
    fn retrieve(&self, field: &CompiledField, source: &PropertySource) -> Result<Option<Value>, ApiError>;
}

/// Uses the callback's return value verbatim
pub struct CallbackRetriever;

/// Raw stored values, no display formatting, no sub-property projection
pub struct MetadataRetriever;

/// `property` (optionally `subProperty`), then the display formatter if any
pub struct BasicRetriever;

static CALLBACK: CallbackRetriever = CallbackRetriever;
static METADATA: MetadataRetriever = MetadataRetriever;
static BASIC: BasicRetriever = BasicRetriever;

/// Pick the strategy for `field`
pub fn retriever_for(field: &CompiledField) -> &'static dyn PropertyRetriever {
    if field.callback.is_some() {
        &CALLBACK
    } else if field.definition.metadata_view && field.formatter.is_none() {
        &METADATA
    } else {
        &BASIC
    }
}

/// Whether the resolved value must be a sequence
pub fn is_multiple(field: &CompiledField, source: &PropertySource) -> bool {
    if field.definition.is_multiple() {
        return true;
    }
    match (&field.callback, &field.definition.property) {
        (None, Some(property)) => source.is_multiple(property),
        _ => false,
    }
}

pub fn retrieve(field: &CompiledField, source: &PropertySource) -> Result<Option<Value>, ApiError> {
    retriever_for(field).retrieve(field, source)
}

impl PropertyRetriever for CallbackRetriever {
    fn retrieve(&self, field: &CompiledField, source: &PropertySource) -> Result<Option<Value>, ApiError> {
        match &field.callback {
            Some(callback) => callback.call(source),
            None => Ok(None),
        }
    }
}

impl PropertyRetriever for MetadataRetriever {
    fn retrieve(&self, field: &CompiledField, source: &PropertySource) -> Result<Option<Value>, ApiError> {
        let Some(property) = field.definition.property.as_deref() else {
            return Ok(None);
        };
        collect(field, source, property, |index| Ok(source.get_raw(property, index)))
    }
}

impl PropertyRetriever for BasicRetriever {
    fn retrieve(&self, field: &CompiledField, source: &PropertySource) -> Result<Option<Value>, ApiError> {
        let Some(property) = field.definition.property.as_deref() else {
            return Ok(None);
        };
        let sub = field.definition.sub_property.as_deref();
        collect(field, source, property, |index| {
            let value = source.get(property, index, sub);
            match (&field.formatter, value) {
                (Some(formatter), Some(v)) if !v.is_null() => formatter.call(v),
                (_, v) => Ok(v),
            }
        })
    }
}

/// Read one value, or every item when the field is multiple
fn collect<F>(
    field: &CompiledField,
    source: &PropertySource,
    property: &str,
    read: F,
) -> Result<Option<Value>, ApiError>
where
    F: Fn(Option<usize>) -> Result<Option<Value>, ApiError>,
{
    if !is_multiple(field, source) {
        return read(None);
    }

    let mut items = Vec::new();
    for index in 0..source.count(property) {
        if let Some(value) = read(Some(index))? {
            items.push(value);
        }
    }
    Ok(Some(Value::Array(items)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::callback::CallbackRegistry;
    use crate::resource::field::FieldDefinition;
    use crate::resource::source::{BackendRecord, EntityField, EntityRecord};
    use serde_json::json;

    fn registry() -> CallbackRegistry {
        let mut registry = CallbackRegistry::with_builtins();
        registry.register_value("constant", |_, args| Ok(args.first().cloned()));
        registry
    }

    fn compile(definition: FieldDefinition) -> CompiledField {
        CompiledField::compile(definition, &registry()).unwrap()
    }

    fn entity() -> PropertySource {
        let record = EntityRecord::new("1").with_field(
            "author",
            EntityField {
                cardinality: crate::resource::source::Cardinality::Single,
                main_column: "name".into(),
                items: vec![json!({"name": "ada", "uid": 4})]
                    .into_iter()
                    .filter_map(|v| v.as_object().cloned())
                    .collect(),
            },
        );
        PropertySource::new(BackendRecord::Entity(record))
    }

    #[test]
    fn callback_takes_precedence_over_property() {
        let field = compile(
            FieldDefinition::property("author", "author")
                .callback(crate::resource::callback::CallbackSpec::new("constant").with_args([json!(7)])),
        );
        assert_eq!(retrieve(&field, &entity()).unwrap(), Some(json!(7)));
    }

    #[test]
    fn metadata_reads_raw_items() {
        let field = compile(FieldDefinition::property("author", "author").metadata_view());
        assert_eq!(
            retrieve(&field, &entity()).unwrap(),
            Some(json!({"name": "ada", "uid": 4}))
        );
    }

    #[test]
    fn formatter_disables_metadata_view() {
        let field = compile(
            FieldDefinition::property("author", "author")
                .metadata_view()
                .formatter("uppercase"),
        );
        assert_eq!(retrieve(&field, &entity()).unwrap(), Some(json!("ADA")));
    }

    #[test]
    fn basic_reads_main_column_or_sub_property() {
        let field = compile(FieldDefinition::property("author", "author"));
        assert_eq!(retrieve(&field, &entity()).unwrap(), Some(json!("ada")));
        let field = compile(FieldDefinition::property("author_id", "author").sub_property("uid"));
        assert_eq!(retrieve(&field, &entity()).unwrap(), Some(json!(4)));
    }

    #[test]
    fn multiple_fields_yield_sequences() {
        let source = PropertySource::new(BackendRecord::Array(
            json!({"tags": 3}).as_object().cloned().unwrap_or_default(),
        ));
        let field = compile(FieldDefinition::property("tags", "tags").multiple());
        assert_eq!(retrieve(&field, &source).unwrap(), Some(json!([3])));

        let empty = PropertySource::new(BackendRecord::Array(Default::default()));
        assert_eq!(retrieve(&field, &empty).unwrap(), Some(json!([])));
    }
}
