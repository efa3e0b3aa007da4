//! Schema-driven record resolution.
//!
//! For every field that survives the method filter, the request's field
//! limit and the field access check, the engine retrieves the primary value,
//! runs the process callbacks, embeds related resources and shapes the
//! result by cardinality. Output keys follow schema order.

use axum::http::Method;
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use std::collections::HashSet;

use super::definition::Resource;
use super::field::{CompiledField, ResourceReference};
use super::manager::ResourceManager;
use super::retriever;
use super::source::{is_empty, scalar_to_string, BackendRecord, PropertySource};
use super::version::ResourceVersion;
use crate::auth::Identity;
use crate::cache::ResourceCache;
use crate::error::{ApiError, FieldErrors};
use crate::types::Operation;

/// Request-scoped inputs to a resolution pass
#[derive(Debug, Clone)]
pub struct ResolveContext<'a> {
    pub identity: &'a Identity,
    /// Method the field schema is filtered by
    pub method: Method,
    /// Public names the caller asked for; applies to the top-level resource only
    pub field_limit: Option<HashSet<String>>,
}

impl<'a> ResolveContext<'a> {
    pub fn new(identity: &'a Identity, method: Method) -> Self {
        Self {
            identity,
            method,
            field_limit: None,
        }
    }

    pub fn with_field_limit(mut self, limit: Option<HashSet<String>>) -> Self {
        self.field_limit = limit;
        self
    }

    fn allows(&self, field: &CompiledField, top_level: bool) -> bool {
        if !field.definition.applies_to(&self.method) {
            return false;
        }
        if top_level {
            if let Some(limit) = &self.field_limit {
                if !limit.contains(field.name()) {
                    return false;
                }
            }
        }
        field.definition.is_accessible(self.identity)
    }
}

/// Resource versions currently being resolved, and every record touched
#[derive(Debug, Default)]
pub struct ResolutionTrail {
    stack: Vec<(String, ResourceVersion)>,
    tags: Vec<String>,
}

impl ResolutionTrail {
    /// Cache tags of every record the pass resolved, outermost first
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    fn enter(&mut self, resource: &Resource, max_depth: usize) -> Result<(), ApiError> {
        let node = (resource.name.clone(), resource.version);
        if self.stack.contains(&node) {
            let path: Vec<String> = self
                .stack
                .iter()
                .chain(std::iter::once(&node))
                .map(|(name, version)| format!("{} v{}", name, version))
                .collect();
            return Err(ApiError::server_configuration(format!(
                "Cyclic embedding: {}",
                path.join(" -> ")
            )));
        }
        if self.stack.len() >= max_depth {
            return Err(ApiError::server_configuration(format!(
                "Embedding deeper than {} levels at '{}' v{}",
                max_depth, resource.name, resource.version
            )));
        }
        self.stack.push(node);
        Ok(())
    }

    fn leave(&mut self) {
        self.stack.pop();
    }

    fn touch(&mut self, name: &str, id: &str) {
        let tag = Resource::record_tag(name, id);
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }
}

pub struct FieldResolutionEngine<'a> {
    resources: &'a ResourceManager,
    render_cache: Option<&'a ResourceCache>,
    max_depth: usize,
}

impl<'a> FieldResolutionEngine<'a> {
    pub fn new(resources: &'a ResourceManager, max_depth: usize) -> Self {
        Self {
            resources,
            render_cache: None,
            max_depth,
        }
    }

    pub fn with_render_cache(mut self, cache: Option<&'a ResourceCache>) -> Self {
        self.render_cache = cache;
        self
    }

    /// Resolve one record of `resource` into its public representation
    pub async fn resolve(
        &self,
        record: BackendRecord,
        resource: &Resource,
        ctx: &ResolveContext<'_>,
    ) -> Result<Map<String, Value>, ApiError> {
        let mut trail = ResolutionTrail::default();
        self.resolve_with_trail(record, resource, ctx, &mut trail).await
    }

    pub async fn resolve_with_trail(
        &self,
        record: BackendRecord,
        resource: &Resource,
        ctx: &ResolveContext<'_>,
        trail: &mut ResolutionTrail,
    ) -> Result<Map<String, Value>, ApiError> {
        self.resolve_record(record, resource, ctx, trail, true).await
    }

    /// Load and resolve one record by id, going through the render cache
    /// when the resource opted into it
    pub async fn view(
        &self,
        resource: &Resource,
        id: &str,
        ctx: &ResolveContext<'_>,
    ) -> Result<Option<Map<String, Value>>, ApiError> {
        let cache = self.render_cache.filter(|_| resource.render_cache);
        let key = cache.map(|_| render_key(resource, id, ctx));

        if let (Some(cache), Some(key)) = (cache, &key) {
            if let Some(Value::Object(cached)) = cache.get(key) {
                tracing::debug!("Render cache hit for '{}' {}", resource.name, id);
                return Ok(Some(cached));
            }
        }

        let Some(record) = resource.provider.view(id).await? else {
            return Ok(None);
        };
        let mut trail = ResolutionTrail::default();
        let resolved = self.resolve_with_trail(record, resource, ctx, &mut trail).await?;

        if let (Some(cache), Some(key)) = (cache, &key) {
            let mut tags = vec![Resource::record_tag(&resource.name, id)];
            tags.extend(trail.tags().iter().cloned());
            cache.set(key, Value::Object(resolved.clone()), tags);
        }
        Ok(Some(resolved))
    }

    fn resolve_record<'s>(
        &'s self,
        record: BackendRecord,
        resource: &'s Resource,
        ctx: &'s ResolveContext<'s>,
        trail: &'s mut ResolutionTrail,
        top_level: bool,
    ) -> BoxFuture<'s, Result<Map<String, Value>, ApiError>> {
        async move {
            trail.enter(resource, self.max_depth)?;
            let mut source = PropertySource::new(record);
            let mut output = Map::new();

            for field in resource.fields.iter() {
                if !ctx.allows(field, top_level) {
                    continue;
                }

                source.clear_context();
                source.set_context("field", Value::String(field.name().to_string()));
                if let Some(sub) = &field.definition.sub_property {
                    source.set_context("subProperty", Value::String(sub.clone()));
                }

                let multiple = retriever::is_multiple(field, &source);
                let value = retriever::retrieve(field, &source)?;
                let value = apply_processes(field, value)?;

                let value = match (&field.definition.embedded_resource, value) {
                    (Some(reference), Some(value)) if !value.is_null() => {
                        Some(self.embed(reference, value, ctx, trail).await?)
                    }
                    (_, value) => value,
                };

                match shape(value, multiple) {
                    Some(value) => {
                        output.insert(field.name().to_string(), value);
                    }
                    None => tracing::trace!("Field '{}' has no value", field.name()),
                }
            }

            trail.leave();
            Ok(output)
        }
        .boxed()
    }

    /// Replace identifiers with the target resource's view (full view) or
    /// keep them as they are
    async fn embed(
        &self,
        reference: &ResourceReference,
        value: Value,
        ctx: &ResolveContext<'_>,
        trail: &mut ResolutionTrail,
    ) -> Result<Value, ApiError> {
        if !reference.full_view {
            return Ok(value);
        }

        let target = self
            .resources
            .get(&reference.resource_name, reference.version())
            .ok_or_else(|| {
                ApiError::server_configuration(format!(
                    "Embedded resource '{}' v{} is not registered",
                    reference.resource_name,
                    reference.version()
                ))
            })?;

        // Embedded resources render with their own full schema
        let nested_ctx = ResolveContext {
            identity: ctx.identity,
            method: ctx.method.clone(),
            field_limit: None,
        };

        let (ids, sequence) = match value {
            Value::Array(items) => (items, true),
            single => (vec![single], false),
        };

        let mut resolved = Vec::with_capacity(ids.len());
        for raw in ids {
            let id = scalar_to_string(&raw).ok_or_else(|| {
                ApiError::server_configuration(format!(
                    "Embedded '{}' reference must be a scalar identifier, got {}",
                    reference.resource_name, raw
                ))
            })?;
            let record = target.provider.view(&id).await?.ok_or_else(|| {
                ApiError::not_found(format!(
                    "Embedded {} {} not found",
                    reference.resource_name, id
                ))
            })?;
            trail.touch(&target.name, &id);
            let map = self
                .resolve_record(record, &target, &nested_ctx, trail, false)
                .await?;
            resolved.push(Value::Object(map));
        }

        Ok(if sequence {
            Value::Array(resolved)
        } else {
            resolved.into_iter().next().unwrap_or(Value::Null)
        })
    }

    /// Translate a write body from public names to storage properties.
    ///
    /// Every problem is collected per field and reported together.
    pub fn map_input(
        &self,
        body: &Value,
        resource: &Resource,
        operation: Operation,
        ctx: &ResolveContext<'_>,
    ) -> Result<Map<String, Value>, ApiError> {
        map_input(body, resource, operation, ctx)
    }
}

/// Run process callbacks in order, stopping once the value is empty
fn apply_processes(field: &CompiledField, value: Option<Value>) -> Result<Option<Value>, ApiError> {
    let mut value = value;
    for process in &field.processes {
        if is_empty(&value) {
            break;
        }
        if let Some(current) = value.take() {
            value = process.call(current)?;
        }
    }
    Ok(value)
}

/// Multiple fields are always sequences; otherwise null means "omit"
fn shape(value: Option<Value>, multiple: bool) -> Option<Value> {
    match (value, multiple) {
        (None | Some(Value::Null), true) => Some(Value::Array(Vec::new())),
        (Some(Value::Array(items)), true) => Some(Value::Array(items)),
        (Some(single), true) => Some(Value::Array(vec![single])),
        (None | Some(Value::Null), false) => None,
        (Some(value), false) => Some(value),
    }
}

fn render_key(resource: &Resource, id: &str, ctx: &ResolveContext<'_>) -> String {
    let limit = ctx
        .field_limit
        .as_ref()
        .map(|limit| {
            let mut names: Vec<&str> = limit
                .iter()
                .map(String::as_str)
                .filter(|name| resource.fields.get(name).is_some())
                .collect();
            names.sort_unstable();
            names.join(",")
        })
        .unwrap_or_default();
    let version = resource.version.to_string();
    ResourceCache::key(
        "render",
        &[
            &resource.name,
            &version,
            id,
            &ctx.identity.id,
            ctx.method.as_str(),
            &limit,
        ],
    )
}

pub fn map_input(
    body: &Value,
    resource: &Resource,
    operation: Operation,
    ctx: &ResolveContext<'_>,
) -> Result<Map<String, Value>, ApiError> {
    let Value::Object(input) = body else {
        return Err(ApiError::bad_request("Request body must be a JSON object"));
    };

    let mut errors = FieldErrors::new();
    let mut output = Map::new();
    let mut add_error = |name: &str, message: &str| {
        errors
            .entry(name.to_string())
            .or_default()
            .push(message.to_string());
    };

    for (name, value) in input {
        let Some(field) = resource.fields.get(name) else {
            add_error(name, "Unknown field");
            continue;
        };
        let definition = &field.definition;
        if !definition.applies_to(&ctx.method) {
            add_error(name, "Field cannot be written with this method");
            continue;
        }
        if !definition.is_accessible(ctx.identity) {
            add_error(name, "You do not have access to this field");
            continue;
        }
        let Some(property) = definition.property.as_deref().filter(|_| field.is_writable()) else {
            add_error(name, "Computed field cannot be written");
            continue;
        };
        if definition.required && value.is_null() {
            add_error(name, "This field is required");
            continue;
        }
        if definition.is_multiple() && !matches!(value, Value::Array(_) | Value::Null) {
            add_error(name, "Expected a list of values");
            continue;
        }

        let value = match &definition.embedded_resource {
            Some(_) => match reference_ids(value) {
                Some(ids) => ids,
                None => {
                    add_error(name, "Expected identifiers or objects with an id");
                    continue;
                }
            },
            None => value.clone(),
        };
        let value = match &definition.sub_property {
            Some(sub) => wrap_sub_property(sub, value),
            None => value,
        };
        output.insert(property.to_string(), value);
    }

    if matches!(operation, Operation::Create | Operation::Replace) {
        for field in resource.fields.iter() {
            let definition = &field.definition;
            if !definition.required
                || !definition.applies_to(&ctx.method)
                || !field.is_writable()
                || !definition.is_accessible(ctx.identity)
            {
                continue;
            }
            if !input.contains_key(field.name()) {
                add_error(field.name(), "This field is required");
            }
        }
    }

    if !errors.is_empty() {
        tracing::debug!("Rejected input for '{}': {:?}", resource.name, errors);
        return Err(ApiError::unprocessable_entity("Invalid input", errors));
    }
    Ok(output)
}

/// Embedded values may be written as ids or as the objects a full view returns
fn reference_ids(value: &Value) -> Option<Value> {
    fn id_of(value: &Value) -> Option<Value> {
        match value {
            Value::Object(map) => map.get("id").filter(|v| scalar_to_string(v).is_some()).cloned(),
            Value::Null => Some(Value::Null),
            other => scalar_to_string(other).map(|_| other.clone()),
        }
    }
    match value {
        Value::Array(items) => items
            .iter()
            .map(id_of)
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        other => id_of(other),
    }
}

fn wrap_sub_property(sub: &str, value: Value) -> Value {
    let wrap = |v: Value| {
        let mut map = Map::new();
        map.insert(sub.to_string(), v);
        Value::Object(map)
    };
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(wrap).collect()),
        Value::Null => Value::Null,
        other => wrap(other),
    }
}
