use axum::http::Method;
use std::collections::{BTreeSet, HashSet};

use super::callback::{Bound, CallbackRegistry, CallbackSpec, ProcessCallback, ValueCallback};
use super::source::Cardinality;
use super::version::ResourceVersion;
use crate::auth::Identity;
use crate::error::ApiError;

/// Points a field at another resource to embed instead of a raw identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceReference {
    pub resource_name: String,
    pub major_version: u32,
    pub minor_version: u32,
    pub full_view: bool,
}

impl ResourceReference {
    pub fn new(resource_name: impl Into<String>, major_version: u32, minor_version: u32) -> Self {
        Self {
            resource_name: resource_name.into(),
            major_version,
            minor_version,
            full_view: false,
        }
    }

    pub fn full_view(mut self) -> Self {
        self.full_view = true;
        self
    }

    pub fn version(&self) -> ResourceVersion {
        ResourceVersion::new(self.major_version, self.minor_version)
    }
}

/// One entry of a resource's public schema
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub public_name: String,
    pub property: Option<String>,
    pub sub_property: Option<String>,
    pub callback: Option<CallbackSpec>,
    pub process_callbacks: Vec<CallbackSpec>,
    /// Display formatter applied by the basic retriever
    pub formatter: Option<CallbackSpec>,
    /// Read raw values, bypassing display formatting
    pub metadata_view: bool,
    pub cardinality: Cardinality,
    pub embedded_resource: Option<ResourceReference>,
    /// Methods this field takes part in; `None` means every method
    pub methods: Option<HashSet<Method>>,
    /// Identity needs one of these roles to see or write the field
    pub required_roles: BTreeSet<String>,
    /// Must be present when creating or replacing
    pub required: bool,
}

impl FieldDefinition {
    fn blank(public_name: impl Into<String>) -> Self {
        Self {
            public_name: public_name.into(),
            property: None,
            sub_property: None,
            callback: None,
            process_callbacks: Vec::new(),
            formatter: None,
            metadata_view: false,
            cardinality: Cardinality::Single,
            embedded_resource: None,
            methods: None,
            required_roles: BTreeSet::new(),
            required: false,
        }
    }

    /// Field read from a backing property
    pub fn property(public_name: impl Into<String>, property: impl Into<String>) -> Self {
        let mut field = Self::blank(public_name);
        field.property = Some(property.into());
        field
    }

    /// Derived field computed by a registered value callback
    pub fn computed(public_name: impl Into<String>, callback: impl Into<CallbackSpec>) -> Self {
        let mut field = Self::blank(public_name);
        field.callback = Some(callback.into());
        field
    }

    pub fn sub_property(mut self, sub_property: impl Into<String>) -> Self {
        self.sub_property = Some(sub_property.into());
        self
    }

    pub fn callback(mut self, callback: impl Into<CallbackSpec>) -> Self {
        self.callback = Some(callback.into());
        self
    }

    pub fn process(mut self, callback: impl Into<CallbackSpec>) -> Self {
        self.process_callbacks.push(callback.into());
        self
    }

    pub fn formatter(mut self, callback: impl Into<CallbackSpec>) -> Self {
        self.formatter = Some(callback.into());
        self
    }

    pub fn metadata_view(mut self) -> Self {
        self.metadata_view = true;
        self
    }

    pub fn multiple(mut self) -> Self {
        self.cardinality = Cardinality::Multiple;
        self
    }

    pub fn embed(mut self, reference: ResourceReference) -> Self {
        self.embedded_resource = Some(reference);
        self
    }

    pub fn methods<I: IntoIterator<Item = Method>>(mut self, methods: I) -> Self {
        self.methods = Some(methods.into_iter().collect());
        self
    }

    /// Visible on reads only
    pub fn read_only(self) -> Self {
        self.methods([Method::GET, Method::HEAD])
    }

    /// Accepted on writes only, never rendered
    pub fn write_only(self) -> Self {
        self.methods([Method::POST, Method::PUT, Method::PATCH])
    }

    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn is_multiple(&self) -> bool {
        self.cardinality == Cardinality::Multiple
    }

    pub fn applies_to(&self, method: &Method) -> bool {
        match &self.methods {
            Some(methods) => methods.contains(method),
            None => true,
        }
    }

    /// Field-level capability check
    pub fn is_accessible(&self, identity: &Identity) -> bool {
        self.required_roles.is_empty() || identity.has_any_role(&self.required_roles)
    }
}

/// A field with its callbacks resolved against the registry
#[derive(Debug, Clone)]
pub struct CompiledField {
    pub definition: FieldDefinition,
    pub callback: Option<Bound<ValueCallback>>,
    pub processes: Vec<Bound<ProcessCallback>>,
    pub formatter: Option<Bound<ProcessCallback>>,
}

impl CompiledField {
    pub fn compile(definition: FieldDefinition, registry: &CallbackRegistry) -> Result<Self, ApiError> {
        if definition.property.is_none() && definition.callback.is_none() {
            return Err(ApiError::server_configuration(format!(
                "Field '{}' has neither a property nor a callback",
                definition.public_name
            )));
        }

        let callback = definition
            .callback
            .as_ref()
            .map(|spec| registry.bind_value(spec))
            .transpose()?;
        let processes = definition
            .process_callbacks
            .iter()
            .map(|spec| registry.bind_process(spec))
            .collect::<Result<Vec<_>, _>>()?;
        let formatter = definition
            .formatter
            .as_ref()
            .map(|spec| registry.bind_process(spec))
            .transpose()?;

        Ok(Self {
            definition,
            callback,
            processes,
            formatter,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.public_name
    }

    /// Backed by a storage property that writes can target
    pub fn is_writable(&self) -> bool {
        self.callback.is_none() && self.definition.property.is_some()
    }
}

/// Ordered public schema of one resource version
#[derive(Debug, Clone, Default)]
pub struct FieldSchema {
    fields: Vec<CompiledField>,
}

impl FieldSchema {
    pub fn compile(
        definitions: Vec<FieldDefinition>,
        registry: &CallbackRegistry,
    ) -> Result<Self, ApiError> {
        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(definitions.len());
        for definition in definitions {
            if !seen.insert(definition.public_name.clone()) {
                return Err(ApiError::server_configuration(format!(
                    "Duplicate public field '{}'",
                    definition.public_name
                )));
            }
            fields.push(CompiledField::compile(definition, registry)?);
        }
        Ok(Self { fields })
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledField> {
        self.fields.iter()
    }

    pub fn get(&self, public_name: &str) -> Option<&CompiledField> {
        self.fields.iter().find(|f| f.name() == public_name)
    }

    /// Storage property behind a public name, for sorting and filtering
    pub fn property_of(&self, public_name: &str) -> Option<&str> {
        self.get(public_name)
            .filter(|f| f.callback.is_none())
            .and_then(|f| f.definition.property.as_deref())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
