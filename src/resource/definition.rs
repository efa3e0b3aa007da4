use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use super::callback::CallbackRegistry;
use super::field::{FieldDefinition, FieldSchema};
use super::source::BackendKind;
use super::version::ResourceVersion;
use crate::auth::{AuthenticationPolicy, Identity};
use crate::error::ApiError;
use crate::provider::DataProvider;
use crate::rate_limit::RateLimitEvent;
use crate::types::Operation;

/// Resource as authored: fields still carry callback names
pub struct ResourceDefinition {
    pub name: String,
    pub version: ResourceVersion,
    pub backend: BackendKind,
    pub fields: Vec<FieldDefinition>,
    pub provider: Arc<dyn DataProvider>,
    pub authentication: AuthenticationPolicy,
    pub rate_limits: Vec<RateLimitEvent>,
    /// Formatter name that overrides content negotiation
    pub formatter: Option<String>,
    pub operations: BTreeSet<Operation>,
    pub operation_roles: HashMap<Operation, BTreeSet<String>>,
    pub render_cache: bool,
}

impl ResourceDefinition {
    pub fn new(
        name: impl Into<String>,
        major: u32,
        minor: u32,
        backend: BackendKind,
        provider: Arc<dyn DataProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            version: ResourceVersion::new(major, minor),
            backend,
            fields: Vec::new(),
            provider,
            authentication: AuthenticationPolicy::optional(),
            rate_limits: Vec::new(),
            formatter: None,
            operations: [Operation::Index, Operation::View].into_iter().collect(),
            operation_roles: HashMap::new(),
            render_cache: false,
        }
    }

    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn authentication(mut self, policy: AuthenticationPolicy) -> Self {
        self.authentication = policy;
        self
    }

    pub fn rate_limit(mut self, event: RateLimitEvent) -> Self {
        self.rate_limits.push(event);
        self
    }

    pub fn formatter(mut self, name: impl Into<String>) -> Self {
        self.formatter = Some(name.into());
        self
    }

    pub fn operations<I: IntoIterator<Item = Operation>>(mut self, operations: I) -> Self {
        self.operations = operations.into_iter().collect();
        self
    }

    /// Allow every read and write operation
    pub fn writable(self) -> Self {
        self.operations([
            Operation::Index,
            Operation::View,
            Operation::Create,
            Operation::Update,
            Operation::Replace,
            Operation::Remove,
        ])
    }

    /// Restrict `operation` to identities holding one of `roles`
    pub fn require_roles<I, S>(mut self, operation: Operation, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.operation_roles
            .insert(operation, roles.into_iter().map(Into::into).collect());
        self
    }

    pub fn cache_rendered(mut self) -> Self {
        self.render_cache = true;
        self
    }

    /// Resolve callbacks and check the provider against the declared backend
    pub fn compile(self, registry: &CallbackRegistry) -> Result<Resource, ApiError> {
        let provider_backend = self.provider.backend();
        if provider_backend != self.backend {
            return Err(ApiError::server_configuration(format!(
                "Resource '{}' v{} declares a {} backend but its provider serves {} records",
                self.name, self.version, self.backend, provider_backend
            )));
        }

        let fields = FieldSchema::compile(self.fields, registry).map_err(|e| {
            ApiError::server_configuration(format!(
                "Resource '{}' v{}: {}",
                self.name,
                self.version,
                e.message()
            ))
        })?;

        Ok(Resource {
            name: self.name,
            version: self.version,
            backend: self.backend,
            fields,
            provider: self.provider,
            authentication: self.authentication,
            rate_limits: self.rate_limits,
            formatter: self.formatter,
            operations: self.operations,
            operation_roles: self.operation_roles,
            render_cache: self.render_cache,
        })
    }
}

/// A registered, compiled resource version
pub struct Resource {
    pub name: String,
    pub version: ResourceVersion,
    pub backend: BackendKind,
    pub fields: FieldSchema,
    pub provider: Arc<dyn DataProvider>,
    pub authentication: AuthenticationPolicy,
    pub rate_limits: Vec<RateLimitEvent>,
    pub formatter: Option<String>,
    pub operations: BTreeSet<Operation>,
    pub operation_roles: HashMap<Operation, BTreeSet<String>>,
    pub render_cache: bool,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("backend", &self.backend)
            .field("fields", &self.fields.len())
            .finish()
    }
}

impl Resource {
    /// Cache tag covering every rendering of one record
    pub fn record_tag(name: &str, id: &str) -> String {
        format!("{}:{}", name, id)
    }

    /// Operation-level access: unsupported is a bad request, missing roles
    /// are unauthorized for anonymous callers and forbidden otherwise
    pub fn check_operation(&self, operation: Operation, identity: &Identity) -> Result<(), ApiError> {
        if !self.operations.contains(&operation) {
            return Err(ApiError::bad_request(format!(
                "Resource '{}' does not support {:?}",
                self.name, operation
            )));
        }
        match self.operation_roles.get(&operation) {
            Some(roles) if !identity.has_any_role(roles) => {
                if identity.is_anonymous() {
                    Err(ApiError::unauthorized("Authentication required"))
                } else {
                    Err(ApiError::forbidden(format!(
                        "Access to {:?} on '{}' denied",
                        operation, self.name
                    )))
                }
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{EntityDataProvider, MemoryDataProvider};

    #[test]
    fn backend_mismatch_is_a_configuration_error() {
        let definition = ResourceDefinition::new(
            "articles",
            1,
            0,
            BackendKind::Entity,
            Arc::new(MemoryDataProvider::new()),
        );
        let err = definition.compile(&CallbackRegistry::new()).unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert!(err.message().contains("entity"));
    }

    #[test]
    fn operation_roles_distinguish_anonymous_from_forbidden() {
        let resource = ResourceDefinition::new(
            "articles",
            1,
            0,
            BackendKind::Entity,
            Arc::new(EntityDataProvider::new()),
        )
        .field(FieldDefinition::property("id", "id"))
        .writable()
        .require_roles(Operation::Create, ["editor"])
        .compile(&CallbackRegistry::new())
        .unwrap();

        let anonymous = resource.check_operation(Operation::Create, &Identity::anonymous());
        assert_eq!(anonymous.unwrap_err().status_code(), 401);
        let reader = resource.check_operation(Operation::Create, &Identity::new("2", "r", ["reader"]));
        assert_eq!(reader.unwrap_err().status_code(), 403);
        assert!(resource
            .check_operation(Operation::Create, &Identity::new("3", "e", ["editor"]))
            .is_ok());
        assert!(resource.check_operation(Operation::View, &Identity::anonymous()).is_ok());
    }
}
