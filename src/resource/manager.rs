use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::callback::CallbackRegistry;
use super::definition::{Resource, ResourceDefinition};
use super::version::{ResourceVersion, VersionRequest};
use crate::cache::ResourceCache;
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::request::RequestContext;

/// Resource version plus the record ids addressed by one request path
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub resource: Arc<Resource>,
    pub ids: Vec<String>,
}

/// Registry of resource versions and the version negotiator over it.
///
/// Registration happens at startup; afterwards the manager is shared read-only.
pub struct ResourceManager {
    resources: BTreeMap<String, BTreeMap<ResourceVersion, Arc<Resource>>>,
    callbacks: CallbackRegistry,
    version_header: String,
    lookups: ResourceCache,
}

impl ResourceManager {
    pub fn new(callbacks: CallbackRegistry, config: &ApiConfig) -> Self {
        Self {
            resources: BTreeMap::new(),
            callbacks,
            version_header: config.version_header.clone(),
            lookups: ResourceCache::in_memory(None),
        }
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    /// Compile and add one resource version
    pub fn register(&mut self, definition: ResourceDefinition) -> Result<Arc<Resource>, ApiError> {
        let resource = Arc::new(definition.compile(&self.callbacks)?);
        let versions = self.resources.entry(resource.name.clone()).or_default();
        if versions.contains_key(&resource.version) {
            return Err(ApiError::server_configuration(format!(
                "Resource '{}' v{} is registered twice",
                resource.name, resource.version
            )));
        }
        versions.insert(resource.version, resource.clone());
        self.lookups.invalidate_tag(&Self::lookup_tag(&resource.name));

        tracing::info!(
            "Registered resource '{}' v{} ({} backend, {} fields)",
            resource.name,
            resource.version,
            resource.backend,
            resource.fields.len()
        );
        Ok(resource)
    }

    /// Cross-resource checks that need the whole registry: every embedded
    /// reference must exist and full-view embedding must not loop
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut edges: HashMap<(String, ResourceVersion), Vec<(String, ResourceVersion)>> =
            HashMap::new();

        for resource in self.all() {
            let node = (resource.name.clone(), resource.version);
            let targets = edges.entry(node).or_default();
            for field in resource.fields.iter() {
                let Some(reference) = &field.definition.embedded_resource else {
                    continue;
                };
                if self.get(&reference.resource_name, reference.version()).is_none() {
                    return Err(ApiError::server_configuration(format!(
                        "Field '{}' of '{}' v{} embeds unregistered '{}' v{}",
                        field.name(),
                        resource.name,
                        resource.version,
                        reference.resource_name,
                        reference.version()
                    )));
                }
                if reference.full_view {
                    targets.push((reference.resource_name.clone(), reference.version()));
                }
            }
        }

        let mut finished = Vec::new();
        let mut nodes: Vec<&(String, ResourceVersion)> = edges.keys().collect();
        nodes.sort();
        for node in nodes {
            let mut path = Vec::new();
            Self::visit(node, &edges, &mut path, &mut finished)?;
        }
        Ok(())
    }

    fn visit(
        node: &(String, ResourceVersion),
        edges: &HashMap<(String, ResourceVersion), Vec<(String, ResourceVersion)>>,
        path: &mut Vec<(String, ResourceVersion)>,
        finished: &mut Vec<(String, ResourceVersion)>,
    ) -> Result<(), ApiError> {
        if finished.contains(node) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|n| n == node) {
            let cycle: Vec<String> = path[start..]
                .iter()
                .chain(std::iter::once(node))
                .map(|(name, version)| format!("{} v{}", name, version))
                .collect();
            return Err(ApiError::server_configuration(format!(
                "Cyclic full-view embedding: {}",
                cycle.join(" -> ")
            )));
        }

        path.push(node.clone());
        for next in edges.get(node).into_iter().flatten() {
            Self::visit(next, edges, path, finished)?;
        }
        path.pop();
        finished.push(node.clone());
        Ok(())
    }

    pub fn get(&self, name: &str, version: ResourceVersion) -> Option<Arc<Resource>> {
        self.resources.get(name)?.get(&version).cloned()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<Resource>> {
        self.resources.values().flat_map(|versions| versions.values())
    }

    pub fn versions(&self, name: &str) -> Vec<ResourceVersion> {
        self.resources
            .get(name)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Highest registered version, optionally within one major
    pub fn latest(&self, name: &str, major: Option<u32>) -> Option<ResourceVersion> {
        let major_key = major.map_or_else(|| "*".to_string(), |m| m.to_string());
        let key = ResourceCache::key("version", &[name, &major_key]);
        if let Some(cached) = self.lookups.get(&key) {
            return serde_json::from_value(cached).ok();
        }

        let versions = self.resources.get(name)?;
        let latest = versions
            .keys()
            .filter(|v| major.map_or(true, |m| v.major == m))
            .max()
            .copied()?;

        if let Ok(value) = serde_json::to_value(latest) {
            self.lookups.set(&key, value, [Self::lookup_tag(name)]);
        }
        Some(latest)
    }

    /// Map a requested version onto a registered one; never falls back to a
    /// different version than the one asked for
    pub fn negotiate(&self, name: &str, requested: Option<VersionRequest>) -> Option<ResourceVersion> {
        match requested {
            Some(VersionRequest {
                major,
                minor: Some(minor),
            }) => {
                let version = ResourceVersion::new(major, minor);
                self.get(name, version).map(|_| version)
            }
            Some(VersionRequest { major, minor: None }) => self.latest(name, Some(major)),
            None => self.latest(name, None),
        }
    }

    /// Version for a request: path segment first, then the version header,
    /// otherwise the latest registered. `None` for anything unregistered or
    /// unparseable.
    pub fn get_version_from_request(&self, request: &RequestContext) -> Option<ResourceVersion> {
        let segments = request.segments();
        let name = segments.first()?;
        let token = segments
            .get(1)
            .filter(|s| VersionRequest::looks_like_segment(s))
            .map(|s| s.to_string());
        self.version_for(name, token.as_deref(), request)
    }

    fn version_for(
        &self,
        name: &str,
        path_token: Option<&str>,
        request: &RequestContext,
    ) -> Option<ResourceVersion> {
        let requested = match path_token.or_else(|| request.header(&self.version_header)) {
            Some(token) => Some(VersionRequest::parse(token)?),
            None => None,
        };
        self.negotiate(name, requested)
    }

    /// Split `name[/vX[.Y]][/id[,id...]]` into resource version and ids
    pub fn route(&self, request: &RequestContext) -> Result<ResolvedRoute, ApiError> {
        let segments = request.segments();
        let Some((name, mut rest)) = segments.split_first() else {
            return Err(ApiError::not_found("No resource requested"));
        };
        if !self.resources.contains_key(*name) {
            return Err(ApiError::not_found(format!("Unknown resource '{}'", name)));
        }

        let mut path_token = None;
        if let Some((first, tail)) = rest.split_first() {
            if VersionRequest::looks_like_segment(first) {
                path_token = Some(*first);
                rest = tail;
            }
        }

        let version = self.version_for(name, path_token, request).ok_or_else(|| {
            let asked = path_token
                .or_else(|| request.header(&self.version_header))
                .unwrap_or("latest");
            ApiError::not_found(format!("Version '{}' of resource '{}' not found", asked, name))
        })?;
        let resource = self
            .get(name, version)
            .ok_or_else(|| ApiError::not_found(format!("Unknown resource '{}'", name)))?;

        let ids = match rest {
            [] => Vec::new(),
            [ids] => ids
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect(),
            _ => {
                return Err(ApiError::not_found(format!(
                    "Unknown path '{}'",
                    request.path
                )))
            }
        };

        tracing::debug!("Routed '{}' to '{}' v{} ids={:?}", request.path, name, version, ids);
        Ok(ResolvedRoute { resource, ids })
    }

    fn lookup_tag(name: &str) -> String {
        format!("versions:{}", name)
    }
}
