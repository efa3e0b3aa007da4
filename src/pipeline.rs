//! Request orchestration.
//!
//! One run per request: route to a resource version, resolve the caller's
//! identity, admit through the rate limiter, dispatch to the data provider
//! with field resolution, then render through the negotiated formatter.
//! Every stage can abort the run with an `ApiError`.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::{AuthenticationManager, AuthenticationProviders, Identity};
use crate::cache::ResourceCache;
use crate::config::{ApiConfig, AppConfig};
use crate::error::ApiError;
use crate::formatter::{Document, DocumentBody, Formatter, FormatterManager, Links};
use crate::provider::IndexQuery;
use crate::rate_limit::{RateLimitManager, RateLimitStatus};
use crate::request::RequestContext;
use crate::resource::{
    FieldResolutionEngine, Resource, ResourceDefinition, ResourceManager, ResolveContext,
};
use crate::types::{Operation, SortDirection};

/// Rendered outcome of one pipeline run
#[derive(Debug)]
pub struct PipelineResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl PipelineResponse {
    fn rendered(status: StatusCode, formatter: &dyn Formatter, document: &Document) -> Result<Self, ApiError> {
        let body = formatter.render(document)?;
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(formatter.content_type()) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        Ok(Self { status, headers, body })
    }

    fn no_content() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
    }
}

impl IntoResponse for PipelineResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

pub struct Pipeline {
    resources: ResourceManager,
    providers: Arc<AuthenticationProviders>,
    rate_limits: RateLimitManager,
    formatters: FormatterManager,
    render_cache: Option<ResourceCache>,
    config: ApiConfig,
}

impl Pipeline {
    /// Assemble a pipeline; the render cache is created when the config enables it
    pub fn new(
        resources: ResourceManager,
        providers: AuthenticationProviders,
        rate_limits: RateLimitManager,
        formatters: FormatterManager,
        config: &AppConfig,
    ) -> Self {
        let render_cache = config.cache.enable_render_cache.then(|| {
            ResourceCache::in_memory(Some(Duration::from_secs(config.cache.render_cache_ttl_secs)))
        });
        Self {
            resources,
            providers: Arc::new(providers),
            rate_limits,
            formatters,
            render_cache,
            config: config.api.clone(),
        }
    }

    pub fn with_render_cache(mut self, cache: Option<ResourceCache>) -> Self {
        self.render_cache = cache;
        self
    }

    /// Register one more resource before the pipeline starts serving
    pub fn with_resource(mut self, definition: ResourceDefinition) -> Result<Self, ApiError> {
        self.resources.register(definition)?;
        self.resources.validate()?;
        Ok(self)
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    pub fn rate_limits(&self) -> &RateLimitManager {
        &self.rate_limits
    }

    pub fn render_cache(&self) -> Option<&ResourceCache> {
        self.render_cache.as_ref()
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Run one request through every stage
    pub async fn handle(&self, request: RequestContext) -> Result<PipelineResponse, ApiError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "request",
            %request_id,
            method = %request.method,
            path = %request.path
        );

        async move {
            let result = self.run(&request).await;
            match &result {
                Ok(response) => tracing::debug!("Completed with {}", response.status),
                Err(e) if e.status_code() >= 500 => tracing::error!("Failed: {}", e),
                Err(e) => tracing::warn!("Rejected with {}: {}", e.status_code(), e.message()),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, request: &RequestContext) -> Result<PipelineResponse, ApiError> {
        let route = self.resources.route(request)?;
        let resource = route.resource;
        let operation = Operation::from_request(&request.method, !route.ids.is_empty())
            .ok_or_else(|| {
                ApiError::bad_request(format!(
                    "{} is not supported on this path",
                    request.method
                ))
            })?;

        let mut auth = AuthenticationManager::new(self.providers.clone());
        let identity = auth.resolve(request, &resource.authentication).await?;
        resource.check_operation(operation, &identity)?;

        let statuses = self
            .rate_limits
            .check_rate_limit(&resource.name, &resource.rate_limits, request, &identity)
            .await?;

        let formatter = self
            .formatters
            .negotiate(request.header(header::ACCEPT.as_str()), resource.formatter.as_deref())?;

        let call = Call {
            pipeline: self,
            request,
            resource: &resource,
            identity: &identity,
            formatter: formatter.as_ref(),
            field_limit: self.field_limit(request),
        };
        let mut response = match operation {
            Operation::Index => call.index().await?,
            Operation::View => call.view(&route.ids).await?,
            Operation::Create => call.create().await?,
            Operation::Update | Operation::Replace => {
                call.update(single_id(&route.ids)?, operation).await?
            }
            Operation::Remove => call.remove(single_id(&route.ids)?).await?,
        };

        if let Some(status) = RateLimitStatus::most_restrictive(&statuses) {
            for (name, value) in status.headers() {
                response.set_header(name, &value);
            }
        }
        Ok(response)
    }

    fn field_limit(&self, request: &RequestContext) -> Option<HashSet<String>> {
        request.query_param(&self.config.field_limit_param).map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
    }

    fn invalidate(&self, resource: &Resource, id: &str) {
        if let Some(cache) = &self.render_cache {
            cache.invalidate_tag(&Resource::record_tag(&resource.name, id));
        }
    }

    fn base_link(&self, resource: &Resource) -> String {
        format!(
            "{}/{}/v{}",
            self.config.path_prefix.trim_end_matches('/'),
            resource.name,
            resource.version
        )
    }
}

/// One dispatched operation with everything the earlier stages resolved
struct Call<'a> {
    pipeline: &'a Pipeline,
    request: &'a RequestContext,
    resource: &'a Resource,
    identity: &'a Identity,
    formatter: &'a dyn Formatter,
    field_limit: Option<HashSet<String>>,
}

impl<'a> Call<'a> {
    fn engine(&self) -> FieldResolutionEngine<'a> {
        FieldResolutionEngine::new(&self.pipeline.resources, self.pipeline.config.max_embed_depth)
            .with_render_cache(self.pipeline.render_cache.as_ref())
    }

    /// Writes render with read semantics
    fn read_context(&self) -> ResolveContext<'a> {
        ResolveContext::new(self.identity, Method::GET).with_field_limit(self.field_limit.clone())
    }

    fn document(&self, body: DocumentBody, links: Links) -> Document {
        Document {
            resource: self.resource.name.clone(),
            body,
            links,
        }
    }

    fn record_link(&self, id: &str) -> Links {
        Links {
            self_link: format!("{}/{}", self.pipeline.base_link(self.resource), id),
            ..Default::default()
        }
    }

    async fn index(&self) -> Result<PipelineResponse, ApiError> {
        let config = &self.pipeline.config;
        let page = positive_param(self.request, "page", 1)?;
        let range = positive_param(self.request, "range", u64::from(config.default_range))?
            .min(u64::from(config.max_range));

        let mut query = IndexQuery {
            filters: Vec::new(),
            sort: self.sort()?,
            offset: page_offset(page, range)?,
            limit: Some(range),
        };
        for (name, value) in self.request.filters() {
            query.filters.push((self.property(&name, "filter")?, value));
        }

        let provider = &self.resource.provider;
        let count = provider.count(&query).await?;
        let records = provider.index(&query).await?;

        let engine = self.engine();
        let ctx = ResolveContext::new(self.identity, self.request.method.clone())
            .with_field_limit(self.field_limit.clone());
        let mut items = Vec::with_capacity(records.len());
        for record in records {
            items.push(engine.resolve(record, self.resource, &ctx).await?);
        }

        let base = self.pipeline.base_link(self.resource);
        let page_link = |page: u64| format!("{}?page={}&range={}", base, page, range);
        let links = Links {
            self_link: page_link(page),
            next: (query.offset + (items.len() as u64) < count).then(|| page_link(page + 1)),
            previous: (page > 1).then(|| page_link(page - 1)),
        };
        tracing::debug!("Listed {} of {} '{}' records", items.len(), count, self.resource.name);

        let document = self.document(DocumentBody::Collection { items, count }, links);
        PipelineResponse::rendered(StatusCode::OK, self.formatter, &document)
    }

    async fn view(&self, ids: &[String]) -> Result<PipelineResponse, ApiError> {
        let engine = self.engine();
        let ctx = ResolveContext::new(self.identity, self.request.method.clone())
            .with_field_limit(self.field_limit.clone());

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            records.push(self.load(&engine, id, &ctx).await?);
        }

        let links = self.record_link(&ids.join(","));
        let body = match <[Map<String, Value>; 1]>::try_from(records) {
            Ok([record]) => DocumentBody::Record(record),
            Err(records) => DocumentBody::Records(records),
        };
        PipelineResponse::rendered(StatusCode::OK, self.formatter, &self.document(body, links))
    }

    async fn create(&self) -> Result<PipelineResponse, ApiError> {
        let engine = self.engine();
        let write_ctx = ResolveContext::new(self.identity, self.request.method.clone());
        let values = engine.map_input(self.body()?, self.resource, Operation::Create, &write_ctx)?;

        let id = self.resource.provider.create(values).await?;
        tracing::info!("Created '{}' {}", self.resource.name, id);

        let record = self.load(&engine, &id, &self.read_context()).await?;
        let links = self.record_link(&id);
        let mut response = PipelineResponse::rendered(
            StatusCode::CREATED,
            self.formatter,
            &self.document(DocumentBody::Record(record), links.clone()),
        )?;
        response.set_header(header::LOCATION.as_str(), &links.self_link);
        Ok(response)
    }

    async fn update(&self, id: &str, operation: Operation) -> Result<PipelineResponse, ApiError> {
        let engine = self.engine();
        let write_ctx = ResolveContext::new(self.identity, self.request.method.clone());
        let values = engine.map_input(self.body()?, self.resource, operation, &write_ctx)?;

        let replace = operation == Operation::Replace;
        if !self.resource.provider.update(id, values, replace).await? {
            return Err(self.not_found(id));
        }
        self.pipeline.invalidate(self.resource, id);
        tracing::info!("Updated '{}' {}", self.resource.name, id);

        let record = self.load(&engine, id, &self.read_context()).await?;
        let document = self.document(DocumentBody::Record(record), self.record_link(id));
        PipelineResponse::rendered(StatusCode::OK, self.formatter, &document)
    }

    async fn remove(&self, id: &str) -> Result<PipelineResponse, ApiError> {
        if !self.resource.provider.remove(id).await? {
            return Err(self.not_found(id));
        }
        self.pipeline.invalidate(self.resource, id);
        tracing::info!("Removed '{}' {}", self.resource.name, id);
        Ok(PipelineResponse::no_content())
    }

    async fn load(
        &self,
        engine: &FieldResolutionEngine<'_>,
        id: &str,
        ctx: &ResolveContext<'_>,
    ) -> Result<Map<String, Value>, ApiError> {
        engine
            .view(self.resource, id, ctx)
            .await?
            .ok_or_else(|| self.not_found(id))
    }

    fn body(&self) -> Result<&'a Value, ApiError> {
        self.request
            .body
            .as_ref()
            .ok_or_else(|| ApiError::bad_request("Request body is required"))
    }

    fn not_found(&self, id: &str) -> ApiError {
        ApiError::not_found(format!("{} {} not found", self.resource.name, id))
    }

    /// Storage property behind a public field usable for sorting or filtering
    fn property(&self, name: &str, usage: &str) -> Result<String, ApiError> {
        self.resource
            .fields
            .get(name)
            .filter(|field| field.definition.is_accessible(self.identity))
            .and_then(|field| self.resource.fields.property_of(field.name()))
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request(format!("Cannot {} by '{}'", usage, name)))
    }

    /// `sort=label,-id`: comma list of public names, `-` for descending
    fn sort(&self) -> Result<Vec<(String, SortDirection)>, ApiError> {
        let Some(raw) = self.request.query_param("sort") else {
            return Ok(Vec::new());
        };
        raw.split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| {
                let (name, direction) = match token.strip_prefix('-') {
                    Some(name) => (name, SortDirection::Desc),
                    None => (token, SortDirection::Asc),
                };
                Ok((self.property(name, "sort")?, direction))
            })
            .collect()
    }
}

fn single_id(ids: &[String]) -> Result<&str, ApiError> {
    match ids {
        [id] => Ok(id.as_str()),
        _ => Err(ApiError::bad_request("Writes address exactly one record")),
    }
}

fn positive_param(request: &RequestContext, name: &str, default: u64) -> Result<u64, ApiError> {
    match request.query_param(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ApiError::bad_request(format!("'{}' must be a positive integer", name))),
    }
}

/// Rows to skip for a 1-based page; must fit the storage layer's signed OFFSET
fn page_offset(page: u64, range: u64) -> Result<u64, ApiError> {
    page.checked_sub(1)
        .and_then(|skipped| skipped.checked_mul(range))
        .filter(|offset| i64::try_from(*offset).is_ok())
        .ok_or_else(|| ApiError::bad_request("'page' is out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_params_reject_zero_and_garbage() {
        let request = RequestContext::get("tags").with_query_string("page=0&range=abc");
        assert_eq!(positive_param(&request, "page", 1).unwrap_err().status_code(), 400);
        assert_eq!(positive_param(&request, "range", 50).unwrap_err().status_code(), 400);
        assert_eq!(positive_param(&request, "missing", 7).unwrap(), 7);
    }

    #[test]
    fn page_offsets_are_bounded() {
        assert_eq!(page_offset(1, 50).unwrap(), 0);
        assert_eq!(page_offset(3, 20).unwrap(), 40);

        let err = page_offset(u64::MAX, 50).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.message(), "'page' is out of range");
        assert!(page_offset(u64::MAX / 2, 2).is_err());
        assert!(page_offset(0, 50).is_err());
    }

    #[test]
    fn writes_need_one_id() {
        assert_eq!(single_id(&["4".to_string()]).unwrap(), "4");
        assert!(single_id(&["4".to_string(), "5".to_string()]).is_err());
    }
}
