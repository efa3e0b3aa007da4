//! HTTP adapter: converts axum requests into pipeline runs and back.

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use axum::Router;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::pipeline::Pipeline;
use crate::request::RequestContext;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Present only when a database is configured
    pub database: Option<DatabaseManager>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            database: None,
        }
    }

    pub fn shared(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            database: None,
        }
    }

    pub fn with_database(mut self, database: DatabaseManager) -> Self {
        self.database = Some(database);
        self
    }
}

/// `/health` plus every method on `{prefix}/*path`
pub fn app(state: AppState, config: &AppConfig) -> Router {
    let prefix = config.api.path_prefix.trim_end_matches('/');
    let mut router = Router::new()
        .route("/health", get(health))
        .route(&format!("{}/*path", prefix), any(dispatch))
        .with_state(state);

    if config.security.enable_cors {
        router = router.layer(cors(&config.security.cors_origins));
    }
    router.layer(TraceLayer::new_for_http())
}

fn cors(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn dispatch(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let prefix = state.pipeline.config().path_prefix.trim_end_matches('/').to_string();
    let request = match to_request(&prefix, method, &uri, headers, &body, connect_info) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    match state.pipeline.handle(request).await {
        Ok(response) => response.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Build the pipeline's view of a request
pub fn to_request(
    prefix: &str,
    method: Method,
    uri: &Uri,
    headers: HeaderMap,
    body: &[u8],
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Result<RequestContext, ApiError> {
    let path = uri.path().strip_prefix(prefix).unwrap_or(uri.path());
    let mut request = RequestContext::new(method, path);
    if let Some(query) = uri.query() {
        request = request.with_query_string(query);
    }

    let client_ip = client_ip(&headers).or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()));
    request.headers = headers;
    if let Some(ip) = client_ip {
        request = request.with_client_ip(ip);
    }

    if !body.iter().all(u8::is_ascii_whitespace) {
        let value = serde_json::from_slice(body)
            .map_err(|e| ApiError::bad_request(format!("Malformed JSON body: {}", e)))?;
        request = request.with_body(value);
    }
    Ok(request)
}

/// First hop of `X-Forwarded-For`, then `X-Real-IP`
fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    forwarded
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::to_string)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    let Some(database) = &state.database else {
        return (
            StatusCode::OK,
            Json(json!({ "status": "ok", "timestamp": now, "database": "not configured" })),
        );
    };

    match database.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "timestamp": now, "database": "ok" })),
        ),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "timestamp": now, "database": "unavailable" })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_prefix_and_reads_query() {
        let uri: Uri = "/api/articles/v1/1?fields=id".parse().unwrap();
        let request = to_request("/api", Method::GET, &uri, HeaderMap::new(), b"", None).unwrap();
        assert_eq!(request.path, "articles/v1/1");
        assert_eq!(request.query_param("fields"), Some("id"));
        assert!(request.body.is_none());
    }

    #[test]
    fn forwarded_header_beats_socket_address() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        let uri: Uri = "/api/tags".parse().unwrap();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let request =
            to_request("/api", Method::GET, &uri, headers, b"", Some(ConnectInfo(addr))).unwrap();
        assert_eq!(request.client_ip.as_deref(), Some("203.0.113.9"));

        let request =
            to_request("/api", Method::GET, &uri, HeaderMap::new(), b"", Some(ConnectInfo(addr))).unwrap();
        assert_eq!(request.client_ip.as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn malformed_body_is_a_bad_request() {
        let uri: Uri = "/api/tags".parse().unwrap();
        let err = to_request("/api", Method::POST, &uri, HeaderMap::new(), b"{nope", None).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
