#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use tower::ServiceExt;

use restful_api_rust::auth::{issue_token, Identity};
use restful_api_rust::config::AppConfig;
use restful_api_rust::rate_limit::{FixedClock, MemoryRateLimitStore};
use restful_api_rust::sample;
use restful_api_rust::server::{app, AppState};

/// Start of the fixed test clock
pub const START: i64 = 1_700_000_000;

/// In-process application driven through `tower::ServiceExt::oneshot`
pub struct TestApp {
    pub router: Router,
    pub clock: Arc<FixedClock>,
    pub config: AppConfig,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub raw: Vec<u8>,
    /// Parsed JSON body, `Null` when empty or not JSON
    pub body: Value,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }
}

pub async fn spawn_app() -> Result<TestApp> {
    spawn_app_with(AppConfig::development()).await
}

pub async fn spawn_app_with(config: AppConfig) -> Result<TestApp> {
    let clock = Arc::new(FixedClock::new(START));
    let pipeline = sample::build_pipeline(&config, Arc::new(MemoryRateLimitStore::new()), clock.clone())
        .await
        .context("failed to build sample pipeline")?;
    let router = app(AppState::new(pipeline), &config);
    Ok(TestApp {
        router,
        clock,
        config,
    })
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Result<TestResponse> {
        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let raw = to_bytes(response.into_body(), usize::MAX).await?.to_vec();
        let body = serde_json::from_slice(&raw).unwrap_or(Value::Null);
        Ok(TestResponse {
            status,
            headers,
            raw,
            body,
        })
    }

    pub async fn get(&self, path: &str) -> Result<TestResponse> {
        self.send(request(Method::GET, path).body(Body::empty())?).await
    }

    /// GET with HTTP Basic credentials
    pub async fn get_as(&self, path: &str, account: (&str, &str)) -> Result<TestResponse> {
        self.send(
            request(Method::GET, path)
                .header(header::AUTHORIZATION, basic(account))
                .body(Body::empty())?,
        )
        .await
    }

    /// JSON write with HTTP Basic credentials
    pub async fn write_as(
        &self,
        method: Method,
        path: &str,
        account: (&str, &str),
        body: Value,
    ) -> Result<TestResponse> {
        self.send(
            request(method, path)
                .header(header::AUTHORIZATION, basic(account))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
        )
        .await
    }

    pub fn token_for(&self, identity: &Identity) -> Result<String> {
        Ok(issue_token(identity, &self.config.auth)?)
    }
}

pub fn request(method: Method, path: &str) -> axum::http::request::Builder {
    Request::builder().method(method).uri(path)
}

pub fn basic((user, password): (&str, &str)) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)))
}
