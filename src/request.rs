use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::Value;
use std::collections::HashMap;

/// Everything the pipeline needs to know about one inbound request.
///
/// `path` is relative to the API prefix (`articles/v1.2/3`, no leading slash).
/// The HTTP adapter builds one per request; tests build them directly.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub query: HashMap<String, String>,
    pub body: Option<Value>,
    pub client_ip: Option<String>,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into().trim_matches('/').to_string(),
            headers: HeaderMap::new(),
            query: HashMap::new(),
            body: None,
            client_ip: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Parse a raw `a=1&b=2` query string into the parameter map
    pub fn with_query_string(mut self, raw: &str) -> Self {
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            self.query.insert(key.into_owned(), value.into_owned());
        }
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    /// Header value as a string, ignoring values that are not valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Look up a cookie by name across all `Cookie` headers
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|raw| raw.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    }

    /// Path split into non-empty segments
    pub fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// `filter[<name>]=<value>` parameters
    pub fn filters(&self) -> Vec<(String, String)> {
        let mut filters: Vec<(String, String)> = self
            .query
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix("filter[")
                    .and_then(|rest| rest.strip_suffix(']'))
                    .map(|name| (name.to_string(), value.clone()))
            })
            .collect();
        filters.sort();
        filters
    }
}
