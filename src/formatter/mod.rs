//! Output formatters and `Accept` negotiation.

pub mod json;
pub mod yaml;

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::ApiConfig;
use crate::error::ApiError;

pub use json::{HalJsonFormatter, JsonFormatter};
pub use yaml::YamlFormatter;

const MAX_MEMOIZED_PATTERNS: usize = 64;

/// Navigation links for a rendered document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Links {
    pub self_link: String,
    pub next: Option<String>,
    pub previous: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentBody {
    /// A single viewed or written record
    Record(Map<String, Value>),
    /// Several records viewed by id, in request order
    Records(Vec<Map<String, Value>>),
    /// One page of a listing, with the total count across pages
    Collection {
        items: Vec<Map<String, Value>>,
        count: u64,
    },
}

/// Everything a formatter needs to render one response
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub resource: String,
    pub body: DocumentBody,
    pub links: Links,
}

pub trait Formatter: Send + Sync {
    /// Name resources use to pin this formatter
    fn name(&self) -> &str;

    /// Content type, with parameters, sent with rendered output
    fn content_type(&self) -> &str;

    fn render(&self, document: &Document) -> Result<Vec<u8>, ApiError>;
}

/// Registered formatters plus the negotiation algorithm
pub struct FormatterManager {
    formatters: Vec<Arc<dyn Formatter>>,
    default: String,
    patterns: RwLock<HashMap<String, Regex>>,
}

impl FormatterManager {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            formatters: Vec::new(),
            default: default.into(),
            patterns: RwLock::new(HashMap::new()),
        }
    }

    /// JSON, HAL+JSON and YAML, with the configured default
    pub fn with_defaults(config: &ApiConfig) -> Self {
        let mut manager = Self::new(config.default_formatter.clone());
        manager
            .register(Arc::new(JsonFormatter))
            .register(Arc::new(HalJsonFormatter))
            .register(Arc::new(YamlFormatter));
        manager
    }

    /// Registration order is the tie-break when a wildcard matches several
    pub fn register(&mut self, formatter: Arc<dyn Formatter>) -> &mut Self {
        self.formatters.retain(|f| f.name() != formatter.name());
        self.formatters.push(formatter);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Formatter>> {
        self.formatters.iter().find(|f| f.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.formatters.iter().map(|f| f.name()).collect()
    }

    pub fn default_formatter(&self) -> Result<Arc<dyn Formatter>, ApiError> {
        self.get(&self.default).ok_or_else(|| {
            ApiError::server_configuration(format!(
                "Default formatter '{}' is not registered",
                self.default
            ))
        })
    }

    /// Pick the formatter for a response.
    ///
    /// A resource's pinned formatter always wins. Otherwise each `Accept`
    /// candidate is tried in order against every formatter's content type;
    /// the first match wins and anything unmatched gets the default.
    pub fn negotiate(
        &self,
        accept: Option<&str>,
        explicit: Option<&str>,
    ) -> Result<Arc<dyn Formatter>, ApiError> {
        if let Some(name) = explicit {
            return self.get(name).ok_or_else(|| {
                ApiError::server_configuration(format!("Formatter '{}' is not registered", name))
            });
        }

        let accept = accept.map(str::trim).unwrap_or("");
        if accept.is_empty() || accept == "*/*" {
            return self.default_formatter();
        }

        for candidate in accept.split(',') {
            let media_range = candidate.split(';').next().unwrap_or("").trim();
            if media_range.is_empty() {
                continue;
            }
            if media_range == "*/*" {
                return self.default_formatter();
            }
            let (key, pattern) = self.pattern(media_range)?;
            if let Some(formatter) = self
                .formatters
                .iter()
                .find(|f| pattern.is_match(f.content_type()))
            {
                self.remember(key, pattern);
                tracing::debug!("Accept '{}' matched formatter '{}'", media_range, formatter.name());
                return Ok(formatter.clone());
            }
        }

        tracing::debug!("No formatter matches Accept '{}', using default", accept);
        self.default_formatter()
    }

    /// Compiled wildcard pattern for a media range, keyed by the lowercased range
    fn pattern(&self, media_range: &str) -> Result<(String, Regex), ApiError> {
        let key = media_range.to_ascii_lowercase();
        if let Some(found) = self
            .patterns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok((key, found.clone()));
        }

        let body = key
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let pattern = Regex::new(&format!(r"(?i)^{}(\s*;.*)?$", body)).map_err(|e| {
            ApiError::server_configuration(format!("Bad media range '{}': {}", media_range, e))
        })?;
        Ok((key, pattern))
    }

    /// Memoize a range that selected a formatter; unmatched ranges are never kept
    fn remember(&self, key: String, pattern: Regex) {
        let mut patterns = self.patterns.write().unwrap_or_else(PoisonError::into_inner);
        if patterns.contains_key(&key) {
            return;
        }
        if patterns.len() >= MAX_MEMOIZED_PATTERNS {
            patterns.clear();
        }
        patterns.insert(key, pattern);
    }
}
