use super::json::JsonFormatter;
use super::{Document, Formatter};
use crate::error::ApiError;

/// Same document shape as plain JSON, serialized as YAML
pub struct YamlFormatter;

impl Formatter for YamlFormatter {
    fn name(&self) -> &str {
        "yaml"
    }

    fn content_type(&self) -> &str {
        "application/x-yaml"
    }

    fn render(&self, document: &Document) -> Result<Vec<u8>, ApiError> {
        serde_yaml::to_string(&JsonFormatter::to_value(document))
            .map(String::into_bytes)
            .map_err(|e| {
                tracing::error!("Failed to serialize YAML response: {}", e);
                ApiError::internal_server_error("Failed to serialize response")
            })
    }
}
