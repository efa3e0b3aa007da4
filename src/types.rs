/// Shared types used across the codebase
use axum::http::Method;
use serde::{Deserialize, Serialize};

/// Resource operations a request can map onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operation {
    Index,
    View,
    Create,
    Update,  // Partial update (PATCH)
    Replace, // Full replacement (PUT)
    Remove,
}

impl Operation {
    /// Map an HTTP method plus "were ids given" onto an operation
    pub fn from_request(method: &Method, has_ids: bool) -> Option<Self> {
        match (method.as_str(), has_ids) {
            ("GET", false) | ("HEAD", false) => Some(Operation::Index),
            ("GET", true) | ("HEAD", true) => Some(Operation::View),
            ("POST", false) => Some(Operation::Create),
            ("PATCH", true) => Some(Operation::Update),
            ("PUT", true) => Some(Operation::Replace),
            ("DELETE", true) => Some(Operation::Remove),
            _ => None,
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, Operation::Index | Operation::View)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Methods that never change server state
pub fn is_read_method(method: &Method) -> bool {
    matches!(method.as_str(), "GET" | "HEAD" | "OPTIONS" | "TRACE")
}
