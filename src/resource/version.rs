use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `(major, minor)`; ordered by major first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceVersion {
    pub major: u32,
    pub minor: u32,
}

impl ResourceVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// What a request asked for: a major with optional minor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRequest {
    pub major: u32,
    pub minor: Option<u32>,
}

static VERSION_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v?(\d+)(?:\.(\d+))?$").expect("valid version regex"));

static VERSION_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v\d").expect("valid version segment regex"));

impl VersionRequest {
    /// Parse `vN`, `vN.M`, `N` or `N.M`; anything else (or an overflowing number) is `None`
    pub fn parse(token: &str) -> Option<Self> {
        let caps = VERSION_TOKEN.captures(token.trim())?;
        let major = caps.get(1)?.as_str().parse().ok()?;
        let minor = match caps.get(2) {
            Some(m) => Some(m.as_str().parse().ok()?),
            None => None,
        };
        Some(Self { major, minor })
    }

    /// Whether a path segment is meant as a version (it may still fail to parse)
    pub fn looks_like_segment(segment: &str) -> bool {
        VERSION_SEGMENT.is_match(segment)
    }
}
