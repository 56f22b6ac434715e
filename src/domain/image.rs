//! Container image references

use serde::Serialize;
use std::fmt;

/// Image reference, `[host/][namespace/]name:tag`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    pub host: Option<String>,
    pub namespace: Option<String>,
    pub name: String,
    pub tag: String,
}

impl ImageRef {
    /// Image tagged with the build number
    pub fn build_tagged(
        host: Option<&str>,
        namespace: Option<&str>,
        name: &str,
        build_number: u64,
    ) -> Self {
        Self {
            host: host.map(|h| h.trim_end_matches('/').to_string()),
            namespace: namespace.map(|n| n.trim_matches('/').to_string()),
            name: name.to_string(),
            tag: build_number.to_string(),
        }
    }

    /// Same repository, tagged `latest`
    pub fn latest(&self) -> Self {
        self.with_tag("latest")
    }

    pub fn with_tag(&self, tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..self.clone()
        }
    }

    /// Repository part without the tag
    pub fn repository(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(host) = self.host.as_deref().filter(|h| !h.is_empty()) {
            parts.push(host);
        }
        if let Some(ns) = self.namespace.as_deref().filter(|n| !n.is_empty()) {
            parts.push(ns);
        }
        parts.push(&self.name);
        parts.join("/")
    }

    /// Registry host for `docker login`; `None` means Docker Hub
    pub fn registry(&self) -> Option<&str> {
        self.host.as_deref().filter(|h| !h.is_empty())
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository(), self.tag)
    }
}
