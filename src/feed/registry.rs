//! Subscription registry file.
//!
//! The application stores its subscriptions as a JSON tree of categories and
//! sites. Only the flat list of sites matters here:
//!
//! ```json
//! [
//!   { "title": "Tech", "children": [
//!       { "title": "LWN", "uri": "https://lwn.net/headlines/rss" }
//!   ]},
//!   { "title": "Example", "uri": "https://example.com/feed" }
//! ]
//! ```

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::util::parse_feed_uri;

/// Maximum category nesting accepted from the registry file.
const MAX_REGISTRY_DEPTH: usize = 50;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    #[error("Invalid registry JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One subscribed site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub title: String,
    pub uri: Url,
}

#[derive(Debug, Deserialize)]
struct RegistryNode {
    #[serde(default)]
    title: String,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    children: Vec<RegistryNode>,
}

/// Reads the registry file at `path`. A missing file means no subscriptions.
pub async fn load(path: &Path) -> anyhow::Result<Vec<Subscription>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No registry file found");
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read registry: {}", path.display()))
        }
    };
    Ok(parse_registry(&content)?)
}

/// Flattens registry JSON into subscriptions, depth first.
///
/// Sites with invalid URIs are skipped with a warning; duplicates keep their
/// first occurrence.
pub fn parse_registry(content: &str) -> Result<Vec<Subscription>, RegistryError> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let nodes: Vec<RegistryNode> = serde_json::from_str(content)?;

    let mut subscriptions = Vec::new();
    flatten(&nodes, 0, &mut subscriptions)?;
    Ok(subscriptions)
}

fn flatten(
    nodes: &[RegistryNode],
    depth: usize,
    out: &mut Vec<Subscription>,
) -> Result<(), RegistryError> {
    if depth > MAX_REGISTRY_DEPTH {
        return Err(RegistryError::MaxDepthExceeded(MAX_REGISTRY_DEPTH));
    }

    for node in nodes {
        if let Some(raw) = node.uri.as_deref() {
            match parse_feed_uri(raw) {
                Ok(uri) if out.iter().any(|s| s.uri == uri) => {
                    tracing::debug!(uri = %uri, "Skipping duplicate registry entry");
                }
                Ok(uri) => {
                    let title = if node.title.trim().is_empty() {
                        uri.to_string()
                    } else {
                        node.title.trim().to_string()
                    };
                    out.push(Subscription { title, uri });
                }
                Err(e) => {
                    tracing::warn!(uri = %raw, error = %e, "Skipping invalid feed URI in registry");
                }
            }
        }
        flatten(&node.children, depth + 1, out)?;
    }
    Ok(())
}
