//! `network_fetch` tool body: the one builtin tool that reaches outside
//! the VFS, gated by the `Capability::NetworkFetch` host allow-list.
//! Grounded on `security/policy.rs`'s allow-list capability checks,
//! generalized from command names to URL hosts.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::body::{ToolBody, ToolContext};
use super::capability::Capability;
use crate::error::ToolError;

#[derive(Deserialize)]
struct FetchInput {
    url: String,
}

fn host_allowed(capabilities: &[Capability], host: &str) -> bool {
    capabilities.iter().any(|c| matches!(c, Capability::NetworkFetch(hosts) if hosts.contains(host)))
}

pub struct NetworkFetchTool {
    http: reqwest::Client,
}

impl NetworkFetchTool {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for NetworkFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolBody for NetworkFetchTool {
    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let input: FetchInput = serde_json::from_value(input)
            .map_err(|e| ToolError::SchemaViolation { path: "url".to_string(), reason: e.to_string() })?;
        let url = reqwest::Url::parse(&input.url)
            .map_err(|e| ToolError::ToolError { stage: "parse_url".to_string(), message: e.to_string() })?;
        let host = url
            .host_str()
            .ok_or_else(|| ToolError::ToolError { stage: "parse_url".to_string(), message: "url has no host".to_string() })?;

        if !host_allowed(&ctx.capabilities, host) {
            return Err(ToolError::CapabilityDenied(format!("network_fetch({host})")));
        }

        let timeout = if ctx.remaining_budget > Duration::ZERO { ctx.remaining_budget } else { Duration::from_secs(10) };
        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ToolError::ToolError { stage: "fetch".to_string(), message: e.to_string() })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::ToolError { stage: "read_body".to_string(), message: e.to_string() })?;

        Ok(json!({ "status": status, "body": body }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn allowed_host_matches_exactly() {
        let caps = vec![Capability::NetworkFetch(BTreeSet::from(["example.com".to_string()]))];
        assert!(host_allowed(&caps, "example.com"));
        assert!(!host_allowed(&caps, "evil.example.com"));
        assert!(!host_allowed(&caps, "other.com"));
    }

    #[test]
    fn no_network_capability_denies_everything() {
        let caps = vec![Capability::ReadVfs];
        assert!(!host_allowed(&caps, "example.com"));
    }
}
