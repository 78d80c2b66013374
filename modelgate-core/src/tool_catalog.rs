//! The MCP tool-catalog client port (§6.1).
//!
//! The MCP sub-gateway — tool search, tool registry, schema versioning — is
//! out of scope (§1); the core only ever resolves tool schemas for a
//! `ChatRequest` that names tools without inline JSON-schema parameters
//! through this narrow trait. A real implementation would speak the
//! `tools/list` JSON-RPC method against the MCP endpoint described in §6;
//! this crate ships only the trait and an in-memory stub for tests and
//! standalone use.

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::message::ToolSpec;

#[async_trait]
pub trait ToolCatalogClient: Send + Sync {
    /// Full tool catalog visible to `tenant`, keyed by name. The dispatcher
    /// looks up only the names a `ChatRequest` actually references.
    async fn list_tools(&self, tenant: &str) -> Result<Vec<ToolSpec>, GatewayError>;
}

/// Returns an empty catalog for every tenant. The default when no MCP
/// sub-gateway is configured: requests may still carry inline tool specs,
/// they just can't reference a catalog entry by name alone.
#[derive(Clone, Copy, Default)]
pub struct NoopToolCatalogClient;

#[async_trait]
impl ToolCatalogClient for NoopToolCatalogClient {
    async fn list_tools(&self, _tenant: &str) -> Result<Vec<ToolSpec>, GatewayError> {
        Ok(Vec::new())
    }
}

/// A fixed, in-process catalog — stands in for the MCP sub-gateway in tests
/// and the CLI's standalone mode.
#[derive(Clone, Default)]
pub struct InMemoryToolCatalogClient {
    tools: Vec<ToolSpec>,
}

impl InMemoryToolCatalogClient {
    pub fn new(tools: Vec<ToolSpec>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl ToolCatalogClient for InMemoryToolCatalogClient {
    async fn list_tools(&self, _tenant: &str) -> Result<Vec<ToolSpec>, GatewayError> {
        Ok(self.tools.clone())
    }
}
