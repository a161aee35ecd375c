//! Seams between the manager and the remote runtime.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::capture::CaptureRegistry;
use super::error::DistributionError;

/// Who to connect to and as whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Remote runtime node, e.g. `els_runtime@box`.
    pub node: String,
    /// This session's own node name.
    pub local: String,
    pub cookie: Option<String>,
}

/// One remote call as sent over a link.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub module: String,
    pub function: String,
    pub args: Vec<Value>,
    /// Capture sink that output produced by this call belongs to.
    pub capture: Uuid,
}

/// Result of a completed remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcReply {
    pub value: Value,
    pub output: String,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Attempts one connection. Output frames received on the resulting link
    /// are routed through `captures`.
    async fn connect(
        &self,
        target: &ConnectTarget,
        captures: CaptureRegistry,
    ) -> Result<Arc<dyn NodeLink>, DistributionError>;
}

#[async_trait]
pub trait NodeLink: Send + Sync {
    fn node(&self) -> &str;

    async fn call(&self, call: RemoteCall) -> Result<Value, DistributionError>;

    /// Resolves once the link is down. Used as the node monitor.
    async fn closed(&self);
}
