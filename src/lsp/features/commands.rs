//! `workspace/executeCommand` handlers for the runtime connection.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::context::ServerContext;
use super::traits::{Handled, Provider, ProviderError, Request, RequestKind, Response, SessionState};
use crate::distribution::DistributionError;

pub const CONNECT_COMMAND: &str = "runtime.connect";
pub const STATUS_COMMAND: &str = "runtime.status";

/// Every command this server advertises.
pub const COMMANDS: [&str; 2] = [CONNECT_COMMAND, STATUS_COMMAND];

pub struct CommandProvider {
    context: Arc<ServerContext>,
}

impl CommandProvider {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Provider for CommandProvider {
    fn name(&self) -> &'static str {
        "executeCommand"
    }

    fn kind(&self) -> RequestKind {
        RequestKind::ExecuteCommand
    }

    async fn handle(&self, request: Request, mut state: SessionState) -> Result<Handled, ProviderError> {
        let Request::ExecuteCommand { command, .. } = request else {
            return Err(ProviderError::InvalidRequest("expected an executeCommand request".into()));
        };
        let handle = self
            .context
            .distribution()
            .ok_or(ProviderError::Distribution(DistributionError::Disabled))?;

        match command.as_str() {
            CONNECT_COMMAND => {
                handle.connect().await?;
                info!("Runtime {} connected on request", handle.status().node);
            }
            STATUS_COMMAND => {}
            other => return Err(ProviderError::InvalidRequest(format!("unknown command {other}"))),
        }

        let snapshot = handle.status();
        state.runtime = Some(snapshot.status);
        let value: Value =
            serde_json::to_value(&snapshot).map_err(|e| ProviderError::Internal(e.to_string()))?;
        Ok(Handled::new(Response::ExecuteCommand(Some(value)), state))
    }
}
