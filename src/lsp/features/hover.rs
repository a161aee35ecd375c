//! Hover documentation as an ordered chain of fallible stages.
//!
//! Stages are tried in fidelity order and the first [`DocLookup::Found`]
//! wins:
//!
//! 1. [`RemoteDocsStage`]: the attached runtime renders the function's
//!    compiled documentation. Any failure on that path (not connected,
//!    timeout, render error, unexpected reply) is a miss.
//! 2. [`LocalDocsStage`]: the indexed `-spec` text plus the comment written
//!    above the function.
//!
//! When every stage misses, the hover is empty.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::Instant;
use tower_lsp::lsp_types::{Hover, HoverContents, MarkupContent, MarkupKind};
use tracing::debug;

use super::context::ServerContext;
use super::poi_finder::{first_function_target, to_lsp_range};
use super::traits::{Handled, Provider, ProviderError, Request, RequestKind, Response, SessionState};
use crate::distribution::ConnectionStatus;
use crate::index::{Mfa, SignatureIndex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocLookup {
    Found(String),
    NotFound,
}

/// One fidelity level of documentation.
#[async_trait]
pub trait DocStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup(&self, mfa: &Mfa, markdown: bool) -> DocLookup;
}

/// Least time between two background connects started by hovers.
pub const CONNECT_COOLDOWN: Duration = Duration::from_secs(30);

/// Asks the runtime's documentation renderer.
pub struct RemoteDocsStage {
    context: Arc<ServerContext>,
    last_connect: Mutex<Option<Instant>>,
}

impl RemoteDocsStage {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self {
            context,
            last_connect: Mutex::new(None),
        }
    }

    /// Claims the right to start a background connect now.
    fn claim_connect(&self) -> bool {
        let mut last = self.last_connect.lock();
        let now = Instant::now();
        if last.is_some_and(|at| now.duration_since(at) < CONNECT_COOLDOWN) {
            return false;
        }
        *last = Some(now);
        true
    }
}

#[async_trait]
impl DocStage for RemoteDocsStage {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn lookup(&self, mfa: &Mfa, markdown: bool) -> DocLookup {
        let Some(handle) = self.context.distribution() else {
            return DocLookup::NotFound;
        };
        // Hover never waits for a connect. A disconnected runtime is started
        // in the background so later hovers can use it, at most once per
        // cooldown.
        match handle.status().status {
            ConnectionStatus::Connected => {}
            ConnectionStatus::Connecting => return DocLookup::NotFound,
            ConnectionStatus::Disconnected if !self.claim_connect() => return DocLookup::NotFound,
            ConnectionStatus::Disconnected => {
                let handle = handle.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle.connect().await {
                        debug!("Background runtime connect failed: {}", e);
                    }
                });
                return DocLookup::NotFound;
            }
        }

        let settings = self.context.settings();
        let format = if markdown { "markdown" } else { "plaintext" };
        let args = vec![
            json!(mfa.module),
            json!(mfa.function),
            json!(mfa.arity),
            json!(format),
        ];
        match handle
            .rpc_call(
                settings.docs.renderer_module,
                settings.docs.renderer_function,
                args,
                settings.rpc_timeout,
            )
            .await
        {
            Ok(reply) => {
                if !reply.output.is_empty() {
                    debug!("Renderer output for {}: {}", mfa, reply.output.trim_end());
                }
                match reply.value {
                    Value::String(text) if !text.trim().is_empty() => DocLookup::Found(text),
                    other => {
                        debug!("Renderer has no docs for {}: {}", mfa, other);
                        DocLookup::NotFound
                    }
                }
            }
            Err(e) => {
                debug!("Remote docs for {} unavailable: {}", mfa, e);
                DocLookup::NotFound
            }
        }
    }
}

/// Spec text and source comment from the signature index.
pub struct LocalDocsStage {
    signatures: Arc<SignatureIndex>,
}

impl LocalDocsStage {
    pub fn new(signatures: Arc<SignatureIndex>) -> Self {
        Self { signatures }
    }
}

#[async_trait]
impl DocStage for LocalDocsStage {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn lookup(&self, mfa: &Mfa, markdown: bool) -> DocLookup {
        let spec = self.signatures.get(&mfa.module, &mfa.function, mfa.arity);
        let comment = self
            .signatures
            .get_comment(&mfa.module, &mfa.function, mfa.arity);
        match render_local(spec.as_deref(), comment.as_deref(), markdown) {
            Some(text) => DocLookup::Found(text),
            None => DocLookup::NotFound,
        }
    }
}

fn render_local(spec: Option<&str>, comment: Option<&str>, markdown: bool) -> Option<String> {
    let spec = spec.map(|spec| {
        if markdown {
            format!("```erlang\n{}\n```", spec)
        } else {
            spec.to_string()
        }
    });
    match (spec, comment) {
        (Some(spec), Some(comment)) => Some(format!("{}\n\n{}", spec, comment)),
        (Some(spec), None) => Some(spec),
        (None, Some(comment)) => Some(comment.to_string()),
        (None, None) => None,
    }
}

pub struct HoverProvider {
    context: Arc<ServerContext>,
    stages: Vec<Box<dyn DocStage>>,
}

impl HoverProvider {
    pub fn new(context: Arc<ServerContext>) -> Self {
        let stages: Vec<Box<dyn DocStage>> = vec![
            Box::new(RemoteDocsStage::new(context.clone())),
            Box::new(LocalDocsStage::new(context.signatures.clone())),
        ];
        Self::with_stages(context, stages)
    }

    pub fn with_stages(context: Arc<ServerContext>, stages: Vec<Box<dyn DocStage>>) -> Self {
        Self { context, stages }
    }

    /// Runs the chain for `mfa`, stopping at the first stage that finds docs.
    pub async fn lookup(&self, mfa: &Mfa, markdown: bool) -> DocLookup {
        for stage in &self.stages {
            if let DocLookup::Found(text) = stage.lookup(mfa, markdown).await {
                debug!("Docs for {} from {} stage", mfa, stage.name());
                return DocLookup::Found(text);
            }
        }
        DocLookup::NotFound
    }
}

#[async_trait]
impl Provider for HoverProvider {
    fn name(&self) -> &'static str {
        "hover"
    }

    fn kind(&self) -> RequestKind {
        RequestKind::Hover
    }

    async fn handle(&self, request: Request, state: SessionState) -> Result<Handled, ProviderError> {
        let Request::Hover(position) = request else {
            return Err(ProviderError::InvalidRequest("expected a hover request".into()));
        };
        let Some(document) = self.context.document(&position.uri).await else {
            return Ok(Handled::new(Response::Hover(None), state));
        };
        let priority = self.context.documents.priority();
        let hits = document.pois_at(position.poi_position(&document.text), &priority);
        let Some((poi, mfa)) = first_function_target(&document, &hits) else {
            debug!("No function at {}:{}:{}", position.uri, position.line, position.character);
            return Ok(Handled::new(Response::Hover(None), state));
        };

        let hover = match self.lookup(&mfa, state.markdown).await {
            DocLookup::Found(value) => Some(Hover {
                contents: HoverContents::Markup(MarkupContent {
                    kind: if state.markdown {
                        MarkupKind::Markdown
                    } else {
                        MarkupKind::PlainText
                    },
                    value,
                }),
                range: Some(to_lsp_range(&document.text, &poi.range)),
            }),
            DocLookup::NotFound => None,
        };
        Ok(Handled::new(Response::Hover(hover), state))
    }
}
