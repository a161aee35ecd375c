//! Provider contracts for LSP features
//!
//! Every request the server answers from its indexes goes through one
//! [`Provider`]. A provider is registered for exactly one [`RequestKind`] and
//! exposes two capabilities: whether it is currently enabled, and how it turns
//! a [`Request`] plus the session state into a [`Response`] and the (possibly
//! updated) session state.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  ErlangBackend (tower-lsp handlers) │
//! └──────────────┬──────────────────────┘
//!                │ Request + SessionState
//! ┌──────────────▼──────────────────────┐
//! │  Dispatch (fault boundary)          │
//! └──────────────┬──────────────────────┘
//!                │ RequestKind -> Provider
//! ┌──────────────▼──────────────────────┐
//! │  HoverProvider, DefinitionProvider, │
//! │  ReferencesProvider, ...            │
//! └──────────────┬──────────────────────┘
//!                │ reads
//! ┌──────────────▼──────────────────────┐
//! │  ServerContext                      │
//! │  (indexes, pipeline, runtime handle)│
//! └─────────────────────────────────────┘
//! ```
//!
//! Providers return `Err` (or even panic) freely: [`super::dispatch::Dispatch`]
//! converts any failure into [`Response::empty`] for the request kind.
//!
//! # Usage Example
//!
//! ```rust,ignore
//! use crate::lsp::features::traits::*;
//!
//! struct Silent;
//!
//! #[async_trait]
//! impl Provider for Silent {
//!     fn name(&self) -> &'static str { "silent" }
//!     fn kind(&self) -> RequestKind { RequestKind::Hover }
//!
//!     async fn handle(&self, _request: Request, state: SessionState) -> Result<Handled, ProviderError> {
//!         Ok(Handled::new(Response::Hover(None), state))
//!     }
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tower_lsp::lsp_types::{
    CompletionResponse, DocumentSymbolResponse, GotoDefinitionResponse, Hover, Location,
    Position, TextDocumentPositionParams, Url,
};

use crate::distribution::{ConnectionStatus, DistributionError};
use crate::index::PoiPosition;
use crate::lsp::document::{nth_line, utf16_to_chars};

/// The request kinds dispatch knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestKind {
    Hover,
    Definition,
    References,
    DocumentSymbol,
    Completion,
    ExecuteCommand,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Hover => "hover",
            RequestKind::Definition => "definition",
            RequestKind::References => "references",
            RequestKind::DocumentSymbol => "documentSymbol",
            RequestKind::Completion => "completion",
            RequestKind::ExecuteCommand => "executeCommand",
        }
    }
}

/// A document URI and a zero-based (line, character) position, as sent by
/// the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPosition {
    pub uri: Url,
    pub line: u32,
    pub character: u32,
}

impl TextPosition {
    pub fn new(uri: Url, line: u32, character: u32) -> Self {
        Self { uri, line, character }
    }

    /// The same point in the 1-based char coordinates POIs use. `text` is
    /// the document the UTF-16 `character` offset refers to.
    pub fn poi_position(&self, text: &str) -> PoiPosition {
        let column = utf16_to_chars(nth_line(text, self.line), self.character);
        PoiPosition::new(self.line + 1, column + 1)
    }
}

impl From<TextDocumentPositionParams> for TextPosition {
    fn from(params: TextDocumentPositionParams) -> Self {
        let Position { line, character } = params.position;
        Self::new(params.text_document.uri, line, character)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Hover(TextPosition),
    Definition(TextPosition),
    References {
        position: TextPosition,
        include_declaration: bool,
    },
    DocumentSymbol {
        uri: Url,
    },
    Completion(TextPosition),
    ExecuteCommand {
        command: String,
        arguments: Vec<Value>,
    },
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Hover(_) => RequestKind::Hover,
            Request::Definition(_) => RequestKind::Definition,
            Request::References { .. } => RequestKind::References,
            Request::DocumentSymbol { .. } => RequestKind::DocumentSymbol,
            Request::Completion(_) => RequestKind::Completion,
            Request::ExecuteCommand { .. } => RequestKind::ExecuteCommand,
        }
    }

    pub fn uri(&self) -> Option<&Url> {
        match self {
            Request::Hover(p) | Request::Definition(p) | Request::Completion(p) => Some(&p.uri),
            Request::References { position, .. } => Some(&position.uri),
            Request::DocumentSymbol { uri } => Some(uri),
            Request::ExecuteCommand { .. } => None,
        }
    }
}

/// A provider's answer. `None` payloads are the "no result" marker and go to
/// the client as JSON `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Hover(Option<Hover>),
    Definition(Option<GotoDefinitionResponse>),
    References(Option<Vec<Location>>),
    DocumentSymbol(Option<DocumentSymbolResponse>),
    Completion(Option<CompletionResponse>),
    ExecuteCommand(Option<Value>),
}

impl Response {
    /// The "no information" response for `kind`.
    pub fn empty(kind: RequestKind) -> Self {
        match kind {
            RequestKind::Hover => Response::Hover(None),
            RequestKind::Definition => Response::Definition(None),
            RequestKind::References => Response::References(None),
            RequestKind::DocumentSymbol => Response::DocumentSymbol(None),
            RequestKind::Completion => Response::Completion(None),
            RequestKind::ExecuteCommand => Response::ExecuteCommand(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Response::Hover(r) => r.is_none(),
            Response::Definition(r) => r.is_none(),
            Response::References(r) => r.is_none(),
            Response::DocumentSymbol(r) => r.is_none(),
            Response::Completion(r) => r.is_none(),
            Response::ExecuteCommand(r) => r.is_none(),
        }
    }
}

/// Per-session values providers read and may update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    /// The client renders markdown hover content.
    pub markdown: bool,
    /// Provider names turned off by configuration.
    pub disabled: Arc<HashSet<String>>,
    /// Requests each provider failed on during this session.
    pub faults: BTreeMap<String, u32>,
    /// Runtime status as last reported to the client.
    pub runtime: Option<ConnectionStatus>,
}

impl SessionState {
    pub fn is_disabled(&self, provider: &str) -> bool {
        self.disabled.contains(provider)
    }

    pub fn record_fault(&mut self, provider: &str) {
        *self.faults.entry(provider.to_string()).or_default() += 1;
    }

    pub fn fault_count(&self, provider: &str) -> u32 {
        self.faults.get(provider).copied().unwrap_or(0)
    }

    /// Folds the state a request returned into the shared session state.
    ///
    /// `base` is the snapshot the request started from. Requests run
    /// concurrently against snapshots, so only what the request changed is
    /// applied: fault counters grow by the request's own increments and the
    /// runtime status is replaced only when the request changed it.
    pub fn absorb(&mut self, base: &SessionState, result: SessionState) {
        for (provider, count) in result.faults {
            let added = count.saturating_sub(base.fault_count(&provider));
            if added > 0 {
                *self.faults.entry(provider).or_default() += added;
            }
        }
        if result.runtime != base.runtime {
            self.runtime = result.runtime;
        }
    }
}

/// A response together with the session state it leaves behind.
#[derive(Debug, Clone)]
pub struct Handled {
    pub response: Response,
    pub state: SessionState,
}

impl Handled {
    pub fn new(response: Response, state: SessionState) -> Self {
        Self { response, state }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Distribution(#[from] DistributionError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{0}")]
    Internal(String),
}

/// One LSP feature backed by the server's indexes.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Name used in configuration, logs and metrics.
    fn name(&self) -> &'static str;

    fn kind(&self) -> RequestKind;

    fn is_enabled(&self, state: &SessionState) -> bool {
        !state.is_disabled(self.name())
    }

    async fn handle(&self, request: Request, state: SessionState) -> Result<Handled, ProviderError>;
}
