//! Backend state management
//!
//! This module defines the ErlangBackend struct, which holds the shared
//! indexes, the provider dispatch table, the editor's open documents and the
//! session state.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tower_lsp::Client;
use tower_lsp::lsp_types::Url;

use crate::config::CliOverrides;
use crate::lsp::document::OpenDocument;
use crate::lsp::features::{Dispatch, ServerContext, SessionState};

/// The Erlang language server backend, managing state and handling LSP requests.
#[derive(Clone)]
pub struct ErlangBackend {
    pub(super) client: Client,
    pub(super) context: Arc<ServerContext>,
    pub(super) dispatch: Arc<Dispatch>,
    pub(super) open_documents: Arc<DashMap<Url, OpenDocument>>,
    pub(super) session: Arc<RwLock<SessionState>>,
    pub(super) overrides: CliOverrides,
    pub(super) root_dir: Arc<RwLock<Option<PathBuf>>>,
    /// Distribution manager task, joined at shutdown.
    pub(super) manager_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

// Manual Debug implementation since Client doesn't implement Debug
impl std::fmt::Debug for ErlangBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErlangBackend")
            .field("open_documents", &self.open_documents.len())
            .field("indexed_documents", &self.context.documents.len())
            .field("dispatch", &self.dispatch)
            .finish()
    }
}
