use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tower_lsp::Client;
use tower_lsp::lsp_types::{InitializeParams, MarkupKind, Url};
use tracing::{debug, info, warn};

use crate::config::{CliOverrides, Config};
use crate::distribution::{
    DistributionManager, ManagerSettings, ProcessSpawner, TcpConnector, node_name,
};
use crate::lsp::features::{ContextSettings, Dispatch, Request, Response, ServerContext, SessionState};
use crate::metrics::{TimingGuard, metrics};
use crate::parsers::erlang::ErlangScanner;

// Import types from backend submodules
mod handlers;
mod state;

pub use state::ErlangBackend;

/// Prefix of the node name this server uses towards the runtime.
const LOCAL_NODE_PREFIX: &str = "els";

impl ErlangBackend {
    pub fn new(client: Client, overrides: CliOverrides) -> Self {
        let context = Arc::new(ServerContext::new(Arc::new(ErlangScanner::new())));
        let dispatch = Arc::new(Dispatch::standard(context.clone()));
        info!("Registered providers: {:?}", dispatch.provider_names());
        Self {
            client,
            context,
            dispatch,
            open_documents: Arc::new(DashMap::new()),
            session: Arc::new(RwLock::new(SessionState::default())),
            overrides,
            root_dir: Arc::new(RwLock::new(None)),
            manager_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Reads configuration from the initialize request and applies it to the
    /// indexes and the session.
    pub(super) fn configure(&self, params: &InitializeParams) -> Config {
        let mut config = Config::from_initialization_options(params.initialization_options.as_ref());
        config.apply_overrides(&self.overrides);

        self.context.set_settings(ContextSettings::from_config(&config));
        self.context.documents.set_priority(config.priority_table());

        let markdown = params
            .capabilities
            .text_document
            .as_ref()
            .and_then(|text| text.hover.as_ref())
            .and_then(|hover| hover.content_format.as_ref())
            .is_some_and(|formats| formats.contains(&MarkupKind::Markdown));
        let disabled: HashSet<String> = config.providers.disabled.iter().cloned().collect();
        if !disabled.is_empty() {
            info!("Disabled providers: {:?}", disabled);
        }

        let mut session = self.session.write();
        session.markdown = markdown;
        session.disabled = Arc::new(disabled);
        config
    }

    /// Starts the distribution manager. It stays Disconnected until a
    /// provider or command needs the runtime.
    pub(super) fn start_distribution(&self, config: &Config) {
        let project = self
            .root_dir
            .read()
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
            .map(sanitize_node_part)
            .unwrap_or_else(|| "session".to_string());
        let local = node_name::node_name(LOCAL_NODE_PREFIX, &project, config.runtime.name_mode);
        let settings = ManagerSettings::from_runtime(&config.runtime, local.clone());
        info!(
            "Runtime {} as {} (enabled: {})",
            settings.target.node, local, settings.enabled
        );

        let (handle, task) = DistributionManager::start(
            settings,
            Arc::new(TcpConnector::new(config.runtime.port)),
            Arc::new(ProcessSpawner),
        );
        if self.context.set_distribution(handle) {
            *self.manager_task.lock() = Some(task);
        } else {
            warn!("Distribution manager already started; ignoring second start");
            task.abort();
        }
    }

    /// Indexes the workspace root on a blocking thread.
    pub(super) fn spawn_workspace_index(&self) {
        let Some(root) = self.root_dir.read().clone() else {
            debug!("No workspace root; skipping workspace index");
            return;
        };
        let pipeline = self.context.pipeline.clone();
        tokio::task::spawn_blocking(move || {
            let _timer = TimingGuard::new("workspace_index");
            let count = pipeline.index_workspace(&root);
            metrics().record_workspace_index(count);
        });
    }

    /// Feeds one editor version through the indexing pipeline. A parse
    /// failure keeps the previous index entry.
    pub(super) fn ingest(&self, uri: &Url, text: &str, version: i32) {
        self.context.set_live_text(uri, Arc::from(text));
        let _timer = TimingGuard::new("ingest");
        match self.context.pipeline.index_text(uri, text, version) {
            Ok(document) => debug!("{} now at v{}", uri, document.version),
            Err(e) => {
                metrics().record_parse_error();
                warn!("Keeping previous index for {} (v{} failed: {})", uri, version, e);
            }
        }
    }

    /// Runs a request through dispatch against a snapshot of the session
    /// state and folds the resulting state back in.
    pub(super) async fn run(&self, request: Request) -> Response {
        let snapshot = self.session.read().clone();
        let (response, state) = self.dispatch.dispatch(request, snapshot.clone()).await;
        self.session.write().absorb(&snapshot, state);
        response
    }
}

/// Node names allow letters, digits, `_` and `-` only.
fn sanitize_node_part(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}
