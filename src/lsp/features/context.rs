//! Shared, read-mostly state handed to every provider.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tower_lsp::lsp_types::Url;
use tracing::{debug, warn};

use crate::config::{Config, DocsConfig};
use crate::distribution::DistributionHandle;
use crate::index::{Document, DocumentIndex, IndexPipeline, ModuleIndex, SignatureIndex};
use crate::parsers::PoiParser;

#[derive(Debug, Clone)]
pub struct ContextSettings {
    pub docs: DocsConfig,
    pub rpc_timeout: Duration,
}

impl Default for ContextSettings {
    fn default() -> Self {
        let config = Config::default();
        Self::from_config(&config)
    }
}

impl ContextSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            docs: config.docs.clone(),
            rpc_timeout: config.runtime.rpc_timeout(),
        }
    }
}

#[derive(Debug)]
pub struct ServerContext {
    pub documents: Arc<DocumentIndex>,
    pub signatures: Arc<SignatureIndex>,
    pub modules: Arc<ModuleIndex>,
    pub pipeline: Arc<IndexPipeline>,
    /// Latest editor text per open URI, including versions that failed to
    /// parse.
    live_text: DashMap<Url, Arc<str>>,
    distribution: OnceCell<DistributionHandle>,
    settings: RwLock<ContextSettings>,
}

impl ServerContext {
    pub fn new(parser: Arc<dyn PoiParser>) -> Self {
        let documents = Arc::new(DocumentIndex::new());
        let signatures = Arc::new(SignatureIndex::new());
        let modules = Arc::new(ModuleIndex::new());
        let pipeline = Arc::new(IndexPipeline::new(
            documents.clone(),
            signatures.clone(),
            modules.clone(),
            parser,
        ));
        Self {
            documents,
            signatures,
            modules,
            pipeline,
            live_text: DashMap::new(),
            distribution: OnceCell::new(),
            settings: RwLock::new(ContextSettings::default()),
        }
    }

    /// The runtime handle, once the manager has been started.
    pub fn distribution(&self) -> Option<&DistributionHandle> {
        self.distribution.get()
    }

    /// Installs the runtime handle. Returns `false` if one was already set.
    pub fn set_distribution(&self, handle: DistributionHandle) -> bool {
        self.distribution.set(handle).is_ok()
    }

    pub fn settings(&self) -> ContextSettings {
        self.settings.read().clone()
    }

    pub fn set_settings(&self, settings: ContextSettings) {
        *self.settings.write() = settings;
    }

    pub fn set_live_text(&self, uri: &Url, text: Arc<str>) {
        self.live_text.insert(uri.clone(), text);
    }

    pub fn clear_live_text(&self, uri: &Url) {
        self.live_text.remove(uri);
    }

    /// What the editor currently shows for `uri`, else the indexed text.
    pub async fn text(&self, uri: &Url) -> Option<Arc<str>> {
        let live = self.live_text.get(uri).map(|text| text.value().clone());
        if live.is_some() {
            return live;
        }
        self.document(uri).await.map(|document| document.text.clone())
    }

    /// The indexed document for `uri`. A document not yet indexed is read
    /// and parsed on the blocking pool.
    pub async fn document(&self, uri: &Url) -> Option<Arc<Document>> {
        if let Some(document) = self.documents.get(uri) {
            return Some(document);
        }
        let pipeline = Arc::clone(&self.pipeline);
        let target = uri.clone();
        match tokio::task::spawn_blocking(move || pipeline.load(&target)).await {
            Ok(Ok(document)) => Some(document),
            Ok(Err(e)) => {
                debug!("No document for {}: {}", uri, e);
                None
            }
            Err(e) => {
                warn!("Loading {} did not finish: {}", uri, e);
                None
            }
        }
    }

    /// The document defining `module`.
    pub async fn module_document(&self, module: &str) -> Option<Arc<Document>> {
        let uri = self.modules.get(module)?;
        self.document(&uri).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::erlang::ErlangScanner;

    fn context() -> ServerContext {
        ServerContext::new(Arc::new(ErlangScanner::new()))
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_unindexed_document_is_loaded_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.erl");
        std::fs::write(&path, "-module(late).\nf() -> ok.\n").unwrap();
        let uri = Url::from_file_path(&path).unwrap();
        let context = context();

        let document = context.document(&uri).await.unwrap();
        assert_eq!(document.module(), Some("late"));
        assert!(context.documents.get(&uri).is_some());
        assert_eq!(context.module_document("late").await.unwrap().uri, uri);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_live_text_wins_over_indexed_text() {
        let context = context();
        let uri = Url::parse("file:///nowhere/missing.erl").unwrap();
        assert!(context.document(&uri).await.is_none());
        assert!(context.text(&uri).await.is_none());

        context.set_live_text(&uri, Arc::from("-module(missing"));
        assert_eq!(context.text(&uri).await.as_deref(), Some("-module(missing"));
    }
}
