//! Indexing pipeline: text in, Document/Signature/Module indexes updated.
//!
//! Both the editor (open/change) and the workspace scan feed documents through
//! [`IndexPipeline::index_text`]. A successful parse swaps the document entry
//! and supersedes the module's signature and comment tables; a failed parse
//! leaves every table as it was.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tower_lsp::lsp_types::Url;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::document_index::{Document, DocumentIndex, Ingested, UpdateOutcome};
use super::module_index::ModuleIndex;
use super::signature_index::SignatureIndex;
use crate::parsers::{ParseError, PoiParser};

/// Version given to documents read from disk rather than from the editor.
/// Below any editor version, so a scan never replaces an open buffer.
pub const DISK_VERSION: i32 = -1;

const SOURCE_EXTENSIONS: [&str; 2] = ["erl", "hrl"];

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0} is not a file URI")]
    NotAFile(Url),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

pub struct IndexPipeline {
    documents: Arc<DocumentIndex>,
    signatures: Arc<SignatureIndex>,
    modules: Arc<ModuleIndex>,
    parser: Arc<dyn PoiParser>,
}

impl std::fmt::Debug for IndexPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexPipeline")
            .field("documents", &self.documents.len())
            .finish()
    }
}

impl IndexPipeline {
    pub fn new(
        documents: Arc<DocumentIndex>,
        signatures: Arc<SignatureIndex>,
        modules: Arc<ModuleIndex>,
        parser: Arc<dyn PoiParser>,
    ) -> Self {
        Self {
            documents,
            signatures,
            modules,
            parser,
        }
    }

    /// Parses and indexes one document version.
    ///
    /// A stale version leaves every table untouched and returns the newer
    /// document already stored.
    pub fn index_text(&self, uri: &Url, text: &str, version: i32) -> Result<Arc<Document>, ParseError> {
        let Ingested {
            document,
            parsed,
            outcome,
        } = self.documents.ingest(uri, text, version, self.parser.as_ref())?;
        if outcome == UpdateOutcome::Stale {
            debug!("Kept {} at v{}, ignoring v{}", uri, document.version, version);
            return Ok(document);
        }
        if let Some(module) = parsed.module.as_deref() {
            self.modules.insert(module, uri);
            let specs = parsed
                .specs
                .into_iter()
                .map(|fact| (fact.function, fact.arity, fact.text));
            let comments = parsed
                .comments
                .into_iter()
                .map(|fact| (fact.function, fact.arity, fact.text));
            self.signatures.replace_module(module, specs, comments);
        }
        debug!(
            "Indexed {} v{}: {} POIs",
            uri,
            document.version,
            document.pois.len()
        );
        Ok(document)
    }

    pub fn index_file(&self, path: &Path) -> Result<Arc<Document>, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|source| PipelineError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let uri = Url::from_file_path(path).map_err(|_| PipelineError::Read {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "path is not absolute"),
        })?;
        Ok(self.index_text(&uri, &text, DISK_VERSION)?)
    }

    /// Returns the indexed document, reading it from disk when absent.
    pub fn load(&self, uri: &Url) -> Result<Arc<Document>, PipelineError> {
        if let Some(document) = self.documents.get(uri) {
            return Ok(document);
        }
        let path = uri
            .to_file_path()
            .map_err(|_| PipelineError::NotAFile(uri.clone()))?;
        self.index_file(&path)
    }

    /// Drops the document entry. Module-level facts stay process-wide.
    pub fn forget(&self, uri: &Url) {
        if self.documents.remove(uri).is_some() {
            debug!("Removed {} from document index", uri);
        }
    }

    /// Indexes every Erlang source under `root`, returning how many succeeded.
    pub fn index_workspace(&self, root: &Path) -> usize {
        let mut indexed = 0;
        for entry in WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_source_file(e.path()))
        {
            match self.index_file(entry.path()) {
                Ok(_) => indexed += 1,
                Err(e) => warn!("Skipping {}: {}", entry.path().display(), e),
            }
        }
        info!("Indexed {} source files under {}", indexed, root.display());
        indexed
    }
}

fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}
