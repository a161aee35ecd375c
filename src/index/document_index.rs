//! Per-URI document state and point lookup.
//!
//! Each URI maps to an immutable [`Document`] snapshot behind an `Arc`. An
//! update builds a complete new snapshot and swaps the pointer in one map
//! insert; readers clone the `Arc` and release the shard lock before doing any
//! work, so a lookup observes exactly one `(uri, version, pois)` triple.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use tower_lsp::lsp_types::Url;
use tracing::{debug, trace, warn};

use super::poi::{Poi, PoiKind, PoiPosition};
use super::priority::KindPriority;
use crate::parsers::{ParseError, ParsedSource, PoiParser};

/// Immutable snapshot of one indexed document.
#[derive(Debug)]
pub struct Document {
    pub uri: Url,
    pub version: i32,
    pub text: Arc<str>,
    pub module: Option<String>,
    pub pois: Vec<Poi>,
}

impl Document {
    pub fn new(uri: Url, text: impl Into<Arc<str>>, version: i32, pois: Vec<Poi>) -> Self {
        Self {
            uri,
            version,
            text: text.into(),
            module: None,
            pois,
        }
    }

    pub fn with_module(mut self, module: Option<String>) -> Self {
        self.module = module;
        self
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn pois_of_kind<'a>(&'a self, kind: &'a PoiKind) -> impl Iterator<Item = &'a Poi> + 'a {
        self.pois.iter().filter(move |poi| &poi.kind == kind)
    }

    /// Every POI whose range contains `point`, most specific first.
    pub fn pois_at(&self, point: PoiPosition, priority: &KindPriority) -> Vec<Poi> {
        let mut hits: Vec<&Poi> = self
            .pois
            .iter()
            .filter(|poi| poi.range.contains(point))
            .collect();
        hits.sort_by(|a, b| {
            a.range
                .size()
                .cmp(&b.range.size())
                .then_with(|| priority.priority(&a.kind).cmp(&priority.priority(&b.kind)))
        });
        hits.into_iter().cloned().collect()
    }
}

/// Outcome of [`DocumentIndex::update`] and [`DocumentIndex::ingest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Inserted,
    Replaced,
    /// The stored entry already had a newer version; nothing changed.
    Stale,
}

/// A parsed version as [`DocumentIndex::ingest`] left it.
#[derive(Debug)]
pub struct Ingested {
    /// The entry now stored for the URI. On [`UpdateOutcome::Stale`] this is
    /// the newer version that was kept, not the one just parsed.
    pub document: Arc<Document>,
    pub parsed: ParsedSource,
    pub outcome: UpdateOutcome,
}

#[derive(Debug, Default)]
pub struct DocumentIndex {
    documents: DashMap<Url, Arc<Document>>,
    priority: RwLock<Arc<KindPriority>>,
}

impl DocumentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_priority(&self, priority: KindPriority) {
        *self.priority.write() = Arc::new(priority);
    }

    pub fn priority(&self) -> Arc<KindPriority> {
        self.priority.read().clone()
    }

    /// Replaces the entry for `uri` with a fresh snapshot.
    pub fn update(&self, uri: &Url, text: &str, version: i32, pois: Vec<Poi>) -> UpdateOutcome {
        self.store(Document::new(uri.clone(), text, version, pois))
    }

    /// Stores a pre-built snapshot, refusing to go back in version.
    pub fn store(&self, document: Document) -> UpdateOutcome {
        let document = Arc::new(document);
        match self.documents.entry(document.uri.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().version > document.version {
                    debug!(
                        "Ignoring stale update for {} (stored v{}, got v{})",
                        document.uri,
                        occupied.get().version,
                        document.version
                    );
                    return UpdateOutcome::Stale;
                }
                trace!("Replacing {} with v{}", document.uri, document.version);
                occupied.insert(document);
                UpdateOutcome::Replaced
            }
            Entry::Vacant(vacant) => {
                trace!("Inserting {} at v{}", document.uri, document.version);
                vacant.insert(document);
                UpdateOutcome::Inserted
            }
        }
    }

    /// Parses `text` and swaps in the result.
    ///
    /// On a parse failure the previous snapshot (if any) stays in place and
    /// the error is returned for the caller to log or ignore. A version older
    /// than the stored one parses but is not stored.
    pub fn ingest(
        &self,
        uri: &Url,
        text: &str,
        version: i32,
        parser: &dyn PoiParser,
    ) -> Result<Ingested, ParseError> {
        let parsed = match parser.parse(text) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(
                    "Parse failed for {} v{}: {}; keeping last indexed version",
                    uri, version, err
                );
                return Err(err);
            }
        };
        let document = Document::new(uri.clone(), text, version, parsed.pois.clone())
            .with_module(parsed.module.clone());
        let outcome = self.store(document);
        let document = self
            .get(uri)
            .ok_or_else(|| ParseError::new(0, 0, "document vanished during ingest"))?;
        Ok(Ingested {
            document,
            parsed,
            outcome,
        })
    }

    pub fn get(&self, uri: &Url) -> Option<Arc<Document>> {
        self.documents.get(uri).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, uri: &Url) -> Option<Arc<Document>> {
        self.documents.remove(uri).map(|(_, document)| document)
    }

    /// POIs at a 1-based `(line, column)`, most specific first.
    ///
    /// Unknown documents and positions covered by nothing both yield an empty
    /// list.
    pub fn lookup_at(&self, uri: &Url, line: u32, column: u32) -> Vec<Poi> {
        let priority = self.priority();
        self.lookup_at_with(uri, line, column, &priority)
    }

    pub fn lookup_at_with(
        &self,
        uri: &Url,
        line: u32,
        column: u32,
        priority: &KindPriority,
    ) -> Vec<Poi> {
        match self.get(uri) {
            Some(document) => document.pois_at(PoiPosition::new(line, column), priority),
            None => {
                debug!("lookup_at on unindexed document {}", uri);
                Vec::new()
            }
        }
    }

    /// Snapshot of all stored documents.
    pub fn documents(&self) -> Vec<Arc<Document>> {
        self.documents
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
