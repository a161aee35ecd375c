use std::sync::Arc;

use async_trait::async_trait;
use tower_lsp::lsp_types::{DocumentSymbol, DocumentSymbolResponse, SymbolKind};

use super::context::ServerContext;
use super::poi_finder::{function_definition, to_lsp_range};
use super::traits::{Handled, Provider, ProviderError, Request, RequestKind, Response, SessionState};
use crate::index::{Document, Poi, PoiKind};

pub struct DocumentSymbolProvider {
    context: Arc<ServerContext>,
}

impl DocumentSymbolProvider {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }
}

fn symbol_kind(kind: &PoiKind) -> Option<SymbolKind> {
    match kind {
        PoiKind::Function => Some(SymbolKind::FUNCTION),
        PoiKind::RecordDef => Some(SymbolKind::STRUCT),
        PoiKind::Define => Some(SymbolKind::CONSTANT),
        PoiKind::TypeDefinition => Some(SymbolKind::TYPE_PARAMETER),
        _ => None,
    }
}

#[allow(deprecated)]
fn symbol(document: &Document, poi: &Poi, kind: SymbolKind) -> DocumentSymbol {
    let range = to_lsp_range(&document.text, &poi.range);
    let selection = poi
        .id
        .function_arity()
        .filter(|_| poi.kind == PoiKind::Function)
        .and_then(|(function, arity)| function_definition(document, function, arity))
        .map(|clause| to_lsp_range(&document.text, &clause.range))
        .unwrap_or(range);
    DocumentSymbol {
        name: poi.id.to_string(),
        detail: None,
        kind,
        tags: None,
        deprecated: None,
        range,
        selection_range: selection,
        children: None,
    }
}

/// Top-level symbols of `document` in source order.
pub fn document_symbols(document: &Document) -> Vec<DocumentSymbol> {
    let mut pois: Vec<(&Poi, SymbolKind)> = document
        .pois
        .iter()
        .filter_map(|poi| symbol_kind(&poi.kind).map(|kind| (poi, kind)))
        .collect();
    pois.sort_by_key(|(poi, _)| poi.range.start());
    pois.into_iter()
        .map(|(poi, kind)| symbol(document, poi, kind))
        .collect()
}

#[async_trait]
impl Provider for DocumentSymbolProvider {
    fn name(&self) -> &'static str {
        "documentSymbol"
    }

    fn kind(&self) -> RequestKind {
        RequestKind::DocumentSymbol
    }

    async fn handle(&self, request: Request, state: SessionState) -> Result<Handled, ProviderError> {
        let Request::DocumentSymbol { uri } = request else {
            return Err(ProviderError::InvalidRequest("expected a documentSymbol request".into()));
        };
        let response = self
            .context
            .document(&uri)
            .await
            .map(|document| document_symbols(&document))
            .filter(|symbols| !symbols.is_empty())
            .map(DocumentSymbolResponse::Nested);
        Ok(Handled::new(Response::DocumentSymbol(response), state))
    }
}
