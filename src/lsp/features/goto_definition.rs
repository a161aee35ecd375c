//! Go to definition for functions, macros, records and types.
//!
//! Function targets resolve through the module index, so a remote call jumps
//! into another indexed file. Macros and records are looked up in the current
//! document first and then in every indexed document (header files).

use std::sync::Arc;

use async_trait::async_trait;
use tower_lsp::lsp_types::{GotoDefinitionResponse, Location};
use tracing::debug;

use super::context::ServerContext;
use super::poi_finder::{function_definition, function_target, location, named_definition};
use super::traits::{Handled, Provider, ProviderError, Request, RequestKind, Response, SessionState};
use crate::index::{Document, Mfa, Poi, PoiId, PoiKind};

pub struct DefinitionProvider {
    context: Arc<ServerContext>,
}

impl DefinitionProvider {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }

    async fn resolve(&self, document: &Arc<Document>, poi: &Poi) -> Option<Location> {
        match &poi.kind {
            PoiKind::MacroUse => self.named(document, &PoiKind::Define, &poi.id),
            PoiKind::RecordUse => self.named(document, &PoiKind::RecordDef, &poi.id),
            PoiKind::TypeApplication => {
                let mfa = poi.id.to_mfa(document.module())?;
                self.type_definition(document, &mfa).await
            }
            PoiKind::Module => {
                let PoiId::Name(module) = &poi.id else { return None };
                let target = self.context.module_document(module).await?;
                let target_poi = target.pois_of_kind(&PoiKind::Module).next()?;
                Some(location(&target, target_poi))
            }
            _ => {
                let mfa = function_target(document, poi)?;
                self.function(document, &mfa).await
            }
        }
    }

    async fn target_document(&self, document: &Arc<Document>, module: &str) -> Option<Arc<Document>> {
        if document.module() == Some(module) {
            Some(document.clone())
        } else {
            self.context.module_document(module).await
        }
    }

    async fn function(&self, document: &Arc<Document>, mfa: &Mfa) -> Option<Location> {
        let target = self.target_document(document, &mfa.module).await?;
        let poi = function_definition(&target, &mfa.function, mfa.arity)?;
        Some(location(&target, poi))
    }

    async fn type_definition(&self, document: &Arc<Document>, mfa: &Mfa) -> Option<Location> {
        let target = self.target_document(document, &mfa.module).await?;
        let id = PoiId::fa(mfa.function.as_str(), mfa.arity);
        let poi = target
            .pois_of_kind(&PoiKind::TypeDefinition)
            .find(|poi| poi.id == id)?;
        Some(location(&target, poi))
    }

    fn named(&self, document: &Arc<Document>, kind: &PoiKind, id: &PoiId) -> Option<Location> {
        let PoiId::Name(name) = id else { return None };
        if let Some(poi) = named_definition(document, kind, name) {
            return Some(location(document, poi));
        }
        self.context
            .documents
            .documents()
            .into_iter()
            .filter(|other| other.uri != document.uri)
            .find_map(|other| named_definition(&other, kind, name).map(|poi| location(&other, poi)))
    }
}

#[async_trait]
impl Provider for DefinitionProvider {
    fn name(&self) -> &'static str {
        "definition"
    }

    fn kind(&self) -> RequestKind {
        RequestKind::Definition
    }

    async fn handle(&self, request: Request, state: SessionState) -> Result<Handled, ProviderError> {
        let Request::Definition(position) = request else {
            return Err(ProviderError::InvalidRequest("expected a definition request".into()));
        };
        let Some(document) = self.context.document(&position.uri).await else {
            return Ok(Handled::new(Response::Definition(None), state));
        };
        let priority = self.context.documents.priority();
        let hits = document.pois_at(position.poi_position(&document.text), &priority);

        // Most specific POI that leads somewhere.
        let mut found = None;
        for poi in &hits {
            found = self.resolve(&document, poi).await;
            if found.is_some() {
                break;
            }
        }
        if found.is_none() {
            debug!("No definition for {} POIs at {}:{}", hits.len(), position.line, position.character);
        }
        Ok(Handled::new(
            Response::Definition(found.map(GotoDefinitionResponse::Scalar)),
            state,
        ))
    }
}
