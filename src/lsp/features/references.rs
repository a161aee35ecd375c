//! Find references to a function across every indexed document.

use std::sync::Arc;

use async_trait::async_trait;
use tower_lsp::lsp_types::Location;

use super::context::ServerContext;
use super::poi_finder::{first_function_target, function_definition, location};
use super::traits::{Handled, Provider, ProviderError, Request, RequestKind, Response, SessionState};
use crate::index::{Document, Mfa, PoiKind};

const REFERENCE_KINDS: [PoiKind; 3] = [PoiKind::Application, PoiKind::ImplicitFun, PoiKind::ExportEntry];

pub struct ReferencesProvider {
    context: Arc<ServerContext>,
}

impl ReferencesProvider {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }

    /// Locations in `document` referring to `target`, in document order.
    fn references_in(document: &Document, target: &Mfa) -> Vec<Location> {
        let mut pois: Vec<_> = document
            .pois
            .iter()
            .filter(|poi| REFERENCE_KINDS.contains(&poi.kind))
            .filter(|poi| poi.id.to_mfa(document.module()).as_ref() == Some(target))
            .collect();
        pois.sort_by_key(|poi| poi.range.start());
        pois.into_iter().map(|poi| location(document, poi)).collect()
    }
}

#[async_trait]
impl Provider for ReferencesProvider {
    fn name(&self) -> &'static str {
        "references"
    }

    fn kind(&self) -> RequestKind {
        RequestKind::References
    }

    async fn handle(&self, request: Request, state: SessionState) -> Result<Handled, ProviderError> {
        let Request::References {
            position,
            include_declaration,
        } = request
        else {
            return Err(ProviderError::InvalidRequest("expected a references request".into()));
        };
        let Some(document) = self.context.document(&position.uri).await else {
            return Ok(Handled::new(Response::References(None), state));
        };
        let priority = self.context.documents.priority();
        let hits = document.pois_at(position.poi_position(&document.text), &priority);
        let Some((_, target)) = first_function_target(&document, &hits) else {
            return Ok(Handled::new(Response::References(None), state));
        };

        let mut documents = self.context.documents.documents();
        documents.sort_by(|a, b| a.uri.as_str().cmp(b.uri.as_str()));

        let mut locations = Vec::new();
        if include_declaration {
            if let Some(defining) = documents.iter().find(|d| d.module() == Some(target.module.as_str())) {
                if let Some(poi) = function_definition(defining, &target.function, target.arity) {
                    locations.push(location(defining, poi));
                }
            }
        }
        for document in &documents {
            locations.extend(Self::references_in(document, &target));
        }

        let response = (!locations.is_empty()).then_some(locations);
        Ok(Handled::new(Response::References(response), state))
    }
}
