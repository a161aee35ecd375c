//! Request routing and the provider fault boundary.
//!
//! The kind-to-provider table is built once at startup. Whatever happens
//! inside a provider (an `Err`, a panic, a failed remote call) the caller
//! receives a [`Response`] of the requested kind; failures surface only in the
//! log, the metrics and the session's fault counters.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, error};

use super::commands::CommandProvider;
use super::completion::CompletionProvider;
use super::context::ServerContext;
use super::document_symbols::DocumentSymbolProvider;
use super::goto_definition::DefinitionProvider;
use super::hover::HoverProvider;
use super::references::ReferencesProvider;
use super::traits::{Provider, Request, RequestKind, Response, SessionState};
use crate::metrics::{RequestOutcome, metrics};

pub struct Dispatch {
    providers: HashMap<RequestKind, Arc<dyn Provider>>,
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatch")
            .field("providers", &self.provider_names())
            .finish()
    }
}

impl Dispatch {
    /// Registers each provider under its own kind. A later provider for the
    /// same kind replaces an earlier one.
    pub fn new(providers: impl IntoIterator<Item = Arc<dyn Provider>>) -> Self {
        let providers = providers
            .into_iter()
            .map(|provider| (provider.kind(), provider))
            .collect();
        Self { providers }
    }

    /// The built-in provider set.
    pub fn standard(context: Arc<ServerContext>) -> Self {
        Self::new([
            Arc::new(HoverProvider::new(context.clone())) as Arc<dyn Provider>,
            Arc::new(DefinitionProvider::new(context.clone())),
            Arc::new(ReferencesProvider::new(context.clone())),
            Arc::new(DocumentSymbolProvider::new(context.clone())),
            Arc::new(CompletionProvider::new(context.clone())),
            Arc::new(CommandProvider::new(context)),
        ])
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.providers.values().map(|p| p.name()).collect();
        names.sort_unstable();
        names
    }

    pub async fn dispatch(&self, request: Request, state: SessionState) -> (Response, SessionState) {
        let kind = request.kind();
        let Some(provider) = self.providers.get(&kind) else {
            debug!("No provider registered for {}", kind.as_str());
            return (Response::empty(kind), state);
        };
        let name = provider.name();
        if !provider.is_enabled(&state) {
            debug!("Provider {} is disabled", name);
            metrics().record_request(name, RequestOutcome::Skipped, Default::default());
            return (Response::empty(kind), state);
        }

        let input = request.clone();
        let started = Instant::now();
        let outcome = AssertUnwindSafe(provider.handle(request, state.clone()))
            .catch_unwind()
            .await;
        let elapsed = started.elapsed();

        let failure = match outcome {
            Ok(Ok(handled)) => {
                metrics().record_request(name, RequestOutcome::Answered, elapsed);
                debug!("{} answered in {:?}", name, elapsed);
                return (handled.response, handled.state);
            }
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };

        error!(provider = name, "Provider {} failed on {:?}: {}", name, input, failure);
        metrics().record_request(name, RequestOutcome::Faulted, elapsed);
        let mut state = state;
        state.record_fault(name);
        (Response::empty(kind), state)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
