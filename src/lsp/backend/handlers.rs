//! LSP protocol handler implementations
//!
//! This module contains the `tower_lsp::LanguageServer` implementation for
//! the Erlang backend:
//! - Lifecycle handlers (initialize, initialized, shutdown)
//! - Document lifecycle (did_open, did_change, did_close)
//! - Feature requests, each routed through `Dispatch`

use serde_json::Value;
use tower_lsp::jsonrpc::Result as LspResult;
use tower_lsp::lsp_types::{
    CompletionOptions, CompletionParams, CompletionResponse, DidChangeTextDocumentParams,
    DidCloseTextDocumentParams, DidOpenTextDocumentParams, DocumentSymbolParams,
    DocumentSymbolResponse, ExecuteCommandOptions, ExecuteCommandParams, GotoDefinitionParams,
    GotoDefinitionResponse, Hover, HoverParams, HoverProviderCapability, InitializeParams,
    InitializeResult, InitializedParams, Location, MessageType, OneOf, ReferenceParams, ServerCapabilities,
    ServerInfo, TextDocumentSyncCapability, TextDocumentSyncKind,
};
use tower_lsp::LanguageServer;
use tracing::{debug, info, warn};

use super::state::ErlangBackend;
use crate::lsp::document::OpenDocument;
use crate::lsp::features::commands::COMMANDS;
use crate::lsp::features::{Request, Response, TextPosition};
use crate::metrics::metrics;

#[tower_lsp::async_trait]
impl LanguageServer for ErlangBackend {
    /// Handles the LSP initialize request: configuration, workspace root and
    /// the runtime manager.
    async fn initialize(&self, params: InitializeParams) -> LspResult<InitializeResult> {
        debug!("Received initialize: {:?}", params);

        #[allow(deprecated)]
        let root = params
            .workspace_folders
            .as_ref()
            .and_then(|folders| folders.first())
            .map(|folder| folder.uri.clone())
            .or_else(|| params.root_uri.clone());
        if let Some(root_uri) = root {
            match root_uri.to_file_path() {
                Ok(path) => *self.root_dir.write() = Some(path),
                Err(()) => warn!("Workspace root {} is not a local path; skipping workspace index", root_uri),
            }
        }

        let config = self.configure(&params);
        self.start_distribution(&config);

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(TextDocumentSyncKind::INCREMENTAL)),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                definition_provider: Some(OneOf::Left(true)),
                references_provider: Some(OneOf::Left(true)),
                document_symbol_provider: Some(OneOf::Left(true)),
                completion_provider: Some(CompletionOptions {
                    trigger_characters: Some(vec![":".to_string()]),
                    resolve_provider: Some(false),
                    ..Default::default()
                }),
                execute_command_provider: Some(ExecuteCommandOptions {
                    commands: COMMANDS.iter().map(|c| c.to_string()).collect(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _params: InitializedParams) {
        info!("Initialized");
        self.client
            .log_message(MessageType::INFO, "Erlang language server initialized")
            .await;
        self.spawn_workspace_index();
    }

    /// Stops the runtime manager (killing a runtime it started) and logs the
    /// session metrics.
    async fn shutdown(&self) -> LspResult<()> {
        info!("Received shutdown request");
        if let Some(handle) = self.context.distribution() {
            handle.stop().await;
        }
        let task = self.manager_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Distribution manager ended abnormally: {}", e);
            }
        }

        let summary = metrics().summary();
        info!(
            "Session summary: {} files indexed, {} parse errors, {} connect failures, {} rpc timeouts",
            summary.total_files_indexed, summary.parse_errors, summary.connect_failures, summary.rpc_timeouts
        );
        for (provider, stats) in &summary.providers {
            info!(
                "  {}: {} requests, {} skipped, {} faults, {}us total",
                provider, stats.requests, stats.skipped, stats.faults, stats.total_micros
            );
        }
        for (operation, stats) in &summary.operations {
            info!(
                "  {}: {} runs, mean {}us, min {}us, max {}us",
                operation, stats.count, stats.mean_micros, stats.min_micros, stats.max_micros
            );
        }
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let document = params.text_document;
        info!("Opening document: URI={}, version={}", document.uri, document.version);
        self.open_documents
            .insert(document.uri.clone(), OpenDocument::new(&document.text, document.version));
        self.ingest(&document.uri, &document.text, document.version);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;
        let text = {
            let Some(mut document) = self.open_documents.get_mut(&uri) else {
                warn!("Change for unopened document {}", uri);
                return;
            };
            match document.apply(&params.content_changes, version) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Ignoring change to {}: {}", uri, e);
                    return;
                }
            }
        };
        self.ingest(&uri, &text, version);
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        info!("Closing document: URI={}", uri);
        self.open_documents.remove(&uri);
        self.context.clear_live_text(&uri);
        self.context.pipeline.forget(&uri);
    }

    async fn hover(&self, params: HoverParams) -> LspResult<Option<Hover>> {
        let position = TextPosition::from(params.text_document_position_params);
        match self.run(Request::Hover(position)).await {
            Response::Hover(hover) => Ok(hover),
            _ => Ok(None),
        }
    }

    async fn goto_definition(&self, params: GotoDefinitionParams) -> LspResult<Option<GotoDefinitionResponse>> {
        let position = TextPosition::from(params.text_document_position_params);
        match self.run(Request::Definition(position)).await {
            Response::Definition(definition) => Ok(definition),
            _ => Ok(None),
        }
    }

    async fn references(&self, params: ReferenceParams) -> LspResult<Option<Vec<Location>>> {
        let request = Request::References {
            position: TextPosition::from(params.text_document_position),
            include_declaration: params.context.include_declaration,
        };
        match self.run(request).await {
            Response::References(locations) => Ok(locations),
            _ => Ok(None),
        }
    }

    async fn document_symbol(&self, params: DocumentSymbolParams) -> LspResult<Option<DocumentSymbolResponse>> {
        let request = Request::DocumentSymbol {
            uri: params.text_document.uri,
        };
        match self.run(request).await {
            Response::DocumentSymbol(symbols) => Ok(symbols),
            _ => Ok(None),
        }
    }

    async fn completion(&self, params: CompletionParams) -> LspResult<Option<CompletionResponse>> {
        let position = TextPosition::from(params.text_document_position);
        match self.run(Request::Completion(position)).await {
            Response::Completion(items) => Ok(items),
            _ => Ok(None),
        }
    }

    async fn execute_command(&self, params: ExecuteCommandParams) -> LspResult<Option<Value>> {
        let request = Request::ExecuteCommand {
            command: params.command,
            arguments: params.arguments,
        };
        match self.run(request).await {
            Response::ExecuteCommand(value) => Ok(value),
            _ => Ok(None),
        }
    }
}
