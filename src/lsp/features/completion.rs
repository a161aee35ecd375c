//! Completion from the indexes.
//!
//! After `module:` the exported functions of `module` are offered, with the
//! indexed spec as detail. Anywhere else the functions of the current module
//! and the names of known modules are offered, filtered by the word being
//! typed.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tower_lsp::lsp_types::{CompletionItem, CompletionItemKind, CompletionResponse};

use super::context::ServerContext;
use super::traits::{Handled, Provider, ProviderError, Request, RequestKind, Response, SessionState};
use crate::index::{Document, PoiKind};
use crate::lsp::document::utf16_to_chars;

static REMOTE_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([a-z][A-Za-z0-9_@]*):([a-z][A-Za-z0-9_@]*)?$").expect("static regex")
});
static WORD_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-z][A-Za-z0-9_@]*$").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
enum Context<'a> {
    /// `module:prefix`
    Remote { module: &'a str, prefix: &'a str },
    Local { prefix: &'a str },
}

fn completion_context(line_prefix: &str) -> Context<'_> {
    if let Some(caps) = REMOTE_PREFIX.captures(line_prefix) {
        let module = caps.get(1).map_or("", |m| m.as_str());
        let prefix = caps.get(2).map_or("", |m| m.as_str());
        return Context::Remote { module, prefix };
    }
    let prefix = WORD_PREFIX.find(line_prefix).map_or("", |m| m.as_str());
    Context::Local { prefix }
}

/// Text of line `line` (0-based) up to `character`, counted in chars.
/// Text of `line` before the UTF-16 offset `character`.
fn line_prefix(text: &str, line: u32, character: u32) -> Option<String> {
    let line = text.lines().nth(line as usize)?;
    let chars = utf16_to_chars(line, character);
    Some(line.chars().take(chars as usize).collect())
}

pub struct CompletionProvider {
    context: Arc<ServerContext>,
}

impl CompletionProvider {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }

    fn function_item(&self, module: &str, function: &str, arity: u32) -> CompletionItem {
        CompletionItem {
            label: format!("{}/{}", function, arity),
            kind: Some(CompletionItemKind::FUNCTION),
            detail: self
                .context
                .signatures
                .get(module, function, arity)
                .map(|spec| spec.to_string()),
            insert_text: Some(function.to_string()),
            filter_text: Some(function.to_string()),
            ..CompletionItem::default()
        }
    }

    async fn exported(&self, module: &str, prefix: &str) -> Vec<CompletionItem> {
        let Some(document) = self.context.module_document(module).await else {
            return Vec::new();
        };
        let functions: BTreeSet<(String, u32)> = document
            .pois_of_kind(&PoiKind::ExportEntry)
            .filter_map(|poi| poi.id.function_arity())
            .filter(|(function, _)| function.starts_with(prefix))
            .map(|(function, arity)| (function.to_string(), arity))
            .collect();
        functions
            .into_iter()
            .map(|(function, arity)| self.function_item(module, &function, arity))
            .collect()
    }

    fn local(&self, document: &Document, prefix: &str) -> Vec<CompletionItem> {
        let module = document.module().unwrap_or_default();
        let functions: BTreeSet<(String, u32)> = document
            .pois_of_kind(&PoiKind::Function)
            .filter_map(|poi| poi.id.function_arity())
            .filter(|(function, _)| function.starts_with(prefix))
            .map(|(function, arity)| (function.to_string(), arity))
            .collect();
        let mut items: Vec<CompletionItem> = functions
            .into_iter()
            .map(|(function, arity)| self.function_item(module, &function, arity))
            .collect();

        let mut modules = self.context.modules.modules();
        modules.sort();
        items.extend(
            modules
                .into_iter()
                .filter(|name| name.starts_with(prefix) && name != module)
                .map(|name| CompletionItem {
                    label: name,
                    kind: Some(CompletionItemKind::MODULE),
                    ..CompletionItem::default()
                }),
        );
        items
    }
}

#[async_trait]
impl Provider for CompletionProvider {
    fn name(&self) -> &'static str {
        "completion"
    }

    fn kind(&self) -> RequestKind {
        RequestKind::Completion
    }

    async fn handle(&self, request: Request, state: SessionState) -> Result<Handled, ProviderError> {
        let Request::Completion(position) = request else {
            return Err(ProviderError::InvalidRequest("expected a completion request".into()));
        };
        let Some(document) = self.context.document(&position.uri).await else {
            return Ok(Handled::new(Response::Completion(None), state));
        };
        let text = self
            .context
            .text(&position.uri)
            .await
            .unwrap_or_else(|| document.text.clone());
        let prefix = line_prefix(&text, position.line, position.character).unwrap_or_default();
        let items = match completion_context(&prefix) {
            Context::Remote { module, prefix } => self.exported(module, prefix).await,
            Context::Local { prefix } => self.local(&document, prefix),
        };
        let response = (!items.is_empty()).then_some(CompletionResponse::Array(items));
        Ok(Handled::new(Response::Completion(response), state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_context() {
        assert_eq!(
            completion_context("    lists:ma"),
            Context::Remote { module: "lists", prefix: "ma" }
        );
        assert_eq!(
            completion_context("X = foo:"),
            Context::Remote { module: "foo", prefix: "" }
        );
        assert_eq!(completion_context("    ba"), Context::Local { prefix: "ba" });
        assert_eq!(completion_context("X = "), Context::Local { prefix: "" });
    }

    #[test]
    fn test_line_prefix_counts_utf16_units() {
        let text = "-module(a).\nf() -> \"é\", lists:m";
        assert_eq!(line_prefix(text, 1, 11).as_deref(), Some("f() -> \"é\","));
        assert_eq!(line_prefix(text, 5, 0), None);

        let text = "f() -> \"😀\", lists:m";
        assert_eq!(line_prefix(text, 0, 12).as_deref(), Some("f() -> \"😀\","));
    }
}
