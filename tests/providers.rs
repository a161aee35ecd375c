//! Provider dispatch over a small two-module workspace.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use indoc::indoc;
use serde_json::json;
use tower_lsp::lsp_types::{
    CompletionResponse, GotoDefinitionResponse, HoverContents, MarkupKind, Position, Range, Url,
};

use erlang_language_server::lsp::features::goto_definition::DefinitionProvider;
use erlang_language_server::lsp::features::{
    Dispatch, Handled, Provider, ProviderError, Request, RequestKind, Response, ServerContext,
    SessionState, TextPosition,
};
use erlang_language_server::parsers::erlang::ErlangScanner;

const FOO: &str = indoc! {r#"
    -module(foo).
    -export([bar/2, baz/0]).
    -record(state, {count = 0 :: integer()}).
    -define(TIMEOUT, 5000).

    %% Does something.
    -spec bar(X, Y) -> ok.
    bar(X, Y) ->
        io:format("~p ~p", [X, Y]),
        ok.

    baz() ->
        S = #state{},
        lists:map(fun(E) -> E + 1 end, [1, 2]),
        F = fun bar/2,
        length([?TIMEOUT]),
        bar(S, F).
"#};

const CALLER: &str = indoc! {"
    -module(caller).
    -export([run/0]).

    run() ->
        foo:bar(1, 2).
"};

fn foo_uri() -> Url {
    Url::parse("file:///work/src/foo.erl").unwrap()
}

fn caller_uri() -> Url {
    Url::parse("file:///work/src/caller.erl").unwrap()
}

fn workspace() -> (Arc<ServerContext>, Dispatch) {
    let context = Arc::new(ServerContext::new(Arc::new(ErlangScanner::new())));
    context.pipeline.index_text(&foo_uri(), FOO, 1).unwrap();
    context.pipeline.index_text(&caller_uri(), CALLER, 1).unwrap();
    let dispatch = Dispatch::standard(context.clone());
    (context, dispatch)
}

fn markdown() -> SessionState {
    SessionState {
        markdown: true,
        ..SessionState::default()
    }
}

fn hover_text(response: Response) -> Option<(MarkupKind, String)> {
    let Response::Hover(hover) = response else {
        panic!("expected a hover response, got {response:?}");
    };
    match hover?.contents {
        HoverContents::Markup(markup) => Some((markup.kind, markup.value)),
        other => panic!("unexpected hover contents {other:?}"),
    }
}

#[tokio::test]
async fn test_hover_falls_back_to_spec_and_comment() {
    let (_, dispatch) = workspace();
    // `bar(S, F)` on the last line of foo.
    let request = Request::Hover(TextPosition::new(foo_uri(), 16, 5));

    let (response, _) = dispatch.dispatch(request.clone(), markdown()).await;
    let (kind, value) = hover_text(response).expect("hover for bar/2");
    assert_eq!(kind, MarkupKind::Markdown);
    assert_eq!(value, "```erlang\nbar(X, Y) -> ok.\n```\n\nDoes something.");

    let (response, _) = dispatch.dispatch(request, SessionState::default()).await;
    let (kind, value) = hover_text(response).expect("plain hover for bar/2");
    assert_eq!(kind, MarkupKind::PlainText);
    assert_eq!(value, "bar(X, Y) -> ok.\n\nDoes something.");
}

#[tokio::test]
async fn test_hover_on_remote_call_uses_callee_docs() {
    let (_, dispatch) = workspace();
    let request = Request::Hover(TextPosition::new(caller_uri(), 4, 9));
    let (response, _) = dispatch.dispatch(request, markdown()).await;
    let (_, value) = hover_text(response).expect("hover for foo:bar/2");
    assert!(value.contains("bar(X, Y) -> ok."));
}

#[tokio::test]
async fn test_hover_without_docs_is_null() {
    let (_, dispatch) = workspace();
    // The `baz()` clause head has neither a spec nor a comment.
    let request = Request::Hover(TextPosition::new(foo_uri(), 11, 1));
    let (response, state) = dispatch.dispatch(request, markdown()).await;
    assert_eq!(response, Response::Hover(None));
    assert_eq!(state.fault_count("hover"), 0);
}

#[tokio::test]
async fn test_hover_on_unknown_document_is_null() {
    let (_, dispatch) = workspace();
    let uri = Url::parse("file:///nowhere/missing.erl").unwrap();
    let (response, _) = dispatch
        .dispatch(Request::Hover(TextPosition::new(uri, 0, 0)), markdown())
        .await;
    assert!(response.is_empty());
}

#[tokio::test]
async fn test_definition_across_modules() {
    let (_, dispatch) = workspace();
    let request = Request::Definition(TextPosition::new(caller_uri(), 4, 9));
    let (response, _) = dispatch.dispatch(request, SessionState::default()).await;
    let Response::Definition(Some(GotoDefinitionResponse::Scalar(location))) = response else {
        panic!("expected a single location, got {response:?}");
    };
    assert_eq!(location.uri, foo_uri());
    assert_eq!(location.range, Range::new(Position::new(7, 0), Position::new(7, 3)));
}

#[tokio::test]
async fn test_definition_of_macro_and_record() {
    let (_, dispatch) = workspace();

    // `?TIMEOUT`
    let request = Request::Definition(TextPosition::new(foo_uri(), 15, 13));
    let (response, _) = dispatch.dispatch(request, SessionState::default()).await;
    let Response::Definition(Some(GotoDefinitionResponse::Scalar(location))) = response else {
        panic!("expected the define, got {response:?}");
    };
    assert_eq!(location.range.start.line, 3);

    // `#state{}`
    let request = Request::Definition(TextPosition::new(foo_uri(), 12, 10));
    let (response, _) = dispatch.dispatch(request, SessionState::default()).await;
    let Response::Definition(Some(GotoDefinitionResponse::Scalar(location))) = response else {
        panic!("expected the record, got {response:?}");
    };
    assert_eq!(location.range.start.line, 2);
}

#[tokio::test]
async fn test_references_span_documents_in_uri_order() {
    let (_, dispatch) = workspace();
    let request = Request::References {
        position: TextPosition::new(caller_uri(), 4, 9),
        include_declaration: true,
    };
    let (response, _) = dispatch.dispatch(request, SessionState::default()).await;
    let Response::References(Some(locations)) = response else {
        panic!("expected references, got {response:?}");
    };

    // Declaration, the call in caller, then export, fun reference and call in foo.
    assert_eq!(locations.len(), 5);
    assert_eq!(locations[0].uri, foo_uri());
    assert_eq!(locations[0].range.start, Position::new(7, 0));
    assert_eq!(locations[1].uri, caller_uri());
    assert_eq!(locations[1].range.start, Position::new(4, 4));
    let foo_lines: Vec<_> = locations[2..].iter().map(|l| l.range.start.line).collect();
    assert_eq!(foo_lines, vec![1, 14, 16]);

    let request = Request::References {
        position: TextPosition::new(caller_uri(), 4, 9),
        include_declaration: false,
    };
    let (response, _) = dispatch.dispatch(request, SessionState::default()).await;
    let Response::References(Some(locations)) = response else {
        panic!("expected references, got {response:?}");
    };
    assert_eq!(locations.len(), 4);
}

fn labels(response: Response) -> Vec<(String, Option<String>)> {
    let Response::Completion(Some(CompletionResponse::Array(items))) = response else {
        panic!("expected completion items, got {response:?}");
    };
    items.into_iter().map(|item| (item.label, item.detail)).collect()
}

#[tokio::test]
async fn test_completion_after_module_colon_offers_exports() {
    let (_, dispatch) = workspace();
    let request = Request::Completion(TextPosition::new(caller_uri(), 4, 8));
    let (response, _) = dispatch.dispatch(request, SessionState::default()).await;
    assert_eq!(
        labels(response),
        vec![
            ("bar/2".to_string(), Some("bar(X, Y) -> ok.".to_string())),
            ("baz/0".to_string(), None),
        ]
    );
}

#[tokio::test]
async fn test_completion_reads_unparsed_editor_text() {
    let (context, dispatch) = workspace();
    // The editor is mid-edit; the index still holds the last good version.
    let live = "-module(caller).\n-export([run/0]).\n\nrun() ->\n    foo:baz";
    context.set_live_text(&caller_uri(), Arc::from(live));

    let request = Request::Completion(TextPosition::new(caller_uri(), 4, 11));
    let (response, _) = dispatch.dispatch(request, SessionState::default()).await;
    assert_eq!(labels(response), vec![("baz/0".to_string(), None)]);
}

#[tokio::test]
async fn test_document_symbols_for_indexed_module() {
    let (_, dispatch) = workspace();
    let request = Request::DocumentSymbol { uri: foo_uri() };
    let (response, _) = dispatch.dispatch(request, SessionState::default()).await;
    let Response::DocumentSymbol(Some(symbols)) = response else {
        panic!("expected symbols, got {response:?}");
    };
    let json = serde_json::to_value(symbols).unwrap();
    let names: Vec<_> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["state", "TIMEOUT", "bar/2", "baz/0"]);
}

#[tokio::test]
async fn test_runtime_command_without_runtime_is_a_fault_not_a_crash() {
    let (_, dispatch) = workspace();
    let request = Request::ExecuteCommand {
        command: "runtime.status".into(),
        arguments: vec![json!(null)],
    };
    let (response, state) = dispatch.dispatch(request, SessionState::default()).await;
    assert_eq!(response, Response::ExecuteCommand(None));
    assert_eq!(state.fault_count("executeCommand"), 1);
}

/// Panics on line 0, errors on line 1.
struct Faulty;

#[async_trait]
impl Provider for Faulty {
    fn name(&self) -> &'static str {
        "faulty"
    }

    fn kind(&self) -> RequestKind {
        RequestKind::Hover
    }

    async fn handle(&self, request: Request, state: SessionState) -> Result<Handled, ProviderError> {
        let Request::Hover(position) = request else {
            return Err(ProviderError::InvalidRequest("hover only".into()));
        };
        match position.line {
            0 => panic!("hover exploded"),
            1 => Err(ProviderError::Internal("hover broke".into())),
            _ => Ok(Handled::new(Response::Hover(None), state)),
        }
    }
}

#[tokio::test]
async fn test_faulting_provider_is_isolated() {
    let (context, _) = workspace();
    let dispatch = Dispatch::new([
        Arc::new(Faulty) as Arc<dyn Provider>,
        Arc::new(DefinitionProvider::new(context)),
    ]);

    let state = SessionState::default();
    let (response, state) = dispatch
        .dispatch(Request::Hover(TextPosition::new(foo_uri(), 0, 0)), state)
        .await;
    assert_eq!(response, Response::Hover(None));
    let (response, state) = dispatch
        .dispatch(Request::Hover(TextPosition::new(foo_uri(), 1, 0)), state)
        .await;
    assert_eq!(response, Response::Hover(None));
    assert_eq!(state.fault_count("faulty"), 2);

    let (response, state) = dispatch
        .dispatch(Request::Definition(TextPosition::new(caller_uri(), 4, 9)), state)
        .await;
    assert!(matches!(response, Response::Definition(Some(_))));
    assert_eq!(state.fault_count("definition"), 0);

    // Unregistered kinds answer empty.
    let (response, _) = dispatch
        .dispatch(Request::DocumentSymbol { uri: foo_uri() }, state)
        .await;
    assert_eq!(response, Response::DocumentSymbol(None));
}

#[tokio::test]
async fn test_disabled_provider_is_skipped() {
    let (_, dispatch) = workspace();
    let state = SessionState {
        markdown: true,
        disabled: Arc::new(HashSet::from(["hover".to_string()])),
        ..SessionState::default()
    };
    let (response, state) = dispatch
        .dispatch(Request::Hover(TextPosition::new(foo_uri(), 16, 5)), state)
        .await;
    assert_eq!(response, Response::Hover(None));
    assert_eq!(state.fault_count("hover"), 0);
}
