//! LSP features answered from the indexes and the attached runtime
//!
//! # Layers
//!
//! ## 1. Contracts (`traits.rs`)
//! - `Provider` - one feature, registered for one `RequestKind`
//! - `Request` / `Response` - transport-independent request and answer
//! - `SessionState` - per-session flags providers read and update
//!
//! ## 2. Routing (`dispatch.rs`)
//! `Dispatch` maps each request kind to its provider and is the fault
//! boundary: provider errors and panics become empty responses.
//!
//! ## 3. Providers
//! - `hover.rs` - documentation through an ordered chain of `DocStage`s
//! - `goto_definition.rs` - functions, macros, records, types, modules
//! - `references.rs` - call sites, implicit funs and export entries
//! - `document_symbols.rs` - functions, records, macros and types
//! - `completion.rs` - remote exports and local names
//! - `commands.rs` - `runtime.connect` and `runtime.status`
//!
//! Providers share a `ServerContext` (`context.rs`) and the coordinate
//! helpers in `poi_finder.rs`.

pub mod commands;
pub mod completion;
pub mod context;
pub mod dispatch;
pub mod document_symbols;
pub mod goto_definition;
pub mod hover;
pub mod poi_finder;
pub mod references;
pub mod traits;

pub use context::{ContextSettings, ServerContext};
pub use dispatch::Dispatch;
pub use hover::{DocLookup, DocStage, HoverProvider, LocalDocsStage, RemoteDocsStage};
pub use traits::{
    Handled, Provider, ProviderError, Request, RequestKind, Response, SessionState, TextPosition,
};
