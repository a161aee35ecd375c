//! Conversions between LSP coordinates and POIs, and lookups shared by
//! several providers.
//!
//! LSP positions are 0-based with UTF-16 columns; POI positions are
//! 1-based with char columns.

use tower_lsp::lsp_types::{Location, Position, Range};

use crate::index::{Document, Mfa, Poi, PoiId, PoiKind, PoiPosition, PoiRange};
use crate::lsp::document::{chars_to_utf16, nth_line};

/// A POI position in `text` as a zero-based, UTF-16 LSP position.
pub fn to_lsp_position(text: &str, position: PoiPosition) -> Position {
    let line = position.line.saturating_sub(1);
    let column = chars_to_utf16(nth_line(text, line), position.column.saturating_sub(1));
    Position::new(line, column)
}

pub fn to_lsp_range(text: &str, range: &PoiRange) -> Range {
    Range::new(
        to_lsp_position(text, range.start()),
        to_lsp_position(text, range.end()),
    )
}

pub fn location(document: &Document, poi: &Poi) -> Location {
    Location::new(document.uri.clone(), to_lsp_range(&document.text, &poi.range))
}

/// POI kinds whose id names a function.
pub fn is_function_reference(kind: &PoiKind) -> bool {
    matches!(
        kind,
        PoiKind::Application
            | PoiKind::ImplicitFun
            | PoiKind::ExportEntry
            | PoiKind::Function
            | PoiKind::FunctionClause
            | PoiKind::Spec
    )
}

/// The MFA a located POI refers to, resolving local references against the
/// document's module.
pub fn function_target(document: &Document, poi: &Poi) -> Option<Mfa> {
    if !is_function_reference(&poi.kind) {
        return None;
    }
    poi.id.to_mfa(document.module())
}

/// The first function-valued POI in a most-specific-first hit list.
pub fn first_function_target(document: &Document, hits: &[Poi]) -> Option<(Poi, Mfa)> {
    hits.iter()
        .find_map(|poi| function_target(document, poi).map(|mfa| (poi.clone(), mfa)))
}

/// Where `function/arity` is defined in `document`: its first clause head,
/// or the whole function form when no clause head was recorded.
pub fn function_definition<'a>(document: &'a Document, function: &str, arity: u32) -> Option<&'a Poi> {
    let id = PoiId::fa(function, arity);
    document
        .pois_of_kind(&PoiKind::FunctionClause)
        .find(|poi| poi.id == id)
        .or_else(|| document.pois_of_kind(&PoiKind::Function).find(|poi| poi.id == id))
}

/// First POI of `kind` named `name` in `document`.
pub fn named_definition<'a>(document: &'a Document, kind: &PoiKind, name: &str) -> Option<&'a Poi> {
    document
        .pois
        .iter()
        .find(|poi| &poi.kind == kind && matches!(&poi.id, PoiId::Name(n) if n == name))
}
