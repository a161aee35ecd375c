//! Source-to-POI parsing.
//!
//! The indexes only depend on [`PoiParser`]; [`erlang::ErlangScanner`] is the
//! built-in implementation.

pub mod erlang;

use thiserror::Error;

use crate::index::poi::Poi;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{line}:{column}: {message}")]
pub struct ParseError {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl ParseError {
    pub fn new(line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

/// A fact attached to a local function, e.g. its spec or doc comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionFact {
    pub function: String,
    pub arity: u32,
    pub text: String,
}

impl FunctionFact {
    pub fn new(function: impl Into<String>, arity: u32, text: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            arity,
            text: text.into(),
        }
    }
}

/// Everything one parse of a document yields.
#[derive(Debug, Clone, Default)]
pub struct ParsedSource {
    pub module: Option<String>,
    pub pois: Vec<Poi>,
    pub specs: Vec<FunctionFact>,
    pub comments: Vec<FunctionFact>,
}

pub trait PoiParser: Send + Sync {
    fn parse(&self, text: &str) -> Result<ParsedSource, ParseError>;
}
