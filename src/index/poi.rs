//! Points of interest: located semantic facts extracted from a document.
//!
//! A POI couples a [`PoiKind`] with a kind-specific [`PoiId`] and the
//! [`PoiRange`] it covers. Ranges use 1-based lines and columns with an
//! inclusive start and an exclusive end. POIs of one document may overlap
//! freely (a call nested inside another call, a clause inside its function).

use std::fmt;
use std::str::FromStr;

/// What a POI describes.
///
/// The set is open: scanners for other dialects can emit [`PoiKind::Other`]
/// with their own name and still participate in lookup and priority ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PoiKind {
    Module,
    Function,
    FunctionClause,
    Application,
    ImplicitFun,
    TypeApplication,
    TypeDefinition,
    ExportEntry,
    Spec,
    MacroUse,
    Define,
    RecordUse,
    RecordDef,
    Other(String),
}

impl PoiKind {
    pub fn as_str(&self) -> &str {
        match self {
            PoiKind::Module => "module",
            PoiKind::Function => "function",
            PoiKind::FunctionClause => "function-clause",
            PoiKind::Application => "application",
            PoiKind::ImplicitFun => "implicit-fun",
            PoiKind::TypeApplication => "type-application",
            PoiKind::TypeDefinition => "type-definition",
            PoiKind::ExportEntry => "export-entry",
            PoiKind::Spec => "spec",
            PoiKind::MacroUse => "macro-use",
            PoiKind::Define => "define",
            PoiKind::RecordUse => "record-use",
            PoiKind::RecordDef => "record-def",
            PoiKind::Other(name) => name,
        }
    }
}

impl fmt::Display for PoiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoiKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_name(s))
    }
}

impl PoiKind {
    /// Unknown names map to [`PoiKind::Other`] so configuration can refer to
    /// kinds this crate does not know about.
    pub fn from_name(name: &str) -> Self {
        match name {
            "module" => PoiKind::Module,
            "function" => PoiKind::Function,
            "function-clause" => PoiKind::FunctionClause,
            "application" => PoiKind::Application,
            "implicit-fun" => PoiKind::ImplicitFun,
            "type-application" => PoiKind::TypeApplication,
            "type-definition" => PoiKind::TypeDefinition,
            "export-entry" => PoiKind::ExportEntry,
            "spec" => PoiKind::Spec,
            "macro-use" => PoiKind::MacroUse,
            "define" => PoiKind::Define,
            "record-use" => PoiKind::RecordUse,
            "record-def" => PoiKind::RecordDef,
            other => PoiKind::Other(other.to_string()),
        }
    }
}

/// Module, function, arity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mfa {
    pub module: String,
    pub function: String,
    pub arity: u32,
}

impl Mfa {
    pub fn new(module: impl Into<String>, function: impl Into<String>, arity: u32) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
            arity,
        }
    }
}

impl fmt::Display for Mfa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.module, self.function, self.arity)
    }
}

/// Kind-specific identity of a POI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PoiId {
    /// Fully qualified reference, e.g. a remote call `lists:map/2`.
    Mfa(Mfa),
    /// Function reference whose module is the enclosing document's module.
    Fa { function: String, arity: u32 },
    /// Named entity: modules, macros, records.
    Name(String),
}

impl PoiId {
    pub fn fa(function: impl Into<String>, arity: u32) -> Self {
        PoiId::Fa {
            function: function.into(),
            arity,
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        PoiId::Name(name.into())
    }

    /// Resolves the id to a full MFA, using `module` for implicit references.
    pub fn to_mfa(&self, module: Option<&str>) -> Option<Mfa> {
        match self {
            PoiId::Mfa(mfa) => Some(mfa.clone()),
            PoiId::Fa { function, arity } => {
                module.map(|module| Mfa::new(module, function.as_str(), *arity))
            }
            PoiId::Name(_) => None,
        }
    }

    /// `(function, arity)` of function-like ids, ignoring any module.
    pub fn function_arity(&self) -> Option<(&str, u32)> {
        match self {
            PoiId::Mfa(mfa) => Some((mfa.function.as_str(), mfa.arity)),
            PoiId::Fa { function, arity } => Some((function.as_str(), *arity)),
            PoiId::Name(_) => None,
        }
    }
}

impl fmt::Display for PoiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoiId::Mfa(mfa) => mfa.fmt(f),
            PoiId::Fa { function, arity } => write!(f, "{function}/{arity}"),
            PoiId::Name(name) => f.write_str(name),
        }
    }
}

/// 1-based line/column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoiPosition {
    pub line: u32,
    pub column: u32,
}

impl PoiPosition {
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// Half-open range `[start, end)`; always `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoiRange {
    start: PoiPosition,
    end: PoiPosition,
}

impl PoiRange {
    /// Builds a range from two positions in either order.
    pub fn new(a: PoiPosition, b: PoiPosition) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    pub fn start(&self) -> PoiPosition {
        self.start
    }

    pub fn end(&self) -> PoiPosition {
        self.end
    }

    pub fn contains(&self, point: PoiPosition) -> bool {
        self.start <= point && point < self.end
    }

    /// Whether `other` lies entirely within `self`.
    pub fn encloses(&self, other: &PoiRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Ordering key for "how much text does this cover".
    ///
    /// Lines spanned first, then the column delta. For two ranges where one
    /// encloses the other, the enclosed one never compares greater.
    pub fn size(&self) -> (u32, i64) {
        (
            self.end.line - self.start.line,
            i64::from(self.end.column) - i64::from(self.start.column),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Poi {
    pub kind: PoiKind,
    pub id: PoiId,
    pub range: PoiRange,
}

impl Poi {
    pub fn new(kind: PoiKind, id: PoiId, range: PoiRange) -> Self {
        Self { kind, id, range }
    }
}

impl fmt::Display for Poi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @ {}:{}-{}:{}",
            self.kind,
            self.id,
            self.range.start.line,
            self.range.start.column,
            self.range.end.line,
            self.range.end.column
        )
    }
}
