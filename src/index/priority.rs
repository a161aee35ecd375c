//! Per-kind tie-break table for POI lookups.
//!
//! When two POIs enclose the cursor with equally sized ranges, the kind with
//! the lower priority value is reported first. Defaults favour the more
//! informative reading of a position (a type application over a plain
//! application, a use site over a definition); callers may override any entry.

use std::collections::HashMap;

use super::poi::PoiKind;

/// Priority assigned to kinds without a default or an override.
pub const UNRANKED: u8 = 100;

#[derive(Debug, Clone, Default)]
pub struct KindPriority {
    overrides: HashMap<PoiKind, u8>,
}

impl KindPriority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_priority(kind: &PoiKind) -> u8 {
        match kind {
            PoiKind::TypeApplication => 10,
            PoiKind::Application => 20,
            PoiKind::ImplicitFun => 25,
            PoiKind::MacroUse => 30,
            PoiKind::RecordUse => 35,
            PoiKind::ExportEntry => 40,
            PoiKind::FunctionClause => 50,
            PoiKind::Spec => 60,
            PoiKind::TypeDefinition => 65,
            PoiKind::Define => 70,
            PoiKind::RecordDef => 75,
            PoiKind::Function => 80,
            PoiKind::Module => 90,
            PoiKind::Other(_) => UNRANKED,
        }
    }

    pub fn priority(&self, kind: &PoiKind) -> u8 {
        self.overrides
            .get(kind)
            .copied()
            .unwrap_or_else(|| Self::default_priority(kind))
    }

    pub fn with_override(mut self, kind: PoiKind, priority: u8) -> Self {
        self.overrides.insert(kind, priority);
        self
    }

    pub fn set(&mut self, kind: PoiKind, priority: u8) {
        self.overrides.insert(kind, priority);
    }

    /// Builds a table from `kind name -> priority` pairs, e.g. configuration.
    pub fn from_names<'a>(entries: impl IntoIterator<Item = (&'a str, u8)>) -> Self {
        let mut table = Self::new();
        for (name, priority) in entries {
            table.set(PoiKind::from_name(name), priority);
        }
        table
    }
}
