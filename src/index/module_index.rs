//! Module name to defining document.

use dashmap::DashMap;
use tower_lsp::lsp_types::Url;

#[derive(Debug, Default)]
pub struct ModuleIndex {
    modules: DashMap<String, Url>,
}

impl ModuleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `uri` as the home of `module`; the latest writer wins.
    pub fn insert(&self, module: &str, uri: &Url) {
        self.modules.insert(module.to_string(), uri.clone());
    }

    pub fn get(&self, module: &str) -> Option<Url> {
        self.modules.get(module).map(|entry| entry.value().clone())
    }

    /// Forgets modules that pointed at `uri`, returning their names.
    pub fn remove_uri(&self, uri: &Url) -> Vec<String> {
        let stale: Vec<String> = self
            .modules
            .iter()
            .filter(|entry| entry.value() == uri)
            .map(|entry| entry.key().clone())
            .collect();
        for module in &stale {
            self.modules.remove_if(module, |_, value| value == uri);
        }
        stale
    }

    pub fn modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
