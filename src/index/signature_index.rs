//! Process-wide, module-keyed tables of function signatures and comments.
//!
//! Entries are keyed by MFA but stored per module as immutable maps. A
//! single-key `put` copies the module's map, changes one entry and swaps it in
//! while holding the shard's write lock, so writes to the same key are
//! linearizable. Re-indexing a module replaces its whole map rather than
//! merging into it.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

type FunctionKey = (String, u32);
type ModuleEntries = Arc<HashMap<FunctionKey, Arc<str>>>;

/// One MFA-keyed table partitioned by module.
#[derive(Debug, Default)]
struct ModuleTable {
    modules: DashMap<String, ModuleEntries>,
}

impl ModuleTable {
    fn put(&self, module: &str, function: &str, arity: u32, text: Arc<str>) {
        let key = (function.to_string(), arity);
        self.modules
            .entry(module.to_string())
            .and_modify(|entries| {
                let mut updated = HashMap::clone(entries);
                updated.insert(key.clone(), Arc::clone(&text));
                *entries = Arc::new(updated);
            })
            .or_insert_with(|| Arc::new(HashMap::from([(key.clone(), Arc::clone(&text))])));
    }

    fn get(&self, module: &str, function: &str, arity: u32) -> Option<Arc<str>> {
        let entries = self.modules.get(module).map(|e| Arc::clone(e.value()))?;
        entries.get(&(function.to_string(), arity)).cloned()
    }

    fn replace(&self, module: &str, entries: HashMap<FunctionKey, Arc<str>>) {
        if entries.is_empty() {
            self.modules.remove(module);
        } else {
            self.modules.insert(module.to_string(), Arc::new(entries));
        }
    }

}

fn into_entries(
    items: impl IntoIterator<Item = (String, u32, String)>,
) -> HashMap<FunctionKey, Arc<str>> {
    items
        .into_iter()
        .map(|(function, arity, text)| ((function, arity), Arc::from(text)))
        .collect()
}

/// Specs (`-spec` text) and doc comments per MFA.
#[derive(Debug, Default)]
pub struct SignatureIndex {
    specs: ModuleTable,
    comments: ModuleTable,
}

impl SignatureIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, module: &str, function: &str, arity: u32, spec: impl Into<Arc<str>>) {
        self.specs.put(module, function, arity, spec.into());
    }

    pub fn get(&self, module: &str, function: &str, arity: u32) -> Option<Arc<str>> {
        self.specs.get(module, function, arity)
    }

    pub fn put_comment(&self, module: &str, function: &str, arity: u32, text: impl Into<Arc<str>>) {
        self.comments.put(module, function, arity, text.into());
    }

    pub fn get_comment(&self, module: &str, function: &str, arity: u32) -> Option<Arc<str>> {
        self.comments.get(module, function, arity)
    }

    /// Supersedes everything known about `module` with a fresh analysis.
    pub fn replace_module<S, C>(&self, module: &str, specs: S, comments: C)
    where
        S: IntoIterator<Item = (String, u32, String)>,
        C: IntoIterator<Item = (String, u32, String)>,
    {
        self.specs.replace(module, into_entries(specs));
        self.comments.replace(module, into_entries(comments));
    }
}
