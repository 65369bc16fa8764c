//! Symbol table and the global `Symbol.for` registry.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::value::SymbolId;

struct SymbolRecord {
    description: Option<Rc<str>>,
    registered: bool,
}

/// Every symbol created in an environment. Symbols are never freed; their
/// identity is the index into this table.
#[derive(Default)]
pub(crate) struct SymbolTable {
    records: Vec<SymbolRecord>,
    registry: FxHashMap<Rc<str>, SymbolId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh, unregistered symbol.
    pub fn create(&mut self, description: Option<&str>) -> SymbolId {
        let id = SymbolId(self.records.len() as u32);
        self.records.push(SymbolRecord {
            description: description.map(Rc::from),
            registered: false,
        });
        id
    }

    /// The registered symbol for `key`, creating it on first use.
    pub fn for_key(&mut self, key: &str) -> SymbolId {
        if let Some(id) = self.registry.get(key) {
            return *id;
        }
        let key: Rc<str> = Rc::from(key);
        let id = SymbolId(self.records.len() as u32);
        self.records.push(SymbolRecord {
            description: Some(key.clone()),
            registered: true,
        });
        self.registry.insert(key, id);
        id
    }

    /// Registry key of a registered symbol.
    pub fn key_for(&self, id: SymbolId) -> Option<Rc<str>> {
        self.records
            .get(id.0 as usize)
            .filter(|record| record.registered)
            .and_then(|record| record.description.clone())
    }

    pub fn description(&self, id: SymbolId) -> Option<Rc<str>> {
        self.records
            .get(id.0 as usize)
            .and_then(|record| record.description.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}
