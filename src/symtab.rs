use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::VA;

/// Name used for addresses with no symbol.
pub const ANON: &str = "anon";

/// Bidirectional address<->name map built from the ELF symbol table.
///
/// Multiple symbols may share one address; the last one written wins for
/// name lookup. Distinct names are assumed to map to distinct addresses
/// within a single binary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolTable {
    by_addr: BTreeMap<VA, String>,
    by_name: BTreeMap<String, VA>,
}

impl SymbolTable {
    pub fn insert(&mut self, va: VA, name: &str) {
        if name.is_empty() {
            return;
        }
        self.by_addr.insert(va, name.to_string());
        self.by_name.insert(name.to_string(), va);
    }

    pub fn name_of(&self, va: VA) -> &str {
        self.by_addr.get(&va).map(String::as_str).unwrap_or(ANON)
    }

    pub fn addr_of(&self, name: &str) -> Option<VA> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }
}
