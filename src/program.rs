use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    aspace::AddressSpace,
    callgraph::CallGraph,
    function::Function,
    loader::Image,
    symtab::SymbolTable,
    VA,
};

/// The span of a loaded binary within the address space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub base: VA,
    pub size: u32,
    pub name: String,
}

/// The complete program model: the loaded image, the functions recovered
/// from it keyed by entry address, and the call graph between them.
///
/// The functions map is the authoritative registry; instructions and the
/// call graph refer to functions by entry address and resolve through it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub entry:         VA,
    pub modules:       Vec<Module>,
    pub address_space: AddressSpace,
    pub symbols:       SymbolTable,
    pub functions:     BTreeMap<VA, Function>,
    pub call_graph:    CallGraph,
}

impl Program {
    /// Wrap a loaded image, seeding the function registry with a pending
    /// function at the entry point.
    pub fn new(image: Image, name: &str) -> Program {
        let mut functions = BTreeMap::new();
        functions.insert(image.entry, Function::discovered(image.entry));

        let modules = image
            .address_space
            .bounds()
            .map(|(base, end)| Module {
                base,
                size: (end - base as u64) as u32,
                name: name.to_string(),
            })
            .into_iter()
            .collect();

        Program {
            entry: image.entry,
            modules,
            address_space: image.address_space,
            symbols: image.symbols,
            functions,
            call_graph: CallGraph::default(),
        }
    }

    pub fn module_name(&self) -> &str {
        self.modules.first().map(|module| module.name.as_str()).unwrap_or("")
    }
}
