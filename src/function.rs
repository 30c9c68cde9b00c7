use serde::{Deserialize, Serialize};

use crate::{cfg::Cfg, VA};

/// A function in the program, uniquely identified by its entry address.
///
/// Functions start as `Discovered` (entry known, nothing decoded) when the
/// entry point is seeded or a direct call destination is first seen, and are
/// transitioned to `Built` exactly once by the driver, which attaches the
/// name, owning module, and reconstructed CFG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Function {
    Discovered {
        entry: VA,
    },
    Built {
        entry:  VA,
        name:   String,
        module: String,
        cfg:    Cfg,
    },
}

impl Function {
    pub fn discovered(entry: VA) -> Function {
        Function::Discovered { entry }
    }

    pub fn entry(&self) -> VA {
        match self {
            Function::Discovered { entry } => *entry,
            Function::Built { entry, .. } => *entry,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Function::Discovered { .. })
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Function::Discovered { .. } => None,
            Function::Built { name, .. } => Some(name),
        }
    }

    pub fn cfg(&self) -> Option<&Cfg> {
        match self {
            Function::Discovered { .. } => None,
            Function::Built { cfg, .. } => Some(cfg),
        }
    }
}
