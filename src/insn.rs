use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::VA;

/// Control-flow class of a decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Sequential,
    ConditionalBranch,
    UnconditionalBranch,
    Call,
    Return,
    Indirect,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Sequential => "sequential",
            Category::ConditionalBranch => "conditional_branch",
            Category::UnconditionalBranch => "unconditional_branch",
            Category::Call => "call",
            Category::Return => "return",
            Category::Indirect => "indirect",
            Category::Other => "other",
        }
    }
}

/// An immutable decoded instruction.
///
/// `next` is the primary successor: the following address for sequential
/// instructions and calls, the target for unconditional branches, the taken
/// target for conditional branches. `alt` is the not-taken address and is
/// present only for conditional branches. Returns and indirect transfers
/// have neither.
///
/// `call_targets` holds function entry addresses, resolved through the
/// program's function registry. It is populated only for direct calls whose
/// destination lies in loaded executable space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub addr:         VA,
    pub length:       u8,
    pub bytes:        Vec<u8>,
    pub disasm:       String,
    pub category:     Category,
    pub next:         Option<VA>,
    pub alt:          Option<VA>,
    pub call_targets: SmallVec<[VA; 1]>,
}

impl Instruction {
    /// One past the last byte of this instruction.
    pub fn end(&self) -> u64 {
        self.addr as u64 + self.length as u64
    }
}
