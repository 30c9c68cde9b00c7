pub mod dot;
pub mod json;
pub mod snapshot;
pub mod vcg;

use crate::{cfg::BasicBlock, insn::Category, VA};

/// Label for the CFG edge from `block` to `target`: the branch direction
/// for conditional branches, "taken" for unconditional branches, "fall"
/// otherwise (sequential flow and call fall-throughs).
pub(crate) fn edge_kind(block: &BasicBlock, target: VA) -> &'static str {
    match block.last() {
        Some(last) if last.category == Category::ConditionalBranch => {
            if last.next == Some(target) {
                "taken"
            } else {
                "not-taken"
            }
        }
        Some(last) if last.category == Category::UnconditionalBranch => "taken",
        _ => "fall",
    }
}
