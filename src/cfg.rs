use std::collections::{BTreeMap, BTreeSet, VecDeque};

use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    aspace::AddressSpace,
    dis::Disassembler,
    function::Function,
    insn::{Category, Instruction},
    VA,
};

/// A maximal straight-line instruction sequence.
///
/// Only the last instruction may transfer control elsewhere; control enters
/// only at `address`. Predecessors and successors are the entry addresses of
/// other blocks in the same CFG, resolved through the owning `Cfg`.
/// `malformed` records a decode failure truncating the block, or an
/// undefined split point landing inside one of its instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub address:      VA,
    pub instructions: Vec<Instruction>,
    pub predecessors: BTreeSet<VA>,
    pub successors:   BTreeSet<VA>,
    pub malformed:    bool,
}

impl BasicBlock {
    /// One past the last instruction byte. Instructions are contiguous, so
    /// the block ends where its last instruction does.
    pub fn end(&self) -> u64 {
        self.instructions
            .last()
            .map(Instruction::end)
            .unwrap_or(self.address as u64)
    }

    pub fn contains(&self, va: VA) -> bool {
        va >= self.address && (va as u64) < self.end()
    }

    pub fn last(&self) -> Option<&Instruction> {
        self.instructions.last()
    }
}

/// Per-function control flow graph: basic blocks keyed by entry address.
///
/// Exactly one block starts at the function entry; blocks partition the
/// instruction addresses reachable within the function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cfg {
    pub entry:  VA,
    pub blocks: BTreeMap<VA, BasicBlock>,
}

impl Cfg {
    pub fn new(entry: VA) -> Cfg {
        Cfg {
            entry,
            blocks: BTreeMap::new(),
        }
    }

    /// Extend this CFG by decoding from every not-yet-covered reachable
    /// address, splitting existing blocks where control lands inside them.
    ///
    /// Direct call destinations inside loaded executable space are
    /// registered in `functions` as pending functions; destinations outside
    /// it are dropped. Running `augment` again over a completed CFG is a
    /// no-op.
    pub fn augment(
        &mut self,
        aspace: &AddressSpace,
        dis: &Disassembler,
        functions: &mut BTreeMap<VA, Function>,
    ) -> Result<()> {
        let mut queue: VecDeque<VA> = VecDeque::new();
        queue.push_back(self.entry);
        queue.extend(self.blocks.keys().copied());

        while let Some(va) = queue.pop_front() {
            if self.blocks.contains_key(&va) {
                continue;
            }

            if let Some(entry) = self.containing_block(va) {
                self.split(entry, va);
                continue;
            }

            self.explore(va, aspace, dis, functions, &mut queue);
        }

        self.rebuild_predecessors();

        debug!("cfg: {:#010x}: {} basic blocks", self.entry, self.blocks.len());
        Ok(())
    }

    /// Entry of the block whose instruction range covers `va`, when `va` is
    /// not itself a block entry.
    fn containing_block(&self, va: VA) -> Option<VA> {
        match self.blocks.range(..=va).next_back() {
            Some((&entry, block)) if entry != va && block.contains(va) => Some(entry),
            _ => None,
        }
    }

    /// Split the block at `entry` so that `at` becomes a block entry: the
    /// trailing instructions move into a new block, the head keeps a single
    /// fall-through edge onto it.
    ///
    /// `at` must be an instruction boundary; if it is not, the block is
    /// flagged malformed and left intact.
    fn split(&mut self, entry: VA, at: VA) -> bool {
        let block = match self.blocks.get_mut(&entry) {
            Some(block) => block,
            None => return false,
        };

        let index = match block.instructions.iter().position(|insn| insn.addr == at) {
            Some(index) => index,
            None => {
                block.malformed = true;
                return false;
            }
        };

        let tail = block.instructions.split_off(index);
        let successors = std::mem::take(&mut block.successors);
        // a truncated decode, if any, now ends the new block
        let malformed = std::mem::replace(&mut block.malformed, false);
        block.successors.insert(at);

        self.blocks.insert(
            at,
            BasicBlock {
                address: at,
                instructions: tail,
                predecessors: BTreeSet::new(),
                successors,
                malformed,
            },
        );

        true
    }

    /// Decode a new block starting at `start`, stopping at the first control
    /// transfer or on running into an existing block.
    fn explore(
        &mut self,
        start: VA,
        aspace: &AddressSpace,
        dis: &Disassembler,
        functions: &mut BTreeMap<VA, Function>,
        queue: &mut VecDeque<VA>,
    ) {
        let mut instructions: Vec<Instruction> = Vec::new();
        let mut successors: BTreeSet<VA> = BTreeSet::new();
        let mut malformed = false;
        let mut call_target: Option<VA> = None;
        let mut va = start;

        loop {
            let insn = match dis.decode_at(aspace, va) {
                Ok(insn) => insn,
                Err(_) => {
                    // truncate here; whatever was accumulated still forms a block
                    malformed = true;
                    break;
                }
            };

            match insn.category {
                Category::Return | Category::Indirect | Category::Other => {
                    instructions.push(insn);
                    break;
                }

                Category::UnconditionalBranch => {
                    if let Some(target) = insn.next {
                        successors.insert(target);
                    }
                    instructions.push(insn);
                    break;
                }

                Category::ConditionalBranch => {
                    if let Some(taken) = insn.next {
                        successors.insert(taken);
                    }
                    if let Some(not_taken) = insn.alt {
                        successors.insert(not_taken);
                    }
                    instructions.push(insn);
                    break;
                }

                Category::Call => {
                    // the CFG successor is the fall-through, not the callee
                    if let Some(fallthrough) = insn.next {
                        successors.insert(fallthrough);
                    }
                    call_target = insn.call_targets.first().copied();
                    instructions.push(insn);
                    break;
                }

                Category::Sequential => {
                    let next = insn.next;
                    instructions.push(insn);

                    match next {
                        // fell out of loaded executable space
                        None => break,
                        Some(next) => {
                            if self.blocks.contains_key(&next) {
                                successors.insert(next);
                                break;
                            }
                            if let Some(entry) = self.containing_block(next) {
                                self.split(entry, next);
                                successors.insert(next);
                                break;
                            }
                            va = next;
                        }
                    }
                }
            }
        }

        debug!(
            "cfg: {:#010x}: block at {:#010x}, {} instructions",
            self.entry,
            start,
            instructions.len()
        );

        for &succ in &successors {
            queue.push_back(succ);
        }

        self.blocks.insert(
            start,
            BasicBlock {
                address: start,
                instructions,
                predecessors: BTreeSet::new(),
                successors,
                malformed,
            },
        );

        if let Some(target) = call_target {
            self.resolve_call_target(start, target, aspace, functions);
        }
    }

    /// Resolve the direct call destination recorded on the block's final
    /// instruction: destinations outside loaded executable space are
    /// dropped; otherwise the destination becomes (or remains) a known
    /// function, splitting our own block if the destination lands inside
    /// one.
    fn resolve_call_target(
        &mut self,
        block_entry: VA,
        target: VA,
        aspace: &AddressSpace,
        functions: &mut BTreeMap<VA, Function>,
    ) {
        if !aspace.is_executable(target) {
            if let Some(block) = self.blocks.get_mut(&block_entry) {
                if let Some(last) = block.instructions.last_mut() {
                    last.call_targets.clear();
                }
            }
            return;
        }

        if !self.blocks.contains_key(&target) {
            if let Some(entry) = self.containing_block(target) {
                self.split(entry, target);
            }
        }

        functions.entry(target).or_insert_with(|| Function::discovered(target));
    }

    /// Recompute every block's predecessor set as the inverse of the
    /// successor sets. Successor addresses with no corresponding block
    /// (undefined split points) contribute nothing; the sanity check
    /// reports them.
    fn rebuild_predecessors(&mut self) {
        let mut predecessors: BTreeMap<VA, BTreeSet<VA>> = BTreeMap::new();

        for block in self.blocks.values() {
            for &succ in &block.successors {
                predecessors.entry(succ).or_default().insert(block.address);
            }
        }

        for block in self.blocks.values_mut() {
            block.predecessors = predecessors.remove(&block.address).unwrap_or_default();
        }
    }

    /// Check structural invariants, returning a description of each
    /// violation found. Never mutates; the output is advisory.
    pub fn sanity_check(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if !self.blocks.is_empty() && !self.blocks.contains_key(&self.entry) {
            violations.push(format!("no block at function entry {:#010x}", self.entry));
        }

        // blocks must not overlap in their instruction ranges
        let mut prev: Option<&BasicBlock> = None;
        for block in self.blocks.values() {
            if let Some(prev) = prev {
                if prev.end() > block.address as u64 {
                    violations.push(format!(
                        "blocks {:#010x} and {:#010x} overlap",
                        prev.address, block.address
                    ));
                }
            }
            prev = Some(block);
        }

        for block in self.blocks.values() {
            for &succ in &block.successors {
                match self.blocks.get(&succ) {
                    None => violations.push(format!(
                        "block {:#010x} has missing successor {:#010x}",
                        block.address, succ
                    )),
                    Some(target) => {
                        if !target.predecessors.contains(&block.address) {
                            violations.push(format!(
                                "block {:#010x} is not a predecessor of its successor {:#010x}",
                                block.address, succ
                            ));
                        }
                    }
                }
            }

            for &pred in &block.predecessors {
                let inverse = self
                    .blocks
                    .get(&pred)
                    .map(|p| p.successors.contains(&block.address))
                    .unwrap_or(false);
                if !inverse {
                    violations.push(format!(
                        "block {:#010x} has predecessor {:#010x} without the matching edge",
                        block.address, pred
                    ));
                }
            }

            if block.malformed {
                violations.push(format!("block {:#010x} is malformed", block.address));
            }
        }

        // every non-entry block must be reachable from the entry block
        let mut seen: BTreeSet<VA> = BTreeSet::new();
        let mut stack = vec![self.entry];
        while let Some(va) = stack.pop() {
            if !seen.insert(va) {
                continue;
            }
            if let Some(block) = self.blocks.get(&va) {
                stack.extend(block.successors.iter().copied());
            }
        }
        for &addr in self.blocks.keys() {
            if !seen.contains(&addr) {
                violations.push(format!("block {:#010x} is unreachable from the entry", addr));
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::*;

    fn augment(code: &[u8]) -> (Cfg, BTreeMap<VA, Function>) {
        let aspace = load_shellcode32(code);
        let dis = Disassembler::new().unwrap();
        let mut functions = BTreeMap::new();
        functions.insert(SHELLCODE_BASE, Function::discovered(SHELLCODE_BASE));

        let mut cfg = Cfg::new(SHELLCODE_BASE);
        cfg.augment(&aspace, &dis, &mut functions).unwrap();
        (cfg, functions)
    }

    #[test]
    fn test_straight_line() {
        // 55     push ebp
        // 89 E5  mov ebp, esp
        // C3     ret
        let (cfg, _) = augment(b"\x55\x89\xE5\xC3");

        assert_eq!(cfg.blocks.len(), 1);
        let block = &cfg.blocks[&SHELLCODE_BASE];
        assert_eq!(block.instructions.len(), 3);
        assert!(block.successors.is_empty());
        assert!(block.predecessors.is_empty());
        assert!(cfg.sanity_check().is_empty());
    }

    #[test]
    fn test_conditional_diamond() {
        // 1000: 83 F8 00  cmp eax, 0
        // 1003: 75 01     jnz 0x1006
        // 1005: C3        ret
        // 1006: C3        ret
        let (cfg, _) = augment(b"\x83\xF8\x00\x75\x01\xC3\xC3");

        assert_eq!(cfg.blocks.len(), 3);

        let head = &cfg.blocks[&0x1000];
        assert_eq!(head.instructions.len(), 2);
        assert_eq!(
            head.successors.iter().copied().collect::<Vec<_>>(),
            vec![0x1005, 0x1006]
        );

        assert!(cfg.blocks[&0x1005].successors.is_empty());
        assert!(cfg.blocks[&0x1006].successors.is_empty());
        assert_eq!(
            cfg.blocks[&0x1005].predecessors.iter().copied().collect::<Vec<_>>(),
            vec![0x1000]
        );
        assert!(cfg.sanity_check().is_empty());
    }

    #[test]
    fn test_self_loop() {
        // EB FE  jmp $
        let (cfg, _) = augment(b"\xEB\xFE");

        assert_eq!(cfg.blocks.len(), 1);
        let block = &cfg.blocks[&SHELLCODE_BASE];
        assert_eq!(block.successors.iter().copied().collect::<Vec<_>>(), vec![0x1000]);
        assert_eq!(block.predecessors.iter().copied().collect::<Vec<_>>(), vec![0x1000]);
        assert!(cfg.sanity_check().is_empty());
    }

    #[test]
    fn test_backward_branch_splits() {
        // 1000: 90     nop
        // 1001: 90     nop
        // 1002: 75 FD  jnz 0x1001
        // 1004: C3     ret
        let (cfg, _) = augment(b"\x90\x90\x75\xFD\xC3");

        assert_eq!(cfg.blocks.len(), 3);

        let head = &cfg.blocks[&0x1000];
        assert_eq!(head.instructions.len(), 1);
        assert_eq!(head.successors.iter().copied().collect::<Vec<_>>(), vec![0x1001]);

        let body = &cfg.blocks[&0x1001];
        assert_eq!(body.instructions.len(), 2);
        assert_eq!(
            body.successors.iter().copied().collect::<Vec<_>>(),
            vec![0x1001, 0x1004]
        );
        assert_eq!(
            body.predecessors.iter().copied().collect::<Vec<_>>(),
            vec![0x1000, 0x1001]
        );

        assert!(cfg.sanity_check().is_empty());
    }

    #[test]
    fn test_call_splits_at_fallthrough() {
        // 1000: E8 03 00 00 00  call 0x1008
        // 1005: C3              ret
        // 1006: 90 90           (padding)
        // 1008: C3              ret
        let (cfg, functions) = augment(b"\xE8\x03\x00\x00\x00\xC3\x90\x90\xC3");

        assert_eq!(cfg.blocks.len(), 2);

        let head = &cfg.blocks[&0x1000];
        assert_eq!(head.successors.iter().copied().collect::<Vec<_>>(), vec![0x1005]);
        assert_eq!(head.last().unwrap().call_targets.as_slice(), &[0x1008]);

        // the callee became a pending function, not a block of this cfg
        assert!(!cfg.blocks.contains_key(&0x1008));
        assert!(functions[&0x1008].is_pending());
        assert!(cfg.sanity_check().is_empty());
    }

    #[test]
    fn test_out_of_range_call_dropped() {
        // 1000: E8 FB 0F 00 00  call 0x2000 (unmapped)
        // 1005: C3              ret
        let (cfg, functions) = augment(b"\xE8\xFB\x0F\x00\x00\xC3");

        let head = &cfg.blocks[&0x1000];
        assert!(head.last().unwrap().call_targets.is_empty());
        assert!(!functions.contains_key(&0x2000));
        assert_eq!(functions.len(), 1);
    }

    #[test]
    fn test_call_target_inside_own_block_promotes() {
        // 1000: 90              nop
        // 1001: E8 FB FF FF FF  call 0x1001 (this very instruction)
        // 1006: C3              ret
        let (cfg, functions) = augment(b"\x90\xE8\xFB\xFF\xFF\xFF\xC3");

        // the destination was promoted to a block entry and a function
        assert_eq!(cfg.blocks.len(), 3);
        assert_eq!(
            cfg.blocks[&0x1000].successors.iter().copied().collect::<Vec<_>>(),
            vec![0x1001]
        );
        assert_eq!(cfg.blocks[&0x1001].instructions.len(), 1);
        assert!(functions[&0x1001].is_pending());
        assert!(cfg.sanity_check().is_empty());
    }

    #[test]
    fn test_decode_failure_marks_malformed() {
        // a lone operand-size prefix cannot decode
        let (cfg, _) = augment(b"\x66");

        let block = &cfg.blocks[&SHELLCODE_BASE];
        assert!(block.malformed);
        assert!(block.instructions.is_empty());
        assert!(cfg
            .sanity_check()
            .iter()
            .any(|violation| violation.contains("malformed")));
    }

    #[test]
    fn test_augment_is_idempotent() {
        let aspace = load_shellcode32(b"\x83\xF8\x00\x75\x01\xC3\xC3");
        let dis = Disassembler::new().unwrap();
        let mut functions = BTreeMap::new();

        let mut cfg = Cfg::new(SHELLCODE_BASE);
        cfg.augment(&aspace, &dis, &mut functions).unwrap();

        let first = cfg.clone();
        cfg.augment(&aspace, &dis, &mut functions).unwrap();
        assert_eq!(cfg, first);
    }
}
