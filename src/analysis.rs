use anyhow::Result;
use log::debug;

use crate::{cfg::Cfg, dis::Disassembler, function::Function, program::Program, VA};

/// Drive CFG reconstruction to a fixpoint over the set of known functions.
///
/// Each pass snapshots the pending functions in ascending entry order,
/// builds each one's CFG against the shared registry (which may discover
/// further pending functions), then records one call-graph edge per call
/// site found in the functions built this pass. The loop ends when a pass
/// starts with nothing pending: no further decoding can discover new
/// functions.
pub fn analyze(program: &mut Program) -> Result<()> {
    let dis = Disassembler::new()?;

    loop {
        let worklist: Vec<VA> = program
            .functions
            .values()
            .filter(|f| f.is_pending())
            .map(|f| f.entry())
            .collect();

        if worklist.is_empty() {
            break;
        }

        for &entry in &worklist {
            let name = program.symbols.name_of(entry).to_string();
            debug!("analysis: processing function {:#010x} {}", entry, name);

            let mut cfg = Cfg::new(entry);
            cfg.augment(&program.address_space, &dis, &mut program.functions)?;

            let module = program.module_name().to_string();
            program.functions.insert(
                entry,
                Function::Built {
                    entry,
                    name,
                    module,
                    cfg,
                },
            );
        }

        // scan only the functions built this pass: each caller is scanned
        // exactly once, so each call site contributes exactly one edge, and
        // back-edges onto functions built in earlier passes are kept.
        let mut calls: Vec<(VA, VA)> = Vec::new();
        for &caller in &worklist {
            if let Some(cfg) = program.functions.get(&caller).and_then(Function::cfg) {
                for block in cfg.blocks.values() {
                    for insn in &block.instructions {
                        for &callee in &insn.call_targets {
                            calls.push((caller, callee));
                        }
                    }
                }
            }
        }
        for (caller, callee) in calls {
            program.call_graph.add_call(caller, callee);
        }

        debug!("analysis: pass complete, {} functions known", program.functions.len());
    }

    Ok(())
}
