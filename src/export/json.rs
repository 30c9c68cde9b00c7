use std::{fs, path::Path};

use anyhow::Result;
use serde::Serialize;

use crate::{function::Function, program::Program, VA};

#[derive(Serialize)]
struct FunctionDoc {
    address: String,
    name:    String,
    module:  String,
    blocks:  Vec<BlockDoc>,
}

#[derive(Serialize)]
struct BlockDoc {
    address:      String,
    instructions: Vec<InstructionDoc>,
    successors:   Vec<String>,
}

#[derive(Serialize)]
struct InstructionDoc {
    address:  String,
    bytes:    String,
    disasm:   String,
    category: String,
}

fn hex(va: VA) -> String {
    format!("{:#010x}", va)
}

/// Render the whole program as one pretty-printed JSON document: an array
/// of functions, each with its blocks, instructions, and successor lists.
pub fn render(program: &Program) -> Result<String> {
    let mut functions = Vec::new();

    for function in program.functions.values() {
        if let Function::Built {
            entry,
            name,
            module,
            cfg,
        } = function
        {
            let blocks = cfg
                .blocks
                .values()
                .map(|block| BlockDoc {
                    address:      hex(block.address),
                    instructions: block
                        .instructions
                        .iter()
                        .map(|insn| InstructionDoc {
                            address:  hex(insn.addr),
                            bytes:    hex::encode(&insn.bytes),
                            disasm:   insn.disasm.clone(),
                            category: insn.category.as_str().to_string(),
                        })
                        .collect(),
                    successors:   block.successors.iter().copied().map(hex).collect(),
                })
                .collect();

            functions.push(FunctionDoc {
                address: hex(*entry),
                name: name.clone(),
                module: module.clone(),
                blocks,
            });
        }
    }

    Ok(serde_json::to_string_pretty(&functions)?)
}

/// Write the aggregate `cfg.json` into `dir`.
pub fn write_dir(dir: &Path, program: &Program) -> Result<()> {
    fs::write(dir.join("cfg.json"), render(program)?)?;
    Ok(())
}
