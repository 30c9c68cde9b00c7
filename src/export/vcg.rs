use std::{fs, path::Path};

use anyhow::Result;

use crate::{cfg::Cfg, function::Function, program::Program};

use super::edge_kind;

fn escape(s: &str) -> String {
    s.replace('"', "'")
}

/// Render one function's CFG in VCG (Visualization of Compiler Graphs)
/// syntax; same structure as the DOT form.
pub fn render_cfg(name: &str, cfg: &Cfg) -> String {
    let mut out = String::new();
    out.push_str("graph: {\n");
    out.push_str(&format!("  title: \"{}\"\n", escape(name)));
    out.push_str("  layoutalgorithm: dfs\n");

    for block in cfg.blocks.values() {
        let mut label = String::new();
        for insn in &block.instructions {
            label.push_str(&format!("{:#010x}  {}\\n", insn.addr, escape(&insn.disasm)));
        }
        if block.malformed {
            label.push_str("(malformed)\\n");
        }
        out.push_str(&format!(
            "  node: {{ title: \"{:#010x}\" label: \"{}\" }}\n",
            block.address, label
        ));
    }

    for block in cfg.blocks.values() {
        for &succ in &block.successors {
            out.push_str(&format!(
                "  edge: {{ sourcename: \"{:#010x}\" targetname: \"{:#010x}\" label: \"{}\" }}\n",
                block.address,
                succ,
                edge_kind(block, succ)
            ));
        }
    }

    out.push_str("}\n");
    out
}

/// Render the call graph in VCG syntax with multiplicity-labeled edges.
pub fn render_call_graph(program: &Program) -> String {
    let mut out = String::new();
    out.push_str("graph: {\n");
    out.push_str("  title: \"callgraph\"\n");
    out.push_str("  layoutalgorithm: dfs\n");

    for function in program.functions.values() {
        if let Function::Built { entry, name, .. } = function {
            out.push_str(&format!(
                "  node: {{ title: \"{:#010x}\" label: \"{}\\n{:#010x}\" }}\n",
                entry,
                escape(name),
                entry
            ));
        }
    }

    for ((caller, callee), count) in program.call_graph.multiplicities() {
        out.push_str(&format!(
            "  edge: {{ sourcename: \"{:#010x}\" targetname: \"{:#010x}\" label: \"{}\" }}\n",
            caller, callee, count
        ));
    }

    out.push_str("}\n");
    out
}

/// Write `<entry:08x>.vcg` per function (unless suppressed) plus
/// `callgraph.vcg` into `dir`.
pub fn write_dir(dir: &Path, program: &Program, per_function: bool) -> Result<()> {
    if per_function {
        for function in program.functions.values() {
            if let Function::Built { entry, name, cfg, .. } = function {
                fs::write(dir.join(format!("{:08x}.vcg", entry)), render_cfg(name, cfg))?;
            }
        }
    }

    fs::write(dir.join("callgraph.vcg"), render_call_graph(program))?;
    Ok(())
}
