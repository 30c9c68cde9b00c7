use anyhow::Result;
use smallvec::{smallvec, SmallVec};
use thiserror::Error;

use crate::{
    aspace::AddressSpace,
    insn::{Category, Instruction},
    VA,
};

#[derive(Debug, Error)]
pub enum DisassemblyError {
    #[error("invalid instruction at {0:#010x}")]
    InvalidInstruction(VA),
}

/// Longest fetch window needed to decode one instruction.
pub const MAX_INSN_LEN: usize = 16;

/// Decoder for 32-bit x86, plus an Intel-style formatter for rendering
/// disassembly text. Consulted once per instruction address; the result is
/// cached in the returned `Instruction`.
pub struct Disassembler {
    decoder:   zydis::Decoder,
    formatter: zydis::Formatter,
}

impl Disassembler {
    pub fn new() -> Result<Disassembler> {
        let decoder = zydis::Decoder::new(zydis::MachineMode::LEGACY_32, zydis::AddressWidth::_32)?;
        let formatter = zydis::Formatter::new(zydis::FormatterStyle::INTEL)?;

        Ok(Disassembler { decoder, formatter })
    }

    /// Decode the instruction at `va`, classifying its control flow.
    ///
    /// Successor addresses that fall outside loaded executable space are
    /// dropped; running off the end of a section is a decode failure.
    pub fn decode_at(&self, aspace: &AddressSpace, va: VA) -> Result<Instruction> {
        let window = aspace.read_at_most(va, MAX_INSN_LEN)?;
        let insn = self
            .decoder
            .decode(&window)?
            .ok_or(DisassemblyError::InvalidInstruction(va))?;

        let (category, next, alt, call_targets) = self.classify(aspace, va, &insn);
        let disasm = self.render(&insn, va)?;

        Ok(Instruction {
            addr: va,
            length: insn.length,
            bytes: window[..insn.length as usize].to_vec(),
            disasm,
            category,
            next,
            alt,
            call_targets,
        })
    }

    fn render(&self, insn: &zydis::DecodedInstruction, va: VA) -> Result<String> {
        let mut buf = [0u8; 200];
        let mut out = zydis::OutputBuffer::new(&mut buf[..]);
        self.formatter.format_instruction(insn, &mut out, Some(va as u64), None)?;
        Ok(out.as_str()?.to_string())
    }

    #[allow(clippy::type_complexity)]
    fn classify(
        &self,
        aspace: &AddressSpace,
        va: VA,
        insn: &zydis::DecodedInstruction,
    ) -> (Category, Option<VA>, Option<VA>, SmallVec<[VA; 1]>) {
        use zydis::Mnemonic as M;

        let fallthrough = va
            .checked_add(insn.length as VA)
            .filter(|&next| aspace.is_executable(next));

        match insn.mnemonic {
            M::CALL => {
                // the raw direct destination; augmentation validates it
                // against the loaded range before keeping it.
                let targets = match immediate_target(va, insn) {
                    Some(dst) => smallvec![dst],
                    None => smallvec![],
                };
                (Category::Call, fallthrough, None, targets)
            }

            M::RET | M::IRET | M::IRETD => (Category::Return, None, None, smallvec![]),

            M::JMP => match immediate_target(va, insn) {
                // jmp eax / jmp [eax] / far jumps: targets unrecoverable here
                None => (Category::Indirect, None, None, smallvec![]),
                Some(dst) => {
                    let dst = Some(dst).filter(|&dst| aspace.is_executable(dst));
                    (Category::UnconditionalBranch, dst, None, smallvec![])
                }
            },

            M::JB
            | M::JBE
            | M::JCXZ
            | M::JECXZ
            | M::JKNZD
            | M::JKZD
            | M::JL
            | M::JLE
            | M::JNB
            | M::JNBE
            | M::JNL
            | M::JNLE
            | M::JNO
            | M::JNP
            | M::JNS
            | M::JNZ
            | M::JO
            | M::JP
            | M::JS
            | M::JZ
            | M::LOOP
            | M::LOOPE
            | M::LOOPNE => {
                let taken = immediate_target(va, insn).filter(|&dst| aspace.is_executable(dst));
                (Category::ConditionalBranch, taken, fallthrough, smallvec![])
            }

            M::INT3 | M::UD2 | M::HLT => (Category::Other, None, None, smallvec![]),

            _ => (Category::Sequential, fallthrough, None, smallvec![]),
        }
    }
}

/// zydis reports implicit operands too; the encoded destination of a branch
/// or call is always the first explicit one.
fn first_explicit_operand(insn: &zydis::DecodedInstruction) -> Option<&zydis::DecodedOperand> {
    insn.operands
        .iter()
        .find(|op| op.visibility == zydis::OperandVisibility::EXPLICIT)
}

/// Destination of an immediate-operand control transfer, if the operand is
/// an immediate. Register and memory operands yield `None`: those targets
/// cannot be recovered from the instruction bytes alone.
fn immediate_target(va: VA, insn: &zydis::DecodedInstruction) -> Option<VA> {
    let op = first_explicit_operand(insn)?;
    if op.ty != zydis::OperandType::IMMEDIATE {
        return None;
    }

    if op.imm.is_relative {
        // destination = $pc + immediate + insn.len; zydis does the math.
        insn.calc_absolute_address(va as u64, op)
            .ok()
            .filter(|&dst| dst <= u32::MAX as u64)
            .map(|dst| dst as VA)
    } else if op.imm.is_signed && (op.imm.value as i64) < 0 {
        None
    } else if op.imm.value <= u32::MAX as u64 {
        Some(op.imm.value as VA)
    } else {
        None
    }
}
