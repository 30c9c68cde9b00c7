use anyhow::Result;
use goblin::elf::{header, section_header};
use log::debug;
use thiserror::Error;

use crate::{
    aspace::{AddressSpace, Permissions, Section},
    symtab::SymbolTable,
    VA,
};

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("format not supported: {0}")]
    FormatNotSupported(String),

    #[error("malformed elf file: {0}")]
    MalformedElfFile(String),

    #[error("no candidate section contains the entry point {0:#010x}")]
    NoEntrySection(VA),

    #[error("multiple candidate sections contain the entry point {0:#010x}")]
    AmbiguousEntrySection(VA),
}

/// What the loader recovers from an ELF file: the flat memory image, the
/// symbol table, and the entry point.
pub struct Image {
    pub entry:         VA,
    pub address_space: AddressSpace,
    pub symbols:       SymbolTable,
}

/// Load a 32-bit x86 ELF executable into a flat, address-indexed image.
///
/// Sections are accepted when they are allocated, or when they are
/// program-bits with a non-zero load address; bytes are read from the file
/// for program-bits sections only. Exactly one bytes-backed program-bits
/// section must contain the entry point.
pub fn load(buf: &[u8]) -> Result<Image> {
    let elf = goblin::elf::Elf::parse(buf).map_err(|e| LoaderError::MalformedElfFile(e.to_string()))?;

    if elf.is_64 {
        return Err(LoaderError::FormatNotSupported("64-bit ELF".to_string()).into());
    }
    if elf.header.e_machine != header::EM_386 {
        return Err(
            LoaderError::FormatNotSupported(format!("unsupported architecture: {}", elf.header.e_machine)).into(),
        );
    }

    let entry = elf.header.e_entry as VA;
    debug!("elf: entry: {:#010x}", entry);

    let mut sections = Vec::new();
    let mut candidates = 0usize;

    for sh in elf.section_headers.iter() {
        let name = elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("").to_string();

        let alloc = sh.sh_flags & section_header::SHF_ALLOC as u64 != 0;
        let progbits = sh.sh_type == section_header::SHT_PROGBITS;

        if !(alloc || (progbits && sh.sh_addr != 0)) {
            continue;
        }
        if sh.sh_size == 0 {
            continue;
        }

        let addr = sh.sh_addr as VA;
        let size = sh.sh_size as u32;

        let bytes = if progbits {
            let start = sh.sh_offset as usize;
            let end = start
                .checked_add(sh.sh_size as usize)
                .filter(|&end| end <= buf.len())
                .ok_or_else(|| {
                    LoaderError::MalformedElfFile(format!("section {} extends past end of file", name))
                })?;
            Some(buf[start..end].to_vec())
        } else {
            None
        };

        // ELF sections are always readable
        let mut perms = Permissions::R;
        if sh.sh_flags & section_header::SHF_WRITE as u64 != 0 {
            perms |= Permissions::W;
        }
        if sh.sh_flags & section_header::SHF_EXECINSTR as u64 != 0 {
            perms |= Permissions::X;
        }

        if progbits && sh.sh_addr <= entry as u64 && (entry as u64) < sh.sh_addr + sh.sh_size {
            candidates += 1;
            debug!("elf: found candidate section at {:#010x} ({})", addr, name);
        }

        debug!(
            "elf: section {:#010x}-{:#010x} {:?} {}",
            addr,
            addr as u64 + size as u64,
            perms,
            name
        );

        sections.push(Section {
            addr,
            size,
            bytes,
            perms,
            name,
        });
    }

    match candidates {
        0 => return Err(LoaderError::NoEntrySection(entry).into()),
        1 => {}
        _ => return Err(LoaderError::AmbiguousEntrySection(entry).into()),
    }

    let address_space = AddressSpace::with_sections(sections)?;

    let mut symbols = SymbolTable::default();
    for sym in elf.syms.iter() {
        if let Some(name) = elf.strtab.get_at(sym.st_name) {
            symbols.insert(sym.st_value as VA, name);
        }
    }

    debug!(
        "elf: loaded: {} sections, {} symbols",
        address_space.sections().len(),
        symbols.len()
    );

    Ok(Image {
        entry,
        address_space,
        symbols,
    })
}
