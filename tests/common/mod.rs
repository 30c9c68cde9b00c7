//! Hand-assembled minimal 32-bit ELF images for end-to-end tests: one
//! executable `.text` section plus `.symtab`/`.strtab`, enough for the
//! loader to map code and harvest names.

const EHSIZE: usize = 52;
const SHENTSIZE: usize = 40;

const SHT_PROGBITS: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;

const SHF_ALLOC: u32 = 0x2;
const SHF_EXECINSTR: u32 = 0x4;

pub struct ElfBuilder {
    entry:   u32,
    text_va: u32,
    text:    Vec<u8>,
    symbols: Vec<(String, u32)>,
}

fn push_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

#[allow(clippy::too_many_arguments)]
fn push_shdr(
    buf: &mut Vec<u8>,
    name: u32,
    typ: u32,
    flags: u32,
    addr: u32,
    offset: u32,
    size: u32,
    link: u32,
    info: u32,
    entsize: u32,
) {
    push_u32(buf, name);
    push_u32(buf, typ);
    push_u32(buf, flags);
    push_u32(buf, addr);
    push_u32(buf, offset);
    push_u32(buf, size);
    push_u32(buf, link);
    push_u32(buf, info);
    push_u32(buf, 1); // sh_addralign
    push_u32(buf, entsize);
}

impl ElfBuilder {
    pub fn new(text_va: u32) -> ElfBuilder {
        ElfBuilder {
            entry: text_va,
            text_va,
            text: Vec::new(),
            symbols: Vec::new(),
        }
    }

    pub fn entry(mut self, va: u32) -> ElfBuilder {
        self.entry = va;
        self
    }

    pub fn text(mut self, code: &[u8]) -> ElfBuilder {
        self.text = code.to_vec();
        self
    }

    pub fn symbol(mut self, name: &str, va: u32) -> ElfBuilder {
        self.symbols.push((name.to_string(), va));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        // string table: leading NUL, then each symbol name
        let mut strtab: Vec<u8> = vec![0];
        let mut name_offsets = Vec::new();
        for (name, _) in &self.symbols {
            name_offsets.push(strtab.len() as u32);
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
        }

        // symbol table: NULL entry, then one STT_FUNC/STB_GLOBAL per symbol
        let mut symtab: Vec<u8> = vec![0; 16];
        for (offset, (_, va)) in name_offsets.iter().zip(&self.symbols) {
            push_u32(&mut symtab, *offset); // st_name
            push_u32(&mut symtab, *va); // st_value
            push_u32(&mut symtab, 0); // st_size
            symtab.push(0x12); // st_info: GLOBAL | FUNC
            symtab.push(0); // st_other
            push_u16(&mut symtab, 1); // st_shndx: .text
        }

        let shstrtab: &[u8] = b"\0.text\0.symtab\0.strtab\0.shstrtab\0";
        let (text_name, symtab_name, strtab_name, shstrtab_name) = (1u32, 7, 15, 23);

        let text_off = EHSIZE;
        let symtab_off = text_off + self.text.len();
        let strtab_off = symtab_off + symtab.len();
        let shstrtab_off = strtab_off + strtab.len();
        let shoff = shstrtab_off + shstrtab.len();

        let mut buf = Vec::new();

        // e_ident
        buf.extend_from_slice(b"\x7fELF");
        buf.push(1); // EI_CLASS: 32-bit
        buf.push(1); // EI_DATA: little endian
        buf.push(1); // EI_VERSION
        buf.extend_from_slice(&[0; 9]);

        push_u16(&mut buf, 2); // e_type: EXEC
        push_u16(&mut buf, 3); // e_machine: EM_386
        push_u32(&mut buf, 1); // e_version
        push_u32(&mut buf, self.entry);
        push_u32(&mut buf, 0); // e_phoff
        push_u32(&mut buf, shoff as u32);
        push_u32(&mut buf, 0); // e_flags
        push_u16(&mut buf, EHSIZE as u16);
        push_u16(&mut buf, 32); // e_phentsize
        push_u16(&mut buf, 0); // e_phnum
        push_u16(&mut buf, SHENTSIZE as u16);
        push_u16(&mut buf, 5); // e_shnum
        push_u16(&mut buf, 4); // e_shstrndx

        buf.extend_from_slice(&self.text);
        buf.extend_from_slice(&symtab);
        buf.extend_from_slice(&strtab);
        buf.extend_from_slice(shstrtab);

        // section headers: NULL, .text, .symtab, .strtab, .shstrtab
        push_shdr(&mut buf, 0, 0, 0, 0, 0, 0, 0, 0, 0);
        push_shdr(
            &mut buf,
            text_name,
            SHT_PROGBITS,
            SHF_ALLOC | SHF_EXECINSTR,
            self.text_va,
            text_off as u32,
            self.text.len() as u32,
            0,
            0,
            0,
        );
        push_shdr(
            &mut buf,
            symtab_name,
            SHT_SYMTAB,
            0,
            0,
            symtab_off as u32,
            symtab.len() as u32,
            3, // link: .strtab
            1, // info: first global symbol
            16,
        );
        push_shdr(
            &mut buf,
            strtab_name,
            SHT_STRTAB,
            0,
            0,
            strtab_off as u32,
            strtab.len() as u32,
            0,
            0,
            0,
        );
        push_shdr(
            &mut buf,
            shstrtab_name,
            SHT_STRTAB,
            0,
            0,
            shstrtab_off as u32,
            shstrtab.len() as u32,
            0,
            0,
            0,
        );

        buf
    }
}
