//! Minimal executables for the integration tests.
//!
//! Each builder produces the smallest image the corresponding parser accepts
//! while still having the structures an injection has to preserve: program
//! headers and sections for ELF, a section table with spare header room for
//! PE, and segments, a symbol table and a code signature for Mach-O.

#![allow(dead_code)]

use scroll::{Endian, Pread, Pwrite, BE, LE};

/// Sixteen bytes of x86 code
pub const TEXT: &[u8] = &[
    0x55, 0x48, 0x89, 0xe5, 0x31, 0xc0, 0x5d, 0xc3, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90,
];

pub const SENTINEL: &str = "POSTJECT_SENTINEL_fce680ab2cc467b6e072b8b5df1996b2";

fn round_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

// =============================================================================
// ELF
// =============================================================================

const ELF_TEXT_OFFSET: usize = 0x100;
const ELF_SHSTRTAB: &[u8] = b"\0.text\0.shstrtab\0";

/// A little-endian x86-64 executable with `.text` and `.shstrtab`.
pub fn elf64() -> Vec<u8> {
    elf64_with(TEXT, 0)
}

/// An ELF64 image whose `.text` holds `text`, followed by `extra` unnamed
/// empty sections.
pub fn elf64_with(text: &[u8], extra: usize) -> Vec<u8> {
    let shstr_off = ELF_TEXT_OFFSET + text.len();
    let shoff = round_up(shstr_off + ELF_SHSTRTAB.len(), 8);
    let shnum = 3 + extra;
    let mut data = vec![0u8; shoff + shnum * 64];

    data[..4].copy_from_slice(b"\x7fELF");
    data[4] = 2; // ELFCLASS64
    data[5] = 1; // ELFDATA2LSB
    data[6] = 1; // EV_CURRENT
    data.pwrite_with(2u16, 16, LE).unwrap(); // ET_EXEC
    data.pwrite_with(0x3eu16, 18, LE).unwrap(); // EM_X86_64
    data.pwrite_with(1u32, 20, LE).unwrap();
    data.pwrite_with(0x40_0100u64, 24, LE).unwrap(); // e_entry
    data.pwrite_with(64u64, 32, LE).unwrap(); // e_phoff
    data.pwrite_with(shoff as u64, 40, LE).unwrap();
    data.pwrite_with(64u16, 52, LE).unwrap(); // e_ehsize
    data.pwrite_with(56u16, 54, LE).unwrap(); // e_phentsize
    data.pwrite_with(1u16, 56, LE).unwrap(); // e_phnum
    data.pwrite_with(64u16, 58, LE).unwrap(); // e_shentsize
    data.pwrite_with(shnum as u16, 60, LE).unwrap();
    data.pwrite_with(2u16, 62, LE).unwrap(); // e_shstrndx

    // PT_LOAD covering headers and .text
    let ph = 64;
    data.pwrite_with(1u32, ph, LE).unwrap();
    data.pwrite_with(5u32, ph + 4, LE).unwrap(); // R+X
    data.pwrite_with(0u64, ph + 8, LE).unwrap();
    data.pwrite_with(0x40_0000u64, ph + 16, LE).unwrap();
    data.pwrite_with(0x40_0000u64, ph + 24, LE).unwrap();
    data.pwrite_with(shstr_off as u64, ph + 32, LE).unwrap();
    data.pwrite_with(shstr_off as u64, ph + 40, LE).unwrap();
    data.pwrite_with(0x1000u64, ph + 48, LE).unwrap();

    data[ELF_TEXT_OFFSET..shstr_off].copy_from_slice(text);
    data[shstr_off..shstr_off + ELF_SHSTRTAB.len()].copy_from_slice(ELF_SHSTRTAB);

    let text_sh = shoff + 64;
    data.pwrite_with(1u32, text_sh, LE).unwrap(); // ".text"
    data.pwrite_with(1u32, text_sh + 4, LE).unwrap(); // SHT_PROGBITS
    data.pwrite_with(6u64, text_sh + 8, LE).unwrap(); // SHF_ALLOC | SHF_EXECINSTR
    data.pwrite_with(0x40_0000u64 + ELF_TEXT_OFFSET as u64, text_sh + 16, LE).unwrap();
    data.pwrite_with(ELF_TEXT_OFFSET as u64, text_sh + 24, LE).unwrap();
    data.pwrite_with(text.len() as u64, text_sh + 32, LE).unwrap();
    data.pwrite_with(16u64, text_sh + 48, LE).unwrap();

    let str_sh = shoff + 128;
    data.pwrite_with(7u32, str_sh, LE).unwrap(); // ".shstrtab"
    data.pwrite_with(3u32, str_sh + 4, LE).unwrap(); // SHT_STRTAB
    data.pwrite_with(shstr_off as u64, str_sh + 24, LE).unwrap();
    data.pwrite_with(ELF_SHSTRTAB.len() as u64, str_sh + 32, LE).unwrap();
    data.pwrite_with(1u64, str_sh + 48, LE).unwrap();

    for i in 0..extra {
        let sh = shoff + (3 + i) * 64;
        data.pwrite_with(1u32, sh + 4, LE).unwrap(); // SHT_PROGBITS, empty
        data.pwrite_with(1u64, sh + 48, LE).unwrap();
    }
    data
}

/// An ELF64 image with its section header table removed.
pub fn elf64_stripped() -> Vec<u8> {
    let mut data = elf64();
    let shoff = round_up(ELF_TEXT_OFFSET + TEXT.len() + ELF_SHSTRTAB.len(), 8);
    data.truncate(shoff);
    data.pwrite_with(0u64, 40, LE).unwrap();
    data.pwrite_with(0u16, 60, LE).unwrap();
    data.pwrite_with(0u16, 62, LE).unwrap();
    data
}

/// A big-endian 32-bit executable with `.text` and `.shstrtab`.
pub fn elf32_be() -> Vec<u8> {
    let e = BE;
    let shstr_off = ELF_TEXT_OFFSET + TEXT.len();
    let shoff = round_up(shstr_off + ELF_SHSTRTAB.len(), 4);
    let mut data = vec![0u8; shoff + 3 * 40];

    data[..4].copy_from_slice(b"\x7fELF");
    data[4] = 1; // ELFCLASS32
    data[5] = 2; // ELFDATA2MSB
    data[6] = 1;
    data.pwrite_with(2u16, 16, e).unwrap();
    data.pwrite_with(8u16, 18, e).unwrap(); // EM_MIPS
    data.pwrite_with(1u32, 20, e).unwrap();
    data.pwrite_with(0x40_0100u32, 24, e).unwrap();
    data.pwrite_with(52u32, 28, e).unwrap(); // e_phoff
    data.pwrite_with(shoff as u32, 32, e).unwrap();
    data.pwrite_with(52u16, 40, e).unwrap();
    data.pwrite_with(32u16, 42, e).unwrap();
    data.pwrite_with(1u16, 44, e).unwrap();
    data.pwrite_with(40u16, 46, e).unwrap();
    data.pwrite_with(3u16, 48, e).unwrap();
    data.pwrite_with(2u16, 50, e).unwrap();

    let ph = 52;
    data.pwrite_with(1u32, ph, e).unwrap();
    data.pwrite_with(0x40_0000u32, ph + 8, e).unwrap();
    data.pwrite_with(0x40_0000u32, ph + 12, e).unwrap();
    data.pwrite_with(shstr_off as u32, ph + 16, e).unwrap();
    data.pwrite_with(shstr_off as u32, ph + 20, e).unwrap();
    data.pwrite_with(5u32, ph + 24, e).unwrap();
    data.pwrite_with(0x1000u32, ph + 28, e).unwrap();

    data[ELF_TEXT_OFFSET..shstr_off].copy_from_slice(TEXT);
    data[shstr_off..shstr_off + ELF_SHSTRTAB.len()].copy_from_slice(ELF_SHSTRTAB);

    let text_sh = shoff + 40;
    data.pwrite_with(1u32, text_sh, e).unwrap();
    data.pwrite_with(1u32, text_sh + 4, e).unwrap();
    data.pwrite_with(6u32, text_sh + 8, e).unwrap();
    data.pwrite_with(0x40_0100u32, text_sh + 12, e).unwrap();
    data.pwrite_with(ELF_TEXT_OFFSET as u32, text_sh + 16, e).unwrap();
    data.pwrite_with(TEXT.len() as u32, text_sh + 20, e).unwrap();
    data.pwrite_with(16u32, text_sh + 32, e).unwrap();

    let str_sh = shoff + 80;
    data.pwrite_with(7u32, str_sh, e).unwrap();
    data.pwrite_with(3u32, str_sh + 4, e).unwrap();
    data.pwrite_with(shstr_off as u32, str_sh + 16, e).unwrap();
    data.pwrite_with(ELF_SHSTRTAB.len() as u32, str_sh + 20, e).unwrap();
    data.pwrite_with(1u32, str_sh + 32, e).unwrap();
    data
}

// =============================================================================
// PE
// =============================================================================

pub const PE_OFFSET: usize = 0x80;
pub const PE_OPT_OFFSET: usize = PE_OFFSET + 4 + 20;
pub const PE_TEXT_RAW: usize = 0x200;
pub const PE_FILE_SIZE: usize = 0x400;

/// Offset of the optional header field at `field`
pub fn pe_opt(field: usize) -> usize {
    PE_OPT_OFFSET + field
}

/// File offset of data directory `index`
pub fn pe_directory(plus: bool, index: usize) -> usize {
    PE_OPT_OFFSET + (if plus { 112 } else { 96 }) + index * 8
}

/// Offset of the section table
pub fn pe_section_table(plus: bool) -> usize {
    PE_OPT_OFFSET + (if plus { 240 } else { 224 })
}

/// A PE32+ (`plus`) or PE32 executable with a single `.text` section and
/// room in the headers for two more section entries.
pub fn pe(plus: bool) -> Vec<u8> {
    pe_with_headers(plus, PE_TEXT_RAW)
}

/// Like [`pe`], with `headers` bytes of headers before `.text`.
pub fn pe_with_headers(plus: bool, headers: usize) -> Vec<u8> {
    let mut data = vec![0u8; headers + 0x200];
    data[..2].copy_from_slice(b"MZ");
    data.pwrite_with(PE_OFFSET as u32, 0x3c, LE).unwrap();
    data[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(b"PE\0\0");

    let coff = PE_OFFSET + 4;
    let machine: u16 = if plus { 0x8664 } else { 0x14c };
    data.pwrite_with(machine, coff, LE).unwrap();
    data.pwrite_with(1u16, coff + 2, LE).unwrap();
    let opt_size: u16 = if plus { 240 } else { 224 };
    data.pwrite_with(opt_size, coff + 16, LE).unwrap();
    let characteristics: u16 = if plus { 0x0022 } else { 0x0102 };
    data.pwrite_with(characteristics, coff + 18, LE).unwrap();

    let opt = PE_OPT_OFFSET;
    let magic: u16 = if plus { 0x20b } else { 0x10b };
    data.pwrite_with(magic, opt, LE).unwrap();
    data[opt + 2] = 14; // linker version
    data.pwrite_with(0x200u32, opt + 4, LE).unwrap(); // SizeOfCode
    data.pwrite_with(0x1000u32, opt + 16, LE).unwrap(); // AddressOfEntryPoint
    data.pwrite_with(0x1000u32, opt + 20, LE).unwrap(); // BaseOfCode
    if plus {
        data.pwrite_with(0x1_4000_0000u64, opt + 24, LE).unwrap();
    } else {
        data.pwrite_with(0x40_0000u32, opt + 28, LE).unwrap();
    }
    data.pwrite_with(0x1000u32, opt + 32, LE).unwrap(); // SectionAlignment
    data.pwrite_with(0x200u32, opt + 36, LE).unwrap(); // FileAlignment
    data.pwrite_with(6u16, opt + 40, LE).unwrap(); // OS version
    data.pwrite_with(6u16, opt + 48, LE).unwrap(); // subsystem version
    data.pwrite_with(0x2000u32, opt + 56, LE).unwrap(); // SizeOfImage
    data.pwrite_with(headers as u32, opt + 60, LE).unwrap(); // SizeOfHeaders
    data.pwrite_with(3u16, opt + 68, LE).unwrap(); // console subsystem
    if plus {
        data.pwrite_with(0x10_0000u64, opt + 72, LE).unwrap();
        data.pwrite_with(0x1000u64, opt + 80, LE).unwrap();
        data.pwrite_with(0x10_0000u64, opt + 88, LE).unwrap();
        data.pwrite_with(0x1000u64, opt + 96, LE).unwrap();
        data.pwrite_with(16u32, opt + 108, LE).unwrap();
    } else {
        data.pwrite_with(0x10_0000u32, opt + 72, LE).unwrap();
        data.pwrite_with(0x1000u32, opt + 76, LE).unwrap();
        data.pwrite_with(0x10_0000u32, opt + 80, LE).unwrap();
        data.pwrite_with(0x1000u32, opt + 84, LE).unwrap();
        data.pwrite_with(16u32, opt + 92, LE).unwrap();
    }

    let sect = pe_section_table(plus);
    data[sect..sect + 5].copy_from_slice(b".text");
    data.pwrite_with(TEXT.len() as u32, sect + 8, LE).unwrap();
    data.pwrite_with(0x1000u32, sect + 12, LE).unwrap();
    data.pwrite_with(0x200u32, sect + 16, LE).unwrap();
    data.pwrite_with(headers as u32, sect + 20, LE).unwrap();
    data.pwrite_with(0x6000_0020u32, sect + 36, LE).unwrap();

    data[headers..headers + TEXT.len()].copy_from_slice(TEXT);
    data
}

/// Append a certificate table after the last section and point the security
/// directory at it. Returns the table bytes.
pub fn pe_append_certificate(data: &mut Vec<u8>, plus: bool) -> Vec<u8> {
    let mut cert = vec![0u8; 0x20];
    cert.pwrite_with(0x20u32, 0, LE).unwrap(); // dwLength
    cert.pwrite_with(0x0200u16, 4, LE).unwrap(); // WIN_CERT_REVISION_2_0
    cert.pwrite_with(0x0002u16, 6, LE).unwrap(); // WIN_CERT_TYPE_PKCS_SIGNED_DATA
    for (i, byte) in cert[8..].iter_mut().enumerate() {
        *byte = 0xa0 + i as u8;
    }
    let offset = data.len();
    data.extend_from_slice(&cert);
    let dir = pe_directory(plus, 4);
    data.pwrite_with(offset as u32, dir, LE).unwrap();
    data.pwrite_with(cert.len() as u32, dir + 4, LE).unwrap();
    cert
}

pub fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

pub fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap())
}

// =============================================================================
// Mach-O
// =============================================================================

pub const CPU_TYPE_X86_64: u32 = 0x0100_0007;
pub const CPU_TYPE_ARM64: u32 = 0x0100_000c;
pub const CPU_TYPE_I386: u32 = 7;

pub const MACHO_DATA: &[u8] = b"__data contents: 0123456789abcde";
pub const MACHO_LINKEDIT_OFFSET: u64 = 0x2000;
pub const MACHO_SIGNATURE_OFFSET: u64 = 0x2080;

/// Parameters of a thin Mach-O fixture.
///
/// Layout: `__PAGEZERO`, `__TEXT` (file 0..0x1000), `__DATA`
/// (0x1000..0x2000) and `__LINKEDIT` (0x2000..) holding a one-symbol
/// symbol table and, optionally, a code signature at the end of the file.
#[derive(Debug, Clone)]
pub struct MachOFixture {
    pub is_64: bool,
    pub cputype: u32,
    /// File offset of `__text`, which bounds the load command area
    pub text_offset: u32,
    pub code_signature: bool,
    /// Whether `__DATA` describes its contents with a `__data` section
    pub data_sections: bool,
}

impl Default for MachOFixture {
    fn default() -> Self {
        MachOFixture {
            is_64: true,
            cputype: CPU_TYPE_X86_64,
            text_offset: 0x800,
            code_signature: true,
            data_sections: true,
        }
    }
}

struct Commands {
    is_64: bool,
    bytes: Vec<u8>,
    count: u32,
}

impl Commands {
    fn word(&self, buf: &mut [u8], offset: usize, value: u64) -> usize {
        if self.is_64 {
            buf.pwrite_with(value, offset, LE).unwrap();
            offset + 8
        } else {
            buf.pwrite_with(value as u32, offset, LE).unwrap();
            offset + 4
        }
    }

    /// Append a segment command; `sections` are `(name, addr, size, offset, align, flags)`
    #[allow(clippy::too_many_arguments)]
    fn segment(
        &mut self,
        name: &str,
        vmaddr: u64,
        vmsize: u64,
        fileoff: u64,
        filesize: u64,
        prot: u32,
        sections: &[(&str, u64, u64, u32, u32, u32)],
    ) {
        let (cmd, cmd_size, sect_size) = if self.is_64 {
            (0x19u32, 72, 80)
        } else {
            (0x1u32, 56, 68)
        };
        let mut buf = vec![0u8; cmd_size + sections.len() * sect_size];
        buf.pwrite_with(cmd, 0, LE).unwrap();
        let len = buf.len() as u32;
        buf.pwrite_with(len, 4, LE).unwrap();
        buf[8..8 + name.len()].copy_from_slice(name.as_bytes());
        let mut at = 24;
        at = self.word(&mut buf, at, vmaddr);
        at = self.word(&mut buf, at, vmsize);
        at = self.word(&mut buf, at, fileoff);
        at = self.word(&mut buf, at, filesize);
        buf.pwrite_with(prot, at, LE).unwrap();
        buf.pwrite_with(prot, at + 4, LE).unwrap();
        buf.pwrite_with(sections.len() as u32, at + 8, LE).unwrap();

        for (i, (sectname, addr, size, offset, align, flags)) in sections.iter().enumerate() {
            let base = cmd_size + i * sect_size;
            buf[base..base + sectname.len()].copy_from_slice(sectname.as_bytes());
            buf[base + 16..base + 16 + name.len()].copy_from_slice(name.as_bytes());
            let mut at = base + 32;
            at = self.word(&mut buf, at, *addr);
            at = self.word(&mut buf, at, *size);
            buf.pwrite_with(*offset, at, LE).unwrap();
            buf.pwrite_with(*align, at + 4, LE).unwrap();
            buf.pwrite_with(*flags, at + 16, LE).unwrap();
        }
        self.push(buf);
    }

    fn push(&mut self, buf: Vec<u8>) {
        self.bytes.extend_from_slice(&buf);
        self.count += 1;
    }
}

impl MachOFixture {
    pub fn arm64() -> Self {
        MachOFixture {
            cputype: CPU_TYPE_ARM64,
            ..Default::default()
        }
    }

    pub fn i386() -> Self {
        MachOFixture {
            is_64: false,
            cputype: CPU_TYPE_I386,
            ..Default::default()
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let header_size = if self.is_64 { 32 } else { 28 };
        let file_size = if self.code_signature { 0x2100 } else { 0x2080 };
        let linkedit_size = file_size as u64 - MACHO_LINKEDIT_OFFSET;

        let mut cmds = Commands {
            is_64: self.is_64,
            bytes: Vec::new(),
            count: 0,
        };
        cmds.segment("__PAGEZERO", 0, 0x1000, 0, 0, 0, &[]);
        cmds.segment(
            "__TEXT",
            0x1000,
            0x1000,
            0,
            0x1000,
            5,
            &[(
                "__text",
                0x1000 + self.text_offset as u64,
                TEXT.len() as u64,
                self.text_offset,
                4,
                0x8000_0400,
            )],
        );
        let data_sections: &[_] = if self.data_sections {
            &[("__data", 0x2000, MACHO_DATA.len() as u64, 0x1000, 3, 0)]
        } else {
            &[]
        };
        cmds.segment("__DATA", 0x2000, 0x1000, 0x1000, 0x1000, 3, data_sections);
        cmds.segment(
            "__LINKEDIT",
            0x3000,
            0x1000,
            MACHO_LINKEDIT_OFFSET,
            linkedit_size,
            1,
            &[],
        );

        // LC_SYMTAB: one symbol, string table right after it
        let mut symtab = vec![0u8; 24];
        symtab.pwrite_with(0x2u32, 0, LE).unwrap();
        symtab.pwrite_with(24u32, 4, LE).unwrap();
        symtab.pwrite_with(MACHO_LINKEDIT_OFFSET as u32, 8, LE).unwrap();
        symtab.pwrite_with(1u32, 12, LE).unwrap();
        symtab.pwrite_with(MACHO_LINKEDIT_OFFSET as u32 + 0x10, 16, LE).unwrap();
        symtab.pwrite_with(0x10u32, 20, LE).unwrap();
        cmds.push(symtab);

        // LC_DYSYMTAB with no tables
        let mut dysymtab = vec![0u8; 80];
        dysymtab.pwrite_with(0xbu32, 0, LE).unwrap();
        dysymtab.pwrite_with(80u32, 4, LE).unwrap();
        cmds.push(dysymtab);

        if self.code_signature {
            let mut sig = vec![0u8; 16];
            sig.pwrite_with(0x1du32, 0, LE).unwrap();
            sig.pwrite_with(16u32, 4, LE).unwrap();
            sig.pwrite_with(MACHO_SIGNATURE_OFFSET as u32, 8, LE).unwrap();
            sig.pwrite_with(0x80u32, 12, LE).unwrap();
            cmds.push(sig);
        }

        let mut data = vec![0u8; file_size];
        let magic: u32 = if self.is_64 { 0xfeed_facf } else { 0xfeed_face };
        data.pwrite_with(magic, 0, LE).unwrap();
        data.pwrite_with(self.cputype, 4, LE).unwrap();
        data.pwrite_with(3u32, 8, LE).unwrap(); // CPU_SUBTYPE_ALL
        data.pwrite_with(2u32, 12, LE).unwrap(); // MH_EXECUTE
        data.pwrite_with(cmds.count, 16, LE).unwrap();
        data.pwrite_with(cmds.bytes.len() as u32, 20, LE).unwrap();
        data[header_size..header_size + cmds.bytes.len()].copy_from_slice(&cmds.bytes);

        let text = self.text_offset as usize;
        data[text..text + TEXT.len()].copy_from_slice(TEXT);
        data[0x1000..0x1000 + MACHO_DATA.len()].copy_from_slice(MACHO_DATA);

        // nlist: _main in section 1 (__text)
        let sym = MACHO_LINKEDIT_OFFSET as usize;
        data.pwrite_with(1u32, sym, LE).unwrap();
        data[sym + 4] = 0x0f; // N_SECT | N_EXT
        data[sym + 5] = 1;
        if self.is_64 {
            data.pwrite_with(0x1000 + self.text_offset as u64, sym + 8, LE).unwrap();
        } else {
            data.pwrite_with(0x1000 + self.text_offset, sym + 8, LE).unwrap();
        }
        data[sym + 0x10..sym + 0x17].copy_from_slice(b"\0_main\0");

        if self.code_signature {
            let sig = MACHO_SIGNATURE_OFFSET as usize;
            data.pwrite_with(0xfade_0cc0u32, sig, BE).unwrap();
            data.pwrite_with(0x80u32, sig + 4, BE).unwrap();
        }
        data
    }
}

/// A fat binary holding `slices` as `(cputype, image, align)` entries.
pub fn fat(slices: &[(u32, &[u8], u32)]) -> Vec<u8> {
    let mut data = vec![0u8; 8 + slices.len() * 20];
    data.pwrite_with(0xcafe_babeu32, 0, BE).unwrap();
    data.pwrite_with(slices.len() as u32, 4, BE).unwrap();
    for (i, (cputype, image, align)) in slices.iter().enumerate() {
        let offset = round_up(data.len().max(0x1000), 1 << align);
        data.resize(offset, 0);
        data.extend_from_slice(image);
        let entry = 8 + i * 20;
        data.pwrite_with(*cputype, entry, BE).unwrap();
        data.pwrite_with(3u32, entry + 4, BE).unwrap();
        data.pwrite_with(offset as u32, entry + 8, BE).unwrap();
        data.pwrite_with(image.len() as u32, entry + 12, BE).unwrap();
        data.pwrite_with(*align, entry + 16, BE).unwrap();
    }
    data
}

/// Read a fat architecture table as `(offset, size, align)`
pub fn fat_arches(data: &[u8]) -> Vec<(u32, u32, u32)> {
    let e: Endian = BE;
    let count = u32::from_be_bytes(data[4..8].try_into().unwrap()) as usize;
    (0..count)
        .map(|i| {
            let entry = 8 + i * 20;
            let read = |at: usize| -> u32 { data.pread_with(at, e).unwrap() };
            (read(entry + 8), read(entry + 12), read(entry + 16))
        })
        .collect()
}
