//! Executable format detection from magic numbers.

use core::fmt;

use scroll::{Pread, BE, LE};

/// ELF identification bytes (`\x7fELF`)
const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

/// DOS header magic (`MZ`)
const DOS_MAGIC: u16 = 0x5a4d;
/// Offset of `e_lfanew` in the DOS header
const PE_POINTER_OFFSET: usize = 0x3c;
/// `PE\0\0`
const PE_SIGNATURE: u32 = 0x0000_4550;

const MH_MAGIC: u32 = 0xfeed_face;
const MH_CIGAM: u32 = 0xcefa_edfe;
const MH_MAGIC_64: u32 = 0xfeed_facf;
const MH_CIGAM_64: u32 = 0xcffa_edfe;
const FAT_MAGIC: u32 = 0xcafe_babe;
const FAT_CIGAM: u32 = 0xbeba_feca;
const FAT_MAGIC_64: u32 = 0xcafe_babf;
const FAT_CIGAM_64: u32 = 0xbfba_feca;

/// Fat headers with more slices than this are assumed to be Java class
/// files, which share `0xcafebabe`.
const MAX_FAT_ARCHS: u32 = 30;

/// Container format of an executable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Executable and Linkable Format
    Elf,
    /// Portable Executable
    Pe,
    /// Mach-O, thin or fat
    MachO,
    /// None of the above, or too short to tell
    Unknown,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Elf => "ELF",
            Format::Pe => "PE",
            Format::MachO => "Mach-O",
            Format::Unknown => "unknown",
        })
    }
}

/// Identify the container format of `bytes`.
///
/// Only magic numbers are inspected; a positive answer says nothing about
/// whether the rest of the image is well formed.
pub fn detect_format(bytes: &[u8]) -> Format {
    if is_elf(bytes) {
        Format::Elf
    } else if is_macho(bytes) {
        Format::MachO
    } else if is_pe(bytes) {
        Format::Pe
    } else {
        Format::Unknown
    }
}

/// Does `bytes` start with the ELF identification?
pub fn is_elf(bytes: &[u8]) -> bool {
    bytes.len() >= ELF_MAGIC.len() && &bytes[..ELF_MAGIC.len()] == ELF_MAGIC
}

/// Does `bytes` start with a DOS stub pointing at a PE signature?
pub fn is_pe(bytes: &[u8]) -> bool {
    if bytes.pread_with::<u16>(0, LE).ok() != Some(DOS_MAGIC) {
        return false;
    }
    let Ok(pe_pointer) = bytes.pread_with::<u32>(PE_POINTER_OFFSET, LE) else {
        return false;
    };
    bytes.pread_with::<u32>(pe_pointer as usize, LE).ok() == Some(PE_SIGNATURE)
}

/// Does `bytes` start with a thin or fat Mach-O magic?
pub fn is_macho(bytes: &[u8]) -> bool {
    let Ok(magic) = bytes.pread_with::<u32>(0, BE) else {
        return false;
    };
    match magic {
        MH_MAGIC | MH_CIGAM | MH_MAGIC_64 | MH_CIGAM_64 => true,
        FAT_MAGIC | FAT_CIGAM | FAT_MAGIC_64 | FAT_CIGAM_64 => {
            let endian = if magic == FAT_MAGIC || magic == FAT_MAGIC_64 {
                BE
            } else {
                LE
            };
            matches!(
                bytes.pread_with::<u32>(4, endian),
                Ok(n) if (1..=MAX_FAT_ARCHS).contains(&n)
            )
        }
        _ => false,
    }
}

/// Does `bytes` start with a fat (universal) Mach-O header?
pub fn is_fat_macho(bytes: &[u8]) -> bool {
    matches!(
        bytes.pread_with::<u32>(0, BE),
        Ok(FAT_MAGIC | FAT_CIGAM | FAT_MAGIC_64 | FAT_CIGAM_64)
    ) && is_macho(bytes)
}
