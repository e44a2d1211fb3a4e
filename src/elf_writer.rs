//! ELF section injection.
//!
//! Resources are stored as plain `SHT_PROGBITS` sections without `SHF_ALLOC`,
//! so the loader never maps them and no program header needs to change. The
//! section is reachable through the section header table.
//!
//! # Layout
//!
//! The writer never moves existing section contents. Everything it adds goes
//! to the end of the file:
//!
//! ```text
//! +--------------------+  offset 0
//! | original image     |  untouched, except in-place overwrites
//! +--------------------+
//! | resource data      |  one block per new or grown section
//! +--------------------+
//! | .shstrtab copy     |  only when a new name was added
//! +--------------------+
//! | section headers    |  only when the table grew
//! +--------------------+
//! ```
//!
//! The superseded string table and section header table stay behind as
//! unreferenced bytes. They are never reused, so every offset recorded
//! elsewhere in the file remains valid.
//!
//! ## Extended section numbering
//!
//! When a file has `SHN_LORESERVE` (0xff00) or more sections, `e_shnum` is
//! zero and the real count lives in `sh_size` of section 0; likewise
//! `e_shstrndx == SHN_XINDEX` defers to `sh_link` of section 0. Both forms
//! are read and produced as needed.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use goblin::container::{Container, Ctx};
use goblin::elf::header::Header;
use goblin::elf::section_header::{SectionHeader, SHT_NOBITS, SHT_PROGBITS, SHT_STRTAB};
use goblin::elf::Elf;
use log::{debug, trace};
use scroll::ctx::{SizeWith, TryIntoCtx};

use crate::error::{Error, Result};
use crate::{Injection, ResourceId};

/// First reserved section index
const SHN_LORESERVE: usize = 0xff00;
/// `e_shstrndx` escape value: the real index is in `sh_link` of section 0
const SHN_XINDEX: u16 = 0xffff;

/// Alignment of resource blocks appended to the file
const DATA_ALIGNMENT: usize = 16;
/// Alignment of the relocated section header table
const TABLE_ALIGNMENT: usize = 8;

const SHSTRTAB_NAME: &str = ".shstrtab";

/// A builder that adds or replaces sections in an ELF file.
///
/// Changes are recorded by [`write_section`](Self::write_section) and only
/// laid out by [`build`](Self::build), which never mutates the input.
#[derive(Debug)]
pub struct ElfWriter<'a> {
    /// Original binary data
    data: &'a [u8],
    /// ELF header
    header: Header,
    /// Section headers, including any added by this writer
    section_headers: Vec<SectionHeader>,
    /// Number of section headers in the original file
    original_section_count: usize,
    /// Section names string table
    section_names: Vec<u8>,
    /// Index of the section names string table
    shstrndx: Option<usize>,
    /// Context (endianness, container size)
    ctx: Ctx,
    /// New contents by section index
    contents: BTreeMap<usize, Vec<u8>>,
    /// Whether the string table gained names
    names_grown: bool,
}

impl<'a> ElfWriter<'a> {
    /// Parse `data` and create a writer for it.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let elf = Elf::parse(data)?;
        Self::new(data, &elf)
    }

    /// Create a new ElfWriter from an already parsed ELF binary.
    pub fn new(data: &'a [u8], elf: &Elf) -> Result<Self> {
        let container = if elf.is_64 {
            Container::Big
        } else {
            Container::Little
        };
        let le = if elf.little_endian {
            scroll::Endian::Little
        } else {
            scroll::Endian::Big
        };
        let ctx = Ctx::new(container, le);

        let section_headers = elf.section_headers.clone();
        let shstrndx = match elf.header.e_shstrndx {
            0 => None,
            SHN_XINDEX => section_headers.first().map(|s| s.sh_link as usize),
            idx => Some(idx as usize),
        }
        .filter(|&idx| idx != 0 && idx < section_headers.len());

        let section_names = match shstrndx {
            Some(idx) => {
                let shdr = &section_headers[idx];
                let start = shdr.sh_offset as usize;
                let end = start
                    .checked_add(shdr.sh_size as usize)
                    .filter(|&end| end <= data.len())
                    .ok_or_else(|| {
                        Error::malformed("section name string table extends beyond file size")
                    })?;
                data[start..end].to_vec()
            }
            None => Vec::new(),
        };

        Ok(ElfWriter {
            data,
            header: elf.header,
            original_section_count: section_headers.len(),
            section_headers,
            section_names,
            shstrndx,
            ctx,
            contents: BTreeMap::new(),
            names_grown: false,
        })
    }

    /// Get section name from section header
    fn get_section_name(&self, shdr: &SectionHeader) -> String {
        let name_off = shdr.sh_name;
        if name_off >= self.section_names.len() {
            return String::new();
        }
        let end = self.section_names[name_off..]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.section_names.len() - name_off);
        String::from_utf8_lossy(&self.section_names[name_off..name_off + end]).into_owned()
    }

    /// Find a section index by name, skipping the null section
    fn find_section_index(&self, name: &str) -> Option<usize> {
        self.section_headers
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, shdr)| self.get_section_name(shdr) == name)
            .map(|(idx, _)| idx)
    }

    /// Append `name` to the string table and return its offset.
    fn add_name(&mut self, name: &str) -> usize {
        let offset = self.section_names.len();
        self.section_names.extend_from_slice(name.as_bytes());
        self.section_names.push(0);
        self.names_grown = true;
        offset
    }

    /// Make sure there is a null section and a section name string table.
    fn ensure_string_table(&mut self) {
        if self.section_headers.is_empty() {
            debug!("image has no section header table, creating one");
            self.section_headers.push(empty_section_header());
        }
        if self.shstrndx.is_some() {
            return;
        }

        debug!("image has no section name table, creating {SHSTRTAB_NAME}");
        if self.section_names.is_empty() {
            self.section_names.push(0);
        }
        let sh_name = self.add_name(SHSTRTAB_NAME);
        let idx = self.section_headers.len();
        self.section_headers.push(SectionHeader {
            sh_name,
            sh_type: SHT_STRTAB,
            sh_addralign: 1,
            ..empty_section_header()
        });
        self.shstrndx = Some(idx);
    }

    /// Check whether a section with this name exists.
    pub fn has_section(&self, name: &str) -> bool {
        self.find_section_index(name).is_some()
    }

    /// Set the contents of section `name`, creating it if needed.
    ///
    /// Returns `false`, leaving the writer untouched, when the section exists
    /// and `overwrite` is not set.
    pub fn write_section(&mut self, name: &str, contents: &[u8], overwrite: bool) -> Result<bool> {
        if name.is_empty() || name.contains('\0') {
            return Err(Error::malformed(format!("invalid ELF section name {name:?}")));
        }

        if let Some(idx) = self.find_section_index(name) {
            if !overwrite {
                debug!("section {name} already exists");
                return Ok(false);
            }
            if Some(idx) == self.shstrndx {
                return Err(Error::malformed("refusing to overwrite the section name table"));
            }
            debug!("replacing contents of section {name} (index {idx})");
            self.contents.insert(idx, contents.to_vec());
            return Ok(true);
        }

        self.ensure_string_table();
        let sh_name = self.add_name(name);
        let idx = self.section_headers.len();
        debug!("adding section {name} at index {idx}");
        self.section_headers.push(SectionHeader {
            sh_name,
            sh_type: SHT_PROGBITS,
            sh_addralign: 1,
            ..empty_section_header()
        });
        self.contents.insert(idx, contents.to_vec());
        Ok(true)
    }

    /// Round up to alignment
    fn round_up(value: usize, alignment: usize) -> usize {
        if alignment == 0 {
            return value;
        }
        (value + alignment - 1) & !(alignment - 1)
    }

    /// Pad `output` to `alignment` and append `bytes`, returning their offset.
    fn append_aligned(output: &mut Vec<u8>, bytes: &[u8], alignment: usize) -> usize {
        let offset = Self::round_up(output.len(), alignment);
        output.resize(offset, 0);
        output.extend_from_slice(bytes);
        offset
    }

    /// Lay out the modified ELF file.
    pub fn build(&mut self) -> Result<Vec<u8>> {
        let mut output = self.data.to_vec();

        // Section contents first: in place when they fit, appended otherwise
        let contents = core::mem::take(&mut self.contents);
        for (&idx, content) in &contents {
            let is_original = idx < self.original_section_count;
            let shdr = &mut self.section_headers[idx];
            let old_offset = shdr.sh_offset as usize;
            let old_size = shdr.sh_size as usize;

            if is_original && shdr.sh_type != SHT_NOBITS && content.len() <= old_size {
                let end = old_offset
                    .checked_add(old_size)
                    .filter(|&end| end <= output.len())
                    .ok_or_else(|| Error::malformed("section extends beyond file size"))?;
                trace!("rewriting section {idx} in place at {old_offset:#x}");
                output[old_offset..old_offset + content.len()].copy_from_slice(content);
                output[old_offset + content.len()..end].fill(0);
            } else {
                let offset = Self::append_aligned(&mut output, content, DATA_ALIGNMENT);
                trace!("placing section {idx} at {offset:#x} ({} bytes)", content.len());
                shdr.sh_offset = offset as u64;
                if shdr.sh_type == SHT_NOBITS {
                    shdr.sh_type = SHT_PROGBITS;
                }
                if shdr.sh_addralign == 0 {
                    shdr.sh_addralign = 1;
                }
            }
            shdr.sh_size = content.len() as u64;
        }
        self.contents = contents;

        if self.names_grown {
            let strtab_idx = self
                .shstrndx
                .ok_or_else(|| Error::malformed("names added without a string table"))?;
            let offset = Self::append_aligned(&mut output, &self.section_names, 1);
            debug!("section name table moved to {offset:#x}");
            let shdr = &mut self.section_headers[strtab_idx];
            shdr.sh_offset = offset as u64;
            shdr.sh_size = self.section_names.len() as u64;
        }

        self.update_header_counts();

        let sh_size = SectionHeader::size_with(&self.ctx);
        let table_grew = self.section_headers.len() != self.original_section_count;
        let sht_offset = if table_grew {
            let offset = Self::round_up(output.len(), TABLE_ALIGNMENT);
            output.resize(offset + self.section_headers.len() * sh_size, 0);
            debug!("section header table moved to {offset:#x}");
            offset
        } else {
            self.header.e_shoff as usize
        };
        self.header.e_shoff = sht_offset as u64;
        self.header.e_shentsize = sh_size as u16;

        // Write section headers
        for (idx, shdr) in self.section_headers.iter().enumerate() {
            let offset = sht_offset + idx * sh_size;
            if offset + sh_size > output.len() {
                return Err(Error::malformed("section header table extends beyond file size"));
            }
            shdr.clone().try_into_ctx(&mut output[offset..], self.ctx)?;
        }

        // Write ELF header
        self.header.try_into_ctx(&mut output[..], self.ctx.le)?;

        Ok(output)
    }

    /// Store section count and string table index, using the extended forms
    /// when they do not fit the header fields.
    fn update_header_counts(&mut self) {
        let count = self.section_headers.len();
        if count >= SHN_LORESERVE {
            self.header.e_shnum = 0;
            self.section_headers[0].sh_size = count as u64;
        } else {
            self.header.e_shnum = count as u16;
            if let Some(null) = self.section_headers.first_mut() {
                null.sh_size = 0;
            }
        }

        match self.shstrndx {
            Some(idx) if idx >= SHN_LORESERVE => {
                self.header.e_shstrndx = SHN_XINDEX;
                self.section_headers[0].sh_link = idx as u32;
            }
            Some(idx) => {
                self.header.e_shstrndx = idx as u16;
                if let Some(null) = self.section_headers.first_mut() {
                    null.sh_link = 0;
                }
            }
            None => self.header.e_shstrndx = 0,
        }
    }
}

/// A zeroed section header
fn empty_section_header() -> SectionHeader {
    SectionHeader {
        sh_name: 0,
        sh_type: 0,
        sh_flags: 0,
        sh_addr: 0,
        sh_offset: 0,
        sh_size: 0,
        sh_link: 0,
        sh_info: 0,
        sh_addralign: 0,
        sh_entsize: 0,
    }
}

/// Add or overwrite section `name` in the ELF image.
///
/// With `overwrite` unset, an existing section yields
/// [`Injection::AlreadyExists`] and no image.
pub fn inject_elf(image: &[u8], name: &str, data: &[u8], overwrite: bool) -> Result<Injection> {
    let mut writer = ElfWriter::parse(image)?;
    if !writer.write_section(name, data, overwrite)? {
        return Ok(Injection::AlreadyExists(ResourceId::Elf {
            section: name.to_string(),
        }));
    }
    Ok(Injection::Injected(writer.build()?))
}

/// Return the contents of section `name`, if present.
pub fn find_section<'a>(image: &'a [u8], name: &str) -> Result<Option<&'a [u8]>> {
    let elf = Elf::parse(image)?;
    let Some(shdr) = elf
        .section_headers
        .iter()
        .skip(1)
        .find(|shdr| elf.shdr_strtab.get_at(shdr.sh_name) == Some(name))
    else {
        return Ok(None);
    };
    if shdr.sh_type == SHT_NOBITS {
        return Ok(Some(&[]));
    }

    let start = shdr.sh_offset as usize;
    let end = start
        .checked_add(shdr.sh_size as usize)
        .filter(|&end| end <= image.len())
        .ok_or_else(|| Error::malformed(format!("section {name} extends beyond file size")))?;
    Ok(Some(&image[start..end]))
}
