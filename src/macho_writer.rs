//! Mach-O section injection.
//!
//! Resources live in a section of a dedicated segment (`__POSTJECT` by
//! default). Thin and fat (universal) images are supported; for fat images
//! every slice receives the section.
//!
//! # Layout
//!
//! A typical executable looks like this, in file and in memory:
//!
//! ```text
//! +-------------------+
//! | header + commands |  __TEXT starts at file offset 0
//! | __TEXT            |
//! | __DATA_CONST      |
//! | __DATA            |
//! +-------------------+  <- new segment goes here
//! | __LINKEDIT        |  symbol tables, fixups, signature
//! +-------------------+
//! ```
//!
//! A new segment is inserted right before `__LINKEDIT` in both file and
//! address space. `__LINKEDIT` moves up by a page-aligned delta and every
//! offset into it is adjusted. Only `__LINKEDIT` may follow the point where
//! data is inserted; moving any other segment would invalidate absolute
//! addresses in code.
//!
//! Any change invalidates the code signature, so `LC_CODE_SIGNATURE` is
//! removed. Re-signing is left to the caller.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use goblin::container::Container;
use goblin::mach::cputype::CPU_TYPE_ARM64;
use goblin::mach::header::Header;
use goblin::mach::load_command::{
    LC_CODE_SIGNATURE, LC_DYSYMTAB, LC_SEGMENT, LC_SEGMENT_64, LC_SYMTAB,
};
use goblin::mach::parse_magic_and_ctx;
use log::{debug, trace};
use scroll::ctx::SizeWith;
use scroll::{Endian, Pread, Pwrite, BE, LE};

use crate::error::{Error, Result};
use crate::{Injection, ResourceId};

/// Commands whose payload is a single `linkedit_data_command`
mod linkedit_commands {
    pub const LC_SEGMENT_SPLIT_INFO: u32 = 0x1e;
    pub const LC_FUNCTION_STARTS: u32 = 0x26;
    pub const LC_DATA_IN_CODE: u32 = 0x29;
    pub const LC_DYLIB_CODE_SIGN_DRS: u32 = 0x2b;
    pub const LC_LINKER_OPTIMIZATION_HINT: u32 = 0x2e;
    pub const LC_DYLD_EXPORTS_TRIE: u32 = 0x8000_0033;
    pub const LC_DYLD_CHAINED_FIXUPS: u32 = 0x8000_0034;
    pub const LC_ATOM_INFO: u32 = 0x36;
}
use linkedit_commands::*;

const LC_TWOLEVEL_HINTS: u32 = 0x16;
const LC_DYLD_INFO: u32 = 0x22;
const LC_DYLD_INFO_ONLY: u32 = 0x8000_0022;
const LC_NOTE: u32 = 0x31;

const FAT_MAGIC: u32 = 0xcafe_babe;
const FAT_CIGAM: u32 = 0xbeba_feca;
const FAT_MAGIC_64: u32 = 0xcafe_babf;
const FAT_CIGAM_64: u32 = 0xbfba_feca;
const FAT_HEADER_SIZE: usize = 8;
const FAT_ARCH_SIZE: usize = 20;
const FAT_ARCH_64_SIZE: usize = 32;

/// Size of segment and section name fields
pub const NAME_LENGTH: usize = 16;
const VM_PROT_READ: u32 = 0x1;
const SECTION_TYPE_MASK: u32 = 0xff;
const S_ZEROFILL: u32 = 0x1;
const S_GB_ZEROFILL: u32 = 0xc;
const S_THREAD_LOCAL_ZEROFILL: u32 = 0x12;
/// Minimum alignment of section data placed by this writer
const SECTION_DATA_ALIGNMENT: u64 = 16;

const LINKEDIT: &str = "__LINKEDIT";

/// Field offsets of `segment_command(_64)` and `section(_64)`
#[derive(Debug, Clone, Copy)]
struct SegmentFields {
    is_64: bool,
    command_size: usize,
    section_size: usize,
    vmaddr: usize,
    vmsize: usize,
    fileoff: usize,
    filesize: usize,
    maxprot: usize,
    initprot: usize,
    nsects: usize,
    sect_addr: usize,
    sect_size: usize,
    sect_offset: usize,
    sect_align: usize,
    sect_flags: usize,
}

const SEGMENT_64: SegmentFields = SegmentFields {
    is_64: true,
    command_size: 72,
    section_size: 80,
    vmaddr: 24,
    vmsize: 32,
    fileoff: 40,
    filesize: 48,
    maxprot: 56,
    initprot: 60,
    nsects: 64,
    sect_addr: 32,
    sect_size: 40,
    sect_offset: 48,
    sect_align: 52,
    sect_flags: 64,
};

const SEGMENT_32: SegmentFields = SegmentFields {
    is_64: false,
    command_size: 56,
    section_size: 68,
    vmaddr: 24,
    vmsize: 28,
    fileoff: 32,
    filesize: 36,
    maxprot: 40,
    initprot: 44,
    nsects: 48,
    sect_addr: 32,
    sect_size: 36,
    sect_offset: 40,
    sect_align: 44,
    sect_flags: 56,
};

/// A load command and its raw bytes
#[derive(Debug, Clone)]
struct LoadCommand {
    cmd: u32,
    bytes: Vec<u8>,
}

/// Parse a segment or section name from its 16-byte field
fn parse_segment_name(bytes: &[u8]) -> &str {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    core::str::from_utf8(&bytes[..end]).unwrap_or("")
}

/// Encode a name into a 16-byte field
fn name_field(name: &str) -> Result<[u8; NAME_LENGTH]> {
    let bytes = name.as_bytes();
    if bytes.len() > NAME_LENGTH {
        return Err(Error::NameTooLong {
            name: name.to_string(),
            len: bytes.len(),
            max: NAME_LENGTH,
        });
    }
    let mut field = [0u8; NAME_LENGTH];
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(field)
}

/// Round up to alignment
fn round_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    (value + alignment - 1) & !(alignment - 1)
}

/// Endianness and field offsets of one image
#[derive(Debug, Clone, Copy)]
struct Layout {
    le: Endian,
    fields: SegmentFields,
}

impl Layout {
    /// Read a pointer-sized field
    fn word(&self, bytes: &[u8], offset: usize) -> Result<u64> {
        Ok(if self.fields.is_64 {
            bytes.pread_with::<u64>(offset, self.le)?
        } else {
            bytes.pread_with::<u32>(offset, self.le)? as u64
        })
    }

    /// Write a pointer-sized field
    fn set_word(&self, bytes: &mut [u8], offset: usize, value: u64) -> Result<()> {
        if self.fields.is_64 {
            bytes.pwrite_with(value, offset, self.le)?;
        } else {
            let value = u32::try_from(value)
                .map_err(|_| Error::malformed(format!("{value:#x} does not fit a 32-bit image")))?;
            bytes.pwrite_with(value, offset, self.le)?;
        }
        Ok(())
    }

    fn u32_at(&self, bytes: &[u8], offset: usize) -> Result<u32> {
        Ok(bytes.pread_with(offset, self.le)?)
    }

    fn set_u32(&self, bytes: &mut [u8], offset: usize, value: u64) -> Result<()> {
        let value =
            u32::try_from(value).map_err(|_| Error::malformed("file offset overflows 32 bits"))?;
        bytes.pwrite_with(value, offset, self.le)?;
        Ok(())
    }

    /// Add `delta` to a 32-bit file offset at or past `point`
    fn shift_offset(&self, bytes: &mut [u8], offset: usize, point: u64, delta: u64) -> Result<()> {
        let value = self.u32_at(bytes, offset)? as u64;
        if value != 0 && value >= point {
            self.set_u32(bytes, offset, value + delta)?;
        }
        Ok(())
    }

    fn segment_cmd(&self) -> u32 {
        if self.fields.is_64 {
            LC_SEGMENT_64
        } else {
            LC_SEGMENT
        }
    }

    /// Offsets of every section header inside a segment command
    fn section_offsets(&self, command: &[u8]) -> Result<Vec<usize>> {
        let nsects = self.u32_at(command, self.fields.nsects)? as usize;
        let start = self.fields.command_size;
        if start + nsects * self.fields.section_size > command.len() {
            return Err(Error::malformed(format!(
                "segment {} declares {nsects} sections beyond its command size",
                parse_segment_name(&command[8..8 + NAME_LENGTH])
            )));
        }
        Ok((0..nsects)
            .map(|i| start + i * self.fields.section_size)
            .collect())
    }

    /// Build a section header
    fn section_header(
        &self,
        segment: &[u8; NAME_LENGTH],
        section: &[u8; NAME_LENGTH],
        addr: u64,
        size: u64,
        offset: u64,
    ) -> Result<Vec<u8>> {
        let mut bytes = alloc::vec![0u8; self.fields.section_size];
        bytes[..NAME_LENGTH].copy_from_slice(section);
        bytes[NAME_LENGTH..2 * NAME_LENGTH].copy_from_slice(segment);
        self.set_word(&mut bytes, self.fields.sect_addr, addr)?;
        self.set_word(&mut bytes, self.fields.sect_size, size)?;
        self.set_u32(&mut bytes, self.fields.sect_offset, offset)?;
        Ok(bytes)
    }
}

impl LoadCommand {
    fn segment_name(&self) -> &str {
        self.bytes
            .get(8..8 + NAME_LENGTH)
            .map(parse_segment_name)
            .unwrap_or("")
    }
}

/// Position of a section inside the command list
#[derive(Debug, Clone, Copy)]
struct SectionRef {
    command: usize,
    /// Byte offset of the section header within the command
    offset: usize,
}

/// A builder that adds or replaces sections in a thin Mach-O image.
///
/// Load commands are edited in memory and only written back by
/// [`build`](Self::build), which also checks that they still fit in front
/// of the first section.
#[derive(Debug)]
pub struct MachOWriter {
    /// The image being edited
    data: Vec<u8>,
    layout: Layout,
    header_size: usize,
    /// Size of the load command area in the original image
    original_sizeofcmds: usize,
    /// Load commands must end at or before this offset
    command_limit: usize,
    /// Segment size granularity
    page_size: u64,
    commands: Vec<LoadCommand>,
}

impl MachOWriter {
    /// Parse a thin Mach-O image.
    pub fn new(data: Vec<u8>) -> Result<Self> {
        let (_, ctx) = parse_magic_and_ctx(&data, 0)?;
        let ctx = ctx.ok_or_else(|| Error::malformed("not a thin Mach-O image"))?;
        let header: Header = data.pread_with(0, ctx)?;
        let header_size = Header::size_with(&ctx);
        let fields = if ctx.container == Container::Big {
            SEGMENT_64
        } else {
            SEGMENT_32
        };

        let mut commands = Vec::with_capacity(header.ncmds.min(data.len() / 8));
        let mut offset = header_size;
        let commands_end = header_size + header.sizeofcmds as usize;
        for _ in 0..header.ncmds {
            let cmd: u32 = data.pread_with(offset, ctx.le)?;
            let cmdsize = data.pread_with::<u32>(offset + 4, ctx.le)? as usize;
            if cmdsize < 8 || offset + cmdsize > commands_end || offset + cmdsize > data.len() {
                return Err(Error::malformed(format!(
                    "load command at {offset:#x} has invalid size {cmdsize}"
                )));
            }
            commands.push(LoadCommand {
                cmd,
                bytes: data[offset..offset + cmdsize].to_vec(),
            });
            offset += cmdsize;
        }

        let page_size = if header.cputype == CPU_TYPE_ARM64 {
            0x4000
        } else {
            0x1000
        };

        let mut writer = MachOWriter {
            data,
            layout: Layout { le: ctx.le, fields },
            header_size,
            original_sizeofcmds: header.sizeofcmds as usize,
            command_limit: 0,
            page_size,
            commands,
        };
        writer.command_limit = writer.first_data_offset()?;
        trace!(
            "load commands end at {commands_end:#x}, limit {:#x}",
            writer.command_limit
        );
        Ok(writer)
    }

    fn is_segment(&self, command: &LoadCommand) -> bool {
        command.cmd == self.layout.segment_cmd()
    }

    fn find_segment(&self, name: &str) -> Option<usize> {
        self.commands
            .iter()
            .position(|c| self.is_segment(c) && c.segment_name() == name)
    }

    fn find_section(&self, segment: &str, section: &str) -> Result<Option<SectionRef>> {
        let Some(command) = self.find_segment(segment) else {
            return Ok(None);
        };
        let bytes = &self.commands[command].bytes;
        for offset in self.layout.section_offsets(bytes)? {
            if parse_segment_name(&bytes[offset..offset + NAME_LENGTH]) == section {
                return Ok(Some(SectionRef { command, offset }));
            }
        }
        Ok(None)
    }

    fn is_zerofill(flags: u32) -> bool {
        matches!(
            flags & SECTION_TYPE_MASK,
            S_ZEROFILL | S_GB_ZEROFILL | S_THREAD_LOCAL_ZEROFILL
        )
    }

    /// Lowest file offset holding section or segment data, which bounds the
    /// load command area.
    fn first_data_offset(&self) -> Result<usize> {
        let layout = self.layout;
        let fields = layout.fields;
        let mut first = self.data.len() as u64;
        for command in self.commands.iter().filter(|c| self.is_segment(c)) {
            let bytes = &command.bytes;
            let sections = layout.section_offsets(bytes)?;
            if sections.is_empty() {
                let fileoff = layout.word(bytes, fields.fileoff)?;
                if fileoff > 0 && layout.word(bytes, fields.filesize)? > 0 {
                    first = first.min(fileoff);
                }
                continue;
            }
            for offset in sections {
                let sect = &bytes[offset..];
                let flags = layout.u32_at(sect, fields.sect_flags)?;
                let sect_offset = layout.u32_at(sect, fields.sect_offset)? as u64;
                let size = layout.word(sect, fields.sect_size)?;
                if sect_offset > 0 && size > 0 && !Self::is_zerofill(flags) {
                    first = first.min(sect_offset);
                }
            }
        }
        Ok(first as usize)
    }

    /// Check whether `segment` contains `section`.
    pub fn has_section(&self, segment: &str, section: &str) -> Result<bool> {
        Ok(self.find_section(segment, section)?.is_some())
    }

    /// Remove `LC_CODE_SIGNATURE`. A signature at the end of the file is
    /// truncated away and `__LINKEDIT` shrinks to match.
    pub fn remove_code_signature(&mut self) -> Result<()> {
        let layout = self.layout;
        let Some(idx) = self.commands.iter().position(|c| c.cmd == LC_CODE_SIGNATURE) else {
            return Ok(());
        };
        let command = self.commands.remove(idx);
        let dataoff = layout.u32_at(&command.bytes, 8)? as usize;
        let datasize = layout.u32_at(&command.bytes, 12)? as usize;
        debug!("removing code signature ({datasize} bytes at {dataoff:#x})");

        if dataoff == 0 || dataoff + datasize < self.data.len() {
            return Ok(());
        }
        self.data.truncate(dataoff);

        if let Some(linkedit) = self.find_segment(LINKEDIT) {
            let bytes = &mut self.commands[linkedit].bytes;
            let fileoff = layout.word(bytes, layout.fields.fileoff)?;
            let filesize = layout.word(bytes, layout.fields.filesize)?;
            if fileoff + filesize > dataoff as u64 {
                let trimmed = (dataoff as u64).saturating_sub(fileoff);
                layout.set_word(bytes, layout.fields.filesize, trimmed)?;
            }
        }
        Ok(())
    }

    /// Move everything at or past `file_point` (in the file) and `vm_point`
    /// (in memory) by `delta`, except the segment at index `skip`.
    ///
    /// Only `__LINKEDIT` may be in the way.
    fn shift(&mut self, file_point: u64, vm_point: u64, delta: u64, skip: Option<usize>) -> Result<()> {
        let layout = self.layout;
        let fields = layout.fields;
        for (idx, command) in self.commands.iter_mut().enumerate() {
            if Some(idx) == skip {
                continue;
            }
            let bytes = &mut command.bytes;
            match command.cmd {
                LC_SEGMENT | LC_SEGMENT_64 => {
                    let fileoff = layout.word(bytes, fields.fileoff)?;
                    let filesize = layout.word(bytes, fields.filesize)?;
                    let vmaddr = layout.word(bytes, fields.vmaddr)?;
                    let vmsize = layout.word(bytes, fields.vmsize)?;
                    let moves_file = filesize > 0 && fileoff >= file_point;
                    let moves_vm = vmsize > 0 && vmaddr >= vm_point;
                    if !moves_file && !moves_vm {
                        continue;
                    }

                    let name = parse_segment_name(&bytes[8..8 + NAME_LENGTH]);
                    if name != LINKEDIT {
                        return Err(Error::UnsupportedLayout(format!(
                            "segment {name} follows the insertion point and cannot move"
                        )));
                    }
                    trace!("moving {LINKEDIT} by {delta:#x}");
                    if moves_file {
                        layout.set_word(bytes, fields.fileoff, fileoff + delta)?;
                    }
                    if moves_vm {
                        layout.set_word(bytes, fields.vmaddr, vmaddr + delta)?;
                    }
                    for offset in layout.section_offsets(bytes)? {
                        let sect = &mut bytes[offset..];
                        let addr = layout.word(sect, fields.sect_addr)?;
                        if moves_vm && addr >= vm_point {
                            layout.set_word(sect, fields.sect_addr, addr + delta)?;
                        }
                        layout.shift_offset(sect, fields.sect_offset, file_point, delta)?;
                    }
                }
                LC_SYMTAB => {
                    // symoff, stroff
                    layout.shift_offset(bytes, 8, file_point, delta)?;
                    layout.shift_offset(bytes, 16, file_point, delta)?;
                }
                LC_DYSYMTAB => {
                    // tocoff, modtaboff, extrefsymoff, indirectsymoff, extreloff, locreloff
                    for offset in [32, 40, 48, 56, 64, 72] {
                        layout.shift_offset(bytes, offset, file_point, delta)?;
                    }
                }
                LC_DYLD_INFO | LC_DYLD_INFO_ONLY => {
                    // rebase, bind, weak bind, lazy bind, export
                    for offset in [8, 16, 24, 32, 40] {
                        layout.shift_offset(bytes, offset, file_point, delta)?;
                    }
                }
                LC_CODE_SIGNATURE
                | LC_SEGMENT_SPLIT_INFO
                | LC_FUNCTION_STARTS
                | LC_DATA_IN_CODE
                | LC_DYLIB_CODE_SIGN_DRS
                | LC_LINKER_OPTIMIZATION_HINT
                | LC_DYLD_EXPORTS_TRIE
                | LC_DYLD_CHAINED_FIXUPS
                | LC_ATOM_INFO
                | LC_TWOLEVEL_HINTS => {
                    layout.shift_offset(bytes, 8, file_point, delta)?;
                }
                LC_NOTE => {
                    let offset: u64 = bytes.pread_with(24, layout.le)?;
                    if offset != 0 && offset >= file_point {
                        bytes.pwrite_with(offset + delta, 24, layout.le)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Insert `len` zero bytes at `offset`
    fn insert_gap(&mut self, offset: usize, len: usize) {
        if offset > self.data.len() {
            self.data.resize(offset, 0);
        }
        let tail = self.data.split_off(offset);
        self.data.resize(offset + len, 0);
        self.data.extend_from_slice(&tail);
    }

    /// Insert a new read-only segment holding one section before
    /// `__LINKEDIT`, or at the end when there is none.
    fn add_segment(&mut self, segment: &str, section: &str, contents: &[u8]) -> Result<()> {
        let layout = self.layout;
        let fields = layout.fields;
        let segname = name_field(segment)?;
        let sectname = name_field(section)?;
        let size = round_up((contents.len() as u64).max(1), self.page_size);

        let (index, fileoff, vmaddr) = match self.find_segment(LINKEDIT) {
            Some(linkedit) => {
                let bytes = &self.commands[linkedit].bytes;
                let fileoff = layout.word(bytes, fields.fileoff)?;
                let vmaddr = layout.word(bytes, fields.vmaddr)?;
                debug!("inserting segment {segment} at {fileoff:#x} before {LINKEDIT}");
                self.shift(fileoff, vmaddr, size, None)?;
                self.insert_gap(fileoff as usize, size as usize);
                (linkedit, fileoff, vmaddr)
            }
            None => {
                let mut vm_end = 0;
                for command in self.commands.iter().filter(|c| self.is_segment(c)) {
                    let end = layout.word(&command.bytes, fields.vmaddr)?
                        + layout.word(&command.bytes, fields.vmsize)?;
                    vm_end = vm_end.max(end);
                }
                let fileoff = round_up(self.data.len() as u64, self.page_size);
                let vmaddr = round_up(vm_end, self.page_size);
                debug!("appending segment {segment} at {fileoff:#x}");
                self.data.resize((fileoff + size) as usize, 0);
                (self.commands.len(), fileoff, vmaddr)
            }
        };

        let start = fileoff as usize;
        self.data[start..start + contents.len()].copy_from_slice(contents);

        let cmd = layout.segment_cmd();
        let mut bytes = alloc::vec![0u8; fields.command_size];
        bytes.pwrite_with(cmd, 0, layout.le)?;
        bytes.pwrite_with((fields.command_size + fields.section_size) as u32, 4, layout.le)?;
        bytes[8..8 + NAME_LENGTH].copy_from_slice(&segname);
        layout.set_word(&mut bytes, fields.vmaddr, vmaddr)?;
        layout.set_word(&mut bytes, fields.vmsize, size)?;
        layout.set_word(&mut bytes, fields.fileoff, fileoff)?;
        layout.set_word(&mut bytes, fields.filesize, size)?;
        bytes.pwrite_with(VM_PROT_READ, fields.maxprot, layout.le)?;
        bytes.pwrite_with(VM_PROT_READ, fields.initprot, layout.le)?;
        bytes.pwrite_with(1u32, fields.nsects, layout.le)?;
        bytes.extend(layout.section_header(
            &segname,
            &sectname,
            vmaddr,
            contents.len() as u64,
            fileoff,
        )?);

        self.commands.insert(index, LoadCommand { cmd, bytes });
        Ok(())
    }

    /// Place `contents` after the existing section data of segment `command`,
    /// growing the segment when it is too small. Returns the file offset and
    /// address of the placed bytes.
    fn append_to_segment(
        &mut self,
        command: usize,
        contents: &[u8],
        alignment: u64,
    ) -> Result<(u64, u64)> {
        let layout = self.layout;
        let fields = layout.fields;
        let bytes = &self.commands[command].bytes;
        let fileoff = layout.word(bytes, fields.fileoff)?;
        let filesize = layout.word(bytes, fields.filesize)?;
        let vmaddr = layout.word(bytes, fields.vmaddr)?;
        let vmsize = layout.word(bytes, fields.vmsize)?;

        // Without section headers nothing says which bytes are free, so the
        // whole file range counts as used.
        let mut data_end = None;
        for offset in layout.section_offsets(bytes)? {
            let sect = &bytes[offset..];
            let sect_offset = layout.u32_at(sect, fields.sect_offset)? as u64;
            let flags = layout.u32_at(sect, fields.sect_flags)?;
            if sect_offset != 0 && !Self::is_zerofill(flags) {
                let end = sect_offset + layout.word(sect, fields.sect_size)?;
                data_end = Some(data_end.map_or(end, |current: u64| current.max(end)));
            }
        }
        let data_end = data_end.unwrap_or(fileoff + filesize).max(fileoff);
        let placed = round_up(data_end, alignment.max(SECTION_DATA_ALIGNMENT));
        let required = placed + contents.len() as u64 - fileoff;

        if required > filesize {
            let delta = round_up(required - filesize, self.page_size);
            debug!(
                "growing segment {} by {delta:#x}",
                self.commands[command].segment_name()
            );
            let file_point = fileoff + filesize;
            self.shift(file_point, vmaddr + vmsize.max(filesize), delta, Some(command))?;
            let bytes = &mut self.commands[command].bytes;
            layout.set_word(bytes, fields.filesize, filesize + delta)?;
            layout.set_word(bytes, fields.vmsize, vmsize.max(filesize) + delta)?;
            self.insert_gap(file_point as usize, delta as usize);
        }

        let start = placed as usize;
        let region = self
            .data
            .get_mut(start..start + contents.len())
            .ok_or_else(|| Error::malformed("segment extends beyond file size"))?;
        region.copy_from_slice(contents);
        Ok((placed, vmaddr + (placed - fileoff)))
    }

    /// Set the contents of `section` in `segment`, creating either as needed.
    ///
    /// Returns `false`, leaving the image untouched, when the section exists
    /// and `overwrite` is not set.
    pub fn write_section(
        &mut self,
        segment: &str,
        section: &str,
        contents: &[u8],
        overwrite: bool,
    ) -> Result<bool> {
        let segname = name_field(segment)?;
        let sectname = name_field(section)?;
        if segment == LINKEDIT {
            return Err(Error::UnsupportedLayout(format!(
                "cannot place a section in {LINKEDIT}"
            )));
        }
        if self.has_section(segment, section)? {
            if !overwrite {
                debug!("section {segment},{section} already exists");
                return Ok(false);
            }
            self.remove_code_signature()?;
            let found = self
                .find_section(segment, section)?
                .ok_or_else(|| Error::malformed(format!("section {segment},{section} vanished")))?;
            self.replace_section(found, contents)?;
            return Ok(true);
        }

        self.remove_code_signature()?;
        let Some(command) = self.find_segment(segment) else {
            self.add_segment(segment, section, contents)?;
            return Ok(true);
        };

        debug!("adding section {section} to segment {segment}");
        let layout = self.layout;
        let fields = layout.fields;
        let (offset, addr) = self.append_to_segment(command, contents, 1)?;
        let header =
            layout.section_header(&segname, &sectname, addr, contents.len() as u64, offset)?;

        let bytes = &mut self.commands[command].bytes;
        let nsects = layout.u32_at(bytes, fields.nsects)?;
        let insert_at = fields.command_size + nsects as usize * fields.section_size;
        let tail = bytes.split_off(insert_at);
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&tail);
        bytes.pwrite_with(nsects + 1, fields.nsects, layout.le)?;
        let cmdsize = bytes.len() as u32;
        bytes.pwrite_with(cmdsize, 4, layout.le)?;
        Ok(true)
    }

    /// Replace the contents of an existing section. Data that fits stays
    /// where it is; larger data moves behind the segment's other sections.
    fn replace_section(&mut self, found: SectionRef, contents: &[u8]) -> Result<()> {
        let layout = self.layout;
        let fields = layout.fields;
        let sect = &self.commands[found.command].bytes[found.offset..];
        let old_offset = layout.u32_at(sect, fields.sect_offset)? as usize;
        let old_size = layout.word(sect, fields.sect_size)? as usize;
        let flags = layout.u32_at(sect, fields.sect_flags)?;
        let align = layout.u32_at(sect, fields.sect_align)?.min(15);

        if old_offset != 0 && !Self::is_zerofill(flags) && contents.len() <= old_size {
            let region = self
                .data
                .get_mut(old_offset..old_offset + old_size)
                .ok_or_else(|| Error::malformed("section extends beyond file size"))?;
            trace!("rewriting section in place at {old_offset:#x}");
            region[..contents.len()].copy_from_slice(contents);
            region[contents.len()..].fill(0);
        } else {
            let (offset, addr) = self.append_to_segment(found.command, contents, 1 << align)?;
            trace!("moving section to {offset:#x}");
            let sect = &mut self.commands[found.command].bytes[found.offset..];
            layout.set_u32(sect, fields.sect_offset, offset)?;
            layout.set_word(sect, fields.sect_addr, addr)?;
        }

        let sect = &mut self.commands[found.command].bytes[found.offset..];
        layout.set_word(sect, fields.sect_size, contents.len() as u64)
    }

    /// Write the load commands back and return the finished image.
    pub fn build(mut self) -> Result<Vec<u8>> {
        let sizeofcmds: usize = self.commands.iter().map(|c| c.bytes.len()).sum();
        if self.header_size + sizeofcmds > self.command_limit {
            return Err(Error::InsufficientHeaderSpace {
                needed: sizeofcmds.saturating_sub(self.original_sizeofcmds),
                available: self
                    .command_limit
                    .saturating_sub(self.header_size + self.original_sizeofcmds),
            });
        }

        let cleared = self.header_size + sizeofcmds.max(self.original_sizeofcmds);
        let area = self
            .data
            .get_mut(self.header_size..cleared)
            .ok_or_else(|| Error::malformed("load commands extend beyond file size"))?;
        area.fill(0);
        let mut offset = self.header_size;
        for command in &self.commands {
            self.data[offset..offset + command.bytes.len()].copy_from_slice(&command.bytes);
            offset += command.bytes.len();
        }
        let le = self.layout.le;
        self.data.pwrite_with(self.commands.len() as u32, 16, le)?;
        self.data.pwrite_with(sizeofcmds as u32, 20, le)?;
        Ok(self.data)
    }
}

// =============================================================================
// Fat binaries
// =============================================================================

/// One entry of a fat header's architecture table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FatArch {
    offset: u64,
    size: u64,
    align: u32,
}

/// Parsed fat header
#[derive(Debug, Clone)]
struct FatHeader {
    endian: Endian,
    is_64: bool,
    arches: Vec<FatArch>,
}

impl FatHeader {
    fn parse(data: &[u8]) -> Result<Option<Self>> {
        let (endian, is_64) = match data.pread_with::<u32>(0, BE)? {
            FAT_MAGIC => (BE, false),
            FAT_MAGIC_64 => (BE, true),
            FAT_CIGAM => (LE, false),
            FAT_CIGAM_64 => (LE, true),
            _ => return Ok(None),
        };
        let count = data.pread_with::<u32>(4, endian)? as usize;
        let entry_size = if is_64 { FAT_ARCH_64_SIZE } else { FAT_ARCH_SIZE };

        let mut arches = Vec::with_capacity(count.min(data.len() / entry_size));
        for i in 0..count {
            let entry = FAT_HEADER_SIZE + i * entry_size;
            let arch = if is_64 {
                FatArch {
                    offset: data.pread_with(entry + 8, endian)?,
                    size: data.pread_with(entry + 16, endian)?,
                    align: data.pread_with(entry + 24, endian)?,
                }
            } else {
                FatArch {
                    offset: data.pread_with::<u32>(entry + 8, endian)? as u64,
                    size: data.pread_with::<u32>(entry + 12, endian)? as u64,
                    align: data.pread_with(entry + 16, endian)?,
                }
            };
            if arch.offset.checked_add(arch.size).map_or(true, |end| end > data.len() as u64) {
                return Err(Error::malformed(format!("fat slice {i} extends beyond file size")));
            }
            if arch.align > 31 {
                return Err(Error::malformed(format!("fat slice {i} has alignment 2^{}", arch.align)));
            }
            arches.push(arch);
        }
        Ok(Some(FatHeader { endian, is_64, arches }))
    }

    fn entry_offset(&self, index: usize) -> usize {
        FAT_HEADER_SIZE + index * if self.is_64 { FAT_ARCH_64_SIZE } else { FAT_ARCH_SIZE }
    }
}

/// Rewrite every slice of a fat binary with `modify`, keeping each slice
/// aligned to its `2^align` boundary and updating the architecture table.
pub fn modify_fat_binary<F>(data: &[u8], mut modify: F) -> Result<Vec<u8>>
where
    F: FnMut(&[u8]) -> Result<Vec<u8>>,
{
    let fat = FatHeader::parse(data)?.ok_or_else(|| Error::malformed("not a fat Mach-O image"))?;
    let first = fat
        .arches
        .iter()
        .map(|a| a.offset as usize)
        .min()
        .unwrap_or(data.len());

    let mut order: Vec<usize> = (0..fat.arches.len()).collect();
    order.sort_by_key(|&i| fat.arches[i].offset);

    let mut output = data[..first].to_vec();
    let mut placed = fat.arches.clone();
    for i in order {
        let arch = fat.arches[i];
        let slice = &data[arch.offset as usize..(arch.offset + arch.size) as usize];
        let modified = modify(slice)?;
        let offset = round_up(output.len() as u64, 1u64 << arch.align);
        debug!("fat slice {i}: {:#x} -> {offset:#x}, {} bytes", arch.offset, modified.len());
        output.resize(offset as usize, 0);
        output.extend_from_slice(&modified);
        placed[i].offset = offset;
        placed[i].size = modified.len() as u64;
    }

    for (i, arch) in placed.iter().enumerate() {
        let entry = fat.entry_offset(i);
        if fat.is_64 {
            output.pwrite_with(arch.offset, entry + 8, fat.endian)?;
            output.pwrite_with(arch.size, entry + 16, fat.endian)?;
        } else {
            let offset = u32::try_from(arch.offset)
                .map_err(|_| Error::malformed("fat slice offset overflows 32 bits"))?;
            let size = u32::try_from(arch.size)
                .map_err(|_| Error::malformed("fat slice size overflows 32 bits"))?;
            output.pwrite_with(offset, entry + 8, fat.endian)?;
            output.pwrite_with(size, entry + 12, fat.endian)?;
        }
    }
    Ok(output)
}

/// The thin images inside `image`: every slice of a fat binary, or the image
/// itself.
pub fn slices(image: &[u8]) -> Result<Vec<&[u8]>> {
    match FatHeader::parse(image)? {
        Some(fat) => Ok(fat
            .arches
            .iter()
            .map(|a| &image[a.offset as usize..(a.offset + a.size) as usize])
            .collect()),
        None => Ok(alloc::vec![image]),
    }
}

/// Add or overwrite `section` in `segment` of a thin or fat Mach-O image.
pub fn inject_macho(
    image: &[u8],
    segment: &str,
    section: &str,
    data: &[u8],
    overwrite: bool,
) -> Result<Injection> {
    name_field(segment)?;
    name_field(section)?;
    let exists = ResourceId::MachO {
        segment: segment.to_string(),
        section: section.to_string(),
    };

    let inject_slice = |slice: &[u8]| -> Result<Option<Vec<u8>>> {
        let mut writer = MachOWriter::new(slice.to_vec())?;
        if !writer.write_section(segment, section, data, overwrite)? {
            return Ok(None);
        }
        writer.build().map(Some)
    };

    if FatHeader::parse(image)?.is_none() {
        return Ok(match inject_slice(image)? {
            Some(output) => Injection::Injected(output),
            None => Injection::AlreadyExists(exists),
        });
    }

    if !overwrite {
        for slice in slices(image)? {
            if MachOWriter::new(slice.to_vec())?.has_section(segment, section)? {
                return Ok(Injection::AlreadyExists(exists));
            }
        }
    }
    let output = modify_fat_binary(image, |slice| {
        inject_slice(slice)?.ok_or_else(|| Error::malformed("section appeared while injecting"))
    })?;
    Ok(Injection::Injected(output))
}

/// Return the contents of `segment,section` in a thin image, if present.
pub fn find_section<'a>(slice: &'a [u8], segment: &str, section: &str) -> Result<Option<&'a [u8]>> {
    let macho = goblin::mach::MachO::parse(slice, 0)?;
    for seg in &macho.segments {
        if seg.name()? != segment {
            continue;
        }
        for (sect, bytes) in seg.sections()? {
            if sect.name()? == section {
                return Ok(Some(bytes));
            }
        }
    }
    Ok(None)
}

/// Names of every section, as `(segment, section)` pairs, in a thin image.
pub fn section_names(slice: &[u8]) -> Result<Vec<(String, String)>> {
    let macho = goblin::mach::MachO::parse(slice, 0)?;
    let mut names = Vec::new();
    for seg in &macho.segments {
        for (sect, _) in seg.sections()? {
            names.push((sect.segname()?.to_string(), sect.name()?.to_string()));
        }
    }
    Ok(names)
}
