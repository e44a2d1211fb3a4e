//! PE resource injection.
//!
//! Resources are stored in the PE resource directory as `RT_RCDATA` entries.
//! The directory is a three level tree:
//!
//! ```text
//! root
//!  └─ type (RT_RCDATA = 10)
//!      └─ name ("MY_RESOURCE")
//!          └─ language (0 = neutral) → data
//! ```
//!
//! [`editpe`] parses the tree and rebuilds the resource section. On top of
//! it this module applies the naming rules (uppercase names, lookups that
//! ignore case, one language per overwritten entry) and keeps what follows
//! the last section: overlay bytes move behind the rebuilt image, the
//! certificate directory follows them, and a non-zero checksum is
//! recomputed.

use alloc::string::String;
use alloc::vec::Vec;
use editpe::constants::RT_RCDATA as RT_RCDATA_ID;
use editpe::{Image, ResourceData, ResourceDirectory, ResourceEntry, ResourceEntryName, ResourceTable};
use goblin::pe::header::{Header, SIZEOF_COFF_HEADER, SIZEOF_PE_MAGIC};
use goblin::pe::optional_header::MAGIC_64;
use goblin::pe::section_table::SIZEOF_SECTION_TABLE;
use log::{debug, trace};
use scroll::{Pwrite, LE};

use crate::error::{Error, Result};
use crate::{Injection, ResourceId};

/// Resource type for raw application data
pub const RT_RCDATA: u32 = RT_RCDATA_ID as u32;
/// Language ID used for new resources
const LANG_NEUTRAL: u32 = 0;

// Optional header fields at the same offset in PE32 and PE32+
const OPT_CHECKSUM: usize = 64;
const OPT_DIRECTORIES_PE32: usize = 96;
const OPT_DIRECTORIES_PE32_PLUS: usize = 112;
const IMAGE_DIRECTORY_ENTRY_SECURITY: usize = 4;
/// Certificate tables are quadword aligned
const CERTIFICATE_ALIGNMENT: usize = 8;

/// Header facts the rebuild has to carry over
#[derive(Debug, Clone, Copy)]
struct PeLayout {
    /// Offset of the checksum field
    checksum_offset: usize,
    checksum: u32,
    /// Offset of the security data directory entry, if the image has one
    security_directory: Option<usize>,
    /// Certificate table as `(file offset, size)`
    certificate: Option<(usize, usize)>,
    /// End of the last section's raw data; anything after it is overlay
    raw_end: usize,
    /// Free bytes between the section table and `SizeOfHeaders`
    header_room: usize,
    has_resources: bool,
}

impl PeLayout {
    fn parse(data: &[u8]) -> Result<Self> {
        let header = Header::parse(data)?;
        let optional = header
            .optional_header
            .ok_or_else(|| Error::malformed("image has no optional header"))?;

        let opt_offset =
            header.dos_header.pe_pointer as usize + SIZEOF_PE_MAGIC + SIZEOF_COFF_HEADER;
        let section_table = opt_offset + header.coff_header.size_of_optional_header as usize;
        let mut offset = section_table;
        let sections = header.coff_header.sections(data, &mut offset)?;

        let directories = if optional.standard_fields.magic == MAGIC_64 {
            OPT_DIRECTORIES_PE32_PLUS
        } else {
            OPT_DIRECTORIES_PE32
        };
        let security = opt_offset + directories + IMAGE_DIRECTORY_ENTRY_SECURITY * 8;
        let security_directory = (optional.windows_fields.number_of_rva_and_sizes as usize
            > IMAGE_DIRECTORY_ENTRY_SECURITY
            && security + 8 <= section_table)
            .then_some(security);

        let directories = &optional.data_directories;
        let certificate = directories
            .get_certificate_table()
            .filter(|dir| dir.size != 0)
            .map(|dir| (dir.virtual_address as usize, dir.size as usize));

        let raw_end = sections
            .iter()
            .map(|s| s.pointer_to_raw_data as usize + s.size_of_raw_data as usize)
            .max()
            .unwrap_or(0)
            .max(optional.windows_fields.size_of_headers as usize)
            .min(data.len());
        let table_end = section_table + sections.len() * SIZEOF_SECTION_TABLE;
        let header_room =
            (optional.windows_fields.size_of_headers as usize).saturating_sub(table_end);

        Ok(PeLayout {
            checksum_offset: opt_offset + OPT_CHECKSUM,
            checksum: optional.windows_fields.check_sum,
            security_directory,
            certificate,
            raw_end,
            header_room,
            has_resources: directories.get_resource_table().is_some(),
        })
    }

    /// The image without its overlay and with the certificate directory
    /// cleared. This is what the resource rebuild sees.
    fn sections_only(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut image = data[..self.raw_end].to_vec();
        if let Some(security) = self.security_directory {
            image.pwrite_with(0u64, security, LE)?;
        }
        Ok(image)
    }
}

/// Round up to alignment
fn round_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Compute the PE image checksum, skipping the checksum field itself.
pub fn pe_checksum(data: &[u8], checksum_offset: usize) -> u32 {
    let mut sum: u64 = 0;
    for (i, chunk) in data.chunks(4).enumerate() {
        if i * 4 == checksum_offset {
            continue;
        }
        let mut dword = [0u8; 4];
        dword[..chunk.len()].copy_from_slice(chunk);
        sum = (sum & 0xffff_ffff) + u32::from_le_bytes(dword) as u64 + (sum >> 32);
        if sum > 0xffff_ffff {
            sum = (sum & 0xffff_ffff) + (sum >> 32);
        }
    }
    sum = (sum & 0xffff) + (sum >> 16);
    sum += sum >> 16;
    sum &= 0xffff;
    (sum + data.len() as u64) as u32
}

fn parse_image(data: &[u8]) -> Result<Image> {
    Image::parse(data).map_err(|e| Error::malformed(format!("cannot parse PE image: {e:?}")))
}

/// Case-insensitive comparison of an entry against a string name
fn is_named(entry: &ResourceEntryName, name: &str) -> bool {
    match entry {
        ResourceEntryName::Name(value) => value.to_uppercase() == name.to_uppercase(),
        ResourceEntryName::ID(_) => false,
    }
}

/// The data of an entry, or of the first language below it
fn first_data(entry: &ResourceEntry) -> Option<&ResourceData> {
    match entry {
        ResourceEntry::Data(data) => Some(data),
        ResourceEntry::Table(langs) => langs.entries().into_iter().find_map(|lang| {
            match langs.get(lang.clone())? {
                ResourceEntry::Data(data) => Some(data),
                ResourceEntry::Table(_) => None,
            }
        }),
    }
}

/// A builder that edits the `RT_RCDATA` resources of a PE image.
pub struct PeWriter<'a> {
    /// Original binary data
    data: &'a [u8],
    layout: PeLayout,
    resources: ResourceDirectory,
    modified: bool,
}

impl<'a> PeWriter<'a> {
    /// Parse the headers and resource directory of `data`.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let layout = PeLayout::parse(data)?;
        if !layout.has_resources {
            debug!("image has no resource directory");
        }
        let sections = layout.sections_only(data)?;
        let resources = parse_image(&sections)?
            .resource_directory()
            .cloned()
            .unwrap_or_default();

        Ok(PeWriter {
            data,
            layout,
            resources,
            modified: false,
        })
    }

    /// The parsed resource tree
    pub fn resources(&self) -> &ResourceDirectory {
        &self.resources
    }

    fn rcdata(&self) -> Option<&ResourceTable> {
        match self.resources.root().get(ResourceEntryName::ID(RT_RCDATA))? {
            ResourceEntry::Table(table) => Some(table),
            ResourceEntry::Data(_) => None,
        }
    }

    /// The `RT_RCDATA` name entry matching `name`, ignoring case
    fn rcdata_key(&self, name: &str) -> Option<ResourceEntryName> {
        self.rcdata()?
            .entries()
            .into_iter()
            .find(|entry| is_named(entry, name))
            .cloned()
    }

    /// Check whether an `RT_RCDATA` entry named `name` exists (ignoring case).
    pub fn has_resource(&self, name: &str) -> bool {
        self.rcdata_key(name).is_some()
    }

    /// Bytes of the `RT_RCDATA` entry `name`, taken from its first language.
    pub fn resource(&self, name: &str) -> Option<Vec<u8>> {
        let key = self.rcdata_key(name)?;
        let entry = self.rcdata()?.get(key)?;
        first_data(entry).map(|data| data.data().to_vec())
    }

    /// Names of all `RT_RCDATA` entries with string names.
    pub fn resource_names(&self) -> Vec<String> {
        let Some(table) = self.rcdata() else {
            return Vec::new();
        };
        table
            .entries()
            .into_iter()
            .filter_map(|entry| match entry {
                ResourceEntryName::Name(name) => Some(name.clone()),
                ResourceEntryName::ID(_) => None,
            })
            .collect()
    }

    /// Store `contents` as the `RT_RCDATA` resource `name`.
    ///
    /// New names are stored in uppercase with the neutral language. An
    /// existing entry is only replaced with `overwrite`; its language variants
    /// collapse into one that keeps the first variant's language ID. Returns
    /// `false` when the entry exists and `overwrite` is not set.
    pub fn write_resource(&mut self, name: &str, contents: &[u8], overwrite: bool) -> Result<bool> {
        if name.is_empty() {
            return Err(Error::malformed("resource name must not be empty"));
        }

        let (key, language) = match self.rcdata_key(name) {
            Some(key) => {
                if !overwrite {
                    debug!("resource {name} already exists");
                    return Ok(false);
                }
                let language = match self.rcdata().and_then(|table| table.get(key.clone())) {
                    Some(ResourceEntry::Table(langs)) => langs
                        .entries()
                        .into_iter()
                        .find_map(|lang| match lang {
                            ResourceEntryName::ID(id) => Some(*id),
                            ResourceEntryName::Name(_) => None,
                        })
                        .unwrap_or(LANG_NEUTRAL),
                    _ => LANG_NEUTRAL,
                };
                debug!("replacing resource {name} (language {language:#x})");
                (key, language)
            }
            None => {
                debug!("adding resource {name}");
                (ResourceEntryName::from_string(&name.to_uppercase()), LANG_NEUTRAL)
            }
        };

        let root = self.resources.root_mut();
        if root.get(ResourceEntryName::ID(RT_RCDATA)).is_none() {
            root.insert(
                ResourceEntryName::ID(RT_RCDATA),
                ResourceEntry::Table(ResourceTable::default()),
            );
        }
        let types = match root.get_mut(ResourceEntryName::ID(RT_RCDATA)) {
            Some(ResourceEntry::Table(table)) => table,
            _ => return Err(Error::malformed("resource type entry is not a directory")),
        };

        let mut data = ResourceData::default();
        data.set_data(contents.to_vec());
        let mut langs = ResourceTable::default();
        langs.insert(ResourceEntryName::ID(language), ResourceEntry::Data(data));
        types.insert(key, ResourceEntry::Table(langs));

        self.modified = true;
        Ok(true)
    }

    /// Lay out the modified PE image.
    pub fn build(&self) -> Result<Vec<u8>> {
        let layout = &self.layout;
        if !self.modified {
            return Ok(self.data.to_vec());
        }
        if !layout.has_resources && layout.header_room < SIZEOF_SECTION_TABLE {
            return Err(Error::InsufficientHeaderSpace {
                needed: SIZEOF_SECTION_TABLE,
                available: layout.header_room,
            });
        }
        let overlay = &self.data[layout.raw_end..];
        let certificate = match (layout.security_directory, layout.certificate) {
            (Some(security), Some((offset, size))) => {
                if offset < layout.raw_end {
                    return Err(Error::UnsupportedLayout(
                        "certificate table overlaps section data".into(),
                    ));
                }
                Some((security, offset - layout.raw_end, size))
            }
            _ => None,
        };

        let sections = layout.sections_only(self.data)?;
        let mut image = parse_image(&sections)?;
        image
            .set_resource_directory(self.resources.clone())
            .map_err(|e| Error::UnsupportedLayout(format!("cannot rebuild resources: {e:?}")))?;
        let mut output = image.data().to_vec();
        debug!(
            "resource rebuild took the image from {:#x} to {:#x} bytes",
            sections.len(),
            output.len()
        );

        if let Some((security, relative, size)) = certificate {
            output.resize(round_up(output.len(), CERTIFICATE_ALIGNMENT), 0);
            let moved = output.len() + relative;
            debug!("certificate table moved to {moved:#x}");
            output.pwrite_with(moved as u32, security, LE)?;
            output.pwrite_with(size as u32, security + 4, LE)?;
        }
        if !overlay.is_empty() {
            trace!("moving {:#x} overlay bytes", overlay.len());
            output.extend_from_slice(overlay);
        }

        let checksum_offset = layout.checksum_offset;
        let checksum = if layout.checksum != 0 {
            let checksum = pe_checksum(&output, checksum_offset);
            trace!("updated checksum to {checksum:#x}");
            checksum
        } else {
            0
        };
        output.pwrite_with(checksum, checksum_offset, LE)?;

        Ok(output)
    }
}

/// Add or overwrite the `RT_RCDATA` resource `name` in the PE image.
pub fn inject_pe(image: &[u8], name: &str, data: &[u8], overwrite: bool) -> Result<Injection> {
    let mut writer = PeWriter::parse(image)?;
    if !writer.write_resource(name, data, overwrite)? {
        return Ok(Injection::AlreadyExists(ResourceId::Pe {
            name: name.to_uppercase(),
        }));
    }
    Ok(Injection::Injected(writer.build()?))
}

/// Return the bytes of the `RT_RCDATA` resource `name` (ignoring case).
pub fn find_resource(image: &[u8], name: &str) -> Result<Option<Vec<u8>>> {
    Ok(PeWriter::parse(image)?.resource(name))
}

/// Names of all `RT_RCDATA` resources with string names.
pub fn resource_names(image: &[u8]) -> Result<Vec<String>> {
    Ok(PeWriter::parse(image)?.resource_names())
}
