//! # postject
//!
//! Inject arbitrary read-only resources into already-linked executables,
//! built on [goblin](https://crates.io/crates/goblin).
//!
//! Each container format has its own notion of a named region:
//! - ELF (with `elf` feature): a non-allocated `SHT_PROGBITS` section
//! - PE (with `pe` feature): an `RT_RCDATA` entry in the resource directory
//! - Mach-O (with `mach` feature): a section in a dedicated segment, in every
//!   slice of a fat binary
//!
//! The injected program finds its resource at runtime by the same name, for
//! example with the C header in [`API_HEADER`]. An optional sentinel fuse
//! tells it that a resource is present.
//!
//! ## Example
//!
//! ```no_run
//! use postject::{inject, Injection, InjectionRequest};
//!
//! let image = std::fs::read("app").unwrap();
//! let blob = std::fs::read("app.blob").unwrap();
//!
//! let request = InjectionRequest::new("app_blob", &blob)
//!     .with_overwrite(true)
//!     .with_sentinel("POSTJECT_SENTINEL_fce680ab2cc467b6e072b8b5df1996b2");
//!
//! match inject(&image, &request).unwrap() {
//!     Injection::Injected(output) => std::fs::write("app", output).unwrap(),
//!     Injection::AlreadyExists(id) => eprintln!("{id} is already present"),
//! }
//! ```
//!
//! ## Logging
//!
//! Layout decisions are reported through the [`log`] facade at `debug` and
//! `trace` level. The library never installs a logger.

extern crate alloc;

mod error;
pub mod format;
pub mod sentinel;

// ELF section writer (Linux/BSD binaries)
#[cfg(feature = "elf")]
pub mod elf_writer;

// PE resource writer (Windows binaries)
#[cfg(feature = "pe")]
pub mod pe_writer;

// Mach-O section writer (macOS/iOS binaries)
#[cfg(feature = "mach")]
pub mod macho_writer;

use alloc::borrow::Cow;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use log::debug;

pub use error::{Error, Result};
pub use format::{detect_format, Format};
pub use sentinel::patch_sentinel;

#[cfg(feature = "elf")]
pub use elf_writer::{inject_elf, ElfWriter};

#[cfg(feature = "pe")]
pub use pe_writer::{inject_pe, PeWriter};

#[cfg(feature = "mach")]
pub use macho_writer::{inject_macho, modify_fat_binary, MachOWriter};

/// Segment used for Mach-O resources unless the request names another
pub const DEFAULT_MACHO_SEGMENT: &str = "__POSTJECT";

/// C header that finds an injected resource from inside the running program.
///
/// Reads the section through `getsectdata` on macOS, the `RT_RCDATA` entry
/// through `FindResourceA` on Windows, and the section header table of
/// `/proc/self/exe` on Linux.
pub const API_HEADER: &str = include_str!("../include/postject-api.h");

/// Identifies an existing resource that blocked an injection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceId {
    /// ELF section name
    Elf { section: String },
    /// PE `RT_RCDATA` entry name, uppercased
    Pe { name: String },
    /// Mach-O segment and section names
    MachO { segment: String, section: String },
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Elf { section } => write!(f, "ELF section {section}"),
            ResourceId::Pe { name } => write!(f, "PE resource {name}"),
            ResourceId::MachO { segment, section } => {
                write!(f, "Mach-O section {segment},{section}")
            }
        }
    }
}

/// Outcome of a successful injection call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Injection {
    /// The modified image
    Injected(Vec<u8>),
    /// A resource with that name exists and overwriting was not requested.
    /// No image is produced.
    AlreadyExists(ResourceId),
}

impl Injection {
    /// The modified image, if one was produced
    pub fn into_image(self) -> Option<Vec<u8>> {
        match self {
            Injection::Injected(image) => Some(image),
            Injection::AlreadyExists(_) => None,
        }
    }

    pub fn is_injected(&self) -> bool {
        matches!(self, Injection::Injected(_))
    }
}

/// What to inject and how.
///
/// # Example
/// ```
/// use postject::InjectionRequest;
///
/// let request = InjectionRequest::new("foobar", b"Hello world")
///     .with_macho_segment_name("__RESOURCES")
///     .with_overwrite(true);
/// assert_eq!(request.macho_segment_name(), "__RESOURCES");
/// ```
#[derive(Debug, Clone)]
pub struct InjectionRequest<'a> {
    resource_name: &'a str,
    resource_data: &'a [u8],
    overwrite: bool,
    macho_segment_name: &'a str,
    sentinel: Option<&'a str>,
}

impl<'a> InjectionRequest<'a> {
    /// Inject `resource_data` under `resource_name`, failing over to
    /// [`Injection::AlreadyExists`] if the name is taken.
    pub fn new(resource_name: &'a str, resource_data: &'a [u8]) -> Self {
        Self {
            resource_name,
            resource_data,
            overwrite: false,
            macho_segment_name: DEFAULT_MACHO_SEGMENT,
            sentinel: None,
        }
    }

    /// Replace an existing resource of the same name
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Segment to hold the section in Mach-O images
    pub fn with_macho_segment_name(mut self, segment: &'a str) -> Self {
        self.macho_segment_name = segment;
        self
    }

    /// Flip this sentinel fuse after injecting
    pub fn with_sentinel(mut self, sentinel: &'a str) -> Self {
        self.sentinel = Some(sentinel);
        self
    }

    pub fn resource_name(&self) -> &'a str {
        self.resource_name
    }

    pub fn resource_data(&self) -> &'a [u8] {
        self.resource_data
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn macho_segment_name(&self) -> &'a str {
        self.macho_segment_name
    }

    pub fn sentinel(&self) -> Option<&'a str> {
        self.sentinel
    }
}

/// Mach-O section names carry a `__` prefix.
pub fn macho_section_name(name: &str) -> Cow<'_, str> {
    if name.starts_with("__") {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(alloc::format!("__{name}"))
    }
}

/// PE resource names are stored in uppercase.
pub fn pe_resource_name(name: &str) -> String {
    name.to_uppercase()
}

/// Inject a resource into `image`, whatever its format.
///
/// Resource names are adjusted to each format's convention first: Mach-O
/// section names get a `__` prefix and PE names are uppercased. When the
/// request carries a sentinel, its fuse is set in the injected image.
///
/// The input is never modified; on success a new image is returned.
pub fn inject(image: &[u8], request: &InjectionRequest) -> Result<Injection> {
    let format = detect_format(image);
    debug!(
        "injecting {} bytes as {:?} into {format} image",
        request.resource_data.len(),
        request.resource_name
    );

    let injection = match format {
        Format::Elf => inject_elf_image(image, request)?,
        Format::Pe => inject_pe_image(image, request)?,
        Format::MachO => inject_macho_image(image, request)?,
        Format::Unknown => return Err(Error::UnknownFormat),
    };

    match (injection, request.sentinel) {
        (Injection::Injected(output), Some(sentinel)) => {
            Ok(Injection::Injected(patch_sentinel(output, sentinel)?))
        }
        (injection, _) => Ok(injection),
    }
}

#[cfg(feature = "elf")]
fn inject_elf_image(image: &[u8], request: &InjectionRequest) -> Result<Injection> {
    inject_elf(
        image,
        request.resource_name,
        request.resource_data,
        request.overwrite,
    )
}

#[cfg(not(feature = "elf"))]
fn inject_elf_image(_: &[u8], _: &InjectionRequest) -> Result<Injection> {
    Err(Error::Disabled("ELF"))
}

#[cfg(feature = "pe")]
fn inject_pe_image(image: &[u8], request: &InjectionRequest) -> Result<Injection> {
    inject_pe(
        image,
        &pe_resource_name(request.resource_name),
        request.resource_data,
        request.overwrite,
    )
}

#[cfg(not(feature = "pe"))]
fn inject_pe_image(_: &[u8], _: &InjectionRequest) -> Result<Injection> {
    Err(Error::Disabled("PE"))
}

#[cfg(feature = "mach")]
fn inject_macho_image(image: &[u8], request: &InjectionRequest) -> Result<Injection> {
    inject_macho(
        image,
        request.macho_segment_name,
        &macho_section_name(request.resource_name),
        request.resource_data,
        request.overwrite,
    )
}

#[cfg(not(feature = "mach"))]
fn inject_macho_image(_: &[u8], _: &InjectionRequest) -> Result<Injection> {
    Err(Error::Disabled("Mach-O"))
}
