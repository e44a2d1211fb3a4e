//! Error type shared by every writer.

use alloc::string::String;

/// Errors that can occur while injecting a resource.
///
/// Name collisions are not errors; they are reported through
/// [`Injection::AlreadyExists`](crate::Injection::AlreadyExists).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// goblin rejected the image while parsing it.
    #[error("{0}")]
    Goblin(#[from] goblin::error::Error),

    /// A read or write ran past the end of a buffer.
    #[error("{0}")]
    Scroll(#[from] scroll::Error),

    /// The buffer is not an ELF, PE or Mach-O image.
    #[error("Executable must be a supported format: ELF, PE, or Mach-O")]
    UnknownFormat,

    /// The format was recognised but its writer was compiled out.
    #[error("Support for {0} images is not enabled in this build")]
    Disabled(&'static str),

    /// Headers or tables are inconsistent with each other or with the file size.
    #[error("Malformed image: {0}")]
    Malformed(String),

    /// A segment or section name does not fit its fixed-size field.
    #[error("Name {name:?} is {len} bytes long, the limit is {max}")]
    NameTooLong {
        /// The offending name
        name: String,
        /// Its length in bytes
        len: usize,
        /// The field size
        max: usize,
    },

    /// New header entries would overlap existing section data.
    #[error("Not enough room for new headers: need {needed} bytes, {available} available")]
    InsufficientHeaderSpace {
        /// Bytes the new headers require
        needed: usize,
        /// Bytes free between the existing headers and the first section
        available: usize,
    },

    /// The change would require moving data that the loader addresses directly.
    #[error("Unsupported layout: {0}")]
    UnsupportedLayout(String),

    /// The sentinel marker does not occur in the image.
    #[error("Could not find the sentinel {0:?} in the binary")]
    SentinelNotFound(String),

    /// The sentinel marker occurs more than once.
    #[error("Multiple occurrences of the sentinel (at {first:#x} and {second:#x})")]
    SentinelAmbiguous {
        /// Offset of the first occurrence
        first: usize,
        /// Offset of the second occurrence
        second: usize,
    },

    /// The byte after the marker is not `:`.
    #[error("Expected ':' after the sentinel at offset {offset:#x}")]
    SentinelMissingColon {
        /// Offset where the colon was expected
        offset: usize,
    },

    /// The flag byte is neither `'0'` nor `'1'`.
    #[error("Sentinel flag at offset {offset:#x} must be '0' or '1', found {value:#04x}")]
    SentinelInvalidFlag {
        /// Offset of the flag byte
        offset: usize,
        /// The byte found there
        value: u8,
    },

    /// The image ends before the colon or the flag byte.
    #[error("Sentinel at offset {offset:#x} is cut off by the end of the binary")]
    SentinelTruncated {
        /// Offset of the first missing byte
        offset: usize,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Error::Malformed(reason.into())
    }
}
