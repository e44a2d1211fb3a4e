//! Sentinel fuse patching.
//!
//! A host program embeds a marker string followed by `:0`. Once a resource
//! has been injected, the flag byte is flipped to `'1'` so the program knows
//! to look for it at startup. The marker is matched byte for byte and must
//! occur exactly once.

use alloc::string::String;
use alloc::vec::Vec;
use log::debug;

use crate::error::{Error, Result};

/// Flag value before injection
const FUSE_UNSET: u8 = b'0';
/// Flag value after injection
const FUSE_SET: u8 = b'1';

/// Offset of every occurrence of `needle` in `haystack`, overlaps included.
fn occurrences<'a>(haystack: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(move |(_, window)| *window == needle)
        .map(|(offset, _)| offset)
}

/// Locate the flag byte following `sentinel` in `image`.
pub fn find_fuse(image: &[u8], sentinel: &str) -> Result<usize> {
    let needle = sentinel.as_bytes();
    if needle.is_empty() {
        return Err(Error::SentinelNotFound(String::new()));
    }

    let mut found = occurrences(image, needle);
    let first = found
        .next()
        .ok_or_else(|| Error::SentinelNotFound(sentinel.into()))?;
    if let Some(second) = found.next() {
        return Err(Error::SentinelAmbiguous { first, second });
    }

    let colon = first + needle.len();
    match image.get(colon) {
        Some(b':') => {}
        Some(_) => return Err(Error::SentinelMissingColon { offset: colon }),
        None => return Err(Error::SentinelTruncated { offset: colon }),
    }
    let flag = colon + 1;
    if flag >= image.len() {
        return Err(Error::SentinelTruncated { offset: flag });
    }
    Ok(flag)
}

/// Flip the fuse following `sentinel` from `'0'` to `'1'`.
///
/// A fuse that is already set is left alone and the image is returned
/// unchanged.
pub fn patch_sentinel(mut image: Vec<u8>, sentinel: &str) -> Result<Vec<u8>> {
    let offset = find_fuse(&image, sentinel)?;
    match image[offset] {
        FUSE_UNSET => {
            debug!("setting sentinel fuse at {offset:#x}");
            image[offset] = FUSE_SET;
        }
        FUSE_SET => debug!("sentinel fuse at {offset:#x} is already set"),
        value => return Err(Error::SentinelInvalidFlag { offset, value }),
    }
    Ok(image)
}
