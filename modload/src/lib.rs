//! Placement and execution of boot modules.
//!
//! Modules are either flat binaries, executable at their first byte, or ELF objects whose
//! loadable segments are placed relative to the lowest segment address. Both end up in a
//! single load window at a fixed physical address, so at most one module is resident at
//! any time.

#![cfg_attr(not(test), no_std)]

use core::fmt;

mod elf;
mod exec;
mod window;

pub use self::elf::load_object;
pub use self::exec::*;
pub use self::window::LoadWindow;

/// Magic at the start of every ELF object.
pub const OBJECT_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// No header, entered at byte 0.
    Flat,
    /// ELF object with a program header table.
    Object,
}

pub fn classify(bytes: &[u8]) -> Format {
    if bytes.starts_with(&OBJECT_MAGIC) {
        Format::Object
    } else {
        Format::Flat
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// The image ends before a structure it references.
    Truncated,
    /// The image is not aligned suitably for its ELF class.
    Misaligned,
    /// The ELF parser rejected the image.
    Malformed(&'static str),
    NoLoadableSegments,
    /// A segment, or a flat image, is larger than the load window.
    SegmentTooLarge,
    /// A segment ends beyond the load window once relocated.
    SegmentOutOfWindow,
    /// A segment has more bytes in the file than in memory.
    BadSegment,
    EntryOutsideImage,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LoadError::Truncated => write!(f, "image truncated"),
            LoadError::Misaligned => write!(f, "image misaligned"),
            LoadError::Malformed(reason) => write!(f, "malformed object: {}", reason),
            LoadError::NoLoadableSegments => write!(f, "no loadable segments"),
            LoadError::SegmentTooLarge => write!(f, "image does not fit the load window"),
            LoadError::SegmentOutOfWindow => write!(f, "segment outside the load window"),
            LoadError::BadSegment => write!(f, "segment file size exceeds memory size"),
            LoadError::EntryOutsideImage => write!(f, "entry point outside the loaded image"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn magic_decides_the_format() {
        assert_eq!(classify(b"\x7fELF\x01\x01"), Format::Object);
        assert_eq!(classify(b"\x7fEL"), Format::Flat);
        assert_eq!(classify(&[0x90, 0xC3]), Format::Flat);
        assert_eq!(classify(&[]), Format::Flat);
    }
}
