//! ELF placement without paging.
//!
//! The lowest virtual address of all loadable segments becomes the start of the load
//! window; every segment keeps its distance to that address.

use log::debug;
use xmas_elf::program::{ProgramHeader, Type};
use xmas_elf::ElfFile;

use bare_metal::PhysAddr;

use crate::{LoadError, LoadWindow};

const CLASS_OFFSET: usize = 4;
const CLASS_32: u8 = 1;
const CLASS_64: u8 = 2;

/// Parameters that differ between the two ELF classes.
struct Class {
    align: usize,
    header_size: usize,
    ph_entry_size: usize,
}

const ELF32: Class = Class {
    align: 4,
    header_size: 52,
    ph_entry_size: 32,
};

const ELF64: Class = Class {
    align: 8,
    header_size: 64,
    ph_entry_size: 56,
};

#[derive(Debug, Clone, Copy)]
struct Segment {
    offset: usize,
    file_size: usize,
    vaddr: u64,
    mem_size: u64,
}

impl Segment {
    fn parse(ph: ProgramHeader, image_len: usize) -> Result<Segment, LoadError> {
        if ph.file_size() > ph.mem_size() {
            return Err(LoadError::BadSegment);
        }
        let offset = usize::try_from(ph.offset()).map_err(|_| LoadError::Truncated)?;
        let file_size = usize::try_from(ph.file_size()).map_err(|_| LoadError::Truncated)?;
        match offset.checked_add(file_size) {
            Some(end) if end <= image_len => {}
            _ => return Err(LoadError::Truncated),
        }
        ph.virtual_addr().checked_add(ph.mem_size()).ok_or(LoadError::SegmentTooLarge)?;
        Ok(Segment {
            offset,
            file_size,
            vaddr: ph.virtual_addr(),
            mem_size: ph.mem_size(),
        })
    }

    fn end(&self) -> u64 {
        self.vaddr + self.mem_size
    }
}

/// Check everything `ElfFile` would otherwise answer with a panic.
fn check_layout(bytes: &[u8]) -> Result<&'static Class, LoadError> {
    let class = match bytes.get(CLASS_OFFSET) {
        Some(&CLASS_32) => &ELF32,
        Some(&CLASS_64) => &ELF64,
        Some(_) => return Err(LoadError::Malformed("unknown ELF class")),
        None => return Err(LoadError::Truncated),
    };
    if bytes.len() < class.header_size {
        return Err(LoadError::Truncated);
    }
    if PhysAddr::of_slice(bytes).0 % class.align != 0 {
        return Err(LoadError::Misaligned);
    }
    Ok(class)
}

fn check_program_headers(elf: &ElfFile, class: &Class) -> Result<(), LoadError> {
    let pt2 = &elf.header.pt2;
    if pt2.ph_count() == 0 {
        return Err(LoadError::NoLoadableSegments);
    }
    if pt2.ph_entry_size() as usize != class.ph_entry_size {
        return Err(LoadError::Malformed("unexpected program header size"));
    }
    let table = usize::try_from(pt2.ph_offset()).map_err(|_| LoadError::Truncated)?;
    if table == 0 {
        return Err(LoadError::Malformed("missing program header table"));
    }
    if table % class.align != 0 {
        return Err(LoadError::Misaligned);
    }
    let end = (pt2.ph_count() as usize)
        .checked_mul(class.ph_entry_size)
        .and_then(|len| len.checked_add(table));
    match end {
        Some(end) if end <= elf.input.len() => Ok(()),
        _ => Err(LoadError::Truncated),
    }
}

fn loadable<'e>(elf: &'e ElfFile) -> impl Iterator<Item = Result<Segment, LoadError>> + 'e {
    let image_len = elf.input.len();
    elf.program_iter()
        .filter(|ph| ph.get_type() == Ok(Type::Load))
        .map(move |ph| Segment::parse(ph, image_len))
}

/// Place the loadable segments of `bytes` in `window` and return the relocated entry point.
///
/// Nothing is written to the window unless the whole image is valid.
pub fn load_object(window: &mut LoadWindow, bytes: &[u8]) -> Result<PhysAddr, LoadError> {
    let class = check_layout(bytes)?;
    let elf = ElfFile::new(bytes).map_err(LoadError::Malformed)?;
    check_program_headers(&elf, class)?;

    let mut bounds: Option<(u64, u64)> = None;
    for segment in loadable(&elf) {
        let segment = segment?;
        if segment.mem_size > window.size() as u64 {
            return Err(LoadError::SegmentTooLarge);
        }
        bounds = Some(match bounds {
            None => (segment.vaddr, segment.end()),
            Some((low, high)) => (low.min(segment.vaddr), high.max(segment.end())),
        });
    }
    let (low, high) = bounds.ok_or(LoadError::NoLoadableSegments)?;
    if high - low > window.size() as u64 {
        return Err(LoadError::SegmentOutOfWindow);
    }
    let entry = elf.header.pt2.entry_point();
    if entry < low || entry >= high {
        return Err(LoadError::EntryOutsideImage);
    }

    for segment in loadable(&elf) {
        let segment = segment?;
        // the span check above bounds all offsets by the window size
        let start = (segment.vaddr - low) as usize;
        let loaded = start + segment.file_size;
        let end = start + segment.mem_size as usize;
        debug!(
            "segment {:#x}+{:#x} -> {:p}, {:#x} bytes of bss",
            segment.vaddr,
            segment.file_size,
            window.base() + start,
            end - loaded
        );
        let contents = window.contents_mut();
        contents[start..loaded].copy_from_slice(&bytes[segment.offset..segment.offset + segment.file_size]);
        for byte in &mut contents[loaded..end] {
            *byte = 0;
        }
    }

    Ok(window.base() + (entry - low) as usize)
}
