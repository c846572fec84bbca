use core::slice;

use bare_metal::{Alignable, PhysAddr, PhysAddrRange};

use crate::block::ALIGN;

/// A fixed byte range of physical memory with a bump cursor.
///
/// All accesses go through offsets relative to the (8-byte aligned) start and are bounds
/// checked against the region, so a corrupt header can at worst produce a panic, never
/// an access outside of the region.
pub struct Arena {
    bytes: &'static mut [u8],
    cursor: usize,
}

impl Arena {
    /// Manage `bytes`, trimmed to 8-byte aligned bounds.
    pub fn new(bytes: &'static mut [u8]) -> Arena {
        let start = PhysAddr::of_slice(bytes);
        let skip = (start.align_up(ALIGN) - start).min(bytes.len());
        let bytes = &mut bytes[skip..];
        let usable = bytes.len().align_down(ALIGN);
        Arena {
            bytes: &mut bytes[..usable],
            cursor: 0,
        }
    }

    /// An arena without any capacity.
    pub fn empty() -> Arena {
        Arena {
            bytes: &mut [],
            cursor: 0,
        }
    }

    /// Manage a physical memory range directly.
    ///
    /// The range must be backed by RAM and must not be used by anything else for as long
    /// as the arena lives.
    pub unsafe fn from_range(range: PhysAddrRange) -> Arena {
        if range.is_empty() {
            return Arena::empty();
        }
        Arena::new(slice::from_raw_parts_mut(range.start.as_mut_ptr(), range.length))
    }

    pub fn base(&self) -> PhysAddr {
        PhysAddr::of_slice(self.bytes)
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn used(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.cursor
    }

    pub fn range(&self) -> PhysAddrRange {
        PhysAddrRange::new(self.base(), self.capacity())
    }

    /// Rewind the cursor, forgetting everything handed out so far.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Offset of `addr` inside the handed-out part of the arena.
    pub fn offset_of(&self, addr: PhysAddr) -> Option<usize> {
        if addr >= self.base() && addr < self.base() + self.cursor {
            Some(addr - self.base())
        } else {
            None
        }
    }

    /// Take `size` bytes from the cursor and return their offset.
    pub fn bump(&mut self, size: usize) -> Option<usize> {
        if size <= self.remaining() {
            let offset = self.cursor;
            self.cursor += size;
            Some(offset)
        } else {
            None
        }
    }

    pub fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.bytes[offset..offset + len]
    }

    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.bytes[offset..offset + len]
    }

    /// Like `bytes`, but `None` instead of a panic when out of bounds.
    pub fn get(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.bytes.get(offset..offset.checked_add(len)?)
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut raw = [0; 4];
        raw.copy_from_slice(self.bytes(offset, 4));
        u32::from_le_bytes(raw)
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.bytes_mut(offset, 4).copy_from_slice(&value.to_le_bytes());
    }

    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut raw = [0; 8];
        raw.copy_from_slice(self.bytes(offset, 8));
        u64::from_le_bytes(raw)
    }

    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.bytes_mut(offset, 8).copy_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
pub(crate) fn leak(size: usize) -> &'static mut [u8] {
    // u64 storage keeps the leaked buffer 8-byte aligned
    let words = std::vec![0_u64; (size + 7) / 8].into_boxed_slice();
    let words: &'static mut [u64] = std::boxed::Box::leak(words);
    unsafe { slice::from_raw_parts_mut(words.as_mut_ptr() as *mut u8, size) }
}
