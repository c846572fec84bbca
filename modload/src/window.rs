use core::slice;

use bare_metal::{PhysAddr, PhysAddrRange};

use crate::LoadError;

/// The fixed region modules are loaded into. Loading a module overwrites the previous one.
pub struct LoadWindow {
    bytes: &'static mut [u8],
}

impl LoadWindow {
    pub fn new(bytes: &'static mut [u8]) -> LoadWindow {
        LoadWindow { bytes }
    }

    /// Take ownership of a physical memory range.
    ///
    /// The range must be backed by RAM that nothing else uses.
    pub unsafe fn from_range(range: PhysAddrRange) -> LoadWindow {
        if range.is_empty() {
            return LoadWindow { bytes: &mut [] };
        }
        LoadWindow::new(slice::from_raw_parts_mut(range.start.as_mut_ptr(), range.length))
    }

    pub fn base(&self) -> PhysAddr {
        PhysAddr::of_slice(self.bytes)
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn range(&self) -> PhysAddrRange {
        PhysAddrRange::new(self.base(), self.size())
    }

    pub fn contents(&self) -> &[u8] {
        self.bytes
    }

    pub(crate) fn contents_mut(&mut self) -> &mut [u8] {
        self.bytes
    }

    /// Copy a flat binary to the start of the window and return its entry point.
    pub fn load_flat(&mut self, image: &[u8]) -> Result<PhysAddr, LoadError> {
        if image.len() > self.size() {
            return Err(LoadError::SegmentTooLarge);
        }
        self.bytes[..image.len()].copy_from_slice(image);
        Ok(self.base())
    }
}

#[cfg(test)]
pub(crate) fn leak(size: usize) -> &'static mut [u8] {
    std::boxed::Box::leak(std::vec![0xCC_u8; size].into_boxed_slice())
}
