//! Newtype wrapper for physical addresses. The kernel runs without paging, so every
//! physical address is also the address the CPU uses to access it.

use core::fmt;
use core::ops;

use super::align::Alignable;

/// A physical address. Without paging it can be dereferenced directly, as long as
/// it points to memory that actually exists.
#[derive(Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Debug, Default, Hash)]
#[repr(C)]
pub struct PhysAddr(pub usize);

impl PhysAddr {
    pub const NULL: PhysAddr = PhysAddr(0);

    /// Address of the first element of a slice.
    pub fn of_slice<T>(slice: &[T]) -> PhysAddr {
        PhysAddr(slice.as_ptr() as usize)
    }

    pub fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    pub fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    pub fn checked_add(self, offset: usize) -> Option<PhysAddr> {
        self.0.checked_add(offset).map(PhysAddr)
    }
}

impl Alignable for PhysAddr {
    type Alignment = usize;

    fn align_up(self, alignment: usize) -> Self {
        PhysAddr(self.0.align_up(alignment))
    }

    fn align_down(self, alignment: usize) -> Self {
        PhysAddr(self.0.align_down(alignment))
    }

    fn checked_align_up(self, alignment: usize) -> Option<Self> {
        self.0.checked_align_up(alignment).map(PhysAddr)
    }

    fn is_aligned(self, alignment: usize) -> bool {
        self.0.is_aligned(alignment)
    }
}

impl ops::Add<usize> for PhysAddr {
    type Output = PhysAddr;

    fn add(self, other: usize) -> Self::Output {
        PhysAddr(self.0 + other)
    }
}

impl ops::AddAssign<usize> for PhysAddr {
    fn add_assign(&mut self, other: usize) {
        self.0 += other;
    }
}

impl ops::Sub<usize> for PhysAddr {
    type Output = PhysAddr;

    fn sub(self, other: usize) -> Self::Output {
        PhysAddr(self.0 - other)
    }
}

impl ops::Sub<PhysAddr> for PhysAddr {
    type Output = usize;

    fn sub(self, other: PhysAddr) -> Self::Output {
        self.0 - other.0
    }
}

impl fmt::Pointer for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// A half-open range `[start, start + length)` of physical memory.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PhysAddrRange {
    pub start: PhysAddr,
    pub length: usize,
}

impl PhysAddrRange {
    pub const EMPTY: PhysAddrRange = PhysAddrRange { start: PhysAddr::NULL, length: 0 };

    pub const fn new(start: PhysAddr, length: usize) -> PhysAddrRange {
        PhysAddrRange { start, length }
    }

    /// Range between two bounds. An inverted pair of bounds yields an empty range.
    pub fn from_bounds(start: PhysAddr, end: PhysAddr) -> PhysAddrRange {
        PhysAddrRange {
            start,
            length: if end < start { 0 } else { end - start },
        }
    }

    pub fn end(&self) -> PhysAddr {
        self.start + self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn contains(&self, addr: PhysAddr) -> bool {
        addr >= self.start && addr < self.end()
    }

    pub fn overlaps(&self, other: &PhysAddrRange) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end() && other.start < self.end()
    }
}

impl fmt::Display for PhysAddrRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:p}..{:p}", self.start, self.end())
    }
}
