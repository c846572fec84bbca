//! In-band block headers.
//!
//! Layout (little endian):
//! ```text
//! 0   total size (header + payload + slack), u32
//! 4   payload size as requested (8-byte aligned), u32
//! 8   guard tag, u32
//! 12  origin, u8
//! 16  absolute address of the next free block header, u64 (0 = end of list)
//! 24  payload
//! ```

use crate::arena::Arena;

/// Alignment of every block and every payload.
pub const ALIGN: usize = 8;
/// Size of the in-band header preceding each payload.
pub const HEADER_SIZE: usize = 24;
/// Smallest remainder worth splitting off a reused free block.
pub const MIN_SPLIT: usize = HEADER_SIZE + ALIGN;

const_assert_eq!(HEADER_SIZE % ALIGN, 0);

const TOTAL: usize = 0;
const PAYLOAD: usize = 4;
const GUARD: usize = 8;
const ORIGIN: usize = 12;
const NEXT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    Active,
    Freed,
}

impl Guard {
    const ACTIVE_TAG: u32 = 0xA11C_A7ED;
    const FREED_TAG: u32 = 0xF4EE_B10C;

    fn tag(self) -> u32 {
        match self {
            Guard::Active => Self::ACTIVE_TAG,
            Guard::Freed => Self::FREED_TAG,
        }
    }

    fn from_tag(tag: u32) -> Option<Guard> {
        match tag {
            Self::ACTIVE_TAG => Some(Guard::Active),
            Self::FREED_TAG => Some(Guard::Freed),
            _ => None,
        }
    }
}

/// Which region a block was carved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Heap = 1,
    Swap = 2,
}

/// Decoded fields of a block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub total: usize,
    pub payload: usize,
    pub guard: Option<Guard>,
    pub origin: u8,
    pub next: u64,
}

impl Header {
    pub fn read(arena: &Arena, offset: usize) -> Option<Header> {
        let raw = arena.get(offset, HEADER_SIZE)?;
        let u32_at = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        let mut next = [0; 8];
        next.copy_from_slice(&raw[NEXT..NEXT + 8]);
        Some(Header {
            total: u32_at(TOTAL) as usize,
            payload: u32_at(PAYLOAD) as usize,
            guard: Guard::from_tag(u32_at(GUARD)),
            origin: raw[ORIGIN],
            next: u64::from_le_bytes(next),
        })
    }

    /// Whether the header describes a block that fits completely into the used part of the arena.
    pub fn is_plausible(&self, arena: &Arena, offset: usize) -> bool {
        self.total >= MIN_SPLIT
            && self.total % ALIGN == 0
            && self.payload + HEADER_SIZE <= self.total
            && offset.checked_add(self.total).map_or(false, |end| end <= arena.used())
    }
}

pub fn write(arena: &mut Arena, offset: usize, total: usize, payload: usize, guard: Guard, origin: Origin) {
    arena.write_u32(offset + TOTAL, total as u32);
    arena.write_u32(offset + PAYLOAD, payload as u32);
    arena.write_u32(offset + GUARD, guard.tag());
    arena.write_u32(offset + ORIGIN, origin as u32);
    arena.write_u64(offset + NEXT, 0);
}

pub fn set_total(arena: &mut Arena, offset: usize, total: usize) {
    arena.write_u32(offset + TOTAL, total as u32);
}

pub fn set_payload(arena: &mut Arena, offset: usize, payload: usize) {
    arena.write_u32(offset + PAYLOAD, payload as u32);
}

pub fn set_guard(arena: &mut Arena, offset: usize, guard: Guard) {
    arena.write_u32(offset + GUARD, guard.tag());
}

pub fn set_next(arena: &mut Arena, offset: usize, next: u64) {
    arena.write_u64(offset + NEXT, next);
}
