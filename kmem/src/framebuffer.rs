//! Logical ownership of the framebuffer.
//!
//! Cooperating display subsystems tag their use of the framebuffer with an owner name.
//! Each owner holds a reference count; a tag whose count dropped back to zero keeps its
//! slot until another owner needs it.

use log::warn;

use bare_metal::{PhysAddr, PhysAddrRange};

/// Number of owners that can be tracked at the same time.
pub const MAX_OWNERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OwnerSlot {
    tag: &'static str,
    count: usize,
}

pub struct FramebufferLock {
    region: PhysAddrRange,
    slots: [Option<OwnerSlot>; MAX_OWNERS],
}

impl FramebufferLock {
    pub fn new(region: PhysAddrRange) -> FramebufferLock {
        FramebufferLock {
            region,
            slots: [None; MAX_OWNERS],
        }
    }

    pub fn region(&self) -> PhysAddrRange {
        self.region
    }

    pub fn reset(&mut self) {
        self.slots = [None; MAX_OWNERS];
    }

    /// Take a reference on the framebuffer for `owner` and return its base address.
    /// `None` if `owner` is new and all slots are held by other owners.
    pub fn lock(&mut self, owner: &'static str) -> Option<PhysAddr> {
        let index = match self.slot_of(owner) {
            Some(index) => index,
            None => {
                let index = self.slots.iter().position(|s| s.map_or(true, |s| s.count == 0));
                match index {
                    Some(index) => {
                        self.slots[index] = Some(OwnerSlot { tag: owner, count: 0 });
                        index
                    }
                    None => {
                        warn!("framebuffer lock table full, rejecting {:?}", owner);
                        return None;
                    }
                }
            }
        };
        if let Some(slot) = self.slots[index].as_mut() {
            slot.count += 1;
        }
        Some(self.region.start)
    }

    /// Drop a reference of `owner`. Panics if `owner` holds none.
    pub fn unlock(&mut self, owner: &'static str) {
        let slot = match self.slot_of(owner).and_then(|i| self.slots[i].as_mut()) {
            Some(slot) => slot,
            None => panic!("framebuffer unlock by unowned tag {:?}", owner),
        };
        if slot.count == 0 {
            panic!("framebuffer lock underflow for {:?}", owner);
        }
        slot.count -= 1;
    }

    /// Address of `length` bytes at `offset` into the framebuffer, on behalf of a lock holder.
    pub fn window(&self, owner: &str, offset: usize, length: usize) -> PhysAddr {
        if self.count(owner) == 0 {
            panic!("framebuffer window requested by {:?} without holding the lock", owner);
        }
        match offset.checked_add(length) {
            Some(end) if end <= self.region.length => self.region.start + offset,
            _ => panic!("framebuffer window {:#x}+{:#x} out of range", offset, length),
        }
    }

    /// Current reference count of `owner`.
    pub fn count(&self, owner: &str) -> usize {
        self.slot_of(owner).and_then(|i| self.slots[i]).map_or(0, |s| s.count)
    }

    /// Owners currently holding at least one reference.
    pub fn owners(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        self.slots.iter().flatten().filter(|s| s.count > 0).map(|s| (s.tag, s.count))
    }

    fn slot_of(&self, owner: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.map_or(false, |s| s.tag == owner))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::vec::Vec;

    const REGION: PhysAddrRange = PhysAddrRange::new(PhysAddr(0xA0000), 0x10000);

    #[test]
    fn nested_owners() {
        let mut fb = FramebufferLock::new(REGION);
        assert_eq!(fb.lock("console"), Some(PhysAddr(0xA0000)));
        assert_eq!(fb.lock("splash"), Some(PhysAddr(0xA0000)));
        assert_eq!(fb.lock("console"), Some(PhysAddr(0xA0000)));
        assert_eq!(fb.count("console"), 2);
        fb.unlock("console");
        fb.unlock("splash");
        fb.unlock("console");
        assert_eq!(fb.count("console"), 0);
        assert_eq!(fb.count("splash"), 0);
        assert_eq!(fb.owners().count(), 0);
    }

    #[test]
    fn released_slots_are_recycled() {
        let mut fb = FramebufferLock::new(REGION);
        for &tag in ["a", "b", "c", "d"].iter() {
            fb.lock(tag).unwrap();
        }
        assert_eq!(fb.lock("e"), None);
        fb.unlock("b");
        assert_eq!(fb.lock("e"), Some(REGION.start));
        let owners: Vec<_> = fb.owners().map(|(tag, _)| tag).collect();
        assert_eq!(owners, vec!["a", "e", "c", "d"]);
    }

    #[test]
    fn window_inside_region() {
        let mut fb = FramebufferLock::new(REGION);
        fb.lock("console");
        assert_eq!(fb.window("console", 0x100, 0x200), PhysAddr(0xA0100));
        assert_eq!(fb.window("console", 0, 0x10000), PhysAddr(0xA0000));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn window_past_the_end_is_fatal() {
        let mut fb = FramebufferLock::new(REGION);
        fb.lock("console");
        fb.window("console", 0xFFFF, 2);
    }

    #[test]
    #[should_panic(expected = "without holding the lock")]
    fn window_without_lock_is_fatal() {
        let fb = FramebufferLock::new(REGION);
        fb.window("console", 0, 1);
    }

    #[test]
    #[should_panic(expected = "unowned tag")]
    fn unlock_of_stranger_is_fatal() {
        let mut fb = FramebufferLock::new(REGION);
        fb.lock("console");
        fb.unlock("splash");
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn unlock_below_zero_is_fatal() {
        let mut fb = FramebufferLock::new(REGION);
        fb.lock("console");
        fb.unlock("console");
        fb.unlock("console");
    }
}
