/// A segment selector
#[derive(Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Debug)]
pub struct Selector(pub u16);

impl Selector {
    pub const NULL: Selector = Selector(0);
    /// Flat 4 GiB code segment installed by the boot code.
    pub const KERNEL_CODE: Selector = Selector(0x08);
    /// Flat 4 GiB data segment installed by the boot code.
    pub const KERNEL_DATA: Selector = Selector(0x10);

    /// Selector for a GDT entry with the given requested privilege level.
    pub const fn from_gdt(index: u16, rpl: Ring) -> Selector {
        Selector((index << 3) | rpl.0 as u16)
    }

    pub fn index(&self) -> u16 {
        self.0 >> 3
    }

    pub fn requested_privilege(&self) -> Ring {
        Ring(self.0 as u8 & 0b11)
    }
}

/// Privilege level
#[derive(Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Debug)]
pub struct Ring(u8);

impl Ring {
    pub const RING0: Ring = Ring(0);
    pub const RING3: Ring = Ring(3);

    /// Create a new ring if the number is valid (i.e. in the range 0 (kernel mode) - 3 (user mode))
    pub fn new(ring: u8) -> Option<Ring> {
        if ring <= 3 {
            Some(Ring(ring))
        } else {
            None
        }
    }

    pub fn number(&self) -> u8 {
        self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn boot_selectors() {
        assert_eq!(Selector::from_gdt(1, Ring::RING0), Selector::KERNEL_CODE);
        assert_eq!(Selector::from_gdt(2, Ring::RING0), Selector::KERNEL_DATA);
        let user = Selector::from_gdt(3, Ring::RING3);
        assert_eq!(user.index(), 3);
        assert_eq!(user.requested_privilege(), Ring::RING3);
        assert_eq!(Ring::new(4), None);
    }
}
