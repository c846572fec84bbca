use core::{mem, ops, slice};

use bare_metal::segments::{Ring, Selector};

/// Load an IDT for the current CPU.
///
/// The table must stay at its address for as long as it is in use.
#[cfg(target_arch = "x86")]
pub unsafe fn load_idt(idt: &Idt) {
    let idtr = Idtr {
        limit: mem::size_of::<Idt>() as u16 - 1,
        base: idt as *const Idt as u32,
    };
    core::arch::asm!("lidt [{0}]", in(reg) &idtr as *const Idtr, options(readonly, nostack, preserves_flags))
}

/// IDT Register value
#[repr(C, packed)]
pub struct Idtr {
    limit: u16,
    base: u32,
}

assert_eq_size!(Idtr, [u8; 6]);

/// Interrupt descriptor table
#[repr(C, packed)]
pub struct Idt {
    entries: [IdtEntry; 256],
}

// sanity check that everything adds up in terms of size
assert_eq_size!(Idt, [u64; 256]);

impl Idt {
    pub const fn new() -> Idt {
        Idt {
            entries: [IdtEntry::empty(); 256],
        }
    }

    /// Raw table contents, as the CPU sees them.
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self as *const Idt as *const u8, mem::size_of::<Idt>()) }
    }
}

impl ops::Index<u8> for Idt {
    type Output = IdtEntry;

    fn index(&self, idx: u8) -> &IdtEntry {
        &self.entries[idx as usize]
    }
}

impl ops::IndexMut<u8> for Idt {
    fn index_mut(&mut self, idx: u8) -> &mut IdtEntry {
        &mut self.entries[idx as usize]
    }
}

/// An entry in the 32-bit interrupt descriptor table.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(C, packed)]
pub struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    /// `[P:1][DPL:2][S:1][Type:4]`
    type_attr: u8,
    offset_high: u16,
}

// sanity check that everything adds up in terms of size
assert_eq_size!(IdtEntry, u64);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct GateType(u8);

impl GateType {
    pub const TASK_GATE: GateType = GateType(0x05);
    pub const INTERRUPT_GATE: GateType = GateType(0x0E);
    pub const TRAP_GATE: GateType = GateType(0x0F);
}

impl IdtEntry {
    const DPL_MASK: u8 = 0b0110_0000;
    const TYPE_MASK: u8 = 0b0000_1111;
    const PRESENT_MASK: u8 = 0b1000_0000;

    pub fn new(gate_type: GateType, selector: Selector, offset: u32, dpl: Ring, present: bool) -> IdtEntry {
        let mut e = Self::empty();
        e.set_gate_type(gate_type);
        e.set_selector(selector);
        e.set_offset(offset);
        e.set_descriptor_privilege(dpl);
        e.set_present(present);
        e
    }

    /// Create a new non-present, DPL 0 and empty IDT entry with the invalid selector 0.
    pub const fn empty() -> IdtEntry {
        IdtEntry {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: GateType::INTERRUPT_GATE.0,
            offset_high: 0,
        }
    }

    /// Return whether this entry is present.
    pub fn present(&self) -> bool {
        self.type_attr & Self::PRESENT_MASK != 0
    }

    /// Set the present bit of the entry.
    pub fn set_present(&mut self, value: bool) {
        if value {
            self.type_attr |= Self::PRESENT_MASK;
        } else {
            self.type_attr &= !Self::PRESENT_MASK;
        }
    }

    /// Address of the entry stub.
    pub fn offset(&self) -> u32 {
        (self.offset_low as u32) | ((self.offset_high as u32) << 16)
    }

    pub fn set_offset(&mut self, offset: u32) {
        self.offset_low = (offset & 0xFFFF) as u16;
        self.offset_high = (offset >> 16) as u16;
    }

    /// Offset in the GDT that determines the segment used for this gate.
    pub fn selector(&self) -> Selector {
        Selector(self.selector)
    }

    pub fn set_selector(&mut self, selector: Selector) {
        self.selector = selector.0
    }

    pub fn gate_type(&self) -> GateType {
        GateType(self.type_attr & Self::TYPE_MASK)
    }

    pub fn set_gate_type(&mut self, gate_type: GateType) {
        self.type_attr = (self.type_attr & !Self::TYPE_MASK) | gate_type.0
    }

    /// The privilege level required to call this gate.
    pub fn descriptor_privilege(&self) -> Ring {
        // two bits always make a valid ring
        Ring::new((self.type_attr & Self::DPL_MASK) >> 5).unwrap_or(Ring::RING0)
    }

    pub fn set_descriptor_privilege(&mut self, descriptor_privilege: Ring) {
        self.type_attr = (self.type_attr & !Self::DPL_MASK) | ((descriptor_privilege.number() << 5) & Self::DPL_MASK)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn idt_entry_accessors_roundtrip() {
        let mut e = IdtEntry::empty();
        e.set_offset(0xDEAD_BEEF);
        assert_eq!(e.offset(), 0xDEAD_BEEF);
        e.set_offset(0);
        assert_eq!(e.offset(), 0);

        e.set_descriptor_privilege(Ring::RING3);
        e.set_gate_type(GateType::TRAP_GATE);
        e.set_selector(Selector(0xDEAD));
        assert_eq!(e.descriptor_privilege(), Ring::RING3);
        assert_eq!(e.gate_type(), GateType::TRAP_GATE);
        assert_eq!(e.selector(), Selector(0xDEAD));
    }

    #[test]
    fn empty_idt_entry_correctly_set_up() {
        let e = IdtEntry::empty();
        assert_eq!(e.offset(), 0);
        assert!(!e.present());
        assert_eq!(e.descriptor_privilege(), Ring::RING0);
        assert_eq!(e.gate_type(), GateType::INTERRUPT_GATE);
        assert_eq!(e.selector(), Selector(0));
    }

    #[test]
    fn present_interrupt_gate_encoding() {
        let e = IdtEntry::new(GateType::INTERRUPT_GATE, Selector::KERNEL_CODE, 0x0010_2030, Ring::RING0, true);
        let mut idt = Idt::new();
        idt[3] = e;
        assert_eq!(&idt.as_bytes()[24..32], &[0x30, 0x20, 0x08, 0x00, 0x00, 0x8E, 0x10, 0x00]);
        assert_eq!(idt.as_bytes().len(), 256 * 8);

        let gate = IdtEntry::new(GateType::INTERRUPT_GATE, Selector::KERNEL_CODE, 0, Ring::RING3, true);
        assert_eq!(gate.type_attr, 0xEE);
    }
}
