//! The legacy 8259 PIC pair.

use bare_metal::cpu::io::{inb, io_wait, outb, PortNumber};

pub const PIC1_CMD: PortNumber = PortNumber(0x0020);
pub const PIC1_DATA: PortNumber = PortNumber(0x0021);
pub const PIC2_CMD: PortNumber = PortNumber(0x00A0);
pub const PIC2_DATA: PortNumber = PortNumber(0x00A1);

/// ICW4
pub const ICW1_ICW4: u8 = 0x01;
/// Initialization
pub const ICW1_INIT: u8 = 0x10;

/// 8086/88 (MCS-80/85) mode
pub const ICW4_8086: u8 = 0x01;

/// Reinitialize the PICs, mapping them to the given interrupt vector offsets.
/// The masks are preserved.
pub unsafe fn remap(pic1_offset: u8, pic2_offset: u8) {
    let (mask1, mask2) = get_masks();
    // ICW1: start initialization in cascade mode
    outb(PIC1_CMD, ICW1_INIT | ICW1_ICW4);
    io_wait();
    outb(PIC2_CMD, ICW1_INIT | ICW1_ICW4);
    io_wait();
    // ICW2: write new offsets
    outb(PIC1_DATA, pic1_offset);
    io_wait();
    outb(PIC2_DATA, pic2_offset);
    io_wait();
    // ICW3: setup master/slave connection
    outb(PIC1_DATA, 1_u8 << 2); // tell master that the slave is at IRQ2
    io_wait();
    outb(PIC2_DATA, 2); // tell slave that it's connected to IRQ2 on master
    io_wait();
    // ICW4: tell PICs that they're in 8086 mode
    outb(PIC1_DATA, ICW4_8086);
    io_wait();
    outb(PIC2_DATA, ICW4_8086);
    io_wait();
    set_masks(mask1, mask2);
}

/// Return the IRQ masks for PIC1 and PIC2.
pub unsafe fn get_masks() -> (u8, u8) {
    (inb(PIC1_DATA), inb(PIC2_DATA))
}

/// Set the IRQ masks for PIC1 and PIC2.
pub unsafe fn set_masks(pic1_mask: u8, pic2_mask: u8) {
    outb(PIC1_DATA, pic1_mask);
    outb(PIC2_DATA, pic2_mask);
}

/// Mask every IRQ line.
pub unsafe fn mask_all() {
    set_masks(0xFF, 0xFF);
}

