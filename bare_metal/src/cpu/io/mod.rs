//! Provides primitive operations for working with the CPUs I/O ports

use core::arch::asm;
use core::ops;

pub mod com;

/// A CPU I/O port number.
#[derive(Debug, Eq, PartialEq, Copy, Clone, PartialOrd, Ord)]
pub struct PortNumber(pub u16);

impl ops::Add<u16> for PortNumber {
    type Output = PortNumber;

    fn add(self, offset: u16) -> PortNumber {
        PortNumber(self.0 + offset)
    }
}

// unsafe primitives

#[inline]
pub unsafe fn outb(port: PortNumber, data: u8) {
    asm!("out dx, al", in("dx") port.0, in("al") data, options(nomem, nostack, preserves_flags));
}

#[inline]
pub unsafe fn inb(port: PortNumber) -> u8 {
    let data: u8;
    asm!("in al, dx", out("al") data, in("dx") port.0, options(nomem, nostack, preserves_flags));
    data
}

/// Give slow devices (like the 8259 PIC) time to react by writing to an unused port.
#[inline]
pub unsafe fn io_wait() {
    outb(PortNumber(0x80), 0);
}
