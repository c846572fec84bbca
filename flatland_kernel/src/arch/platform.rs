//! The collaborators available on bare metal.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::ptr;

use bare_metal::cpu::io::com::{SerialPort, COM1_ADDR};
use bare_metal::PhysAddr;

use crate::io::{Collaborators, InputSink, Machine, OutputSink, PhysMemory};
use crate::vga::{TextConsole, VgaMem, VGA_PHYS_ADDR};

/// COM1 as output and input device.
pub struct SerialConsole(SerialPort);

impl SerialConsole {
    pub fn com1() -> SerialConsole {
        SerialConsole(unsafe { SerialPort::new(COM1_ADDR) })
    }
}

impl fmt::Write for SerialConsole {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        fmt::Write::write_str(&mut self.0, s)
    }
}

impl OutputSink for SerialConsole {
    fn write_bytes(&mut self, bytes: &[u8]) {
        self.0.write(bytes);
    }
}

impl InputSink for SerialConsole {
    fn read_char(&mut self) -> Option<u8> {
        self.0.try_read_byte()
    }
}

/// Memory accessed through the identity mapping of protected mode without paging.
pub struct RawMemory;

impl RawMemory {
    fn valid(addr: PhysAddr, len: usize) -> bool {
        addr != PhysAddr::NULL && addr.checked_add(len).is_some()
    }
}

impl PhysMemory for RawMemory {
    fn read(&self, addr: PhysAddr, buf: &mut [u8]) -> bool {
        if !Self::valid(addr, buf.len()) {
            return false;
        }
        unsafe { ptr::copy_nonoverlapping(addr.as_ptr::<u8>(), buf.as_mut_ptr(), buf.len()) };
        true
    }

    fn write(&mut self, addr: PhysAddr, data: &[u8]) -> bool {
        if !Self::valid(addr, data.len()) {
            return false;
        }
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), addr.as_mut_ptr::<u8>(), data.len()) };
        true
    }
}

pub struct CpuControl;

impl Machine for CpuControl {
    fn disable_interrupts(&mut self) {
        unsafe { interrupts::disable() }
    }
}

/// VGA text console, COM1 for serial output and input. There is no storage, no
/// interpreter and nowhere to persist crash reports.
pub fn collaborators() -> Collaborators {
    Collaborators {
        console: Box::new(TextConsole::new(unsafe { VgaMem::from_addr(VGA_PHYS_ADDR) })),
        serial: Some(Box::new(SerialConsole::com1())),
        input: Box::new(SerialConsole::com1()),
        storage: None,
        interpreters: Vec::new(),
        crash_store: None,
        memory: Box::new(RawMemory),
        machine: Box::new(CpuControl),
    }
}
