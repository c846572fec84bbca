//! Interfaces to the subsystems outside of the kernel core.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use bare_metal::PhysAddr;

use crate::crash::InterpreterException;

/// Character output, e.g. the text console or the serial port.
pub trait OutputSink: fmt::Write {
    /// Write raw bytes, one character per byte.
    fn write_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            let _ = self.write_char(byte as char);
        }
    }

    /// Switch to the presentation used for crash reports.
    fn enter_crash_mode(&mut self) {}
}

/// Character input.
pub trait InputSink {
    fn read_char(&mut self) -> Option<u8>;

    /// Busy wait for the next character.
    fn wait_key(&mut self) -> u8 {
        loop {
            if let Some(c) = self.read_char() {
                return c;
            }
            core::hint::spin_loop();
        }
    }
}

/// Byte addressed storage. Both operations return the number of bytes transferred, which
/// is short when the range crosses the end of the device.
pub trait Storage {
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> usize;
    fn write(&mut self, offset: usize, data: &[u8]) -> usize;
}

/// Runtime for modules written in a scripting language.
pub trait Interpreter {
    /// File name suffix of the modules this interpreter runs, e.g. `.py`.
    fn suffix(&self) -> &str;

    fn run(&mut self, name: &str, source: &[u8]) -> Result<(), InterpreterException>;
}

/// Destination for crash artifacts.
pub trait CrashStore {
    /// Store `contents` under `name`, replacing an older artifact. `false` on failure.
    fn persist(&mut self, name: &str, contents: &[u8]) -> bool;
}

/// Access to memory that is addressed by modules, which the borrow checker knows nothing about.
pub trait PhysMemory {
    /// Fill `buf` from `addr`. `false` if the range is not accessible.
    fn read(&self, addr: PhysAddr, buf: &mut [u8]) -> bool;
    fn write(&mut self, addr: PhysAddr, data: &[u8]) -> bool;
}

pub trait Machine {
    fn disable_interrupts(&mut self);
}

pub struct Collaborators {
    pub console: Box<dyn OutputSink>,
    pub serial: Option<Box<dyn OutputSink>>,
    pub input: Box<dyn InputSink>,
    pub storage: Option<Box<dyn Storage>>,
    pub interpreters: Vec<Box<dyn Interpreter>>,
    pub crash_store: Option<Box<dyn CrashStore>>,
    pub memory: Box<dyn PhysMemory>,
    pub machine: Box<dyn Machine>,
}
