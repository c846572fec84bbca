//! Provides an interface to the serial COM ports.

use core::fmt;
use core::hint;

use super::PortNumber;

/// The usual address of the COM1 port.
pub const COM1_ADDR: PortNumber = PortNumber(0x3F8);

const DATA: u16 = 0;
const INTERRUPT_ENABLE: u16 = 1;
const FIFO_CONTROL: u16 = 2;
const LINE_CONTROL: u16 = 3;
const MODEM_CONTROL: u16 = 4;
const LINE_STATUS: u16 = 5;

const LINE_STATUS_DATA_READY: u8 = 0x01;
const LINE_STATUS_TRANSMIT_EMPTY: u8 = 0x20;

/// A safe interface to a serial port identified by its base port number.
#[derive(Debug, Eq, PartialEq)]
pub struct SerialPort(PortNumber);

impl SerialPort {
    /// Creates a new handle to a serial port. This is unsafe for several reason:
    ///   1. some ports allow access to hardware that safe code shouldn't have
    ///   2. it would allow multiple handles to interleave their output
    ///   3. is only safe to use with COM ports
    ///
    /// Therefore, the caller must make sure that writing to this port can do no harm (e.g. writing to COM1),
    /// and that the port number refers to a COM port.
    pub const unsafe fn new(port_number: PortNumber) -> SerialPort {
        SerialPort(port_number)
    }

    /// Program the UART for 115200 baud, 8N1 with enabled and cleared FIFOs.
    pub fn init(&mut self) {
        unsafe {
            super::outb(self.0 + INTERRUPT_ENABLE, 0x00);
            // DLAB on, divisor 1
            super::outb(self.0 + LINE_CONTROL, 0x80);
            super::outb(self.0 + DATA, 0x01);
            super::outb(self.0 + INTERRUPT_ENABLE, 0x00);
            super::outb(self.0 + LINE_CONTROL, 0x03);
            super::outb(self.0 + FIFO_CONTROL, 0xC7);
            super::outb(self.0 + MODEM_CONTROL, 0x0B);
        }
    }

    fn line_status(&self) -> u8 {
        unsafe { super::inb(self.0 + LINE_STATUS) }
    }

    #[inline]
    pub fn write_byte(&mut self, data: u8) {
        while self.line_status() & LINE_STATUS_TRANSMIT_EMPTY == 0 {
            hint::spin_loop();
        }
        unsafe {
            super::outb(self.0 + DATA, data);
        }
    }

    pub fn write(&mut self, data: &[u8]) {
        for &byte in data {
            self.write_byte(byte);
        }
    }

    /// Return the next received byte, if there is one.
    pub fn try_read_byte(&mut self) -> Option<u8> {
        if self.line_status() & LINE_STATUS_DATA_READY != 0 {
            Some(unsafe { super::inb(self.0 + DATA) })
        } else {
            None
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}
