//! This module provides a simple wrapper around the VGA text buffer.
//!
//! The creation of the wrapper is unsafe, because it would allow
//! concurrent modification of the same memory location, as there is
//! only one VGA buffer.

use core::fmt;

use bare_metal::PhysAddr;

use crate::io::OutputSink;

/// Physical address of the VGA text buffer.
pub const VGA_PHYS_ADDR: PhysAddr = PhysAddr(0xB8000);

/// The 16 VGA colors
#[derive(Eq, PartialEq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum Color {
    Black = 0,
    Blue = 1,
    Green = 2,
    Cyan = 3,
    Red = 4,
    Magenta = 5,
    Brown = 6,
    LightGray = 7,
    DarkGray = 8,
    LightBlue = 9,
    LightGreen = 10,
    LightCyan = 11,
    LightRed = 12,
    LightMagenta = 13,
    Yellow = 14,
    White = 15,
}

/// Entry in the VGA buffer consisting of a foreground and background color, and an 8 bit character.
#[derive(Eq, PartialEq, Copy, Clone, Debug)]
#[repr(transparent)]
pub struct VgaChar(u16);

assert_eq_size!(VgaChar, u16);

impl VgaChar {
    /// Create a new VGA character representation from its colors and a character.
    pub fn new(fg: Color, bg: Color, ch: u8) -> VgaChar {
        VgaChar((ch as u16) | ((fg as u16) << 8) | ((bg as u16) << 12))
    }

    /// Extract the character.
    pub fn ch(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// Raw attribute byte.
    pub fn attributes(self) -> u8 {
        (self.0 >> 8) as u8
    }
}

/// Wrapper providing access to the VGA memory area.
pub struct VgaMem {
    buffer: *mut u16,
}

unsafe impl Send for VgaMem {}

impl VgaMem {
    /// Create a new wrapper for the VGA buffer. This is unsafe because it allows the
    /// creation of multiple instances, even though there is just one single VGA buffer.
    pub unsafe fn from_addr(vga_address: PhysAddr) -> Self {
        VgaMem {
            buffer: vga_address.as_mut_ptr(),
        }
    }

    pub const WIDTH: usize = 80;
    pub const HEIGHT: usize = 25;
    pub const SIZE: usize = Self::WIDTH * Self::HEIGHT;

    /// Set every character to the same value.
    pub fn clear(&mut self, fill_entry: VgaChar) {
        for off in 0..Self::SIZE {
            self.write(off, fill_entry);
        }
    }

    /// Extract a colored character from the given offset.
    #[inline]
    pub fn read(&self, off: usize) -> VgaChar {
        assert!(off < Self::SIZE);
        unsafe { VgaChar(self.buffer.add(off).read_volatile()) }
    }

    /// Set the colored character at the given offset.
    #[inline]
    pub fn write(&mut self, off: usize, entry: VgaChar) {
        assert!(off < Self::SIZE);
        unsafe { self.buffer.add(off).write_volatile(entry.0) }
    }

    /// Compute the offset in the VGA buffer for accessing the character
    /// with the given x and y coordinates.
    #[inline]
    pub fn offset_at(x: usize, y: usize) -> usize {
        y * Self::WIDTH + x
    }
}

/// Scrolling text console on top of the VGA buffer.
pub struct TextConsole {
    mem: VgaMem,
    x: usize,
    y: usize,
    fg: Color,
    bg: Color,
}

impl TextConsole {
    pub fn new(mem: VgaMem) -> TextConsole {
        Self::with_colors(mem, Color::LightGray, Color::Black)
    }

    /// A console that starts with a cleared screen in the given colors.
    pub fn with_colors(mut mem: VgaMem, fg: Color, bg: Color) -> TextConsole {
        mem.clear(VgaChar::new(fg, bg, b' '));
        TextConsole { mem, x: 0, y: 0, fg, bg }
    }

    pub fn write_byte(&mut self, ch: u8) {
        match ch {
            b'\n' => self.new_line(),
            b'\r' => self.x = 0,
            ch => {
                if self.x == VgaMem::WIDTH {
                    self.new_line();
                }
                let printable = if (0x20..0x7F).contains(&ch) { ch } else { b'?' };
                self.mem.write(VgaMem::offset_at(self.x, self.y), VgaChar::new(self.fg, self.bg, printable));
                self.x += 1;
            }
        }
    }

    fn new_line(&mut self) {
        self.x = 0;
        if self.y + 1 < VgaMem::HEIGHT {
            self.y += 1;
            return;
        }
        for off in VgaMem::WIDTH..VgaMem::SIZE {
            let entry = self.mem.read(off);
            self.mem.write(off - VgaMem::WIDTH, entry);
        }
        let blank = VgaChar::new(self.fg, self.bg, b' ');
        for x in 0..VgaMem::WIDTH {
            self.mem.write(VgaMem::offset_at(x, self.y), blank);
        }
    }
}

impl fmt::Write for TextConsole {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for ch in s.bytes() {
            self.write_byte(ch);
        }
        Ok(())
    }
}

impl OutputSink for TextConsole {
    fn write_bytes(&mut self, bytes: &[u8]) {
        for &ch in bytes {
            self.write_byte(ch);
        }
    }

    /// White on red, starting over at the top.
    fn enter_crash_mode(&mut self) {
        self.fg = Color::White;
        self.bg = Color::Red;
        self.mem.clear(VgaChar::new(self.fg, self.bg, b' '));
        self.x = 0;
        self.y = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use core::fmt::Write;

    fn console() -> TextConsole {
        let buffer = std::boxed::Box::leak(std::vec![0_u16; VgaMem::SIZE].into_boxed_slice());
        TextConsole::new(unsafe { VgaMem::from_addr(PhysAddr::of_slice(buffer)) })
    }

    fn row(c: &TextConsole, y: usize) -> std::string::String {
        (0..VgaMem::WIDTH)
            .map(|x| c.mem.read(VgaMem::offset_at(x, y)).ch() as char)
            .collect::<std::string::String>()
            .trim_end()
            .into()
    }

    #[test]
    fn lines_wrap_and_scroll() {
        let mut c = console();
        for i in 0..VgaMem::HEIGHT {
            writeln!(c, "line {}", i).unwrap();
        }
        assert_eq!(row(&c, 0), "line 1");
        assert_eq!(row(&c, VgaMem::HEIGHT - 2), "line 24");
        assert_eq!(row(&c, VgaMem::HEIGHT - 1), "");

        c.write_bytes(&[b'x'; VgaMem::WIDTH + 1]);
        assert_eq!(row(&c, VgaMem::HEIGHT - 2), "x".repeat(VgaMem::WIDTH));
        assert_eq!(row(&c, VgaMem::HEIGHT - 1), "x");
    }

    #[test]
    fn crash_mode_repaints() {
        let mut c = console();
        c.write_bytes(b"boot\x01");
        assert_eq!(row(&c, 0), "boot?");
        c.enter_crash_mode();
        write!(c, "Panic").unwrap();
        assert_eq!(row(&c, 0), "Panic");
        assert_eq!(c.mem.read(VgaMem::SIZE - 1).attributes(), 0x4F);
    }
}
