#![cfg_attr(not(test), no_std)]
//! Parser for the Multiboot (version 1) information structure provided by the bootloader.
//! The lifetimes of the data extracted from it are 'static, because it has been present
//! before Rust code is executed and it's never going to be dropped.
//!
//! The safety of this parser depends on the bootloader being multiboot compliant.
//! If the bootloader provides bogus data, trying to parse it using these structures
//! likely ends in sadness.

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate static_assertions;

use core::fmt;
use core::slice;
use core::str;

use bare_metal::PhysAddr;

pub mod cmdline;
pub mod module;

pub use self::cmdline::{CmdLine, CmdLineToken};
pub use self::module::{Module, ModuleEntry};

/// Magic value the kernel image announces in its multiboot header.
pub const HEADER_MAGIC: u32 = 0x1BAD_B002;
/// Magic value a compliant bootloader leaves in EAX when entering the kernel.
pub const BOOTLOADER_MAGIC: u32 = 0x2BAD_B002;

/// Upper bound for strings the bootloader hands over (command lines, module names).
pub const MAX_STRING_LENGTH: usize = 4096;

bitflags! {
    /// Which fields of the `MultibootInfo` structure are valid.
    pub struct InfoFlags: u32 {
        const MEMORY = 1 << 0;
        const BOOT_DEVICE = 1 << 1;
        const CMDLINE = 1 << 2;
        const MODULES = 1 << 3;
        const AOUT_SYMBOLS = 1 << 4;
        const ELF_SECTIONS = 1 << 5;
        const MEMORY_MAP = 1 << 6;
    }
}

bitflags! {
    /// Requests a kernel image makes in its multiboot header.
    pub struct HeaderFlags: u32 {
        const PAGE_ALIGN_MODULES = 1 << 0;
        const MEMORY_INFO = 1 << 1;
    }
}

/// Value that makes magic, flags and checksum of a multiboot header sum up to zero.
pub const fn header_checksum(flags: HeaderFlags) -> u32 {
    0_u32.wrapping_sub(HEADER_MAGIC).wrapping_sub(flags.bits())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootInfoError {
    /// EAX did not contain `BOOTLOADER_MAGIC` on entry.
    BadMagic(u32),
}

impl fmt::Display for BootInfoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BootInfoError::BadMagic(magic) => write!(f, "not multiboot: magic {:#010x}", magic),
        }
    }
}

/// Root of the Multiboot info data, up to and including the memory map fields.
#[repr(C)]
pub struct MultibootInfo {
    flags: u32,
    mem_lower: u32,
    mem_upper: u32,
    boot_device: u32,
    cmdline: u32,
    mods_count: u32,
    mods_addr: u32,
    syms: [u32; 4],
    mmap_length: u32,
    mmap_addr: u32,
}

assert_eq_size!(MultibootInfo, [u32; 13]);

impl MultibootInfo {
    /// Interpret the structure at the address the bootloader passed in EBX, after checking
    /// the magic it passed in EAX.
    pub unsafe fn from_boot_registers(magic: u32, addr: PhysAddr) -> Result<&'static MultibootInfo, BootInfoError> {
        if magic != BOOTLOADER_MAGIC {
            return Err(BootInfoError::BadMagic(magic));
        }
        Ok(&*addr.as_ptr::<MultibootInfo>())
    }

    pub fn flags(&self) -> InfoFlags {
        InfoFlags::from_bits_truncate(self.flags)
    }

    /// Lower and upper memory size in KiB, if the bootloader reported them.
    pub fn memory_kib(&self) -> Option<(usize, usize)> {
        if self.flags().contains(InfoFlags::MEMORY) {
            Some((self.mem_lower as usize, self.mem_upper as usize))
        } else {
            None
        }
    }

    /// First address past the upper memory region, which starts at 1 MiB.
    pub fn upper_memory_end(&self) -> Option<PhysAddr> {
        self.memory_kib().map(|(_, upper)| PhysAddr(0x10_0000 + upper * 1024))
    }

    /// Kernel command line, if present and valid UTF-8.
    pub unsafe fn cmdline(&self) -> Option<&'static str> {
        if self.flags().contains(InfoFlags::CMDLINE) {
            c_str_at(PhysAddr(self.cmdline as usize))
        } else {
            None
        }
    }

    /// The raw module list.
    pub unsafe fn module_entries(&self) -> &'static [ModuleEntry] {
        if self.flags().contains(InfoFlags::MODULES) && self.mods_count > 0 {
            slice::from_raw_parts(PhysAddr(self.mods_addr as usize).as_ptr(), self.mods_count as usize)
        } else {
            &[]
        }
    }

    /// Iterate the modules as descriptors over their loaded images.
    pub unsafe fn modules(&self) -> impl Iterator<Item = Module> {
        self.module_entries().iter().map(|e| e.descriptor())
    }
}

/// Read a NUL-terminated string from physical memory, scanning at most `MAX_STRING_LENGTH` bytes.
pub unsafe fn c_str_at(addr: PhysAddr) -> Option<&'static str> {
    if addr == PhysAddr::NULL {
        return None;
    }
    let base = addr.as_ptr::<u8>();
    let mut len = 0;
    while len < MAX_STRING_LENGTH && *base.add(len) != 0 {
        len += 1;
    }
    str_until_nul(slice::from_raw_parts(base, len))
}

/// Interpret `bytes` as a string ending at the first NUL (or at the end of the slice).
pub fn str_until_nul(bytes: &[u8]) -> Option<&str> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    str::from_utf8(&bytes[..end]).ok()
}
