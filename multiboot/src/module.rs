//! Boot modules handed over by the bootloader.

use core::slice;

use bare_metal::{PhysAddr, PhysAddrRange};

/// An entry of the module list as laid out by the bootloader.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ModuleEntry {
    mod_start: u32,
    mod_end: u32,
    string: u32,
    reserved: u32,
}

assert_eq_size!(ModuleEntry, [u32; 4]);

impl ModuleEntry {
    /// Physical memory occupied by the module.
    pub fn range(&self) -> PhysAddrRange {
        PhysAddrRange::from_bounds(PhysAddr(self.mod_start as usize), PhysAddr(self.mod_end as usize))
    }

    /// The module string, commonly the path and arguments the module was loaded with.
    pub unsafe fn routing(&self) -> Option<&'static str> {
        super::c_str_at(PhysAddr(self.string as usize)).filter(|s| !s.is_empty())
    }

    /// Build a descriptor referring to the loaded image in place.
    pub unsafe fn descriptor(&self) -> Module {
        let range = self.range();
        Module {
            image: slice::from_raw_parts(range.start.as_ptr(), range.length),
            routing: self.routing(),
        }
    }
}

/// A loaded boot module: its image and its optional routing string.
#[derive(Debug, Clone, Copy)]
pub struct Module {
    pub image: &'static [u8],
    pub routing: Option<&'static str>,
}

impl Module {
    pub fn new(image: &'static [u8], routing: Option<&'static str>) -> Module {
        Module { image, routing }
    }

    pub fn start(&self) -> PhysAddr {
        PhysAddr::of_slice(self.image)
    }

    pub fn range(&self) -> PhysAddrRange {
        PhysAddrRange::new(self.start(), self.image.len())
    }

    /// The path part of the routing string, i.e. everything before the first whitespace.
    pub fn path(&self) -> Option<&'static str> {
        self.routing.and_then(|r| r.split_whitespace().next())
    }

    /// Trailing component of the path, e.g. `hello.py` for `/boot/userland/hello.py arg`.
    pub fn file_name(&self) -> Option<&'static str> {
        self.path().and_then(|p| p.rsplit('/').next()).filter(|n| !n.is_empty())
    }

    /// Whether one of the directories on the module's path is named `tag`.
    pub fn in_directory(&self, tag: &str) -> bool {
        match self.path() {
            None => false,
            Some(path) => {
                let mut components = path.split('/').filter(|c| !c.is_empty());
                // the last component is the file itself
                let _file = components.next_back();
                components.any(|c| c == tag)
            }
        }
    }

    /// Name to show for the module in diagnostics.
    pub fn display_name(&self) -> &'static str {
        self.file_name().unwrap_or("<unnamed>")
    }

    /// Whether `name` refers to this module, either by the full routing string or by its file name.
    pub fn answers_to(&self, name: &str) -> bool {
        self.routing == Some(name) || self.file_name() == Some(name)
    }
}
