//! Placement of the managed regions in physical memory.

use core::fmt;

use log::{debug, warn};

use bare_metal::{Alignable, PhysAddr, PhysAddrRange};

use crate::config::{HEAP_SIZE, SWAP_SIZE};

const REGION_ALIGN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    pub heap: PhysAddrRange,
    pub swap: PhysAddrRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    /// The kernel image reaches into the load window.
    KernelOverlapsWindow,
    /// Heap and swap do not fit below the end of memory.
    OutOfMemory { needed: PhysAddr, available: PhysAddr },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LayoutError::KernelOverlapsWindow => write!(f, "kernel image overlaps the load window"),
            LayoutError::OutOfMemory { needed, available } => {
                write!(f, "managed memory needs RAM up to {:p}, only {:p} present", needed, available)
            }
        }
    }
}

/// Put heap and swap above everything that must stay intact: the kernel image, the boot
/// modules and the load window. `memory_end` is the end of usable RAM, if known.
pub fn place_regions(
    kernel_end: PhysAddr,
    modules: &[PhysAddrRange],
    window: PhysAddrRange,
    memory_end: Option<PhysAddr>,
) -> Result<MemoryLayout, LayoutError> {
    if kernel_end > window.start {
        return Err(LayoutError::KernelOverlapsWindow);
    }
    for module in modules.iter().filter(|m| m.overlaps(&window)) {
        warn!("module at {} overlaps the load window {}", module, window);
    }

    let start = modules
        .iter()
        .map(|m| m.end())
        .chain([kernel_end, window.end()])
        .max()
        .unwrap_or(kernel_end);
    let heap_start = start.checked_align_up(REGION_ALIGN).ok_or(LayoutError::OutOfMemory {
        needed: PhysAddr(usize::MAX),
        available: memory_end.unwrap_or(PhysAddr(usize::MAX)),
    })?;
    let heap = PhysAddrRange::new(heap_start, HEAP_SIZE);
    let swap = PhysAddrRange::new(heap.end(), SWAP_SIZE);

    if let Some(available) = memory_end {
        if swap.end() > available {
            return Err(LayoutError::OutOfMemory {
                needed: swap.end(),
                available,
            });
        }
    }
    debug!("heap {}, swap {}", heap, swap);
    Ok(MemoryLayout { heap, swap })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::LOAD_WINDOW;

    const KERNEL_END: PhysAddr = PhysAddr(0x0011_2345);

    #[test]
    fn above_the_window_without_modules() {
        let layout = place_regions(KERNEL_END, &[], LOAD_WINDOW, None).unwrap();
        assert_eq!(layout.heap.start, PhysAddr(0x0030_0000));
        assert_eq!(layout.heap.length, HEAP_SIZE);
        assert_eq!(layout.swap.start, layout.heap.end());
        assert_eq!(layout.swap.length, SWAP_SIZE);
    }

    #[test]
    fn above_the_highest_module() {
        let modules = [
            PhysAddrRange::new(PhysAddr(0x0040_0000), 0x1234),
            PhysAddrRange::new(PhysAddr(0x0011_3000), 0x100),
        ];
        let layout = place_regions(KERNEL_END, &modules, LOAD_WINDOW, None).unwrap();
        assert_eq!(layout.heap.start, PhysAddr(0x0040_2000));
        assert!(modules.iter().all(|m| !m.overlaps(&layout.heap) && !m.overlaps(&layout.swap)));
    }

    #[test]
    fn memory_end_bounds_the_regions() {
        let needed = PhysAddr(0x0030_0000 + HEAP_SIZE + SWAP_SIZE);
        assert!(place_regions(KERNEL_END, &[], LOAD_WINDOW, Some(needed)).is_ok());
        assert_eq!(
            place_regions(KERNEL_END, &[], LOAD_WINDOW, Some(needed - 1)),
            Err(LayoutError::OutOfMemory {
                needed,
                available: needed - 1
            })
        );
    }

    #[test]
    fn kernel_must_end_below_the_window() {
        assert_eq!(
            place_regions(PhysAddr(0x0020_0001), &[], LOAD_WINDOW, None),
            Err(LayoutError::KernelOverlapsWindow)
        );
    }
}
