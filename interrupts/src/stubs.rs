//! Entry stubs for all 256 vectors.
//!
//! Each stub normalizes the stack to a `TrapFrame` by pushing a zero error code where the
//! CPU does not push one, followed by its vector number. The common part saves the
//! registers and calls `trap_dispatch(&mut TrapFrame)`, which the kernel provides.

use core::arch::global_asm;
use core::ptr;

use bare_metal::segments::Selector;

use crate::table::StubTable;

/// Distance between two stubs in bytes.
pub const STUB_STRIDE: u32 = 16;

global_asm!(
    ".section .text",
    ".global trap_stubs",
    ".balign 16",
    "trap_stubs:",
    ".set trap_vector, 0",
    ".rept 256",
    ".balign 16",
    // the CPU pushed an error code for these
    ".if trap_vector == 8 || (trap_vector >= 10 && trap_vector <= 14) || trap_vector == 17 || trap_vector == 21 || trap_vector == 29 || trap_vector == 30",
    ".else",
    "pushl $0",
    ".endif",
    "pushl $trap_vector",
    "jmp trap_common",
    ".set trap_vector, trap_vector + 1",
    ".endr",
    "",
    "trap_common:",
    "pushal",
    "cld",
    "pushl %esp",
    "call trap_dispatch",
    "addl $4, %esp",
    "popal",
    // vector and error code
    "addl $8, %esp",
    "iret",
    options(att_syntax)
);

extern "C" {
    static trap_stubs: u8;
}

/// Where the stubs ended up in the kernel image.
pub fn stub_table() -> StubTable {
    StubTable {
        base: unsafe { ptr::addr_of!(trap_stubs) } as u32,
        stride: STUB_STRIDE,
        selector: Selector::KERNEL_CODE,
    }
}
