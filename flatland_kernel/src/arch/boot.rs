//! Multiboot header and the code between the bootloader and `kernel_main`.
//!
//! The bootloader leaves us in protected mode with a GDT we know nothing about, so the
//! first thing to do is to load our own flat code and data segments.

use core::arch::global_asm;

use multiboot::{header_checksum, HeaderFlags, HEADER_MAGIC};

const FLAGS: HeaderFlags = HeaderFlags::from_bits_truncate(HeaderFlags::PAGE_ALIGN_MODULES.bits() | HeaderFlags::MEMORY_INFO.bits());

global_asm!(
    ".section .multiboot, \"a\"",
    ".balign 4",
    ".long {magic}",
    ".long {flags}",
    ".long {checksum}",
    "",
    ".section .bss",
    ".balign 16",
    "boot_stack_bottom:",
    ".skip 65536",
    "boot_stack_top:",
    "",
    ".section .text",
    ".global _start",
    "_start:",
    "cli",
    "movl $boot_stack_top, %esp",
    "lgdt boot_gdt_pointer",
    "ljmp $0x08, $1f",
    "1:",
    "movw $0x10, %cx",
    "movw %cx, %ds",
    "movw %cx, %es",
    "movw %cx, %fs",
    "movw %cx, %gs",
    "movw %cx, %ss",
    // kernel_main(magic, info)
    "pushl %ebx",
    "pushl %eax",
    "call kernel_main",
    "2:",
    "hlt",
    "jmp 2b",
    "",
    ".section .rodata",
    ".balign 8",
    "boot_gdt:",
    ".quad 0",
    ".quad 0x00CF9A000000FFFF",
    ".quad 0x00CF92000000FFFF",
    "boot_gdt_pointer:",
    ".word boot_gdt_pointer - boot_gdt - 1",
    ".long boot_gdt",
    magic = const HEADER_MAGIC,
    flags = const FLAGS.bits(),
    checksum = const header_checksum(FLAGS),
    options(att_syntax)
);
