#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate static_assertions;

pub mod exceptions;
pub mod frame;
pub mod idt;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub mod pic;
#[cfg(target_arch = "x86")]
pub mod stubs;
mod table;

pub use self::frame::TrapFrame;
pub use self::table::*;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
use core::arch::asm;

/// Enable interrupts on the current CPU.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[inline]
pub unsafe fn enable() {
    asm!("sti", options(nomem, nostack))
}

/// Disable interrupts on the current CPU.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[inline]
pub unsafe fn disable() {
    asm!("cli", options(nomem, nostack))
}
