#![cfg_attr(target_os = "none", no_std)]
//! Kernel core of flatland, a single address space kernel for 32-bit x86.
//!
//! The hardware independent parts live in the modules below and are tested on the host,
//! where the crate links against `std`.
//! `arch` ties them to the machine: the Multiboot entry point, the trap entry and the
//! panic handler.

extern crate alloc;
#[macro_use]
extern crate static_assertions;

pub mod boot;
pub mod config;
pub mod context;
pub mod crash;
pub mod io;
pub mod layout;
pub mod logger;
pub mod syscall;
pub mod trap;
pub mod vga;

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod arch;

pub use self::context::Kernel;
