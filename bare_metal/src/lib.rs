#![cfg_attr(not(test), no_std)]

mod align;
mod addr;
mod cell;

pub mod cpu;
pub mod segments;

pub use self::align::*;
pub use self::addr::*;
pub use self::cell::*;
