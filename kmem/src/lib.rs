#![cfg_attr(not(test), no_std)]
//! Physical memory management for a kernel without paging: a block allocator over a
//! primary heap and an overflow swap region, per-task accounting on top of it and an
//! ownership lock for the framebuffer.

#[macro_use]
extern crate static_assertions;

use core::fmt;

mod arena;
mod block;
pub mod framebuffer;
pub mod heap;
pub mod task;

pub use self::arena::Arena;
pub use self::block::{Origin, ALIGN, HEADER_SIZE};
pub use self::framebuffer::FramebufferLock;
pub use self::heap::{Allocator, AllocatorStats};
pub use self::task::{BlockHandle, TaskId, MAX_SAVED_BLOCKS, MAX_TASKS};

/// Recoverable allocation failures. Corruption and misuse are not reported here,
/// they panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Neither the free list, the heap nor the swap region can hold the request.
    OutOfMemory { requested: usize },
    /// The task id has never been registered.
    TaskNotFound(TaskId),
    /// All saved block slots of the task are in use.
    TooManySavedBlocks(TaskId),
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AllocError::OutOfMemory { requested } => write!(f, "out of memory allocating {} bytes", requested),
            AllocError::TaskNotFound(id) => write!(f, "no task with id {}", id.0),
            AllocError::TooManySavedBlocks(id) => write!(f, "task {} has no free saved block slot", id.0),
        }
    }
}
