//! Trap entry: routing through the trap table and the hand-over to spawned modules.

use alloc::format;
use alloc::string::ToString;

use log::debug;

use bare_metal::{PhysAddr, UpCell};
use interrupts::exceptions::{is_resumable, pushes_error_code};
use interrupts::{Fault, Route, TrapFrame};
use modload::Executor;

use crate::context::Kernel;

/// Result of a trap handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapOutcome {
    /// Return to the interrupted code.
    Resume,
    /// Call `entry` on behalf of the interrupted code, then resume it.
    Enter { entry: PhysAddr },
    /// The crash report has been written, stop the machine.
    Halt,
}

/// What the entry stub has to do after `dispatch_trap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Resume,
    Halt,
    /// The kernel context is in use further down the stack or not set up yet.
    Unavailable,
}

fn fault_message(fault: &Fault, error_code: u32) -> alloc::string::String {
    match fault {
        Fault::Exception { vector, .. } if pushes_error_code(*vector) => {
            format!("{} (error {:#x})", fault, error_code)
        }
        _ => fault.to_string(),
    }
}

impl Kernel {
    pub fn handle_trap(&mut self, frame: &mut TrapFrame) -> TrapOutcome {
        let vector = frame.vector as u8;
        match self.traps.route(vector) {
            Route::Handler(handler) => handler(self, frame),
            Route::Resume => {
                debug!("trap {:#x} at {:#010x}, resuming", vector, frame.eip);
                TrapOutcome::Resume
            }
            Route::Fatal(fault) => {
                let message = fault_message(&fault, frame.error_code);
                self.capture_crash(&message, frame.eip, frame.registers());
                TrapOutcome::Halt
            }
        }
    }

    /// Restore the context of the code that spawned a module, which sees 0 as the result.
    pub fn finish_spawn(&mut self, frame: &mut TrapFrame) {
        self.module_returned();
        frame.eax = 0;
    }
}

/// Handle a trap of the code interrupted in `frame` using the kernel in `cell`.
///
/// The kernel is not borrowed while a spawned module runs, so the module can trap again.
pub fn dispatch_trap<E: Executor>(cell: &UpCell<Option<Kernel>>, frame: &mut TrapFrame, executor: &mut E) -> Disposition {
    let outcome = match cell.try_access() {
        Some(mut guard) => match guard.as_mut() {
            Some(kernel) => kernel.handle_trap(frame),
            None => return Disposition::Unavailable,
        },
        None if is_resumable(frame.vector as u8) => return Disposition::Resume,
        None => return Disposition::Unavailable,
    };
    match outcome {
        TrapOutcome::Resume => Disposition::Resume,
        TrapOutcome::Halt => Disposition::Halt,
        TrapOutcome::Enter { entry } => {
            unsafe { executor.call(entry) };
            match cell.try_access() {
                Some(mut guard) => match guard.as_mut() {
                    Some(kernel) => {
                        kernel.finish_spawn(frame);
                        Disposition::Resume
                    }
                    None => Disposition::Unavailable,
                },
                None => Disposition::Unavailable,
            }
        }
    }
}
