use alloc::vec::Vec;
use core::fmt::{self, Write};

use bare_metal::PhysAddr;
use interrupts::{StubTable, TrapTable};
use kmem::Allocator;
use modload::{ExecContext, ModuleLoader};
use multiboot::Module;

use crate::config::BootOptions;
use crate::crash::{CrashReport, InterpreterException};
use crate::io::Collaborators;
use crate::trap::TrapOutcome;

/// All mutable kernel state.
///
/// Subsystems are methods on this type; the boot code moves it into a `UpCell` before
/// the first module runs, and trap entry borrows it from there.
pub struct Kernel {
    pub(crate) options: BootOptions,
    pub(crate) mem: Allocator,
    pub(crate) loader: ModuleLoader,
    pub(crate) traps: TrapTable<Kernel, TrapOutcome>,
    pub(crate) io: Collaborators,
    pub(crate) modules: Vec<Module>,
    pub(crate) next_module: usize,
    /// Contexts to restore when the innermost running module returns.
    pub(crate) returns: Vec<ExecContext>,
    /// End of the kernel image; everything below is off limits for syscall arguments.
    pub(crate) kernel_end: PhysAddr,
    pub(crate) last_exception: Option<InterpreterException>,
    pub(crate) last_crash: Option<CrashReport>,
}

impl Kernel {
    pub fn new(options: BootOptions, mut mem: Allocator, loader: ModuleLoader, io: Collaborators, kernel_end: PhysAddr) -> Kernel {
        mem.set_poisoning(options.debug);
        Kernel {
            options,
            mem,
            loader,
            traps: TrapTable::new(),
            io,
            modules: Vec::new(),
            next_module: 0,
            returns: Vec::new(),
            kernel_end,
            last_exception: None,
            last_crash: None,
        }
    }

    pub fn options(&self) -> &BootOptions {
        &self.options
    }

    pub fn allocator(&self) -> &Allocator {
        &self.mem
    }

    pub fn allocator_mut(&mut self) -> &mut Allocator {
        &mut self.mem
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Point every vector at its entry stub and drop all handlers.
    pub fn init_traps(&mut self, stubs: &StubTable) {
        self.traps.init(stubs);
    }

    pub fn traps(&self) -> &TrapTable<Kernel, TrapOutcome> {
        &self.traps
    }

    /// Remember an exception reported by an interpreter, for the next crash report.
    pub fn record_exception(&mut self, exception: InterpreterException) {
        self.last_exception = Some(exception);
    }

    /// Switch to the context of module `name` until `module_returned`.
    ///
    /// Exceptions recorded before belong to earlier modules and are dropped.
    pub(crate) fn enter_module(&mut self, name: &str, user: bool) {
        self.last_exception = None;
        let previous = self.loader.enter(name, user);
        self.returns.push(previous);
    }

    pub fn last_exception(&self) -> Option<&InterpreterException> {
        self.last_exception.as_ref()
    }

    pub fn last_crash(&self) -> Option<&CrashReport> {
        self.last_crash.as_ref()
    }

    /// Print to the console.
    pub fn print(&mut self, args: fmt::Arguments) {
        let _ = self.io.console.write_fmt(args);
    }
}
