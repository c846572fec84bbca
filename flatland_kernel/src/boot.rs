//! The boot orchestrator.
//!
//! Boot modules run one after the other in the order the loader lists them. Binaries are
//! called with the kernel context released, so `next_step` hands back the entry point of
//! each binary module and `run_boot` makes the call.

use alloc::vec::Vec;
use core::fmt;

use log::{error, info, warn};

use bare_metal::{PhysAddr, UpCell};
use modload::{classify, Executor, Format};
use multiboot::Module;

use crate::config::{RunMode, USERLAND_TAG};
use crate::context::Kernel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStep {
    /// Call `entry`, then report back with `module_returned`.
    Enter { entry: PhysAddr },
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    OtherRunMode,
    Empty,
    DisabledByMode,
    Unknown,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SkipReason::OtherRunMode => f.write_str("belongs to the other run mode"),
            SkipReason::Empty => f.write_str("empty image"),
            SkipReason::DisabledByMode => f.write_str("disabled by module mode"),
            SkipReason::Unknown => f.write_str("unknown module type"),
        }
    }
}

/// How a boot module is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// Source for the interpreter with the given index.
    Interpreted(usize),
    /// Called in place.
    Flat,
    /// Placed in the load window first.
    Object,
    Skip(SkipReason),
}

impl Kernel {
    pub fn classify_module(&self, module: &Module) -> ModuleKind {
        let userland = module.in_directory(USERLAND_TAG);
        if userland != (self.options.run_mode == RunMode::Userland) {
            return ModuleKind::Skip(SkipReason::OtherRunMode);
        }
        if module.image.is_empty() {
            return ModuleKind::Skip(SkipReason::Empty);
        }
        let mode = self.options.module_mode;
        // scripts are never inspected for the object magic
        let interpreter = module
            .file_name()
            .and_then(|name| self.io.interpreters.iter().position(|i| name.ends_with(i.suffix())));
        if let Some(index) = interpreter {
            if mode.runs_interpreted() {
                return ModuleKind::Interpreted(index);
            }
            return ModuleKind::Skip(SkipReason::DisabledByMode);
        }
        if !mode.runs_binaries() {
            return ModuleKind::Skip(SkipReason::DisabledByMode);
        }
        match classify(module.image) {
            Format::Object => ModuleKind::Object,
            Format::Flat if module.routing.is_none() || module.file_name().map_or(false, |n| n.ends_with(".bin")) => {
                ModuleKind::Flat
            }
            Format::Flat => ModuleKind::Skip(SkipReason::Unknown),
        }
    }

    /// Take over the boot module list and print the boot banner.
    ///
    /// Panics if there are no modules.
    pub fn start_boot(&mut self, modules: Vec<Module>) {
        if modules.is_empty() {
            panic!("no modules found");
        }
        self.print(format_args!("{} boot modules\n", modules.len()));
        for (index, module) in modules.iter().enumerate() {
            self.print(format_args!("  {}: {} {}\n", index, module.range(), module.routing.unwrap_or("")));
        }
        let stats = self.mem.stats();
        info!(
            "heap {}/{} bytes used, swap {}/{} bytes used, {} free blocks",
            stats.heap_used, stats.heap_capacity, stats.swap_used, stats.swap_capacity, stats.free_blocks
        );
        self.modules = modules;
        self.next_module = 0;
    }

    /// Work through the module list up to the next binary to call.
    pub fn next_step(&mut self) -> BootStep {
        let user = self.options.run_mode == RunMode::Userland;
        while let Some(module) = self.modules.get(self.next_module).copied() {
            self.next_module += 1;
            let name = module.display_name();
            match self.classify_module(&module) {
                ModuleKind::Skip(reason) => warn!("skipping module {}: {}", name, reason),
                ModuleKind::Interpreted(index) => self.run_interpreted(&module, index, user),
                ModuleKind::Flat => {
                    info!("Invoking module {} at {:p}", name, module.start());
                    self.enter_module(name, user);
                    return BootStep::Enter { entry: module.start() };
                }
                ModuleKind::Object => match self.loader.load_object(module.image) {
                    Ok(entry) => {
                        info!("Invoking module {} at {:p}", name, entry);
                        self.enter_module(name, user);
                        return BootStep::Enter { entry };
                    }
                    Err(err) => error!("cannot load module {}: {}", name, err),
                },
            }
        }
        info!("All done, halting.");
        BootStep::Finished
    }

    /// Restore the context that was active before the innermost module was entered.
    pub fn module_returned(&mut self) {
        if let Some(previous) = self.returns.pop() {
            self.loader.leave(previous);
        }
        info!("Module returned.");
    }

    fn run_interpreted(&mut self, module: &Module, index: usize, user: bool) {
        let name = module.display_name();
        let size = module.image.len();
        let buffer = match self.mem.allocate(size) {
            Ok(buffer) => buffer,
            Err(err) => {
                error!("skipping module {}: no working buffer, {}", name, err);
                return;
            }
        };
        if let Some(payload) = self.mem.payload_mut(buffer) {
            payload[..size].copy_from_slice(module.image);
        }

        self.last_exception = None;
        let previous = self.loader.enter(name, user);
        let result = match self.mem.payload(buffer) {
            Some(source) => self.io.interpreters[index].run(name, &source[..size]),
            None => Ok(()),
        };
        self.loader.leave(previous);
        self.mem.free(buffer, None);

        if let Err(exception) = result {
            warn!("module {} raised {}", name, exception);
            self.record_exception(exception);
        }
    }
}

/// Run all boot modules of the kernel in `cell`.
pub fn run_boot<E: Executor>(cell: &UpCell<Option<Kernel>>, executor: &mut E) {
    loop {
        let step = match cell.exclusive_access().as_mut() {
            Some(kernel) => kernel.next_step(),
            None => return,
        };
        match step {
            BootStep::Finished => return,
            BootStep::Enter { entry } => {
                unsafe { executor.call(entry) };
                if let Some(kernel) = cell.exclusive_access().as_mut() {
                    kernel.module_returned();
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{BootOptions, ModuleMode};
    use crate::context::testing::{self, leak_module};
    use crate::crash::InterpreterException;
    use crate::io::fake::{Script, Shared};
    use modload::OBJECT_MAGIC;
    use std::string::String;

    /// ELF32 with one segment at 0x1000 holding `nop; nop; nop; ret`, entry 0x1002.
    fn object() -> [u8; 88] {
        let mut image = [0; 88];
        image[..4].copy_from_slice(&OBJECT_MAGIC);
        image[4..7].copy_from_slice(&[1, 1, 1]);
        let mut put = |at: usize, bytes: &[u8]| image[at..at + bytes.len()].copy_from_slice(bytes);
        put(16, &2_u16.to_le_bytes());
        put(18, &3_u16.to_le_bytes());
        put(20, &1_u32.to_le_bytes());
        put(24, &0x1002_u32.to_le_bytes());
        put(28, &52_u32.to_le_bytes());
        put(40, &52_u16.to_le_bytes());
        put(42, &32_u16.to_le_bytes());
        put(44, &1_u16.to_le_bytes());
        for (i, field) in [1_u32, 84, 0x1000, 0x1000, 4, 8, 5, 0x1000].iter().enumerate() {
            put(52 + 4 * i, &field.to_le_bytes());
        }
        put(84, &[0x90, 0x90, 0x90, 0xC3]);
        image
    }

    fn options(run_mode: RunMode, module_mode: ModuleMode) -> BootOptions {
        BootOptions {
            run_mode,
            module_mode,
            ..BootOptions::default()
        }
    }

    #[test]
    fn scripts_win_over_the_object_magic() {
        let (kernel, _probe) = testing::kernel(BootOptions::default(), &[]);
        let script = leak_module(&object(), Some("/boot/init.py"));
        assert_eq!(kernel.classify_module(&script), ModuleKind::Interpreted(0));
        let binary = leak_module(&object(), Some("/boot/init.elf"));
        assert_eq!(kernel.classify_module(&binary), ModuleKind::Object);
    }

    #[test]
    fn classification() {
        let (kernel, _probe) = testing::kernel(BootOptions::default(), &[]);
        let kind_of = |image: &[u8], routing| kernel.classify_module(&leak_module(image, routing));
        assert_eq!(kind_of(&[0xC3], None), ModuleKind::Flat);
        assert_eq!(kind_of(&[0xC3], Some("/boot/hello.bin arg")), ModuleKind::Flat);
        assert_eq!(kind_of(b"text", Some("/boot/notes.txt")), ModuleKind::Skip(SkipReason::Unknown));
        assert_eq!(kind_of(&[], Some("/boot/hello.bin")), ModuleKind::Skip(SkipReason::Empty));
        assert_eq!(
            kind_of(&[0xC3], Some("/boot/userland/hello.bin")),
            ModuleKind::Skip(SkipReason::OtherRunMode)
        );
    }

    #[test]
    fn run_mode_selects_modules() {
        let (kernel, _probe) = testing::kernel(options(RunMode::Userland, ModuleMode::Both), &[]);
        let user = leak_module(&[0xC3], Some("/boot/userland/hello.bin"));
        let system = leak_module(&[0xC3], Some("/boot/hello.bin"));
        assert_eq!(kernel.classify_module(&user), ModuleKind::Flat);
        assert_eq!(kernel.classify_module(&system), ModuleKind::Skip(SkipReason::OtherRunMode));
    }

    #[test]
    fn module_mode_disables_paths() {
        let script = leak_module(b"print(1)", Some("/boot/init.py"));
        let binary = leak_module(&[0xC3], Some("/boot/hello.bin"));

        let (kernel, _probe) = testing::kernel(options(RunMode::Kernel, ModuleMode::Interpreted), &[]);
        assert_eq!(kernel.classify_module(&script), ModuleKind::Interpreted(0));
        assert_eq!(kernel.classify_module(&binary), ModuleKind::Skip(SkipReason::DisabledByMode));

        let (kernel, _probe) = testing::kernel(options(RunMode::Kernel, ModuleMode::Binaries), &[]);
        assert_eq!(kernel.classify_module(&script), ModuleKind::Skip(SkipReason::DisabledByMode));
        assert_eq!(kernel.classify_module(&binary), ModuleKind::Flat);
    }

    #[test]
    #[should_panic(expected = "no modules found")]
    fn boot_without_modules_is_fatal() {
        let (mut kernel, _probe) = testing::kernel(BootOptions::default(), &[]);
        kernel.start_boot(Vec::new());
    }

    /// Records each call together with the context the kernel reports at that moment.
    struct Recorder<'a> {
        cell: &'a UpCell<Option<Kernel>>,
        calls: Vec<(PhysAddr, String, bool)>,
    }

    impl<'a> Executor for Recorder<'a> {
        unsafe fn call(&mut self, entry: PhysAddr) {
            let guard = self.cell.exclusive_access();
            let context = guard.as_ref().unwrap().loader.context();
            self.calls.push((entry, context.program().into(), context.is_user()));
        }
    }

    fn boot(mut kernel: Kernel, modules: Vec<Module>) -> (UpCell<Option<Kernel>>, Vec<(PhysAddr, String, bool)>) {
        kernel.start_boot(modules);
        let cell = unsafe { UpCell::new(Some(kernel)) };
        let calls = {
            let mut recorder = Recorder {
                cell: &cell,
                calls: Vec::new(),
            };
            run_boot(&cell, &mut recorder);
            recorder.calls
        };
        (cell, calls)
    }

    #[test]
    fn modules_run_in_order() {
        let (kernel, probe) = testing::kernel(BootOptions::default(), &[]);
        let total = kernel.allocator().remaining_capacity();
        let flat = leak_module(&[0xC3], Some("/boot/hello.bin"));
        let modules = vec![
            leak_module(b"print(1)", Some("/boot/init.py")),
            flat,
            leak_module(b"notes", Some("/boot/notes.txt")),
            leak_module(&object(), Some("/boot/shell.elf")),
        ];
        let (cell, calls) = boot(kernel, modules);

        assert_eq!(probe.runs.get(), vec![(String::from("init.py"), b"print(1)".to_vec())]);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], (flat.start(), String::from("hello.bin"), false));
        assert_eq!(calls[1].1, "shell.elf");

        let guard = cell.exclusive_access();
        let kernel = guard.as_ref().unwrap();
        let window = kernel.loader.window();
        assert_eq!(calls[1].0, window.base() + 2);
        assert_eq!(&window.contents()[..8], &[0x90, 0x90, 0x90, 0xC3, 0, 0, 0, 0]);
        assert_eq!(kernel.loader.context().program(), "kernel");
        assert!(kernel.returns.is_empty());
        assert_eq!(kernel.allocator().remaining_capacity(), total);

        let console = probe.console.get();
        assert!(console.starts_with("4 boot modules\n  0: "));
        assert!(console.contains(" /boot/shell.elf\n"));
    }

    #[test]
    fn userland_modules_run_as_user() {
        let (kernel, _probe) = testing::kernel(options(RunMode::Userland, ModuleMode::Both), &[]);
        let modules = vec![
            leak_module(&[0xC3], Some("/boot/hello.bin")),
            leak_module(&[0xC3], Some("/boot/userland/hello.bin")),
        ];
        let (_cell, calls) = boot(kernel, modules);
        assert_eq!(calls.len(), 1);
        assert!(calls[0].2);
    }

    #[test]
    fn broken_objects_are_skipped() {
        let (kernel, _probe) = testing::kernel(BootOptions::default(), &[]);
        let mut broken = object();
        broken[44] = 0;
        let modules = vec![
            leak_module(&broken, Some("/boot/broken.elf")),
            leak_module(&[0xC3], Some("/boot/after.bin")),
        ];
        let (_cell, calls) = boot(kernel, modules);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "after.bin");
    }

    fn name_error() -> InterpreterException {
        InterpreterException {
            kind: "NameError".into(),
            message: "name 'x' is not defined".into(),
            file: "init.py".into(),
            line: 1,
        }
    }

    fn failing_scripts(kernel: &mut Kernel) {
        kernel.io.interpreters[0] = std::boxed::Box::new(Script {
            suffix: ".py",
            runs: Shared::default(),
            exception: Some(name_error()),
        });
    }

    #[test]
    fn interpreter_exceptions_are_remembered() {
        let (mut kernel, _probe) = testing::kernel(BootOptions::default(), &[]);
        failing_scripts(&mut kernel);
        let (cell, calls) = boot(kernel, vec![leak_module(b"x", Some("/boot/init.py"))]);
        assert!(calls.is_empty());
        let guard = cell.exclusive_access();
        assert_eq!(guard.as_ref().unwrap().last_exception(), Some(&name_error()));
    }

    /// Page faults from inside every called module.
    struct PageFaults<'a> {
        cell: &'a UpCell<Option<Kernel>>,
    }

    impl<'a> Executor for PageFaults<'a> {
        unsafe fn call(&mut self, entry: PhysAddr) {
            let mut frame = interrupts::TrapFrame {
                vector: interrupts::exceptions::PAGE_FAULT as u32,
                eip: entry.0 as u32,
                ..interrupts::TrapFrame::default()
            };
            let mut guard = self.cell.exclusive_access();
            guard.as_mut().unwrap().handle_trap(&mut frame);
        }
    }

    #[test]
    fn exceptions_do_not_outlive_their_module() {
        let (mut kernel, probe) = testing::kernel(BootOptions::default(), &[]);
        failing_scripts(&mut kernel);
        kernel.start_boot(vec![
            leak_module(b"x", Some("/boot/init.py")),
            leak_module(&[0xC3], Some("/boot/later.bin")),
        ]);
        let cell = unsafe { UpCell::new(Some(kernel)) };
        run_boot(&cell, &mut PageFaults { cell: &cell });

        let guard = cell.exclusive_access();
        let kernel = guard.as_ref().unwrap();
        assert_eq!(kernel.last_exception(), None);
        let crash = kernel.last_crash().unwrap();
        assert_eq!(crash.program, "later.bin");
        assert_eq!(crash.exception, None);
        assert!(probe.console.get().contains("Panic: CPU fault: Page fault (error 0x0)\n"));
        assert!(!probe.console.get().contains("NameError"));
    }

    #[test]
    fn scripts_larger_than_memory_are_skipped() {
        let (kernel, probe) = testing::kernel(BootOptions::default(), &[]);
        let huge = std::vec![b'#'; testing::HEAP + testing::SWAP];
        let (_cell, calls) = boot(kernel, vec![leak_module(&huge, Some("/boot/huge.py"))]);
        assert!(calls.is_empty());
        assert!(probe.runs.get().is_empty());
    }
}
