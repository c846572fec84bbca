//! Crash reports.
//!
//! A fatal fault captures one `CrashReport`: the message, where it happened, which program
//! was running, the registers and small windows of code and stack memory. The report is
//! printed on all outputs, optionally persisted as JSON, and the machine halts afterwards.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt::{self, Write};

use serde::Serialize;

use bare_metal::cpu::Registers;
use bare_metal::{PhysAddr, UpCell};

use crate::config::CRASH_ARTIFACT;
use crate::context::Kernel;
use crate::io::PhysMemory;

/// Bytes of code shown around the faulting instruction.
pub const CODE_WINDOW: usize = 64;
/// Words of stack shown in the expanded report.
pub const STACK_WORDS: usize = 16;
pub const DETAILS_PROMPT: &str = "Press d for details, any other key to halt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Kernel,
    User,
}

impl Source {
    pub fn of(is_user: bool) -> Source {
        if is_user {
            Source::User
        } else {
            Source::Kernel
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Source::Kernel => f.write_str("kernel"),
            Source::User => f.write_str("user"),
        }
    }
}

/// Exception raised inside an interpreted module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterpreterException {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub file: String,
    pub line: u32,
}

impl fmt::Display for InterpreterException {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {} ({}:{})", self.kind, self.message, self.file, self.line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    pub message: String,
    pub ip: u32,
    pub source: Source,
    pub program: String,
    pub registers: Registers,
    /// `None` if the allocator state could not be trusted.
    pub heap_remaining: Option<usize>,
    pub exception: Option<InterpreterException>,
    /// `CODE_WINDOW` bytes from `code_base()`.
    pub code: Option<[u8; CODE_WINDOW]>,
    /// `STACK_WORDS` words from the stack pointer on.
    pub stack: Option<[u32; STACK_WORDS]>,
}

#[derive(Serialize)]
struct Artifact<'a> {
    message: &'a str,
    rip: String,
    source: Source,
    program: &'a str,
    idt_dump: String,
    mem_dump: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    exception: Option<&'a InterpreterException>,
}

impl CrashReport {
    pub fn new(message: &str, ip: u32, source: Source, registers: Registers) -> CrashReport {
        CrashReport {
            message: message.to_string(),
            ip,
            source,
            program: "kernel".to_string(),
            registers,
            heap_remaining: None,
            exception: None,
            code: None,
            stack: None,
        }
    }

    pub fn with_program(mut self, program: &str) -> CrashReport {
        self.program = program.to_string();
        self
    }

    pub fn with_heap_remaining(mut self, remaining: Option<usize>) -> CrashReport {
        self.heap_remaining = remaining;
        self
    }

    pub fn with_exception(mut self, exception: Option<InterpreterException>) -> CrashReport {
        self.exception = exception;
        self
    }

    /// Copy the code window and the top of the stack out of `memory`.
    pub fn with_dumps(mut self, memory: &dyn PhysMemory) -> CrashReport {
        let mut code = [0; CODE_WINDOW];
        if memory.read(PhysAddr(self.code_base() as usize), &mut code) {
            self.code = Some(code);
        }
        let mut raw = [0; STACK_WORDS * 4];
        if memory.read(PhysAddr(self.registers.esp as usize), &mut raw) {
            let mut words = [0; STACK_WORDS];
            for (word, bytes) in words.iter_mut().zip(raw.chunks_exact(4)) {
                *word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
            self.stack = Some(words);
        }
        self
    }

    /// Start of the code window, the faulting address rounded down to 16 bytes.
    pub fn code_base(&self) -> u32 {
        self.ip & !0xF
    }

    /// What went wrong. An exception reported by an interpreter takes precedence over
    /// the raw fault message.
    pub fn summary(&self) -> String {
        match &self.exception {
            Some(exception) => exception.to_string(),
            None => self.message.clone(),
        }
    }

    pub fn render(&self, out: &mut dyn Write, debug: bool) -> fmt::Result {
        if debug {
            writeln!(out, "Guru Meditation: Kernel Panic: {}", self.summary())?;
        } else {
            writeln!(out, "Panic: {}", self.summary())?;
        }
        if self.exception.is_some() {
            writeln!(out, "Fault: {}", self.message)?;
        }
        writeln!(out, "Address: {:#010x} ({})", self.ip, self.source)?;
        writeln!(out, "Program: {}", self.program)?;
        let r = &self.registers;
        writeln!(out, "EAX={:08x} EBX={:08x} ECX={:08x} EDX={:08x}", r.eax, r.ebx, r.ecx, r.edx)?;
        match self.heap_remaining {
            Some(bytes) => writeln!(out, "Heap remaining: {} bytes", bytes)?,
            None => writeln!(out, "Heap remaining: unavailable")?,
        }
        match &self.code {
            Some(code) => {
                writeln!(out, "Code @{:#010x}:", self.code_base())?;
                for row in code.chunks(16) {
                    for byte in row {
                        write!(out, " {:02X}", byte)?;
                    }
                    writeln!(out)?;
                }
            }
            None => writeln!(out, "Code: unavailable")?,
        }
        Ok(())
    }

    /// The part shown only on request: stack window and complete register file.
    pub fn render_details(&self, out: &mut dyn Write) -> fmt::Result {
        let r = &self.registers;
        match &self.stack {
            Some(stack) => {
                writeln!(out, "Stack @{:#010x}:", r.esp)?;
                for row in stack.chunks(4) {
                    for word in row {
                        write!(out, " {:08x}", word)?;
                    }
                    writeln!(out)?;
                }
            }
            None => writeln!(out, "Stack: unavailable")?,
        }
        writeln!(out, "EAX={:08x} EBX={:08x} ECX={:08x} EDX={:08x}", r.eax, r.ebx, r.ecx, r.edx)?;
        writeln!(out, "ESI={:08x} EDI={:08x} EBP={:08x} ESP={:08x}", r.esi, r.edi, r.ebp, r.esp)?;
        writeln!(out, "EIP={:08x} EFLAGS={:08x}", r.eip, r.eflags)
    }

    /// The JSON artifact, including a dump of the interrupt table `idt`.
    pub fn artifact(&self, idt: &[u8]) -> Result<Vec<u8>, serde_json::Error> {
        let artifact = Artifact {
            message: &self.message,
            rip: alloc::format!("{:#010x}", self.ip),
            source: self.source,
            program: &self.program,
            idt_dump: hex::encode_upper(idt),
            mem_dump: self.code.as_ref().map(hex::encode_upper).unwrap_or_default(),
            exception: self.exception.as_ref(),
        };
        serde_json::to_vec(&artifact)
    }
}

impl Kernel {
    /// Report a fatal fault on every output. The caller halts afterwards.
    pub fn capture_crash(&mut self, message: &str, ip: u32, registers: Registers) {
        self.io.machine.disable_interrupts();
        self.io.console.enter_crash_mode();

        let context = *self.loader.context();
        let report = CrashReport::new(message, ip, Source::of(context.is_user()), registers)
            .with_program(context.program())
            .with_heap_remaining(self.mem.try_remaining_capacity())
            .with_exception(self.last_exception.clone())
            .with_dumps(&*self.io.memory);

        let mut text = String::new();
        let _ = report.render(&mut text, self.options.debug);
        self.emit(&text);
        self.persist_crash(&report);

        if self.options.crash_prompt {
            self.emit(DETAILS_PROMPT);
            self.emit("\n");
            if self.io.input.wait_key() == b'd' {
                let mut details = String::new();
                let _ = report.render_details(&mut details);
                self.emit(&details);
            }
        }
        self.last_crash = Some(report);
    }

    fn emit(&mut self, text: &str) {
        let _ = self.io.console.write_str(text);
        if let Some(serial) = self.io.serial.as_mut() {
            let _ = serial.write_str(text);
        }
    }

    fn persist_crash(&mut self, report: &CrashReport) {
        let store = match self.io.crash_store.as_mut() {
            Some(store) => store,
            None => return,
        };
        let saved = match report.artifact(self.traps.idt().as_bytes()) {
            Ok(json) => store.persist(CRASH_ARTIFACT, &json),
            Err(_) => false,
        };
        if !saved {
            let _ = writeln!(self.io.console, "{} not saved", CRASH_ARTIFACT);
        }
    }
}

/// Report a crash from a path that never returns, such as the panic handler.
///
/// The kernel is taken even if a caller further down the stack holds it. Returns `false`
/// if there is no kernel yet.
///
/// # Safety
///
/// The current holder of the kernel, if any, must never run again.
pub unsafe fn capture_terminal(cell: &UpCell<Option<Kernel>>, message: &str, registers: Registers) -> bool {
    match cell.force_access().as_mut() {
        Some(kernel) => {
            kernel.capture_crash(message, registers.eip, registers);
            true
        }
        None => false,
    }
}

/// Last resort report for a panic raised while a crash is already being reported.
pub fn emergency_report(out: &mut dyn Write, message: fmt::Arguments, ip: Option<u32>) {
    let _ = writeln!(out, "Panic: {}", message);
    if let Some(ip) = ip {
        let _ = writeln!(out, "Address: {:#010x}", ip);
    }
    let _ = writeln!(out, "Kernel state unavailable, halting.");
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::BootOptions;
    use crate::context::testing;
    use crate::config::SYSCALL_VECTOR;
    use crate::io::fake::RAM_BASE;
    use crate::syscall::Syscall;
    use crate::trap::dispatch_trap;
    use interrupts::TrapFrame;
    use modload::DirectCall;
    use serde_json::Value;
    use std::panic::{self, AssertUnwindSafe};

    fn report() -> CrashReport {
        let registers = Registers {
            eax: 0xA,
            esp: 0x0009_0000,
            eip: 0x0020_0013,
            ..Registers::default()
        };
        CrashReport::new("CPU fault: Page fault", 0x0020_0013, Source::User, registers).with_program("exec.o")
    }

    fn exception() -> InterpreterException {
        InterpreterException {
            kind: "ZeroDivisionError".into(),
            message: "division by zero".into(),
            file: "init.py".into(),
            line: 3,
        }
    }

    #[test]
    fn plain_report() {
        let mut text = String::new();
        report().with_heap_remaining(Some(1024)).render(&mut text, false).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Panic: CPU fault: Page fault");
        assert_eq!(lines[1], "Address: 0x00200013 (user)");
        assert_eq!(lines[2], "Program: exec.o");
        assert_eq!(lines[3], "EAX=0000000a EBX=00000000 ECX=00000000 EDX=00000000");
        assert_eq!(lines[4], "Heap remaining: 1024 bytes");
        assert_eq!(lines[5], "Code: unavailable");
    }

    #[test]
    fn debug_headline_and_exception_precedence() {
        let mut text = String::new();
        report().with_exception(Some(exception())).render(&mut text, true).unwrap();
        assert!(text.starts_with("Guru Meditation: Kernel Panic: ZeroDivisionError: division by zero (init.py:3)\n"));
        assert!(text.contains("Fault: CPU fault: Page fault\n"));
        assert!(text.contains("Heap remaining: unavailable\n"));
    }

    #[test]
    fn artifact_fields() {
        let mut r = report().with_exception(Some(exception()));
        r.code = Some([0x90; CODE_WINDOW]);
        let json: Value = serde_json::from_slice(&r.artifact(&[0x12, 0xAB]).unwrap()).unwrap();
        assert_eq!(json["message"], "CPU fault: Page fault");
        assert_eq!(json["rip"], "0x00200013");
        assert_eq!(json["source"], "user");
        assert_eq!(json["program"], "exec.o");
        assert_eq!(json["idt_dump"], "12AB");
        assert_eq!(json["mem_dump"], "90".repeat(CODE_WINDOW));
        assert_eq!(json["exception"]["type"], "ZeroDivisionError");
        assert_eq!(json["exception"]["line"], 3);

        let json: Value = serde_json::from_slice(&report().artifact(&[]).unwrap()).unwrap();
        assert!(json.get("exception").is_none());
        assert_eq!(json["mem_dump"], "");
    }

    #[test]
    fn dumps_come_from_memory() {
        let (kernel, probe) = testing::kernel(BootOptions::default(), &[]);
        {
            let mut ram = probe.ram.0.borrow_mut();
            for (i, byte) in ram.iter_mut().enumerate().take(0x100) {
                *byte = i as u8;
            }
        }
        let registers = Registers {
            esp: RAM_BASE as u32 + 0x80,
            ..Registers::default()
        };
        let r = CrashReport::new("x", RAM_BASE as u32 + 0x13, Source::Kernel, registers).with_dumps(&*kernel.io.memory);
        let code = r.code.unwrap();
        assert_eq!(code[0], 0x10);
        assert_eq!(code[CODE_WINDOW - 1], 0x4F);
        assert_eq!(r.stack.unwrap()[0], 0x8382_8180);

        let mut text = String::new();
        r.render_details(&mut text).unwrap();
        assert!(text.starts_with(&format!("Stack @{:#010x}:\n 83828180 87868584", RAM_BASE + 0x80)));
        assert!(text.ends_with("EIP=00000000 EFLAGS=00000000\n"));

        let outside = CrashReport::new("x", 0x10, Source::Kernel, Registers::default()).with_dumps(&*kernel.io.memory);
        assert_eq!(outside.code, None);
        assert_eq!(outside.stack, None);
    }

    #[test]
    fn capture_reaches_every_output() {
        let (mut kernel, probe) = testing::kernel(BootOptions::default(), &[]);
        kernel.capture_crash("boom", 0x0020_0000, Registers::default());

        assert!(probe.interrupts_off.get());
        assert!(probe.crash_mode.get());
        assert!(probe.console.get().starts_with("Panic: boom\n"));
        assert!(probe.serial.get().starts_with("Panic: boom\n"));
        assert!(!probe.console.get().contains(DETAILS_PROMPT));

        let artifacts = probe.artifacts.get();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].0, CRASH_ARTIFACT);
        let json: Value = serde_json::from_slice(&artifacts[0].1).unwrap();
        assert_eq!(json["source"], "kernel");
        assert_eq!(json["program"], "kernel");
        assert_eq!(json["idt_dump"].as_str().unwrap().len(), 256 * 8 * 2);

        let crash = kernel.last_crash().unwrap();
        assert_eq!(crash.heap_remaining, Some(testing::HEAP + testing::SWAP));
    }

    #[test]
    fn prompt_expands_on_request() {
        let options = BootOptions {
            crash_prompt: true,
            ..BootOptions::default()
        };
        let (mut kernel, probe) = testing::kernel(options, b"d");
        kernel.capture_crash("boom", 0, Registers::default());
        let console = probe.console.get();
        assert!(console.contains(DETAILS_PROMPT));
        assert!(console.contains("EIP=00000000 EFLAGS=00000000"));

        let (mut kernel, probe) = testing::kernel(options, b"q");
        kernel.capture_crash("boom", 0, Registers::default());
        assert!(!probe.console.get().contains("EFLAGS"));
    }

    #[test]
    fn emergency_report_needs_nothing() {
        let mut out = String::new();
        emergency_report(&mut out, format_args!("{} while busy", "Page fault"), Some(0x1000));
        assert_eq!(out, "Panic: Page fault while busy\nAddress: 0x00001000\nKernel state unavailable, halting.\n");
    }

    #[test]
    fn kernel_panics_get_the_full_report() {
        let (mut kernel, probe) = testing::kernel(BootOptions::default(), &[]);
        kernel.init_syscalls();
        let cell = unsafe { UpCell::new(Some(kernel)) };

        // RAM_BASE is above the kernel image but was never handed out by the allocator
        let mut frame = TrapFrame {
            vector: SYSCALL_VECTOR as u32,
            eax: Syscall::MemFree as u32,
            ebx: RAM_BASE as u32,
            ..TrapFrame::default()
        };
        let payload = panic::catch_unwind(AssertUnwindSafe(|| dispatch_trap(&cell, &mut frame, &mut DirectCall))).unwrap_err();
        let message = payload.downcast_ref::<String>().unwrap().clone();
        assert!(message.starts_with("free outside managed region"));

        // the panicking trap never gives its borrow back
        core::mem::forget(cell.exclusive_access());
        assert!(cell.try_access().is_none());
        assert!(unsafe { capture_terminal(&cell, &message, Registers::default()) });

        let kernel = unsafe { cell.force_access() }.as_ref().unwrap();
        let crash = kernel.last_crash().unwrap();
        assert_eq!(crash.message, message);
        assert_eq!(crash.heap_remaining, Some(testing::HEAP + testing::SWAP));
        assert!(probe.console.get().starts_with("Panic: free outside managed region"));
        assert!(probe.console.get().contains("Program: kernel\n"));
        assert_eq!(probe.artifacts.get().len(), 1);
    }

    #[test]
    fn terminal_capture_needs_a_kernel() {
        let empty: UpCell<Option<Kernel>> = unsafe { UpCell::new(None) };
        assert!(!unsafe { capture_terminal(&empty, "early", Registers::default()) });
    }
}
