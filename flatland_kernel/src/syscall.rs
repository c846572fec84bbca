//! The syscall gate.
//!
//! Calling convention: `int 0x80` with the number in `eax` and up to three arguments in
//! `ebx`, `ecx` and `edx`. The result comes back in `eax`; `SENTINEL` (-1) reports a
//! rejected call.

use core::fmt::Write;

use log::{info, warn};

use bare_metal::segments::Ring;
use bare_metal::PhysAddr;
use interrupts::TrapFrame;
use modload::MAX_PROGRAM_NAME;

use crate::config::SYSCALL_VECTOR;
use crate::context::Kernel;
use crate::trap::TrapOutcome;

pub const SENTINEL: usize = usize::MAX;

/// Bytes moved between user memory and a device per step.
const CHUNK: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    /// `write(ptr, len)`, print `len` bytes at `ptr`.
    Write = 0,
    Exit = 1,
    /// `alloc(size)`, 0 if there is no memory left.
    MemAlloc = 2,
    /// `free(ptr, size)`, with `size` 0 if unknown.
    MemFree = 3,
    /// `read(offset, ptr, len)`, returns the number of bytes read from storage.
    FsRead = 4,
    /// `write(offset, ptr, len)`, returns the number of bytes written to storage.
    FsWrite = 5,
    /// `spawn(name)`, run the boot module called `name`.
    ProcSpawn = 6,
}

impl Syscall {
    pub fn from_number(number: usize) -> Option<Syscall> {
        match number {
            0 => Some(Syscall::Write),
            1 => Some(Syscall::Exit),
            2 => Some(Syscall::MemAlloc),
            3 => Some(Syscall::MemFree),
            4 => Some(Syscall::FsRead),
            5 => Some(Syscall::FsWrite),
            6 => Some(Syscall::ProcSpawn),
            _ => None,
        }
    }
}

/// How a syscall finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Return(usize),
    /// Run the module loaded at `entry`; the caller gets 0 once it returned.
    Spawn { entry: PhysAddr },
    /// Stop the machine.
    Exit,
}

fn syscall_gate(kernel: &mut Kernel, frame: &mut TrapFrame) -> TrapOutcome {
    let completion = kernel.dispatch_syscall(frame.eax as usize, frame.ebx as usize, frame.ecx as usize, frame.edx as usize);
    match completion {
        Completion::Return(result) => {
            frame.eax = result as u32;
            TrapOutcome::Resume
        }
        Completion::Spawn { entry } => TrapOutcome::Enter { entry },
        Completion::Exit => TrapOutcome::Halt,
    }
}

impl Kernel {
    /// Claim the syscall vector, reachable from ring 3.
    pub fn init_syscalls(&mut self) {
        self.traps.register(SYSCALL_VECTOR, syscall_gate, Ring::RING3);
    }

    /// Whether `len` bytes at `ptr` lie above the kernel image. Says nothing about
    /// whether the memory is actually there.
    pub fn user_range_valid(&self, ptr: usize, len: usize) -> bool {
        ptr >= self.kernel_end.0 && ptr.checked_add(len).is_some()
    }

    pub fn dispatch_syscall(&mut self, number: usize, a1: usize, a2: usize, a3: usize) -> Completion {
        let syscall = match Syscall::from_number(number) {
            Some(syscall) => syscall,
            None => {
                warn!("unknown syscall {}", number);
                return Completion::Return(SENTINEL);
            }
        };
        let result = match syscall {
            Syscall::Write => self.sys_write(a1, a2),
            Syscall::Exit => {
                self.io.machine.disable_interrupts();
                self.print(format_args!("User process exited\n"));
                return Completion::Exit;
            }
            Syscall::MemAlloc => match self.mem.allocate(a1) {
                Ok(addr) => addr.0,
                Err(err) => {
                    warn!("syscall alloc: {}", err);
                    0
                }
            },
            Syscall::MemFree => {
                if !self.user_range_valid(a1, a2) {
                    return Completion::Return(SENTINEL);
                }
                self.mem.free(PhysAddr(a1), Some(a2).filter(|&size| size > 0));
                0
            }
            Syscall::FsRead => self.sys_fs_read(a1, a2, a3),
            Syscall::FsWrite => self.sys_fs_write(a1, a2, a3),
            Syscall::ProcSpawn => return self.sys_spawn(a1),
        };
        Completion::Return(result)
    }

    fn sys_write(&mut self, ptr: usize, len: usize) -> usize {
        if !self.user_range_valid(ptr, len) {
            return SENTINEL;
        }
        let mut buf = [0; CHUNK];
        let mut done = 0;
        while done < len {
            let chunk = &mut buf[..(len - done).min(CHUNK)];
            if !self.io.memory.read(PhysAddr(ptr + done), chunk) {
                return SENTINEL;
            }
            self.io.console.write_bytes(chunk);
            done += chunk.len();
        }
        0
    }

    fn sys_fs_read(&mut self, offset: usize, ptr: usize, len: usize) -> usize {
        if !self.user_range_valid(ptr, len) {
            return SENTINEL;
        }
        let storage = match self.io.storage.as_mut() {
            Some(storage) => storage,
            None => return 0,
        };
        let mut buf = [0; CHUNK];
        let mut done = 0;
        while done < len {
            let want = (len - done).min(CHUNK);
            let at = match offset.checked_add(done) {
                Some(at) => at,
                None => return SENTINEL,
            };
            let got = storage.read(at, &mut buf[..want]);
            if !self.io.memory.write(PhysAddr(ptr + done), &buf[..got]) {
                return SENTINEL;
            }
            done += got;
            if got < want {
                break;
            }
        }
        done
    }

    fn sys_fs_write(&mut self, offset: usize, ptr: usize, len: usize) -> usize {
        if !self.user_range_valid(ptr, len) {
            return SENTINEL;
        }
        let storage = match self.io.storage.as_mut() {
            Some(storage) => storage,
            None => return 0,
        };
        let mut buf = [0; CHUNK];
        let mut done = 0;
        while done < len {
            let want = (len - done).min(CHUNK);
            if !self.io.memory.read(PhysAddr(ptr + done), &mut buf[..want]) {
                return SENTINEL;
            }
            let at = match offset.checked_add(done) {
                Some(at) => at,
                None => return SENTINEL,
            };
            let put = storage.write(at, &buf[..want]);
            done += put;
            if put < want {
                break;
            }
        }
        done
    }

    /// Read the NUL terminated program name at `ptr`.
    fn user_name(&self, ptr: usize, buf: &mut [u8; MAX_PROGRAM_NAME]) -> Option<usize> {
        for i in 0..=MAX_PROGRAM_NAME {
            let at = ptr.checked_add(i)?;
            if !self.user_range_valid(at, 1) {
                return None;
            }
            let mut byte = [0];
            if !self.io.memory.read(PhysAddr(at), &mut byte) {
                return None;
            }
            if byte[0] == 0 {
                return Some(i);
            }
            *buf.get_mut(i)? = byte[0];
        }
        None
    }

    fn sys_spawn(&mut self, ptr: usize) -> Completion {
        let mut buf = [0; MAX_PROGRAM_NAME];
        let name = match self.user_name(ptr, &mut buf).map(|len| core::str::from_utf8(&buf[..len])) {
            Some(Ok(name)) => name,
            _ => return Completion::Return(SENTINEL),
        };
        let module = match self.modules.iter().find(|m| m.answers_to(name)) {
            Some(module) => *module,
            None => {
                self.print(format_args!("exec.o failed: not found\n"));
                return Completion::Return(SENTINEL);
            }
        };
        let _ = writeln!(self.io.console, "exec.o {}", name);
        match self.loader.load(module.image) {
            Ok(entry) => {
                info!("spawning {} at {:p}", name, entry);
                self.enter_module(name, true);
                Completion::Spawn { entry }
            }
            Err(err) => {
                self.print(format_args!("exec.o failed: {}\n", err));
                Completion::Return(SENTINEL)
            }
        }
    }
}
