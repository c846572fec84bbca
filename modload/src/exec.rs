use core::{fmt, mem, str};

use log::debug;

use bare_metal::PhysAddr;

use crate::{classify, load_object, Format, LoadError, LoadWindow};

/// Longest program name that is kept, in bytes.
pub const MAX_PROGRAM_NAME: usize = 64;

/// Name of the running program, stored inline.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ProgramName {
    bytes: [u8; MAX_PROGRAM_NAME],
    len: usize,
}

impl ProgramName {
    /// Copy `name`, cut at a character boundary if it is too long.
    pub fn new(name: &str) -> ProgramName {
        let mut len = name.len().min(MAX_PROGRAM_NAME);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        let mut bytes = [0; MAX_PROGRAM_NAME];
        bytes[..len].copy_from_slice(&name.as_bytes()[..len]);
        ProgramName { bytes, len }
    }

    pub fn as_str(&self) -> &str {
        str::from_utf8(&self.bytes[..self.len]).unwrap_or("")
    }
}

impl fmt::Debug for ProgramName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for ProgramName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What is currently executing: the kernel itself or a module entered on behalf of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecContext {
    program: ProgramName,
    user: bool,
}

impl ExecContext {
    pub fn kernel() -> ExecContext {
        ExecContext {
            program: ProgramName::new("kernel"),
            user: false,
        }
    }

    pub fn module(name: &str, user: bool) -> ExecContext {
        ExecContext {
            program: ProgramName::new(name),
            user,
        }
    }

    pub fn program(&self) -> &str {
        self.program.as_str()
    }

    pub fn is_user(&self) -> bool {
        self.user
    }
}

/// Transfers control to a loaded module.
pub trait Executor {
    /// Call the code at `entry` and return when it returns.
    ///
    /// `entry` must point to code that follows the C calling convention.
    unsafe fn call(&mut self, entry: PhysAddr);
}

/// Calls the entry point as an `extern "C" fn()` in the current address space.
pub struct DirectCall;

impl Executor for DirectCall {
    unsafe fn call(&mut self, entry: PhysAddr) {
        let entry: extern "C" fn() = mem::transmute(entry.0);
        entry()
    }
}

/// Owner of the load window and of the execution context.
pub struct ModuleLoader {
    window: LoadWindow,
    context: ExecContext,
}

impl ModuleLoader {
    pub fn new(window: LoadWindow) -> ModuleLoader {
        ModuleLoader {
            window,
            context: ExecContext::kernel(),
        }
    }

    pub fn window(&self) -> &LoadWindow {
        &self.window
    }

    /// Load a module of either format, replacing whatever was loaded before.
    pub fn load(&mut self, image: &[u8]) -> Result<PhysAddr, LoadError> {
        match classify(image) {
            Format::Flat => self.load_flat(image),
            Format::Object => self.load_object(image),
        }
    }

    pub fn load_flat(&mut self, image: &[u8]) -> Result<PhysAddr, LoadError> {
        self.window.load_flat(image)
    }

    pub fn load_object(&mut self, image: &[u8]) -> Result<PhysAddr, LoadError> {
        load_object(&mut self.window, image)
    }

    pub fn context(&self) -> &ExecContext {
        &self.context
    }

    /// Switch to the context of module `name` and return the context to restore with
    /// `leave` once the module returned.
    #[must_use]
    pub fn enter(&mut self, name: &str, user: bool) -> ExecContext {
        debug!("entering {:?} (user: {})", name, user);
        mem::replace(&mut self.context, ExecContext::module(name, user))
    }

    pub fn leave(&mut self, previous: ExecContext) {
        debug!("leaving {:?}", self.context.program());
        self.context = previous;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::window::leak;

    #[test]
    fn long_names_are_cut() {
        let long = "a".repeat(70);
        assert_eq!(ProgramName::new(&long).as_str().len(), MAX_PROGRAM_NAME);
        let umlauts = "ü".repeat(40);
        assert_eq!(ProgramName::new(&umlauts).as_str(), "ü".repeat(32));
        assert_eq!(ProgramName::new("init").to_string(), "init");
    }

    #[test]
    fn contexts_nest() {
        let mut loader = ModuleLoader::new(LoadWindow::new(leak(16)));
        assert_eq!(loader.context().program(), "kernel");
        assert!(!loader.context().is_user());

        let outer = loader.enter("shell.bin", false);
        let inner = loader.enter("exec.o", true);
        assert_eq!(loader.context().program(), "exec.o");
        assert!(loader.context().is_user());
        loader.leave(inner);
        assert_eq!(loader.context().program(), "shell.bin");
        loader.leave(outer);
        assert_eq!(*loader.context(), ExecContext::kernel());
    }

    #[test]
    fn load_dispatches_on_format() {
        let mut loader = ModuleLoader::new(LoadWindow::new(leak(16)));
        let base = loader.window().base();
        assert_eq!(loader.load(&[0xC3]), Ok(base));
        assert_eq!(loader.load(b"\x7fELF"), Err(LoadError::Truncated));
    }
}
