//! Compile time layout and run time boot options.

use log::warn;

use bare_metal::{PhysAddr, PhysAddrRange};
use multiboot::{CmdLine, CmdLineToken};

/// Physical address every module is loaded to.
pub const LOAD_ADDRESS: PhysAddr = PhysAddr(0x0020_0000);
pub const LOAD_WINDOW_SIZE: usize = 1 << 20;
pub const LOAD_WINDOW: PhysAddrRange = PhysAddrRange::new(LOAD_ADDRESS, LOAD_WINDOW_SIZE);

/// Size of the managed heap handed to modules and syscalls.
pub const HEAP_SIZE: usize = 192 * 1024;
/// Size of the overflow region used once the heap is exhausted.
pub const SWAP_SIZE: usize = 64 * 1024;
/// Size of the heap backing the kernel's own `alloc` collections.
pub const KERNEL_HEAP_SIZE: usize = 64 * 1024;

pub const FRAMEBUFFER: PhysAddrRange = PhysAddrRange::new(PhysAddr(0xA0000), 0x10000);

pub const SYSCALL_VECTOR: u8 = 0x80;
pub const PIC1_OFFSET: u8 = 32;
pub const PIC2_OFFSET: u8 = 40;

/// Path component marking modules that only run in userland mode.
pub const USERLAND_TAG: &str = "userland";
/// Name under which crash reports are persisted.
pub const CRASH_ARTIFACT: &str = "crash.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run the modules that are not tagged as userland.
    Kernel,
    /// Run only the modules below a `userland` directory.
    Userland,
}

/// Which of the module handling paths are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleMode {
    Interpreted,
    Binaries,
    Both,
}

impl ModuleMode {
    pub fn runs_interpreted(self) -> bool {
        self != ModuleMode::Binaries
    }

    pub fn runs_binaries(self) -> bool {
        self != ModuleMode::Interpreted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootOptions {
    pub run_mode: RunMode,
    pub module_mode: ModuleMode,
    /// Diagnostic mode: poison freed memory, verbose logs, loud crash screen.
    pub debug: bool,
    /// Offer the expanded crash report interactively.
    pub crash_prompt: bool,
}

impl Default for BootOptions {
    fn default() -> Self {
        BootOptions {
            run_mode: RunMode::Kernel,
            module_mode: ModuleMode::Both,
            debug: false,
            crash_prompt: false,
        }
    }
}

impl BootOptions {
    pub fn parse(cmdline: CmdLine) -> BootOptions {
        let mut options = BootOptions::default();
        for token in cmdline {
            match token {
                CmdLineToken::KeyValuePair("mode", "kernel") => options.run_mode = RunMode::Kernel,
                CmdLineToken::KeyValuePair("mode", "userland") => options.run_mode = RunMode::Userland,
                CmdLineToken::KeyValuePair("modules", "interp") => options.module_mode = ModuleMode::Interpreted,
                CmdLineToken::KeyValuePair("modules", "object") => options.module_mode = ModuleMode::Binaries,
                CmdLineToken::KeyValuePair("modules", "both") => options.module_mode = ModuleMode::Both,
                CmdLineToken::Flag("debug") => options.debug = true,
                CmdLineToken::Flag("crashprompt") => options.crash_prompt = true,
                other => warn!("ignoring unknown boot option {:?}", other),
            }
        }
        options
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        assert_eq!(BootOptions::parse(CmdLine::parse("")), BootOptions::default());
        assert_eq!(BootOptions::default().run_mode, RunMode::Kernel);
    }

    #[test]
    fn all_options() {
        let options = BootOptions::parse(CmdLine::parse("/boot/kernel.bin debug mode=userland modules=interp crashprompt"));
        assert_eq!(
            options,
            BootOptions {
                run_mode: RunMode::Userland,
                module_mode: ModuleMode::Interpreted,
                debug: true,
                crash_prompt: true,
            }
        );
        assert!(options.module_mode.runs_interpreted());
        assert!(!options.module_mode.runs_binaries());
    }

    #[test]
    fn unknown_values_keep_defaults() {
        let options = BootOptions::parse(CmdLine::parse("mode=turbo modules=object quiet"));
        assert_eq!(options.run_mode, RunMode::Kernel);
        assert_eq!(options.module_mode, ModuleMode::Binaries);
        assert!(!options.debug);
    }

    #[test]
    fn load_window_is_above_the_low_megabyte() {
        assert!(LOAD_WINDOW.start >= PhysAddr(0x10_0000));
        assert!(!LOAD_WINDOW.overlaps(&FRAMEBUFFER));
    }
}
