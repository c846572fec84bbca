#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub mod io;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
use core::arch::asm;

/// Pause the CPU until the next interrupt arrives.
#[inline]
pub unsafe fn hlt() {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    asm!("hlt", options(nomem, nostack, preserves_flags));
    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    core::hint::spin_loop();
}

/// Pause the CPU indefintely. Interrupts may still arrive,
/// depending on the interrupt flags of the CPU.
#[inline]
pub unsafe fn hang() -> ! {
    loop {
        hlt();
    }
}

/// Snapshot of the general purpose registers of a 32-bit CPU.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub eip: u32,
    pub eflags: u32,
}

#[cfg(target_arch = "x86")]
macro_rules! read_reg {
    ($reg:literal) => {{
        let value: u32;
        asm!(concat!("mov {0}, ", $reg), out(reg) value, options(nomem, nostack, preserves_flags));
        value
    }};
}

impl Registers {
    /// Capture the registers of the caller. `eip` is the address inside this function
    /// and `eax` is whatever the compiler left in it.
    #[cfg(target_arch = "x86")]
    #[inline(never)]
    pub fn capture() -> Registers {
        unsafe {
            let eflags: u32;
            let eip: u32;
            asm!("pushfd", "pop {0}", out(reg) eflags, options(nomem, preserves_flags));
            asm!("call 2f", "2:", "pop {0}", out(reg) eip, options(nomem, preserves_flags));
            Registers {
                eax: read_reg!("eax"),
                ebx: read_reg!("ebx"),
                ecx: read_reg!("ecx"),
                edx: read_reg!("edx"),
                esi: read_reg!("esi"),
                edi: read_reg!("edi"),
                ebp: read_reg!("ebp"),
                esp: read_reg!("esp"),
                eip,
                eflags,
            }
        }
    }

    #[cfg(not(target_arch = "x86"))]
    pub fn capture() -> Registers {
        Registers::default()
    }
}
