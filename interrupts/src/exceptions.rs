//! The 32 CPU exception vectors.

pub const DEBUG: u8 = 1;
pub const BREAKPOINT: u8 = 3;
pub const DOUBLE_FAULT: u8 = 8;
pub const GENERAL_PROTECTION_FAULT: u8 = 13;
pub const PAGE_FAULT: u8 = 14;

/// Number of vectors reserved for exceptions.
pub const COUNT: u8 = 32;

static NAMES: [&str; COUNT as usize] = [
    "Divide by zero",
    "Debug",
    "Non-maskable interrupt",
    "Breakpoint",
    "Overflow",
    "Bound range exceeded",
    "Invalid opcode",
    "Device not available",
    "Double fault",
    "Coprocessor segment overrun",
    "Invalid TSS",
    "Segment not present",
    "Stack segment fault",
    "General protection fault",
    "Page fault",
    "Reserved",
    "Floating point error",
    "Alignment check",
    "Machine check",
    "SIMD floating point",
    "Virtualization",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
];

/// Name of exception `vector`, `None` outside of the exception range.
pub fn exception_name(vector: u8) -> Option<&'static str> {
    NAMES.get(vector as usize).copied()
}

/// Whether the CPU pushes an error code before entering the handler.
pub const fn pushes_error_code(vector: u8) -> bool {
    matches!(vector, 8 | 10..=14 | 17 | 21 | 29 | 30)
}

/// Whether returning to the interrupted code is harmless.
pub fn is_resumable(vector: u8) -> bool {
    vector == DEBUG || vector == BREAKPOINT
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(exception_name(0), Some("Divide by zero"));
        assert_eq!(exception_name(PAGE_FAULT), Some("Page fault"));
        assert_eq!(exception_name(31), Some("Reserved"));
        assert_eq!(exception_name(32), None);
    }

    #[test]
    fn error_codes() {
        assert!(pushes_error_code(DOUBLE_FAULT));
        assert!(pushes_error_code(GENERAL_PROTECTION_FAULT));
        assert!(!pushes_error_code(BREAKPOINT));
        assert!(!pushes_error_code(0x80));
    }

    #[test]
    fn only_debug_traps_resume() {
        let resumable: std::vec::Vec<u8> = (0..=255).filter(|&v| is_resumable(v)).collect();
        assert_eq!(resumable, vec![DEBUG, BREAKPOINT]);
    }
}
