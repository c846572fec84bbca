use bare_metal::cpu::Registers;

/// State saved by the entry stubs, lowest address first.
///
/// `pushal` stores the general purpose registers below the vector number and the error
/// code pushed by the stub, which in turn sit below what the CPU pushed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct TrapFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// Stack pointer before `pushal`, pointing at `vector`.
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub vector: u32,
    /// Zero for vectors without a CPU supplied error code.
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

assert_eq_size!(TrapFrame, [u32; 13]);

impl TrapFrame {
    /// Bytes between the saved `esp` and the stack of the interrupted code: vector, error
    /// code, eip, cs and eflags. Traps never change privilege, so no ss:esp is pushed.
    const PUSHED_BELOW_STACK: u32 = 5 * 4;

    /// Stack pointer of the interrupted code.
    pub fn interrupted_esp(&self) -> u32 {
        self.esp.wrapping_add(Self::PUSHED_BELOW_STACK)
    }

    /// Register file of the interrupted code.
    pub fn registers(&self) -> Registers {
        Registers {
            eax: self.eax,
            ebx: self.ebx,
            ecx: self.ecx,
            edx: self.edx,
            esi: self.esi,
            edi: self.edi,
            ebp: self.ebp,
            esp: self.interrupted_esp(),
            eip: self.eip,
            eflags: self.eflags,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registers_of_interrupted_code() {
        let frame = TrapFrame {
            eax: 1,
            esp: 0x8_FF00,
            eip: 0x20_0010,
            eflags: 0x202,
            ..TrapFrame::default()
        };
        let regs = frame.registers();
        assert_eq!(regs.eax, 1);
        assert_eq!(regs.esp, 0x8_FF14);
        assert_eq!(regs.eip, 0x20_0010);
        assert_eq!(regs.eflags, 0x202);
    }
}
