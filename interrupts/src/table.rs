//! Routing of trap vectors to handlers.
//!
//! Every vector enters through the same common stub. A registered handler owns the
//! response to its vector completely; everything else falls back to `route`'s defaults.

use core::fmt;

use log::debug;

use bare_metal::segments::{Ring, Selector};

use crate::exceptions;
use crate::frame::TrapFrame;
use crate::idt::{GateType, Idt, IdtEntry};

/// First vector of the remapped PIC interrupts.
pub const IRQ_BASE: u8 = 32;
/// Number of PIC interrupt lines.
pub const IRQ_COUNT: u8 = 16;

/// A handler gets the kernel context `C` and the saved state of the interrupted code.
pub type Handler<C, R> = fn(&mut C, &mut TrapFrame) -> R;

/// What to do about a trap.
pub enum Route<C, R> {
    Handler(Handler<C, R>),
    /// Return to the interrupted code.
    Resume,
    Fatal(Fault),
}

impl<C, R> Clone for Route<C, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C, R> Copy for Route<C, R> {}

impl<C, R> fmt::Debug for Route<C, R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Route::Handler(h) => write!(f, "Handler({:p})", *h as *const ()),
            Route::Resume => write!(f, "Resume"),
            Route::Fatal(fault) => write!(f, "Fatal({:?})", fault),
        }
    }
}

/// A trap nobody handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Exception { vector: u8, name: &'static str },
    /// Line of the PIC pair.
    UnhandledIrq(u8),
    UnhandledVector(u8),
}

impl Fault {
    pub fn vector(&self) -> u8 {
        match *self {
            Fault::Exception { vector, .. } => vector,
            Fault::UnhandledIrq(irq) => irq + IRQ_BASE,
            Fault::UnhandledVector(vector) => vector,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Fault::Exception { name, .. } => write!(f, "CPU fault: {}", name),
            Fault::UnhandledIrq(irq) => write!(f, "Unhandled IRQ {}", irq),
            Fault::UnhandledVector(vector) => write!(f, "Unhandled interrupt {}", vector),
        }
    }
}

/// Location of the low-level entry stubs, one every `stride` bytes starting at `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StubTable {
    pub base: u32,
    pub stride: u32,
    pub selector: Selector,
}

impl StubTable {
    pub fn entry(&self, vector: u8) -> u32 {
        self.base + self.stride * vector as u32
    }
}

pub struct TrapTable<C, R> {
    idt: Idt,
    handlers: [Option<Handler<C, R>>; 256],
}

impl<C, R> TrapTable<C, R> {
    pub fn new() -> TrapTable<C, R> {
        TrapTable {
            idt: Idt::new(),
            handlers: [None; 256],
        }
    }

    /// Point all 256 vectors at their entry stub and forget all handlers.
    pub fn init(&mut self, stubs: &StubTable) {
        for vector in 0..=255_u8 {
            self.idt[vector] = IdtEntry::new(
                GateType::INTERRUPT_GATE,
                stubs.selector,
                stubs.entry(vector),
                Ring::RING0,
                true,
            );
        }
        self.handlers = [None; 256];
    }

    /// Install `handler` for `vector`, callable from code running in `ring` or below.
    ///
    /// Panics if the vector already has a handler.
    pub fn register(&mut self, vector: u8, handler: Handler<C, R>, ring: Ring) {
        let slot = &mut self.handlers[vector as usize];
        if slot.is_some() {
            panic!("trap vector {:#x} already has a handler", vector);
        }
        *slot = Some(handler);
        self.idt[vector].set_descriptor_privilege(ring);
        debug!("trap vector {:#x} bound, dpl {}", vector, ring.number());
    }

    pub fn is_bound(&self, vector: u8) -> bool {
        self.handlers[vector as usize].is_some()
    }

    pub fn route(&self, vector: u8) -> Route<C, R> {
        if let Some(handler) = self.handlers[vector as usize] {
            return Route::Handler(handler);
        }
        match exceptions::exception_name(vector) {
            Some(_) if exceptions::is_resumable(vector) => Route::Resume,
            Some(name) => Route::Fatal(Fault::Exception { vector, name }),
            None if vector < IRQ_BASE + IRQ_COUNT => Route::Fatal(Fault::UnhandledIrq(vector - IRQ_BASE)),
            None => Route::Fatal(Fault::UnhandledVector(vector)),
        }
    }

    pub fn idt(&self) -> &Idt {
        &self.idt
    }

    /// Make this table the active IDT. The table must not move while it is active.
    #[cfg(target_arch = "x86")]
    pub unsafe fn load(&self) {
        crate::idt::load_idt(&self.idt)
    }
}

impl<C, R> Default for TrapTable<C, R> {
    fn default() -> Self {
        TrapTable::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Counter(u32);

    fn count(c: &mut Counter, frame: &mut TrapFrame) -> u32 {
        c.0 += 1;
        frame.eax = c.0;
        frame.vector
    }

    const STUBS: StubTable = StubTable {
        base: 0x0010_0000,
        stride: 16,
        selector: Selector::KERNEL_CODE,
    };

    fn table() -> TrapTable<Counter, u32> {
        let mut t = TrapTable::new();
        t.init(&STUBS);
        t
    }

    #[test]
    fn init_points_at_stubs() {
        let t = table();
        for vector in [0_u8, 1, 0x80, 255].iter().copied() {
            let e = t.idt()[vector];
            assert!(e.present());
            assert_eq!(e.offset(), 0x0010_0000 + 16 * vector as u32);
            assert_eq!(e.selector(), Selector::KERNEL_CODE);
            assert_eq!(e.descriptor_privilege(), Ring::RING0);
        }
    }

    #[test]
    fn registered_handler_owns_the_vector() {
        let mut t = table();
        t.register(0x80, count, Ring::RING3);
        assert!(t.is_bound(0x80));
        assert_eq!(t.idt()[0x80].descriptor_privilege(), Ring::RING3);

        let mut counter = Counter(0);
        let mut frame = TrapFrame {
            vector: 0x80,
            ..TrapFrame::default()
        };
        match t.route(0x80) {
            Route::Handler(h) => assert_eq!(h(&mut counter, &mut frame), 0x80),
            other => panic!("unexpected route {:?}", other),
        }
        assert_eq!(frame.eax, 1);
    }

    #[test]
    fn handlers_override_exceptions() {
        let mut t = table();
        t.register(14, count, Ring::RING0);
        assert!(matches!(t.route(14), Route::Handler(_)));
    }

    #[test]
    fn default_routes() {
        let t = table();
        assert!(matches!(t.route(1), Route::Resume));
        assert!(matches!(t.route(3), Route::Resume));
        assert!(matches!(
            t.route(13),
            Route::Fatal(Fault::Exception {
                vector: 13,
                name: "General protection fault"
            })
        ));
        assert!(matches!(t.route(32), Route::Fatal(Fault::UnhandledIrq(0))));
        assert!(matches!(t.route(47), Route::Fatal(Fault::UnhandledIrq(15))));
        assert!(matches!(t.route(48), Route::Fatal(Fault::UnhandledVector(48))));
        assert!(matches!(t.route(0x80), Route::Fatal(Fault::UnhandledVector(0x80))));
    }

    #[test]
    fn fault_messages() {
        assert_eq!(Fault::UnhandledIrq(1).to_string(), "Unhandled IRQ 1");
        assert_eq!(Fault::UnhandledIrq(1).vector(), 33);
        assert_eq!(Fault::UnhandledVector(200).to_string(), "Unhandled interrupt 200");
        let pf = Fault::Exception { vector: 14, name: "Page fault" };
        assert_eq!(pf.to_string(), "CPU fault: Page fault");
    }

    #[test]
    #[should_panic(expected = "already has a handler")]
    fn double_registration_is_fatal() {
        let mut t = table();
        t.register(0x80, count, Ring::RING3);
        t.register(0x80, count, Ring::RING3);
    }

    #[test]
    fn init_clears_handlers() {
        let mut t = table();
        t.register(0x80, count, Ring::RING3);
        t.init(&STUBS);
        assert!(!t.is_bound(0x80));
        assert_eq!(t.idt()[0x80].descriptor_privilege(), Ring::RING0);
    }
}
