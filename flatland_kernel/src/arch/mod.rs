//! Everything that only exists on the real machine: the entry point, the trap entry, the
//! global kernel heap and the panic handler.

mod boot;
mod platform;

use alloc::format;
use alloc::vec::Vec;
use core::fmt::{self, Write};
use core::panic::PanicInfo;
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};

use linked_list_allocator::LockedHeap;
use log::{error, info};

use bare_metal::cpu::io::com::{SerialPort, COM1_ADDR};
use bare_metal::cpu::{self, Registers};
use bare_metal::{PhysAddr, PhysAddrRange, UpCell};
use interrupts::stubs::stub_table;
use interrupts::{pic, TrapFrame};
use kmem::{Allocator, Arena};
use modload::{DirectCall, LoadWindow, ModuleLoader};
use multiboot::{CmdLine, Module, MultibootInfo};

use crate::boot::run_boot;
use crate::config::{BootOptions, FRAMEBUFFER, KERNEL_HEAP_SIZE, LOAD_WINDOW, PIC1_OFFSET, PIC2_OFFSET};
use crate::context::Kernel;
use crate::crash::{capture_terminal, emergency_report};
use crate::layout::place_regions;
use crate::logger::{self, SerialLogger};
use crate::trap::{dispatch_trap, Disposition};
use crate::vga::{Color, TextConsole, VgaMem, VGA_PHYS_ADDR};

static KERNEL: UpCell<Option<Kernel>> = unsafe { UpCell::new(None) };

static LOGGER: SerialLogger<SerialPort> = SerialLogger::new(unsafe { SerialPort::new(COM1_ADDR) });

#[global_allocator]
static KERNEL_ALLOCATOR: LockedHeap = LockedHeap::empty();

static mut KERNEL_HEAP: [u8; KERNEL_HEAP_SIZE] = [0; KERNEL_HEAP_SIZE];

static PANICKING: AtomicBool = AtomicBool::new(false);

extern "C" {
    /// Defined by the linker script.
    static __kernel_end: u8;
}

fn halt() -> ! {
    unsafe {
        interrupts::disable();
        cpu::hang()
    }
}

/// Report on fresh handles to COM1 and the VGA buffer and halt.
fn emergency(message: fmt::Arguments, ip: Option<u32>) -> ! {
    let mut com1 = unsafe { SerialPort::new(COM1_ADDR) };
    emergency_report(&mut com1, message, ip);
    let vga = unsafe { VgaMem::from_addr(VGA_PHYS_ADDR) };
    let mut console = TextConsole::with_colors(vga, Color::White, Color::Red);
    emergency_report(&mut console, message, ip);
    halt()
}

#[no_mangle]
pub extern "C" fn kernel_main(magic: u32, info_addr: u32) -> ! {
    let mut com1 = unsafe { SerialPort::new(COM1_ADDR) };
    com1.init();

    let info = match unsafe { MultibootInfo::from_boot_registers(magic, PhysAddr(info_addr as usize)) } {
        Ok(info) => info,
        Err(err) => {
            let _ = writeln!(com1, "ERROR: {}", err);
            halt()
        }
    };
    let options = BootOptions::parse(CmdLine::parse(unsafe { info.cmdline() }.unwrap_or("")));
    if logger::init(&LOGGER, options.debug).is_err() {
        let _ = writeln!(com1, "logger already installed");
    }
    info!("boot options {:?}", options);

    unsafe {
        KERNEL_ALLOCATOR
            .lock()
            .init(ptr::addr_of_mut!(KERNEL_HEAP) as *mut u8, KERNEL_HEAP_SIZE)
    };

    let modules: Vec<Module> = unsafe { info.modules() }.collect();
    let ranges: Vec<PhysAddrRange> = modules.iter().map(Module::range).collect();
    let kernel_end = PhysAddr(unsafe { ptr::addr_of!(__kernel_end) } as usize);
    let layout = match place_regions(kernel_end, &ranges, LOAD_WINDOW, info.upper_memory_end()) {
        Ok(layout) => layout,
        Err(err) => panic!("{}", err),
    };

    let mut mem = Allocator::new(unsafe { Arena::from_range(layout.swap) }, FRAMEBUFFER);
    mem.init(unsafe { Arena::from_range(layout.heap) });
    let loader = ModuleLoader::new(unsafe { LoadWindow::from_range(LOAD_WINDOW) });

    {
        let mut slot = KERNEL.exclusive_access();
        let kernel = slot.insert(Kernel::new(options, mem, loader, platform::collaborators(), kernel_end));
        kernel.init_traps(&stub_table());
        // the table lives in the static from now on and never moves
        unsafe {
            kernel.traps().load();
            pic::remap(PIC1_OFFSET, PIC2_OFFSET);
            pic::mask_all();
        }
        kernel.init_syscalls();
        kernel.start_boot(modules);
    }

    run_boot(&KERNEL, &mut DirectCall);
    halt()
}

/// Called by the common trap stub with the saved state of the interrupted code.
#[no_mangle]
extern "C" fn trap_dispatch(frame: &mut TrapFrame) {
    match dispatch_trap(&KERNEL, frame, &mut DirectCall) {
        Disposition::Resume => {}
        Disposition::Halt => halt(),
        Disposition::Unavailable => {
            error!("trap {:#x} while the kernel is busy", frame.vector);
            emergency(format_args!("trap {:#x} in the kernel", frame.vector), Some(frame.eip))
        }
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    unsafe { interrupts::disable() };
    // a panic while reporting a panic only gets the minimal report
    if !PANICKING.swap(true, Ordering::SeqCst) {
        let message = match info.location() {
            Some(location) => format!("{} ({}:{})", info.message(), location.file(), location.line()),
            None => format!("{}", info.message()),
        };
        // whoever holds the kernel right now is never resumed
        if unsafe { capture_terminal(&KERNEL, &message, Registers::capture()) } {
            halt();
        }
    }
    emergency(format_args!("{}", info), None)
}
