//! Interrupt descriptor table and the common dispatcher.
//!
//! All 256 gates point at thin assembly stubs that normalise the stack
//! into an [`InterruptFrame`] and call [`interrupt_dispatcher`]. Kernel
//! code registers per-vector handlers at runtime; exceptions without a
//! handler get the register dump below, unhandled IRQs are ignored.

use crate::constants::gdt::KERNEL_CODE_SELECTOR;
use crate::constants::idt::{
    IDT_ENTRIES, INTERRUPT_GATE, IRQ_BASE, SYSCALL_VECTOR, USER_INTERRUPT_GATE,
};
use crate::interrupts::stubs;
use crate::serial_println;
use lazy_static::lazy_static;
use log::info;
use spin::Mutex;
use x86_64::instructions::interrupts;
use x86_64::instructions::tables::lidt;
use x86_64::registers::control::Cr2;
use x86_64::structures::DescriptorTablePointer;
use x86_64::VirtAddr;

/// A 64-bit gate descriptor.
#[derive(Clone, Copy)]
#[repr(C, packed)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    ist: u8,
    type_attr: u8,
    offset_mid: u16,
    offset_high: u32,
    reserved: u32,
}

impl IdtEntry {
    const fn missing() -> Self {
        IdtEntry {
            offset_low: 0,
            selector: 0,
            ist: 0,
            type_attr: 0,
            offset_mid: 0,
            offset_high: 0,
            reserved: 0,
        }
    }

    fn set_handler(&mut self, handler: extern "C" fn(), type_attr: u8) {
        self.set_handler_addr(handler as usize as u64, type_attr);
    }

    fn set_handler_addr(&mut self, addr: u64, type_attr: u8) {
        self.offset_low = addr as u16;
        self.offset_mid = (addr >> 16) as u16;
        self.offset_high = (addr >> 32) as u32;
        self.selector = KERNEL_CODE_SELECTOR as u16;
        self.ist = 0;
        self.type_attr = type_attr;
        self.reserved = 0;
    }
}

#[repr(C, align(16))]
struct Idt {
    entries: [IdtEntry; IDT_ENTRIES],
}

impl Idt {
    fn new() -> Self {
        Idt {
            entries: [IdtEntry::missing(); IDT_ENTRIES],
        }
    }

    fn set_gate(&mut self, vector: usize, handler: extern "C" fn(), type_attr: u8) {
        self.entries[vector].set_handler(handler, type_attr);
    }

    fn load(&'static self) {
        let pointer = DescriptorTablePointer {
            limit: (core::mem::size_of::<Self>() - 1) as u16,
            base: VirtAddr::new(self as *const _ as u64),
        };
        unsafe { lidt(&pointer) };
    }
}

lazy_static! {
    static ref IDT: Idt = {
        let mut idt = Idt::new();
        for (vector, stub) in stubs::EXCEPTION_STUBS.iter().enumerate() {
            idt.set_gate(vector, *stub, INTERRUPT_GATE);
        }
        for (irq, stub) in stubs::IRQ_STUBS.iter().enumerate() {
            idt.set_gate(IRQ_BASE as usize + irq, *stub, INTERRUPT_GATE);
        }
        // Reserved for system calls; nothing dispatches it yet.
        idt.set_gate(SYSCALL_VECTOR as usize, stubs::isr128, USER_INTERRUPT_GATE);
        idt
    };
}

/// Register state captured by the interrupt stubs, in stack order.
#[repr(C)]
pub struct InterruptFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub int_no: u64,
    pub err_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl core::fmt::Debug for InterruptFrame {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("InterruptFrame")
            .field("int_no", &self.int_no)
            .field("err_code", &format_args!("{:#x}", self.err_code))
            .field("rip", &format_args!("{:#016x}", self.rip))
            .field("rsp", &format_args!("{:#016x}", self.rsp))
            .field("rflags", &format_args!("{:#016x}", self.rflags))
            .field("rax", &format_args!("{:#016x}", self.rax))
            .field("rbx", &format_args!("{:#016x}", self.rbx))
            .field("rcx", &format_args!("{:#016x}", self.rcx))
            .field("rdx", &format_args!("{:#016x}", self.rdx))
            .field("rsi", &format_args!("{:#016x}", self.rsi))
            .field("rdi", &format_args!("{:#016x}", self.rdi))
            .field("rbp", &format_args!("{:#016x}", self.rbp))
            .finish()
    }
}

/// A registered interrupt handler.
pub type InterruptHandler = fn(&mut InterruptFrame);

static HANDLERS: Mutex<[Option<InterruptHandler>; IDT_ENTRIES]> =
    Mutex::new([None; IDT_ENTRIES]);

/// Loads the descriptor table.
pub fn init() {
    IDT.load();
    info!("IDT loaded with {} entries", IDT_ENTRIES);
}

/// Installs `handler` for `vector`, replacing any previous registration.
pub fn register_handler(vector: u8, handler: InterruptHandler) {
    interrupts::without_interrupts(|| {
        HANDLERS.lock()[vector as usize] = Some(handler);
    });
}

pub fn enable() {
    interrupts::enable();
}

pub fn disable() {
    interrupts::disable();
}

pub fn are_enabled() -> bool {
    interrupts::are_enabled()
}

pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    interrupts::without_interrupts(f)
}

/// Names for the CPU exception vectors.
pub fn exception_name(vector: u8) -> &'static str {
    const NAMES: [&str; 32] = [
        "Divide by Zero",
        "Debug",
        "Non-Maskable Interrupt",
        "Breakpoint",
        "Overflow",
        "Bound Range Exceeded",
        "Invalid Opcode",
        "Device Not Available",
        "Double Fault",
        "Coprocessor Segment Overrun",
        "Invalid TSS",
        "Segment Not Present",
        "Stack-Segment Fault",
        "General Protection Fault",
        "Page Fault",
        "Reserved",
        "x87 Floating-Point Exception",
        "Alignment Check",
        "Machine Check",
        "SIMD Floating-Point Exception",
        "Virtualization Exception",
        "Reserved",
        "Reserved",
        "Reserved",
        "Reserved",
        "Reserved",
        "Reserved",
        "Reserved",
        "Reserved",
        "Reserved",
        "Security Exception",
        "Reserved",
    ];

    if (vector as usize) < NAMES.len() {
        NAMES[vector as usize]
    } else {
        "Unknown Exception"
    }
}

/// Common dispatcher every stub funnels into.
pub(super) extern "C" fn interrupt_dispatcher(frame: &mut InterruptFrame) {
    let vector = frame.int_no as usize;

    // Copy the handler out so it runs without the registry lock held.
    let handler = HANDLERS.lock()[vector];

    if let Some(handler) = handler {
        handler(frame);
    } else if vector < 32 {
        default_exception_handler(frame);
    }
    // Spurious IRQs without a registered handler are ignored.
}

/// Dump-and-halt path for exceptions nothing claimed.
fn default_exception_handler(frame: &InterruptFrame) -> ! {
    serial_println!("\n=== CPU EXCEPTION ===");
    serial_println!(
        "Exception {}: {}",
        frame.int_no,
        exception_name(frame.int_no as u8)
    );
    serial_println!("Error Code: {:#x}", frame.err_code);
    serial_println!("\nRegisters:");
    serial_println!("  RIP: {:#016x}  RSP: {:#016x}", frame.rip, frame.rsp);
    serial_println!("  RAX: {:#016x}  RBX: {:#016x}", frame.rax, frame.rbx);
    serial_println!("  RCX: {:#016x}  RDX: {:#016x}", frame.rcx, frame.rdx);
    serial_println!("  RSI: {:#016x}  RDI: {:#016x}", frame.rsi, frame.rdi);
    serial_println!("  RBP: {:#016x}  CS:  {:#06x}", frame.rbp, frame.cs);
    serial_println!("  RFLAGS: {:#016x}", frame.rflags);

    if frame.int_no == 14 {
        let fault_address = Cr2::read_raw();
        serial_println!("\nPage Fault Address: {:#016x}", fault_address);
        let cause = if frame.err_code & 0x1 == 0 {
            "Page not present"
        } else {
            "Protection violation"
        };
        let access = if frame.err_code & 0x2 != 0 {
            "Write"
        } else {
            "Read"
        };
        let mode = if frame.err_code & 0x4 != 0 {
            "User mode"
        } else {
            "Kernel mode"
        };
        serial_println!("Caused by: {} / {} / {}", cause, access, mode);
    }

    serial_println!("\n=== KERNEL PANIC ===");
    serial_println!("System halted.");

    crate::halt_loop()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn gate_entry_is_sixteen_bytes() {
        assert_eq!(core::mem::size_of::<IdtEntry>(), 16);
        assert_eq!(core::mem::size_of::<Idt>(), IDT_ENTRIES * 16);
    }

    #[test_case]
    fn gate_splits_handler_address() {
        let mut entry = IdtEntry::missing();
        entry.set_handler_addr(0x1234_5678_9ABC_DEF0, INTERRUPT_GATE);

        assert_eq!({ entry.offset_low }, 0xDEF0);
        assert_eq!({ entry.offset_mid }, 0x9ABC);
        assert_eq!({ entry.offset_high }, 0x1234_5678);
        assert_eq!({ entry.selector }, KERNEL_CODE_SELECTOR as u16);
        assert_eq!({ entry.type_attr }, INTERRUPT_GATE);
    }

    #[test_case]
    fn frame_layout_matches_stub_pushes() {
        // 15 GPRs + int_no + err_code + the five CPU-pushed words.
        assert_eq!(core::mem::size_of::<InterruptFrame>(), 22 * 8);
        assert_eq!(core::mem::offset_of!(InterruptFrame, int_no), 15 * 8);
        assert_eq!(core::mem::offset_of!(InterruptFrame, rip), 17 * 8);
        assert_eq!(core::mem::offset_of!(InterruptFrame, ss), 21 * 8);
    }

    #[test_case]
    fn exception_names_cover_known_vectors() {
        assert_eq!(exception_name(0), "Divide by Zero");
        assert_eq!(exception_name(8), "Double Fault");
        assert_eq!(exception_name(14), "Page Fault");
        assert_eq!(exception_name(64), "Unknown Exception");
    }
}
