//! Interrupt entry stubs.
//!
//! Every vector funnels through `interrupt_common`, which captures the
//! register state the dispatcher and the context switcher both expect.
//! Vectors where the CPU pushes a hardware error code skip the synthetic
//! zero so the frame layout stays uniform.

use core::arch::naked_asm;

use super::idt::interrupt_dispatcher;

/// Shared tail of every stub: saves the general-purpose registers on top
/// of the `[int_no, err_code]` pair, hands the frame to the dispatcher,
/// then unwinds and returns from the interrupt.
#[unsafe(naked)]
extern "C" fn interrupt_common() {
    naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, rsp",
        "call {dispatcher}",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        // Drop int_no and err_code.
        "add rsp, 16",
        "iretq",
        dispatcher = sym interrupt_dispatcher,
    )
}

// Stub for a vector without a hardware error code: push a zero in its
// place, then the vector number.
macro_rules! interrupt_stub {
    ($name:ident, $vector:expr) => {
        #[unsafe(naked)]
        pub(super) extern "C" fn $name() {
            naked_asm!(
                "push 0",
                "push {vector}",
                "jmp {common}",
                vector = const $vector,
                common = sym interrupt_common,
            )
        }
    };
}

// Stub for a vector where the CPU already pushed an error code.
macro_rules! interrupt_stub_with_error {
    ($name:ident, $vector:expr) => {
        #[unsafe(naked)]
        pub(super) extern "C" fn $name() {
            naked_asm!(
                "push {vector}",
                "jmp {common}",
                vector = const $vector,
                common = sym interrupt_common,
            )
        }
    };
}

interrupt_stub!(isr0, 0);
interrupt_stub!(isr1, 1);
interrupt_stub!(isr2, 2);
interrupt_stub!(isr3, 3);
interrupt_stub!(isr4, 4);
interrupt_stub!(isr5, 5);
interrupt_stub!(isr6, 6);
interrupt_stub!(isr7, 7);
interrupt_stub_with_error!(isr8, 8);
interrupt_stub!(isr9, 9);
interrupt_stub_with_error!(isr10, 10);
interrupt_stub_with_error!(isr11, 11);
interrupt_stub_with_error!(isr12, 12);
interrupt_stub_with_error!(isr13, 13);
interrupt_stub_with_error!(isr14, 14);
interrupt_stub!(isr15, 15);
interrupt_stub!(isr16, 16);
interrupt_stub_with_error!(isr17, 17);
interrupt_stub!(isr18, 18);
interrupt_stub!(isr19, 19);
interrupt_stub!(isr20, 20);
interrupt_stub!(isr21, 21);
interrupt_stub!(isr22, 22);
interrupt_stub!(isr23, 23);
interrupt_stub!(isr24, 24);
interrupt_stub!(isr25, 25);
interrupt_stub!(isr26, 26);
interrupt_stub!(isr27, 27);
interrupt_stub!(isr28, 28);
interrupt_stub!(isr29, 29);
interrupt_stub_with_error!(isr30, 30);
interrupt_stub!(isr31, 31);

interrupt_stub!(irq0, 32);
interrupt_stub!(irq1, 33);
interrupt_stub!(irq2, 34);
interrupt_stub!(irq3, 35);
interrupt_stub!(irq4, 36);
interrupt_stub!(irq5, 37);
interrupt_stub!(irq6, 38);
interrupt_stub!(irq7, 39);
interrupt_stub!(irq8, 40);
interrupt_stub!(irq9, 41);
interrupt_stub!(irq10, 42);
interrupt_stub!(irq11, 43);
interrupt_stub!(irq12, 44);
interrupt_stub!(irq13, 45);
interrupt_stub!(irq14, 46);
interrupt_stub!(irq15, 47);

interrupt_stub!(isr128, 128);

/// CPU exception entry points, indexed by vector.
pub(super) const EXCEPTION_STUBS: [extern "C" fn(); 32] = [
    isr0, isr1, isr2, isr3, isr4, isr5, isr6, isr7, isr8, isr9, isr10, isr11, isr12, isr13,
    isr14, isr15, isr16, isr17, isr18, isr19, isr20, isr21, isr22, isr23, isr24, isr25, isr26,
    isr27, isr28, isr29, isr30, isr31,
];

/// Hardware IRQ entry points, indexed by IRQ line.
pub(super) const IRQ_STUBS: [extern "C" fn(); 16] = [
    irq0, irq1, irq2, irq3, irq4, irq5, irq6, irq7, irq8, irq9, irq10, irq11, irq12, irq13,
    irq14, irq15,
];
