//! Context switching primitives.
//!
//! A suspended thread is represented by its stack pointer, which addresses
//! a [`SavedContext`]: the fifteen general-purpose registers below an
//! interrupt-return frame. [`context_switch`] saves the running thread
//! into that shape and resumes the next one with `iretq`, so a thread
//! parked by a voluntary switch and one parked by preemption resume
//! identically, and a freshly created thread starts from a hand-built
//! frame of the same shape.

use core::arch::naked_asm;

/// Register snapshot a suspended thread's stack pointer addresses.
#[repr(C)]
pub struct SavedContext {
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
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// Number of 64-bit slots in a [`SavedContext`].
pub const SAVED_CONTEXT_SLOTS: usize = 20;

/// Suspends the calling thread and resumes another.
///
/// Builds an interrupt-return frame addressing the caller's return point,
/// saves the general-purpose registers below it, stores the resulting
/// stack pointer through `old_slot`, then switches to `new_sp` and
/// resumes via `iretq`.
///
/// # Safety
/// `old_slot` must be writable and `new_sp` must point at a valid
/// [`SavedContext`] on an otherwise unused stack.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(old_slot: *mut u64, new_sp: u64) {
    naked_asm!(
        // Interrupt-return frame for the resume point. rax is dead here
        // (caller-saved), so it serves as scratch.
        "mov rax, ss",
        "push rax",
        "lea rax, [rsp + 16]",
        "push rax",
        "pushfq",
        "mov rax, cs",
        "push rax",
        "mov rax, [rsp + 32]",
        "push rax",
        // General-purpose registers, matching the dispatch frame order.
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
        "mov [rdi], rsp",
        "mov rsp, rsi",
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
        "iretq",
    )
}

/// First instructions every new thread executes.
///
/// The creation frame parks the entry-point pointer at the top of the
/// thread's stack; this pops it, opens the interrupt window and calls
/// through. A returning entry point falls into `thread_exit(0)`.
#[unsafe(naked)]
pub extern "C" fn thread_trampoline() {
    naked_asm!(
        "pop rax",
        "sti",
        "call rax",
        "xor edi, edi",
        "call {exit}",
        "2:",
        "hlt",
        "jmp 2b",
        exit = sym crate::processes::thread::thread_exit,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn saved_context_layout() {
        assert_eq!(
            core::mem::size_of::<SavedContext>(),
            SAVED_CONTEXT_SLOTS * 8
        );
        assert_eq!(core::mem::offset_of!(SavedContext, rip), 15 * 8);
        assert_eq!(core::mem::offset_of!(SavedContext, ss), 19 * 8);
    }
}
