//! Kernel threads.
//!
//! A thread control block is shared as `Arc<Thread>` between its owning
//! process and the scheduler; state and the saved stack pointer live in
//! atomics so the timer path never takes a lock on the TCB itself.

use crate::constants::gdt::{KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR};
use crate::constants::processes::{DEFAULT_STACK_SIZE, DEFAULT_TIME_SLICE, INITIAL_RFLAGS};
use crate::memory::heap;
use crate::processes::context::thread_trampoline;
use crate::processes::scheduler;
use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use log::debug;

static NEXT_TID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    Created = 0,
    Ready = 1,
    Running = 2,
    Blocked = 3,
    Terminated = 4,
}

impl ThreadState {
    fn from_u8(raw: u8) -> ThreadState {
        match raw {
            0 => ThreadState::Created,
            1 => ThreadState::Ready,
            2 => ThreadState::Running,
            3 => ThreadState::Blocked,
            _ => ThreadState::Terminated,
        }
    }
}

/// Thread control block.
pub struct Thread {
    pub tid: u32,
    /// Owning process.
    pub pid: u32,
    pub name: String,
    pub stack_bottom: u64,
    pub stack_top: u64,
    pub stack_size: usize,
    priority: AtomicU8,
    state: AtomicU8,
    /// Stack pointer addressing the thread's saved context while it is not
    /// running.
    saved_state: AtomicU64,
    time_slice_remaining: AtomicU64,
    total_runtime: AtomicU64,
}

impl Thread {
    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn priority(&self) -> u8 {
        self.priority.load(Ordering::Relaxed)
    }

    pub fn set_priority(&self, priority: u8) {
        self.priority.store(priority, Ordering::Relaxed);
    }

    /// Saved stack pointer to resume from.
    pub fn saved_state(&self) -> u64 {
        self.saved_state.load(Ordering::Acquire)
    }

    /// Slot the context switcher stores the outgoing stack pointer into.
    pub fn saved_state_slot(&self) -> *mut u64 {
        self.saved_state.as_ptr()
    }

    pub fn time_slice_remaining(&self) -> u64 {
        self.time_slice_remaining.load(Ordering::Relaxed)
    }

    pub fn reset_time_slice(&self) {
        self.time_slice_remaining
            .store(DEFAULT_TIME_SLICE, Ordering::Relaxed);
    }

    /// Burns one tick of the slice, saturating at zero.
    pub fn consume_tick(&self) {
        self.total_runtime.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .time_slice_remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |slice| {
                slice.checked_sub(1)
            });
    }

    pub fn total_runtime(&self) -> u64 {
        self.total_runtime.load(Ordering::Relaxed)
    }
}

/// Creates a kernel thread for `pid` with a freshly allocated stack,
/// parked on a synthetic resume frame. `None` when the heap cannot back
/// the stack.
pub fn create_kernel_thread(
    pid: u32,
    name: &str,
    entry: extern "C" fn(),
    priority: u8,
) -> Option<Arc<Thread>> {
    let stack = heap::allocate(DEFAULT_STACK_SIZE)?;
    let stack_bottom = stack.as_ptr() as u64;
    let stack_top = stack_bottom + DEFAULT_STACK_SIZE as u64;

    let saved_state = unsafe { build_initial_stack(stack_top, entry) };

    let thread = Arc::new(Thread {
        tid: NEXT_TID.fetch_add(1, Ordering::Relaxed),
        pid,
        name: String::from(name),
        stack_bottom,
        stack_top,
        stack_size: DEFAULT_STACK_SIZE,
        priority: AtomicU8::new(priority),
        state: AtomicU8::new(ThreadState::Created as u8),
        saved_state: AtomicU64::new(saved_state),
        time_slice_remaining: AtomicU64::new(DEFAULT_TIME_SLICE),
        total_runtime: AtomicU64::new(0),
    });

    debug!(
        "Created thread {} ({}) stack {:#x}-{:#x}",
        thread.tid, thread.name, stack_bottom, stack_top
    );

    Some(thread)
}

/// Builds the synthetic resume frame on a fresh stack.
///
/// Top-down: the entry-point pointer (left for the trampoline at
/// `stack_top - 8`), the interrupt-return frame (ss, rsp, rflags with the
/// interrupt flag set, cs, rip = trampoline), then fifteen zeroed
/// register slots. The first switch into the returned stack pointer is
/// indistinguishable from resuming a preempted thread.
unsafe fn build_initial_stack(stack_top: u64, entry: extern "C" fn()) -> u64 {
    let mut sp = stack_top as *mut u64;

    let mut push = |value: u64| {
        sp = sp.sub(1);
        sp.write(value);
    };

    push(entry as usize as u64);
    push(KERNEL_DATA_SELECTOR);
    push(stack_top - 8);
    push(INITIAL_RFLAGS);
    push(KERNEL_CODE_SELECTOR);
    push(thread_trampoline as usize as u64);
    for _ in 0..15 {
        push(0);
    }

    sp as u64
}

/// Terminates the calling thread and hands the CPU away. Never returns;
/// the stack is left to the deferred-reclamation policy.
pub extern "C" fn thread_exit(code: i32) -> ! {
    let current = scheduler::current_thread().expect("thread_exit outside a thread");

    debug!("Thread {} exiting with code {}", current.tid, code);

    current.set_state(ThreadState::Terminated);
    scheduler::remove_thread(&current);
    crate::processes::process::note_thread_exit(current.pid, code);
    drop(current);

    scheduler::yield_now();

    // A terminated thread is never picked again.
    crate::halt_loop()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processes::context::SAVED_CONTEXT_SLOTS;

    extern "C" fn dummy_entry() {}

    #[test_case]
    fn tids_are_unique() {
        let a = create_kernel_thread(1, "a", dummy_entry, 10).unwrap();
        let b = create_kernel_thread(1, "b", dummy_entry, 10).unwrap();
        assert_ne!(a.tid, b.tid);
    }

    #[test_case]
    fn new_thread_starts_created() {
        let thread = create_kernel_thread(1, "t", dummy_entry, 10).unwrap();
        assert_eq!(thread.state(), ThreadState::Created);
        assert_eq!(thread.stack_size, DEFAULT_STACK_SIZE);
        assert_eq!(
            thread.stack_top - thread.stack_bottom,
            DEFAULT_STACK_SIZE as u64
        );
    }

    #[test_case]
    fn initial_frame_layout() {
        let thread = create_kernel_thread(1, "frame", dummy_entry, 10).unwrap();

        // Entry pointer parked for the trampoline at the top slot.
        let top_slot = unsafe { *((thread.stack_top - 8) as *const u64) };
        assert_eq!(top_slot, dummy_entry as usize as u64);

        // Saved pointer sits one full context below the entry slot.
        let expected = thread.stack_top - 8 - (SAVED_CONTEXT_SLOTS as u64) * 8;
        assert_eq!(thread.saved_state(), expected);

        let frame =
            unsafe { &*(thread.saved_state() as *const crate::processes::context::SavedContext) };
        assert_eq!(frame.cs, KERNEL_CODE_SELECTOR);
        assert_eq!(frame.ss, KERNEL_DATA_SELECTOR);
        assert_eq!(frame.rflags, INITIAL_RFLAGS);
        assert_eq!(frame.rsp, thread.stack_top - 8);
        assert_eq!(
            frame.rip,
            crate::processes::context::thread_trampoline as usize as u64
        );
        assert_eq!(frame.rax, 0);
        assert_eq!(frame.r15, 0);
    }

    #[test_case]
    fn time_slice_consumption_saturates() {
        let thread = create_kernel_thread(1, "slice", dummy_entry, 10).unwrap();
        for _ in 0..(DEFAULT_TIME_SLICE + 5) {
            thread.consume_tick();
        }
        assert_eq!(thread.time_slice_remaining(), 0);
        assert_eq!(thread.total_runtime(), DEFAULT_TIME_SLICE + 5);

        thread.reset_time_slice();
        assert_eq!(thread.time_slice_remaining(), DEFAULT_TIME_SLICE);
    }
}
