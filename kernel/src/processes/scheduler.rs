//! Preemptive round-robin scheduler.
//!
//! A bounded ring of ready threads, a current-thread slot and an idle
//! thread that runs whenever the ring is empty. Preemption rides the
//! timer interrupt; cooperative hand-over goes through [`yield_now`].
//! Every multi-step queue edit runs with interrupts disabled.

use crate::constants::processes::{IDLE_PRIORITY, MAX_READY_THREADS};
use crate::interrupts::without_interrupts;
use crate::processes::context::context_switch;
use crate::processes::process;
use crate::processes::thread::{Thread, ThreadState};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use log::{debug, info, warn};
use spin::{Mutex, Once};
use x86_64::instructions::hlt;

/// Bounded FIFO ring over ready-thread handles.
pub struct ReadyQueue {
    slots: [Option<Arc<Thread>>; MAX_READY_THREADS],
    head: usize,
    tail: usize,
    len: usize,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        ReadyQueue {
            slots: [const { None }; MAX_READY_THREADS],
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    /// Appends at the tail. `false` when the ring is full.
    pub fn enqueue(&mut self, thread: Arc<Thread>) -> bool {
        if self.len >= MAX_READY_THREADS {
            return false;
        }
        self.slots[self.tail] = Some(thread);
        self.tail = (self.tail + 1) % MAX_READY_THREADS;
        self.len += 1;
        true
    }

    pub fn dequeue_front(&mut self) -> Option<Arc<Thread>> {
        if self.len == 0 {
            return None;
        }
        let thread = self.slots[self.head].take();
        self.head = (self.head + 1) % MAX_READY_THREADS;
        self.len -= 1;
        thread
    }

    /// Removes `tid` wherever it sits, compacting the ring.
    pub fn remove(&mut self, tid: u32) -> bool {
        for offset in 0..self.len {
            let index = (self.head + offset) % MAX_READY_THREADS;
            let matches = self.slots[index]
                .as_ref()
                .is_some_and(|thread| thread.tid == tid);
            if !matches {
                continue;
            }

            // Shift the remainder down one slot.
            for shift in offset..self.len - 1 {
                let current = (self.head + shift) % MAX_READY_THREADS;
                let next = (self.head + shift + 1) % MAX_READY_THREADS;
                self.slots[current] = self.slots[next].take();
            }
            self.len -= 1;
            self.tail = (self.head + self.len) % MAX_READY_THREADS;
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

static READY_QUEUE: Mutex<ReadyQueue> = Mutex::new(ReadyQueue::new());
static CURRENT: Mutex<Option<Arc<Thread>>> = Mutex::new(None);
static IDLE: Once<Arc<Thread>> = Once::new();
static SCHEDULING_ENABLED: AtomicBool = AtomicBool::new(false);

static CONTEXT_SWITCHES: AtomicU64 = AtomicU64::new(0);
static IDLE_TICKS: AtomicU64 = AtomicU64::new(0);

extern "C" fn idle_thread_entry() {
    loop {
        hlt();
    }
}

pub fn init() {
    without_interrupts(|| {
        *READY_QUEUE.lock() = ReadyQueue::new();
    });
    CONTEXT_SWITCHES.store(0, Ordering::Relaxed);
    IDLE_TICKS.store(0, Ordering::Relaxed);
    info!("Scheduler initialized");
}

/// Creates the idle thread, adopts the boot context as it, and turns
/// scheduling on.
///
/// The idle TCB carries a synthetic frame like any other thread, but the
/// first switch away overwrites its saved state with the live boot
/// context, so the caller's halt loop is what actually runs when the
/// ready queue drains.
pub fn start() {
    let idle = process::create_kernel_process_with_priority(
        "idle",
        idle_thread_entry,
        IDLE_PRIORITY,
    )
    .expect("Failed to create idle thread");

    idle.set_state(ThreadState::Running);

    without_interrupts(|| {
        *CURRENT.lock() = Some(Arc::clone(&idle));
    });
    IDLE.call_once(|| idle);
    SCHEDULING_ENABLED.store(true, Ordering::Release);

    info!("Scheduler started with idle thread");
}

pub fn is_enabled() -> bool {
    SCHEDULING_ENABLED.load(Ordering::Acquire)
}

/// Marks `thread` ready and appends it to the ready queue. A full queue
/// drops the enqueue with a warning.
pub fn add_thread(thread: &Arc<Thread>) {
    without_interrupts(|| {
        thread.set_state(ThreadState::Ready);
        if !READY_QUEUE.lock().enqueue(Arc::clone(thread)) {
            warn!("Ready queue full, dropping thread {}", thread.tid);
        }
    });
}

/// Removes `thread` from the ready queue if it is waiting there.
pub fn remove_thread(thread: &Arc<Thread>) {
    without_interrupts(|| {
        READY_QUEUE.lock().remove(thread.tid);
    });
}

pub fn current_thread() -> Option<Arc<Thread>> {
    without_interrupts(|| CURRENT.lock().clone())
}

/// Charges the running thread for one timer tick.
pub fn note_tick() {
    if let Some(current) = current_thread() {
        current.consume_tick();
    }
}

/// Picks the next thread and switches to it. Invoked from the timer
/// interrupt after the EOI, and from [`yield_now`].
pub fn schedule() {
    if !is_enabled() {
        return;
    }

    without_interrupts(|| {
        let Some(idle) = IDLE.get() else {
            return;
        };

        let next = READY_QUEUE
            .lock()
            .dequeue_front()
            .unwrap_or_else(|| Arc::clone(idle));

        let Some(current) = CURRENT.lock().clone() else {
            return;
        };

        if Arc::ptr_eq(&next, &current) {
            return;
        }

        // The outgoing thread goes back on the queue only while it is
        // still runnable; blocked, terminated and idle contexts must not
        // be re-queued.
        if current.state() == ThreadState::Running && !Arc::ptr_eq(&current, idle) {
            current.set_state(ThreadState::Ready);
            if !READY_QUEUE.lock().enqueue(Arc::clone(&current)) {
                warn!("Ready queue full, dropping thread {}", current.tid);
            }
        }

        next.set_state(ThreadState::Running);
        next.reset_time_slice();
        *CURRENT.lock() = Some(Arc::clone(&next));

        CONTEXT_SWITCHES.fetch_add(1, Ordering::Relaxed);
        if Arc::ptr_eq(&next, idle) {
            IDLE_TICKS.fetch_add(1, Ordering::Relaxed);
        }

        let old_slot = current.saved_state_slot();
        let new_sp = next.saved_state();
        drop(next);

        unsafe {
            context_switch(old_slot, new_sp);
        }
    });
}

/// Voluntarily hands the CPU to the next ready thread. Legal from any
/// kernel thread; a no-op when nothing else is runnable.
pub fn yield_now() {
    schedule();
}

/// Blocks the calling thread until someone calls [`unblock`] on it.
pub fn block_current() {
    let Some(current) = current_thread() else {
        return;
    };

    debug!("Blocking thread {}", current.tid);
    without_interrupts(|| {
        READY_QUEUE.lock().remove(current.tid);
        current.set_state(ThreadState::Blocked);
    });
    drop(current);

    yield_now();
}

/// Makes a blocked thread runnable again.
pub fn unblock(thread: &Arc<Thread>) {
    debug!("Unblocking thread {}", thread.tid);
    add_thread(thread);
}

pub fn context_switches() -> u64 {
    CONTEXT_SWITCHES.load(Ordering::Relaxed)
}

pub fn idle_ticks() -> u64 {
    IDLE_TICKS.load(Ordering::Relaxed)
}

pub fn ready_count() -> usize {
    without_interrupts(|| READY_QUEUE.lock().len())
}

pub fn log_stats() {
    info!(
        "Scheduler: {} context switches, {} idle ticks, {} ready",
        context_switches(),
        idle_ticks(),
        ready_count()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processes::thread::create_kernel_thread;
    use alloc::vec::Vec;

    extern "C" fn dummy_entry() {}

    fn test_thread(name: &str) -> Arc<Thread> {
        create_kernel_thread(1, name, dummy_entry, 10).unwrap()
    }

    #[test_case]
    fn queue_is_fifo() {
        let mut queue = ReadyQueue::new();
        let a = test_thread("a");
        let b = test_thread("b");
        let c = test_thread("c");

        assert!(queue.enqueue(Arc::clone(&a)));
        assert!(queue.enqueue(Arc::clone(&b)));
        assert!(queue.enqueue(Arc::clone(&c)));
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.dequeue_front().unwrap().tid, a.tid);
        assert_eq!(queue.dequeue_front().unwrap().tid, b.tid);
        assert_eq!(queue.dequeue_front().unwrap().tid, c.tid);
        assert!(queue.dequeue_front().is_none());
    }

    #[test_case]
    fn queue_wraps_around() {
        let mut queue = ReadyQueue::new();
        let threads: Vec<_> = (0..8).map(|i| {
            test_thread(if i % 2 == 0 { "even" } else { "odd" })
        }).collect();

        // Drive head/tail most of the way around the ring.
        for round in 0..(MAX_READY_THREADS - 2) {
            let thread = &threads[round % threads.len()];
            assert!(queue.enqueue(Arc::clone(thread)));
            assert_eq!(queue.dequeue_front().unwrap().tid, thread.tid);
        }
        assert!(queue.is_empty());

        for thread in &threads {
            assert!(queue.enqueue(Arc::clone(thread)));
        }
        for thread in &threads {
            assert_eq!(queue.dequeue_front().unwrap().tid, thread.tid);
        }
    }

    #[test_case]
    fn full_queue_rejects() {
        let mut queue = ReadyQueue::new();
        let filler = test_thread("filler");

        for _ in 0..MAX_READY_THREADS {
            assert!(queue.enqueue(Arc::clone(&filler)));
        }
        assert!(!queue.enqueue(Arc::clone(&filler)));
        assert_eq!(queue.len(), MAX_READY_THREADS);
    }

    #[test_case]
    fn remove_compacts_the_ring() {
        let mut queue = ReadyQueue::new();
        let a = test_thread("a");
        let b = test_thread("b");
        let c = test_thread("c");

        queue.enqueue(Arc::clone(&a));
        queue.enqueue(Arc::clone(&b));
        queue.enqueue(Arc::clone(&c));

        assert!(queue.remove(b.tid));
        assert!(!queue.remove(b.tid));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.dequeue_front().unwrap().tid, a.tid);
        assert_eq!(queue.dequeue_front().unwrap().tid, c.tid);
    }

    #[test_case]
    fn add_thread_marks_ready() {
        let thread = test_thread("ready");
        add_thread(&thread);
        assert_eq!(thread.state(), ThreadState::Ready);
        remove_thread(&thread);
    }
}
