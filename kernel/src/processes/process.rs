//! Process control blocks.
//!
//! Processes own their threads; everything else refers to threads through
//! `Arc` handles and to processes by pid. A `None` page-table root means
//! the process shares the kernel address space.

use crate::constants::processes::DEFAULT_PRIORITY;
use crate::processes::thread::{self, Thread};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use lazy_static::lazy_static;
use log::{debug, info, warn};
use spin::Mutex;
use x86_64::PhysAddr;

static NEXT_PID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Created,
    Ready,
    Running,
    Blocked,
    Zombie,
    Terminated,
}

/// Process control block.
pub struct Process {
    pub pid: u32,
    pub state: ProcessState,
    /// Root of a private address space; `None` shares the kernel's.
    pub page_table_root: Option<PhysAddr>,
    /// Threads owned by this process.
    pub threads: Vec<Arc<Thread>>,
    /// Parent pid, kept for lookup only.
    pub parent: Option<u32>,
    pub children: Vec<u32>,
    pub exit_code: i32,
    pub name: String,
}

lazy_static! {
    pub static ref PROCESS_TABLE: Mutex<BTreeMap<u32, Process>> = Mutex::new(BTreeMap::new());
}

pub fn init() {
    info!("Process manager initialized");
}

/// Creates a kernel process with a single main thread parked at `entry`.
/// Returns the main thread handle, or `None` when the stack allocation
/// fails.
pub fn create_kernel_process(name: &str, entry: extern "C" fn()) -> Option<Arc<Thread>> {
    create_kernel_process_with_priority(name, entry, DEFAULT_PRIORITY)
}

pub fn create_kernel_process_with_priority(
    name: &str,
    entry: extern "C" fn(),
    priority: u8,
) -> Option<Arc<Thread>> {
    let pid = NEXT_PID.fetch_add(1, Ordering::Relaxed);

    let Some(main_thread) = thread::create_kernel_thread(pid, name, entry, priority) else {
        warn!("Failed to allocate a stack for process {}", name);
        return None;
    };

    let mut threads = Vec::new();
    threads.push(Arc::clone(&main_thread));

    let process = Process {
        pid,
        state: ProcessState::Created,
        page_table_root: None,
        threads,
        parent: None,
        children: Vec::new(),
        exit_code: 0,
        name: String::from(name),
    };

    PROCESS_TABLE.lock().insert(pid, process);
    debug!("Created process {} ({})", pid, name);

    Some(main_thread)
}

/// Adds another thread to an existing process.
pub fn create_thread(pid: u32, name: &str, entry: extern "C" fn()) -> Option<Arc<Thread>> {
    let new_thread = thread::create_kernel_thread(pid, name, entry, DEFAULT_PRIORITY)?;

    let mut table = PROCESS_TABLE.lock();
    let process = table.get_mut(&pid)?;
    process.threads.push(Arc::clone(&new_thread));

    Some(new_thread)
}

/// Records a parent/child relationship between two live processes.
pub fn adopt_child(parent_pid: u32, child_pid: u32) {
    let mut table = PROCESS_TABLE.lock();
    if !table.contains_key(&parent_pid) || !table.contains_key(&child_pid) {
        return;
    }
    if let Some(child) = table.get_mut(&child_pid) {
        child.parent = Some(parent_pid);
    }
    if let Some(parent) = table.get_mut(&parent_pid) {
        parent.children.push(child_pid);
    }
}

/// Marks `pid` terminated once its last thread has exited, keeping the
/// exit code of the first thread to report one.
pub fn note_thread_exit(pid: u32, exit_code: i32) {
    let mut table = PROCESS_TABLE.lock();
    let Some(process) = table.get_mut(&pid) else {
        return;
    };

    if process.state != ProcessState::Zombie && process.state != ProcessState::Terminated {
        process.exit_code = exit_code;
    }

    let all_done = process
        .threads
        .iter()
        .all(|t| t.state() == thread::ThreadState::Terminated);
    process.state = if all_done {
        ProcessState::Terminated
    } else {
        ProcessState::Zombie
    };
}

pub fn with_process<R>(pid: u32, f: impl FnOnce(&Process) -> R) -> Option<R> {
    PROCESS_TABLE.lock().get(&pid).map(f)
}

pub fn log_process_table() {
    let table = PROCESS_TABLE.lock();
    info!("Process table ({} entries):", table.len());
    for (pid, process) in table.iter() {
        info!(
            "  pid {} ({}): {:?}, {} thread(s)",
            pid,
            process.name,
            process.state,
            process.threads.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processes::thread::ThreadState;

    extern "C" fn dummy_entry() {}

    #[test_case]
    fn process_owns_its_main_thread() {
        let main = create_kernel_process("owner", dummy_entry).unwrap();

        with_process(main.pid, |process| {
            assert_eq!(process.name, "owner");
            assert_eq!(process.threads.len(), 1);
            assert_eq!(process.threads[0].tid, main.tid);
            assert_eq!(process.state, ProcessState::Created);
        })
        .unwrap();
    }

    #[test_case]
    fn extra_threads_join_the_owner() {
        let main = create_kernel_process("multi", dummy_entry).unwrap();
        let worker = create_thread(main.pid, "multi-worker", dummy_entry).unwrap();

        assert_eq!(worker.pid, main.pid);
        with_process(main.pid, |process| {
            assert_eq!(process.threads.len(), 2);
        })
        .unwrap();
    }

    #[test_case]
    fn children_are_linked_both_ways() {
        let parent = create_kernel_process("parent", dummy_entry).unwrap();
        let child = create_kernel_process("child", dummy_entry).unwrap();
        adopt_child(parent.pid, child.pid);

        with_process(parent.pid, |p| assert!(p.children.contains(&child.pid))).unwrap();
        with_process(child.pid, |c| assert_eq!(c.parent, Some(parent.pid))).unwrap();
    }

    #[test_case]
    fn last_thread_exit_terminates_the_process() {
        let main = create_kernel_process("exiting", dummy_entry).unwrap();

        main.set_state(ThreadState::Terminated);
        note_thread_exit(main.pid, 7);

        with_process(main.pid, |process| {
            assert_eq!(process.state, ProcessState::Terminated);
            assert_eq!(process.exit_code, 7);
        })
        .unwrap();
    }
}
