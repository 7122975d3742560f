//! Thread and scheduler parameters.

/// Kernel stack handed to every new thread.
pub const DEFAULT_STACK_SIZE: usize = 16 * 1024;

/// Priority assigned to ordinary kernel threads.
pub const DEFAULT_PRIORITY: u8 = 10;

/// The idle thread always sits below every runnable thread.
pub const IDLE_PRIORITY: u8 = 0;

/// Time slice granted on dispatch, in timer ticks.
pub const DEFAULT_TIME_SLICE: u64 = 10;

/// Capacity of the ready-queue ring.
pub const MAX_READY_THREADS: usize = 256;

/// RFLAGS for a freshly created thread: IF set plus the always-one bit.
pub const INITIAL_RFLAGS: u64 = 0x202;
