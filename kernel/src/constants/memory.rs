//! Physical and virtual memory layout constants.

/// Size of a physical frame and a virtual page.
pub const FRAME_SIZE: usize = 4096;
pub const PAGE_SIZE: u64 = 4096;

/// Top of the physical range the frame bitmap covers (4 GiB).
pub const MEMORY_END: u64 = 0x1_0000_0000;

/// End of the BIOS/VGA/ISA hole; nothing below this is ever handed out.
pub const LOW_MEMORY_END: u64 = 0x10_0000;

/// Physical address the kernel image is loaded at.
pub const KERNEL_LOAD_BASE: u64 = 0x10_0000;

/// The boot code below this stays identity mapped.
pub const IDENTITY_MAP_END: u64 = 0x40_0000;

/// Higher-half base the kernel image is mapped at.
pub const KERNEL_VIRTUAL_BASE: u64 = 0xFFFF_FFFF_8000_0000;

/// Size of the kernel heap window mapped past the kernel image.
pub const HEAP_SIZE: usize = 16 * 1024 * 1024;

/// Size of the fixed early allocation arena used before the heap exists.
pub const EARLY_HEAP_SIZE: usize = 1024 * 1024;

/// Bits per frame-bitmap word.
pub const BITMAP_ENTRY_BITS: usize = 64;

/// A bitmap word with every frame marked used.
pub const FULL_BITMAP_ENTRY: u64 = u64::MAX;

/// Heap arena handed to the allocator when running under the test harness.
pub const TEST_HEAP_SIZE: usize = 8 * 1024 * 1024;
