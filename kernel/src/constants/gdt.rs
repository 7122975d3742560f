//! Segment selector values baked into gate entries and thread frames.
//!
//! The descriptor table is laid out null, kernel code, kernel data, user
//! code, user data, so the kernel selectors are fixed at link time.

/// Kernel code segment selector (GDT entry 1, ring 0).
pub const KERNEL_CODE_SELECTOR: u64 = 0x08;

/// Kernel data segment selector (GDT entry 2, ring 0).
pub const KERNEL_DATA_SELECTOR: u64 = 0x10;
