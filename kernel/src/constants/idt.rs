//! Interrupt vector layout and gate attributes.

/// Total number of gate entries in the descriptor table.
pub const IDT_ENTRIES: usize = 256;

/// CPU exceptions occupy vectors 0..32.
pub const EXCEPTION_VECTORS: usize = 32;

/// Hardware IRQs are remapped to start here (IRQ0 = vector 32).
pub const IRQ_BASE: u8 = 32;

/// Number of legacy PIC interrupt lines.
pub const IRQ_COUNT: usize = 16;

/// Vector the periodic timer fires on (IRQ0 after remap).
pub const TIMER_VECTOR: u8 = IRQ_BASE;

/// Vector reserved for system calls from ring 3.
pub const SYSCALL_VECTOR: u8 = 128;

/// 64-bit interrupt gate, present, DPL 0.
pub const INTERRUPT_GATE: u8 = 0x8E;

/// 64-bit trap gate, present, DPL 0.
pub const TRAP_GATE: u8 = 0x8F;

/// Trap gate reachable from ring 3 (present, DPL 3).
pub const USER_INTERRUPT_GATE: u8 = 0xEE;
