//! I/O port definitions.

/// Base I/O port address for the first serial port (COM1).
pub const SERIAL_PORT: u16 = 0x3F8;

/// PIT channel 0 data port.
pub const PIT_CHANNEL0: u16 = 0x40;

/// PIT mode/command port.
pub const PIT_COMMAND: u16 = 0x43;

/// PIT input clock in Hz.
pub const PIT_BASE_FREQUENCY: u32 = 1_193_182;

/// Primary ATA bus I/O and control bases.
pub const ATA_PRIMARY_IO: u16 = 0x1F0;
pub const ATA_PRIMARY_CTRL: u16 = 0x3F6;

/// Secondary ATA bus I/O and control bases.
pub const ATA_SECONDARY_IO: u16 = 0x170;
pub const ATA_SECONDARY_CTRL: u16 = 0x376;

/// QEMU isa-debug-exit device, used by the test harness.
pub const QEMU_EXIT_PORT: u16 = 0xF4;
