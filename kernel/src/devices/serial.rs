//! COM1 transmit path.
//!
//! Every piece of kernel text funnels through here: the log facade, the
//! panic handler and the test harness all print over the serial line.
//! The port is brought up on first use, and a write holds the port lock
//! with interrupts masked, the same discipline `logging` applies to its
//! own guard, so the timer handler can never spin on a lock a preempted
//! writer still owns.

use crate::constants::ports::SERIAL_PORT;
use core::fmt::{self, Write};
use spin::{Mutex, Once};
use uart_16550::SerialPort;
use x86_64::instructions::interrupts;

static COM1: Once<Mutex<SerialPort>> = Once::new();

fn com1() -> &'static Mutex<SerialPort> {
    COM1.call_once(|| {
        let mut port = unsafe { SerialPort::new(SERIAL_PORT) };
        port.init();
        Mutex::new(port)
    })
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    // Write errors are swallowed: this path runs inside the panic
    // handler, where a second panic would recurse.
    interrupts::without_interrupts(|| {
        let _ = com1().lock().write_fmt(args);
    });
}

/// Prints to the serial console.
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*))
    };
}

/// Prints to the serial console, with a trailing newline.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($fmt:expr) => ($crate::serial_print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::serial_print!(concat!($fmt, "\n"), $($arg)*));
}
