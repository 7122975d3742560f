//! Kernel logging facility
//!
//! Provides thread-safe logging functionality for the kernel using the `log` crate.
//! Log levels are configured based on build configuration (debug/release).

use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

/// Global logger instance available throughout the kernel
pub static LOGGER: Logger = Logger::new();

/// Thread-safe logger implementation
pub struct Logger {
    inner: Mutex<()>,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger {
    /// Creates a new logger instance
    pub const fn new() -> Logger {
        Logger {
            inner: Mutex::new(()),
        }
    }
}

impl Log for Logger {
    /// Determines if a log message should be processed based on its level
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    /// Formats messages as "[LEVEL] message" and writes them to the serial
    /// sink
    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            x86_64::instructions::interrupts::without_interrupts(|| {
                let _guard = self.inner.lock();
                crate::serial_println!("[{}] {}", record.level(), record.args());
            });
        }
    }

    /// Flush buffered logs (no-op in this implementation)
    fn flush(&self) {}
}

/// Initializes the logging system
///
/// Sets different log levels for debug/release builds:
/// - Debug builds: LevelFilter::Debug
/// - Release builds: LevelFilter::Info
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| {
            log::set_max_level(
                #[cfg(debug_assertions)]
                LevelFilter::Debug,
                #[cfg(not(debug_assertions))]
                LevelFilter::Info,
            )
        })
        .expect("Logger initialization failed");
}
