//! Programmable interval timer.
//!
//! Channel 0 runs as a rate generator and drives the scheduler: the IRQ0
//! handler advances the tick counter, acknowledges the PIC and then runs
//! the scheduling tick. The tick counter is written only from IRQ0;
//! aligned 64-bit reads make it safe to read from anywhere.

use crate::constants::idt::TIMER_VECTOR;
use crate::constants::ports::{PIT_BASE_FREQUENCY, PIT_CHANNEL0, PIT_COMMAND};
use crate::interrupts::{idt, pic};
use crate::processes::scheduler;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use log::{info, trace};
use x86_64::instructions::{hlt, port::Port};

static TICKS: AtomicU64 = AtomicU64::new(0);
static FREQUENCY: AtomicU32 = AtomicU32::new(0);

/// PIT command: channel 0, lobyte/hibyte access, rate generator.
const PIT_RATE_GENERATOR: u8 = 0x36;

/// Divisor programmed into channel 0 for `frequency` Hz.
pub fn divisor_for(frequency: u32) -> u16 {
    (PIT_BASE_FREQUENCY / frequency) as u16
}

/// Ticks the counter must advance to cover `ms` milliseconds, rounded up.
pub fn ticks_for_ms(ms: u64, frequency: u64) -> u64 {
    (ms * frequency).div_ceil(1000)
}

/// Programs channel 0 for `frequency` Hz, hooks IRQ0 and unmasks it.
pub fn init(frequency: u32) {
    FREQUENCY.store(frequency, Ordering::Release);

    let divisor = divisor_for(frequency);
    unsafe {
        Port::<u8>::new(PIT_COMMAND).write(PIT_RATE_GENERATOR);
        let mut data = Port::<u8>::new(PIT_CHANNEL0);
        data.write(divisor as u8);
        data.write((divisor >> 8) as u8);
    }

    idt::register_handler(TIMER_VECTOR, timer_interrupt_handler);
    pic::unmask_irq(0);

    info!("Timer initialized at {} Hz (divisor {})", frequency, divisor);
}

fn timer_interrupt_handler(_frame: &mut idt::InterruptFrame) {
    let ticks = TICKS.fetch_add(1, Ordering::Relaxed) + 1;

    let frequency = FREQUENCY.load(Ordering::Relaxed) as u64;
    if frequency != 0 && ticks % frequency == 0 {
        trace!("Uptime: {} seconds ({} ticks)", ticks / frequency, ticks);
    }

    scheduler::note_tick();
    pic::end_of_interrupt(0);
    scheduler::schedule();
}

/// Monotonic tick count since the timer started.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

pub fn uptime_seconds() -> u64 {
    let frequency = FREQUENCY.load(Ordering::Relaxed) as u64;
    if frequency == 0 {
        return 0;
    }
    ticks() / frequency
}

/// Busy-halts until the tick counter has advanced far enough to cover
/// `ms` milliseconds.
pub fn sleep_ms(ms: u64) {
    let frequency = FREQUENCY.load(Ordering::Relaxed) as u64;
    if frequency == 0 {
        return;
    }
    let target = ticks() + ticks_for_ms(ms, frequency);
    while ticks() < target {
        hlt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn divisor_matches_base_clock() {
        assert_eq!(divisor_for(100), 11931);
        assert_eq!(divisor_for(1000), 1193);
        // 18.2 Hz is the slowest the 16-bit divisor can express.
        assert_eq!(divisor_for(19), 62799);
    }

    #[test_case]
    fn sleep_tick_conversion_rounds_up() {
        assert_eq!(ticks_for_ms(0, 100), 0);
        assert_eq!(ticks_for_ms(1, 100), 1);
        assert_eq!(ticks_for_ms(10, 100), 1);
        assert_eq!(ticks_for_ms(15, 100), 2);
        assert_eq!(ticks_for_ms(1000, 100), 100);
    }
}
