//! 8259 programmable interrupt controller.
//!
//! The two chained PICs come out of reset mapping IRQs over the CPU
//! exception vectors, so they are remapped to 32/40 before interrupts are
//! enabled. The initialization sequence preserves whatever masks the
//! firmware left; lines are then unmasked individually as drivers claim
//! them.

use log::info;
use pic8259::ChainedPics;
use spin::Mutex;

/// Master PIC handles IRQs 0-7 on vectors 32-39.
pub const PIC_1_OFFSET: u8 = 32;

/// Slave PIC handles IRQs 8-15 on vectors 40-47.
pub const PIC_2_OFFSET: u8 = 40;

pub static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

/// Remaps both chips; existing interrupt masks survive the sequence.
pub fn init() {
    unsafe {
        PICS.lock().initialize();
    }
    info!(
        "PIC remapped: IRQ 0-7 -> INT {}-{}, IRQ 8-15 -> INT {}-{}",
        PIC_1_OFFSET,
        PIC_1_OFFSET + 7,
        PIC_2_OFFSET,
        PIC_2_OFFSET + 7
    );
}

/// Acknowledges `irq`. Lines on the slave chip acknowledge both chips.
pub fn end_of_interrupt(irq: u8) {
    unsafe {
        PICS.lock().notify_end_of_interrupt(PIC_1_OFFSET + irq);
    }
}

/// Allows `irq` to be delivered.
pub fn unmask_irq(irq: u8) {
    // The EOI path locks PICS from interrupt context; never hold the lock
    // with interrupts open.
    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut pics = PICS.lock();
        unsafe {
            let [master, slave] = pics.read_masks();
            if irq < 8 {
                pics.write_masks(master & !(1 << irq), slave);
            } else {
                pics.write_masks(master, slave & !(1 << (irq - 8)));
            }
        }
    });
}

/// Suppresses delivery of `irq`.
pub fn mask_irq(irq: u8) {
    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut pics = PICS.lock();
        unsafe {
            let [master, slave] = pics.read_masks();
            if irq < 8 {
                pics.write_masks(master | (1 << irq), slave);
            } else {
                pics.write_masks(master, slave | (1 << (irq - 8)));
            }
        }
    });
}

/// Masks every line on both chips.
pub fn disable_all() {
    x86_64::instructions::interrupts::without_interrupts(|| unsafe {
        PICS.lock().write_masks(0xFF, 0xFF);
    });
}
