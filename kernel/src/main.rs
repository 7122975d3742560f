#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(minos::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::boxed::Box;
use log::{info, warn};
use minos::boot::multiboot2::{BootInfo, MULTIBOOT2_BOOTLOADER_MAGIC};
use minos::constants::memory::KERNEL_VIRTUAL_BASE;
use minos::devices::{ata, timer};
use minos::filesys::fat32::Fat32;
use minos::interrupts::{gdt, idt, pic};
use minos::memory::{frame_allocator::FrameAllocator, heap, paging};
use minos::processes::{process, scheduler};
use minos::serial_println;

/// Timer frequency driving preemption.
const TIMER_FREQUENCY_HZ: u32 = 100;

#[no_mangle]
pub extern "C" fn kernel_main(magic: u32, boot_info_ptr: *const u8) -> ! {
    #[cfg(test)]
    {
        test_main();
        minos::idle_loop();
    }

    serial_println!("=================================");
    serial_println!("   minos v0.1.0");
    serial_println!("=================================");

    minos::logging::init();

    if magic != MULTIBOOT2_BOOTLOADER_MAGIC {
        panic!(
            "Invalid Multiboot2 magic: expected {:#x}, got {:#x}",
            MULTIBOOT2_BOOTLOADER_MAGIC, magic
        );
    }
    info!("Multiboot2 magic verified, boot info at {:#x}", boot_info_ptr as usize);

    gdt::init();

    let boot_info = unsafe { BootInfo::parse(boot_info_ptr) };
    boot_info.log_memory_map();
    info!(
        "Total memory: {} MiB, available: {} MiB",
        boot_info.total_memory() / (1024 * 1024),
        boot_info.available_memory() / (1024 * 1024)
    );

    unsafe {
        FrameAllocator::init(&boot_info);
    }

    let (heap_start, heap_size) = unsafe { paging::init() };
    unsafe {
        heap::init_heap(heap_start, heap_size);
    }
    heap::log_stats();

    idt::init();
    pic::init();
    timer::init(TIMER_FREQUENCY_HZ);
    idt::enable();
    info!("Interrupts enabled");

    init_storage();

    process::init();
    scheduler::init();
    scheduler::start();

    spawn_demo_threads();

    info!("Boot complete, kernel mapped at {:#x}", KERNEL_VIRTUAL_BASE);

    // This loop is the idle thread's body; the scheduler adopted this
    // context when it started.
    let mut last_report = 0;
    loop {
        x86_64::instructions::hlt();

        let uptime = timer::uptime_seconds();
        if uptime > 0 && uptime != last_report && uptime % 5 == 0 {
            last_report = uptime;
            info!(
                "Uptime: {} seconds ({} ticks), {} context switches",
                uptime,
                timer::ticks(),
                scheduler::context_switches()
            );
        }
    }
}

/// Probes the ATA buses and mounts the first disk as FAT32, logging the
/// root directory. Storage is optional; a missing or foreign disk only
/// costs a warning.
fn init_storage() {
    let mut devices = ata::detect_devices();
    if devices.is_empty() {
        warn!("No ATA devices found, skipping filesystem mount");
        return;
    }

    let disk = devices.remove(0);
    match Fat32::mount(Box::new(disk)) {
        Ok(mut fs) => {
            info!(
                "FAT32: {} MiB total, {} MiB free",
                fs.total_space() / (1024 * 1024),
                fs.free_space() / (1024 * 1024)
            );
            match fs.read_dir() {
                Ok(entries) => {
                    info!("Root directory ({} entries):", entries.len());
                    for entry in entries {
                        info!(
                            "  {} {} ({} bytes)",
                            if entry.metadata.is_dir { "<DIR>" } else { "     " },
                            entry.name,
                            entry.metadata.size
                        );
                    }
                }
                Err(err) => warn!("Failed to read root directory: {:?}", err),
            }
        }
        Err(err) => warn!("FAT32 mount failed: {:?}", err),
    }
}

extern "C" fn counter_thread_entry() {
    let name = scheduler::current_thread()
        .map(|thread| thread.name.clone())
        .unwrap_or_default();

    for i in 0..10 {
        serial_println!("[{}] count {}", name, i);
        scheduler::yield_now();
    }
}

fn spawn_demo_threads() {
    for name in ["worker-1", "worker-2", "worker-3"] {
        match process::create_kernel_process(name, counter_thread_entry) {
            Some(thread) => scheduler::add_thread(&thread),
            None => warn!("Failed to spawn {}", name),
        }
    }
    info!("Demo threads enqueued, {} ready", scheduler::ready_count());
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    minos::interrupts::disable();
    serial_println!("\n\n*** KERNEL PANIC ***");
    serial_println!("{}", info);
    minos::halt_loop()
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    minos::test_panic_handler(info)
}
