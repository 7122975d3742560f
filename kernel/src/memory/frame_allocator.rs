//! Bitmap frame allocator
//!
//! Tracks ownership of every 4 KiB physical frame with one bit per frame
//! (set = used). The bitmap is seeded from the boot memory map and lives in
//! raw memory immediately past the kernel image, so it is usable before the
//! heap exists.

#[cfg(not(test))]
use crate::boot::multiboot2::BootInfo;
#[cfg(not(test))]
use crate::constants::memory::MEMORY_END;
use crate::{
    boot::multiboot2::{MemoryRegion, MemoryRegionKind},
    constants::memory::{
        BITMAP_ENTRY_BITS, FRAME_SIZE, FULL_BITMAP_ENTRY, KERNEL_LOAD_BASE, LOW_MEMORY_END,
    },
    memory::{align_down, align_up},
};
use log::{info, warn};
use spin::Mutex;
use x86_64::PhysAddr;

/// Global frame allocator, installed once during boot.
pub static FRAME_ALLOCATOR: Mutex<Option<FrameAllocator>> = Mutex::new(None);

pub struct FrameAllocator {
    // One bit per frame, set = used
    bitmap: &'static mut [u64],
    // Frames covered by the bitmap
    total_frames: usize,
    // Frames currently marked used
    used_frames: usize,
}

impl FrameAllocator {
    /// Builds the allocator over the bitmap storage placed right behind the
    /// kernel image and installs it globally.
    ///
    /// # Safety
    /// Must be called once, before the heap exists, with the boot memory
    /// map still mapped. The memory past `kernel_physical_end` must be
    /// writable and unused.
    #[cfg(not(test))]
    pub unsafe fn init(boot_info: &BootInfo) {
        extern "C" {
            static kernel_physical_end: u8;
        }

        let kernel_end = &kernel_physical_end as *const u8 as u64;
        let total_frames = (MEMORY_END as usize) / FRAME_SIZE;
        let bitmap_words = total_frames.div_ceil(BITMAP_ENTRY_BITS);
        let bitmap_bytes = bitmap_words * core::mem::size_of::<u64>();

        info!("Kernel image ends at {:#x}", kernel_end);
        info!("Frame bitmap at {:#x}, {} bytes", kernel_end, bitmap_bytes);

        let storage = core::slice::from_raw_parts_mut(kernel_end as *mut u64, bitmap_words);
        let reserved_end = kernel_end + bitmap_bytes as u64;

        let allocator = Self::with_storage(storage, boot_info.memory_map(), reserved_end);
        allocator.log_stats();

        *FRAME_ALLOCATOR.lock() = Some(allocator);
    }

    /// Core construction over caller-provided bitmap storage.
    ///
    /// All frames start used; AVAILABLE regions are cleared (start rounded
    /// up, end rounded down to a frame boundary); then the first MiB and
    /// everything from the kernel load base up to `reserved_end` (the end
    /// of the bitmap's own storage) are re-reserved.
    pub fn with_storage(
        storage: &'static mut [u64],
        regions: Option<impl Iterator<Item = MemoryRegion>>,
        reserved_end: u64,
    ) -> Self {
        let total_frames = storage.len() * BITMAP_ENTRY_BITS;
        storage.fill(FULL_BITMAP_ENTRY);

        let mut allocator = FrameAllocator {
            bitmap: storage,
            total_frames,
            used_frames: total_frames,
        };

        if let Some(regions) = regions {
            for region in regions {
                if region.kind != MemoryRegionKind::Available {
                    continue;
                }
                let start = align_up(region.start, FRAME_SIZE as u64);
                let end = align_down(region.end(), FRAME_SIZE as u64);
                let mut addr = start;
                while addr < end {
                    let frame = (addr / FRAME_SIZE as u64) as usize;
                    if frame < allocator.total_frames && allocator.test_frame(frame) {
                        allocator.clear_frame(frame);
                        allocator.used_frames -= 1;
                    }
                    addr += FRAME_SIZE as u64;
                }
            }
        }

        // BIOS, VGA and the ISA hole below 1 MiB stay reserved.
        for frame in 0..(LOW_MEMORY_END as usize / FRAME_SIZE) {
            if frame < allocator.total_frames && !allocator.test_frame(frame) {
                allocator.set_frame(frame);
                allocator.used_frames += 1;
            }
        }

        // Kernel image plus the bitmap's own storage.
        let mut addr = KERNEL_LOAD_BASE;
        while addr < reserved_end {
            let frame = (addr / FRAME_SIZE as u64) as usize;
            if frame < allocator.total_frames && !allocator.test_frame(frame) {
                allocator.set_frame(frame);
                allocator.used_frames += 1;
            }
            addr += FRAME_SIZE as u64;
        }

        allocator
    }

    /// Finds and claims a single free frame.
    ///
    /// Scans whole bitmap words, skipping those with every frame used, and
    /// takes the lowest clear bit of the first word with room.
    pub fn allocate_frame(&mut self) -> Option<PhysAddr> {
        for (word_index, word) in self.bitmap.iter_mut().enumerate() {
            if *word == FULL_BITMAP_ENTRY {
                continue;
            }
            let bit = (!*word).trailing_zeros() as usize;
            *word |= 1 << bit;
            self.used_frames += 1;
            let frame = word_index * BITMAP_ENTRY_BITS + bit;
            return Some(PhysAddr::new((frame * FRAME_SIZE) as u64));
        }
        None
    }

    /// Finds and claims `count` physically contiguous frames, returning the
    /// address of the first.
    pub fn allocate_frames(&mut self, count: usize) -> Option<PhysAddr> {
        if count == 0 {
            return None;
        }

        let mut run = 0;
        let mut run_start = 0;
        for frame in 0..self.total_frames {
            if self.test_frame(frame) {
                run = 0;
                continue;
            }
            if run == 0 {
                run_start = frame;
            }
            run += 1;
            if run == count {
                for claimed in run_start..run_start + count {
                    self.set_frame(claimed);
                }
                self.used_frames += count;
                return Some(PhysAddr::new((run_start * FRAME_SIZE) as u64));
            }
        }
        None
    }

    /// Releases a frame. Out-of-range and already-free frames are logged
    /// and ignored.
    pub fn free_frame(&mut self, addr: PhysAddr) {
        let frame = (addr.as_u64() / FRAME_SIZE as u64) as usize;
        if frame >= self.total_frames {
            warn!("Attempt to free invalid frame: {:#x}", addr.as_u64());
            return;
        }
        if !self.test_frame(frame) {
            warn!("Double free of frame: {:#x}", addr.as_u64());
            return;
        }
        self.clear_frame(frame);
        self.used_frames -= 1;
    }

    /// Releases `count` frames starting at `addr`.
    pub fn free_frames(&mut self, addr: PhysAddr, count: usize) {
        for i in 0..count {
            self.free_frame(addr + (i * FRAME_SIZE) as u64);
        }
    }

    pub fn is_frame_used(&self, addr: PhysAddr) -> bool {
        let frame = (addr.as_u64() / FRAME_SIZE as u64) as usize;
        frame >= self.total_frames || self.test_frame(frame)
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn used_frames(&self) -> usize {
        self.used_frames
    }

    pub fn free_frames_count(&self) -> usize {
        self.total_frames - self.used_frames
    }

    pub fn log_stats(&self) {
        info!(
            "Physical memory: {} MiB free / {} MiB total ({} of {} frames used)",
            self.free_frames_count() * FRAME_SIZE / (1024 * 1024),
            self.total_frames * FRAME_SIZE / (1024 * 1024),
            self.used_frames,
            self.total_frames
        );
    }

    fn set_frame(&mut self, frame: usize) {
        assert!(frame < self.total_frames);
        self.bitmap[frame / BITMAP_ENTRY_BITS] |= 1 << (frame % BITMAP_ENTRY_BITS);
    }

    fn clear_frame(&mut self, frame: usize) {
        assert!(frame < self.total_frames);
        self.bitmap[frame / BITMAP_ENTRY_BITS] &= !(1 << (frame % BITMAP_ENTRY_BITS));
    }

    fn test_frame(&self, frame: usize) -> bool {
        assert!(frame < self.total_frames);
        self.bitmap[frame / BITMAP_ENTRY_BITS] & (1 << (frame % BITMAP_ENTRY_BITS)) != 0
    }
}

/// Claims a frame from the global allocator. Running out of physical
/// memory is unrecoverable for the kernel core.
pub fn alloc_frame() -> PhysAddr {
    x86_64::instructions::interrupts::without_interrupts(|| {
        FRAME_ALLOCATOR
            .lock()
            .as_mut()
            .expect("Frame allocator not initialized")
            .allocate_frame()
            .expect("Out of physical memory!")
    })
}

/// Claims `count` contiguous frames from the global allocator.
pub fn alloc_frames(count: usize) -> PhysAddr {
    x86_64::instructions::interrupts::without_interrupts(|| {
        FRAME_ALLOCATOR
            .lock()
            .as_mut()
            .expect("Frame allocator not initialized")
            .allocate_frames(count)
            .expect("Out of contiguous physical memory!")
    })
}

/// Returns a frame to the global allocator.
pub fn dealloc_frame(addr: PhysAddr) {
    x86_64::instructions::interrupts::without_interrupts(|| {
        if let Some(allocator) = FRAME_ALLOCATOR.lock().as_mut() {
            allocator.free_frame(addr);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    // 16 MiB of tracked memory: 4096 frames, 64 bitmap words.
    const TEST_WORDS: usize = 64;

    fn test_regions() -> Vec<MemoryRegion> {
        vec![MemoryRegion {
            start: 0x10_0000,
            len: 15 * 1024 * 1024,
            kind: MemoryRegionKind::Available,
        }]
    }

    fn test_allocator(reserved_end: u64) -> FrameAllocator {
        let storage = alloc::boxed::Box::leak(vec![0u64; TEST_WORDS].into_boxed_slice());
        FrameAllocator::with_storage(storage, Some(test_regions().into_iter()), reserved_end)
    }

    #[test_case]
    fn init_reserves_low_memory_and_kernel() {
        let allocator = test_allocator(0x20_0000);

        // Everything below 1 MiB stays used.
        assert!(allocator.is_frame_used(PhysAddr::new(0)));
        assert!(allocator.is_frame_used(PhysAddr::new(0xF_F000)));
        // Kernel image and bitmap storage up to reserved_end stay used.
        assert!(allocator.is_frame_used(PhysAddr::new(0x10_0000)));
        assert!(allocator.is_frame_used(PhysAddr::new(0x1F_F000)));
        // First frame past the reservation is free.
        assert!(!allocator.is_frame_used(PhysAddr::new(0x20_0000)));
    }

    #[test_case]
    fn allocations_are_disjoint_and_round_trip() {
        let mut allocator = test_allocator(0x20_0000);

        let a = allocator.allocate_frame().unwrap();
        let b = allocator.allocate_frame().unwrap();
        assert_ne!(a, b);
        assert!(allocator.is_frame_used(a));

        let used = allocator.used_frames();
        allocator.free_frame(a);
        assert_eq!(allocator.used_frames(), used - 1);
        assert!(!allocator.is_frame_used(a));

        // The freed frame is the lowest clear bit again.
        let c = allocator.allocate_frame().unwrap();
        assert_eq!(c, a);
    }

    #[test_case]
    fn contiguous_runs_are_contiguous() {
        let mut allocator = test_allocator(0x20_0000);

        let start = allocator.allocate_frames(8).unwrap();
        for i in 0..8 {
            assert!(allocator.is_frame_used(start + (i * FRAME_SIZE) as u64));
        }

        allocator.free_frames(start, 8);
        for i in 0..8 {
            assert!(!allocator.is_frame_used(start + (i * FRAME_SIZE) as u64));
        }
    }

    #[test_case]
    fn invalid_frees_are_ignored() {
        let mut allocator = test_allocator(0x20_0000);

        let used = allocator.used_frames();
        // Out of range.
        allocator.free_frame(PhysAddr::new(0x1_0000_0000));
        // Never allocated.
        allocator.free_frame(PhysAddr::new(0x30_0000));
        assert_eq!(allocator.used_frames(), used);

        // A double free releases only once.
        let frame = allocator.allocate_frame().unwrap();
        allocator.free_frame(frame);
        let after = allocator.used_frames();
        allocator.free_frame(frame);
        assert_eq!(allocator.used_frames(), after);
    }

    #[test_case]
    fn exhaustion_reports_none() {
        let mut allocator = test_allocator(0x20_0000);

        while allocator.allocate_frame().is_some() {}
        assert_eq!(allocator.free_frames_count(), 0);
        assert!(allocator.allocate_frame().is_none());
        assert!(allocator.allocate_frames(2).is_none());
    }

    #[test_case]
    fn bitmap_matches_counters() {
        let mut allocator = test_allocator(0x20_0000);

        let free_before = allocator.free_frames_count();
        let mut held = Vec::new();
        for _ in 0..16 {
            held.push(allocator.allocate_frame().unwrap());
        }
        assert_eq!(allocator.free_frames_count(), free_before - 16);
        for frame in held {
            allocator.free_frame(frame);
        }
        assert_eq!(allocator.free_frames_count(), free_before);
    }
}
