//! Virtual memory manager
//!
//! Owns the kernel's four-level page-table hierarchy. Intermediate tables
//! are created on demand during a map; the walk addresses tables directly
//! through their physical addresses, which works because every frame the
//! allocator hands out is identity mapped while the hierarchy is built.

#[cfg(not(test))]
use crate::constants::memory::{HEAP_SIZE, IDENTITY_MAP_END, KERNEL_VIRTUAL_BASE, PAGE_SIZE};
#[cfg(not(test))]
use crate::memory::align_up;
use crate::memory::frame_allocator::alloc_frame;
#[cfg(not(test))]
use log::info;
use spin::Mutex;
use x86_64::registers::control::{Cr3, Cr3Flags};
use x86_64::structures::paging::page_table::PageTableEntry;
use x86_64::structures::paging::{PageTable, PageTableFlags, PhysFrame};
use x86_64::{instructions::tlb, PhysAddr, VirtAddr};

/// Physical address of the kernel PML4, set once during boot.
static KERNEL_PML4: Mutex<Option<PhysAddr>> = Mutex::new(None);

/// Treats the table at `phys` as directly addressable.
///
/// # Safety
/// `phys` must be the physical address of a live page table covered by the
/// identity map.
unsafe fn table_mut(phys: PhysAddr) -> &'static mut PageTable {
    &mut *(phys.as_u64() as *mut PageTable)
}

/// Follows a PRESENT entry, or allocates and zeroes a fresh table and
/// installs it with `PRESENT | WRITABLE` plus the caller's USER bit.
unsafe fn get_or_create_table(
    entry: &mut PageTableEntry,
    flags: PageTableFlags,
) -> &'static mut PageTable {
    if entry.flags().contains(PageTableFlags::PRESENT) {
        return table_mut(entry.addr());
    }

    let frame = alloc_frame();
    let table = table_mut(frame);
    table.zero();

    let mut table_flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;
    if flags.contains(PageTableFlags::USER_ACCESSIBLE) {
        table_flags |= PageTableFlags::USER_ACCESSIBLE;
    }
    entry.set_addr(frame, table_flags);

    table
}

fn kernel_pml4() -> PhysAddr {
    (*KERNEL_PML4.lock()).expect("Virtual memory not initialized")
}

/// Installs a mapping from `virt` to `phys` in the kernel address space,
/// creating intermediate tables as needed.
pub fn map_page(virt: VirtAddr, phys: PhysAddr, flags: PageTableFlags) {
    let root = kernel_pml4();
    unsafe {
        let pml4 = table_mut(root);
        let pdpt = get_or_create_table(&mut pml4[virt.p4_index()], flags);
        let pd = get_or_create_table(&mut pdpt[virt.p3_index()], flags);
        let pt = get_or_create_table(&mut pd[virt.p2_index()], flags);
        pt[virt.p1_index()].set_addr(phys, flags | PageTableFlags::PRESENT);
    }
}

/// Removes the mapping for `virt` and invalidates its TLB entry. Absent
/// mappings are a no-op.
pub fn unmap_page(virt: VirtAddr) {
    let root = kernel_pml4();
    unsafe {
        let pml4 = table_mut(root);
        let entry = &pml4[virt.p4_index()];
        if !entry.flags().contains(PageTableFlags::PRESENT) {
            return;
        }
        let pdpt = table_mut(entry.addr());
        let entry = &pdpt[virt.p3_index()];
        if !entry.flags().contains(PageTableFlags::PRESENT) {
            return;
        }
        let pd = table_mut(entry.addr());
        let entry = &pd[virt.p2_index()];
        if !entry.flags().contains(PageTableFlags::PRESENT) {
            return;
        }
        let pt = table_mut(entry.addr());
        pt[virt.p1_index()].set_unused();
    }
    tlb::flush(virt);
}

/// Resolves `virt` through the kernel hierarchy. `None` when any level of
/// the walk is absent, so a mapping to physical address zero is still
/// distinguishable from no mapping at all.
pub fn translate(virt: VirtAddr) -> Option<PhysAddr> {
    let root = kernel_pml4();
    unsafe {
        let pml4 = table_mut(root);
        let entry = &pml4[virt.p4_index()];
        if !entry.flags().contains(PageTableFlags::PRESENT) {
            return None;
        }
        let pdpt = table_mut(entry.addr());
        let entry = &pdpt[virt.p3_index()];
        if !entry.flags().contains(PageTableFlags::PRESENT) {
            return None;
        }
        let pd = table_mut(entry.addr());
        let entry = &pd[virt.p2_index()];
        if !entry.flags().contains(PageTableFlags::PRESENT) {
            return None;
        }
        let pt = table_mut(entry.addr());
        let entry = &pt[virt.p1_index()];
        if !entry.flags().contains(PageTableFlags::PRESENT) {
            return None;
        }
        Some(entry.addr() + u64::from(virt.page_offset()))
    }
}

pub fn is_mapped(virt: VirtAddr) -> bool {
    translate(virt).is_some()
}

/// Loads `pml4` into the paging base register.
///
/// # Safety
/// The hierarchy rooted at `pml4` must map the currently executing code.
pub unsafe fn install_root(pml4: PhysAddr) {
    Cr3::write(
        PhysFrame::containing_address(pml4),
        Cr3Flags::empty(),
    );
}

/// Builds the kernel address space and switches to it.
///
/// Identity-maps the boot code, maps the kernel image into the higher
/// half, then claims a contiguous physical run for the heap and maps it
/// right behind the image at `KERNEL_VIRTUAL_BASE + phys == phys`.
/// Returns the virtual bounds of the heap window.
///
/// # Safety
/// Must run once, after the frame allocator is up, while the bootloader's
/// identity map is still active.
#[cfg(not(test))]
pub unsafe fn init() -> (*mut u8, usize) {
    use crate::constants::memory::FRAME_SIZE;
    use crate::memory::frame_allocator::alloc_frames;

    extern "C" {
        static kernel_physical_end: u8;
    }

    let kernel_end = align_up(
        &kernel_physical_end as *const u8 as u64,
        PAGE_SIZE,
    );

    let pml4_phys = alloc_frame();
    table_mut(pml4_phys).zero();
    *KERNEL_PML4.lock() = Some(pml4_phys);
    info!("Kernel PML4 at {:#x}", pml4_phys.as_u64());

    let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;

    // Identity map the boot code so execution survives the root switch.
    let mut addr = 0;
    while addr < IDENTITY_MAP_END {
        map_page(VirtAddr::new(addr), PhysAddr::new(addr), flags);
        addr += PAGE_SIZE;
    }

    // Kernel image in the higher half.
    let mut phys = 0;
    while phys < kernel_end {
        map_page(
            VirtAddr::new(KERNEL_VIRTUAL_BASE + phys),
            PhysAddr::new(phys),
            flags,
        );
        phys += PAGE_SIZE;
    }

    // Heap backing, owned by the frame allocator so its frames can never
    // be handed out twice.
    let heap_phys = alloc_frames(HEAP_SIZE / FRAME_SIZE).as_u64();
    let mut offset = 0;
    while offset < HEAP_SIZE as u64 {
        map_page(
            VirtAddr::new(KERNEL_VIRTUAL_BASE + heap_phys + offset),
            PhysAddr::new(heap_phys + offset),
            flags,
        );
        offset += PAGE_SIZE;
    }

    install_root(pml4_phys);
    info!(
        "Virtual memory ready, kernel mapped at {:#x}, CR3 = {:#x}",
        KERNEL_VIRTUAL_BASE,
        pml4_phys.as_u64()
    );

    (
        (KERNEL_VIRTUAL_BASE + heap_phys) as *mut u8,
        HEAP_SIZE,
    )
}

#[cfg(test)]
mod tests {
    use x86_64::VirtAddr;

    #[test_case]
    fn higher_half_index_decomposition() {
        let virt = VirtAddr::new(0xFFFF_FFFF_8000_0000);
        assert_eq!(u16::from(virt.p4_index()), 511);
        assert_eq!(u16::from(virt.p3_index()), 510);
        assert_eq!(u16::from(virt.p2_index()), 0);
        assert_eq!(u16::from(virt.p1_index()), 0);
        assert_eq!(u64::from(virt.page_offset()), 0);
    }

    #[test_case]
    fn offset_bits_pass_through() {
        let virt = VirtAddr::new(0xFFFF_FFFF_8000_0ABC);
        assert_eq!(u64::from(virt.page_offset()), 0xABC);
        assert_eq!(u16::from(virt.p1_index()), 0);
    }

    #[test_case]
    fn consecutive_pages_advance_pt_index() {
        let base = VirtAddr::new(0xFFFF_FFFF_8000_0000);
        let next = base + 4096u64;
        assert_eq!(
            u16::from(next.p1_index()),
            u16::from(base.p1_index()) + 1
        );
        assert_eq!(next.p2_index(), base.p2_index());
    }
}
