//! Multiboot2 boot information parser.
//!
//! The bootloader leaves a block of tagged records in memory and hands its
//! physical address to `kernel_main`. Each tag is a `{type, size}` header
//! followed by a payload, padded to an 8-byte boundary; a type-0 tag ends
//! the sequence. Only the tags the kernel consumes are modelled here.

use log::info;

/// Magic value the bootloader passes in the first argument register.
pub const MULTIBOOT2_BOOTLOADER_MAGIC: u32 = 0x36D7_6289;

/// Tag types the kernel reads.
pub const TAG_END: u32 = 0;
pub const TAG_BASIC_MEMINFO: u32 = 4;
pub const TAG_MMAP: u32 = 6;

/// Kind of a memory-map region as reported by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionKind {
    Available,
    Reserved,
    AcpiReclaimable,
    Nvs,
    BadRam,
    Unknown(u32),
}

impl MemoryRegionKind {
    fn from_raw(raw: u32) -> Self {
        match raw {
            1 => MemoryRegionKind::Available,
            2 => MemoryRegionKind::Reserved,
            3 => MemoryRegionKind::AcpiReclaimable,
            4 => MemoryRegionKind::Nvs,
            5 => MemoryRegionKind::BadRam,
            other => MemoryRegionKind::Unknown(other),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            MemoryRegionKind::Available => "AVAILABLE",
            MemoryRegionKind::Reserved => "RESERVED",
            MemoryRegionKind::AcpiReclaimable => "ACPI_RECLAIM",
            MemoryRegionKind::Nvs => "NVS",
            MemoryRegionKind::BadRam => "BAD_RAM",
            MemoryRegionKind::Unknown(_) => "UNKNOWN",
        }
    }
}

/// One physical memory region from the boot memory map.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    pub start: u64,
    pub len: u64,
    pub kind: MemoryRegionKind,
}

impl MemoryRegion {
    pub fn end(&self) -> u64 {
        self.start + self.len
    }
}

/// A raw tag inside the boot information block.
#[derive(Clone, Copy)]
pub struct Tag {
    ptr: *const u8,
    pub kind: u32,
    pub size: u32,
}

impl Tag {
    /// Payload bytes following the 8-byte tag header.
    fn payload(&self) -> *const u8 {
        unsafe { self.ptr.add(8) }
    }
}

/// Parsed handle over the bootloader-provided information block.
#[derive(Clone, Copy)]
pub struct BootInfo {
    ptr: *const u8,
    total_size: u32,
}

impl BootInfo {
    /// Wraps the boot information block at `ptr`.
    ///
    /// # Safety
    /// `ptr` must point at a valid Multiboot2 information block that stays
    /// mapped for the lifetime of the returned handle.
    pub unsafe fn parse(ptr: *const u8) -> Self {
        let total_size = (ptr as *const u32).read_unaligned();
        BootInfo { ptr, total_size }
    }

    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    /// Iterates the raw tag sequence, ending at the type-0 tag.
    pub fn tags(&self) -> TagIter {
        TagIter {
            // The fixed header is total_size + reserved, 8 bytes.
            current: unsafe { self.ptr.add(8) },
            end: unsafe { self.ptr.add(self.total_size as usize) },
        }
    }

    pub fn find_tag(&self, kind: u32) -> Option<Tag> {
        self.tags().find(|tag| tag.kind == kind)
    }

    /// Lower/upper memory in KiB from the BASIC_MEMINFO tag.
    pub fn basic_meminfo(&self) -> Option<(u32, u32)> {
        let tag = self.find_tag(TAG_BASIC_MEMINFO)?;
        unsafe {
            let payload = tag.payload() as *const u32;
            Some((payload.read_unaligned(), payload.add(1).read_unaligned()))
        }
    }

    /// Iterator over the memory-map entries, if the bootloader supplied one.
    pub fn memory_map(&self) -> Option<MemoryMapIter> {
        let tag = self.find_tag(TAG_MMAP)?;
        unsafe {
            let payload = tag.payload() as *const u32;
            let entry_size = payload.read_unaligned() as usize;
            // Entries are at least addr + len + type + reserved.
            if entry_size < 24 {
                return None;
            }
            // entry_version follows entry_size; current loaders emit 0.
            let first = tag.payload().add(8);
            let end = tag.ptr.add(tag.size as usize);
            Some(MemoryMapIter {
                current: first,
                end,
                entry_size,
            })
        }
    }

    /// Sum of all memory-map region lengths, regardless of kind.
    pub fn total_memory(&self) -> u64 {
        self.memory_map()
            .map(|map| map.map(|region| region.len).sum())
            .unwrap_or(0)
    }

    /// Sum of the AVAILABLE region lengths.
    pub fn available_memory(&self) -> u64 {
        self.memory_map()
            .map(|map| {
                map.filter(|region| region.kind == MemoryRegionKind::Available)
                    .map(|region| region.len)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Dumps the memory map to the log.
    pub fn log_memory_map(&self) {
        let Some(map) = self.memory_map() else {
            info!("No memory map in boot information");
            return;
        };

        info!("Memory map:");
        for region in map {
            info!(
                "  {:#016x} - {:#016x} ({} KiB) - {}",
                region.start,
                region.end() - 1,
                region.len / 1024,
                region.kind.name()
            );
        }
    }
}

pub struct TagIter {
    current: *const u8,
    end: *const u8,
}

impl Iterator for TagIter {
    type Item = Tag;

    fn next(&mut self) -> Option<Tag> {
        if self.current >= self.end {
            return None;
        }

        let (kind, size) = unsafe {
            let header = self.current as *const u32;
            (header.read_unaligned(), header.add(1).read_unaligned())
        };
        if kind == TAG_END {
            return None;
        }

        let tag = Tag {
            ptr: self.current,
            kind,
            size,
        };

        // Tags are padded up to the next 8-byte boundary.
        let advance = (size as usize + 7) & !7;
        self.current = unsafe { self.current.add(advance) };

        Some(tag)
    }
}

pub struct MemoryMapIter {
    current: *const u8,
    end: *const u8,
    entry_size: usize,
}

impl Iterator for MemoryMapIter {
    type Item = MemoryRegion;

    fn next(&mut self) -> Option<MemoryRegion> {
        if self.current.wrapping_add(self.entry_size) > self.end {
            return None;
        }

        let region = unsafe {
            let entry = self.current as *const u64;
            let start = entry.read_unaligned();
            let len = entry.add(1).read_unaligned();
            let kind = (self.current.add(16) as *const u32).read_unaligned();
            MemoryRegion {
                start,
                len,
                kind: MemoryRegionKind::from_raw(kind),
            }
        };

        self.current = unsafe { self.current.add(self.entry_size) };
        Some(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    // Builds a boot information block: fixed header, then a BASIC_MEMINFO
    // tag, an MMAP tag with two entries, and the END tag. The backing Vec
    // of u64 keeps everything 8-byte aligned as the real loader does.
    fn build_boot_info(storage: &mut Vec<u64>) -> *const u8 {
        let mut bytes: Vec<u8> = Vec::new();

        // total_size fixed up below, reserved = 0
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());

        // BASIC_MEMINFO: type 4, size 16, mem_lower, mem_upper
        bytes.extend_from_slice(&TAG_BASIC_MEMINFO.to_le_bytes());
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&639u32.to_le_bytes());
        bytes.extend_from_slice(&130_048u32.to_le_bytes());

        // MMAP: type 6, header 16 bytes + two 24-byte entries
        bytes.extend_from_slice(&TAG_MMAP.to_le_bytes());
        bytes.extend_from_slice(&(16u32 + 2 * 24).to_le_bytes());
        bytes.extend_from_slice(&24u32.to_le_bytes()); // entry_size
        bytes.extend_from_slice(&0u32.to_le_bytes()); // entry_version

        // Entry 1: 640 KiB of low memory, available
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&0x9_F000u64.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());

        // Entry 2: 127 MiB above 1 MiB, available
        bytes.extend_from_slice(&0x10_0000u64.to_le_bytes());
        bytes.extend_from_slice(&0x7F0_0000u64.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());

        // END tag
        bytes.extend_from_slice(&TAG_END.to_le_bytes());
        bytes.extend_from_slice(&8u32.to_le_bytes());

        let total = bytes.len() as u32;
        bytes[0..4].copy_from_slice(&total.to_le_bytes());

        storage.clear();
        storage.resize(bytes.len().div_ceil(8), 0);
        let dst = storage.as_mut_ptr() as *mut u8;
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
        }
        dst
    }

    #[test_case]
    fn walks_tags_until_end() {
        let mut storage = Vec::new();
        let ptr = build_boot_info(&mut storage);
        let info = unsafe { BootInfo::parse(ptr) };

        let kinds: Vec<u32> = info.tags().map(|tag| tag.kind).collect();
        assert_eq!(kinds, alloc::vec![TAG_BASIC_MEMINFO, TAG_MMAP]);
    }

    #[test_case]
    fn reads_basic_meminfo() {
        let mut storage = Vec::new();
        let ptr = build_boot_info(&mut storage);
        let info = unsafe { BootInfo::parse(ptr) };

        assert_eq!(info.basic_meminfo(), Some((639, 130_048)));
    }

    #[test_case]
    fn iterates_memory_map_entries() {
        let mut storage = Vec::new();
        let ptr = build_boot_info(&mut storage);
        let info = unsafe { BootInfo::parse(ptr) };

        let regions: Vec<MemoryRegion> = info.memory_map().unwrap().collect();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].start, 0);
        assert_eq!(regions[0].len, 0x9_F000);
        assert_eq!(regions[0].kind, MemoryRegionKind::Available);
        assert_eq!(regions[1].start, 0x10_0000);
        assert_eq!(regions[1].end(), 0x800_0000);
    }

    #[test_case]
    fn sums_available_memory() {
        let mut storage = Vec::new();
        let ptr = build_boot_info(&mut storage);
        let info = unsafe { BootInfo::parse(ptr) };

        assert_eq!(info.available_memory(), 0x9_F000 + 0x7F0_0000);
        assert_eq!(info.total_memory(), info.available_memory());
    }

    #[test_case]
    fn missing_tag_is_none() {
        let mut storage = Vec::new();
        let ptr = build_boot_info(&mut storage);
        let info = unsafe { BootInfo::parse(ptr) };

        assert!(info.find_tag(8).is_none());
    }
}
