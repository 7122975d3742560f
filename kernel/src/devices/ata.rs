//! ATA/IDE disk driver (PIO mode, LBA28).
//!
//! Polled port I/O only; the controller is spun on with a bounded wait,
//! so callers must tolerate timer ticks elapsing during a transfer.

use crate::filesys::{BlockDevice, FsError};
use alloc::string::String;
use alloc::vec::Vec;
use log::{info, warn};
use x86_64::instructions::port::Port;

use crate::constants::ports::{
    ATA_PRIMARY_CTRL, ATA_PRIMARY_IO, ATA_SECONDARY_CTRL, ATA_SECONDARY_IO,
};

// Register offsets from the I/O base.
const REG_DATA: u16 = 0;
const REG_SECTOR_COUNT: u16 = 2;
const REG_LBA_LOW: u16 = 3;
const REG_LBA_MID: u16 = 4;
const REG_LBA_HIGH: u16 = 5;
const REG_DRIVE_SELECT: u16 = 6;
const REG_STATUS: u16 = 7;
const REG_COMMAND: u16 = 7;

// Status register bits.
const STATUS_ERR: u8 = 1 << 0;
const STATUS_DRQ: u8 = 1 << 3;
const STATUS_RDY: u8 = 1 << 6;
const STATUS_BSY: u8 = 1 << 7;

const CMD_READ_SECTORS: u8 = 0x20;
const CMD_WRITE_SECTORS: u8 = 0x30;
const CMD_IDENTIFY: u8 = 0xEC;

const SECTOR_SIZE: usize = 512;

/// Bounded controller polls before giving up on BSY/DRQ.
const STATUS_POLL_LIMIT: usize = 10_000;

/// Highest LBA addressable in 28-bit mode.
const LBA28_LIMIT: u64 = 1 << 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtaBus {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtaDrive {
    Master,
    Slave,
}

pub struct AtaDevice {
    io_base: u16,
    ctrl_base: u16,
    drive_select: u8,
    total_sectors: u64,
    model: String,
    serial: String,
}

impl AtaDevice {
    /// Probes `bus`/`drive` with IDENTIFY. `None` when nothing answers or
    /// the device is ATAPI.
    pub fn detect(bus: AtaBus, drive: AtaDrive) -> Option<AtaDevice> {
        let (io_base, ctrl_base) = match bus {
            AtaBus::Primary => (ATA_PRIMARY_IO, ATA_PRIMARY_CTRL),
            AtaBus::Secondary => (ATA_SECONDARY_IO, ATA_SECONDARY_CTRL),
        };
        let drive_select = match drive {
            AtaDrive::Master => 0xA0,
            AtaDrive::Slave => 0xB0,
        };

        let mut device = AtaDevice {
            io_base,
            ctrl_base,
            drive_select,
            total_sectors: 0,
            model: String::new(),
            serial: String::new(),
        };

        match device.identify() {
            Ok(()) => {
                info!(
                    "ATA device at {:#x}/{:#x}: {} ({} sectors, {} MiB)",
                    io_base,
                    drive_select,
                    device.model,
                    device.total_sectors,
                    device.total_sectors * SECTOR_SIZE as u64 / (1024 * 1024)
                );
                Some(device)
            }
            Err(_) => None,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    fn read_port(&self, offset: u16) -> u8 {
        unsafe { Port::<u8>::new(self.io_base + offset).read() }
    }

    fn write_port(&mut self, offset: u16, value: u8) {
        unsafe { Port::<u8>::new(self.io_base + offset).write(value) }
    }

    fn select_drive(&mut self) {
        self.write_port(REG_DRIVE_SELECT, self.drive_select);
        // Give the drive-select 400ns to settle.
        for _ in 0..4 {
            unsafe {
                Port::<u8>::new(self.ctrl_base).read();
            }
        }
    }

    /// Polls until BSY clears and RDY sets.
    fn wait_ready(&self) -> Result<(), FsError> {
        for _ in 0..STATUS_POLL_LIMIT {
            let status = self.read_port(REG_STATUS);
            if status & STATUS_BSY == 0 && status & STATUS_RDY != 0 {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(FsError::DeviceNotReady)
    }

    /// Polls until the controller asks for data.
    fn wait_drq(&self) -> Result<(), FsError> {
        for _ in 0..STATUS_POLL_LIMIT {
            let status = self.read_port(REG_STATUS);
            if status & STATUS_ERR != 0 {
                warn!("ATA error (status {:#x})", status);
                return Err(FsError::DeviceError);
            }
            if status & STATUS_BSY == 0 && status & STATUS_DRQ != 0 {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(FsError::DeviceNotReady)
    }

    fn read_pio(&mut self, buf: &mut [u8]) {
        let mut data = Port::<u16>::new(self.io_base + REG_DATA);
        for chunk in buf.chunks_exact_mut(2) {
            let word = unsafe { data.read() };
            chunk.copy_from_slice(&word.to_le_bytes());
        }
    }

    fn write_pio(&mut self, buf: &[u8]) {
        let mut data = Port::<u16>::new(self.io_base + REG_DATA);
        for chunk in buf.chunks_exact(2) {
            let word = u16::from_le_bytes([chunk[0], chunk[1]]);
            unsafe { data.write(word) };
        }
    }

    fn set_lba(&mut self, lba: u64) {
        self.write_port(REG_SECTOR_COUNT, 1);
        self.write_port(REG_LBA_LOW, lba as u8);
        self.write_port(REG_LBA_MID, (lba >> 8) as u8);
        self.write_port(REG_LBA_HIGH, (lba >> 16) as u8);
        self.write_port(
            REG_DRIVE_SELECT,
            self.drive_select | ((lba >> 24) as u8 & 0x0F),
        );
    }

    fn identify(&mut self) -> Result<(), FsError> {
        self.select_drive();

        // Interrupts off; this driver only polls.
        unsafe { Port::<u8>::new(self.ctrl_base).write(0x02) };

        self.write_port(REG_COMMAND, CMD_IDENTIFY);

        if self.read_port(REG_STATUS) == 0 {
            // Floating bus, no device.
            return Err(FsError::DeviceNotReady);
        }

        self.wait_ready()?;

        // ATAPI devices leave a signature in the LBA registers.
        if self.read_port(REG_LBA_MID) != 0 || self.read_port(REG_LBA_HIGH) != 0 {
            return Err(FsError::NotSupported);
        }

        self.wait_drq()?;

        let mut identify = [0u8; SECTOR_SIZE];
        self.read_pio(&mut identify);
        self.parse_identify(&identify);

        Ok(())
    }

    fn parse_identify(&mut self, data: &[u8; SECTOR_SIZE]) {
        let word = |index: usize| u16::from_le_bytes([data[index * 2], data[index * 2 + 1]]);

        // Words 60-61 hold the LBA28 sector count.
        self.total_sectors = word(60) as u64 | ((word(61) as u64) << 16);

        // Identify strings are byte-swapped within each word.
        let swapped_string = |start: usize, words: usize| {
            let mut out = String::new();
            for i in start..start + words {
                let w = word(i);
                out.push((w >> 8) as u8 as char);
                out.push(w as u8 as char);
            }
            String::from(out.trim_end())
        };

        self.model = swapped_string(27, 20);
        self.serial = swapped_string(10, 10);
    }

}

impl BlockDevice for AtaDevice {
    fn read_sectors(&mut self, lba: u64, count: usize, buf: &mut [u8]) -> Result<(), FsError> {
        if buf.len() != count * SECTOR_SIZE {
            return Err(FsError::IOError);
        }
        if lba + count as u64 > LBA28_LIMIT {
            return Err(FsError::NotSupported);
        }

        for (i, sector) in buf.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            self.select_drive();
            self.wait_ready()?;
            self.set_lba(lba + i as u64);
            self.write_port(REG_COMMAND, CMD_READ_SECTORS);
            self.wait_drq()?;
            self.read_pio(sector);
        }
        Ok(())
    }

    fn write_sectors(&mut self, lba: u64, count: usize, buf: &[u8]) -> Result<(), FsError> {
        if buf.len() != count * SECTOR_SIZE {
            return Err(FsError::IOError);
        }
        if lba + count as u64 > LBA28_LIMIT {
            return Err(FsError::NotSupported);
        }

        for (i, sector) in buf.chunks_exact(SECTOR_SIZE).enumerate() {
            self.select_drive();
            self.wait_ready()?;
            self.set_lba(lba + i as u64);
            self.write_port(REG_COMMAND, CMD_WRITE_SECTORS);
            self.wait_drq()?;
            self.write_pio(sector);
            self.wait_ready()?;
        }
        Ok(())
    }

    fn sector_size(&self) -> usize {
        SECTOR_SIZE
    }

    fn total_sectors(&self) -> u64 {
        self.total_sectors
    }
}

/// Probes all four bus/drive positions.
pub fn detect_devices() -> Vec<AtaDevice> {
    let mut devices = Vec::new();
    for (bus, drive) in [
        (AtaBus::Primary, AtaDrive::Master),
        (AtaBus::Primary, AtaDrive::Slave),
        (AtaBus::Secondary, AtaDrive::Master),
        (AtaBus::Secondary, AtaDrive::Slave),
    ] {
        if let Some(device) = AtaDevice::detect(bus, drive) {
            devices.push(device);
        }
    }
    info!("ATA probe complete, {} device(s)", devices.len());
    devices
}
