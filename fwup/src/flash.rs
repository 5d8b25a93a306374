// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Page erase and word write primitives over a [`NorFlash`] driver.
//!
//! Failures are reported once and never retried here.

use crate::error::map_flash_error;
use crate::Error;
use embedded_storage::nor_flash::NorFlash;

const CHUNK: usize = 64;

pub struct Flash<F> {
    flash: F,
    page_size: u32,
}

impl<F: NorFlash> Flash<F> {
    /// Wrap a driver. `page_size` is the erase granularity used by the slot
    /// layout and must be a whole number of driver erase units.
    pub fn new(flash: F, page_size: u32) -> Result<Self, Error> {
        let erase_size = u32::try_from(F::ERASE_SIZE).map_err(|_| Error::InvalidConfig)?;
        if erase_size == 0 || page_size == 0 || page_size % erase_size != 0 {
            return Err(Error::InvalidConfig);
        }
        // Properties and signatures are read at arbitrary byte offsets.
        if F::READ_SIZE != 1 {
            return Err(Error::InvalidConfig);
        }
        Ok(Self { flash, page_size })
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn write_size(&self) -> usize {
        F::WRITE_SIZE
    }

    /// Erase the pages covering `[base, base + size)`. `size` is rounded down
    /// to whole pages.
    pub fn erase(&mut self, base: u32, size: u32) -> Result<(), Error> {
        if base % self.page_size != 0 {
            return Err(Error::NotAligned);
        }
        let size = size - size % self.page_size;
        if size == 0 {
            return Ok(());
        }
        let end = base.checked_add(size).ok_or(Error::Overflow)?;
        debug!("Erasing flash {:#x}..{:#x}", base, end);
        self.flash.erase(base, end).map_err(map_flash_error)
    }

    /// Erase a slot but keep its last page, which holds the separately
    /// transferred signature.
    pub fn erase_excluding_last_page(&mut self, base: u32, size: u32) -> Result<(), Error> {
        let size = size.checked_sub(self.page_size).ok_or(Error::OutOfBounds)?;
        self.erase(base, size)
    }

    /// Erase exactly the page containing `address`.
    pub fn erase_last_page(&mut self, address: u32) -> Result<(), Error> {
        let page = address - address % self.page_size;
        self.erase(page, self.page_size)
    }

    /// Program `data` at `address`. Both must be multiples of the driver
    /// write size; nothing is written otherwise.
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        if address as usize % F::WRITE_SIZE != 0 || data.len() % F::WRITE_SIZE != 0 {
            warn!("Unaligned write of {} bytes at {:#x}", data.len(), address);
            return Err(Error::NotAligned);
        }
        if data.is_empty() {
            return Ok(());
        }
        let len = u32::try_from(data.len()).map_err(|_| Error::Overflow)?;
        address.checked_add(len).ok_or(Error::Overflow)?;
        self.flash.write(address, data).map_err(map_flash_error)
    }

    pub fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Error> {
        if buf.is_empty() {
            return Ok(());
        }
        self.flash.read(address, buf).map_err(map_flash_error)
    }

    /// Whether `[address, address + len)` reads back as erased.
    pub fn is_erased(&mut self, address: u32, len: u32) -> Result<bool, Error> {
        let mut buf = [0u8; CHUNK];
        let mut cursor = address;
        let end = address.checked_add(len).ok_or(Error::Overflow)?;
        while cursor < end {
            let n = core::cmp::min(CHUNK as u32, end - cursor) as usize;
            self.read(cursor, &mut buf[..n])?;
            if buf[..n].iter().any(|&b| b != 0xFF) {
                return Ok(false);
            }
            cursor += n as u32;
        }
        Ok(true)
    }

    /// Access the driver, e.g. to inspect flash contents in tests.
    pub fn inner_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn release(self) -> F {
        self.flash
    }
}
