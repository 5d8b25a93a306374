// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! RAM backed NOR flash for running the engine on a host.

use embedded_storage::nor_flash::{
    check_erase, check_read, check_write, ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash,
};

/// NOR semantics: erase sets bytes to `0xFF`, programming can only clear
/// bits.
pub struct MemFlash<const SIZE: usize, const ERASE_SIZE: usize, const WRITE_SIZE: usize> {
    mem: [u8; SIZE],
    erased_pages: usize,
    fail_erase: bool,
    fail_write: bool,
}

impl<const SIZE: usize, const ERASE_SIZE: usize, const WRITE_SIZE: usize> Default
    for MemFlash<SIZE, ERASE_SIZE, WRITE_SIZE>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize, const ERASE_SIZE: usize, const WRITE_SIZE: usize>
    MemFlash<SIZE, ERASE_SIZE, WRITE_SIZE>
{
    /// Fully erased flash.
    pub const fn new() -> Self {
        Self {
            mem: [0xFF; SIZE],
            erased_pages: 0,
            fail_erase: false,
            fail_write: false,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mem
    }

    /// Direct access, bypassing NOR semantics (preloading, corrupting).
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mem
    }

    /// Number of pages erased since creation.
    pub fn erased_pages(&self) -> usize {
        self.erased_pages
    }

    /// Make every following erase fail.
    pub fn set_erase_failure(&mut self, fail: bool) {
        self.fail_erase = fail;
    }

    /// Make every following write fail.
    pub fn set_write_failure(&mut self, fail: bool) {
        self.fail_write = fail;
    }
}

impl<const SIZE: usize, const ERASE_SIZE: usize, const WRITE_SIZE: usize> ErrorType
    for MemFlash<SIZE, ERASE_SIZE, WRITE_SIZE>
{
    type Error = NorFlashErrorKind;
}

impl<const SIZE: usize, const ERASE_SIZE: usize, const WRITE_SIZE: usize> ReadNorFlash
    for MemFlash<SIZE, ERASE_SIZE, WRITE_SIZE>
{
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        let start = offset as usize;
        bytes.copy_from_slice(&self.mem[start..start + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        SIZE
    }
}

impl<const SIZE: usize, const ERASE_SIZE: usize, const WRITE_SIZE: usize> NorFlash
    for MemFlash<SIZE, ERASE_SIZE, WRITE_SIZE>
{
    const WRITE_SIZE: usize = WRITE_SIZE;
    const ERASE_SIZE: usize = ERASE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        if self.fail_erase {
            return Err(NorFlashErrorKind::Other);
        }
        self.mem[from as usize..to as usize].fill(0xFF);
        self.erased_pages += (to - from) as usize / ERASE_SIZE;
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        if self.fail_write {
            return Err(NorFlashErrorKind::Other);
        }
        let start = offset as usize;
        for (cell, &value) in self.mem[start..start + bytes.len()].iter_mut().zip(bytes) {
            *cell &= value;
        }
        Ok(())
    }
}
