// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! A/B slot addressing.
//!
//! The board has two equally sized application slots and a bootloader region.
//! The bootloader records which slot is running in the active slot indicator;
//! the other slot receives the update.
//!
//! ```text
//! +-------------------+ bootloader.base
//! | bootloader        |   scanned for its properties and certificate
//! +-------------------+ slot A base
//! | slot A            |   metadata | properties | code | ... | signature page
//! +-------------------+ slot B base
//! | slot B            |
//! +-------------------+
//! ```
//!
//! All addresses are flash offsets as understood by the
//! [`NorFlash`](embedded_storage::nor_flash::NorFlash) driver.

use crate::Error;

/// A contiguous flash range. The end never overflows `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Region {
    base: u32,
    size: u32,
}

impl Region {
    pub fn new(base: u32, size: u32) -> Result<Self, Error> {
        base.checked_add(size).ok_or(Error::Overflow)?;
        Ok(Self { base, size })
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// First address past the region.
    pub fn end(&self) -> u32 {
        self.base + self.size
    }

    /// Address of `offset` inside the region, provided `len` bytes starting
    /// there stay inside the region.
    pub fn address(&self, offset: u32, len: u32) -> Result<u32, Error> {
        let end = offset.checked_add(len).ok_or(Error::Overflow)?;
        if end > self.size {
            return Err(Error::OutOfBounds);
        }
        Ok(self.base + offset)
    }

    /// Whether `[address, address + len)` lies entirely inside the region.
    pub fn contains(&self, address: u32, len: u32) -> bool {
        address >= self.base && address.checked_add(len).is_some_and(|end| end <= self.end())
    }

    fn overlaps(&self, other: &Region) -> bool {
        self.base < other.end() && other.base < self.end()
    }
}

/// Application slot identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Slot {
    A,
    B,
}

impl Slot {
    /// Decode the active slot indicator written by the bootloader.
    pub fn from_indicator(raw: u32) -> Option<Self> {
        match raw {
            consts::ACTIVE_SLOT_A => Some(Slot::A),
            consts::ACTIVE_SLOT_B => Some(Slot::B),
            _ => None,
        }
    }

    pub fn indicator(&self) -> u32 {
        match self {
            Slot::A => consts::ACTIVE_SLOT_A,
            Slot::B => consts::ACTIVE_SLOT_B,
        }
    }

    #[must_use]
    pub fn other(&self) -> Self {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }
}

/// Validated board layout, built once at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotLayout {
    slot_a: Region,
    slot_b: Region,
    bootloader: Region,
    page_size: u32,
    signature_size: u32,
}

impl SlotLayout {
    pub fn new(
        slot_a: Region,
        slot_b: Region,
        bootloader: Region,
        page_size: u32,
        signature_size: u32,
    ) -> Result<Self, Error> {
        if page_size == 0 || signature_size == 0 || signature_size > page_size {
            return Err(Error::InvalidLayout);
        }
        if slot_a.size() != slot_b.size() {
            return Err(Error::InvalidLayout);
        }
        // At least one application page plus the signature page.
        if slot_a.size() < 2 * page_size {
            return Err(Error::InvalidLayout);
        }
        for slot in [slot_a, slot_b] {
            if slot.base() % page_size != 0 || slot.size() % page_size != 0 {
                return Err(Error::InvalidLayout);
            }
        }
        if slot_a.overlaps(&slot_b) || slot_a.overlaps(&bootloader) || slot_b.overlaps(&bootloader) {
            return Err(Error::InvalidLayout);
        }
        Ok(Self {
            slot_a,
            slot_b,
            bootloader,
            page_size,
            signature_size,
        })
    }

    /// Layout of the board this firmware is built for.
    pub fn board() -> Result<Self, Error> {
        Self::new(
            Region::new(consts::SLOT_A_BASE, consts::SLOT_SIZE)?,
            Region::new(consts::SLOT_B_BASE, consts::SLOT_SIZE)?,
            Region::new(consts::BOOTLOADER_BASE, consts::BOOTLOADER_SIZE)?,
            consts::FLASH_PAGE,
            consts::SIGNATURE_SIZE,
        )
    }

    pub fn region(&self, slot: Slot) -> Region {
        match slot {
            Slot::A => self.slot_a,
            Slot::B => self.slot_b,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Resolve the running and the target slot from the active slot indicator.
    ///
    /// # Panics
    ///
    /// When the indicator holds neither slot value. The bootloader always
    /// writes a valid indicator, so this is a provisioning defect.
    pub fn resolve(&self, active_slot_indicator: u32) -> SlotAddresses {
        let Some(active) = Slot::from_indicator(active_slot_indicator) else {
            error!("Invalid active slot indicator {:#x}", active_slot_indicator);
            panic!("invalid active slot indicator {:#x}", active_slot_indicator);
        };
        let current = self.region(active);
        let target = self.region(active.other());
        SlotAddresses {
            active,
            current,
            target,
            target_signature: target.end() - self.signature_size,
            bootloader: self.bootloader,
            page_size: self.page_size,
            signature_size: self.signature_size,
        }
    }
}

/// The addresses an update session works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotAddresses {
    /// Slot running now.
    pub active: Slot,
    /// Region of the running image.
    pub current: Region,
    /// Region receiving the update.
    pub target: Region,
    /// Address of the signature at the end of the target slot.
    pub target_signature: u32,
    pub bootloader: Region,
    pub page_size: u32,
    pub signature_size: u32,
}

impl SlotAddresses {
    /// Size of either slot.
    pub fn slot_size(&self) -> u32 {
        self.target.size()
    }

    /// Number of bytes covered by the signature, from the slot base.
    pub fn signed_len(&self) -> u32 {
        self.slot_size() - self.signature_size
    }

    /// Base of the last page of the target slot, holding the signature.
    pub fn signature_page(&self) -> u32 {
        self.target.end() - self.page_size
    }

    /// Part of the target slot a delta patch writes: everything but the
    /// signature page.
    pub fn patch_region(&self) -> Region {
        Region {
            base: self.target.base(),
            size: self.slot_size() - self.page_size,
        }
    }
}
