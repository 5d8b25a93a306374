// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::delta::PatchError;
use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Address or length does not satisfy the flash alignment.
    NotAligned,
    /// Access outside of the region it was checked against.
    OutOfBounds,
    /// Offset arithmetic overflowed.
    Overflow,
    /// The flash driver reported a failure.
    Flash,
    /// Slot layout constants are inconsistent.
    InvalidLayout,
    /// Session configuration is inconsistent with the layout or the flash.
    InvalidConfig,
    /// One-shot patch does not fit the patch buffer.
    PatchTooLarge,
    /// Delta patch could not be applied.
    Patch(PatchError),
}

impl From<PatchError> for Error {
    fn from(e: PatchError) -> Self {
        Error::Patch(e)
    }
}

pub(crate) fn map_flash_error<E: NorFlashError>(error: E) -> Error {
    match error.kind() {
        NorFlashErrorKind::NotAligned => Error::NotAligned,
        NorFlashErrorKind::OutOfBounds => Error::OutOfBounds,
        _ => Error::Flash,
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotAligned => write!(f, "flash access not aligned"),
            Self::OutOfBounds => write!(f, "flash access out of bounds"),
            Self::Overflow => write!(f, "offset arithmetic overflow"),
            Self::Flash => write!(f, "flash driver error"),
            Self::InvalidLayout => write!(f, "invalid slot layout"),
            Self::InvalidConfig => write!(f, "invalid update configuration"),
            Self::PatchTooLarge => write!(f, "patch does not fit the patch buffer"),
            Self::Patch(e) => write!(f, "delta patch error: {e}"),
        }
    }
}
