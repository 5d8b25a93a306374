// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Application properties and signing certificate records.
//!
//! Both records live inside images that have not been verified yet. Every
//! read is bounded by the region it was found in, and addresses taken from a
//! record are checked before they are followed.

use crate::flash::Flash;
use crate::slots::Region;
use crate::Error;
use embedded_storage::nor_flash::NorFlash;

pub const APP_PROPERTIES_MAGIC: [u8; 16] = [
    0x13, 0xb7, 0x79, 0xfa, 0xc9, 0x25, 0xdd, 0xb7, 0xad, 0xf3, 0xcf, 0xe0, 0xf1, 0xb6, 0x14, 0xb8,
];
pub const APP_PROPERTIES_SIZE: usize = 48;
/// ECDSA secp256k1 over SHA-256, 64 byte compact signature.
pub const SIGNATURE_TYPE_SECP256K1: u32 = 1;

pub const CERTIFICATE_SIZE: usize = 108;
pub const CERTIFICATE_STRUCT_VERSION: u8 = 1;
pub const PUBLIC_KEY_SIZE: usize = 33;

const SCAN_WINDOW: usize = 256;
const SCAN_ALIGN: usize = 4;

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AppProperties {
    pub struct_version: u32,
    pub signature_type: u32,
    pub signature_location: u32,
    pub version: u32,
    /// Flash address of the signing certificate, 0 if none.
    pub cert_address: u32,
    /// Flash address of the boot metadata, 0 if none.
    pub boot_metadata_address: u32,
}

impl AppProperties {
    pub const SIZE: usize = APP_PROPERTIES_SIZE;

    /// A record with the current structure version.
    pub fn new(version: u32) -> Self {
        Self {
            struct_version: 1,
            signature_type: SIGNATURE_TYPE_SECP256K1,
            signature_location: 0,
            version,
            cert_address: 0,
            boot_metadata_address: 0,
        }
    }

    /// Parse a record. `None` unless the magic matches and the structure
    /// version is neither blank nor erased.
    pub fn parse(bytes: &[u8; APP_PROPERTIES_SIZE]) -> Option<Self> {
        if bytes[..16] != APP_PROPERTIES_MAGIC {
            return None;
        }
        let struct_version = le_u32(bytes, 16);
        if struct_version == 0 || struct_version == u32::MAX {
            return None;
        }
        Some(Self {
            struct_version,
            signature_type: le_u32(bytes, 20),
            signature_location: le_u32(bytes, 24),
            version: le_u32(bytes, 28),
            cert_address: le_u32(bytes, 32),
            boot_metadata_address: le_u32(bytes, 36),
        })
    }

    pub fn to_bytes(&self) -> [u8; APP_PROPERTIES_SIZE] {
        let mut out = [0u8; APP_PROPERTIES_SIZE];
        out[..16].copy_from_slice(&APP_PROPERTIES_MAGIC);
        let fields = [
            self.struct_version,
            self.signature_type,
            self.signature_location,
            self.version,
            self.cert_address,
            self.boot_metadata_address,
        ];
        for (i, field) in fields.iter().enumerate() {
            let at = 16 + 4 * i;
            out[at..at + 4].copy_from_slice(&field.to_le_bytes());
        }
        out
    }

    /// Read the record at `offset` inside `region`.
    pub fn read_at<F: NorFlash>(flash: &mut Flash<F>, region: Region, offset: u32) -> Result<Option<Self>, Error> {
        let address = region.address(offset, APP_PROPERTIES_SIZE as u32)?;
        let mut buf = [0u8; APP_PROPERTIES_SIZE];
        flash.read(address, &mut buf)?;
        Ok(Self::parse(&buf))
    }

    /// Find the first valid record at a word aligned offset of `region`.
    /// Returns the record and its offset from the region base.
    pub fn scan<F: NorFlash>(flash: &mut Flash<F>, region: Region) -> Result<Option<(u32, Self)>, Error> {
        let size = region.size() as usize;
        let mut window = [0u8; SCAN_WINDOW];
        let mut start = 0usize;
        // Consecutive windows overlap by a record so none straddles a boundary.
        let step = (SCAN_WINDOW - APP_PROPERTIES_SIZE) / SCAN_ALIGN * SCAN_ALIGN;

        while start + APP_PROPERTIES_SIZE <= size {
            let len = core::cmp::min(SCAN_WINDOW, size - start);
            flash.read(region.base() + start as u32, &mut window[..len])?;
            for at in (0..=len - APP_PROPERTIES_SIZE).step_by(SCAN_ALIGN) {
                if window[at..at + 16] != APP_PROPERTIES_MAGIC {
                    continue;
                }
                let mut record = [0u8; APP_PROPERTIES_SIZE];
                record.copy_from_slice(&window[at..at + APP_PROPERTIES_SIZE]);
                if let Some(props) = Self::parse(&record) {
                    let offset = (start + at) as u32;
                    trace!("Properties found at {:#x}", region.base() + offset);
                    return Ok(Some((offset, props)));
                }
            }
            start += step;
        }
        Ok(None)
    }
}

/// Signing certificate embedded in the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Certificate {
    pub flags: [u8; 3],
    /// Compressed secp256k1 public key.
    pub public_key: [u8; PUBLIC_KEY_SIZE],
    pub version: u32,
    /// Signature by the issuer. Not checked, there is no chain root.
    pub issuer_signature: [u8; 64],
}

impl Certificate {
    pub const SIZE: usize = CERTIFICATE_SIZE;

    pub fn new(public_key: [u8; PUBLIC_KEY_SIZE], version: u32) -> Self {
        Self {
            flags: [0; 3],
            public_key,
            version,
            issuer_signature: [0; 64],
        }
    }

    pub fn parse(bytes: &[u8; CERTIFICATE_SIZE]) -> Option<Self> {
        if bytes[0] != CERTIFICATE_STRUCT_VERSION {
            return None;
        }
        let mut flags = [0u8; 3];
        flags.copy_from_slice(&bytes[1..4]);
        let mut public_key = [0u8; PUBLIC_KEY_SIZE];
        public_key.copy_from_slice(&bytes[4..4 + PUBLIC_KEY_SIZE]);
        let mut issuer_signature = [0u8; 64];
        issuer_signature.copy_from_slice(&bytes[44..]);
        Some(Self {
            flags,
            public_key,
            version: le_u32(bytes, 40),
            issuer_signature,
        })
    }

    pub fn to_bytes(&self) -> [u8; CERTIFICATE_SIZE] {
        let mut out = [0u8; CERTIFICATE_SIZE];
        out[0] = CERTIFICATE_STRUCT_VERSION;
        out[1..4].copy_from_slice(&self.flags);
        out[4..4 + PUBLIC_KEY_SIZE].copy_from_slice(&self.public_key);
        out[40..44].copy_from_slice(&self.version.to_le_bytes());
        out[44..].copy_from_slice(&self.issuer_signature);
        out
    }

    /// Read the certificate at flash `address`. `None` when the certificate
    /// would not lie entirely inside `region` or does not parse.
    pub fn read_at<F: NorFlash>(flash: &mut Flash<F>, region: Region, address: u32) -> Result<Option<Self>, Error> {
        if !region.contains(address, CERTIFICATE_SIZE as u32) {
            warn!("Certificate address {:#x} outside of {:#x}..{:#x}", address, region.base(), region.end());
            return Ok(None);
        }
        let mut buf = [0u8; CERTIFICATE_SIZE];
        flash.read(address, &mut buf)?;
        Ok(Self::parse(&buf))
    }

    /// The certificate referenced by the bootloader's own properties.
    pub fn from_bootloader<F: NorFlash>(flash: &mut Flash<F>, bootloader: Region) -> Result<Option<Self>, Error> {
        let Some((_, props)) = AppProperties::scan(flash, bootloader)? else {
            warn!("No properties in the bootloader");
            return Ok(None);
        };
        if props.cert_address == 0 {
            return Ok(None);
        }
        Self::read_at(flash, bootloader, props.cert_address)
    }
}
