// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Acceptance checks for a freshly written image.

use crate::flash::Flash;
use crate::properties::{AppProperties, Certificate, APP_PROPERTIES_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_TYPE_SECP256K1};
use crate::slots::{Region, SlotAddresses};
use crate::Error;
use embedded_storage::nor_flash::NorFlash;
use sha2::{Digest, Sha256};

pub const SIGNATURE_LEN: usize = 64;

const DIGEST_CHUNK: usize = 256;

/// Verification outcome. The codes are far apart bit-wise so a single
/// glitched bit cannot turn a failure into `Success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum VerifyResult {
    Success = 0x3CA5_5AC3,
    BadOffset = 0xC35A_A53C,
    CantFindProperties = 0x9669_6996,
    VersionInvalid = 0x6996_9669,
    CantFindCertificate = 0xA55A_C33C,
    SignatureInvalid = 0x5AA5_3CC3,
    FlashError = 0x0FF0_F00F,
    Unsupported = 0xF00F_0FF0,
}

impl VerifyResult {
    /// Code recorded in the audit trail.
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl From<Error> for VerifyResult {
    fn from(e: Error) -> Self {
        match e {
            Error::OutOfBounds | Error::Overflow => VerifyResult::BadOffset,
            _ => VerifyResult::FlashError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum VerificationResult {
    Valid = 0xcafebabe,
    Invalid = 0xdeadbeef,
}

/// ECC backend of the platform.
pub trait SignatureVerify {
    /// Check a compact secp256k1 `signature` of `digest` by the compressed
    /// public key `pubkey`.
    fn verify_ecdsa(&self, digest: [u8; 32], signature: [u8; SIGNATURE_LEN], pubkey: [u8; PUBLIC_KEY_SIZE]) -> VerificationResult;
}

impl<V: SignatureVerify> SignatureVerify for &V {
    fn verify_ecdsa(&self, digest: [u8; 32], signature: [u8; SIGNATURE_LEN], pubkey: [u8; PUBLIC_KEY_SIZE]) -> VerificationResult {
        (**self).verify_ecdsa(digest, signature, pubkey)
    }
}

/// SHA-256 of the first `len` bytes of `region`, streamed from flash.
pub fn image_digest<F: NorFlash>(flash: &mut Flash<F>, region: Region, len: u32) -> Result<[u8; 32], Error> {
    region.address(0, len)?;
    let mut sha = Sha256::new();
    let mut buf = [0u8; DIGEST_CHUNK];
    let mut offset = 0;
    while offset < len {
        let n = core::cmp::min(DIGEST_CHUNK as u32, len - offset) as usize;
        flash.read(region.base() + offset, &mut buf[..n])?;
        sha.update(&buf[..n]);
        offset += n as u32;
    }
    Ok(sha.finalize().into())
}

/// Decide whether the image in the target slot may be booted.
///
/// `properties_offset` and `signature_offset` are relative to the target
/// slot base and come from the host, so they are range checked first.
pub fn verify_new_app<F: NorFlash, V: SignatureVerify>(
    flash: &mut Flash<F>,
    slots: &SlotAddresses,
    verifier: &V,
    properties_offset: u32,
    signature_offset: u32,
) -> VerifyResult {
    match check_new_app(flash, slots, verifier, properties_offset, signature_offset) {
        Ok(result) | Err(result) => result,
    }
}

fn check_new_app<F: NorFlash, V: SignatureVerify>(
    flash: &mut Flash<F>,
    slots: &SlotAddresses,
    verifier: &V,
    properties_offset: u32,
    signature_offset: u32,
) -> Result<VerifyResult, VerifyResult> {
    const CF1: u32 = 3;
    const CF2: u32 = 5;
    const CF3: u32 = 7;
    const CF4: u32 = 11;
    let mut control_flow_integrity_counter = 0;

    let slot_size = slots.slot_size();
    let fits = |offset: u32, len: u32| offset.checked_add(len).is_some_and(|end| end <= slot_size);
    if (slots.signature_size as usize) < SIGNATURE_LEN {
        return Err(VerifyResult::Unsupported);
    }
    // The whole signature area must fit, not only the bytes read from it.
    if !fits(properties_offset, APP_PROPERTIES_SIZE as u32) || !fits(signature_offset, slots.signature_size) {
        warn!("Bad offsets: properties {:#x}, signature {:#x}", properties_offset, signature_offset);
        return Err(VerifyResult::BadOffset);
    }

    let new = AppProperties::read_at(flash, slots.target, properties_offset)?.ok_or_else(|| {
        warn!("No properties at {:#x} in the new image", properties_offset);
        VerifyResult::CantFindProperties
    })?;
    let (_, current) = AppProperties::scan(flash, slots.current)?.ok_or_else(|| {
        warn!("No properties in the running image");
        VerifyResult::CantFindProperties
    })?;
    control_flow_integrity_counter += CF1;

    info!("Running version {}, new version {}", current.version, new.version);
    if new.version <= current.version {
        return Err(VerifyResult::VersionInvalid);
    }
    control_flow_integrity_counter += CF2;

    let certificate = Certificate::from_bootloader(flash, slots.bootloader)?.ok_or(VerifyResult::CantFindCertificate)?;
    if new.signature_type != SIGNATURE_TYPE_SECP256K1 {
        warn!("Unknown signature type {}", new.signature_type);
        return Err(VerifyResult::SignatureInvalid);
    }
    control_flow_integrity_counter += CF3;

    let digest = image_digest(flash, slots.target, slots.signed_len())?;
    let mut signature = [0u8; SIGNATURE_LEN];
    flash.read(slots.target.base() + signature_offset, &mut signature)?;

    if verifier.verify_ecdsa(digest, signature, certificate.public_key) == VerificationResult::Valid {
        control_flow_integrity_counter += CF4;
        if core::hint::black_box(control_flow_integrity_counter) == CF1 + CF2 + CF3 + CF4 {
            return Ok(VerifyResult::Success);
        }
    }
    warn!("Signature rejected");
    Err(VerifyResult::SignatureInvalid)
}

/// Bootloader self update has no chain of trust defined and is refused.
pub fn verify_new_bootloader() -> VerifyResult {
    warn!("Bootloader update is not supported");
    VerifyResult::Unsupported
}
