// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::RNG_HW;
use cortex_m::prelude::_embedded_hal_blocking_delay_DelayMs;
use embassy_time::Delay;
use fwup::{SignatureVerify, VerificationResult};
use micro_ecc_sys::{uECC_decompress, uECC_secp256k1, uECC_valid_public_key, uECC_verify};

/// secp256k1 verification in micro-ecc.
pub struct EccVerifier;

impl SignatureVerify for EccVerifier {
    fn verify_ecdsa(&self, digest: [u8; 32], signature: [u8; 64], pubkey: [u8; 33]) -> VerificationResult {
        const UECC_SUCCESS: i32 = 1;
        const CFI_SUCCESS: u32 = CF1 + CF2;
        const CF1: u32 = 13;
        const CF2: u32 = 7;
        let mut control_flow_integrity_counter = 0;
        let mut uncompressed_pk = [0; 64];
        unsafe { uECC_decompress(pubkey.as_ptr(), uncompressed_pk.as_mut_ptr(), uECC_secp256k1()) };
        let res = unsafe { uECC_valid_public_key(uncompressed_pk.as_ptr(), uECC_secp256k1()) };
        if res == UECC_SUCCESS {
            control_flow_integrity_counter += CF1;
            random_delay(); // Random delay against glitch or timing attacks
            let res = unsafe {
                uECC_verify(
                    uncompressed_pk.as_ptr(),
                    digest.as_ptr(),
                    digest.len() as u32,
                    signature.as_ptr(),
                    uECC_secp256k1(),
                )
            };
            random_delay(); // Random delay against glitch or timing attacks
            if res == UECC_SUCCESS {
                control_flow_integrity_counter += CF2;
                // Second check against the complement, read back volatile.
                let complement = !UECC_SUCCESS;
                let complement_ptr = &complement as *const i32;
                if !res == unsafe { complement_ptr.read_volatile() } && control_flow_integrity_counter == CFI_SUCCESS {
                    return VerificationResult::Valid;
                }
            }
        }
        VerificationResult::Invalid
    }
}

/// Block for 0 to 199 ms, drawn from the hardware RNG. No delay before the
/// RNG is installed.
fn random_delay() {
    RNG_HW.lock(|rng| {
        let mut rng = rng.borrow_mut();
        if let Some(rng) = rng.as_mut() {
            let mut bytes = [0; 1];
            rng.blocking_fill_bytes(&mut bytes);
            Delay.delay_ms(bytes[0] % 200);
        }
    });
}
