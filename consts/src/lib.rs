// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Board flash layout and firmware update constants shared by the firmware,
//! the update engine and the host tools.

#![no_std]

/// Size of a flash memory page in bytes (4KB).
/// Erase operations work on whole pages, so every slot base and size below is
/// a multiple of this value.
pub const FLASH_PAGE: u32 = 4096;

/// Start of the bootloader in flash.
/// The bootloader is read-only for the update engine; it is only scanned for
/// its own application properties to find the signing certificate.
pub const BOOTLOADER_BASE: u32 = 0x0000_0000;

/// Size of the bootloader region (32KB).
pub const BOOTLOADER_SIZE: u32 = 0x0000_8000;

/// Base address of application slot A.
pub const SLOT_A_BASE: u32 = BOOTLOADER_BASE + BOOTLOADER_SIZE;

/// Size of one application slot (480KB). Both slots have the same size.
pub const SLOT_SIZE: u32 = 0x0007_8000;

/// Base address of application slot B, directly after slot A.
pub const SLOT_B_BASE: u32 = SLOT_A_BASE + SLOT_SIZE;

/// Size of the application signature stored at the very end of a slot.
/// Compact secp256k1 ECDSA signature (r || s).
pub const SIGNATURE_SIZE: u32 = 64;

/// Flash word holding the active slot indicator written by the bootloader.
/// Placed in the page right after slot B.
pub const ACTIVE_SLOT_ADDR: u32 = SLOT_B_BASE + SLOT_SIZE;

/// Active slot indicator value for slot A.
/// The values differ in many bits so a single flipped bit cannot turn one
/// into the other.
pub const ACTIVE_SLOT_A: u32 = 0x5A5A_0A0A;

/// Active slot indicator value for slot B.
pub const ACTIVE_SLOT_B: u32 = 0xA5A5_0B0B;

/// Maximum number of image bytes carried by one transfer command.
/// Must be a multiple of the flash write size and fit in one framed message.
#[cfg(not(feature = "dle"))]
pub const FWUP_CHUNK_SIZE: u32 = 256;

/// Maximum number of image bytes carried by one transfer command.
/// Larger chunks are possible when the link supports data length extension.
#[cfg(feature = "dle")]
pub const FWUP_CHUNK_SIZE: u32 = 448;

/// Capacity of the RAM buffer holding a one-shot delta patch (32KB).
pub const ONESHOT_PATCH_CAPACITY: usize = 32 * 1024;

/// Delay between the final update response and the MCU reset, so the host
/// has time to read the response.
pub const RESET_SETTLE_MS: u64 = 1000;
