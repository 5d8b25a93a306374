// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Host to MCU firmware update protocol.
//! The host drives the update and the MCU answers every command with exactly
//! one acknowledgment, except for a one-shot delta finish which is answered
//! twice (`WillApplyPatch`, then the final status).

#![no_std]
use serde::{Deserialize, Serialize};

#[cfg(test)]
mod tests;

/// Maximum supported message size to be serialized or deserialized by `postcard`.
/// Messages larger than this will be rejected.
pub const COBS_MAX_MSG_SIZE: usize = 512;

/// How the new image is transferred.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FwupMode {
    /// Full image, written chunk by chunk at the given offsets
    Normal,
    /// Delta patch applied to flash as it streams in
    DeltaInline,
    /// Delta patch buffered in RAM and applied in one pass when finishing
    DeltaOneShot,
}

impl FwupMode {
    pub fn is_delta(&self) -> bool {
        !matches!(self, FwupMode::Normal)
    }
}

/// Result carried by every firmware update acknowledgment.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FwupStatus {
    Success,
    Error,
    /// The new image is not newer than the running one (finish only)
    VersionInvalid,
    /// The new image signature does not verify (finish only)
    SignatureInvalid,
    /// The patch is about to be applied, the final status follows (one-shot finish only)
    WillApplyPatch,
}

/// Firmware update commands and their acknowledgments.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fwup<'a> {
    /// Prepare the inactive slot for a new image
    Start { mode: FwupMode, patch_size: u32 },
    /// Start result with the largest chunk accepted by `Transfer`
    AckStart { status: FwupStatus, max_chunk_size: u32 },
    /// Image chunk (normal mode) or patch bytes (delta modes)
    Transfer {
        mode: FwupMode,
        sequence_id: u32,
        offset: u32,
        data: &'a [u8],
    },
    /// Transfer result
    AckTransfer { status: FwupStatus },
    /// Finalize and verify the new image
    Finish {
        mode: FwupMode,
        bl_upgrade: bool,
        app_properties_offset: u32,
        signature_offset: u32,
    },
    /// Finish result
    AckFinish { status: FwupStatus },
}

/// Framing errors reported back to the host
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PostcardError {
    /// Incoming frame exceeded `COBS_MAX_MSG_SIZE`
    OverFull,
    /// Incoming frame could not be deserialized
    Deser,
}

/// Current operational state of the MCU
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Running the application, no update session open
    Idle,
    /// A firmware update session is open
    FirmwareUpgrade,
    /// Device state is undefined or transitioning
    Unknown,
}

/// Top-level message types for host-target communication
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostProtocolMessage<'a> {
    /// Firmware update commands and acknowledgments
    Fwup(#[serde(borrow)] Fwup<'a>),
    /// Request device reset
    Reset,
    /// Query current device state
    GetState,
    /// Response with current state
    AckState(State),
    /// The last incoming frame was rejected
    PostcardError(PostcardError),
    /// The message is not a command the MCU accepts
    InappropriateMessage(State),
}
