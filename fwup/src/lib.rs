// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Firmware update engine.
//!
//! Writes a new image into the inactive A/B slot, either as a full image or
//! rebuilt from the running image with a delta patch, then checks the image
//! properties, the anti-rollback version and the signature against the
//! certificate embedded in the bootloader.
//!
//! The engine is driven by the `Start`, `Transfer` and `Finish` commands of
//! [`host_protocol::Fwup`] and answers each with a [`host_protocol::FwupStatus`].

#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod delta;
mod engine;
mod error;
pub mod flash;
#[cfg(any(test, feature = "mem-flash"))]
pub mod mem;
pub mod pending;
pub mod properties;
pub mod slots;
pub mod verify;

#[cfg(test)]
mod tests;

pub use engine::{FinishStep, Fwup, FwupConfig, NoTelemetry, PendingPatch, SessionState, StartResponse, Telemetry};
pub use error::Error;
pub use host_protocol::{FwupMode, FwupStatus};
pub use slots::{Region, Slot, SlotAddresses, SlotLayout};
pub use verify::{SignatureVerify, VerificationResult, VerifyResult};
