// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Update session orchestration.
//!
//! ```text
//! Idle --start--> Collecting --transfer*--> Collecting --finish--> Done
//!                     |                                    ^
//!                     +--begin_finish (one-shot)--> Applying --complete_finish
//! ```
//!
//! `start` may be called in any state and always begins a fresh session.

use crate::delta::{DeltaSession, STAGE_SIZE};
use crate::flash::Flash;
use crate::slots::SlotAddresses;
use crate::verify::{verify_new_app, verify_new_bootloader, SignatureVerify, VerifyResult};
use crate::Error;
use embedded_storage::nor_flash::NorFlash;
use host_protocol::{FwupMode, FwupStatus};

/// Hooks for the performance counter and audit log of the platform.
pub trait Telemetry {
    /// A session started; restart the transfer interval measurement.
    fn reset_transfer_timer(&mut self) {}

    /// Outcome of the checks at finish.
    fn record_verify_outcome(&mut self, _result: VerifyResult) {}
}

pub struct NoTelemetry;

impl Telemetry for NoTelemetry {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FwupConfig {
    pub slots: SlotAddresses,
    /// Accept `finish` with the bootloader upgrade flag.
    pub allow_bootloader_upgrade: bool,
    /// Largest chunk accepted per transfer, and the stride of sequence ids.
    pub max_chunk_size: u32,
}

impl FwupConfig {
    pub fn new(slots: SlotAddresses, max_chunk_size: u32) -> Self {
        Self {
            slots,
            allow_bootloader_upgrade: false,
            max_chunk_size,
        }
    }

    fn validate(&self, write_size: usize) -> Result<(), Error> {
        let write_size = u32::try_from(write_size).map_err(|_| Error::InvalidConfig)?;
        if self.max_chunk_size == 0
            || self.max_chunk_size % write_size != 0
            || self.max_chunk_size > self.slots.slot_size()
        {
            return Err(Error::InvalidConfig);
        }
        if STAGE_SIZE as u32 % write_size != 0 || self.slots.page_size % write_size != 0 {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    Idle,
    Collecting { mode: FwupMode },
    /// One-shot patch buffered, waiting for `complete_finish`.
    Applying,
    /// Finished; a reset is expected.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartResponse {
    pub status: FwupStatus,
    pub max_chunk_size: u32,
}

/// Token for the slow half of a one-shot finish. Only the engine creates it.
#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub struct PendingPatch {
    bl_upgrade: bool,
    properties_offset: u32,
    signature_offset: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub enum FinishStep {
    /// Final status, to be sent to the host.
    Complete(FwupStatus),
    /// Tell the host the patch is about to be applied, then call
    /// [`Fwup::complete_finish`].
    WillApplyPatch(PendingPatch),
}

/// The update engine. There is one per device and every command goes
/// through `&mut self`, so at most one session exists.
pub struct Fwup<'a, F, V, T = NoTelemetry> {
    flash: Flash<F>,
    config: FwupConfig,
    verifier: V,
    telemetry: T,
    /// Holds a one-shot patch until finish.
    patch_buffer: &'a mut [u8],
    state: SessionState,
    delta: Option<DeltaSession>,
}

impl<'a, F: NorFlash, V: SignatureVerify, T: Telemetry> Fwup<'a, F, V, T> {
    pub fn new(flash: F, config: FwupConfig, verifier: V, telemetry: T, patch_buffer: &'a mut [u8]) -> Result<Self, Error> {
        let flash = Flash::new(flash, config.slots.page_size)?;
        config.validate(flash.write_size())?;
        Ok(Self {
            flash,
            config,
            verifier,
            telemetry,
            patch_buffer,
            state: SessionState::Idle,
            delta: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// A session is collecting data or applying a patch. The update pending
    /// flag follows this.
    pub fn session_open(&self) -> bool {
        matches!(self.state, SessionState::Collecting { .. } | SessionState::Applying)
    }

    /// A finish ran to the end, whatever its outcome. The session is over and
    /// the device must reboot. Finishes refused before that leave the
    /// session as it was.
    pub fn reset_required(&self) -> bool {
        self.state == SessionState::Done
    }

    pub fn config(&self) -> &FwupConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &T {
        &self.telemetry
    }

    pub fn flash_mut(&mut self) -> &mut Flash<F> {
        &mut self.flash
    }

    pub fn release(self) -> F {
        self.flash.release()
    }

    /// Begin a session. A full update erases the whole target slot, a delta
    /// update only its signature page.
    pub fn start(&mut self, mode: FwupMode, patch_size: u32) -> StartResponse {
        self.delta = None;
        self.state = SessionState::Idle;

        match self.prepare(mode, patch_size) {
            Ok(()) => {
                info!("Update started: {:?}", mode);
                self.state = SessionState::Collecting { mode };
                self.telemetry.reset_transfer_timer();
                StartResponse {
                    status: FwupStatus::Success,
                    max_chunk_size: self.config.max_chunk_size,
                }
            }
            Err(e) => {
                error!("Update start failed: {:?}", e);
                self.delta = None;
                StartResponse {
                    status: FwupStatus::Error,
                    max_chunk_size: 0,
                }
            }
        }
    }

    fn prepare(&mut self, mode: FwupMode, patch_size: u32) -> Result<(), Error> {
        let slots = self.config.slots;
        if mode.is_delta() {
            let session = DeltaSession::new(mode, patch_size, slots.current, slots.patch_region(), self.patch_buffer.len())?;
            self.flash.erase_last_page(slots.target_signature)?;
            self.delta = Some(session);
        } else {
            self.flash.erase(slots.target.base(), slots.target.size())?;
        }
        Ok(())
    }

    /// Accept one chunk. Chunk `sequence_id` starts at
    /// `sequence_id * max_chunk_size`, shifted by `offset`.
    pub fn transfer(&mut self, mode: FwupMode, sequence_id: u32, offset: u32, data: &[u8]) -> FwupStatus {
        let SessionState::Collecting { mode: session_mode } = self.state else {
            warn!("Transfer outside of a session");
            return FwupStatus::Error;
        };
        let max_chunk_size = self.config.max_chunk_size;
        if data.len() > max_chunk_size as usize {
            warn!("Chunk of {} bytes exceeds {}", data.len(), max_chunk_size);
            return FwupStatus::Error;
        }
        let Some(position) = sequence_id.checked_mul(max_chunk_size).and_then(|p| p.checked_add(offset)) else {
            warn!("Chunk position overflows: sequence {} offset {}", sequence_id, offset);
            return FwupStatus::Error;
        };

        let result = match mode {
            FwupMode::Normal => self.write_image(session_mode, position, data),
            _ if mode == session_mode => self.write_patch(position, data),
            _ => Err(Error::InvalidConfig),
        };
        match result {
            Ok(()) => FwupStatus::Success,
            Err(e) => {
                warn!("Transfer of sequence {} failed: {:?}", sequence_id, e);
                FwupStatus::Error
            }
        }
    }

    fn write_image(&mut self, session_mode: FwupMode, position: u32, data: &[u8]) -> Result<(), Error> {
        let slots = self.config.slots;
        let len = u32::try_from(data.len()).map_err(|_| Error::Overflow)?;
        let address = slots.target.address(position, len)?;
        // During a delta session the patch owns everything but the signature page.
        if session_mode.is_delta() && address < slots.signature_page() {
            return Err(Error::OutOfBounds);
        }
        self.flash.write(address, data)
    }

    fn write_patch(&mut self, position: u32, data: &[u8]) -> Result<(), Error> {
        let session = self.delta.as_mut().ok_or(Error::InvalidConfig)?;
        if position != session.received() {
            warn!("Patch chunk at {} while expecting {}", position, session.received());
            return Err(Error::OutOfBounds);
        }
        if let Err(e) = session.transfer(&mut self.flash, self.patch_buffer, data) {
            error!("Patch rejected, session aborted: {:?}", e);
            self.delta = None;
            self.state = SessionState::Idle;
            return Err(e);
        }
        Ok(())
    }

    /// First half of finish. One-shot delta sessions return
    /// [`FinishStep::WillApplyPatch`]; everything else completes here.
    pub fn begin_finish(
        &mut self,
        mode: FwupMode,
        bl_upgrade: bool,
        properties_offset: u32,
        signature_offset: u32,
    ) -> FinishStep {
        let SessionState::Collecting { mode: session_mode } = self.state else {
            warn!("Finish outside of a session");
            return FinishStep::Complete(FwupStatus::Error);
        };
        if bl_upgrade && !self.config.allow_bootloader_upgrade {
            warn!("Bootloader upgrade not allowed");
            return FinishStep::Complete(FwupStatus::Error);
        }
        if mode != session_mode {
            warn!("Finish {:?} in a {:?} session", mode, session_mode);
            return FinishStep::Complete(FwupStatus::Error);
        }

        let pending = PendingPatch {
            bl_upgrade,
            properties_offset,
            signature_offset,
        };
        if session_mode == FwupMode::DeltaOneShot {
            self.state = SessionState::Applying;
            FinishStep::WillApplyPatch(pending)
        } else {
            FinishStep::Complete(self.conclude(pending))
        }
    }

    /// Second half of a one-shot finish: apply the buffered patch and verify.
    pub fn complete_finish(&mut self, pending: PendingPatch) -> FwupStatus {
        if self.state != SessionState::Applying {
            return FwupStatus::Error;
        }
        self.conclude(pending)
    }

    /// Both halves of finish, for callers that send a single response.
    pub fn finish(&mut self, mode: FwupMode, bl_upgrade: bool, properties_offset: u32, signature_offset: u32) -> FwupStatus {
        match self.begin_finish(mode, bl_upgrade, properties_offset, signature_offset) {
            FinishStep::Complete(status) => status,
            FinishStep::WillApplyPatch(pending) => self.complete_finish(pending),
        }
    }

    fn conclude(&mut self, pending: PendingPatch) -> FwupStatus {
        if let Some(mut session) = self.delta.take() {
            if let Err(e) = session.finish(&mut self.flash, self.patch_buffer) {
                error!("Patch could not be applied: {:?}", e);
                self.state = SessionState::Idle;
                return FwupStatus::Error;
            }
        }

        let result = if pending.bl_upgrade {
            verify_new_bootloader()
        } else {
            verify_new_app(
                &mut self.flash,
                &self.config.slots,
                &self.verifier,
                pending.properties_offset,
                pending.signature_offset,
            )
        };
        info!("Verification result {:?} ({:#x})", result, result.code());
        self.telemetry.record_verify_outcome(result);
        self.state = SessionState::Done;

        match result {
            VerifyResult::Success => FwupStatus::Success,
            VerifyResult::VersionInvalid => FwupStatus::VersionInvalid,
            VerifyResult::SignatureInvalid => FwupStatus::SignatureInvalid,
            _ => FwupStatus::Error,
        }
    }
}
