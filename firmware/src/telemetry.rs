// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use defmt::{info, warn};
use embassy_time::Instant;
use fwup::{Telemetry, VerifyResult};

/// Times update sessions and logs verification outcomes.
pub struct SessionTelemetry {
    started: Option<Instant>,
}

impl SessionTelemetry {
    pub const fn new() -> Self {
        Self { started: None }
    }
}

impl Telemetry for SessionTelemetry {
    fn reset_transfer_timer(&mut self) {
        self.started = Some(Instant::now());
    }

    fn record_verify_outcome(&mut self, result: VerifyResult) {
        let elapsed = self.started.take().map_or(0, |started| started.elapsed().as_millis());
        match result {
            VerifyResult::Success => info!("New image verified, session took {} ms", elapsed),
            _ => warn!(
                "New image rejected after {} ms: {:?} ({=u32:#x})",
                elapsed,
                result,
                result.code()
            ),
        }
    }
}
