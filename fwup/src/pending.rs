// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Update pending flags, read by power management and boot completion.
//!
//! The engine never sets these; the caller marks an update pending once a
//! session has started.

use core::sync::atomic::{AtomicBool, Ordering};

static FWUP_PENDING: AtomicBool = AtomicBool::new(false);
static COPROC_FWUP_PENDING: AtomicBool = AtomicBool::new(false);

/// Whether an update of this core or of the coprocessor is pending.
pub fn fwup_in_progress() -> bool {
    FWUP_PENDING.load(Ordering::Relaxed) || COPROC_FWUP_PENDING.load(Ordering::Relaxed)
}

pub fn mark_pending(pending: bool) {
    FWUP_PENDING.store(pending, Ordering::Relaxed);
}

pub fn mark_coproc_pending(pending: bool) {
    COPROC_FWUP_PENDING.store(pending, Ordering::Relaxed);
}
