// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::{FirmwareUpdate, HostTx};
use consts::RESET_SETTLE_MS;
use defmt::info;
use embassy_nrf::buffered_uarte::BufferedUarte;
use embassy_nrf::gpio::Output;
use embassy_nrf::peripherals::{TIMER1, UARTE0};
use embassy_time::Timer;
use embedded_io_async::Write;
use fwup::{pending, FinishStep, FwupStatus};
use host_protocol::{Fwup, HostProtocolMessage, PostcardError, State, COBS_MAX_MSG_SIZE};
use postcard::accumulator::{CobsAccumulator, FeedResult};
use postcard::to_slice_cobs;

/// Outgoing half of the host link. Every message is followed by a falling
/// edge on the IRQ line.
pub struct Link {
    tx: HostTx,
    irq_out: Output<'static>,
}

impl Link {
    async fn send(&mut self, msg: HostProtocolMessage<'_>) {
        let mut send_buf = [0u8; COBS_MAX_MSG_SIZE];

        if let Ok(cobs_tx) = to_slice_cobs(&msg, &mut send_buf) {
            let _ = self.tx.write_all(cobs_tx).await;
            let _ = self.tx.flush().await;
            self.assert_out_irq();
        }
    }

    fn assert_out_irq(&mut self) {
        // Ensure pin starts HIGH
        self.irq_out.set_high();

        // Generate falling edge pulse
        self.irq_out.set_low();
        self.irq_out.set_high();
    }
}

/// Main communication task: decodes COBS framed host messages and drives
/// the update engine.
#[embassy_executor::task]
pub async fn comms_task(uart: BufferedUarte<'static, UARTE0, TIMER1>, irq_out: Output<'static>, mut fwup: FirmwareUpdate) {
    // Split UART into RX and TX
    let (mut rx, tx) = uart.split();
    let mut link = Link { tx, irq_out };

    // Buffer for raw incoming UART data
    let mut raw_buf = [0u8; 64];

    // COBS accumulator for decoding incoming messages
    let mut cobs_buf: CobsAccumulator<COBS_MAX_MSG_SIZE> = CobsAccumulator::new();
    loop {
        // Exit if the UART failed
        let Ok(num) = rx.read(&mut raw_buf).await else {
            break;
        };

        let mut window = &raw_buf[..num];

        // Process all complete COBS messages in the buffer
        'cobs: while !window.is_empty() {
            window = match cobs_buf.feed_ref::<HostProtocolMessage>(window) {
                FeedResult::Consumed => {
                    break 'cobs;
                }
                FeedResult::OverFull(new_wind) => {
                    info!("overfull");
                    link.send(HostProtocolMessage::PostcardError(PostcardError::OverFull)).await;
                    new_wind
                }
                FeedResult::DeserError(new_wind) => {
                    info!("DeserError");
                    link.send(HostProtocolMessage::PostcardError(PostcardError::Deser)).await;
                    new_wind
                }
                FeedResult::Success { data, remaining } => {
                    match data {
                        HostProtocolMessage::Fwup(cmd) => {
                            fwup_handler(&mut link, &mut fwup, cmd).await;
                        }
                        HostProtocolMessage::Reset => {
                            cortex_m::peripheral::SCB::sys_reset();
                        }
                        HostProtocolMessage::GetState => {
                            link.send(HostProtocolMessage::AckState(get_state())).await;
                        }
                        HostProtocolMessage::AckState(_)
                        | HostProtocolMessage::PostcardError(_)
                        | HostProtocolMessage::InappropriateMessage(_) => {
                            link.send(HostProtocolMessage::InappropriateMessage(get_state())).await;
                        }
                    };
                    remaining
                }
            };
        }
    }
}

/// Runs one update command and answers it. A one-shot delta finish is
/// answered twice: once before the patch is applied, once with the outcome.
async fn fwup_handler(link: &mut Link, fwup: &mut FirmwareUpdate, cmd: Fwup<'_>) {
    match cmd {
        Fwup::Start { mode, patch_size } => {
            let response = fwup.start(mode, patch_size);
            link.send(HostProtocolMessage::Fwup(Fwup::AckStart {
                status: response.status,
                max_chunk_size: response.max_chunk_size,
            }))
            .await;
        }
        Fwup::Transfer {
            mode,
            sequence_id,
            offset,
            data,
        } => {
            let status = fwup.transfer(mode, sequence_id, offset, data);
            link.send(HostProtocolMessage::Fwup(Fwup::AckTransfer { status })).await;
        }
        Fwup::Finish {
            mode,
            bl_upgrade,
            app_properties_offset,
            signature_offset,
        } => {
            let status = match fwup.begin_finish(mode, bl_upgrade, app_properties_offset, signature_offset) {
                FinishStep::Complete(status) => status,
                FinishStep::WillApplyPatch(patch) => {
                    link.send(HostProtocolMessage::Fwup(Fwup::AckFinish {
                        status: FwupStatus::WillApplyPatch,
                    }))
                    .await;
                    fwup.complete_finish(patch)
                }
            };
            link.send(HostProtocolMessage::Fwup(Fwup::AckFinish { status })).await;
        }
        Fwup::AckStart { .. } | Fwup::AckTransfer { .. } | Fwup::AckFinish { .. } => {
            link.send(HostProtocolMessage::InappropriateMessage(get_state())).await;
            return;
        }
    }

    pending::mark_pending(fwup.session_open());

    // A concluded finish ends the session whatever its outcome.
    if fwup.reset_required() {
        info!("Update finished, resetting in {} ms", RESET_SETTLE_MS);
        // Give the host time to read the final response.
        Timer::after_millis(RESET_SETTLE_MS).await;
        cortex_m::peripheral::SCB::sys_reset();
    }
}

fn get_state() -> State {
    match pending::fwup_in_progress() {
        true => State::FirmwareUpgrade,
        false => State::Idle,
    }
}
