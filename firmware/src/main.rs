// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]
#![no_main]

mod comms;
mod config;
mod telemetry;
mod verify;

// global logger
#[cfg(feature = "debug")]
use defmt_rtt as _;
// time driver
use embassy_nrf as _;
use panic_probe as _;

use comms::comms_task;
use consts::{ACTIVE_SLOT_ADDR, FWUP_CHUNK_SIZE, ONESHOT_PATCH_CAPACITY};
use core::cell::RefCell;
use defmt::{info, unwrap};
use embassy_executor::Spawner;
use embassy_nrf::buffered_uarte::{self, BufferedUarte, BufferedUarteTx};
use embassy_nrf::gpio::{Level, Output, OutputDrive};
use embassy_nrf::nvmc::Nvmc;
use embassy_nrf::peripherals::{self, RNG, UARTE0};
use embassy_nrf::rng::{self, Rng};
use embassy_nrf::{bind_interrupts, uarte};
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_storage::nor_flash::ReadNorFlash;
use fwup::{Fwup, FwupConfig, SlotLayout};
use static_cell::ConstStaticCell;
use telemetry::SessionTelemetry;
use verify::EccVerifier;

bind_interrupts!(struct Irqs {
    UARTE0_UART0 => buffered_uarte::InterruptHandler<UARTE0>;
    RNG => rng::InterruptHandler<peripherals::RNG>;
});

/// Hardware RNG, used for the random delays around signature checks.
pub static RNG_HW: Mutex<ThreadModeRawMutex, RefCell<Option<Rng<'static, RNG>>>> = Mutex::new(RefCell::new(None));

#[cfg(not(feature = "debug"))]
mod dummy_logging {
    #[defmt::global_logger]
    struct Logger;

    unsafe impl defmt::Logger for Logger {
        fn acquire() {}

        unsafe fn flush() {}

        unsafe fn release() {}

        unsafe fn write(_bytes: &[u8]) {}
    }
}

/// The update engine as driven by the comms task.
pub type FirmwareUpdate = Fwup<'static, Nvmc<'static>, EccVerifier, SessionTelemetry>;

pub type HostTx = BufferedUarteTx<'static, UARTE0>;

static PATCH_BUFFER: ConstStaticCell<[u8; ONESHOT_PATCH_CAPACITY]> = ConstStaticCell::new([0; ONESHOT_PATCH_CAPACITY]);
static UART_RX_BUFFER: ConstStaticCell<[u8; 1024]> = ConstStaticCell::new([0; 1024]);
static UART_TX_BUFFER: ConstStaticCell<[u8; 1024]> = ConstStaticCell::new([0; 1024]);

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_nrf::init(Default::default());

    let rng = Rng::new(p.RNG, Irqs);
    RNG_HW.lock(|f| f.borrow_mut().replace(rng));

    // Slot roles come from the indicator the bootloader left in flash.
    let mut flash = Nvmc::new(p.NVMC);
    let mut indicator = [0; 4];
    unwrap!(flash.read(ACTIVE_SLOT_ADDR, &mut indicator), "Reading the active slot failed");
    let layout = unwrap!(SlotLayout::board(), "Invalid board layout");
    let slots = layout.resolve(u32::from_le_bytes(indicator));
    info!("Running from slot {:?}, updates go to {:#x}", slots.active, slots.target.base());

    let fwup = unwrap!(
        Fwup::new(
            flash,
            FwupConfig::new(slots, FWUP_CHUNK_SIZE),
            EccVerifier,
            SessionTelemetry::new(),
            PATCH_BUFFER.take(),
        ),
        "Invalid update configuration"
    );

    let uart = {
        let mut uart_config = uarte::Config::default();
        uart_config.parity = uarte::Parity::EXCLUDED;
        uart_config.baudrate = config::UART_BAUDRATE;
        BufferedUarte::new(
            p.UARTE0,
            p.TIMER1,
            p.PPI_CH0,
            p.PPI_CH1,
            p.PPI_GROUP0,
            Irqs,
            p.P0_08,
            p.P0_06,
            uart_config,
            UART_RX_BUFFER.take(),
            UART_TX_BUFFER.take(),
        )
    };

    // nRF -> host IRQ output pin
    let irq_out = Output::new(p.P0_20, Level::High, OutputDrive::Standard);

    info!("Init tasks");
    unwrap!(spawner.spawn(comms_task(uart, irq_out, fwup)), "Spawning the comms task failed");
}
