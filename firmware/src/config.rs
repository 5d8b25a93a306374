// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

/// UART link to the host.
pub const UART_BAUDRATE: embassy_nrf::uarte::Baudrate = embassy_nrf::uarte::Baudrate::BAUD460800;
