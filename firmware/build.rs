// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! This build script writes the `memory.x` file into a directory where the
//! linker can always find it at build time, and requests a rebuild whenever
//! the flash layout changes.
//!
//! Images are position dependent, so one is built per slot: slot A by
//! default, slot B with the `slot-b` feature. An update is built for the slot
//! it will be written to, the inactive one. The last page of the slot holds
//! the signature and is left out of the FLASH region.

use consts::{FLASH_PAGE, SLOT_A_BASE, SLOT_B_BASE, SLOT_SIZE};
use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

fn main() {
    // Put `memory.x` in our output directory and ensure it's
    // on the linker search path.
    let out = &PathBuf::from(env::var_os("OUT_DIR").unwrap());

    let slot_base = match env::var_os("CARGO_FEATURE_SLOT_B") {
        Some(_) => SLOT_B_BASE,
        None => SLOT_A_BASE,
    };

    let memory_x_content = format!(
        r##"
        SLOT_BASE = {:#X};
        SLOT_SIZE = {:#X};

        MEMORY
        {{
            /* NOTE 1 K = 1 KiBi = 1024 bytes */
            FLASH (rx) : ORIGIN = SLOT_BASE, LENGTH = SLOT_SIZE - {:#X}
            RAM : ORIGIN = 0x20000000, LENGTH = 256K
        }}
        "##,
        slot_base, SLOT_SIZE, FLASH_PAGE
    );
    File::create(out.join("./memory.x"))
        .unwrap()
        .write_all(memory_x_content.as_bytes())
        .unwrap();

    println!("cargo:rustc-link-search={}", out.display());
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../consts/src/lib.rs");

    println!("cargo:rustc-link-arg-bins=--nmagic");
    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
}
