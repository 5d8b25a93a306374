// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Delta patch applier.
//!
//! Rebuilds the new image in the target slot from the running image and a
//! stream of patch instructions. The patch can arrive in arbitrary pieces;
//! the decoder keeps its position between calls.
//!
//! # Patch format
//!
//! All integers are little endian.
//!
//! ```text
//! header   "FWDP" | target_size: u32
//! COPY     0x01 | len: u32                  copy len bytes at the source cursor
//! DIFF     0x02 | len: u32 | bytes[len]     source byte + patch byte (wrapping)
//! INSERT   0x03 | len: u32 | bytes[len]     literal bytes
//! SEEK     0x04 | delta: i32                move the source cursor
//! ```
//!
//! COPY and DIFF advance the source cursor. The patch ends exactly when
//! `target_size` bytes have been produced.
//!
//! Target pages are erased right before the output first reaches them, so a
//! delta update never erases the whole slot up front.

use crate::flash::Flash;
use crate::slots::Region;
use crate::Error;
use embedded_storage::nor_flash::NorFlash;
use heapless::Vec;
use host_protocol::FwupMode;

pub const PATCH_MAGIC: [u8; 4] = *b"FWDP";
pub const PATCH_HEADER_SIZE: usize = 8;

pub const OP_COPY: u8 = 0x01;
pub const OP_DIFF: u8 = 0x02;
pub const OP_INSERT: u8 = 0x03;
pub const OP_SEEK: u8 = 0x04;

/// Output staging buffer. Flash writes are issued in multiples of the write
/// size, so the write size must divide this.
pub const STAGE_SIZE: usize = 64;

const OP_FIELD_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PatchError {
    BadMagic,
    UnknownOp(u8),
    /// Header announces more output than the target region holds.
    TargetTooLarge,
    /// COPY or DIFF reads past the running image.
    SourceOutOfBounds,
    /// An op produces more than the announced target size.
    OutputOverflow,
    SeekOutOfBounds,
    /// Bytes after the last op.
    TrailingData,
    /// Finish before the whole patch arrived or was applied.
    Incomplete,
    /// More bytes than announced at start.
    TooMuchData,
}

impl core::fmt::Display for PatchError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BadMagic => write!(f, "bad patch magic"),
            Self::UnknownOp(tag) => write!(f, "unknown patch op {tag:#04x}"),
            Self::TargetTooLarge => write!(f, "patch target larger than the slot"),
            Self::SourceOutOfBounds => write!(f, "patch reads past the running image"),
            Self::OutputOverflow => write!(f, "patch writes past its target size"),
            Self::SeekOutOfBounds => write!(f, "patch seeks outside the running image"),
            Self::TrailingData => write!(f, "data after the end of the patch"),
            Self::Incomplete => write!(f, "patch incomplete"),
            Self::TooMuchData => write!(f, "more patch data than announced"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decode {
    Header,
    Tag,
    Fields { tag: u8 },
    Diff { remaining: u32 },
    Insert { remaining: u32 },
    Done,
}

/// Streaming patch decoder writing straight to flash.
pub struct DeltaPatcher {
    source: Region,
    output: Region,
    target_size: u32,
    src_cursor: u32,
    out_cursor: u32,
    /// Output bytes already programmed; the stage holds what follows.
    flushed: u32,
    /// Output pages below this offset have been erased.
    erased_until: u32,
    state: Decode,
    fields: Vec<u8, PATCH_HEADER_SIZE>,
    stage: Vec<u8, STAGE_SIZE>,
}

impl DeltaPatcher {
    /// `source` is the running image, `output` the part of the target slot
    /// the patch may write.
    pub fn new(source: Region, output: Region) -> Self {
        Self {
            source,
            output,
            target_size: 0,
            src_cursor: 0,
            out_cursor: 0,
            flushed: 0,
            erased_until: 0,
            state: Decode::Header,
            fields: Vec::new(),
            stage: Vec::new(),
        }
    }

    pub fn source_cursor(&self) -> u32 {
        self.src_cursor
    }

    pub fn output_cursor(&self) -> u32 {
        self.out_cursor
    }

    /// The last op has been decoded.
    pub fn is_complete(&self) -> bool {
        self.state == Decode::Done
    }

    /// Decode and apply as much of `data` as possible.
    pub fn feed<F: NorFlash>(&mut self, flash: &mut Flash<F>, mut data: &[u8]) -> Result<(), Error> {
        while !data.is_empty() {
            match self.state {
                Decode::Header => {
                    let n = self.collect(data, PATCH_HEADER_SIZE);
                    data = &data[n..];
                    if self.fields.len() == PATCH_HEADER_SIZE {
                        self.parse_header()?;
                    }
                }
                Decode::Tag => {
                    let tag = data[0];
                    data = &data[1..];
                    match tag {
                        OP_COPY | OP_DIFF | OP_INSERT | OP_SEEK => self.state = Decode::Fields { tag },
                        _ => {
                            warn!("Unknown patch op {:#x} at output {}", tag, self.out_cursor);
                            return Err(PatchError::UnknownOp(tag).into());
                        }
                    }
                }
                Decode::Fields { tag } => {
                    let n = self.collect(data, OP_FIELD_SIZE);
                    data = &data[n..];
                    if self.fields.len() == OP_FIELD_SIZE {
                        let mut field = [0u8; OP_FIELD_SIZE];
                        field.copy_from_slice(&self.fields);
                        self.fields.clear();
                        self.start_op(flash, tag, field)?;
                    }
                }
                Decode::Diff { remaining } => {
                    let n = core::cmp::min(remaining as usize, data.len());
                    self.emit_diff(flash, &data[..n])?;
                    data = &data[n..];
                    self.state = match remaining - n as u32 {
                        0 => self.next_op(),
                        remaining => Decode::Diff { remaining },
                    };
                }
                Decode::Insert { remaining } => {
                    let n = core::cmp::min(remaining as usize, data.len());
                    self.emit(flash, &data[..n])?;
                    data = &data[n..];
                    self.state = match remaining - n as u32 {
                        0 => self.next_op(),
                        remaining => Decode::Insert { remaining },
                    };
                }
                Decode::Done => return Err(PatchError::TrailingData.into()),
            }
        }
        Ok(())
    }

    /// Program the remaining output and make sure nothing of an older image
    /// survives between the end of the new image and the signature page.
    pub fn finish<F: NorFlash>(&mut self, flash: &mut Flash<F>) -> Result<(), Error> {
        if self.state != Decode::Done {
            return Err(PatchError::Incomplete.into());
        }
        self.flush(flash, true)?;

        let page = flash.page_size();
        while self.erased_until < self.output.size() {
            let address = self.output.base() + self.erased_until;
            if !flash.is_erased(address, page)? {
                flash.erase(address, page)?;
            }
            self.erased_until += page;
        }
        info!(
            "Patch applied: {} bytes written, source cursor at {}",
            self.out_cursor,
            self.src_cursor
        );
        Ok(())
    }

    fn collect(&mut self, data: &[u8], want: usize) -> usize {
        let n = core::cmp::min(want - self.fields.len(), data.len());
        // Capacity is the header size, the largest field group.
        let _ = self.fields.extend_from_slice(&data[..n]);
        n
    }

    fn parse_header(&mut self) -> Result<(), Error> {
        if self.fields[..4] != PATCH_MAGIC {
            return Err(PatchError::BadMagic.into());
        }
        let target_size = u32::from_le_bytes([self.fields[4], self.fields[5], self.fields[6], self.fields[7]]);
        self.fields.clear();
        if target_size > self.output.size() {
            warn!("Patch target {} larger than {}", target_size, self.output.size());
            return Err(PatchError::TargetTooLarge.into());
        }
        debug!("Patch header: target size {}", target_size);
        self.target_size = target_size;
        self.state = self.next_op();
        Ok(())
    }

    fn next_op(&self) -> Decode {
        if self.out_cursor == self.target_size {
            Decode::Done
        } else {
            Decode::Tag
        }
    }

    fn start_op<F: NorFlash>(&mut self, flash: &mut Flash<F>, tag: u8, field: [u8; OP_FIELD_SIZE]) -> Result<(), Error> {
        if tag == OP_SEEK {
            let delta = i32::from_le_bytes(field);
            let cursor = i64::from(self.src_cursor) + i64::from(delta);
            if cursor < 0 || cursor > i64::from(self.source.size()) {
                return Err(PatchError::SeekOutOfBounds.into());
            }
            self.src_cursor = cursor as u32;
            self.state = self.next_op();
            return Ok(());
        }

        let len = u32::from_le_bytes(field);
        if len > self.target_size - self.out_cursor {
            return Err(PatchError::OutputOverflow.into());
        }
        if tag == OP_COPY || tag == OP_DIFF {
            let fits = self
                .src_cursor
                .checked_add(len)
                .is_some_and(|end| end <= self.source.size());
            if !fits {
                return Err(PatchError::SourceOutOfBounds.into());
            }
        }

        self.state = match tag {
            OP_COPY => {
                self.copy(flash, len)?;
                self.next_op()
            }
            OP_DIFF if len > 0 => Decode::Diff { remaining: len },
            OP_INSERT if len > 0 => Decode::Insert { remaining: len },
            _ => self.next_op(),
        };
        Ok(())
    }

    fn copy<F: NorFlash>(&mut self, flash: &mut Flash<F>, len: u32) -> Result<(), Error> {
        let mut buf = [0u8; STAGE_SIZE];
        let mut remaining = len;
        while remaining > 0 {
            let n = core::cmp::min(remaining, STAGE_SIZE as u32) as usize;
            flash.read(self.source.base() + self.src_cursor, &mut buf[..n])?;
            self.src_cursor += n as u32;
            self.emit(flash, &buf[..n])?;
            remaining -= n as u32;
        }
        Ok(())
    }

    fn emit_diff<F: NorFlash>(&mut self, flash: &mut Flash<F>, diff: &[u8]) -> Result<(), Error> {
        let mut buf = [0u8; STAGE_SIZE];
        for chunk in diff.chunks(STAGE_SIZE) {
            let out = &mut buf[..chunk.len()];
            flash.read(self.source.base() + self.src_cursor, out)?;
            for (byte, delta) in out.iter_mut().zip(chunk) {
                *byte = byte.wrapping_add(*delta);
            }
            self.src_cursor += chunk.len() as u32;
            self.emit(flash, &buf[..chunk.len()])?;
        }
        Ok(())
    }

    fn emit<F: NorFlash>(&mut self, flash: &mut Flash<F>, mut bytes: &[u8]) -> Result<(), Error> {
        while !bytes.is_empty() {
            let n = core::cmp::min(STAGE_SIZE - self.stage.len(), bytes.len());
            let _ = self.stage.extend_from_slice(&bytes[..n]);
            self.out_cursor += n as u32;
            bytes = &bytes[n..];
            if self.stage.is_full() {
                self.flush(flash, false)?;
            }
        }
        Ok(())
    }

    /// Program whole write units from the stage. With `pad` the last partial
    /// unit is filled with erased bytes and programmed too.
    fn flush<F: NorFlash>(&mut self, flash: &mut Flash<F>, pad: bool) -> Result<(), Error> {
        let write_size = flash.write_size();
        let staged = self.stage.len();
        let n = if pad {
            let padded = staged.div_ceil(write_size) * write_size;
            let _ = self.stage.resize(padded, 0xFF);
            padded
        } else {
            staged - staged % write_size
        };
        if n == 0 {
            return Ok(());
        }

        let end = self.flushed + n as u32;
        self.erase_through(flash, end)?;
        let address = self.output.address(self.flushed, n as u32)?;
        flash.write(address, &self.stage[..n])?;
        self.flushed = end;

        let rest = self.stage.len() - n;
        self.stage.copy_within(n.., 0);
        self.stage.truncate(rest);
        Ok(())
    }

    fn erase_through<F: NorFlash>(&mut self, flash: &mut Flash<F>, end: u32) -> Result<(), Error> {
        let page = flash.page_size();
        while self.erased_until < end {
            let address = self.output.address(self.erased_until, page)?;
            trace!("Erasing patch output page {:#x}", address);
            flash.erase(address, page)?;
            self.erased_until += page;
        }
        Ok(())
    }
}

/// A delta update in progress: receives patch bytes and feeds the patcher
/// either right away (inline) or at finish (one-shot).
pub struct DeltaSession {
    mode: FwupMode,
    patch_size: u32,
    received: u32,
    patcher: DeltaPatcher,
}

impl DeltaSession {
    /// Open a session for `patch_size` bytes. One-shot patches are buffered
    /// and must fit in `buffer_capacity`.
    pub fn new(
        mode: FwupMode,
        patch_size: u32,
        source: Region,
        output: Region,
        buffer_capacity: usize,
    ) -> Result<Self, Error> {
        match mode {
            FwupMode::Normal => return Err(Error::InvalidConfig),
            FwupMode::DeltaOneShot if patch_size as usize > buffer_capacity => {
                warn!("One-shot patch of {} bytes exceeds buffer of {}", patch_size, buffer_capacity);
                return Err(Error::PatchTooLarge);
            }
            _ => {}
        }
        info!("Delta session: {:?}, patch size {}", mode, patch_size);
        Ok(Self {
            mode,
            patch_size,
            received: 0,
            patcher: DeltaPatcher::new(source, output),
        })
    }

    pub fn mode(&self) -> FwupMode {
        self.mode
    }

    /// Patch bytes received so far.
    pub fn received(&self) -> u32 {
        self.received
    }

    pub fn patcher(&self) -> &DeltaPatcher {
        &self.patcher
    }

    pub fn transfer<F: NorFlash>(&mut self, flash: &mut Flash<F>, buffer: &mut [u8], data: &[u8]) -> Result<(), Error> {
        let len = u32::try_from(data.len()).map_err(|_| Error::Overflow)?;
        let end = self.received.checked_add(len).ok_or(Error::Overflow)?;
        if end > self.patch_size {
            return Err(PatchError::TooMuchData.into());
        }
        match self.mode {
            FwupMode::DeltaInline => self.patcher.feed(flash, data)?,
            FwupMode::DeltaOneShot => buffer
                .get_mut(self.received as usize..end as usize)
                .ok_or(Error::PatchTooLarge)?
                .copy_from_slice(data),
            FwupMode::Normal => return Err(Error::InvalidConfig),
        }
        self.received = end;
        Ok(())
    }

    /// Apply a buffered patch, then complete the output.
    pub fn finish<F: NorFlash>(&mut self, flash: &mut Flash<F>, buffer: &[u8]) -> Result<(), Error> {
        if self.received != self.patch_size {
            warn!("Patch incomplete: {} of {} bytes", self.received, self.patch_size);
            return Err(PatchError::Incomplete.into());
        }
        if self.mode == FwupMode::DeltaOneShot {
            let patch = buffer.get(..self.received as usize).ok_or(Error::PatchTooLarge)?;
            self.patcher.feed(flash, patch)?;
        }
        self.patcher.finish(flash)
    }
}
