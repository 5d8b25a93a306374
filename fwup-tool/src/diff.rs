//! Delta patch generation.
//!
//! Greedy: at every position of the new image look for the longest run that
//! also exists in the old image, either right at the source cursor or at any
//! position indexed by its first bytes. Long runs become COPY (preceded by a
//! SEEK when the source jumps). Bytes in between become a DIFF against the
//! source cursor when they mostly agree with it, an INSERT otherwise.

use {
    fwup::delta::{OP_COPY, OP_DIFF, OP_INSERT, OP_SEEK, PATCH_MAGIC},
    std::collections::HashMap,
};

/// Bytes hashed to find match candidates.
const KEY: usize = 8;
/// Shortest run worth a COPY.
const MIN_COPY: usize = 24;
/// Candidates remembered per key.
const MAX_CANDIDATES: usize = 16;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub copied: usize,
    pub diffed: usize,
    pub inserted: usize,
    pub seeks: usize,
}

#[derive(Debug)]
pub enum Error {
    /// Source jump does not fit the SEEK operand.
    SeekTooFar(i64),
    TooLarge(usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::SeekTooFar(delta) => write!(f, "source seek of {delta} bytes does not fit a patch op"),
            Error::TooLarge(len) => write!(f, "{len} bytes do not fit a patch"),
        }
    }
}

impl std::error::Error for Error {}

/// Patch turning `old` into `new`.
pub fn diff(old: &[u8], new: &[u8]) -> Result<(Vec<u8>, Stats), Error> {
    let mut patch = Patch::new(new.len())?;
    let index = index(old);

    let mut src = 0usize;
    let mut literal_start = 0usize;
    let mut i = 0usize;
    while i < new.len() {
        let (at, len) = longest_match(old, new, i, src, &index);
        if len < MIN_COPY {
            i += 1;
            continue;
        }
        src = patch.literal(old, src, &new[literal_start..i], Some(at))?;
        if at != src {
            patch.seek(at as i64 - src as i64)?;
        }
        patch.copy(len)?;
        src = at + len;
        i += len;
        literal_start = i;
    }
    patch.literal(old, src, &new[literal_start..], None)?;

    log::debug!("patch stats: {:?}", patch.stats);
    Ok((patch.bytes, patch.stats))
}

/// The new image without trailing erased bytes, limited to what a patch can
/// produce. The signature page is transferred separately.
pub fn patch_target(image: &[u8], patch_len: usize) -> &[u8] {
    let image = &image[..image.len().min(patch_len)];
    let end = image.iter().rposition(|&b| b != 0xFF).map_or(0, |last| last + 1);
    &image[..end]
}

fn index(old: &[u8]) -> HashMap<&[u8], Vec<usize>> {
    let mut index: HashMap<&[u8], Vec<usize>> = HashMap::new();
    for (at, key) in old.windows(KEY).enumerate() {
        let candidates = index.entry(key).or_default();
        if candidates.len() < MAX_CANDIDATES {
            candidates.push(at);
        }
    }
    index
}

fn match_len(old: &[u8], new: &[u8]) -> usize {
    old.iter().zip(new).take_while(|(a, b)| a == b).count()
}

/// Longest run of `new[i..]` found in `old`, preferring the source cursor.
fn longest_match(old: &[u8], new: &[u8], i: usize, src: usize, index: &HashMap<&[u8], Vec<usize>>) -> (usize, usize) {
    let mut best = (src, old.get(src..).map_or(0, |old| match_len(old, &new[i..])));
    if let Some(candidates) = new.get(i..i + KEY).and_then(|key| index.get(key)) {
        for &at in candidates {
            let len = match_len(&old[at..], &new[i..]);
            if len > best.1 {
                best = (at, len);
            }
        }
    }
    best
}

struct Patch {
    bytes: Vec<u8>,
    stats: Stats,
}

impl Patch {
    fn new(target_size: usize) -> Result<Self, Error> {
        let mut bytes = PATCH_MAGIC.to_vec();
        bytes.extend_from_slice(&len_u32(target_size)?.to_le_bytes());
        Ok(Self {
            bytes,
            stats: Stats::default(),
        })
    }

    fn op(&mut self, tag: u8, operand: [u8; 4]) {
        self.bytes.push(tag);
        self.bytes.extend_from_slice(&operand);
    }

    fn copy(&mut self, len: usize) -> Result<(), Error> {
        self.op(OP_COPY, len_u32(len)?.to_le_bytes());
        self.stats.copied += len;
        Ok(())
    }

    fn seek(&mut self, delta: i64) -> Result<(), Error> {
        let delta = i32::try_from(delta).map_err(|_| Error::SeekTooFar(delta))?;
        self.op(OP_SEEK, delta.to_le_bytes());
        self.stats.seeks += 1;
        Ok(())
    }

    /// Emit bytes without a long match, followed by a copy from `next` if
    /// any. Returns the new source cursor.
    fn literal(&mut self, old: &[u8], src: usize, data: &[u8], next: Option<usize>) -> Result<usize, Error> {
        if data.is_empty() {
            return Ok(src);
        }
        let len = len_u32(data.len())?.to_le_bytes();
        // Bytes replaced in place keep the source in step with the output.
        let in_place = next == Some(src + data.len());
        match old.get(src..src + data.len()) {
            Some(source) if in_place || 2 * match_len_total(source, data) >= data.len() => {
                self.op(OP_DIFF, len);
                self.bytes
                    .extend(source.iter().zip(data).map(|(s, d)| d.wrapping_sub(*s)));
                self.stats.diffed += data.len();
                Ok(src + data.len())
            }
            _ => {
                self.op(OP_INSERT, len);
                self.bytes.extend_from_slice(data);
                self.stats.inserted += data.len();
                Ok(src)
            }
        }
    }
}

fn match_len_total(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).filter(|(a, b)| a == b).count()
}

fn len_u32(len: usize) -> Result<u32, Error> {
    u32::try_from(len).map_err(|_| Error::TooLarge(len))
}
