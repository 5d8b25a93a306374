use {
    super::image::{self, Image, PatchBuilder, TestFlash, PAGE, SLOT_SIZE},
    crate::{
        delta::{DeltaPatcher, DeltaSession, PatchError},
        flash::Flash,
        Error, FwupMode,
    },
};

fn setup(current: &Image) -> (Flash<TestFlash>, DeltaPatcher) {
    let flash = Flash::new(*image::flash_with(current), PAGE).unwrap();
    let slots = image::slots();
    (flash, DeltaPatcher::new(slots.current, slots.patch_region()))
}

fn output(flash: &mut Flash<TestFlash>) -> Vec<u8> {
    image::target_slot(flash.inner_mut())[..(SLOT_SIZE - PAGE) as usize].to_vec()
}

fn expected_output(image: &Image) -> Vec<u8> {
    image.bytes[..(SLOT_SIZE - PAGE) as usize].to_vec()
}

/// All ops together rebuild the new image, and the stale bytes of the
/// previous target image are gone.
#[test]
fn apply_whole_patch() {
    let (old, new, patch) = image::delta_fixture();
    let (mut flash, mut patcher) = setup(&old);

    patcher.feed(&mut flash, &patch).unwrap();
    assert!(patcher.is_complete());
    assert_eq!(patcher.output_cursor(), 6000);
    assert_eq!(patcher.source_cursor(), 6000);
    patcher.finish(&mut flash).unwrap();

    assert_eq!(output(&mut flash), expected_output(&new));
}

/// The decoder keeps its place however the patch is split.
#[test]
fn apply_patch_byte_by_byte() {
    let (old, new, patch) = image::delta_fixture();
    let (mut flash, mut patcher) = setup(&old);

    for byte in patch.chunks(1) {
        patcher.feed(&mut flash, byte).unwrap();
    }
    patcher.finish(&mut flash).unwrap();

    assert_eq!(output(&mut flash), expected_output(&new));
}

#[test]
fn apply_patch_odd_chunks() {
    let (old, new, patch) = image::delta_fixture();
    let (mut flash, mut patcher) = setup(&old);

    for chunk in patch.chunks(37) {
        patcher.feed(&mut flash, chunk).unwrap();
    }
    patcher.finish(&mut flash).unwrap();

    assert_eq!(output(&mut flash), expected_output(&new));
}

/// Pages are erased as the output reaches them, pages the output never
/// reaches are erased at finish only if they hold data.
#[test]
fn deferred_erase() {
    let old = Image::build(3000, 1, 0, 1);
    let (mut flash, mut patcher) = setup(&old);
    // Leave the last patch page already blank.
    let blank = image::SLOT_B_BASE + SLOT_SIZE - 2 * PAGE;
    flash.erase(blank, PAGE).unwrap();
    let before = flash.inner_mut().erased_pages();

    let patch = PatchBuilder::new(1500).copy(1500).build();
    patcher.feed(&mut flash, &patch).unwrap();
    // Two pages hold the output so far.
    assert_eq!(flash.inner_mut().erased_pages() - before, 2);

    patcher.finish(&mut flash).unwrap();
    // Five more pages up to the signature page, one of them already blank.
    assert_eq!(flash.inner_mut().erased_pages() - before, 6);

    let out = output(&mut flash);
    assert_eq!(out[..1500], old.bytes[..1500]);
    assert!(out[1500..].iter().all(|&b| b == 0xFF));
}

/// The last partial write unit is padded with erased bytes.
#[test]
fn unaligned_target_size() {
    let old = Image::build(3000, 1, 0, 1);
    let (mut flash, mut patcher) = setup(&old);

    let patch = PatchBuilder::new(7).insert(&[1, 2, 3, 4, 5, 6, 7]).build();
    patcher.feed(&mut flash, &patch).unwrap();
    patcher.finish(&mut flash).unwrap();

    let out = output(&mut flash);
    assert_eq!(out[..8], [1, 2, 3, 4, 5, 6, 7, 0xFF]);
}

fn apply_err(patch: &[u8]) -> Error {
    let old = Image::build(3000, 1, 0, 1);
    let (mut flash, mut patcher) = setup(&old);
    patcher
        .feed(&mut flash, patch)
        .and_then(|()| patcher.finish(&mut flash))
        .unwrap_err()
}

#[test]
fn malformed_patches() {
    let target = SLOT_SIZE - PAGE;

    let mut bad_magic = PatchBuilder::new(8).build();
    bad_magic[0] = b'X';
    assert_eq!(apply_err(&bad_magic), Error::Patch(PatchError::BadMagic));

    assert_eq!(
        apply_err(&PatchBuilder::new(target + 1).build()),
        Error::Patch(PatchError::TargetTooLarge)
    );
    assert_eq!(
        apply_err(&PatchBuilder::new(8).raw(&[0x07]).build()),
        Error::Patch(PatchError::UnknownOp(0x07))
    );
    assert_eq!(
        apply_err(&PatchBuilder::new(8).insert(&[0; 9]).build()),
        Error::Patch(PatchError::OutputOverflow)
    );
    assert_eq!(
        apply_err(&PatchBuilder::new(100).seek(-1).build()),
        Error::Patch(PatchError::SeekOutOfBounds)
    );
    assert_eq!(
        apply_err(&PatchBuilder::new(100).seek(SLOT_SIZE as i32 + 1).build()),
        Error::Patch(PatchError::SeekOutOfBounds)
    );
    assert_eq!(
        apply_err(&PatchBuilder::new(1000).seek(SLOT_SIZE as i32 - 500).copy(1000).build()),
        Error::Patch(PatchError::SourceOutOfBounds)
    );
    assert_eq!(
        apply_err(&PatchBuilder::new(1000).seek(SLOT_SIZE as i32 - 500).diff(&[0; 501], &[0; 501]).build()),
        Error::Patch(PatchError::SourceOutOfBounds)
    );
    assert_eq!(
        apply_err(&PatchBuilder::new(4).insert(&[0; 4]).raw(&[0x01]).build()),
        Error::Patch(PatchError::TrailingData)
    );
    assert_eq!(
        apply_err(&PatchBuilder::new(8).insert(&[0; 4]).build()),
        Error::Patch(PatchError::Incomplete)
    );
}

/// A one-shot session buffers everything and applies it at finish.
#[test]
fn one_shot_session() {
    let (old, new, patch) = image::delta_fixture();
    let mut flash = Flash::new(*image::flash_with(&old), PAGE).unwrap();
    let slots = image::slots();
    let mut buffer = vec![0; patch.len()];

    let mut session = DeltaSession::new(
        FwupMode::DeltaOneShot,
        patch.len() as u32,
        slots.current,
        slots.patch_region(),
        buffer.len(),
    )
    .unwrap();
    let target_before = output(&mut flash);
    for chunk in patch.chunks(100) {
        session.transfer(&mut flash, &mut buffer, chunk).unwrap();
    }
    assert_eq!(session.received(), patch.len() as u32);
    // Nothing applied yet.
    assert_eq!(output(&mut flash), target_before);

    session.finish(&mut flash, &buffer).unwrap();
    assert_eq!(output(&mut flash), expected_output(&new));
}

#[test]
fn session_limits() {
    let slots = image::slots();
    let (old, _, patch) = image::delta_fixture();
    let mut flash = Flash::new(*image::flash_with(&old), PAGE).unwrap();

    // One-shot patch larger than the buffer.
    assert!(matches!(
        DeltaSession::new(FwupMode::DeltaOneShot, 101, slots.current, slots.patch_region(), 100),
        Err(Error::PatchTooLarge)
    ));
    // Inline sessions do not need a buffer.
    assert!(DeltaSession::new(FwupMode::DeltaInline, 101, slots.current, slots.patch_region(), 0).is_ok());
    assert!(matches!(
        DeltaSession::new(FwupMode::Normal, 0, slots.current, slots.patch_region(), 0),
        Err(Error::InvalidConfig)
    ));

    // More data than announced.
    let mut session = DeltaSession::new(FwupMode::DeltaInline, 10, slots.current, slots.patch_region(), 0).unwrap();
    assert_eq!(
        session.transfer(&mut flash, &mut [], &patch[..11]),
        Err(Error::Patch(PatchError::TooMuchData))
    );

    // Finish before everything arrived.
    let mut session = DeltaSession::new(
        FwupMode::DeltaInline,
        patch.len() as u32,
        slots.current,
        slots.patch_region(),
        0,
    )
    .unwrap();
    session.transfer(&mut flash, &mut [], &patch[..100]).unwrap();
    assert_eq!(session.finish(&mut flash, &[]), Err(Error::Patch(PatchError::Incomplete)));
}
