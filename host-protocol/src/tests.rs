use super::*;

fn roundtrip(msg: &HostProtocolMessage) {
    let mut buf = [0u8; COBS_MAX_MSG_SIZE];
    let encoded = postcard::to_slice_cobs(msg, &mut buf).unwrap();
    let decoded: HostProtocolMessage = postcard::from_bytes_cobs(encoded).unwrap();
    assert_eq!(&decoded, msg);
}

#[test]
fn transfer_with_full_chunk_fits_in_one_frame() {
    let data = [0xA5; 448];
    let msg = HostProtocolMessage::Fwup(Fwup::Transfer {
        mode: FwupMode::Normal,
        sequence_id: u32::MAX,
        offset: u32::MAX,
        data: &data,
    });
    let mut buf = [0u8; COBS_MAX_MSG_SIZE];
    let encoded = postcard::to_slice_cobs(&msg, &mut buf).unwrap();
    assert!(encoded.len() <= COBS_MAX_MSG_SIZE);
    roundtrip(&msg);
}

#[test]
fn finish_and_acks_survive_framing() {
    roundtrip(&HostProtocolMessage::Fwup(Fwup::Finish {
        mode: FwupMode::DeltaOneShot,
        bl_upgrade: false,
        app_properties_offset: 0x200,
        signature_offset: 0x7_7FC0,
    }));
    roundtrip(&HostProtocolMessage::Fwup(Fwup::AckFinish {
        status: FwupStatus::WillApplyPatch,
    }));
    roundtrip(&HostProtocolMessage::Fwup(Fwup::AckStart {
        status: FwupStatus::Success,
        max_chunk_size: 256,
    }));
    roundtrip(&HostProtocolMessage::AckState(State::FirmwareUpgrade));
}

#[test]
fn delta_modes() {
    assert!(!FwupMode::Normal.is_delta());
    assert!(FwupMode::DeltaInline.is_delta());
    assert!(FwupMode::DeltaOneShot.is_delta());
}
