use {
    self::input::{GEOMETRY, SIGNATURE_OFFSET, SLOT_SIZE},
    crate::ExitCode,
    fwup::{FwupMode, FwupStatus},
    std::io::{Read, Write},
};


/// Inspect a binary without application properties.
#[test]
fn inspect_no_properties() {
    let file = create_file(&input::noise(100, 3));
    let output = test(["inspect", "-i", file.path().to_str().unwrap()], []);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("no application properties found"));
    assert!(output.stdout.contains("100 B (100)"));
    assert!(output.stderr.is_empty());
}

/// Sign a binary and inspect the result.
#[test]
fn sign_and_inspect() {
    let input_file = create_file(&input::firmware(5000, 1, 0x200, 7));
    let output_file = tempfile::NamedTempFile::new().unwrap();
    let secret_pem = create_file(input::SECRET_1_PEM);
    let output = test(
        [
            "sign",
            "--secret",
            secret_pem.path().to_str().unwrap(),
            "--pubkey",
            input::PUBKEY_1_HEX,
            "-i",
            input_file.path().to_str().unwrap(),
            "-o",
            output_file.path().to_str().unwrap(),
        ],
        GEOMETRY,
    );
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains(input::PUBKEY_1_HEX));
    assert!(output.stderr.is_empty());

    let signed = std::fs::read(output_file.path()).unwrap();
    assert_eq!(signed.len(), SLOT_SIZE as usize);
    assert_eq!(signed[..5000], input::firmware(5000, 1, 0x200, 7)[..]);
    assert!(signed[5000..SIGNATURE_OFFSET as usize].iter().all(|&b| b == 0xFF));
    let signature = &signed[SIGNATURE_OFFSET as usize..];

    let output = test(
        ["inspect", "-i", output_file.path().to_str().unwrap()],
        ["--slot-size", "8192"],
    );
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("8 KiB (8192)"));
    assert!(output.stdout.contains("0x200"));
    assert!(output.stdout.contains("secp256k1"));
    assert!(output.stdout.contains(&hex::encode(&signature[..32])));
    assert!(output.stdout.contains(&hex::encode(&signature[32..])));
    assert!(output.stderr.is_empty());
}

/// Signing twice with the same key gives a verifying image both times.
#[test]
fn resign_in_place() {
    let input_file = create_file(&input::firmware(3000, 2, 0x40, 2));
    let secret_pem = create_file(input::SECRET_1_PEM);
    let args = [
        "sign",
        "--secret",
        secret_pem.path().to_str().unwrap(),
        "-i",
        input_file.path().to_str().unwrap(),
        "--in-place",
    ];

    let output = test(args, GEOMETRY);
    assert_eq!(output.exit_code, ExitCode(0));
    let first = std::fs::read(input_file.path()).unwrap();
    assert_eq!(first.len(), SLOT_SIZE as usize);

    let output = test(args, GEOMETRY);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stderr.is_empty());
    let second = std::fs::read(input_file.path()).unwrap();
    assert_eq!(first[..SIGNATURE_OFFSET as usize], second[..SIGNATURE_OFFSET as usize]);
}

/// Attempt to sign with a key other than the expected one.
#[test]
fn sign_pubkey_mismatch() {
    let input_file = create_file(&input::firmware(3000, 2, 0x40, 2));
    let output_file = tempfile::NamedTempFile::new().unwrap();
    let secret_pem = create_file(input::SECRET_1_PEM);
    let output = test(
        [
            "sign",
            "--secret",
            secret_pem.path().to_str().unwrap(),
            "--pubkey",
            input::PUBKEY_2_HEX,
            "-i",
            input_file.path().to_str().unwrap(),
            "-o",
            output_file.path().to_str().unwrap(),
        ],
        GEOMETRY,
    );
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stdout.is_empty());
    assert!(output.stderr.contains("public key does not match secret key"));
    assert!(read(&output_file).is_empty());
}

/// A binary without application properties cannot be verified on the
/// device, so it is not signed.
#[test]
fn sign_without_properties() {
    let input_file = create_file(&input::noise(3000, 4));
    let output_file = tempfile::NamedTempFile::new().unwrap();
    let secret_pem = create_file(input::SECRET_1_PEM);
    let output = test(
        [
            "sign",
            "--secret",
            secret_pem.path().to_str().unwrap(),
            "-i",
            input_file.path().to_str().unwrap(),
            "-o",
            output_file.path().to_str().unwrap(),
        ],
        GEOMETRY,
    );
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("image has no application properties"));
    assert!(read(&output_file).is_empty());
}

/// A binary overlapping the signature does not fit the slot.
#[test]
fn sign_image_too_large() {
    let input_file = create_file(&input::firmware(SIGNATURE_OFFSET as usize + 1, 5, 0x40, 2));
    let output_file = tempfile::NamedTempFile::new().unwrap();
    let secret_pem = create_file(input::SECRET_1_PEM);
    let output = test(
        [
            "sign",
            "--secret",
            secret_pem.path().to_str().unwrap(),
            "-i",
            input_file.path().to_str().unwrap(),
            "-o",
            output_file.path().to_str().unwrap(),
        ],
        GEOMETRY,
    );
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("does not fit the slot"));
    assert!(read(&output_file).is_empty());
}

/// Attempt to sign without a secret key.
#[test]
fn sign_secret_missing() {
    let input_file = create_file(&input::firmware(3000, 2, 0x40, 2));
    let output = test(
        ["sign", "-i", input_file.path().to_str().unwrap(), "--in-place"],
        GEOMETRY,
    );
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("user did not specify a secret key"));
}

/// Attempt to specify the slot size both in the config file and on the CLI.
#[test]
fn slot_size_in_config_and_cli() {
    let input_file = create_file(&input::firmware(3000, 2, 0x40, 2));
    let secret_pem = create_file(input::SECRET_1_PEM);
    let config_file = create_file(
        r#"
        slot_size = 8192
        "#
        .as_bytes(),
    );
    let output = test(
        [
            "sign",
            "--secret",
            secret_pem.path().to_str().unwrap(),
            "-i",
            input_file.path().to_str().unwrap(),
            "--in-place",
            "--config",
            config_file.path().to_str().unwrap(),
        ],
        GEOMETRY,
    );
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("slot size specified in both config and cli"));
    assert_eq!(std::fs::read(input_file.path()).unwrap().len(), 3000);
}

/// Geometry and secret taken from the config file.
#[test]
fn sign_with_config() {
    let input_file = create_file(&input::firmware(3000, 2, 0x40, 2));
    let secret_pem = create_file(input::SECRET_1_PEM);
    let config_file = create_file(
        format!(
            r#"
            secret = "{}"
            pubkey = "{}"
            slot_size = 8192
            page_size = 1024
            "#,
            secret_pem.path().to_str().unwrap(),
            input::PUBKEY_1_HEX
        )
        .as_bytes(),
    );
    let output = test(
        [
            "sign",
            "-i",
            input_file.path().to_str().unwrap(),
            "--in-place",
            "--config",
            config_file.path().to_str().unwrap(),
        ],
        [],
    );
    assert_eq!(output.exit_code, ExitCode(0));
    assert_eq!(std::fs::read(input_file.path()).unwrap().len(), SLOT_SIZE as usize);
}

/// Secret key paths in the config must not depend on the working directory.
#[test]
fn relative_secret_in_config() {
    let input_file = create_file(&input::firmware(3000, 2, 0x40, 2));
    let config_file = create_file(
        r#"
        secret = "keys/secret.pem"
        "#
        .as_bytes(),
    );
    let output = test(
        [
            "sign",
            "-i",
            input_file.path().to_str().unwrap(),
            "--in-place",
            "--config",
            config_file.path().to_str().unwrap(),
        ],
        GEOMETRY,
    );
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("secret key path is not absolute"));
}

/// Slot sizes that are not a whole number of pages are rejected.
#[test]
fn invalid_geometry() {
    let input_file = create_file(&input::firmware(3000, 2, 0x40, 2));
    let output = test(
        ["inspect", "-i", input_file.path().to_str().unwrap()],
        ["--slot-size", "8000"],
    );
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("invalid slot geometry"));
}

/// The patch written by `diff` rebuilds the new image on the device, both
/// streamed and buffered.
#[test]
fn diff_applies_on_device() {
    let old_body = input::firmware(6000, 1, 0x40, 1);
    let mut new_body = old_body[..2000].to_vec();
    new_body.extend(input::noise(300, 9));
    new_body.extend(
        old_body[2000..3000]
            .iter()
            .enumerate()
            .map(|(i, b)| if i % 7 == 0 { b.wrapping_add(1) } else { *b }),
    );
    new_body.extend_from_slice(&old_body[3500..6000]);
    new_body.extend(input::noise(200, 11));
    new_body[0x40..0x40 + fwup::properties::APP_PROPERTIES_SIZE]
        .copy_from_slice(&fwup::properties::AppProperties::new(2).to_bytes());

    let old = sign(&old_body);
    let new = sign(&new_body);
    let patch_file = tempfile::NamedTempFile::new().unwrap();
    let output = test(
        [
            "diff",
            "--old",
            old.path().to_str().unwrap(),
            "--new",
            new.path().to_str().unwrap(),
            "-o",
            patch_file.path().to_str().unwrap(),
        ],
        GEOMETRY,
    );
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stderr.is_empty());

    let old = std::fs::read(old.path()).unwrap();
    let new = std::fs::read(new.path()).unwrap();
    let patch = std::fs::read(patch_file.path()).unwrap();
    assert!(patch.len() < new_body.len() / 2, "patch of {} bytes", patch.len());

    for mode in [FwupMode::DeltaInline, FwupMode::DeltaOneShot] {
        let mut flash = input::board(&old);
        assert_eq!(input::apply(&mut flash, mode, &patch, &new, 0x40), FwupStatus::Success);
        assert_eq!(input::target_slot(&flash), &new[..], "{mode:?}");
    }
}

/// Only the signature may live in the last page of a delta updated image.
#[test]
fn diff_signature_page_not_blank() {
    let old = sign(&input::firmware(3000, 1, 0x40, 1));
    let new = sign(&input::firmware(7500, 2, 0x40, 2));
    let patch_file = tempfile::NamedTempFile::new().unwrap();
    let output = test(
        [
            "diff",
            "--old",
            old.path().to_str().unwrap(),
            "--new",
            new.path().to_str().unwrap(),
            "-o",
            patch_file.path().to_str().unwrap(),
        ],
        GEOMETRY,
    );
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("signature page"));
    assert!(read(&patch_file).is_empty());
}

#[test]
fn identical_images_copy_everything() {
    let image = input::noise(4000, 6);
    let (patch, stats) = crate::diff::diff(&image, &image).unwrap();
    assert_eq!(
        stats,
        crate::diff::Stats {
            copied: 4000,
            ..Default::default()
        }
    );
    // Header and a single COPY.
    assert_eq!(patch.len(), 8 + 5);
}

#[test]
fn patch_target_trims_erased_tail() {
    let mut image = vec![1, 2, 3];
    image.extend([0xFF; 100]);
    image.extend([4; 10]);
    assert_eq!(crate::diff::patch_target(&image, 50), &[1, 2, 3]);
    assert_eq!(crate::diff::patch_target(&image, 113).len(), 113);
    assert!(crate::diff::patch_target(&[0xFF; 10], 10).is_empty());
}

/// Sign `body` for the test board and return the signed file.
fn sign(body: &[u8]) -> tempfile::NamedTempFile {
    let file = create_file(body);
    let secret_pem = create_file(input::SECRET_1_PEM);
    let output = test(
        [
            "sign",
            "--secret",
            secret_pem.path().to_str().unwrap(),
            "-i",
            file.path().to_str().unwrap(),
            "--in-place",
        ],
        GEOMETRY,
    );
    assert_eq!(output.exit_code, ExitCode(0));
    file
}

fn test<const N: usize, const M: usize>(args: [&str; N], geometry: [&str; M]) -> Output {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit_code = crate::main_args(
        std::iter::once("fwup-tool").chain(args).chain(geometry),
        &mut stdout,
        &mut stderr,
    );
    println!("* args: {:?} {:?}", args, geometry);
    println!("* exit_code: {:?}", exit_code);
    println!("* stdout:\n{}", String::from_utf8_lossy(&stdout));
    println!("* stderr:\n{}", String::from_utf8_lossy(&stderr));
    Output {
        exit_code,
        stdout: String::from_utf8(stdout).unwrap(),
        stderr: String::from_utf8(stderr).unwrap(),
    }
}

#[derive(Debug)]
struct Output {
    exit_code: ExitCode,
    stdout: String,
    stderr: String,
}

fn create_file(data: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file
}

fn read(file: &tempfile::NamedTempFile) -> Vec<u8> {
    let mut buf = Vec::new();
    file.as_file().read_to_end(&mut buf).unwrap();
    buf
}
