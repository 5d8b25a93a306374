use {
    colored::Colorize,
    fwup::properties::AppProperties,
    sha2::Digest,
    std::{
        ffi::OsString,
        io::{Seek, Write},
        path::{Path, PathBuf},
    },
};

mod args;
mod diff;

#[cfg(test)]
mod tests;

fn main() -> std::process::ExitCode {
    pretty_env_logger::init();
    main_args(
        std::env::args_os(),
        &mut std::io::stdout(),
        &mut std::io::stderr(),
    )
    .into()
}

fn main_args<I, T>(args: I, stdout: impl Write, mut stderr: impl Write) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match run(args, stdout) {
        Ok(()) => ExitCode(0),
        Err(Error::Args(e @ args::Error::Cli(_))) => {
            // Clap already does the "error: {}" formatting.
            writeln!(stderr, "{e}").expect("write error to stderr");
            ExitCode(1)
        }
        Err(e) => {
            writeln!(stderr, "{} {e}", "error:".bold().red()).expect("write error to stderr");
            ExitCode(1)
        }
    }
}

fn run<I, T>(args: I, mut stdout: impl Write) -> Result<(), Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match args::args(args)? {
        args::Args::Inspect { input, geometry } => {
            let image = std::fs::read(input).map_err(Error::ReadInputFile)?;
            inspect(&image, geometry, &mut stdout).map_err(Error::Stdout)?;
        }
        args::Args::Sign {
            pubkey: expected_pubkey,
            secret,
            input: input_path,
            output,
            geometry,
        } => {
            // Check that user is not accidentally signing with the wrong key.
            let secp = secp256k1::Secp256k1::new();
            let pubkey = secret.public_key(&secp);
            if let Some(expected_pubkey) = expected_pubkey {
                if pubkey != expected_pubkey {
                    return Err(Error::KeyMismatch);
                }
            }

            let input = std::fs::read(&input_path).map_err(Error::ReadInputFile)?;
            let mut image = slot_image(&input, geometry)?;
            if find_properties(&image[..geometry.signed_len()]).is_none() {
                return Err(Error::NoProperties);
            }
            let digest: [u8; 32] = sha2::Sha256::digest(&image[..geometry.signed_len()]).into();
            let signature = secp
                .sign_ecdsa(&secp256k1::Message::from_digest(digest), &secret)
                .serialize_compact();
            let at = geometry.signed_len();
            image[at..at + signature.len()].copy_from_slice(&signature);
            log::info!("signed {} with {}", input_path.display(), hex::encode(pubkey.serialize()));

            let output = match output {
                // When working in-place, first write to a temporary file and
                // move it over the input at the end.
                args::Output::InPlace => OutputFile::InPlace(
                    tempfile::NamedTempFile::new().map_err(Error::CreateTempFile)?,
                    input_path,
                ),
                args::Output::File(path) => OutputFile::File(path),
            };
            output.write(&image)?;

            // Sanity check that what landed on disk verifies.
            let written = std::fs::read(output.path()).map_err(Error::ReadOutputFile)?;
            let digest: [u8; 32] = sha2::Sha256::digest(&written[..geometry.signed_len()]).into();
            let signature = secp256k1::ecdsa::Signature::from_compact(&written[at..at + 64])
                .map_err(|_| Error::OutputSignatureInvalid)?;
            secp.verify_ecdsa(&secp256k1::Message::from_digest(digest), &signature, &pubkey)
                .map_err(|_| Error::OutputSignatureInvalid)?;

            writeln!(&mut stdout, "{:10} {}", "pubkey".bold(), hex::encode(pubkey.serialize()))
                .map_err(Error::Stdout)?;
            writeln!(&mut stdout, "{:10} {}", "digest".bold(), hex::encode(digest))
                .map_err(Error::Stdout)?;
        }
        args::Args::Diff {
            old,
            new,
            output,
            geometry,
        } => {
            let old = std::fs::read(old).map_err(Error::ReadInputFile)?;
            let new = std::fs::read(new).map_err(Error::ReadInputFile)?;
            if old.len() > geometry.slot_size as usize || new.len() > geometry.slot_size as usize {
                return Err(Error::ImageTooLarge(old.len().max(new.len())));
            }
            // The signature page is not patched, it must hold nothing but the
            // signature.
            let signature_page = geometry.patch_len()..geometry.signed_len().min(new.len());
            if new.get(signature_page).is_some_and(|page| page.iter().any(|&b| b != 0xFF)) {
                return Err(Error::SignaturePageNotBlank);
            }

            let target = diff::patch_target(&new, geometry.patch_len());
            let (patch, stats) = diff::diff(&old, target)?;
            std::fs::write(&output, &patch).map_err(Error::WriteOutputFile)?;

            let size = |len: usize| format!("{} ({len})", humansize::format_size(len, humansize::BINARY));
            writeln!(&mut stdout, "{:10} {}", "target".bold(), size(target.len())).map_err(Error::Stdout)?;
            writeln!(&mut stdout, "{:10} {}", "patch".bold(), size(patch.len())).map_err(Error::Stdout)?;
            writeln!(
                &mut stdout,
                "{:10} {} copied, {} diffed, {} inserted, {} seeks",
                "ops".bold(),
                stats.copied,
                stats.diffed,
                stats.inserted,
                stats.seeks
            )
            .map_err(Error::Stdout)?;
        }
    }
    Ok(())
}

/// The binary padded with erased bytes to a whole slot. A full slot image is
/// taken as is and signed again.
fn slot_image(input: &[u8], geometry: args::Geometry) -> Result<Vec<u8>, Error> {
    let slot_size = geometry.slot_size as usize;
    if input.len() != slot_size && input.len() > geometry.signed_len() {
        return Err(Error::ImageTooLarge(input.len()));
    }
    if input.len() > geometry.patch_len() && input.len() != slot_size {
        log::warn!("image reaches into the signature page and cannot be delta updated");
    }
    let mut image = input.to_vec();
    image.resize(slot_size, 0xFF);
    image[geometry.signed_len()..].fill(0xFF);
    Ok(image)
}

/// First application properties record at a word aligned offset.
fn find_properties(image: &[u8]) -> Option<(usize, AppProperties)> {
    (0..image.len().saturating_sub(AppProperties::SIZE - 1))
        .step_by(4)
        .find_map(|at| {
            let record = image[at..at + AppProperties::SIZE].try_into().ok()?;
            AppProperties::parse(record).map(|props| (at, props))
        })
}

fn inspect(image: &[u8], geometry: args::Geometry, mut stdout: impl Write) -> std::io::Result<()> {
    let human_size = humansize::format_size(image.len(), humansize::BINARY);
    writeln!(&mut stdout, "{:10} {human_size} ({})", "size".bold(), image.len())?;

    match find_properties(image) {
        Some((offset, props)) => {
            writeln!(&mut stdout, "{:10} {offset:#x}", "properties".bold())?;
            writeln!(&mut stdout, "{:10} {}", "version".bold(), props.version)?;
            writeln!(&mut stdout, "{:10} {}", "struct".bold(), props.struct_version)?;
            let signature_type = match props.signature_type {
                fwup::properties::SIGNATURE_TYPE_SECP256K1 => "secp256k1",
                _ => "unknown",
            };
            writeln!(
                &mut stdout,
                "{:10} {} ({signature_type})",
                "signature type".bold(),
                props.signature_type
            )?;
            writeln!(&mut stdout, "{:10} {:#x}", "certificate".bold(), props.cert_address)?;
            writeln!(&mut stdout, "{:10} {:#x}", "metadata".bold(), props.boot_metadata_address)?;
        }
        None => writeln!(&mut stdout, "{}", "no application properties found".bold())?,
    }

    if image.len() == geometry.slot_size as usize {
        let signed = &image[..geometry.signed_len()];
        let signature = &image[geometry.signed_len()..geometry.signed_len() + 64];
        writeln!(&mut stdout, "{:10} {}", "digest".bold(), hex::encode(sha2::Sha256::digest(signed)))?;
        writeln!(&mut stdout, "{:10} {}", "signature".bold(), hex::encode(&signature[..32]))?;
        writeln!(&mut stdout, "{} {}", " ".repeat(10), hex::encode(&signature[32..]))?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExitCode(u8);

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        code.0.into()
    }
}

#[derive(Debug)]
enum OutputFile {
    /// Temporary file to be moved over the input path.
    InPlace(tempfile::NamedTempFile, PathBuf),
    File(PathBuf),
}

impl OutputFile {
    fn write(&self, data: &[u8]) -> Result<(), Error> {
        match self {
            OutputFile::InPlace(file, input) => {
                let mut file = file.as_file();
                file.write_all(data).map_err(Error::WriteOutputFile)?;
                file.flush().map_err(Error::WriteOutputFile)?;
                move_file(file, self.temp_path(), input).map_err(Error::MoveTempFile)
            }
            OutputFile::File(path) => std::fs::write(path, data).map_err(Error::WriteOutputFile),
        }
    }

    fn temp_path(&self) -> &Path {
        match self {
            OutputFile::InPlace(file, _) => file.path(),
            OutputFile::File(path) => path,
        }
    }

    /// Where the result ends up.
    fn path(&self) -> &Path {
        match self {
            OutputFile::InPlace(_, input) => input,
            OutputFile::File(path) => path,
        }
    }
}

fn move_file(mut from_file: &std::fs::File, from_path: &Path, to_path: &Path) -> std::io::Result<()> {
    if std::fs::rename(from_path, to_path).is_err() {
        // If rename fails, the files might be on different filesystems.
        // Fall back to copying.
        from_file.seek(std::io::SeekFrom::Start(0))?;
        let mut to_file = std::fs::File::create(to_path)?;
        std::io::copy(&mut from_file, &mut to_file)?;
    }
    Ok(())
}

#[derive(Debug)]
enum Error {
    Args(args::Error),
    CreateTempFile(std::io::Error),
    Diff(diff::Error),
    ImageTooLarge(usize),
    KeyMismatch,
    MoveTempFile(std::io::Error),
    NoProperties,
    OutputSignatureInvalid,
    ReadInputFile(std::io::Error),
    ReadOutputFile(std::io::Error),
    SignaturePageNotBlank,
    Stdout(std::io::Error),
    WriteOutputFile(std::io::Error),
}

impl From<args::Error> for Error {
    fn from(e: args::Error) -> Self {
        Error::Args(e)
    }
}

impl From<diff::Error> for Error {
    fn from(e: diff::Error) -> Self {
        Error::Diff(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Args(e) => write!(f, "{e}"),
            Error::CreateTempFile(e) => write!(f, "failed to create temporary file: {e}"),
            Error::Diff(e) => write!(f, "failed to create patch: {e}"),
            Error::ImageTooLarge(len) => write!(f, "image of {len} bytes does not fit the slot"),
            Error::KeyMismatch => write!(f, "public key does not match secret key"),
            Error::MoveTempFile(e) => write!(f, "failed to move temporary file to output: {e}"),
            Error::NoProperties => write!(f, "image has no application properties"),
            Error::OutputSignatureInvalid => write!(
                f,
                "signature of the output file does not verify after writing; is another process using it?"
            ),
            Error::ReadInputFile(e) => write!(f, "failed to read input file: {e}"),
            Error::ReadOutputFile(e) => write!(f, "failed to read output file: {e}"),
            Error::SignaturePageNotBlank => write!(
                f,
                "new image has data in the signature page, which delta updates cannot carry"
            ),
            Error::Stdout(e) => write!(f, "failed to write to stdout: {e}"),
            Error::WriteOutputFile(e) => write!(f, "failed to write to output file: {e}"),
        }
    }
}

impl std::error::Error for Error {}
