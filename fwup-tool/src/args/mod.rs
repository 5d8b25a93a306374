use {clap::Parser, sec1::der::Decode, std::path::PathBuf};

mod cli;
mod config;

pub use config::Error as ConfigError;

/// Program arguments loaded from the CLI and config file.
#[derive(Debug, Clone)]
pub enum Args {
    /// Print the application properties and signature of an image.
    Inspect { input: PathBuf, geometry: Geometry },
    /// Pad and sign an application binary.
    Sign {
        pubkey: Option<secp256k1::PublicKey>,
        secret: secp256k1::SecretKey,
        input: PathBuf,
        output: Output,
        geometry: Geometry,
    },
    /// Create a delta patch.
    Diff {
        old: PathBuf,
        new: PathBuf,
        output: PathBuf,
        geometry: Geometry,
    },
}

#[derive(Debug, Clone)]
pub enum Output {
    InPlace,
    File(PathBuf),
}

/// Slot geometry of the target board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub slot_size: u32,
    pub page_size: u32,
    pub signature_size: u32,
}

impl Geometry {
    /// Bytes covered by the signature.
    pub fn signed_len(&self) -> usize {
        (self.slot_size - self.signature_size) as usize
    }

    /// Bytes a delta patch may produce: everything but the signature page.
    pub fn patch_len(&self) -> usize {
        (self.slot_size - self.page_size) as usize
    }

    fn validate(self) -> Result<Self, Error> {
        let valid = self.page_size > 0
            && self.slot_size % self.page_size == 0
            && self.slot_size >= 2 * self.page_size
            && self.signature_size >= fwup::verify::SIGNATURE_LEN as u32
            && self.signature_size <= self.page_size;
        if valid {
            Ok(self)
        } else {
            Err(Error::InvalidGeometry(self))
        }
    }
}

/// Use whichever of the CLI or the config file specified a value. Specifying
/// it in both is an error.
fn reconcile<T>(cli: Option<T>, config: Option<T>, name: &'static str) -> Result<Option<T>, Error> {
    match (cli, config) {
        (Some(_), Some(_)) => Err(Error::InConfigAndCli(name)),
        (cli, config) => Ok(cli.or(config)),
    }
}

fn geometry(
    config: Option<&config::Config>,
    slot_size: Option<u32>,
    page_size: Option<u32>,
    signature_size: Option<u32>,
) -> Result<Geometry, Error> {
    let slot_size = reconcile(slot_size, config.and_then(|c| c.slot_size), "slot size")?;
    let page_size = reconcile(page_size, config.and_then(|c| c.page_size), "page size")?;
    let signature_size = reconcile(
        signature_size,
        config.and_then(|c| c.signature_size),
        "signature size",
    )?;
    Geometry {
        slot_size: slot_size.unwrap_or(consts::SLOT_SIZE),
        page_size: page_size.unwrap_or(consts::FLASH_PAGE),
        signature_size: signature_size.unwrap_or(consts::SIGNATURE_SIZE),
    }
    .validate()
}

pub fn args<I, T>(args: I) -> Result<Args, Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = cli::Args::try_parse_from(args).map_err(Error::Cli)?;
    match cli.command {
        cli::Command::Inspect {
            input,
            config,
            slot_size,
            signature_size,
        } => {
            let config = config.map(|c| config::Config::load(&c)).transpose()?;
            let geometry = geometry(config.as_ref(), slot_size, None, signature_size)?;
            Ok(Args::Inspect { input, geometry })
        }
        cli::Command::Diff {
            old,
            new,
            output,
            config,
            slot_size,
            page_size,
        } => {
            let config = config.map(|c| config::Config::load(&c)).transpose()?;
            let geometry = geometry(config.as_ref(), slot_size, page_size, None)?;
            Ok(Args::Diff {
                old,
                new,
                output,
                geometry,
            })
        }
        cli::Command::Sign {
            pubkey,
            secret,
            config,
            input,
            in_place,
            output,
            slot_size,
            page_size,
            signature_size,
        } => {
            // Load and validate the config.
            let config = config.map(|c| config::Config::load(&c)).transpose()?;
            let config_secret_path = config
                .as_ref()
                .and_then(|config| {
                    config.secret.as_ref().map(|secret| {
                        if !secret.is_absolute() {
                            return Err(Error::SecretPathNotAbsoluteInConfig(secret.clone()));
                        }
                        Ok(secret.clone())
                    })
                })
                .transpose()?;
            let geometry = geometry(config.as_ref(), slot_size, page_size, signature_size)?;

            let pubkey = reconcile(pubkey, config.as_ref().and_then(|c| c.pubkey.clone()), "pubkey")?;
            let secret = reconcile(secret, config_secret_path, "secret")?.ok_or(Error::SecretMissing)?;

            // Parse the arguments.
            let pubkey = pubkey
                .map(|p| {
                    secp256k1::PublicKey::from_slice(
                        &hex::decode(p).map_err(|_| Error::InvalidPubkeyHex)?,
                    )
                    .map_err(Error::InvalidPubkey)
                })
                .transpose()?;
            let pem = std::fs::read(secret).map_err(Error::ReadPemFile)?;
            let key = pem::parse(pem)?;
            if key.tag() != "EC PRIVATE KEY" {
                return Err(Error::InvalidPemTag(key.tag().to_string()));
            }
            let secret = sec1::EcPrivateKey::from_der(key.contents())
                .map_err(Error::ParseDerContent)?
                .private_key;
            let secret =
                secp256k1::SecretKey::from_slice(secret).map_err(Error::InvalidSecretKey)?;
            let output = match (in_place, output) {
                (true, Some(_)) => return Err(Error::InPlaceAndOutputSpecified),
                (true, None) => Output::InPlace,
                (false, Some(path)) => Output::File(path),
                (false, None) => return Err(Error::OutputMissing),
            };
            Ok(Args::Sign {
                pubkey,
                secret,
                input,
                output,
                geometry,
            })
        }
    }
}

#[derive(Debug)]
pub enum Error {
    Cli(clap::Error),
    Config(ConfigError),
    InConfigAndCli(&'static str),
    InPlaceAndOutputSpecified,
    InvalidGeometry(Geometry),
    InvalidPemTag(String),
    InvalidPubkey(secp256k1::Error),
    InvalidPubkeyHex,
    InvalidSecretKey(secp256k1::Error),
    OutputMissing,
    ParseDerContent(sec1::der::Error),
    ParsePemFile(pem::PemError),
    ReadPemFile(std::io::Error),
    SecretMissing,
    SecretPathNotAbsoluteInConfig(PathBuf),
}

impl From<pem::PemError> for Error {
    fn from(e: pem::PemError) -> Self {
        Error::ParsePemFile(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Cli(e) => write!(f, "{}", e.render().ansi()),
            Error::Config(e) => write!(f, "config error: {e}"),
            Error::InConfigAndCli(name) => write!(f, "{name} specified in both config and cli"),
            Error::InPlaceAndOutputSpecified => {
                write!(f, "cannot specify both --in-place and --output (-o)")
            }
            Error::InvalidGeometry(geometry) => write!(
                f,
                "invalid slot geometry: slot size {}, page size {}, signature size {}",
                geometry.slot_size, geometry.page_size, geometry.signature_size
            ),
            Error::InvalidPemTag(tag) => {
                write!(f, r#"invalid PEM tag: "{tag}", expected "EC PRIVATE KEY""#)
            }
            Error::InvalidPubkey(e) => write!(f, "user specified invalid public key: {e}"),
            Error::InvalidPubkeyHex => write!(f, "user specified invalid public key hex"),
            Error::InvalidSecretKey(e) => write!(f, "user specified invalid secret key: {e}"),
            Error::OutputMissing => write!(f, "either --in-place or --output (-o) is required"),
            Error::ParseDerContent(e) => {
                write!(f, "failed to parse DER content inside PEM file: {e}")
            }
            Error::ParsePemFile(e) => write!(f, "invalid PEM file: {e}"),
            Error::ReadPemFile(e) => write!(f, "failed to read PEM file: {e}"),
            Error::SecretMissing => write!(f, "user did not specify a secret key"),
            Error::SecretPathNotAbsoluteInConfig(path) => {
                write!(
                    f,
                    r#"config error: secret key path is not absolute: "{}""#,
                    path.to_str().unwrap_or("<invalid path>")
                )
            }
        }
    }
}

impl std::error::Error for Error {}
