//! Command line arguments.

use std::path::PathBuf;

#[derive(clap::Parser)]
#[command(about = "Prepare firmware images and delta patches for the A/B update engine")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand)]
pub enum Command {
    /// Print the application properties and signature of an image.
    Inspect {
        /// The image file.
        #[clap(short, long)]
        input: PathBuf,
        /// Path to config file.
        #[clap(long, short)]
        config: Option<PathBuf>,
        /// Size of an application slot in bytes.
        #[clap(long)]
        slot_size: Option<u32>,
        /// Size of the signature at the end of the slot in bytes.
        #[clap(long)]
        signature_size: Option<u32>,
    },
    /// Pad an application binary to a full slot and sign it.
    Sign {
        /// The public key in hex, verified against the secret key to avoid
        /// accidental signing.
        #[clap(long)]
        pubkey: Option<String>,
        /// Path to PEM-encoded secret key.
        #[clap(long)]
        secret: Option<PathBuf>,
        /// Path to config file.
        #[clap(long, short)]
        config: Option<PathBuf>,
        /// The application binary.
        #[clap(short, long)]
        input: PathBuf,
        /// Update the file in place.
        #[clap(long)]
        in_place: bool,
        /// Path to write the signed image.
        #[clap(short, long)]
        output: Option<PathBuf>,
        /// Size of an application slot in bytes.
        #[clap(long)]
        slot_size: Option<u32>,
        /// Size of a flash page in bytes.
        #[clap(long)]
        page_size: Option<u32>,
        /// Size of the signature at the end of the slot in bytes.
        #[clap(long)]
        signature_size: Option<u32>,
    },
    /// Create a delta patch rebuilding the new image from the running one.
    Diff {
        /// The image running on the device.
        #[clap(long)]
        old: PathBuf,
        /// The signed image to update to.
        #[clap(long)]
        new: PathBuf,
        /// Path to write the patch.
        #[clap(short, long)]
        output: PathBuf,
        /// Path to config file.
        #[clap(long, short)]
        config: Option<PathBuf>,
        /// Size of an application slot in bytes.
        #[clap(long)]
        slot_size: Option<u32>,
        /// Size of a flash page in bytes.
        #[clap(long)]
        page_size: Option<u32>,
    },
}
