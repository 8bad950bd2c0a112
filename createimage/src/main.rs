use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

/// Build a bootable disk image from a bootblock and kernel ELF files.
#[derive(Parser)]
#[command(name = "createimage")]
struct Args {
    /// Print per-segment detail while building.
    #[arg(long)]
    extended: bool,

    /// The 512-byte real-mode bootblock.
    bootblock: PathBuf,

    /// Kernel (and process) ELF files, emitted in order.
    #[arg(required = true)]
    kernels: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _sectors = createimage::build_image(
        &args.bootblock,
        &args.kernels,
        PathBuf::from("image").as_path(),
        args.extended,
    )?;
    Ok(())
}
