//! Boot-image builder.
//!
//! Lays out `[bootblock][kernel and process images]`: each ELF's
//! loadable segments are emitted back to back and the result padded to a
//! sector boundary, so every image starts on the sector its loader
//! expects. Bytes 2..3 of the bootblock are patched with the total
//! post-bootblock sector count, which the boot loader feeds to
//! `INT 13h AH=02h`.

use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};

pub mod elf;

use elf::{ElfHdr, ELF_PROG_LOAD};

pub const SECTOR_SIZE: usize = 512;

/// Where the sector count lands in the bootblock.
pub const OS_SIZE_LOC: u64 = 2;

const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// Build `out` from a bootblock and one or more ELF images. Returns the
/// patched sector count.
pub fn build_image(
    bootblock: &Path,
    kernels: &[impl AsRef<Path>],
    out: &Path,
    extended: bool,
) -> Result<u16> {
    let boot = fs::read(bootblock)
        .with_context(|| format!("read bootblock {}", bootblock.display()))?;
    if boot.len() != SECTOR_SIZE {
        bail!(
            "bootblock {} is {} bytes, want exactly {SECTOR_SIZE}",
            bootblock.display(),
            boot.len()
        );
    }
    if boot[SECTOR_SIZE - 2..] != BOOT_SIGNATURE {
        bail!("bootblock {} lacks the 55 AA signature", bootblock.display());
    }

    let mut image = fs::File::create(out).with_context(|| format!("create {}", out.display()))?;
    image.write_all(&boot)?;

    let mut total = 0usize;
    for kernel in kernels {
        let kernel = kernel.as_ref();
        let bytes =
            fs::read(kernel).with_context(|| format!("read kernel {}", kernel.display()))?;
        let hdr = ElfHdr::parse(&bytes)
            .with_context(|| format!("{} is not an ELF executable", kernel.display()))?;

        let mut emitted = 0usize;
        for i in 0..hdr.phnum as usize {
            let ph = hdr
                .prog_hdr(&bytes, i)
                .with_context(|| format!("{}: truncated program header {i}", kernel.display()))?;
            if ph.typ != ELF_PROG_LOAD {
                continue;
            }
            if extended {
                println!(
                    "{}: segment {i}: offset {:#x} vaddr {:#x} filesz {:#x} memsz {:#x}",
                    kernel.display(),
                    ph.off,
                    ph.vaddr,
                    ph.filesz,
                    ph.memsz
                );
            }
            // The image carries memsz bytes; anything past filesz (or
            // past the end of the file) is zero.
            let mut segment = vec![0u8; ph.memsz as usize];
            let start = ph.off as usize;
            let take = (ph.filesz as usize)
                .min(ph.memsz as usize)
                .min(bytes.len().saturating_sub(start));
            segment[..take].copy_from_slice(&bytes[start..start + take]);
            image.write_all(&segment)?;
            emitted += segment.len();
        }

        // Pad so the next image starts on a sector boundary.
        let pad = emitted.next_multiple_of(SECTOR_SIZE) - emitted;
        image.write_all(&vec![0u8; pad])?;
        total += emitted + pad;
        if extended {
            println!(
                "{}: {} bytes, {} sectors",
                kernel.display(),
                emitted,
                (emitted + pad) / SECTOR_SIZE
            );
        }
    }

    let sectors = total / SECTOR_SIZE;
    let sectors: u16 = sectors
        .try_into()
        .map_err(|_| anyhow::anyhow!("image is {sectors} sectors, too large for the bootblock"))?;
    image.seek(SeekFrom::Start(OS_SIZE_LOC))?;
    image.write_all(&sectors.to_le_bytes())?;
    image.flush()?;
    Ok(sectors)
}
