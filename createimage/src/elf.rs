//! Format of an ELF32 executable file.

use zerocopy::{FromBytes, FromZeroes};

/// "\x7FELF" in little endian.
pub const ELF_MAGIC: u32 = 0x464c457f;

/// Loadable program header type.
pub const ELF_PROG_LOAD: u32 = 1;

/// File header.
#[repr(C)]
#[derive(Copy, Clone, FromBytes, FromZeroes)]
pub struct ElfHdr {
    pub magic: u32,
    pub elf: [u8; 12],
    pub typ: u16,
    pub machine: u16,
    pub version: u32,
    pub entry: u32,
    pub phoff: u32,
    pub shoff: u32,
    pub flags: u32,
    pub ehsize: u16,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

/// Program header.
#[repr(C)]
#[derive(Copy, Clone, FromBytes, FromZeroes)]
pub struct ProgHdr {
    pub typ: u32,
    pub off: u32,
    pub vaddr: u32,
    pub paddr: u32,
    pub filesz: u32,
    pub memsz: u32,
    pub flags: u32,
    pub align: u32,
}

pub const ELF_HDR_SIZE: usize = core::mem::size_of::<ElfHdr>();
pub const PROG_HDR_SIZE: usize = core::mem::size_of::<ProgHdr>();

impl ElfHdr {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let hdr = Self::read_from_prefix(bytes)?;
        (hdr.magic == ELF_MAGIC).then_some(hdr)
    }

    /// The `i`-th program header, if the file holds one.
    pub fn prog_hdr(&self, bytes: &[u8], i: usize) -> Option<ProgHdr> {
        let start = self.phoff as usize + i * self.phentsize as usize;
        ProgHdr::read_from_prefix(bytes.get(start..)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_sizes_are_elf32() {
        assert_eq!(ELF_HDR_SIZE, 52);
        assert_eq!(PROG_HDR_SIZE, 32);
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(ElfHdr::parse(&[0u8; 64]).is_none());
    }
}
