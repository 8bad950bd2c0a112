//! Inodes.
//!
//! An inode is 32 bytes on disk: a type, a link count, a byte size, and
//! `INODE_NDIRECT` direct block slots; `-1` marks a slot unallocated.
//! There are no indirect blocks, so the largest file is
//! `INODE_NDIRECT * BLOCK_SIZE` bytes.
//!
//! The in-memory table holds one entry per inode number, populated at
//! mount from the inode bitmap. An in-memory inode adds the open count,
//! the shared file position, and a dirty flag to the disk fields.

use static_assertions::const_assert_eq;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::param::{INODE_NDIRECT, MAX_FILENAME_LEN};

/// On-disk inode type tags.
pub const TYPE_FILE: i16 = 1;
pub const TYPE_DIRECTORY: i16 = 2;

/// On-disk inode.
#[repr(C)]
#[derive(Copy, Clone, AsBytes, FromBytes, FromZeroes)]
pub struct Dinode {
    pub typ: i16,
    pub nlinks: i16,
    pub size: u32,
    pub direct: [i32; INODE_NDIRECT],
}

const_assert_eq!(core::mem::size_of::<Dinode>(), 32);

impl Dinode {
    pub fn empty(typ: i16) -> Self {
        Self {
            typ,
            nlinks: 0,
            size: 0,
            direct: [-1; INODE_NDIRECT],
        }
    }

    pub fn is_directory(&self) -> bool {
        self.typ == TYPE_DIRECTORY
    }

    /// Direct blocks a file of `size` bytes occupies.
    pub fn blocks_needed(size: u32) -> usize {
        (size as usize).div_ceil(crate::param::BLOCK_SIZE)
    }
}

/// In-memory inode.
#[derive(Copy, Clone)]
pub struct Imem {
    pub dinode: Dinode,
    pub open_count: u32,
    /// File position, shared by every open of this inode.
    pub pos: u32,
    pub dirty: bool,
    pub inum: u16,
}

impl Imem {
    pub fn unused(inum: u16) -> Self {
        Self {
            dinode: Dinode::empty(0),
            open_count: 0,
            pos: 0,
            dirty: false,
            inum,
        }
    }
}

/// One directory entry: a name and an inode number. Directory contents
/// are a dense array of these.
#[repr(C)]
#[derive(Copy, Clone, Default, AsBytes, FromBytes, FromZeroes)]
pub struct DirEntry {
    pub name: [u8; MAX_FILENAME_LEN],
    pub inum: u16,
}

pub const DIRENT_SIZE: usize = core::mem::size_of::<DirEntry>();

const_assert_eq!(DIRENT_SIZE, 16);

impl DirEntry {
    /// `name` must already be validated to fit.
    pub fn new(name: &str, inum: u16) -> Self {
        debug_assert!(name.len() <= MAX_FILENAME_LEN);
        let mut entry = Self {
            name: [0; MAX_FILENAME_LEN],
            inum,
        };
        entry.name[..name.len()].copy_from_slice(name.as_bytes());
        entry
    }

    pub fn name_is(&self, name: &str) -> bool {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_FILENAME_LEN);
        &self.name[..len] == name.as_bytes()
    }

    pub fn name_str(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_FILENAME_LEN);
        core::str::from_utf8(&self.name[..len]).unwrap_or("?")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::BLOCK_SIZE;

    #[test]
    fn block_accounting_has_no_spare_block() {
        assert_eq!(Dinode::blocks_needed(0), 0);
        assert_eq!(Dinode::blocks_needed(1), 1);
        assert_eq!(Dinode::blocks_needed(BLOCK_SIZE as u32), 1);
        assert_eq!(Dinode::blocks_needed(BLOCK_SIZE as u32 + 1), 2);
    }

    #[test]
    fn dirent_names() {
        let e = DirEntry::new("hello", 3);
        assert!(e.name_is("hello"));
        assert!(!e.name_is("hell"));
        assert!(!e.name_is("hello!"));
        assert_eq!(e.name_str(), "hello");

        let max = "abcdefghijklmn";
        assert_eq!(max.len(), MAX_FILENAME_LEN);
        let e = DirEntry::new(max, 1);
        assert!(e.name_is(max));
    }
}
