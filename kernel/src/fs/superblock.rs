//! Superblock.
//!
//! Disk layout of the filesystem region, sectors from `SUPER_BLOCK_START`:
//!
//! ```text
//! [ super block | inode bitmap | data bitmap | inode blocks | data blocks ]
//! ```
//!
//! The superblock describes the geometry; a mismatch against the
//! compiled-in geometry at mount means the region holds some other
//! filesystem, and it is reformatted.

use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::param::{
    BLOCK_SIZE, FS_NDATA_BLOCKS, INODES_PER_BLOCK, INODE_BLOCKS, MAX_FILE_SIZE, MAX_INODES,
};

#[repr(C)]
#[derive(Copy, Clone, AsBytes, FromBytes, FromZeroes)]
pub struct Superblock {
    /// Number of inodes.
    pub ninodes: u32,

    /// Number of data blocks.
    pub ndata_blks: u32,

    /// Largest file, in bytes.
    pub max_filesize: u32,

    /// Inode number of the root directory.
    pub root_inode: u32,
}

const_assert!(core::mem::size_of::<Superblock>() <= BLOCK_SIZE);

impl Superblock {
    pub fn new(root_inode: u32) -> Self {
        Self {
            ninodes: MAX_INODES as u32,
            ndata_blks: FS_NDATA_BLOCKS as u32,
            max_filesize: MAX_FILE_SIZE as u32,
            root_inode,
        }
    }

    /// Does the on-disk geometry match the compiled-in one?
    pub fn matches(&self) -> bool {
        self.ninodes == MAX_INODES as u32
            && self.ndata_blks == FS_NDATA_BLOCKS as u32
            && self.max_filesize == MAX_FILE_SIZE as u32
    }
}

/// Sector holding inode `i`, relative to the region start `fs_start`.
pub fn ino2blk(fs_start: u32, i: u16) -> u32 {
    fs_start + 3 + i as u32 / INODES_PER_BLOCK as u32
}

/// Byte offset of inode `i` within its sector.
pub fn ino2off(i: u16) -> usize {
    (i as usize % INODES_PER_BLOCK) * (BLOCK_SIZE / INODES_PER_BLOCK)
}

/// Sector holding data block `k`, relative to the region start.
pub fn idx2blk(fs_start: u32, k: i32) -> u32 {
    debug_assert!(k >= 0);
    fs_start + 3 + INODE_BLOCKS as u32 + k as u32
}

/// Sector of the superblock.
pub fn super_blk(fs_start: u32) -> u32 {
    fs_start
}

/// Sector of the inode bitmap.
pub fn ibmap_blk(fs_start: u32) -> u32 {
    fs_start + 1
}

/// Sector of the data-block bitmap.
pub fn dbmap_blk(fs_start: u32) -> u32 {
    fs_start + 2
}

/// Sectors occupied by the whole filesystem region.
pub fn fs_sectors() -> u32 {
    3 + INODE_BLOCKS as u32 + FS_NDATA_BLOCKS as u32
}
