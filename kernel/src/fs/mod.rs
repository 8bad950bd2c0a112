//! Filesystem.
//!
//! Four layers, bottom up:
//!   + Blocks: the block device plus two MSB-first allocation bitmaps.
//!   + Inodes: 32-byte records with direct blocks only; resize grows and
//!     shrinks the direct slots to exactly `ceil(size / BLOCK_SIZE)`.
//!   + Directories: files whose contents are a dense array of 16-byte
//!     entries; every directory carries "." and "..".
//!   + Names: `/`-separated paths, resolved from the root when absolute
//!     and from the caller's working directory otherwise.
//!
//! Syscalls run on the caller's kernel stack and never reach a
//! scheduling point, so the filesystem needs no lock of its own under
//! cooperative scheduling.
//!
//! Everything lives in the filesystem region of the disk, starting at
//! `SUPER_BLOCK_START`; the in-memory state is the superblock, both
//! bitmaps, and the inode table, written back as they change.

use bitflags::bitflags;
use scopeguard::ScopeGuard;
use zerocopy::{AsBytes, FromBytes};

use crate::console::DIAG_ROW_FS;
use crate::kernel::KernelState;
use crate::param::{
    BITMAP_SIZE, BLOCK_SIZE, FS_NDATA_BLOCKS, MAX_FILE_SIZE, MAX_INODES, MAX_OPEN_FILES,
    SECTOR_SIZE,
};
use crate::proc::TaskId;

mod bitmap;
mod inode;
mod path;
mod superblock;

pub(crate) use bitmap::{bitmap_get, count_set, free_bitmap_entry, get_free_entry};
pub(crate) use inode::Imem;
pub use inode::{DirEntry, Dinode, DIRENT_SIZE, TYPE_DIRECTORY, TYPE_FILE};
pub use superblock::Superblock;
pub(crate) use superblock::{
    dbmap_blk, fs_sectors, ibmap_blk, idx2blk, ino2blk, ino2off, super_blk,
};

bitflags! {
    /// Open modes. `CREAT` may be or-ed onto an access mode.
    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub struct OpenMode: u32 {
        const RDONLY = 1;
        const WRONLY = 2;
        const RDWR = 3;
        const CREAT = 4;
    }
}

impl Default for OpenMode {
    fn default() -> Self {
        OpenMode::empty()
    }
}

impl OpenMode {
    pub fn readable(self) -> bool {
        self.contains(OpenMode::RDONLY)
    }

    pub fn writable(self) -> bool {
        self.contains(OpenMode::WRONLY)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(i32)]
pub enum FsError {
    Error = -1,
    NoMoreInodes = -2,
    Full = -3,
    InodeTableFull = -4,
    NotExist = -5,
    InvalidMode = -6,
    InvalidName = -7,
    DirIsFile = -8,
    Eof = -9,
}

impl FsError {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Whence {
    Set,
    Cur,
    End,
}

impl TryFrom<i32> for Whence {
    type Error = FsError;

    fn try_from(value: i32) -> Result<Self, FsError> {
        match value {
            0 => Ok(Whence::Set),
            1 => Ok(Whence::Cur),
            2 => Ok(Whence::End),
            _ => Err(FsError::Error),
        }
    }
}

/// What `fs_stat` reports.
#[repr(C)]
#[derive(Copy, Clone, Default, AsBytes, FromBytes, zerocopy::FromZeroes)]
pub struct Stat {
    pub typ: i16,
    pub nlinks: i16,
    pub size: u32,
    pub inum: u16,
    pub _pad: u16,
}

pub(crate) struct FsState {
    pub sb: Superblock,
    pub inode_bmap: [u8; BITMAP_SIZE],
    pub data_bmap: [u8; BITMAP_SIZE],
    pub inodes: Vec<Imem>,
    pub fs_start: u32,
}

impl FsState {
    pub fn new(fs_start: u32) -> Self {
        Self {
            sb: Superblock::new(0),
            inode_bmap: [0; BITMAP_SIZE],
            data_bmap: [0; BITMAP_SIZE],
            inodes: (0..MAX_INODES).map(|i| Imem::unused(i as u16)).collect(),
            fs_start,
        }
    }

    pub fn root(&self) -> u16 {
        self.sb.root_inode as u16
    }
}

impl KernelState {
    // ------------------------------------------------------------------
    // Persistence.

    fn write_super(&mut self) {
        let mut sector = [0; SECTOR_SIZE];
        sector[..core::mem::size_of::<Superblock>()].copy_from_slice(self.fs.sb.as_bytes());
        self.disk.write_sector(super_blk(self.fs.fs_start), &sector);
    }

    fn write_bitmaps(&mut self) {
        let mut sector = [0; SECTOR_SIZE];
        sector[..BITMAP_SIZE].copy_from_slice(&self.fs.inode_bmap);
        self.disk.write_sector(ibmap_blk(self.fs.fs_start), &sector);
        sector = [0; SECTOR_SIZE];
        sector[..BITMAP_SIZE].copy_from_slice(&self.fs.data_bmap);
        self.disk.write_sector(dbmap_blk(self.fs.fs_start), &sector);
    }

    /// Persist `inum` if its in-memory copy has diverged from disk.
    fn write_inode(&mut self, inum: u16) {
        if !self.fs.inodes[inum as usize].dirty {
            return;
        }
        let dinode = self.fs.inodes[inum as usize].dinode;
        self.disk.modify(
            ino2blk(self.fs.fs_start, inum),
            ino2off(inum),
            dinode.as_bytes(),
        );
        self.fs.inodes[inum as usize].dirty = false;
    }

    fn load_inode(&mut self, inum: u16) -> Dinode {
        let mut bytes = [0; core::mem::size_of::<Dinode>()];
        self.disk
            .read_part(ino2blk(self.fs.fs_start, inum), ino2off(inum), &mut bytes);
        Dinode::read_from(&bytes[..]).expect("inode layout")
    }

    // ------------------------------------------------------------------
    // Mount and format.

    /// Mount the filesystem, reformatting when the superblock does not
    /// describe this kernel's geometry. Allocated inodes are loaded into
    /// the in-memory table and validated; a corrupt inode is freed with
    /// a diagnostic.
    pub(crate) fn fs_init(&mut self) {
        let mut sector = [0; SECTOR_SIZE];
        self.disk.read_sector(super_blk(self.fs.fs_start), &mut sector);
        let sb = Superblock::read_from_prefix(&sector[..]).expect("superblock layout");
        if !sb.matches() {
            self.fs_mkfs();
            return;
        }
        self.fs.sb = sb;
        self.disk.read_sector(ibmap_blk(self.fs.fs_start), &mut sector);
        self.fs.inode_bmap.copy_from_slice(&sector[..BITMAP_SIZE]);
        self.disk.read_sector(dbmap_blk(self.fs.fs_start), &mut sector);
        self.fs.data_bmap.copy_from_slice(&sector[..BITMAP_SIZE]);

        for inum in 0..MAX_INODES as u16 {
            if !bitmap_get(&self.fs.inode_bmap, inum as usize) {
                continue;
            }
            let dinode = self.load_inode(inum);
            self.fs.inodes[inum as usize] = Imem {
                dinode,
                open_count: 0,
                pos: 0,
                dirty: false,
                inum,
            };
            if !self.inode_is_sane(&dinode) {
                self.console
                    .write_at(DIAG_ROW_FS, &format!("fs: invalid inode {inum} freed"));
                self.free_inode(inum);
            }
        }
    }

    fn inode_is_sane(&self, dinode: &Dinode) -> bool {
        if dinode.typ != TYPE_FILE && dinode.typ != TYPE_DIRECTORY {
            return false;
        }
        if dinode.size > self.fs.sb.max_filesize {
            return false;
        }
        (0..Dinode::blocks_needed(dinode.size)).all(|k| {
            let idx = dinode.direct[k];
            idx >= 0
                && (idx as usize) < FS_NDATA_BLOCKS
                && bitmap_get(&self.fs.data_bmap, idx as usize)
        })
    }

    /// Format: clear both bitmaps, build the root directory, write the
    /// superblock.
    pub(crate) fn fs_mkfs(&mut self) {
        self.fs.inode_bmap = [0; BITMAP_SIZE];
        self.fs.data_bmap = [0; BITMAP_SIZE];
        for i in 0..MAX_INODES {
            self.fs.inodes[i] = Imem::unused(i as u16);
        }
        self.write_bitmaps();
        let zero = [0; SECTOR_SIZE];
        for blk in 0..crate::param::INODE_BLOCKS as u32 {
            self.disk
                .write_sector(ino2blk(self.fs.fs_start, 0) + blk, &zero);
        }

        let root = self
            .create_directory(None)
            .expect("mkfs: cannot create root");
        self.fs.sb = Superblock::new(root as u32);
        self.write_super();
    }

    // ------------------------------------------------------------------
    // Inode allocation.

    fn alloc_inode(&mut self, typ: i16) -> Result<u16, FsError> {
        let inum = get_free_entry(&mut self.fs.inode_bmap, MAX_INODES)
            .ok_or(FsError::NoMoreInodes)? as u16;
        self.fs.inodes[inum as usize] = Imem {
            dinode: Dinode::empty(typ),
            open_count: 0,
            pos: 0,
            dirty: true,
            inum,
        };
        self.write_bitmaps();
        self.write_inode(inum);
        Ok(inum)
    }

    /// Release an inode: its direct blocks, both bitmap bits, and its
    /// on-disk record.
    fn free_inode(&mut self, inum: u16) {
        let dinode = self.fs.inodes[inum as usize].dinode;
        for k in 0..crate::param::INODE_NDIRECT {
            if dinode.direct[k] >= 0 {
                free_bitmap_entry(&mut self.fs.data_bmap, dinode.direct[k] as usize);
            }
        }
        free_bitmap_entry(&mut self.fs.inode_bmap, inum as usize);
        let mut cleared = Imem::unused(inum);
        cleared.dirty = true;
        self.fs.inodes[inum as usize] = cleared;
        self.write_bitmaps();
        self.write_inode(inum);
    }

    /// Decrement `inum`'s link count; at zero (or for a directory being
    /// unlinked) the inode is released.
    fn reduce_links(&mut self, inum: u16) {
        let imem = &mut self.fs.inodes[inum as usize];
        imem.dinode.nlinks -= 1;
        imem.dirty = true;
        if imem.dinode.nlinks <= 0 || imem.dinode.is_directory() {
            self.free_inode(inum);
        } else {
            self.write_inode(inum);
        }
    }

    // ------------------------------------------------------------------
    // Resize, read, write.

    /// Grow or shrink `inum` to `new_size` bytes, allocating or freeing
    /// direct blocks so exactly `ceil(new_size / BLOCK_SIZE)` remain.
    /// Fails with `Full` when the data bitmap is exhausted, releasing
    /// any blocks taken by the failed call.
    fn resize_inode(&mut self, inum: u16, new_size: u32) -> Result<(), FsError> {
        debug_assert!(new_size as usize <= MAX_FILE_SIZE);
        let needed = Dinode::blocks_needed(new_size);
        let mut taken = Vec::new();
        for k in 0..crate::param::INODE_NDIRECT {
            let have = self.fs.inodes[inum as usize].dinode.direct[k];
            if k < needed && have < 0 {
                match get_free_entry(&mut self.fs.data_bmap, FS_NDATA_BLOCKS) {
                    Some(idx) => {
                        self.fs.inodes[inum as usize].dinode.direct[k] = idx as i32;
                        taken.push((k, idx));
                    }
                    None => {
                        for (k, idx) in taken {
                            free_bitmap_entry(&mut self.fs.data_bmap, idx);
                            self.fs.inodes[inum as usize].dinode.direct[k] = -1;
                        }
                        return Err(FsError::Full);
                    }
                }
            } else if k >= needed && have >= 0 {
                free_bitmap_entry(&mut self.fs.data_bmap, have as usize);
                self.fs.inodes[inum as usize].dinode.direct[k] = -1;
            }
        }
        let zero = [0; SECTOR_SIZE];
        for &(_, idx) in &taken {
            self.disk
                .write_sector(idx2blk(self.fs.fs_start, idx as i32), &zero);
        }
        self.fs.inodes[inum as usize].dinode.size = new_size;
        self.fs.inodes[inum as usize].dirty = true;
        self.write_bitmaps();
        self.write_inode(inum);
        Ok(())
    }

    /// Read from `inum` starting at byte `start`, clamped to the file
    /// size. Returns the bytes transferred.
    fn inode_read(&mut self, inum: u16, buf: &mut [u8], start: u32) -> usize {
        let size = self.fs.inodes[inum as usize].dinode.size;
        let finish = (start as usize + buf.len()).min(size as usize);
        if start as usize >= finish {
            return 0;
        }
        let mut pos = start as usize;
        while pos < finish {
            let within = pos % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - within).min(finish - pos);
            let idx = self.fs.inodes[inum as usize].dinode.direct[pos / BLOCK_SIZE];
            debug_assert!(idx >= 0, "read from unallocated block");
            let lba = idx2blk(self.fs.fs_start, idx);
            let dst = &mut buf[pos - start as usize..pos - start as usize + chunk];
            if chunk == BLOCK_SIZE {
                let dst: &mut [u8; SECTOR_SIZE] = dst.try_into().expect("block chunk");
                self.disk.read_sector(lba, dst);
            } else {
                self.disk.read_part(lba, within, dst);
            }
            pos += chunk;
        }
        finish - start as usize
    }

    /// Write `data` to `inum` at byte `start`. The caller has already
    /// resized the inode to cover the span.
    fn inode_write(&mut self, inum: u16, data: &[u8], start: u32) {
        debug_assert!(start as usize + data.len() <= self.fs.inodes[inum as usize].dinode.size as usize);
        let mut pos = start as usize;
        let finish = start as usize + data.len();
        while pos < finish {
            let within = pos % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - within).min(finish - pos);
            let idx = self.fs.inodes[inum as usize].dinode.direct[pos / BLOCK_SIZE];
            debug_assert!(idx >= 0, "write to unallocated block");
            let lba = idx2blk(self.fs.fs_start, idx);
            let src = &data[pos - start as usize..pos - start as usize + chunk];
            if chunk == BLOCK_SIZE {
                let src: &[u8; SECTOR_SIZE] = src.try_into().expect("block chunk");
                self.disk.write_sector(lba, src);
            } else {
                self.disk.modify(lba, within, src);
            }
            pos += chunk;
        }
    }

    // ------------------------------------------------------------------
    // Directories.

    fn read_dir(&mut self, dir: u16) -> Vec<DirEntry> {
        let size = self.fs.inodes[dir as usize].dinode.size as usize;
        debug_assert_eq!(size % DIRENT_SIZE, 0, "directory size");
        let mut bytes = vec![0; size];
        let got = self.inode_read(dir, &mut bytes, 0);
        debug_assert_eq!(got, size);
        bytes
            .chunks_exact(DIRENT_SIZE)
            .map(|c| DirEntry::read_from(c).expect("dirent layout"))
            .collect()
    }

    fn dir_lookup(&mut self, dir: u16, name: &str) -> Option<u16> {
        self.read_dir(dir)
            .iter()
            .find(|e| e.name_is(name))
            .map(|e| e.inum)
    }

    /// Make a fresh directory holding "." and ".."; the root's ".."
    /// names itself. Does not link it into any parent.
    fn create_directory(&mut self, parent: Option<u16>) -> Result<u16, FsError> {
        let inum = self.alloc_inode(TYPE_DIRECTORY)?;
        let mut s = scopeguard::guard(&mut *self, |s| s.free_inode(inum));
        s.create_directory_entry(inum, inum, ".")?;
        s.create_directory_entry(inum, parent.unwrap_or(inum), "..")?;
        let _ = ScopeGuard::into_inner(s);
        Ok(inum)
    }

    /// Append `{name, target}` to `dir` and take a link on `target`.
    fn create_directory_entry(&mut self, dir: u16, target: u16, name: &str) -> Result<(), FsError> {
        path::check_component(name)?;
        let old_size = self.fs.inodes[dir as usize].dinode.size;
        if old_size as usize + DIRENT_SIZE > MAX_FILE_SIZE {
            return Err(FsError::Full);
        }
        self.resize_inode(dir, old_size + DIRENT_SIZE as u32)?;
        let entry = DirEntry::new(name, target);
        self.inode_write(dir, entry.as_bytes(), old_size);
        self.fs.inodes[target as usize].dinode.nlinks += 1;
        self.fs.inodes[target as usize].dirty = true;
        self.write_inode(target);
        Ok(())
    }

    /// First entry of `dir` besides "." and "..".
    fn first_extra_entry(&mut self, dir: u16) -> Option<u16> {
        self.read_dir(dir)
            .iter()
            .find(|e| !e.name_is(".") && !e.name_is(".."))
            .map(|e| e.inum)
    }

    /// Drop the first entry for `target` from `dir`, shrinking `dir` by
    /// exactly one record, and release the link.
    fn remove_one_entry(&mut self, dir: u16, target: u16) -> Result<(), FsError> {
        let mut entries = self.read_dir(dir);
        let idx = entries
            .iter()
            .position(|e| e.inum == target)
            .ok_or(FsError::NotExist)?;
        let _ = entries.remove(idx);
        let bytes: Vec<u8> = entries.iter().flat_map(|e| e.as_bytes().to_vec()).collect();
        self.inode_write(dir, &bytes, 0);
        self.resize_inode(dir, bytes.len() as u32)?;
        self.reduce_links(target);
        Ok(())
    }

    /// Remove `target`'s entry from `dir`. A directory target is drained
    /// first: children are removed one at a time off an explicit work
    /// list, so teardown depth costs heap, not kernel stack.
    fn remove_directory_entry(&mut self, dir: u16, target: u16) -> Result<(), FsError> {
        let mut work = vec![(dir, target)];
        while let Some((d, t)) = work.pop() {
            if self.fs.inodes[t as usize].dinode.is_directory() {
                if let Some(child) = self.first_extra_entry(t) {
                    work.push((d, t));
                    work.push((t, child));
                    continue;
                }
            }
            self.remove_one_entry(d, t)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Name resolution.

    /// Resolve `path` to an inode: from the root if absolute, from
    /// `start` otherwise. An empty remainder names the directory reached
    /// so far.
    fn resolve(&mut self, start: u16, pathname: &str) -> Result<u16, FsError> {
        path::check_path(pathname)?;
        let mut cur = if pathname.starts_with('/') {
            self.fs.root()
        } else {
            start
        };
        for comp in path::components(pathname) {
            path::check_component(comp)?;
            if !self.fs.inodes[cur as usize].dinode.is_directory() {
                return Err(FsError::DirIsFile);
            }
            cur = self.dir_lookup(cur, comp).ok_or(FsError::NotExist)?;
        }
        Ok(cur)
    }

    /// Resolve everything but the last component; returns the parent
    /// directory and the final name.
    fn resolve_parent<'p>(
        &mut self,
        start: u16,
        pathname: &'p str,
    ) -> Result<(u16, &'p str), FsError> {
        path::check_path(pathname)?;
        let (dir_path, name) = path::split_parent(pathname);
        let dir = self.resolve(start, if dir_path.is_empty() { "." } else { dir_path })?;
        if !self.fs.inodes[dir as usize].dinode.is_directory() {
            return Err(FsError::DirIsFile);
        }
        Ok((dir, name))
    }

    // ------------------------------------------------------------------
    // Syscalls. All of these run on the caller's kernel stack, with the
    // caller's TCB supplying the working directory and open-file table.

    pub(crate) fn fs_open(&mut self, me: TaskId, pathname: &str, mode: OpenMode) -> Result<i32, FsError> {
        if (mode & OpenMode::RDWR).is_empty() || !OpenMode::all().contains(mode) {
            return Err(FsError::InvalidMode);
        }
        let fd = self.sched.tcbs[me]
            .open_files
            .iter()
            .position(|slot| slot.mode.is_empty())
            .ok_or(FsError::InodeTableFull)?;
        let cwd = self.sched.tcbs[me].cwd;

        let inum = match self.resolve(cwd, pathname) {
            Ok(inum) => {
                let dinode = self.fs.inodes[inum as usize].dinode;
                if dinode.is_directory() && (mode & OpenMode::RDWR) != OpenMode::RDONLY {
                    return Err(FsError::InvalidMode);
                }
                inum
            }
            Err(FsError::NotExist) if mode.contains(OpenMode::CREAT) => {
                let (dir, name) = self.resolve_parent(cwd, pathname)?;
                path::check_component(name)?;
                let inum = self.alloc_inode(TYPE_FILE)?;
                let mut s = scopeguard::guard(&mut *self, |s| s.free_inode(inum));
                s.create_directory_entry(dir, inum, name)?;
                let _ = ScopeGuard::into_inner(s);
                inum
            }
            Err(e) => return Err(e),
        };

        let slot = &mut self.sched.tcbs[me].open_files[fd];
        slot.mode = mode;
        slot.inode = inum;
        let imem = &mut self.fs.inodes[inum as usize];
        imem.open_count += 1;
        imem.pos = 0;
        Ok(fd as i32)
    }

    pub(crate) fn fs_close(&mut self, me: TaskId, fd: i32) -> Result<(), FsError> {
        let slot = *self.file_slot(me, fd)?;
        self.fs.inodes[slot.inode as usize].open_count =
            self.fs.inodes[slot.inode as usize].open_count.saturating_sub(1);
        self.sched.tcbs[me].open_files[fd as usize].mode = OpenMode::empty();
        self.sched.tcbs[me].open_files[fd as usize].inode = 0;
        Ok(())
    }

    pub(crate) fn fs_read(&mut self, me: TaskId, fd: i32, buf: &mut [u8]) -> Result<usize, FsError> {
        let slot = *self.file_slot(me, fd)?;
        if !slot.mode.readable() {
            return Err(FsError::InvalidMode);
        }
        let imem = self.fs.inodes[slot.inode as usize];
        if !buf.is_empty() && imem.pos >= imem.dinode.size {
            return Err(FsError::Eof);
        }
        let got = self.inode_read(slot.inode, buf, imem.pos);
        let _ = self.fs_lseek(me, fd, got as i32, Whence::Cur)?;
        Ok(got)
    }

    pub(crate) fn fs_write(&mut self, me: TaskId, fd: i32, data: &[u8]) -> Result<usize, FsError> {
        let slot = *self.file_slot(me, fd)?;
        if !slot.mode.writable() {
            return Err(FsError::InvalidMode);
        }
        if data.is_empty() {
            return Ok(0);
        }
        let start = self.fs.inodes[slot.inode as usize].pos;
        if start as usize >= MAX_FILE_SIZE {
            return Err(FsError::Full);
        }
        let new_size = (start as usize + data.len()).min(MAX_FILE_SIZE) as u32;
        self.resize_inode(slot.inode, new_size)?;
        let put = (new_size - start) as usize;
        self.inode_write(slot.inode, &data[..put], start);
        let _ = self.fs_lseek(me, fd, put as i32, Whence::Cur)?;
        Ok(put)
    }

    /// Move the shared file position. Seeking past the end in a writable
    /// mode grows the file, up to `max_filesize`.
    pub(crate) fn fs_lseek(
        &mut self,
        me: TaskId,
        fd: i32,
        offset: i32,
        whence: Whence,
    ) -> Result<i32, FsError> {
        let slot = *self.file_slot(me, fd)?;
        let imem = self.fs.inodes[slot.inode as usize];
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => imem.pos as i64,
            Whence::End => imem.dinode.size as i64,
        };
        let pos = base + offset as i64;
        if pos < 0 {
            return Err(FsError::Error);
        }
        if pos as usize > MAX_FILE_SIZE {
            return Err(FsError::Full);
        }
        let pos = pos as u32;
        if pos > imem.dinode.size && slot.mode.writable() {
            self.resize_inode(slot.inode, pos)?;
        }
        self.fs.inodes[slot.inode as usize].pos = pos;
        Ok(pos as i32)
    }

    pub(crate) fn fs_mkdir(&mut self, me: TaskId, pathname: &str) -> Result<(), FsError> {
        let cwd = self.sched.tcbs[me].cwd;
        let (parent, name) = self.resolve_parent(cwd, pathname)?;
        path::check_component(name)?;
        if self.dir_lookup(parent, name).is_some() {
            return Err(FsError::Error);
        }
        let new = self.create_directory(Some(parent))?;
        if let Err(e) = self.create_directory_entry(parent, new, name) {
            // Undo the ".." link before dropping the half-made directory.
            self.fs.inodes[parent as usize].dinode.nlinks -= 1;
            self.fs.inodes[parent as usize].dirty = true;
            self.write_inode(parent);
            self.free_inode(new);
            return Err(e);
        }
        Ok(())
    }

    pub(crate) fn fs_chdir(&mut self, me: TaskId, pathname: &str) -> Result<(), FsError> {
        let cwd = self.sched.tcbs[me].cwd;
        let inum = self.resolve(cwd, pathname)?;
        if !self.fs.inodes[inum as usize].dinode.is_directory() {
            return Err(FsError::DirIsFile);
        }
        self.sched.tcbs[me].cwd = inum;
        Ok(())
    }

    pub(crate) fn fs_rmdir(&mut self, me: TaskId, pathname: &str) -> Result<(), FsError> {
        let cwd = self.sched.tcbs[me].cwd;
        let (parent, name) = self.resolve_parent(cwd, pathname)?;
        if name == "." || name == ".." {
            return Err(FsError::InvalidName);
        }
        path::check_component(name)?;
        let inum = self.dir_lookup(parent, name).ok_or(FsError::NotExist)?;
        if !self.fs.inodes[inum as usize].dinode.is_directory() {
            return Err(FsError::DirIsFile);
        }
        self.remove_directory_entry(parent, inum)
    }

    /// Make `new` another name for the file at `existing`.
    pub(crate) fn fs_link(&mut self, me: TaskId, new: &str, existing: &str) -> Result<(), FsError> {
        let cwd = self.sched.tcbs[me].cwd;
        let inum = self.resolve(cwd, existing)?;
        if self.fs.inodes[inum as usize].dinode.is_directory() {
            return Err(FsError::DirIsFile);
        }
        let (dir, name) = self.resolve_parent(cwd, new)?;
        path::check_component(name)?;
        if self.dir_lookup(dir, name).is_some() {
            return Err(FsError::Error);
        }
        self.create_directory_entry(dir, inum, name)
    }

    pub(crate) fn fs_unlink(&mut self, me: TaskId, pathname: &str) -> Result<(), FsError> {
        let cwd = self.sched.tcbs[me].cwd;
        let (parent, name) = self.resolve_parent(cwd, pathname)?;
        if name == "." || name == ".." {
            return Err(FsError::InvalidName);
        }
        path::check_component(name)?;
        let inum = self.dir_lookup(parent, name).ok_or(FsError::NotExist)?;
        if self.fs.inodes[inum as usize].dinode.is_directory() {
            return Err(FsError::DirIsFile);
        }
        self.remove_directory_entry(parent, inum)
    }

    pub(crate) fn fs_stat(&mut self, me: TaskId, fd: i32) -> Result<Stat, FsError> {
        let slot = *self.file_slot(me, fd)?;
        let imem = self.fs.inodes[slot.inode as usize];
        Ok(Stat {
            typ: imem.dinode.typ,
            nlinks: imem.dinode.nlinks,
            size: imem.dinode.size,
            inum: imem.inum,
            _pad: 0,
        })
    }

    fn file_slot(&self, me: TaskId, fd: i32) -> Result<&crate::proc::FileSlot, FsError> {
        if fd < 0 || fd as usize >= MAX_OPEN_FILES {
            return Err(FsError::Error);
        }
        let slot = &self.sched.tcbs[me].open_files[fd as usize];
        if slot.mode.is_empty() {
            return Err(FsError::Error);
        }
        Ok(slot)
    }

    /// Allocated inodes, for invariants and tests.
    pub(crate) fn inodes_in_use(&self) -> usize {
        count_set(&self.fs.inode_bmap, MAX_INODES)
    }

    /// Allocated data blocks, for invariants and tests.
    pub(crate) fn data_blocks_in_use(&self) -> usize {
        count_set(&self.fs.data_bmap, FS_NDATA_BLOCKS)
    }
}
