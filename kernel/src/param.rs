/// Maximum number of tasks (processes and threads).
pub const MAX_TASKS: usize = 16;

/// Open files per task.
pub const MAX_OPEN_FILES: usize = 16;

/// Number of mailbox slots.
pub const MAX_MBOX: usize = 8;

/// Bytes in a mailbox ring buffer.
pub const BUFFER_SIZE: usize = 256;

/// Largest mailbox payload.
pub const MAX_MESSAGE_LENGTH: usize = 128;

/// Lock/condition/semaphore/barrier arena capacities.
pub const MAX_LOCKS: usize = 32;
pub const MAX_CONDS: usize = 32;
pub const MAX_SEMS: usize = 16;
pub const MAX_BARRIERS: usize = 8;

/// Bytes per disk sector.
pub const SECTOR_SIZE: usize = 512;

/// Bytes per filesystem block. One block is one sector.
pub const BLOCK_SIZE: usize = 512;

/// Bytes per page.
pub const PAGE_SIZE: usize = 4096;

/// Sectors per page.
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// Physical frames available for paging (default; see `Config`).
pub const PAGEABLE_PAGES: usize = 32;

/// Pages of user stack per process (default; see `Config`).
pub const PROCESS_STACK_PAGES: usize = 2;

/// Maximum number of inodes.
pub const MAX_INODES: usize = 256;

/// Direct block slots per inode. There are no indirect blocks.
pub const INODE_NDIRECT: usize = 6;

/// Inodes per 512-byte block (32-byte inodes).
pub const INODES_PER_BLOCK: usize = 16;

/// Sectors holding the inode table.
pub const INODE_BLOCKS: usize = MAX_INODES / INODES_PER_BLOCK;

/// Data blocks in the filesystem.
pub const FS_NDATA_BLOCKS: usize = 1024;

/// Largest file, in bytes.
pub const MAX_FILE_SIZE: usize = INODE_NDIRECT * BLOCK_SIZE;

/// Maximum filename component length.
pub const MAX_FILENAME_LEN: usize = 14;

/// Maximum path length.
pub const MAX_PATH: usize = 256;

/// Bytes in each allocation bitmap (inode and data block).
pub const BITMAP_SIZE: usize = 256;
