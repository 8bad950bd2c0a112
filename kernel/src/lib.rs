//! rondo: a cooperative educational kernel, hosted.
//!
//! One CPU, a fixed task table, round-robin scheduling at explicit
//! yield points, monitor-style synchronization built on the scheduler's
//! block/unblock hooks, demand-paged user processes, and a direct-block
//! filesystem on a 512-byte-sector disk.
//!
//! The machine is simulated: physical memory is a byte arena, page
//! tables are real 32-bit x86 tables stored inside it and walked in
//! software, and each task is backed by a parked host thread holding the
//! single run permit in turn. Scheduling order is exactly the
//! cooperative order the design prescribes on hardware, which makes
//! every interleaving reproducible.
//!
//! Build a machine with [`KernelBuilder`], hand it a disk and tasks, and
//! call [`Kernel::run`].

mod console;
mod disk;
mod fs;
mod kernel;
mod mbox;
mod memlayout;
mod param;
mod proc;
mod sync;
mod syscall;
mod vm;

pub use console::{DIAG_ROW_FS, DIAG_ROW_MBOX, DIAG_ROW_SCHED, DIAG_ROW_VM};
pub use disk::{BlockDevice, FileDisk, RamDisk};
pub use fs::{FsError, OpenMode, Stat, Whence};
pub use kernel::{Config, EvictionPolicy, Kernel, KernelBuilder, TaskCtx};
pub use mbox::{MboxId, Msg, MSG_HEADER_SIZE};
pub use memlayout::{OS_SIZE_LOC, PROCESS_ENTRY, PROCESS_STACK, SUPER_BLOCK_START};
pub use proc::Pid;
pub use sync::{BarrierId, CondId, LockId, SemId};
pub use syscall::*;

pub use param::{
    BUFFER_SIZE, MAX_FILENAME_LEN, MAX_FILE_SIZE, MAX_INODES, MAX_MBOX, MAX_MESSAGE_LENGTH,
    MAX_OPEN_FILES, MAX_TASKS, PAGE_SIZE, SECTORS_PER_PAGE, SECTOR_SIZE,
};
