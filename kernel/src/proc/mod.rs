//! Task control blocks.
//!
//! Every task, process or thread, is a fixed-size `Tcb` in a static
//! table. Ready tasks are threaded onto a circular doubly-linked ring
//! and blocked tasks onto singly-linked FIFO wait queues; both use
//! arena indices, so a link is just a `TaskId`.
//!
//! Invariant: a task is on exactly one list at a time. The ring uses
//! `next` and `prev`; a wait queue reuses `next` alone. Both are
//! cleared whenever the task leaves a list.

use crate::fs::OpenMode;
use crate::param::MAX_OPEN_FILES;

mod sched;
mod wait_queue;

pub use sched::Sched;
pub use wait_queue::WaitQueue;

/// Index into the TCB table.
pub type TaskId = usize;

/// Task identifier handed to user code; non-zero.
pub type Pid = i32;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TaskState {
    Unused,
    FirstTimeProcess,
    FirstTimeThread,
    Ready,
    Blocked,
    Exited,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TaskKind {
    Process,
    Thread,
}

/// One open-file table entry; `mode` is empty when the slot is free.
#[derive(Copy, Clone, Default)]
pub struct FileSlot {
    pub mode: OpenMode,
    pub inode: u16,
}

/// Per-task state.
pub struct Tcb {
    pub pid: Pid,
    pub kind: TaskKind,
    pub state: TaskState,

    /// Ring / wait-queue links.
    pub next: Option<TaskId>,
    pub prev: Option<TaskId>,

    /// Context switches into this task.
    pub ctx_switches: u64,

    /// Page directory, a physical address. Threads alias the kernel's.
    pub pagedir: usize,

    /// Disk sector the process image was loaded from, and its length in
    /// sectors. Dirty evicted pages are written back here.
    pub swap_loc: u32,
    pub swap_size: u32,

    /// Base of the topmost user stack page (processes).
    pub ustack: u32,

    pub open_files: [FileSlot; MAX_OPEN_FILES],

    /// Current working directory, an inode number.
    pub cwd: u16,

    /// Trap bookkeeping.
    pub fault_addr: u32,
    pub error_code: u32,
    pub page_faults: u32,
}

impl Tcb {
    pub const fn unused() -> Self {
        Self {
            pid: 0,
            kind: TaskKind::Thread,
            state: TaskState::Unused,
            next: None,
            prev: None,
            ctx_switches: 0,
            pagedir: 0,
            swap_loc: 0,
            swap_size: 0,
            ustack: 0,
            open_files: [FileSlot {
                mode: OpenMode::empty(),
                inode: 0,
            }; MAX_OPEN_FILES],
            cwd: 0,
            fault_addr: 0,
            error_code: 0,
            page_faults: 0,
        }
    }
}
