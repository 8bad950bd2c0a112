//! System call numbers and dispatch.
//!
//! The trap surface: calls are identified by small integers and carry up
//! to three raw argument words. Pointer arguments are user virtual
//! addresses and go through the caller's page tables, so a bad pointer
//! faults like any other bad access. The return value is a result or a
//! negative `FSE_*` code.
//!
//! Message arguments use the mailbox wire shape: a 4-byte little-endian
//! length followed by the payload.

use crate::console::DIAG_ROW_SCHED;
use crate::fs::{FsError, OpenMode, Whence};
use crate::kernel::TaskCtx;
use crate::mbox::MboxId;
use crate::param::{MAX_MESSAGE_LENGTH, MAX_PATH};
use crate::sync::{BarrierId, CondId, LockId, SemId};
use zerocopy::AsBytes;

pub const SYS_YIELD: i32 = 0;
pub const SYS_EXIT: i32 = 1;
pub const SYS_GETPID: i32 = 2;

pub const SYS_LOCK_CREATE: i32 = 10;
pub const SYS_LOCK_ACQUIRE: i32 = 11;
pub const SYS_LOCK_RELEASE: i32 = 12;
pub const SYS_COND_CREATE: i32 = 13;
pub const SYS_COND_WAIT: i32 = 14;
pub const SYS_COND_SIGNAL: i32 = 15;
pub const SYS_COND_BROADCAST: i32 = 16;
pub const SYS_SEM_CREATE: i32 = 17;
pub const SYS_SEM_UP: i32 = 18;
pub const SYS_SEM_DOWN: i32 = 19;
pub const SYS_BARRIER_CREATE: i32 = 20;
pub const SYS_BARRIER_WAIT: i32 = 21;

pub const SYS_MBOX_OPEN: i32 = 30;
pub const SYS_MBOX_CLOSE: i32 = 31;
pub const SYS_MBOX_SEND: i32 = 32;
pub const SYS_MBOX_RECV: i32 = 33;
pub const SYS_MBOX_STAT: i32 = 34;

pub const SYS_OPEN: i32 = 40;
pub const SYS_CLOSE: i32 = 41;
pub const SYS_READ: i32 = 42;
pub const SYS_WRITE: i32 = 43;
pub const SYS_LSEEK: i32 = 44;
pub const SYS_MKDIR: i32 = 45;
pub const SYS_CHDIR: i32 = 46;
pub const SYS_RMDIR: i32 = 47;
pub const SYS_LINK: i32 = 48;
pub const SYS_UNLINK: i32 = 49;
pub const SYS_STAT: i32 = 50;

fn result(r: Result<i32, FsError>) -> i32 {
    match r {
        Ok(v) => v,
        Err(e) => e.code(),
    }
}

impl TaskCtx {
    /// Fetch the NUL-terminated path at `vaddr`.
    fn arg_path(&self, vaddr: u32) -> Result<String, FsError> {
        self.kernel()
            .copy_in_str(self.tid(), vaddr, MAX_PATH)
            .ok_or(FsError::InvalidName)
    }

    fn checked_lock(&self, raw: u32) -> Option<LockId> {
        ((raw as usize) < self.kernel().gate().sync.locks.len()).then_some(LockId(raw as usize))
    }

    fn checked_cond(&self, raw: u32) -> Option<CondId> {
        ((raw as usize) < self.kernel().gate().sync.conds.len()).then_some(CondId(raw as usize))
    }

    fn checked_sem(&self, raw: u32) -> Option<SemId> {
        ((raw as usize) < self.kernel().gate().sync.sems.len()).then_some(SemId(raw as usize))
    }

    fn checked_barrier(&self, raw: u32) -> Option<BarrierId> {
        ((raw as usize) < self.kernel().gate().sync.barriers.len())
            .then_some(BarrierId(raw as usize))
    }

    fn checked_mbox(&self, raw: u32) -> Option<MboxId> {
        ((raw as usize) < self.kernel().gate().mboxes.len()).then_some(MboxId(raw as usize))
    }

    /// Dispatch a numbered system call.
    pub fn syscall(&self, num: i32, a0: u32, a1: u32, a2: u32) -> i32 {
        let kernel = self.kernel();
        let me = self.tid();
        match num {
            SYS_YIELD => {
                self.yield_now();
                0
            }
            SYS_EXIT => self.exit(),
            SYS_GETPID => self.pid(),

            SYS_LOCK_CREATE => kernel.lock_create().0 as i32,
            SYS_LOCK_ACQUIRE => match self.checked_lock(a0) {
                Some(lock) => {
                    self.lock_acquire(lock);
                    0
                }
                None => -1,
            },
            SYS_LOCK_RELEASE => match self.checked_lock(a0) {
                Some(lock) => {
                    self.lock_release(lock);
                    0
                }
                None => -1,
            },
            SYS_COND_CREATE => kernel.condition_create().0 as i32,
            SYS_COND_WAIT => match (self.checked_lock(a0), self.checked_cond(a1)) {
                (Some(lock), Some(cond)) => {
                    self.condition_wait(lock, cond);
                    0
                }
                _ => -1,
            },
            SYS_COND_SIGNAL => match self.checked_cond(a0) {
                Some(cond) => {
                    self.condition_signal(cond);
                    0
                }
                None => -1,
            },
            SYS_COND_BROADCAST => match self.checked_cond(a0) {
                Some(cond) => {
                    self.condition_broadcast(cond);
                    0
                }
                None => -1,
            },
            SYS_SEM_CREATE => kernel.semaphore_create(a0 as i32).0 as i32,
            SYS_SEM_UP => match self.checked_sem(a0) {
                Some(sem) => {
                    self.semaphore_up(sem);
                    0
                }
                None => -1,
            },
            SYS_SEM_DOWN => match self.checked_sem(a0) {
                Some(sem) => {
                    self.semaphore_down(sem);
                    0
                }
                None => -1,
            },
            SYS_BARRIER_CREATE => kernel.barrier_create(a0 as i32).0 as i32,
            SYS_BARRIER_WAIT => match self.checked_barrier(a0) {
                Some(barrier) => {
                    self.barrier_wait(barrier);
                    0
                }
                None => -1,
            },

            SYS_MBOX_OPEN => self.mbox_open(a0 as usize).0 as i32,
            SYS_MBOX_CLOSE => match self.checked_mbox(a0) {
                Some(q) => {
                    self.mbox_close(q);
                    0
                }
                None => -1,
            },
            SYS_MBOX_SEND => match self.checked_mbox(a0) {
                Some(q) => {
                    let mut header = [0; 4];
                    kernel.copy_in(me, a1, &mut header);
                    let len = (u32::from_le_bytes(header) as usize).min(MAX_MESSAGE_LENGTH);
                    let mut payload = vec![0; len];
                    kernel.copy_in(me, a1 + 4, &mut payload);
                    self.mbox_send(q, &payload);
                    0
                }
                None => -1,
            },
            SYS_MBOX_RECV => match self.checked_mbox(a0) {
                Some(q) => {
                    let msg = self.mbox_recv(q);
                    kernel.copy_out(me, a1, &(msg.len() as u32).to_le_bytes());
                    kernel.copy_out(me, a1 + 4, &msg);
                    msg.len() as i32
                }
                None => -1,
            },
            SYS_MBOX_STAT => match self.checked_mbox(a0) {
                Some(q) => {
                    let (count, space) = self.mbox_stat(q);
                    kernel.copy_out(me, a1, &count.to_le_bytes());
                    kernel.copy_out(me, a2, &(space as u32).to_le_bytes());
                    0
                }
                None => -1,
            },

            SYS_OPEN => result(self.arg_path(a0).and_then(|path| {
                let mode = OpenMode::from_bits(a1).ok_or(FsError::InvalidMode)?;
                self.open(&path, mode)
            })),
            SYS_CLOSE => result(self.close(a0 as i32).map(|_| 0)),
            SYS_READ => {
                let mut buf = vec![0; a2 as usize];
                match self.read(a0 as i32, &mut buf) {
                    Ok(got) => {
                        kernel.copy_out(me, a1, &buf[..got]);
                        got as i32
                    }
                    Err(e) => e.code(),
                }
            }
            SYS_WRITE => {
                let mut buf = vec![0; a2 as usize];
                kernel.copy_in(me, a1, &mut buf);
                result(self.write(a0 as i32, &buf).map(|put| put as i32))
            }
            SYS_LSEEK => result(
                Whence::try_from(a2 as i32)
                    .and_then(|whence| self.lseek(a0 as i32, a1 as i32, whence)),
            ),
            SYS_MKDIR => result(self.arg_path(a0).and_then(|p| self.mkdir(&p)).map(|_| 0)),
            SYS_CHDIR => result(self.arg_path(a0).and_then(|p| self.chdir(&p)).map(|_| 0)),
            SYS_RMDIR => result(self.arg_path(a0).and_then(|p| self.rmdir(&p)).map(|_| 0)),
            SYS_LINK => result(
                self.arg_path(a0)
                    .and_then(|new| Ok((new, self.arg_path(a1)?)))
                    .and_then(|(new, existing)| self.link(&new, &existing))
                    .map(|_| 0),
            ),
            SYS_UNLINK => result(self.arg_path(a0).and_then(|p| self.unlink(&p)).map(|_| 0)),
            SYS_STAT => match self.stat(a0 as i32) {
                Ok(stat) => {
                    kernel.copy_out(me, a1, stat.as_bytes());
                    0
                }
                Err(e) => e.code(),
            },

            _ => {
                kernel
                    .gate()
                    .console
                    .write_at(DIAG_ROW_SCHED, &format!("pid {}: unknown syscall {num}", self.pid()));
                -1
            }
        }
    }
}
