//! Synchronization objects.
//!
//! Locks, condition variables, semaphores and barriers are all built the
//! same way: a little state plus a FIFO wait queue, mutated only inside a
//! critical section, suspending through the scheduler's `block` and
//! waking through `unblock`. Objects live in fixed arenas and are named
//! by copyable ids; `create` is allocation-only and never blocks.

use arrayvec::ArrayVec;

use crate::param::{MAX_BARRIERS, MAX_CONDS, MAX_LOCKS, MAX_SEMS};
use crate::proc::WaitQueue;

mod barrier;
mod cond;
mod lock;
mod sem;

pub(crate) use lock::LockObj;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct LockId(pub(crate) usize);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct CondId(pub(crate) usize);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SemId(pub(crate) usize);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct BarrierId(pub(crate) usize);

/// Names a wait queue somewhere in the sync arenas.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum WaitChan {
    Lock(usize),
    Cond(usize),
    Sem(usize),
    Barrier(usize),
}

pub(crate) struct CondObj {
    pub waiting: WaitQueue,
}

pub(crate) struct SemObj {
    /// `initial + ups - downs`; negative counts blocked waiters.
    pub count: i32,
    pub waiting: WaitQueue,
}

pub(crate) struct BarrierObj {
    pub count: i32,
    pub reach: i32,
    pub waiting: WaitQueue,
}

pub(crate) struct SyncTable {
    pub locks: ArrayVec<LockObj, MAX_LOCKS>,
    pub conds: ArrayVec<CondObj, MAX_CONDS>,
    pub sems: ArrayVec<SemObj, MAX_SEMS>,
    pub barriers: ArrayVec<BarrierObj, MAX_BARRIERS>,
}

impl SyncTable {
    pub fn new() -> Self {
        Self {
            locks: ArrayVec::new(),
            conds: ArrayVec::new(),
            sems: ArrayVec::new(),
            barriers: ArrayVec::new(),
        }
    }

    pub fn queue_mut(&mut self, chan: WaitChan) -> &mut WaitQueue {
        match chan {
            WaitChan::Lock(i) => &mut self.locks[i].waiting,
            WaitChan::Cond(i) => &mut self.conds[i].waiting,
            WaitChan::Sem(i) => &mut self.sems[i].waiting,
            WaitChan::Barrier(i) => &mut self.barriers[i].waiting,
        }
    }

    pub fn new_lock(&mut self) -> LockId {
        let id = self.locks.len();
        self.locks
            .try_push(LockObj {
                locked: false,
                waiting: WaitQueue::new(),
            })
            .expect("out of lock objects");
        LockId(id)
    }

    pub fn new_cond(&mut self) -> CondId {
        let id = self.conds.len();
        self.conds
            .try_push(CondObj {
                waiting: WaitQueue::new(),
            })
            .expect("out of condition objects");
        CondId(id)
    }

    pub fn new_sem(&mut self, initial: i32) -> SemId {
        let id = self.sems.len();
        self.sems
            .try_push(SemObj {
                count: initial,
                waiting: WaitQueue::new(),
            })
            .expect("out of semaphore objects");
        SemId(id)
    }

    pub fn new_barrier(&mut self, reach: i32) -> BarrierId {
        assert!(reach > 0, "barrier: reach must be positive");
        let id = self.barriers.len();
        self.barriers
            .try_push(BarrierObj {
                count: 0,
                reach,
                waiting: WaitQueue::new(),
            })
            .expect("out of barrier objects");
        BarrierId(id)
    }
}
