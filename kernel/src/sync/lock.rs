//! Mutual exclusion locks.
//!
//! Release hands the lock directly to the oldest waiter: the lock stays
//! LOCKED and the waiter resumes as its owner, so there is no herd of
//! re-contenders. With FIFO queues this makes acquisition starvation
//! free.

use std::sync::MutexGuard;

use super::{LockId, WaitChan};
use crate::kernel::{Kernel, KernelState};
use crate::proc::{Sched, TaskId, WaitQueue};

pub(crate) struct LockObj {
    pub locked: bool,
    pub waiting: WaitQueue,
}

impl Kernel {
    pub(crate) fn lock_acquire(&self, me: TaskId, lock: LockId) {
        let state = self.gate();
        let _state = self.lock_acquire_inner(state, me, lock);
    }

    /// The body of `acquire`, composable inside an already-entered
    /// critical section; `condition_wait` re-acquires through this.
    pub(crate) fn lock_acquire_inner<'k>(
        &'k self,
        mut state: MutexGuard<'k, KernelState>,
        me: TaskId,
        lock: LockId,
    ) -> MutexGuard<'k, KernelState> {
        if state.sync.locks[lock.0].locked {
            // Woken by a releasing task; ownership came with the wakeup.
            state = self.block(state, me, WaitChan::Lock(lock.0));
        } else {
            state.sync.locks[lock.0].locked = true;
        }
        state
    }

    pub(crate) fn lock_release(&self, lock: LockId) {
        let mut state = self.gate();
        Self::lock_release_inner(&mut state, lock);
    }

    pub(crate) fn lock_release_inner(state: &mut KernelState, lock: LockId) {
        if state.sync.locks[lock.0].waiting.is_empty() {
            state.sync.locks[lock.0].locked = false;
        } else {
            let _woken = Sched::unblock(state, WaitChan::Lock(lock.0));
        }
    }
}
