//! Condition variables, mesa style.
//!
//! `signal` does not transfer the monitor; a woken waiter re-acquires
//! the monitor lock and must re-check its predicate. The release, the
//! block and the re-acquire of `wait` all happen inside one critical
//! section, so no wakeup can slip between them.

use super::{CondId, LockId, WaitChan};
use crate::kernel::Kernel;
use crate::proc::{Sched, TaskId};

impl Kernel {
    pub(crate) fn condition_wait(&self, me: TaskId, lock: LockId, cond: CondId) {
        let mut state = self.gate();
        Self::lock_release_inner(&mut state, lock);
        let state = self.block(state, me, WaitChan::Cond(cond.0));
        let _state = self.lock_acquire_inner(state, me, lock);
    }

    /// Wake at most one waiter.
    pub(crate) fn condition_signal(&self, cond: CondId) {
        let mut state = self.gate();
        let _woken = Sched::unblock(&mut state, WaitChan::Cond(cond.0));
    }

    /// Wake every waiter.
    pub(crate) fn condition_broadcast(&self, cond: CondId) {
        let mut state = self.gate();
        while Sched::unblock(&mut state, WaitChan::Cond(cond.0)) {}
    }
}
