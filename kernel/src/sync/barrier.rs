//! Barriers.
//!
//! One-shot cycles: the `reach`-th arrival releases everyone and resets
//! the counter, so the same barrier is immediately good for the next
//! cycle.

use super::{BarrierId, WaitChan};
use crate::kernel::Kernel;
use crate::proc::{Sched, TaskId};

impl Kernel {
    pub(crate) fn barrier_wait(&self, me: TaskId, barrier: BarrierId) {
        let mut state = self.gate();
        state.sync.barriers[barrier.0].count += 1;
        if state.sync.barriers[barrier.0].count == state.sync.barriers[barrier.0].reach {
            while Sched::unblock(&mut state, WaitChan::Barrier(barrier.0)) {}
            state.sync.barriers[barrier.0].count = 0;
        } else {
            state = self.block(state, me, WaitChan::Barrier(barrier.0));
        }
        drop(state);
    }
}
