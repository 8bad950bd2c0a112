//! Counting semaphores.
//!
//! The counter tracks `initial + ups - downs` and may go negative; a
//! negative counter counts the tasks blocked in `down`.

use super::{SemId, WaitChan};
use crate::kernel::Kernel;
use crate::proc::{Sched, TaskId};

impl Kernel {
    pub(crate) fn semaphore_up(&self, sem: SemId) {
        let mut state = self.gate();
        state.sync.sems[sem.0].count += 1;
        if !state.sync.sems[sem.0].waiting.is_empty() {
            let _woken = Sched::unblock(&mut state, WaitChan::Sem(sem.0));
        }
    }

    pub(crate) fn semaphore_down(&self, me: TaskId, sem: SemId) {
        let mut state = self.gate();
        state.sync.sems[sem.0].count -= 1;
        if state.sync.sems[sem.0].count < 0 {
            state = self.block(state, me, WaitChan::Sem(sem.0));
        }
        drop(state);
    }
}
