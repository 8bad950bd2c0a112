//! Round-robin scheduler.
//!
//! The ready ring is circular and doubly linked; `current` names the
//! running task. Scheduling points are exactly `yield`, `block` and
//! `exit`; nothing preempts. Dispatch hands the single run permit to the
//! successor task and parks the caller until `current` comes back around
//! to it.
//!
//! `unblock` splices the woken task in immediately before the running
//! task, so it gets the CPU before the running task sees it again.

use std::sync::MutexGuard;

use super::{TaskId, TaskKind, TaskState, Tcb};
use crate::console::DIAG_ROW_SCHED;
use crate::kernel::{Kernel, KernelState};
use crate::param::MAX_TASKS;
use crate::sync::WaitChan;

pub struct Sched {
    pub tcbs: Vec<Tcb>,
    /// The running task.
    pub current: Option<TaskId>,
    /// First registered task, dispatched at boot.
    pub first: Option<TaskId>,
    pub halted: bool,
    pub switches_process: u64,
    pub switches_thread: u64,
}

impl Sched {
    pub fn new() -> Self {
        Self {
            tcbs: (0..MAX_TASKS).map(|_| Tcb::unused()).collect(),
            current: None,
            first: None,
            halted: false,
            switches_process: 0,
            switches_thread: 0,
        }
    }

    /// Claim the next unused TCB slot and link it at the tail of the
    /// ready ring. Returns the new task's id.
    pub fn register(&mut self, kind: TaskKind) -> Option<TaskId> {
        let tid = self
            .tcbs
            .iter()
            .position(|t| t.state == TaskState::Unused)?;
        let tcb = &mut self.tcbs[tid];
        tcb.pid = tid as i32 + 1;
        tcb.kind = kind;
        tcb.state = match kind {
            TaskKind::Process => TaskState::FirstTimeProcess,
            TaskKind::Thread => TaskState::FirstTimeThread,
        };
        match self.first {
            None => {
                self.first = Some(tid);
                self.tcbs[tid].next = Some(tid);
                self.tcbs[tid].prev = Some(tid);
            }
            Some(first) => self.ring_insert_before(first, tid),
        }
        Some(tid)
    }

    /// Insert `tid` into the ring immediately before `at`.
    pub fn ring_insert_before(&mut self, at: TaskId, tid: TaskId) {
        debug_assert!(self.tcbs[tid].next.is_none() && self.tcbs[tid].prev.is_none());
        let prev = self.tcbs[at].prev.expect("ring link");
        self.tcbs[tid].next = Some(at);
        self.tcbs[tid].prev = Some(prev);
        self.tcbs[prev].next = Some(tid);
        self.tcbs[at].prev = Some(tid);
    }

    /// Splice `tid` out of the ring, clearing its links.
    pub fn ring_unlink(&mut self, tid: TaskId) {
        let next = self.tcbs[tid].next.take().expect("ring link");
        let prev = self.tcbs[tid].prev.take().expect("ring link");
        if next != tid {
            self.tcbs[prev].next = Some(next);
            self.tcbs[next].prev = Some(prev);
        }
    }

    /// Move the head of `chan`'s wait queue back into the ready ring,
    /// just before the running task. Returns whether a task was woken.
    /// Must be called inside a critical section.
    pub fn unblock(state: &mut KernelState, chan: WaitChan) -> bool {
        let (sched, sync) = state.sched_and_sync();
        match sync.queue_mut(chan).pop(&mut sched.tcbs) {
            None => false,
            Some(tid) => {
                sched.tcbs[tid].state = TaskState::Ready;
                let current = sched.current.expect("unblock: no running task");
                sched.ring_insert_before(current, tid);
                true
            }
        }
    }
}

impl Kernel {
    /// Hand the run permit to `next` and record the switch.
    pub(crate) fn dispatch(&self, state: &mut KernelState, next: TaskId) {
        state.sched.current = Some(next);
        let tcb = &mut state.sched.tcbs[next];
        tcb.ctx_switches += 1;
        match tcb.kind {
            TaskKind::Process => state.sched.switches_process += 1,
            TaskKind::Thread => state.sched.switches_thread += 1,
        }
        self.gates[next].notify_one();
    }

    /// Park until the scheduler comes back around to `me`. The gate is
    /// released while parked; the caller gets it back on return. If the
    /// kernel halts while we are parked, the task is torn down.
    pub(crate) fn suspend<'k>(
        &'k self,
        mut state: MutexGuard<'k, KernelState>,
        me: TaskId,
    ) -> MutexGuard<'k, KernelState> {
        while state.sched.current != Some(me) && !state.sched.halted {
            state = self
                .gates[me]
                .wait(state)
                .expect("kernel gate poisoned");
        }
        if state.sched.halted {
            drop(state);
            crate::kernel::raise_task_exit();
        }
        state
    }

    /// Voluntarily give up the CPU to the next ready task.
    pub(crate) fn task_yield(&self, me: TaskId) {
        let mut state = self.gate();
        debug_assert_eq!(state.sched.tcbs[me].state, TaskState::Ready);
        let next = state.sched.tcbs[me].next.expect("yield: not on ready ring");
        if next != me {
            self.dispatch(&mut state, next);
            let _state = self.suspend(state, me);
        }
    }

    /// Block `me` on `chan`'s wait queue and run the successor. Enters
    /// with the gate held, returns with it held again once unblocked.
    pub(crate) fn block<'k>(
        &'k self,
        mut state: MutexGuard<'k, KernelState>,
        me: TaskId,
        chan: WaitChan,
    ) -> MutexGuard<'k, KernelState> {
        let next = state.sched.tcbs[me].next.expect("block: not on ready ring");
        let next = (next != me).then_some(next);
        state.sched.ring_unlink(me);
        state.sched.tcbs[me].state = TaskState::Blocked;
        {
            let (sched, sync) = state.sched_and_sync();
            sync.queue_mut(chan).append(&mut sched.tcbs, me);
        }
        match next {
            Some(next) => self.dispatch(&mut state, next),
            None => {
                // Every task is blocked; nothing can ever run again.
                state
                    .console
                    .write_at(DIAG_ROW_SCHED, "scheduler: no runnable tasks");
                self.record_panic(Box::new("scheduler: no runnable tasks".to_string()));
                self.halt(&mut state);
            }
        }
        self.suspend(state, me)
    }

    /// Tear down `me`. Idempotent: the unwind path calls this again
    /// after an explicit `exit`.
    pub(crate) fn task_exit(&self, me: TaskId) {
        let mut state = self.gate();
        if state.sched.tcbs[me].state == TaskState::Exited {
            return;
        }
        if state.sched.halted {
            // Teardown after halt: the task may still sit on a wait
            // queue, so leave the links alone.
            state.sched.tcbs[me].state = TaskState::Exited;
            return;
        }
        let next = state.sched.tcbs[me].next.expect("exit: not on ready ring");
        let next = (next != me).then_some(next);
        state.sched.ring_unlink(me);
        state.sched.tcbs[me].state = TaskState::Exited;
        match next {
            Some(next) => self.dispatch(&mut state, next),
            None => self.halt(&mut state),
        }
    }

    /// Stop the machine: the last ready task has exited. Any tasks still
    /// parked on wait queues are torn down as their threads wake.
    pub(crate) fn halt(&self, state: &mut KernelState) {
        state.sched.halted = true;
        for gate in self.gates.iter() {
            gate.notify_all();
        }
        self.halt_cv.notify_all();
    }
}
