//! FIFO wait queues.

use super::{TaskId, Tcb};

/// A queue of blocked tasks, chained through `Tcb::next`. Enqueue at the
/// tail, dequeue at the head.
pub struct WaitQueue {
    head: Option<TaskId>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self { head: None }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn append(&mut self, tcbs: &mut [Tcb], tid: TaskId) {
        debug_assert!(tcbs[tid].next.is_none() && tcbs[tid].prev.is_none());
        match self.head {
            None => self.head = Some(tid),
            Some(head) => {
                let mut tail = head;
                while let Some(next) = tcbs[tail].next {
                    tail = next;
                }
                tcbs[tail].next = Some(tid);
            }
        }
    }

    pub fn pop(&mut self, tcbs: &mut [Tcb]) -> Option<TaskId> {
        let head = self.head?;
        self.head = tcbs[head].next.take();
        Some(head)
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::TaskState;

    fn table(n: usize) -> Vec<Tcb> {
        (0..n)
            .map(|i| {
                let mut t = Tcb::unused();
                t.pid = i as i32 + 1;
                t.state = TaskState::Blocked;
                t
            })
            .collect()
    }

    #[test]
    fn fifo_order() {
        let mut tcbs = table(3);
        let mut q = WaitQueue::new();
        assert!(q.is_empty());
        q.append(&mut tcbs, 2);
        q.append(&mut tcbs, 0);
        q.append(&mut tcbs, 1);
        assert_eq!(q.pop(&mut tcbs), Some(2));
        assert_eq!(q.pop(&mut tcbs), Some(0));
        assert_eq!(q.pop(&mut tcbs), Some(1));
        assert_eq!(q.pop(&mut tcbs), None);
    }

    #[test]
    fn pop_clears_link() {
        let mut tcbs = table(2);
        let mut q = WaitQueue::new();
        q.append(&mut tcbs, 0);
        q.append(&mut tcbs, 1);
        assert_eq!(q.pop(&mut tcbs), Some(0));
        assert!(tcbs[0].next.is_none());
    }
}
