//! Mailboxes.
//!
//! A fixed table of keyed slots, each a classic monitor: one lock, a
//! `more_space` condition for senders and a `more_data` condition for
//! receivers. Messages travel as `{4-byte little-endian length, payload}`
//! records through a circular byte buffer; records wrap at the end of
//! the buffer. Every wait sits in a `while` loop because wakeups are
//! advisory.

use arrayvec::ArrayVec;

use crate::console::DIAG_ROW_MBOX;
use crate::kernel::{Kernel, KernelState};
use crate::param::{BUFFER_SIZE, MAX_MBOX, MAX_MESSAGE_LENGTH};
use crate::proc::TaskId;
use crate::sync::{CondId, LockId};

/// Bytes of the on-ring message header.
pub const MSG_HEADER_SIZE: usize = 4;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MboxId(pub(crate) usize);

/// A received message.
pub type Msg = ArrayVec<u8, MAX_MESSAGE_LENGTH>;

pub(crate) struct Mbox {
    pub lock: LockId,
    pub more_space: CondId,
    pub more_data: CondId,
    pub used_count: u32,
    pub message_count: u32,
    /// Write cursor.
    pub head: usize,
    /// Read cursor.
    pub tail: usize,
    pub buffer: [u8; BUFFER_SIZE],
}

impl Mbox {
    pub fn new(lock: LockId, more_space: CondId, more_data: CondId) -> Self {
        Self {
            lock,
            more_space,
            more_data,
            used_count: 0,
            message_count: 0,
            head: 0,
            tail: 0,
            buffer: [0; BUFFER_SIZE],
        }
    }

    fn reinit(&mut self) {
        self.used_count = 0;
        self.message_count = 0;
        self.head = 0;
        self.tail = 0;
        self.buffer = [0; BUFFER_SIZE];
    }

    pub fn used_bytes(&self) -> usize {
        if self.head == self.tail {
            if self.message_count > 0 {
                BUFFER_SIZE
            } else {
                0
            }
        } else if self.head > self.tail {
            self.head - self.tail
        } else {
            BUFFER_SIZE - (self.tail - self.head)
        }
    }

    pub fn space(&self) -> usize {
        BUFFER_SIZE - self.used_bytes()
    }

    /// Copy `bytes` in at the write cursor, wrapping.
    fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.buffer[self.head] = b;
            self.head = (self.head + 1) % BUFFER_SIZE;
        }
    }

    /// Copy `buf.len()` bytes out at the read cursor, wrapping.
    fn pull(&mut self, buf: &mut [u8]) {
        for b in buf {
            *b = self.buffer[self.tail];
            self.tail = (self.tail + 1) % BUFFER_SIZE;
        }
    }
}

pub(crate) fn make_mboxes(state: &mut KernelState) {
    for _ in 0..MAX_MBOX {
        let lock = state.sync.new_lock();
        let more_space = state.sync.new_cond();
        let more_data = state.sync.new_cond();
        state.mboxes.push(Mbox::new(lock, more_space, more_data));
    }
}

impl Kernel {
    /// Open the mailbox with key `key`. A key outside the table kills the
    /// caller.
    pub(crate) fn mbox_open(&self, me: TaskId, key: usize) -> MboxId {
        if key >= MAX_MBOX {
            self.kill_task(me, DIAG_ROW_MBOX, &format!("mbox: no mailbox {key}"));
        }
        let mut state = self.gate();
        state.mboxes[key].used_count += 1;
        MboxId(key)
    }

    /// Drop one use of `q`. The last close wakes everyone still waiting
    /// on the slot and resets it.
    pub(crate) fn mbox_close(&self, q: MboxId) {
        let (more_space, more_data, last) = {
            let mut state = self.gate();
            let mbox = &mut state.mboxes[q.0];
            mbox.used_count = mbox.used_count.saturating_sub(1);
            (mbox.more_space, mbox.more_data, mbox.used_count == 0)
        };
        if last {
            self.condition_broadcast(more_space);
            self.condition_broadcast(more_data);
            self.gate().mboxes[q.0].reinit();
        }
    }

    /// Send `payload` to `q`, waiting for room.
    pub(crate) fn mbox_send(&self, me: TaskId, q: MboxId, payload: &[u8]) {
        if payload.len() > MAX_MESSAGE_LENGTH {
            self.kill_task(me, DIAG_ROW_MBOX, "mbox: message too long");
        }
        let record = MSG_HEADER_SIZE + payload.len();
        let (lock, more_space, more_data) = self.mbox_handles(q);

        self.lock_acquire(me, lock);
        loop {
            {
                let mut state = self.gate();
                let mbox = &mut state.mboxes[q.0];
                if record <= mbox.space() {
                    mbox.push(&(payload.len() as u32).to_le_bytes());
                    mbox.push(payload);
                    mbox.message_count += 1;
                    break;
                }
            }
            self.condition_wait(me, lock, more_space);
        }
        self.condition_broadcast(more_data);
        self.lock_release(lock);
    }

    /// Receive the oldest message from `q`, waiting for one to arrive.
    pub(crate) fn mbox_recv(&self, me: TaskId, q: MboxId) -> Msg {
        let (lock, more_space, more_data) = self.mbox_handles(q);

        self.lock_acquire(me, lock);
        let msg = loop {
            {
                let mut state = self.gate();
                let mbox = &mut state.mboxes[q.0];
                if mbox.message_count > 0 {
                    let mut header = [0; MSG_HEADER_SIZE];
                    mbox.pull(&mut header);
                    let len = u32::from_le_bytes(header) as usize;
                    let mut msg = Msg::new();
                    for _ in 0..len.min(MAX_MESSAGE_LENGTH) {
                        let mut byte = [0];
                        mbox.pull(&mut byte);
                        msg.push(byte[0]);
                    }
                    mbox.message_count -= 1;
                    break msg;
                }
            }
            self.condition_wait(me, lock, more_data);
        };
        self.condition_broadcast(more_space);
        self.lock_release(lock);
        msg
    }

    /// Message count and free space of `q`.
    pub(crate) fn mbox_stat(&self, q: MboxId) -> (u32, usize) {
        let state = self.gate();
        let mbox = &state.mboxes[q.0];
        (mbox.message_count, mbox.space())
    }

    fn mbox_handles(&self, q: MboxId) -> (LockId, CondId, CondId) {
        let state = self.gate();
        let mbox = &state.mboxes[q.0];
        (mbox.lock, mbox.more_space, mbox.more_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{CondId, LockId};

    fn mbox() -> Mbox {
        Mbox::new(LockId(0), CondId(0), CondId(1))
    }

    #[test]
    fn space_accounting() {
        let mut m = mbox();
        assert_eq!(m.space(), BUFFER_SIZE);
        m.push(&[0; 10]);
        m.message_count = 1;
        assert_eq!(m.used_bytes(), 10);
        assert_eq!(m.space() + m.used_bytes(), BUFFER_SIZE);
    }

    #[test]
    fn wraparound_round_trip() {
        let mut m = mbox();
        // Park the cursors near the end so the record wraps.
        m.head = BUFFER_SIZE - 3;
        m.tail = BUFFER_SIZE - 3;
        let payload = [1, 2, 3, 4, 5, 6, 7, 8];
        m.push(&(payload.len() as u32).to_le_bytes());
        m.push(&payload);
        m.message_count = 1;
        assert_eq!(m.used_bytes(), MSG_HEADER_SIZE + payload.len());

        let mut header = [0; MSG_HEADER_SIZE];
        m.pull(&mut header);
        assert_eq!(u32::from_le_bytes(header), 8);
        let mut out = [0; 8];
        m.pull(&mut out);
        assert_eq!(out, payload);
    }

    #[test]
    fn full_buffer_has_no_space() {
        let mut m = mbox();
        m.push(&[0xFF; BUFFER_SIZE]);
        m.message_count = 1;
        assert_eq!(m.head, m.tail);
        assert_eq!(m.space(), 0);
    }
}
