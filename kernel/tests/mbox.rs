//! Mailbox round trips and the producer/consumer monitor protocol.

use std::sync::{Arc, Mutex};

use rondo_kernel::{KernelBuilder, BUFFER_SIZE, MSG_HEADER_SIZE};

#[test]
fn send_then_recv_round_trips() {
    let got = Arc::new(Mutex::new(Vec::new()));
    let g = Arc::clone(&got);
    let kernel = KernelBuilder::new()
        .spawn_thread(move |ctx| {
            let q = ctx.mbox_open(0);
            ctx.mbox_send(q, b"ping");
            let msg = ctx.mbox_recv(q);
            g.lock().unwrap().extend_from_slice(&msg);
            ctx.mbox_close(q);
        })
        .build();
    kernel.run();
    assert_eq!(*got.lock().unwrap(), b"ping");
}

#[test]
fn stat_reports_count_and_space() {
    let seen = Arc::new(Mutex::new((0u32, 0usize)));
    let s = Arc::clone(&seen);
    let kernel = KernelBuilder::new()
        .spawn_thread(move |ctx| {
            let q = ctx.mbox_open(1);
            ctx.mbox_send(q, &[7; 10]);
            ctx.mbox_send(q, &[8; 10]);
            *s.lock().unwrap() = ctx.mbox_stat(q);
            ctx.mbox_close(q);
        })
        .build();
    kernel.run();
    let (count, space) = *seen.lock().unwrap();
    assert_eq!(count, 2);
    assert_eq!(space, BUFFER_SIZE - 2 * (MSG_HEADER_SIZE + 10));
}

#[test]
fn producer_consumer_over_a_small_ring() {
    // 100 messages of 64 bytes through a 256-byte ring: the producer
    // must repeatedly fill the buffer and wait for space.
    const MESSAGES: usize = 100;
    const PAYLOAD: usize = 64;

    let received = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&received);
    let kernel = KernelBuilder::new()
        .spawn_thread(move |ctx| {
            let q = ctx.mbox_open(0);
            for i in 0..MESSAGES {
                let body = [i as u8; PAYLOAD];
                ctx.mbox_send(q, &body);
            }
            ctx.mbox_close(q);
        })
        .spawn_thread(move |ctx| {
            let q = ctx.mbox_open(0);
            for _ in 0..MESSAGES {
                let msg = ctx.mbox_recv(q);
                r.lock().unwrap().push(msg);
            }
            ctx.mbox_close(q);
        })
        .build();
    kernel.run();

    let received = received.lock().unwrap();
    assert_eq!(received.len(), MESSAGES);
    let sent_sum: u64 = (0..MESSAGES).map(|i| (i as u64 & 0xFF) * PAYLOAD as u64).sum();
    let got_sum: u64 = received
        .iter()
        .flat_map(|m| m.iter())
        .map(|&b| b as u64)
        .sum();
    assert_eq!(got_sum, sent_sum);
    for (i, msg) in received.iter().enumerate() {
        assert_eq!(msg.len(), PAYLOAD);
        assert!(msg.iter().all(|&b| b == i as u8));
    }
}

#[test]
fn invalid_key_kills_the_caller() {
    let kernel = KernelBuilder::new()
        .spawn_thread(|ctx| {
            let _ = ctx.mbox_open(9999);
            unreachable!("open of a bad key returns to its caller");
        })
        .spawn_thread(|_| {})
        .build();
    kernel.run();
    assert!(kernel
        .console_row(rondo_kernel::DIAG_ROW_MBOX)
        .contains("no mailbox"));
}
