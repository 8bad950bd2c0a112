//! The numbered trap surface, driven from a process through its own
//! user memory.

use rondo_kernel::{
    KernelBuilder, OpenMode, RamDisk, PROCESS_STACK, SUPER_BLOCK_START, SYS_CLOSE, SYS_GETPID,
    SYS_LSEEK, SYS_MBOX_OPEN, SYS_MBOX_RECV, SYS_MBOX_SEND, SYS_MBOX_STAT, SYS_OPEN, SYS_READ,
    SYS_WRITE, SYS_YIELD,
};

const SWAP_LOC: u32 = 40;
const SWAP_SECTORS: u32 = 8;

/// Write a NUL-terminated string into process memory.
fn put_str(ctx: &rondo_kernel::TaskCtx, vaddr: u32, s: &str) {
    for (i, b) in s.bytes().enumerate() {
        ctx.mem_write_u8(vaddr + i as u32, b);
    }
    ctx.mem_write_u8(vaddr + s.len() as u32, 0);
}

#[test]
fn file_syscalls_work_through_user_pointers() {
    let kernel = KernelBuilder::new()
        .disk(RamDisk::new(SUPER_BLOCK_START + 2048))
        .spawn_process(SWAP_LOC, SWAP_SECTORS, |ctx| {
            // Scratch space on the (pinned) user stack page.
            let path = PROCESS_STACK + 0x100;
            let buf = PROCESS_STACK + 0x200;

            assert_eq!(ctx.syscall(SYS_GETPID, 0, 0, 0), ctx.pid());
            assert_eq!(ctx.syscall(SYS_YIELD, 0, 0, 0), 0);

            put_str(ctx, path, "note");
            let fd = ctx.syscall(SYS_OPEN, path, (OpenMode::RDWR | OpenMode::CREAT).bits(), 0);
            assert!(fd >= 0);

            for (i, b) in b"via trap".iter().enumerate() {
                ctx.mem_write_u8(buf + i as u32, *b);
            }
            assert_eq!(ctx.syscall(SYS_WRITE, fd as u32, buf, 8), 8);
            assert_eq!(ctx.syscall(SYS_LSEEK, fd as u32, 0, 0), 0);

            let readback = PROCESS_STACK + 0x300;
            assert_eq!(ctx.syscall(SYS_READ, fd as u32, readback, 8), 8);
            for (i, b) in b"via trap".iter().enumerate() {
                assert_eq!(ctx.mem_read_u8(readback + i as u32), *b);
            }
            assert_eq!(ctx.syscall(SYS_CLOSE, fd as u32, 0, 0), 0);
        })
        .build();
    kernel.run();
}

#[test]
fn mailbox_syscalls_use_the_wire_record() {
    let kernel = KernelBuilder::new()
        .disk(RamDisk::new(SUPER_BLOCK_START + 2048))
        .spawn_process(SWAP_LOC, SWAP_SECTORS, |ctx| {
            let q = ctx.syscall(SYS_MBOX_OPEN, 2, 0, 0);
            assert_eq!(q, 2);

            // Outgoing record: length header then payload.
            let rec = PROCESS_STACK + 0x100;
            ctx.mem_write_u32(rec, 3);
            for (i, b) in b"msg".iter().enumerate() {
                ctx.mem_write_u8(rec + 4 + i as u32, *b);
            }
            assert_eq!(ctx.syscall(SYS_MBOX_SEND, q as u32, rec, 0), 0);

            let count_at = PROCESS_STACK + 0x200;
            let space_at = PROCESS_STACK + 0x204;
            assert_eq!(ctx.syscall(SYS_MBOX_STAT, q as u32, count_at, space_at), 0);
            assert_eq!(ctx.mem_read_u32(count_at), 1);

            let inbox = PROCESS_STACK + 0x300;
            assert_eq!(ctx.syscall(SYS_MBOX_RECV, q as u32, inbox, 0), 3);
            assert_eq!(ctx.mem_read_u32(inbox), 3);
            assert_eq!(ctx.mem_read_u8(inbox + 4), b'm');
            assert_eq!(ctx.mem_read_u8(inbox + 6), b'g');
        })
        .build();
    kernel.run();
}

#[test]
fn unknown_syscalls_are_reported_and_rejected() {
    let kernel = KernelBuilder::new()
        .spawn_thread(|ctx| {
            assert_eq!(ctx.syscall(777, 0, 0, 0), -1);
        })
        .build();
    kernel.run();
    assert!(kernel
        .console_row(rondo_kernel::DIAG_ROW_SCHED)
        .contains("unknown syscall 777"));
}
