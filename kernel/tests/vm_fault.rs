//! Demand paging, eviction, and fault-path kills.

use rondo_kernel::{
    BlockDevice, Config, EvictionPolicy, KernelBuilder, RamDisk, DIAG_ROW_VM, PAGE_SIZE,
    PROCESS_ENTRY, SECTOR_SIZE, SUPER_BLOCK_START,
};

const SWAP_LOC: u32 = 50;
const IMAGE_PAGES: usize = 3;
const IMAGE_SECTORS: u32 = (IMAGE_PAGES * PAGE_SIZE / SECTOR_SIZE) as u32;

/// A disk whose filesystem region is untouched and whose swap region
/// holds a recognizable pattern: sector `s` is filled with `s as u8`.
fn patterned_disk() -> RamDisk {
    let mut disk = RamDisk::new(SUPER_BLOCK_START + 2048);
    for s in 0..IMAGE_SECTORS {
        let sector = [(SWAP_LOC + s) as u8; SECTOR_SIZE];
        disk.write_sector(SWAP_LOC + s, &sector);
    }
    disk
}

fn tight_config() -> Config {
    Config {
        // Directory + page table + one stack page pinned leaves exactly
        // one frame for the three image pages.
        pageable_pages: 4,
        process_stack_pages: 1,
        eviction: EvictionPolicy::Random { seed: 99 },
        ..Config::default()
    }
}

#[test]
fn pages_fault_in_from_swap_and_dirty_victims_write_back() {
    let kernel = KernelBuilder::new()
        .config(tight_config())
        .disk(patterned_disk())
        .spawn_process(SWAP_LOC, IMAGE_SECTORS, |ctx| {
            // Walk the image; every page is a fault, every fault after
            // the first evicts the only unpinned frame.
            for p in 0..IMAGE_PAGES as u32 {
                let vaddr = PROCESS_ENTRY + p * PAGE_SIZE as u32;
                let first_sector = SWAP_LOC + p * (PAGE_SIZE / SECTOR_SIZE) as u32;
                assert_eq!(ctx.mem_read_u8(vaddr), first_sector as u8);
                // Last byte of the page comes from the page's last sector.
                assert_eq!(
                    ctx.mem_read_u8(vaddr + PAGE_SIZE as u32 - 1),
                    (first_sector + 7) as u8
                );
            }
            assert_eq!(ctx.page_faults(), IMAGE_PAGES as u32);

            // Dirty page 0, then touch page 1: the only candidate victim
            // is page 0's frame, so the write must reach the disk.
            ctx.mem_write_u8(PROCESS_ENTRY, 0xEE);
            let _ = ctx.mem_read_u8(PROCESS_ENTRY + PAGE_SIZE as u32);
            assert_eq!(ctx.page_faults(), IMAGE_PAGES as u32 + 2);
        })
        .build();
    kernel.run();

    let sector = kernel.read_disk_sector(SWAP_LOC);
    assert_eq!(sector[0], 0xEE, "dirty victim was not written back");
    assert!(sector[1..].iter().all(|&b| b == SWAP_LOC as u8));
    assert_eq!(kernel.page_fault_count(1), IMAGE_PAGES as u32 + 2);
}

#[test]
fn stack_pages_are_pinned_and_writable_without_faults() {
    let kernel = KernelBuilder::new()
        .config(tight_config())
        .disk(patterned_disk())
        .spawn_process(SWAP_LOC, IMAGE_SECTORS, |ctx| {
            let sp = ctx.stack_base();
            assert_eq!(sp, rondo_kernel::PROCESS_STACK);
            ctx.mem_write_u32(sp + 16, 0xDEAD_BEEF);
            assert_eq!(ctx.mem_read_u32(sp + 16), 0xDEAD_BEEF);
            assert_eq!(ctx.page_faults(), 0);
        })
        .build();
    kernel.run();
}

#[test]
fn null_dereference_kills_the_process() {
    let kernel = KernelBuilder::new()
        .disk(patterned_disk())
        .spawn_process(SWAP_LOC, IMAGE_SECTORS, |ctx| {
            let _ = ctx.mem_read_u8(0);
            unreachable!("a null dereference never returns");
        })
        .build();
    kernel.run();
    assert!(kernel.console_row(DIAG_ROW_VM).contains("null dereference"));
}

#[test]
fn kernel_memory_is_protected_from_user_access() {
    let kernel = KernelBuilder::new()
        .disk(patterned_disk())
        .spawn_process(SWAP_LOC, IMAGE_SECTORS, |ctx| {
            // Identity-mapped kernel text: present, supervisor-only.
            let _ = ctx.mem_read_u8(0x5000);
            unreachable!("an access violation never returns");
        })
        .build();
    kernel.run();
    assert!(kernel.console_row(DIAG_ROW_VM).contains("access violation"));
}

#[test]
fn fault_outside_the_image_kills_the_process() {
    let kernel = KernelBuilder::new()
        .disk(patterned_disk())
        .spawn_process(SWAP_LOC, IMAGE_SECTORS, |ctx| {
            let beyond = PROCESS_ENTRY + (IMAGE_PAGES * PAGE_SIZE) as u32 + 123;
            let _ = ctx.mem_read_u8(beyond);
            unreachable!("a wild fault never returns");
        })
        .build();
    kernel.run();
    assert!(kernel.console_row(DIAG_ROW_VM).contains("outside image"));
}

#[test]
fn threads_have_no_user_memory() {
    let kernel = KernelBuilder::new()
        .spawn_thread(|ctx| {
            let _ = ctx.mem_read_u8(PROCESS_ENTRY);
            unreachable!("threads are killed on user-memory access");
        })
        .build();
    kernel.run();
    assert!(kernel.console_row(DIAG_ROW_VM).contains("no user memory"));
}
