//! Physical memory, virtual address, and disk layout.
//!
//! Physical memory is one flat region:
//!
//! ```text
//! 0x00000000 .. KERNEL_TOP      kernel, identity mapped supervisor-only
//! 0x000B8000                    VGA text screen, identity mapped user-accessible
//! PAGEABLE_BASE ..              the pageable frame pool
//! ```
//!
//! The kernel's own page directory and page tables live in a reserved
//! slice of the kernel region, never in the pageable pool, so the pool
//! accounting of user processes is unaffected by boot.
//!
//! A process image is mapped at `PROCESS_ENTRY` and its stack grows down
//! from `PROCESS_STACK`. Both ranges fall inside one 4 MiB page-directory
//! region, so a process needs exactly one private page table besides its
//! directory.

use crate::param::PAGE_SIZE;

/// First byte after the identity-mapped kernel region.
pub const KERNEL_TOP: usize = 0x100000;

/// VGA text-mode screen.
pub const SCREEN_ADDR: usize = 0xB8000;

/// Kernel page directory, inside the reserved kernel slice.
pub const KERNEL_PGDIR: usize = 0x10000;

/// First kernel page table; the rest follow page by page.
pub const KERNEL_PT_BASE: usize = KERNEL_PGDIR + PAGE_SIZE;

/// Number of page frames reserved for kernel page tables.
pub const KERNEL_PT_FRAMES: usize = 4;

/// First frame of the pageable pool.
pub const PAGEABLE_BASE: usize = KERNEL_TOP;

/// Where a process image is mapped.
pub const PROCESS_ENTRY: u32 = 0x100_0000;

/// Base of the topmost user stack page; the stack grows down from here.
pub const PROCESS_STACK: u32 = 0x13F_F000;

/// Byte 2..3 of the boot image holds the post-bootblock sector count.
pub const OS_SIZE_LOC: u64 = 2;

/// First sector of the filesystem region on disk.
pub const SUPER_BLOCK_START: u32 = 256;

pub const fn page_round_down(addr: u32) -> u32 {
    addr & !(PAGE_SIZE as u32 - 1)
}
