//! Virtual memory.
//!
//! Two-level 32-bit x86 page tables, kept inside physical frames and
//! walked in software. The kernel is identity mapped supervisor-only
//! (the screen page user-accessible on top), a process image is mapped
//! at `PROCESS_ENTRY` on demand, and the user stack sits on pinned
//! frames below `PROCESS_STACK`.
//!
//! Frames come from a fixed pageable pool. Once the pool is exhausted a
//! victim is picked uniformly at random among the unpinned frames; a
//! dirty victim is first written back to its owner's swap region. The
//! fault handler runs with interrupts on and holds `memory_lock` for its
//! whole body.

use bitflags::bitflags;

use crate::console::DIAG_ROW_VM;
use crate::disk::BlockDevice;
use crate::kernel::Kernel;
use crate::memlayout::{
    page_round_down, KERNEL_PGDIR, KERNEL_PT_BASE, KERNEL_PT_FRAMES, PAGEABLE_BASE, PROCESS_ENTRY,
    PROCESS_STACK, SCREEN_ADDR,
};
use crate::param::{PAGE_SIZE, SECTOR_SIZE, SECTORS_PER_PAGE};
use crate::proc::{Pid, TaskId};
use crate::sync::LockId;

/// Entries per page directory or page table.
const PD_ENTRIES: usize = 1024;

bitflags! {
    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub struct PteFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const DIRTY = 1 << 6;
    }
}

const FLAG_MASK: u32 = 0xFFF;

const fn pdx(vaddr: u32) -> usize {
    (vaddr >> 22) as usize
}

const fn ptx(vaddr: u32) -> usize {
    (vaddr >> 12) as usize & (PD_ENTRIES - 1)
}

/// Page-fault error code, hardware layout: bit 0 set when the fault was
/// a protection violation on a present page, bit 1 on writes, bit 2 on
/// user-mode accesses.
#[derive(Copy, Clone, Debug)]
pub(crate) struct FaultCode(pub u32);

impl FaultCode {
    fn new(present: bool, write: bool, user: bool) -> Self {
        Self((present as u32) | ((write as u32) << 1) | ((user as u32) << 2))
    }

    pub fn protection(self) -> bool {
        self.0 & 1 != 0
    }
}

/// Snapshot of the task that owns a frame, enough to reach its page
/// table and swap region after the task itself is gone.
#[derive(Copy, Clone, Default)]
pub(crate) struct FrameOwner {
    pub pid: Pid,
    pub pagedir: usize,
    pub swap_loc: u32,
    pub swap_size: u32,
}

/// One pageable physical frame.
#[derive(Copy, Clone, Default)]
pub(crate) struct FrameDesc {
    pub vaddr: u32,
    pub paddr: usize,
    pub owner: FrameOwner,
    pub pinned: bool,
}

pub(crate) struct Vm {
    /// Flat physical memory, kernel region plus the pageable pool.
    pub phys: Vec<u8>,
    pub descs: Vec<FrameDesc>,
    /// Frames handed out so far; allocation is a bump until the pool is
    /// full, then eviction.
    pub next_free: usize,
    rng: u64,
    pub kernel_pagedir: usize,
    /// Bump allocator over the reserved kernel page-table frames.
    kpt_next: usize,
    pub stack_pages: usize,
    /// Taken for the full duration of every page fault.
    pub memory_lock: LockId,
}

impl Vm {
    pub fn new(pageable_pages: usize, stack_pages: usize, seed: u64) -> Self {
        let phys_top = PAGEABLE_BASE + pageable_pages * PAGE_SIZE;
        let mut vm = Self {
            phys: vec![0; phys_top],
            descs: vec![FrameDesc::default(); pageable_pages],
            next_free: 0,
            rng: seed | 1,
            kernel_pagedir: KERNEL_PGDIR,
            kpt_next: 0,
            stack_pages,
            memory_lock: LockId(0),
        };
        vm.init_kernel_paging();
        vm
    }

    fn rand(&mut self) -> u64 {
        // xorshift64
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        x
    }

    pub fn read_u32(&self, paddr: usize) -> u32 {
        u32::from_le_bytes(self.phys[paddr..paddr + 4].try_into().expect("phys read"))
    }

    pub fn write_u32(&mut self, paddr: usize, value: u32) {
        self.phys[paddr..paddr + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Map `[start, end)` one to one into `pagedir`, creating kernel
    /// page tables as needed. Used for the kernel region and device
    /// ranges such as the screen.
    pub fn identity_map(&mut self, pagedir: usize, start: usize, end: usize, flags: PteFlags) {
        let mut addr = start & !(PAGE_SIZE - 1);
        while addr < end {
            let pde_addr = pagedir + 4 * pdx(addr as u32);
            let pde = self.read_u32(pde_addr);
            let table = if PteFlags::from_bits_truncate(pde).contains(PteFlags::PRESENT) {
                (pde & !FLAG_MASK) as usize
            } else {
                let table = self.alloc_kernel_table();
                self.write_u32(
                    pde_addr,
                    table as u32
                        | (PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER).bits(),
                );
                table
            };
            self.write_u32(
                table + 4 * ptx(addr as u32),
                addr as u32 | (flags | PteFlags::PRESENT).bits(),
            );
            addr += PAGE_SIZE;
        }
    }

    fn alloc_kernel_table(&mut self) -> usize {
        assert!(
            self.kpt_next < KERNEL_PT_FRAMES,
            "out of kernel page tables"
        );
        let table = KERNEL_PT_BASE + self.kpt_next * PAGE_SIZE;
        self.kpt_next += 1;
        table
    }

    /// Identity map the kernel and the pool supervisor-only, then remap
    /// the screen page so user code can reach it.
    fn init_kernel_paging(&mut self) {
        let phys_top = self.phys.len();
        self.identity_map(
            KERNEL_PGDIR,
            0,
            phys_top,
            PteFlags::WRITABLE,
        );
        self.identity_map(
            KERNEL_PGDIR,
            SCREEN_ADDR,
            SCREEN_ADDR + PAGE_SIZE,
            PteFlags::WRITABLE | PteFlags::USER,
        );
    }

    /// Translate `vaddr` through `pagedir`. On success returns the
    /// physical address; sets the dirty bit for writes.
    pub fn walk(
        &mut self,
        pagedir: usize,
        vaddr: u32,
        write: bool,
        user: bool,
    ) -> Result<usize, FaultCode> {
        let pde = self.read_u32(pagedir + 4 * pdx(vaddr));
        if !PteFlags::from_bits_truncate(pde).contains(PteFlags::PRESENT) {
            return Err(FaultCode::new(false, write, user));
        }
        let table = (pde & !FLAG_MASK) as usize;
        let pte_addr = table + 4 * ptx(vaddr);
        let pte = self.read_u32(pte_addr);
        let flags = PteFlags::from_bits_truncate(pte);
        if !flags.contains(PteFlags::PRESENT) {
            return Err(FaultCode::new(false, write, user));
        }
        if user && !flags.contains(PteFlags::USER) {
            return Err(FaultCode::new(true, write, user));
        }
        if write && !flags.contains(PteFlags::WRITABLE) {
            return Err(FaultCode::new(true, write, user));
        }
        if write {
            self.write_u32(pte_addr, pte | PteFlags::DIRTY.bits());
        }
        Ok((pte & !FLAG_MASK) as usize + (vaddr as usize & (PAGE_SIZE - 1)))
    }

    /// Allocate a physical frame for `vaddr` in `owner`'s address space.
    ///
    /// Hands out the next pool frame while any remain; afterwards evicts
    /// a random unpinned frame, writing it back to its owner's swap
    /// region when dirty. Returns `None` when every frame is pinned.
    pub fn get_memory(
        &mut self,
        disk: &mut dyn BlockDevice,
        pinned: bool,
        vaddr: u32,
        owner: FrameOwner,
    ) -> Option<usize> {
        let idx = if self.next_free < self.descs.len() {
            let idx = self.next_free;
            self.next_free += 1;
            idx
        } else {
            let unpinned: Vec<usize> = (0..self.descs.len())
                .filter(|&i| !self.descs[i].pinned)
                .collect();
            if unpinned.is_empty() {
                return None;
            }
            let victim = unpinned[self.rand() as usize % unpinned.len()];
            self.evict(disk, victim);
            victim
        };
        let paddr = PAGEABLE_BASE + idx * PAGE_SIZE;
        self.phys[paddr..paddr + PAGE_SIZE].fill(0);
        self.descs[idx] = FrameDesc {
            vaddr,
            paddr,
            owner,
            pinned,
        };
        Some(paddr)
    }

    /// Unmap the victim frame from its owner and write it back to swap
    /// if it was dirtied.
    fn evict(&mut self, disk: &mut dyn BlockDevice, victim: usize) {
        let desc = self.descs[victim];
        let pde = self.read_u32(desc.owner.pagedir + 4 * pdx(desc.vaddr));
        if !PteFlags::from_bits_truncate(pde).contains(PteFlags::PRESENT) {
            return;
        }
        let table = (pde & !FLAG_MASK) as usize;
        let pte_addr = table + 4 * ptx(desc.vaddr);
        let pte = self.read_u32(pte_addr);
        self.write_u32(pte_addr, 0);
        if PteFlags::from_bits_truncate(pte).contains(PteFlags::DIRTY) {
            let sector_off = (desc.vaddr - PROCESS_ENTRY) / SECTOR_SIZE as u32;
            let sector_off = sector_off - sector_off % SECTORS_PER_PAGE as u32;
            let count =
                (SECTORS_PER_PAGE as u32).min(desc.owner.swap_size.saturating_sub(sector_off));
            for s in 0..count as usize {
                let from = desc.paddr + s * SECTOR_SIZE;
                let sector: &[u8; SECTOR_SIZE] = self.phys[from..from + SECTOR_SIZE]
                    .try_into()
                    .expect("sector slice");
                disk.write_sector(desc.owner.swap_loc + sector_off + s as u32, sector);
            }
        }
    }

    /// Build a process address space: a private directory seeded with
    /// the kernel's entries, one page table covering the image and stack
    /// region, pinned stack frames, and demand PTEs over the image.
    ///
    /// Returns the directory's physical address, or `None` if the pool
    /// cannot cover the pinned allocations.
    pub fn setup_process_memory(
        &mut self,
        disk: &mut dyn BlockDevice,
        mut owner: FrameOwner,
    ) -> Option<usize> {
        let pagedir = self.get_memory(disk, true, 0, owner)?;
        owner.pagedir = pagedir;
        for i in 0..PD_ENTRIES {
            let entry = self.read_u32(self.kernel_pagedir + 4 * i);
            if PteFlags::from_bits_truncate(entry).contains(PteFlags::PRESENT) {
                self.write_u32(pagedir + 4 * i, entry);
            }
        }

        // One private table covers both the image and the stack.
        debug_assert_eq!(pdx(PROCESS_ENTRY), pdx(PROCESS_STACK));
        let table = self.get_memory(disk, true, 0, owner)?;
        self.write_u32(
            pagedir + 4 * pdx(PROCESS_ENTRY),
            table as u32 | (PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER).bits(),
        );

        let user = PteFlags::WRITABLE | PteFlags::USER;
        for i in 0..self.stack_pages {
            let vaddr = PROCESS_STACK - (i * PAGE_SIZE) as u32;
            let frame = self.get_memory(disk, true, vaddr, owner)?;
            self.write_u32(
                table + 4 * ptx(vaddr),
                frame as u32 | (user | PteFlags::PRESENT).bits(),
            );
        }

        // Demand entries: not present, but user-writable once paged in.
        let image_pages =
            (owner.swap_size as usize * SECTOR_SIZE).div_ceil(PAGE_SIZE);
        for p in 0..image_pages {
            let vaddr = PROCESS_ENTRY + (p * PAGE_SIZE) as u32;
            assert!(
                vaddr < PROCESS_STACK - ((self.stack_pages - 1) * PAGE_SIZE) as u32,
                "process image overlaps its stack"
            );
            self.write_u32(table + 4 * ptx(vaddr), user.bits());
        }
        Some(pagedir)
    }

    /// The page-in parameters for a fault at `vaddr`: disk sector and
    /// sector count, clamped to the remaining image.
    fn swap_span(owner: FrameOwner, vaddr: u32) -> (u32, u32) {
        let sector_off = (vaddr - PROCESS_ENTRY) / SECTOR_SIZE as u32;
        let sector_off = sector_off - sector_off % SECTORS_PER_PAGE as u32;
        let count = (SECTORS_PER_PAGE as u32).min(owner.swap_size - sector_off);
        (owner.swap_loc + sector_off, count)
    }
}

impl Kernel {
    /// Translate a user access, faulting pages in as needed. The trap
    /// path records the faulting address and error code in the TCB, then
    /// re-walks after the handler returns.
    pub(crate) fn user_translate(&self, me: TaskId, vaddr: u32, write: bool) -> usize {
        loop {
            {
                let mut state = self.gate();
                let pagedir = state.sched.tcbs[me].pagedir;
                match state.vm.walk(pagedir, vaddr, write, true) {
                    Ok(paddr) => return paddr,
                    Err(code) => {
                        let tcb = &mut state.sched.tcbs[me];
                        tcb.fault_addr = vaddr;
                        tcb.error_code = code.0;
                    }
                }
            }
            self.page_fault_handler(me);
        }
    }

    /// Service the page fault recorded in `me`'s TCB: entered with
    /// interrupts on, holds `memory_lock` for the duration. Kills the
    /// task on a null dereference, an access violation, a fault outside
    /// the image, or when no frame can be evicted.
    pub(crate) fn page_fault_handler(&self, me: TaskId) {
        let memory_lock = self.gate().vm.memory_lock;
        self.lock_acquire(me, memory_lock);

        let (vaddr, fail) = {
            let state = self.gate();
            let tcb = &state.sched.tcbs[me];
            let vaddr = tcb.fault_addr;
            let code = FaultCode(tcb.error_code);
            let image_end = PROCESS_ENTRY + tcb.swap_size * SECTOR_SIZE as u32;
            let fail = if vaddr == 0 {
                Some(format!("pid {}: null dereference", tcb.pid))
            } else if code.protection() {
                Some(format!("pid {}: access violation at {vaddr:#x}", tcb.pid))
            } else if !(PROCESS_ENTRY..image_end).contains(&vaddr) {
                Some(format!("pid {}: page fault outside image at {vaddr:#x}", tcb.pid))
            } else {
                None
            };
            (vaddr, fail)
        };
        if let Some(msg) = fail {
            self.lock_release(memory_lock);
            self.kill_task(me, DIAG_ROW_VM, &msg);
        }

        let killed: Option<String> = {
            let mut state = self.gate();
            let tcb = &state.sched.tcbs[me];
            let owner = FrameOwner {
                pid: tcb.pid,
                pagedir: tcb.pagedir,
                swap_loc: tcb.swap_loc,
                swap_size: tcb.swap_size,
            };
            let page = page_round_down(vaddr);
            let (sector, count) = Vm::swap_span(owner, page);
            let state = &mut *state;
            match state.vm.get_memory(state.disk.as_mut(), false, page, owner) {
                None => Some(format!("pid {}: out of memory", owner.pid)),
                Some(frame) => {
                    for s in 0..count as usize {
                        let mut sec = [0; SECTOR_SIZE];
                        state.disk.read_sector(sector + s as u32, &mut sec);
                        let to = frame + s * SECTOR_SIZE;
                        state.vm.phys[to..to + SECTOR_SIZE].copy_from_slice(&sec);
                    }
                    let pde = state.vm.read_u32(owner.pagedir + 4 * pdx(page));
                    debug_assert!(
                        PteFlags::from_bits_truncate(pde).contains(PteFlags::PRESENT),
                        "demand table missing"
                    );
                    let table = (pde & !FLAG_MASK) as usize;
                    state.vm.write_u32(
                        table + 4 * ptx(page),
                        frame as u32
                            | (PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER).bits(),
                    );
                    state.sched.tcbs[me].page_faults += 1;
                    None
                }
            }
        };
        self.lock_release(memory_lock);
        if let Some(msg) = killed {
            self.kill_task(me, DIAG_ROW_VM, &msg);
        }
    }

    /// Read one byte of the calling process's address space.
    pub(crate) fn user_read_u8(&self, me: TaskId, vaddr: u32) -> u8 {
        let paddr = self.user_translate(me, vaddr, false);
        self.gate().vm.phys[paddr]
    }

    /// Write one byte of the calling process's address space.
    pub(crate) fn user_write_u8(&self, me: TaskId, vaddr: u32, value: u8) {
        let paddr = self.user_translate(me, vaddr, true);
        self.gate().vm.phys[paddr] = value;
    }

    /// Copy user memory out into a kernel buffer.
    pub(crate) fn copy_in(&self, me: TaskId, vaddr: u32, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.user_read_u8(me, vaddr + i as u32);
        }
    }

    /// Copy a kernel buffer into user memory.
    pub(crate) fn copy_out(&self, me: TaskId, vaddr: u32, buf: &[u8]) {
        for (i, &b) in buf.iter().enumerate() {
            self.user_write_u8(me, vaddr + i as u32, b);
        }
    }

    /// Copy a NUL-terminated string out of user memory, at most `max`
    /// bytes including the terminator.
    pub(crate) fn copy_in_str(&self, me: TaskId, vaddr: u32, max: usize) -> Option<String> {
        let mut bytes = Vec::new();
        for i in 0..max {
            match self.user_read_u8(me, vaddr + i as u32) {
                0 => return String::from_utf8(bytes).ok(),
                b => bytes.push(b),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::RamDisk;

    fn owner() -> FrameOwner {
        FrameOwner {
            pid: 1,
            pagedir: 0,
            swap_loc: 10,
            swap_size: 24,
        }
    }

    #[test]
    fn kernel_is_identity_mapped_supervisor_only() {
        let mut vm = Vm::new(4, 1, 42);
        let pa = vm.walk(KERNEL_PGDIR, 0x5000, true, false).expect("kernel walk");
        assert_eq!(pa, 0x5000);
        // User access to kernel text is a protection fault.
        let err = vm.walk(KERNEL_PGDIR, 0x5000, false, true).unwrap_err();
        assert!(err.protection());
        // The screen page is user-visible.
        let pa = vm
            .walk(KERNEL_PGDIR, SCREEN_ADDR as u32, true, true)
            .expect("screen walk");
        assert_eq!(pa, SCREEN_ADDR);
    }

    #[test]
    fn pool_bump_then_eviction() {
        let mut disk = RamDisk::new(64);
        let mut vm = Vm::new(2, 1, 7);
        let o = owner();
        let a = vm.get_memory(&mut disk, true, 0, o).expect("frame");
        let b = vm.get_memory(&mut disk, true, 0, o).expect("frame");
        assert_ne!(a, b);
        // Pool is exhausted and everything is pinned.
        assert!(vm.get_memory(&mut disk, false, 0, o).is_none());
    }

    #[test]
    fn demand_entries_fault_until_paged_in() {
        let mut disk = RamDisk::new(64);
        let mut vm = Vm::new(8, 2, 7);
        let o = owner();
        let pagedir = vm.setup_process_memory(&mut disk, o).expect("setup");
        // Stack pages are present already.
        assert!(vm.walk(pagedir, PROCESS_STACK, true, true).is_ok());
        // The image is not.
        let err = vm.walk(pagedir, PROCESS_ENTRY, false, true).unwrap_err();
        assert!(!err.protection());
    }

    #[test]
    fn dirty_bit_set_on_write_walk() {
        let mut disk = RamDisk::new(64);
        let mut vm = Vm::new(8, 1, 7);
        let o = owner();
        let pagedir = vm.setup_process_memory(&mut disk, o).expect("setup");
        let _ = vm.walk(pagedir, PROCESS_STACK, true, true).expect("walk");
        let pde = vm.read_u32(pagedir + 4 * pdx(PROCESS_STACK));
        let table = (pde & !FLAG_MASK) as usize;
        let pte = vm.read_u32(table + 4 * ptx(PROCESS_STACK));
        assert!(PteFlags::from_bits_truncate(pte).contains(PteFlags::DIRTY));
    }
}
