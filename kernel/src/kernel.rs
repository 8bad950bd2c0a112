//! Kernel state and boot.
//!
//! All global mutable state lives in one `KernelState` behind one mutex,
//! the critical-section gate: holding the guard is the hosted reading of
//! "interrupts disabled". Tasks are backed by parked OS threads that
//! trade a single run permit through per-task condition variables, so at
//! most one task ever runs and ordering is exactly the cooperative order
//! of the scheduler.
//!
//! Boot order: physical memory and kernel page tables, the sync arenas
//! and the global memory lock, mailboxes, filesystem mount, then the
//! task table. `run` dispatches the first registered task and returns
//! once the last task has exited.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Once, Weak};
use std::thread;

use array_macro::array;

use crate::console::Console;
use crate::disk::{BlockDevice, RamDisk};
use crate::fs::{fs_sectors, FsError, FsState, OpenMode, Stat, Whence};
use crate::mbox::{self, Mbox, MboxId, Msg};
use crate::memlayout::{PROCESS_STACK, SUPER_BLOCK_START};
use crate::param::{MAX_TASKS, PAGEABLE_PAGES, PROCESS_STACK_PAGES, SECTOR_SIZE};
use crate::proc::{Pid, Sched, TaskId, TaskKind, TaskState};
use crate::sync::{BarrierId, CondId, LockId, SemId, SyncTable};
use crate::vm::{FrameOwner, Vm};

/// Victim selection under memory pressure.
#[derive(Copy, Clone, Debug)]
pub enum EvictionPolicy {
    /// Uniform over the unpinned frames; the seed pins the sequence.
    Random { seed: u64 },
}

/// Boot-time knobs. The defaults reproduce `param`/`memlayout`.
#[derive(Copy, Clone, Debug)]
pub struct Config {
    pub pageable_pages: usize,
    pub process_stack_pages: usize,
    pub eviction: EvictionPolicy,
    /// First sector of the filesystem region.
    pub fs_start: u32,
}

impl Default for Config {
    fn default() -> Self {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1);
        Self {
            pageable_pages: PAGEABLE_PAGES,
            process_stack_pages: PROCESS_STACK_PAGES,
            eviction: EvictionPolicy::Random { seed },
            fs_start: SUPER_BLOCK_START,
        }
    }
}

pub(crate) struct KernelState {
    pub sched: Sched,
    pub sync: SyncTable,
    pub mboxes: Vec<Mbox>,
    pub vm: Vm,
    pub fs: FsState,
    pub disk: Box<dyn BlockDevice>,
    pub console: Console,
}

impl KernelState {
    /// Split-borrow the scheduler and the sync arenas.
    pub fn sched_and_sync(&mut self) -> (&mut Sched, &mut SyncTable) {
        (&mut self.sched, &mut self.sync)
    }
}

/// Thrown through a task's stack to tear it down; never observed by
/// task code.
pub(crate) struct TaskExit;

pub(crate) fn raise_task_exit() -> ! {
    panic::panic_any(TaskExit)
}

/// Silence the default panic hook for `TaskExit` unwinds.
fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let prev = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !info.payload().is::<TaskExit>() {
                prev(info);
            }
        }));
    });
}

type Body = Box<dyn FnOnce(&TaskCtx) + Send + 'static>;

pub struct Kernel {
    pub(crate) state: Mutex<KernelState>,
    /// One dispatch gate per TCB slot.
    pub(crate) gates: [Condvar; MAX_TASKS],
    pub(crate) halt_cv: Condvar,
    bodies: Mutex<Vec<(TaskId, Body)>>,
    panics: Mutex<Vec<Box<dyn Any + Send>>>,
    /// Back-reference to the owning `Arc`, for handing task threads a
    /// clone of the kernel handle.
    self_ref: Weak<Kernel>,
}

impl Kernel {
    /// Enter a critical section. Holding the returned guard is holding
    /// the machine's interrupt-off state; nested kernel code passes the
    /// borrowed state along instead of re-entering.
    pub(crate) fn gate(&self) -> MutexGuard<'_, KernelState> {
        self.state.lock().expect("kernel gate poisoned")
    }

    pub(crate) fn record_panic(&self, payload: Box<dyn Any + Send>) {
        self.panics.lock().expect("panic list").push(payload);
    }

    /// Print a diagnostic at `row` and terminate the calling task.
    pub(crate) fn kill_task(&self, me: TaskId, row: usize, msg: &str) -> ! {
        self.gate().console.write_at(row, msg);
        self.task_exit(me);
        raise_task_exit()
    }

    fn task_main(self: Arc<Self>, tid: TaskId, body: Body) {
        {
            let state = self.gate();
            let mut state = self.suspend(state, tid);
            state.sched.tcbs[tid].state = TaskState::Ready;
        }
        let ctx = TaskCtx {
            kernel: Arc::clone(&self),
            tid,
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| body(&ctx)));
        self.task_exit(tid);
        if let Err(payload) = result {
            if !payload.is::<TaskExit>() {
                self.record_panic(payload);
            }
        }
    }

    /// Dispatch the first task and block until the machine halts. Panics
    /// raised inside task bodies are re-raised here.
    pub fn run(&self) {
        install_panic_hook();
        let this = self.self_ref.upgrade().expect("kernel handle");
        let bodies = std::mem::take(&mut *self.bodies.lock().expect("task bodies"));
        let mut handles = Vec::new();
        for (tid, body) in bodies {
            let kernel = Arc::clone(&this);
            let handle = thread::Builder::new()
                .name(format!("task-{}", tid + 1))
                .spawn(move || kernel.task_main(tid, body))
                .expect("spawn task thread");
            handles.push(handle);
        }

        {
            let mut state = self.gate();
            if state.sched.halted {
                return;
            }
            let first = state.sched.first.expect("run: no tasks registered");
            self.dispatch(&mut state, first);
        }
        let mut state = self.gate();
        while !state.sched.halted {
            state = self.halt_cv.wait(state).expect("kernel gate poisoned");
        }
        drop(state);
        for handle in handles {
            let _ = handle.join();
        }
        if let Some(payload) = self.panics.lock().expect("panic list").pop() {
            panic::resume_unwind(payload);
        }
    }

    // ------------------------------------------------------------------
    // Sync object creation; usable before `run` and from tasks.

    pub fn lock_create(&self) -> LockId {
        self.gate().sync.new_lock()
    }

    pub fn condition_create(&self) -> CondId {
        self.gate().sync.new_cond()
    }

    pub fn semaphore_create(&self, initial: i32) -> SemId {
        self.gate().sync.new_sem(initial)
    }

    pub fn barrier_create(&self, reach: i32) -> BarrierId {
        self.gate().sync.new_barrier(reach)
    }

    // ------------------------------------------------------------------
    // Inspection, mostly for tests and diagnostics.

    pub fn console_row(&self, row: usize) -> String {
        self.gate().console.row_text(row)
    }

    pub fn inodes_in_use(&self) -> usize {
        self.gate().inodes_in_use()
    }

    pub fn data_blocks_in_use(&self) -> usize {
        self.gate().data_blocks_in_use()
    }

    pub fn read_disk_sector(&self, lba: u32) -> [u8; SECTOR_SIZE] {
        let mut sector = [0; SECTOR_SIZE];
        self.gate().disk.read_sector(lba, &mut sector);
        sector
    }

    pub fn semaphore_counter(&self, sem: SemId) -> i32 {
        self.gate().sync.sems[sem.0].count
    }

    pub fn barrier_counter(&self, barrier: BarrierId) -> i32 {
        self.gate().sync.barriers[barrier.0].count
    }

    /// (process switches, thread switches) so far.
    pub fn context_switches(&self) -> (u64, u64) {
        let state = self.gate();
        (state.sched.switches_process, state.sched.switches_thread)
    }

    pub fn page_fault_count(&self, pid: Pid) -> u32 {
        let state = self.gate();
        state
            .sched
            .tcbs
            .iter()
            .find(|t| t.pid == pid && t.state != TaskState::Unused)
            .map_or(0, |t| t.page_faults)
    }

    /// Times the task with `pid` has been dispatched.
    pub fn task_switches(&self, pid: Pid) -> u64 {
        let state = self.gate();
        state
            .sched
            .tcbs
            .iter()
            .find(|t| t.pid == pid && t.state != TaskState::Unused)
            .map_or(0, |t| t.ctx_switches)
    }
}

/// Handle given to every task body: the whole syscall surface, plus
/// direct access to the task's own (virtual) memory for processes.
pub struct TaskCtx {
    kernel: Arc<Kernel>,
    tid: TaskId,
}

impl TaskCtx {
    pub(crate) fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub(crate) fn tid(&self) -> TaskId {
        self.tid
    }

    pub fn pid(&self) -> Pid {
        self.kernel.gate().sched.tcbs[self.tid].pid
    }

    pub fn yield_now(&self) {
        self.kernel.task_yield(self.tid);
    }

    pub fn exit(&self) -> ! {
        self.kernel.task_exit(self.tid);
        raise_task_exit()
    }

    // ------------------------------------------------------------------
    // Synchronization.

    pub fn lock_acquire(&self, lock: LockId) {
        self.kernel.lock_acquire(self.tid, lock);
    }

    pub fn lock_release(&self, lock: LockId) {
        self.kernel.lock_release(lock);
    }

    pub fn condition_wait(&self, lock: LockId, cond: CondId) {
        self.kernel.condition_wait(self.tid, lock, cond);
    }

    pub fn condition_signal(&self, cond: CondId) {
        self.kernel.condition_signal(cond);
    }

    pub fn condition_broadcast(&self, cond: CondId) {
        self.kernel.condition_broadcast(cond);
    }

    pub fn semaphore_up(&self, sem: SemId) {
        self.kernel.semaphore_up(sem);
    }

    pub fn semaphore_down(&self, sem: SemId) {
        self.kernel.semaphore_down(self.tid, sem);
    }

    pub fn barrier_wait(&self, barrier: BarrierId) {
        self.kernel.barrier_wait(self.tid, barrier);
    }

    // ------------------------------------------------------------------
    // Mailboxes.

    pub fn mbox_open(&self, key: usize) -> MboxId {
        self.kernel.mbox_open(self.tid, key)
    }

    pub fn mbox_close(&self, q: MboxId) {
        self.kernel.mbox_close(q);
    }

    pub fn mbox_send(&self, q: MboxId, payload: &[u8]) {
        self.kernel.mbox_send(self.tid, q, payload);
    }

    pub fn mbox_recv(&self, q: MboxId) -> Msg {
        self.kernel.mbox_recv(self.tid, q)
    }

    pub fn mbox_stat(&self, q: MboxId) -> (u32, usize) {
        self.kernel.mbox_stat(q)
    }

    // ------------------------------------------------------------------
    // Filesystem. These never reach a scheduling point, so one critical
    // section spans each call.

    pub fn open(&self, path: &str, mode: OpenMode) -> Result<i32, FsError> {
        self.kernel.gate().fs_open(self.tid, path, mode)
    }

    pub fn close(&self, fd: i32) -> Result<(), FsError> {
        self.kernel.gate().fs_close(self.tid, fd)
    }

    pub fn read(&self, fd: i32, buf: &mut [u8]) -> Result<usize, FsError> {
        self.kernel.gate().fs_read(self.tid, fd, buf)
    }

    pub fn write(&self, fd: i32, data: &[u8]) -> Result<usize, FsError> {
        self.kernel.gate().fs_write(self.tid, fd, data)
    }

    pub fn lseek(&self, fd: i32, offset: i32, whence: Whence) -> Result<i32, FsError> {
        self.kernel.gate().fs_lseek(self.tid, fd, offset, whence)
    }

    pub fn mkdir(&self, path: &str) -> Result<(), FsError> {
        self.kernel.gate().fs_mkdir(self.tid, path)
    }

    pub fn chdir(&self, path: &str) -> Result<(), FsError> {
        self.kernel.gate().fs_chdir(self.tid, path)
    }

    pub fn rmdir(&self, path: &str) -> Result<(), FsError> {
        self.kernel.gate().fs_rmdir(self.tid, path)
    }

    pub fn link(&self, new: &str, existing: &str) -> Result<(), FsError> {
        self.kernel.gate().fs_link(self.tid, new, existing)
    }

    pub fn unlink(&self, path: &str) -> Result<(), FsError> {
        self.kernel.gate().fs_unlink(self.tid, path)
    }

    pub fn stat(&self, fd: i32) -> Result<Stat, FsError> {
        self.kernel.gate().fs_stat(self.tid, fd)
    }

    // ------------------------------------------------------------------
    // Process memory. Only processes have a private address space; a
    // thread touching it is killed.

    fn require_process(&self) {
        let kind = self.kernel.gate().sched.tcbs[self.tid].kind;
        if kind != TaskKind::Process {
            self.kernel.kill_task(
                self.tid,
                crate::console::DIAG_ROW_VM,
                "vm: thread has no user memory",
            );
        }
    }

    pub fn mem_read_u8(&self, vaddr: u32) -> u8 {
        self.require_process();
        self.kernel.user_read_u8(self.tid, vaddr)
    }

    pub fn mem_write_u8(&self, vaddr: u32, value: u8) {
        self.require_process();
        self.kernel.user_write_u8(self.tid, vaddr, value);
    }

    pub fn mem_read_u32(&self, vaddr: u32) -> u32 {
        self.require_process();
        let mut bytes = [0; 4];
        self.kernel.copy_in(self.tid, vaddr, &mut bytes);
        u32::from_le_bytes(bytes)
    }

    pub fn mem_write_u32(&self, vaddr: u32, value: u32) {
        self.require_process();
        self.kernel.copy_out(self.tid, vaddr, &value.to_le_bytes());
    }

    pub fn page_faults(&self) -> u32 {
        self.kernel.gate().sched.tcbs[self.tid].page_faults
    }

    /// Base of the calling process's topmost stack page.
    pub fn stack_base(&self) -> u32 {
        self.require_process();
        self.kernel.gate().sched.tcbs[self.tid].ustack
    }
}

struct TaskSpec {
    kind: TaskKind,
    swap_loc: u32,
    swap_size: u32,
    body: Body,
}

/// The compile-time task table, assembled before boot.
pub struct KernelBuilder {
    config: Config,
    disk: Option<Box<dyn BlockDevice>>,
    tasks: Vec<TaskSpec>,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            disk: None,
            tasks: Vec::new(),
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn disk(mut self, disk: impl BlockDevice + 'static) -> Self {
        self.disk = Some(Box::new(disk));
        self
    }

    /// Add a kernel thread; it shares the kernel address space.
    pub fn spawn_thread(mut self, body: impl FnOnce(&TaskCtx) + Send + 'static) -> Self {
        self.tasks.push(TaskSpec {
            kind: TaskKind::Thread,
            swap_loc: 0,
            swap_size: 0,
            body: Box::new(body),
        });
        self
    }

    /// Add a process whose image lives at `swap_loc` for `swap_size`
    /// sectors on disk; it gets a private, demand-paged address space.
    pub fn spawn_process(
        mut self,
        swap_loc: u32,
        swap_size: u32,
        body: impl FnOnce(&TaskCtx) + Send + 'static,
    ) -> Self {
        self.tasks.push(TaskSpec {
            kind: TaskKind::Process,
            swap_loc,
            swap_size,
            body: Box::new(body),
        });
        self
    }

    /// Boot: initialize memory, sync, mailboxes, the filesystem, then
    /// the task table. Failures here are catastrophic.
    pub fn build(self) -> Arc<Kernel> {
        let config = self.config;
        let EvictionPolicy::Random { seed } = config.eviction;
        let disk = self.disk.unwrap_or_else(|| {
            Box::new(RamDisk::new(config.fs_start + fs_sectors()))
        });

        let mut vm = Vm::new(config.pageable_pages, config.process_stack_pages, seed);
        let mut sync = SyncTable::new();
        vm.memory_lock = sync.new_lock();

        let mut state = KernelState {
            sched: Sched::new(),
            sync,
            mboxes: Vec::new(),
            vm,
            fs: FsState::new(config.fs_start),
            disk,
            console: Console::new(),
        };
        mbox::make_mboxes(&mut state);
        state.fs_init();

        let mut bodies = Vec::new();
        for spec in self.tasks {
            let tid = state
                .sched
                .register(spec.kind)
                .expect("boot: task table full");
            let root = state.fs.root();
            let tcb = &mut state.sched.tcbs[tid];
            tcb.cwd = root;
            tcb.swap_loc = spec.swap_loc;
            tcb.swap_size = spec.swap_size;
            match spec.kind {
                TaskKind::Thread => tcb.pagedir = state.vm.kernel_pagedir,
                TaskKind::Process => {
                    let owner = FrameOwner {
                        pid: tcb.pid,
                        pagedir: 0,
                        swap_loc: spec.swap_loc,
                        swap_size: spec.swap_size,
                    };
                    let pagedir = state
                        .vm
                        .setup_process_memory(state.disk.as_mut(), owner)
                        .expect("boot: out of pinned memory");
                    let tcb = &mut state.sched.tcbs[tid];
                    tcb.pagedir = pagedir;
                    tcb.ustack = PROCESS_STACK;
                }
            }
            bodies.push((tid, spec.body));
        }

        Arc::new_cyclic(|weak| Kernel {
            state: Mutex::new(state),
            gates: array![_ => Condvar::new(); MAX_TASKS],
            halt_cv: Condvar::new(),
            bodies: Mutex::new(bodies),
            panics: Mutex::new(Vec::new()),
            self_ref: weak.clone(),
        })
    }
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}
