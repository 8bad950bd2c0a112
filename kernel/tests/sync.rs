//! Condition variables, semaphores, and barriers over the scheduler.

use std::sync::{Arc, Mutex};

use rondo_kernel::{BarrierId, CondId, KernelBuilder, LockId, SemId};

type Log = Arc<Mutex<Vec<String>>>;

fn log(log: &Log, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

/// Shared handle cell: objects are created on the built kernel, before
/// `run`, and read by the task bodies at their first step.
#[derive(Clone)]
struct Cell<T: Copy>(Arc<Mutex<Option<T>>>);

impl<T: Copy> Default for Cell<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }
}

impl<T: Copy> Cell<T> {
    fn set(&self, v: T) {
        *self.0.lock().unwrap() = Some(v);
    }

    fn get(&self) -> T {
        self.0.lock().unwrap().expect("handle set before run")
    }
}

#[test]
fn semaphore_five_downs_then_five_ups() {
    let trace: Log = Default::default();
    let sem: Cell<SemId> = Default::default();
    let mut builder = KernelBuilder::new();
    for i in 0..5 {
        let trace = Arc::clone(&trace);
        let sem = sem.clone();
        builder = builder.spawn_thread(move |ctx| {
            ctx.semaphore_down(sem.get());
            log(&trace, format!("resumed {i}"));
        });
    }
    {
        let sem = sem.clone();
        builder = builder.spawn_thread(move |ctx| {
            for _ in 0..5 {
                ctx.semaphore_up(sem.get());
            }
        });
    }
    let kernel = builder.build();
    sem.set(kernel.semaphore_create(0));
    kernel.run();

    // FIFO: blocked earlier means released first.
    assert_eq!(
        *trace.lock().unwrap(),
        ["resumed 0", "resumed 1", "resumed 2", "resumed 3", "resumed 4"]
    );
    assert_eq!(kernel.semaphore_counter(sem.get()), 0);
}

#[test]
fn semaphore_counter_tracks_net_signals() {
    let sem: Cell<SemId> = Default::default();
    let s = sem.clone();
    let kernel = KernelBuilder::new()
        .spawn_thread(move |ctx| {
            for _ in 0..3 {
                ctx.semaphore_up(s.get());
            }
            ctx.semaphore_down(s.get());
        })
        .build();
    sem.set(kernel.semaphore_create(2));
    kernel.run();
    assert_eq!(kernel.semaphore_counter(sem.get()), 2 + 3 - 1);
}

#[test]
fn barrier_releases_in_full_cycles() {
    let trace: Log = Default::default();
    let barrier: Cell<BarrierId> = Default::default();
    let mut builder = KernelBuilder::new();
    for name in ["x", "y", "z"] {
        let trace = Arc::clone(&trace);
        let barrier = barrier.clone();
        builder = builder.spawn_thread(move |ctx| {
            for cycle in 0..3 {
                ctx.barrier_wait(barrier.get());
                log(&trace, format!("{name}{cycle}"));
            }
        });
    }
    let kernel = builder.build();
    barrier.set(kernel.barrier_create(3));
    kernel.run();

    let trace = trace.lock().unwrap();
    assert_eq!(trace.len(), 9);
    // No release crosses a cycle boundary.
    for cycle in 0..3 {
        let chunk: Vec<_> = trace[cycle * 3..cycle * 3 + 3]
            .iter()
            .map(|s| s.as_bytes()[1] - b'0')
            .collect();
        assert_eq!(chunk, [cycle as u8; 3]);
    }
    assert_eq!(kernel.barrier_counter(barrier.get()), 0);
}

#[test]
fn condition_wait_is_mesa_style() {
    let trace: Log = Default::default();
    let handles: Cell<(LockId, CondId)> = Default::default();
    let flag = Arc::new(Mutex::new(false));

    let t1 = Arc::clone(&trace);
    let h1 = handles.clone();
    let f1 = Arc::clone(&flag);
    let t2 = Arc::clone(&trace);
    let h2 = handles.clone();
    let f2 = Arc::clone(&flag);

    let kernel = KernelBuilder::new()
        .spawn_thread(move |ctx| {
            let (lock, cond) = h1.get();
            ctx.lock_acquire(lock);
            // Predicate re-check around the wait: wakeups are advisory.
            while !*f1.lock().unwrap() {
                log(&t1, "waiting");
                ctx.condition_wait(lock, cond);
            }
            log(&t1, "proceeding");
            ctx.lock_release(lock);
        })
        .spawn_thread(move |ctx| {
            let (lock, cond) = h2.get();
            // A spurious-looking signal with the predicate still false.
            ctx.lock_acquire(lock);
            ctx.condition_signal(cond);
            ctx.lock_release(lock);
            ctx.yield_now();
            ctx.lock_acquire(lock);
            *f2.lock().unwrap() = true;
            log(&t2, "set flag");
            ctx.condition_signal(cond);
            ctx.lock_release(lock);
        })
        .build();
    let lock = kernel.lock_create();
    let cond = kernel.condition_create();
    handles.set((lock, cond));
    kernel.run();

    assert_eq!(
        *trace.lock().unwrap(),
        ["waiting", "waiting", "set flag", "proceeding"]
    );
}

#[test]
fn broadcast_wakes_every_waiter() {
    let trace: Log = Default::default();
    let handles: Cell<(LockId, CondId)> = Default::default();
    let mut builder = KernelBuilder::new();
    for i in 0..3 {
        let trace = Arc::clone(&trace);
        let handles = handles.clone();
        builder = builder.spawn_thread(move |ctx| {
            let (lock, cond) = handles.get();
            ctx.lock_acquire(lock);
            ctx.condition_wait(lock, cond);
            log(&trace, format!("woke {i}"));
            ctx.lock_release(lock);
        });
    }
    {
        let handles = handles.clone();
        builder = builder.spawn_thread(move |ctx| {
            let (_, cond) = handles.get();
            ctx.condition_broadcast(cond);
        });
    }
    let kernel = builder.build();
    handles.set((kernel.lock_create(), kernel.condition_create()));
    kernel.run();
    assert_eq!(
        *trace.lock().unwrap(),
        ["woke 0", "woke 1", "woke 2"]
    );
}
