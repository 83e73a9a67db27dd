//! Blocking-work pool: off-loop execution for shards that call into the OS
//!
//! Wires must never block the mesh thread. A shard that needs a blocking
//! call hands it to this pool and cooperatively suspends until the result is
//! ready; other wires keep ticking meanwhile.
//!
//! ## Sizing
//!
//! The pool breathes between `LOW_WATER` and `MAX_WORKERS` (starting at
//! `NUM_WORKERS`). A controller thread wakes every 100 ms: more outstanding
//! jobs than workers grows the pool, fewer than `LOW_WATER` outstanding
//! shrinks it back toward the baseline.
//!
//! ## Cancellation protocol
//!
//! If the wire is told to stop while a job is in flight, the caller invokes
//! the cancel hook and then busy-yields the OS thread (not the coroutine)
//! until the job actually completes - the coroutine stack must not be freed
//! underneath foreign code still running on a worker.
//!
//! On single-threaded targets the offload degrades to an inline call.

use crate::context::{Context, FlowState, suspend};
use crate::error::ActivationError;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

/// Shrink threshold: fewer outstanding jobs than this releases spare workers.
pub const LOW_WATER: usize = 4;
/// Baseline worker count.
pub const NUM_WORKERS: usize = 8;
/// Hard ceiling on pool growth.
pub const MAX_WORKERS: usize = 32;

const CONTROLLER_PERIOD: Duration = Duration::from_millis(100);

enum Job {
    Run(Box<dyn FnOnce() + Send>),
    Quit,
}

struct WorkPool {
    sender: Sender<Job>,
    /// Outstanding jobs: queued or running
    scheduled: AtomicUsize,
    workers: AtomicUsize,
}

static POOL: OnceLock<WorkPool> = OnceLock::new();

fn pool() -> &'static WorkPool {
    POOL.get_or_init(|| {
        let (sender, receiver) = unbounded::<Job>();
        let pool = WorkPool {
            sender,
            scheduled: AtomicUsize::new(0),
            workers: AtomicUsize::new(0),
        };
        for _ in 0..NUM_WORKERS {
            spawn_worker(receiver.clone());
        }
        spawn_controller(receiver);
        pool
    })
}

fn spawn_worker(receiver: Receiver<Job>) {
    std::thread::Builder::new()
        .name("weft-pool-worker".to_string())
        .spawn(move || {
            // Count registration inside the thread so worker_count never
            // exceeds the threads actually serving the queue
            let pool = pool();
            pool.workers.fetch_add(1, Ordering::AcqRel);
            while let Ok(job) = receiver.recv() {
                match job {
                    Job::Run(f) => f(),
                    Job::Quit => break,
                }
            }
            pool.workers.fetch_sub(1, Ordering::AcqRel);
        })
        .expect("failed to spawn pool worker");
}

fn spawn_controller(receiver: Receiver<Job>) {
    std::thread::Builder::new()
        .name("weft-pool-controller".to_string())
        .spawn(move || {
            loop {
                std::thread::sleep(CONTROLLER_PERIOD);
                let pool = pool();
                let outstanding = pool.scheduled.load(Ordering::Acquire);
                let workers = pool.workers.load(Ordering::Acquire);
                if outstanding > workers && workers < MAX_WORKERS {
                    tracing::debug!(workers = workers + 1, "work pool growing");
                    spawn_worker(receiver.clone());
                } else if outstanding < LOW_WATER && workers > NUM_WORKERS {
                    tracing::debug!(workers = workers - 1, "work pool shrinking");
                    // One worker drains this and exits
                    let _ = pool.sender.send(Job::Quit);
                }
            }
        })
        .expect("failed to spawn pool controller");
}

/// Queue a raw job. Internal building block; shards go through
/// `run_blocking`.
pub(crate) fn enqueue(job: Box<dyn FnOnce() + Send>) {
    let pool = pool();
    pool.scheduled.fetch_add(1, Ordering::AcqRel);
    let wrapped: Box<dyn FnOnce() + Send> = Box::new(move || {
        job();
        // `pool()` is initialized: we are running inside it
        POOL.get()
            .expect("pool initialized")
            .scheduled
            .fetch_sub(1, Ordering::AcqRel);
    });
    pool.sender
        .send(Job::Run(wrapped))
        .expect("work pool queue closed");
}

/// Current worker count (diagnostics).
pub fn worker_count() -> usize {
    pool().workers.load(Ordering::Acquire)
}

/// Jobs queued or running (diagnostics).
pub fn outstanding_jobs() -> usize {
    pool().scheduled.load(Ordering::Acquire)
}

struct WorkCell<T> {
    done: AtomicBool,
    result: Mutex<Option<Result<T, String>>>,
}

/// Run `work` on the pool while the calling wire cooperatively suspends.
///
/// The wire yields (`suspend(ctx, 0)`) until the job completes. If the
/// context is told to stop mid-flight, `cancel` is invoked and the caller
/// busy-yields the OS thread until the work has actually finished. A panic
/// inside `work` is captured and re-raised here as an `ActivationError`.
pub fn run_blocking<T, F, C>(
    ctx: &mut Context<'_>,
    work: F,
    cancel: Option<C>,
) -> Result<T, ActivationError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, String> + Send + 'static,
    C: FnOnce() + Send + 'static,
{
    #[cfg(target_family = "wasm")]
    {
        let _ = cancel;
        return work().map_err(ActivationError::new);
    }

    #[cfg(not(target_family = "wasm"))]
    {
        let cell = Arc::new(WorkCell::<T> {
            done: AtomicBool::new(false),
            result: Mutex::new(None),
        });
        let cell2 = Arc::clone(&cell);
        enqueue(Box::new(move || {
            let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(work))
                .unwrap_or_else(|payload| Err(panic_message(&payload)));
            *cell2.result.lock().expect("work cell poisoned") = Some(res);
            cell2.done.store(true, Ordering::Release);
        }));

        let mut cancel = cancel;
        loop {
            let flow = suspend(ctx, 0.0)?;
            if cell.done.load(Ordering::Acquire) {
                break;
            }
            if !matches!(flow, FlowState::Continue) {
                if let Some(c) = cancel.take() {
                    c();
                }
                // Thread-yield, not suspend: the coroutine stack must stay
                // alive until the worker is out of our closure
                while !cell.done.load(Ordering::Acquire) {
                    std::thread::yield_now();
                }
                break;
            }
        }

        let result = cell
            .result
            .lock()
            .expect("work cell poisoned")
            .take()
            .expect("completed work always leaves a result");
        result.map_err(ActivationError::new)
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic in blocking work".to_string()
    }
}
