//! Fixed worker pool for parallelizable per-frame sub-tasks.
//!
//! A small set of long-lived workers pulls boxed jobs from a shared FIFO
//! queue guarded by a mutex and condition variable. Submitting a job
//! enqueues it and wakes one idle worker. No future or result handle is
//! returned: callers that need completion must synchronize externally, for
//! example by having jobs send results over a channel.
//!
//! On shutdown (drop), queued-but-unstarted jobs may be abandoned. This is
//! a documented trade-off: the pool is used for frame-scoped work whose
//! results are worthless once the pool's owner is gone.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    queue: VecDeque<Job>,
    shutdown: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    available: Condvar,
}

/// Fixed set of long-lived worker threads over a FIFO job queue.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    handles: Vec<JoinHandle<()>>,
    workers: usize,
}

impl WorkerPool {
    /// Spawn a pool with `workers` threads (at least one).
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        });

        let handles = (0..workers)
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("fusion-worker-{i}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            shared,
            handles,
            workers,
        }
    }

    /// Number of worker threads.
    #[inline]
    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Enqueue a job and wake one idle worker.
    pub fn submit<F: FnOnce() + Send + 'static>(&self, job: F) {
        {
            let mut state = self.shared.state.lock();
            state.queue.push_back(Box::new(job));
        }
        self.shared.available.notify_one();
    }

    /// Number of jobs queued but not yet claimed by a worker.
    pub fn queued_jobs(&self) -> usize {
        self.shared.state.lock().queue.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
        }
        self.shared.available.notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if state.shutdown {
                    // Unstarted jobs are abandoned here.
                    return;
                }
                if let Some(job) = state.queue.pop_front() {
                    break job;
                }
                shared.available.wait(&mut state);
            }
        };
        job();
    }
}
