//! Background worker pool for decoder backends.
//!
//! Work-stealing deques: new jobs land in a global injector, idle
//! workers steal from each other, so fresh decode requests are picked
//! up ahead of aging preload work. The epoch mechanism cancels stale
//! jobs during fast scrubbing: a job enqueued under epoch N is skipped
//! if the engine has since moved to N+1.
//!
//! The engine itself never blocks on this pool; backends push decode
//! results into their own shared state and the engine observes them
//! through `Decoder::sample` on later cycles.

use crossbeam::deque::{Injector, Stealer, Worker};
use log::trace;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    current_epoch: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
}

impl Workers {
    /// Spawn `num_threads` workers sharing the given epoch counter.
    ///
    /// A good default is `num_cpus::get() * 3 / 4` (leave headroom for
    /// the engine thread).
    pub fn new(num_threads: usize, epoch: Arc<AtomicU64>) -> Self {
        let num_threads = num_threads.max(1);
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let locals: Vec<Worker<Job>> = (0..num_threads).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<Stealer<Job>> = locals.iter().map(|w| w.stealer()).collect();

        let mut handles = Vec::with_capacity(num_threads);
        for (worker_id, local) in locals.into_iter().enumerate() {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);
            let stealers = stealers.clone();

            let handle = thread::Builder::new()
                .name(format!("cutline-worker-{}", worker_id))
                .spawn(move || {
                    trace!("Worker {} started", worker_id);
                    loop {
                        if let Some(job) = local
                            .pop()
                            .or_else(|| injector.steal().success())
                            .or_else(|| stealers.iter().find_map(|s| s.steal().success()))
                        {
                            job();
                            continue;
                        }

                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }

                        // No work: short sleep instead of spinning.
                        thread::sleep(std::time::Duration::from_millis(1));
                    }
                    trace!("Worker {} stopped", worker_id);
                })
                .expect("Failed to spawn worker thread");

            handles.push(handle);
        }

        trace!("Workers initialized: {} threads (work-stealing)", num_threads);

        Self {
            injector,
            handles,
            current_epoch: epoch,
            shutdown,
        }
    }

    /// Pool sized for the current machine.
    pub fn with_default_size(epoch: Arc<AtomicU64>) -> Self {
        Self::new((num_cpus::get() * 3 / 4).max(1), epoch)
    }

    /// Enqueue a job unconditionally.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.injector.push(Box::new(f));
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::Relaxed)
    }

    /// Enqueue a job that only runs if the epoch still matches at
    /// execution time. The check happens when a worker picks the job
    /// up, so work queued just before a scrub is skipped, not run.
    pub fn execute_with_epoch<F>(&self, epoch: u64, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let current = Arc::clone(&self.current_epoch);
        self.injector.push(Box::new(move || {
            if current.load(Ordering::Relaxed) == epoch {
                f();
            }
        }));
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        use std::time::{Duration, Instant};

        trace!("Workers shutting down ({} threads)...", self.handles.len());
        self.shutdown.store(true, Ordering::SeqCst);

        // Bounded wait; leftover threads die with the process.
        let deadline = Instant::now() + Duration::from_millis(500);
        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, exiting anyway");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }
    }
}
