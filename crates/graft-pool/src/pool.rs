use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::error::TaskError;
use crate::promise::Promise;

/// Configuration for the worker pool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Worker threads. Zero means every submission runs inline.
    pub workers: usize,
    /// Maximum queued tasks.
    pub queue_capacity: usize,
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let cpus = thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            workers: cpus.min(6),
            queue_capacity: 256,
            thread_name: "graft-worker".into(),
        }
    }
}

trait Job: Send + Sync {
    fn run(&self);
}

type Work<T> = Box<dyn FnOnce() -> T + Send>;

struct Task<T> {
    work: Mutex<Option<Work<T>>>,
    promise: Promise<T>,
    cancel: CancellationToken,
}

impl<T> Task<T> {
    /// Run the work if nobody has claimed it yet. Returns whether this call ran it.
    fn execute(&self) -> bool {
        let Some(work) = self.work.lock().expect("lock poisoned").take() else {
            return false;
        };
        if self.cancel.is_cancelled() {
            self.promise.complete(Err(TaskError::Cancelled));
            return true;
        }
        let result = catch_unwind(AssertUnwindSafe(work))
            .map_err(|payload| TaskError::Panicked(panic_message(payload.as_ref())));
        self.promise.complete(result);
        true
    }
}

impl<T: Send> Job for Task<T> {
    fn run(&self) {
        self.execute();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".into()
    }
}

/// Handle on a submitted task.
pub struct TaskHandle<T> {
    task: Arc<Task<T>>,
    inline: bool,
}

impl<T> TaskHandle<T> {
    /// Wait for the result.
    ///
    /// If no worker has started the task yet, the caller runs it inline
    /// instead of waiting, so joining never waits on a queued task.
    pub fn join(self) -> Result<T, TaskError> {
        self.task.execute();
        self.task.promise.wait()
    }

    pub fn is_finished(&self) -> bool {
        self.task.promise.is_complete()
    }

    /// Whether no worker was free and the submitting thread ran the task.
    pub fn ran_inline(&self) -> bool {
        self.inline
    }

    /// The promise the task completes; can be awaited.
    pub fn promise(&self) -> Promise<T> {
        self.task.promise.clone()
    }
}

/// Bounded pool of OS threads draining a shared task queue.
///
/// Each worker marks itself free while it waits on the queue and busy while
/// it runs a task. [`submit`](WorkerPool::submit) only enqueues when a worker
/// is free; otherwise the caller does the work itself.
pub struct WorkerPool {
    sender: Option<mpsc::Sender<Arc<dyn Job>>>,
    free: Arc<AtomicUsize>,
    workers: Vec<thread::JoinHandle<()>>,
    size: usize,
}

impl WorkerPool {
    /// Start a pool.
    pub fn new(config: PoolConfig) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Arc<dyn Job>>(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let free = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(config.workers);
        for id in 0..config.workers {
            let receiver = Arc::clone(&receiver);
            let free = Arc::clone(&free);
            let handle = thread::Builder::new()
                .name(format!("{}-{id}", config.thread_name))
                .spawn(move || worker_loop(id, receiver, free))?;
            workers.push(handle);
        }
        info!(workers = config.workers, queue = config.queue_capacity, "worker pool started");

        Ok(Self {
            sender: Some(sender),
            free,
            workers,
            size: config.workers,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers currently waiting for a task.
    pub fn free_workers(&self) -> usize {
        self.free.load(Ordering::SeqCst)
    }

    /// Queue the task if a worker is free; otherwise run it on the calling
    /// thread before returning. [`TaskHandle::ran_inline`] tells which.
    pub fn submit<T, F>(&self, cancel: &CancellationToken, f: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let task = Arc::new(Task {
            work: Mutex::new(Some(Box::new(f) as Work<T>)),
            promise: Promise::new(),
            cancel: cancel.clone(),
        });
        if self.free_workers() > 0 {
            if let Some(sender) = &self.sender {
                let job: Arc<dyn Job> = task.clone();
                if sender.try_send(job).is_ok() {
                    return TaskHandle {
                        task,
                        inline: false,
                    };
                }
            }
        }
        task.execute();
        TaskHandle { task, inline: true }
    }

    /// Stop accepting tasks, let workers drain the queue, and join them.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Arc<dyn Job>>>>,
    free: Arc<AtomicUsize>,
) {
    loop {
        free.fetch_add(1, Ordering::SeqCst);
        let job = receiver.lock().expect("lock poisoned").blocking_recv();
        free.fetch_sub(1, Ordering::SeqCst);
        match job {
            Some(job) => job.run(),
            None => {
                debug!(worker = id, "worker exiting (queue closed)");
                return;
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("free", &self.free_workers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::{Duration, Instant};

    fn pool(workers: usize) -> WorkerPool {
        WorkerPool::new(PoolConfig {
            workers,
            queue_capacity: 16,
            thread_name: "test-worker".into(),
        })
        .unwrap()
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn default_caps_workers_at_six() {
        let config = PoolConfig::default();
        assert!(config.workers >= 1 && config.workers <= 6);
    }

    #[test]
    fn submit_returns_value() {
        let pool = pool(2);
        let token = CancellationToken::new();
        let handles: Vec<_> = (0..10).map(|i| pool.submit(&token, move || i * 2)).collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results, (0..10).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn workers_report_free() {
        let pool = pool(3);
        wait_until(|| pool.free_workers() == 3);
        assert_eq!(pool.size(), 3);
    }

    #[test]
    fn busy_pool_runs_inline() {
        let pool = pool(1);
        let token = CancellationToken::new();
        wait_until(|| pool.free_workers() == 1);

        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        let blocker = pool.submit(&token, move || {
            release_rx.recv().ok();
            "blocker"
        });
        assert!(!blocker.ran_inline());
        wait_until(|| pool.free_workers() == 0);

        let inline = pool.submit(&token, || thread::current().name().map(str::to_string));
        assert!(inline.ran_inline());
        assert!(inline.is_finished());
        assert_ne!(inline.join().unwrap().as_deref(), Some("test-worker-0"));

        release_tx.send(()).unwrap();
        assert_eq!(blocker.join(), Ok("blocker"));
    }

    #[test]
    fn zero_workers_runs_inline() {
        let pool = pool(0);
        let token = CancellationToken::new();
        let handle = pool.submit(&token, || 5);
        assert!(handle.ran_inline());
        assert_eq!(handle.join(), Ok(5));
    }

    #[test]
    fn cancelled_task_does_not_run() {
        let pool = pool(0);
        let token = CancellationToken::new();
        token.cancel();
        let handle = pool.submit(&token, || panic!("must not run"));
        assert_eq!(handle.join(), Err::<(), _>(TaskError::Cancelled));
    }

    #[test]
    fn panic_is_captured_and_worker_survives() {
        let pool = pool(1);
        let token = CancellationToken::new();
        let bad = pool.submit(&token, || -> u32 { panic!("kaboom") });
        assert_eq!(bad.join(), Err(TaskError::Panicked("kaboom".into())));
        assert_eq!(pool.submit(&token, || 7).join(), Ok(7));
        wait_until(|| pool.free_workers() == 1);
    }

    #[test]
    fn join_runs_unclaimed_task() {
        let token = CancellationToken::new();
        let task = Arc::new(Task {
            work: Mutex::new(Some(Box::new(|| 9) as Work<i32>)),
            promise: Promise::new(),
            cancel: token,
        });
        let handle = TaskHandle {
            task: Arc::clone(&task),
            inline: false,
        };
        assert!(!handle.is_finished());
        assert_eq!(handle.join(), Ok(9));
        // a worker arriving later finds nothing to do
        assert!(!task.execute());
    }

    #[test]
    fn shutdown_drains_queue() {
        let pool = pool(1);
        let token = CancellationToken::new();
        wait_until(|| pool.free_workers() == 1);
        let handle = pool.submit(&token, || {
            thread::sleep(Duration::from_millis(20));
            3
        });
        let promise = handle.promise();
        pool.shutdown();
        assert!(promise.is_complete());
        assert_eq!(promise.wait(), Ok(3));
    }
}
