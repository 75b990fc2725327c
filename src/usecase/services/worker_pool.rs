use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error};

use crate::error::{LoaderError, LoaderResult};

/// Cooperative cancellation flag shared between a task and whoever may stop it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Unit of work the pool can run and stop.
pub trait PoolTask: Send + 'static {
    /// The flag this task polls; cancelling it is equivalent to stopping the task.
    fn cancel_token(&self) -> CancelToken;

    fn run(self: Box<Self>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Running,
    Finished,
}

const STATUS_QUEUED: u8 = 0;
const STATUS_RUNNING: u8 = 1;
const STATUS_FINISHED: u8 = 2;

#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: u64,
    token: CancelToken,
    status: Arc<AtomicU8>,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Requests cancellation of this task only. Does not wait for it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn status(&self) -> TaskStatus {
        match self.status.load(Ordering::Acquire) {
            STATUS_QUEUED => TaskStatus::Queued,
            STATUS_RUNNING => TaskStatus::Running,
            _ => TaskStatus::Finished,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status() == TaskStatus::Finished
    }
}

struct Job {
    id: u64,
    task: Box<dyn PoolTask>,
    status: Arc<AtomicU8>,
}

/// Fixed set of worker threads pulling tasks from one FIFO queue, so at most
/// `size` tasks run at once and the rest wait their turn.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> LoaderResult<Self> {
        if size == 0 {
            return Err(LoaderError::InvalidConfig(
                "worker pool needs at least one slot".to_string(),
            ));
        }

        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let mut threads = Vec::with_capacity(size);
        for slot in 0..size {
            let receiver = receiver.clone();
            let thread = std::thread::Builder::new()
                .name(format!("records-fetch-{slot}"))
                .spawn(move || run_slot(slot, receiver))
                .map_err(|err| {
                    LoaderError::InvalidConfig(format!("failed to spawn pool thread: {err}"))
                })?;
            threads.push(thread);
        }

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            threads: Mutex::new(threads),
            next_id: AtomicU64::new(1),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn submit<T: PoolTask>(&self, task: T) -> LoaderResult<TaskHandle> {
        let sender = lock(&self.sender);
        let Some(sender) = sender.as_ref() else {
            return Err(LoaderError::PoolClosed);
        };

        let handle = TaskHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            token: task.cancel_token(),
            status: Arc::new(AtomicU8::new(STATUS_QUEUED)),
        };
        let job = Job {
            id: handle.id,
            task: Box::new(task),
            status: handle.status.clone(),
        };
        sender.send(job).map_err(|_| LoaderError::PoolClosed)?;
        Ok(handle)
    }

    /// Runs a closure as a task with its own fresh cancellation token.
    pub fn submit_fn<F>(&self, f: F) -> LoaderResult<TaskHandle>
    where
        F: FnOnce(&CancelToken) + Send + 'static,
    {
        self.submit(FnTask {
            token: CancelToken::new(),
            f,
        })
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.sender).is_none()
    }

    /// Stops accepting tasks. Already queued tasks still run; the threads exit
    /// once the queue is drained.
    pub fn shutdown(&self) {
        if lock(&self.sender).take().is_some() {
            debug!(slots = self.size, "worker pool shutting down");
        }
    }

    pub fn shutdown_and_join(&self) {
        self.shutdown();
        let threads = std::mem::take(&mut *lock(&self.threads));
        for thread in threads {
            if thread.join().is_err() {
                error!("worker pool thread terminated abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run_slot(slot: usize, receiver: Receiver<Job>) {
    for job in receiver.iter() {
        job.status.store(STATUS_RUNNING, Ordering::Release);
        let task = job.task;
        if catch_unwind(AssertUnwindSafe(move || task.run())).is_err() {
            error!(slot, task = job.id, "pool task panicked");
        }
        job.status.store(STATUS_FINISHED, Ordering::Release);
    }
}

struct FnTask<F> {
    token: CancelToken,
    f: F,
}

impl<F> PoolTask for FnTask<F>
where
    F: FnOnce(&CancelToken) + Send + 'static,
{
    fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    fn run(self: Box<Self>) {
        let FnTask { token, f } = *self;
        f(&token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        done()
    }

    #[test]
    fn pool_runs_submitted_tasks() {
        let pool = WorkerPool::new(2).expect("pool should start");
        let counter = Arc::new(AtomicUsize::new(0));

        let handles = (0..10)
            .map(|_| {
                let counter = counter.clone();
                pool.submit_fn(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .expect("submit should succeed")
            })
            .collect::<Vec<_>>();

        assert!(
            wait_until(Duration::from_secs(5), || handles
                .iter()
                .all(TaskHandle::is_finished)),
            "all tasks should finish"
        );
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn pool_never_exceeds_its_bound() {
        let pool = WorkerPool::new(3).expect("pool should start");
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles = (0..12)
            .map(|_| {
                let active = active.clone();
                let peak = peak.clone();
                pool.submit_fn(move |_| {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(10));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
                .expect("submit should succeed")
            })
            .collect::<Vec<_>>();

        pool.shutdown_and_join();

        assert!(handles.iter().all(TaskHandle::is_finished));
        assert!(peak.load(Ordering::SeqCst) <= 3, "peak concurrency exceeded pool size");
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let pool = WorkerPool::new(1).expect("pool should start");
        pool.shutdown();

        let err = pool
            .submit_fn(|_| {})
            .expect_err("submit after shutdown should fail");

        assert_eq!(err, LoaderError::PoolClosed);
        assert!(pool.is_closed());
    }

    #[test]
    fn cancel_targets_only_its_own_task() {
        let pool = WorkerPool::new(1).expect("pool should start");
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let blocker = pool
            .submit_fn(move |_| {
                let _ = release_rx.recv();
            })
            .expect("submit should succeed");
        let handles = (0..2)
            .map(|idx| {
                let seen = seen.clone();
                pool.submit_fn(move |token| {
                    lock(&seen).push((idx, token.is_cancelled()));
                })
                .expect("submit should succeed")
            })
            .collect::<Vec<_>>();

        handles[0].cancel();
        handles[0].cancel();
        release_tx.send(()).expect("blocker should be waiting");
        pool.shutdown_and_join();

        assert!(blocker.is_finished());
        assert_eq!(*lock(&seen), vec![(0, true), (1, false)]);
    }

    #[test]
    fn panicking_task_does_not_take_down_its_slot() {
        let pool = WorkerPool::new(1).expect("pool should start");
        let ran = Arc::new(AtomicBool::new(false));

        pool.submit_fn(|_| panic!("boom"))
            .expect("submit should succeed");
        let ran_clone = ran.clone();
        pool.submit_fn(move |_| ran_clone.store(true, Ordering::SeqCst))
            .expect("submit should succeed");
        pool.shutdown_and_join();

        assert!(ran.load(Ordering::SeqCst), "task after a panic should still run");
    }

    #[test]
    fn zero_sized_pool_is_rejected() {
        assert!(matches!(
            WorkerPool::new(0),
            Err(LoaderError::InvalidConfig(_))
        ));
    }
}
