//! Strictly ordered task queue owning a piece of mutable state.
//!
//! Producers push closures from any thread without blocking. The first push
//! onto an idle queue arms it and spawns a single drain task on the tokio
//! blocking pool (or a plain thread outside a runtime). The drain runs tasks
//! one at a time, in push order, each to completion, then disarms and checks
//! once more for tasks that arrived while it was finishing.
//!
//! At most one drain is active at any time, so the state is only ever touched
//! by one task. The mutex around it is therefore uncontended.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use pds_core::{PdsError, PdsResult};
use tokio::sync::oneshot;
use tracing::{error, trace};

type Task<S> = Box<dyn FnOnce(&mut S) + Send>;

struct Shared<S> {
    tasks: SegQueue<Task<S>>,
    armed: AtomicBool,
    state: Mutex<S>,
    completed: AtomicU64,
}

/// FIFO of closures run one at a time against owned state.
pub struct SerialTaskQueue<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for SerialTaskQueue<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: Send + 'static> SerialTaskQueue<S> {
    /// Create a queue owning `state`.
    pub fn new(state: S) -> Self {
        Self {
            shared: Arc::new(Shared {
                tasks: SegQueue::new(),
                armed: AtomicBool::new(false),
                state: Mutex::new(state),
                completed: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueue a task. Never blocks.
    pub fn push<F>(&self, task: F)
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.shared.tasks.push(Box::new(task));
        if self
            .shared
            .armed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            spawn_drain(Arc::clone(&self.shared));
        }
    }

    /// Enqueue a task and wait for its result.
    pub async fn submit<T, F>(&self, task: F) -> PdsResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> PdsResult<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.push(move |state| {
            // The receiver may have been dropped by a cancelled caller.
            let _ = tx.send(task(state));
        });
        rx.await
            .map_err(|_| PdsError::Task("queued task panicked before reporting".into()))?
    }

    /// Tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.shared.tasks.len()
    }

    /// Tasks run to completion since creation.
    pub fn completed(&self) -> u64 {
        self.shared.completed.load(Ordering::Acquire)
    }

    /// True when no drain is running and nothing is queued.
    pub fn is_idle(&self) -> bool {
        !self.shared.armed.load(Ordering::Acquire) && self.shared.tasks.is_empty()
    }
}

fn spawn_drain<S: Send + 'static>(shared: Arc<Shared<S>>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(move || drain(&shared));
        }
        Err(_) => {
            std::thread::spawn(move || drain(&shared));
        }
    }
}

fn drain<S>(shared: &Shared<S>) {
    loop {
        {
            let mut state = shared.state.lock();
            while let Some(task) = shared.tasks.pop() {
                if catch_unwind(AssertUnwindSafe(|| task(&mut *state))).is_err() {
                    error!("serial queue task panicked");
                }
                shared.completed.fetch_add(1, Ordering::AcqRel);
            }
        }
        shared.armed.store(false, Ordering::Release);

        // A push that lost the arm race before the store above is still queued.
        if shared.tasks.is_empty()
            || shared
                .armed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            trace!("serial queue drained");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_runs_in_push_order() {
        let queue = SerialTaskQueue::new(Vec::<u32>::new());
        for i in 0..1000 {
            queue.push(move |v| v.push(i));
        }
        let seen = queue.submit(|v| Ok(v.clone())).await.unwrap();
        assert_eq!(seen, (0..1000).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_lose_nothing() {
        let queue = SerialTaskQueue::new(0u64);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let q = queue.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..500 {
                    q.submit(|n| {
                        *n += 1;
                        Ok(())
                    })
                    .await
                    .unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(queue.submit(|n| Ok(*n)).await.unwrap(), 4000);
        assert!(queue.completed() >= 4000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_task_does_not_stall_queue() {
        let queue = SerialTaskQueue::new(0u32);
        let err = queue
            .submit::<(), _>(|_| panic!("boom"))
            .await
            .unwrap_err();
        assert!(matches!(err, PdsError::Task(_)));
        assert_eq!(queue.submit(|n| Ok(*n + 1)).await.unwrap(), 1);
    }

    #[test]
    fn test_drains_without_runtime() {
        let queue = SerialTaskQueue::new(0u32);
        assert!(queue.is_idle());
        let (tx, rx) = std::sync::mpsc::channel();
        queue.push(|n| *n = 7);
        queue.push(move |n| tx.send(*n).unwrap());
        assert_eq!(rx.recv().unwrap(), 7);

        // The drain thread disarms just after its last task.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !queue.is_idle() {
            assert!(std::time::Instant::now() < deadline, "queue never went idle");
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.completed(), 2);
    }
}
