use std::future::Future;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Fixed-size pool of execution slots.
///
/// Each submitted job waits (FIFO) for one of `size` permits, then runs to
/// completion while holding it. A job that is cancelled before it gets a
/// permit never runs; a running job is never interrupted.
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    size: usize,
    runtime: Handle,
}

impl WorkerPool {
    /// Create a pool with `size` slots that spawns jobs on `runtime`.
    pub fn new(size: usize, runtime: Handle) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(size)),
            size,
            runtime,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of jobs currently holding a slot.
    pub fn running(&self) -> usize {
        self.size.saturating_sub(self.slots.available_permits())
    }

    /// Submit a job. Returns immediately; the job starts once a slot frees up.
    ///
    /// The job resolves to `None` if it was cancelled before starting or the
    /// pool was closed while it waited.
    pub fn submit<F>(&self, job: F) -> JobHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let cancel = CancelHandle::default();
        let flag = cancel.clone();
        let slots = Arc::clone(&self.slots);

        let task = self.runtime.spawn(async move {
            let _permit = slots.acquire_owned().await.ok()?;
            if flag.is_cancelled() {
                return None;
            }
            Some(job.await)
        });

        JobHandle { cancel, task }
    }

    /// Stop handing out slots. Waiting jobs resolve to `None`; running jobs finish.
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }
}

/// Cooperative cancellation flag for a job that has not started yet.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Handle to a submitted job.
pub struct JobHandle<T> {
    cancel: CancelHandle,
    task: JoinHandle<Option<T>>,
}

impl<T> JobHandle<T> {
    /// Cancel the job if it has not started. No effect on a running job.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A cloneable cancellation handle that outlives this handle.
    pub fn canceller(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wait for the job. `None` means it never ran.
    pub async fn join(self) -> Option<T> {
        self.task.await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn runs_job_and_returns_output() {
        let pool = WorkerPool::new(2, Handle::current());
        let handle = pool.submit(async { 21 * 2 });
        assert_eq!(handle.join().await, Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_pool_size() {
        let pool = WorkerPool::new(2, Handle::current());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                pool.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            assert!(h.join().await.is_some());
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelled_before_start_never_runs() {
        let pool = WorkerPool::new(1, Handle::current());
        let gate = Arc::new(Notify::new());
        let ran = Arc::new(AtomicBool::new(false));

        let g = Arc::clone(&gate);
        let blocker = pool.submit(async move { g.notified().await });

        let r = Arc::clone(&ran);
        let queued = pool.submit(async move { r.store(true, Ordering::SeqCst) });
        queued.cancel();

        gate.notify_one();
        assert!(blocker.join().await.is_some());
        assert_eq!(queued.join().await, None);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_after_start_lets_job_finish() {
        let pool = WorkerPool::new(1, Handle::current());
        let started = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());

        let (s, g) = (Arc::clone(&started), Arc::clone(&gate));
        let handle = pool.submit(async move {
            s.notify_one();
            g.notified().await;
            "finished"
        });

        started.notified().await;
        handle.cancel();
        gate.notify_one();
        assert_eq!(handle.join().await, Some("finished"));
    }

    #[tokio::test]
    async fn jobs_start_in_submission_order() {
        let pool = WorkerPool::new(1, Handle::current());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let order = Arc::clone(&order);
                pool.submit(async move { order.lock().unwrap().push(i) })
            })
            .collect();
        for h in handles {
            h.join().await;
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn closed_pool_drops_waiting_jobs() {
        let pool = WorkerPool::new(1, Handle::current());
        let gate = Arc::new(Notify::new());
        let g = Arc::clone(&gate);
        let running = pool.submit(async move { g.notified().await });
        let waiting = pool.submit(async { 1 });

        tokio::task::yield_now().await;
        pool.close();
        gate.notify_one();

        assert!(running.join().await.is_some());
        assert_eq!(waiting.join().await, None);
        assert!(pool.is_closed());
    }
}
