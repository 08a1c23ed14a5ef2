use crate::TaskKind;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};

/// Bounded pool for blocking network work (crawls, connection teardown).
///
/// Owned by whoever builds it and shut down explicitly; nothing here is
/// global.
pub struct WorkerPool {
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
    closed: AtomicBool,
    in_flight: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(max_threads: usize) -> Result<Self, std::io::Error> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(max_threads.max(1))
            .thread_name("queryeer-worker")
            .enable_time()
            .build()?;

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            closed: AtomicBool::new(false),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Queues `job`. Returns `false` if the pool is shut down and the job was
    /// dropped without running.
    pub fn spawn<F>(&self, kind: TaskKind, description: impl Into<String>, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            log::debug!("Worker pool closed, dropping {} task", kind.label());
            return false;
        }

        let description = description.into();
        // Released when the closure is dropped, even if it never runs.
        let done = InFlightGuard::enter(&self.in_flight);

        self.handle.spawn_blocking(move || {
            let _done = done;
            log::debug!("[{}] {}", kind.label(), description);
            job();
        });

        true
    }

    /// Number of queued or running jobs.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stops accepting work and waits up to `timeout` for running jobs.
    pub fn shutdown(&self, timeout: Duration) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let runtime = match self.runtime.lock() {
            Ok(mut guard) => guard.take(),
            Err(poison_err) => poison_err.into_inner().take(),
        };

        if let Some(runtime) = runtime {
            let pending = self.in_flight();
            log::info!("Shutting down worker pool ({} jobs in flight)", pending);
            runtime.shutdown_timeout(timeout);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown(Duration::from_secs(1));
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
