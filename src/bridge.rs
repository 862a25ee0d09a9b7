//! Worker thread that runs device I/O for a synchronous front-end.
//!
//! The UI thread never awaits. It hands futures to [`Bridge::submit`], which
//! schedules them on a current-thread tokio runtime owned by a single worker
//! thread and returns a [`JoinHandle`] straight away. Results travel back
//! through channels the futures themselves hold.

use std::{
    future::Future,
    sync::mpsc as std_mpsc,
    thread,
    time::Duration,
};

use tokio::{
    runtime::{Builder, Handle},
    sync::oneshot,
    task::JoinHandle,
};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

pub struct Bridge {
    handle: Handle,
    tracker: TaskTracker,
    stop: Option<oneshot::Sender<Duration>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Bridge {
    /// Spawn the worker and block until its runtime is ready to accept work.
    pub fn start() -> std::io::Result<Bridge> {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<Duration>();
        let tracker = TaskTracker::new();
        let worker_tracker = tracker.clone();

        let worker = thread::Builder::new()
            .name(String::from("kasactl-worker"))
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(runtime.handle().clone()));
                debug!("worker runtime started");

                runtime.block_on(async move {
                    // a dropped sender means the bridge itself was dropped
                    let grace = stop_rx.await.unwrap_or(Duration::ZERO);
                    worker_tracker.close();
                    if tokio::time::timeout(grace, worker_tracker.wait()).await.is_err() {
                        warn!(
                            pending = worker_tracker.len(),
                            "abandoning in-flight device operations"
                        );
                    }
                });
                // dropping the runtime cancels whatever is still pending
                drop(runtime);
                debug!("worker runtime stopped");
            })?;

        let handle = ready_rx
            .recv()
            .map_err(|_| std::io::Error::other("worker exited before starting its runtime"))??;

        Ok(Bridge {
            handle,
            tracker,
            stop: Some(stop_tx),
            worker: Some(worker),
        })
    }

    /// Schedule `future` on the worker and return without waiting.
    pub fn submit<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn_on(future, &self.handle)
    }

    /// Run `future` on the worker and block the calling thread for its output.
    ///
    /// Must not be called from inside the worker's runtime.
    pub fn run<F>(&self, future: F) -> Option<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(async move {
            let _ = tx.send(future.await);
        });
        rx.blocking_recv().ok()
    }

    /// Number of submitted operations that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop the worker, giving in-flight operations up to `grace` to finish.
    pub fn shutdown(mut self, grace: Duration) {
        self.stop_worker(grace);
    }

    fn stop_worker(&mut self, grace: Duration) {
        if let Some(stop) = self.stop.take() {
            info!(in_flight = self.tracker.len(), "stopping worker");
            let _ = stop.send(grace);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.stop_worker(Duration::ZERO);
    }
}
