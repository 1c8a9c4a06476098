//! Bounded download worker pool
//!
//! A fixed number of workers pull tasks from a FIFO queue, so the number of
//! tasks in `Downloading` never exceeds the pool size.

use crate::cache::task::DownloadTask;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Executes one dequeued task to completion.
#[async_trait]
pub(crate) trait JobRunner: Send + Sync + 'static {
    async fn run(&self, task: Arc<DownloadTask>);
}

#[derive(Default)]
pub(crate) struct JobQueue {
    jobs: Mutex<VecDeque<Arc<DownloadTask>>>,
    notify: Notify,
}

impl JobQueue {
    pub fn push(&self, task: Arc<DownloadTask>) {
        self.jobs.lock().push_back(task);
        self.notify.notify_one();
    }

    /// Remove `task` if no worker picked it up yet. Other tasks for the
    /// same message stay queued.
    pub fn remove(&self, task: &Arc<DownloadTask>) -> bool {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|queued| !Arc::ptr_eq(queued, task));
        jobs.len() != before
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Wait for the next task, or `None` once `shutdown` fires.
    async fn next(&self, shutdown: &CancellationToken) -> Option<Arc<DownloadTask>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(task) = self.jobs.lock().pop_front() {
                return Some(task);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = shutdown.cancelled() => return None,
            }
        }
    }
}

pub(crate) struct WorkerPool {
    queue: Arc<JobQueue>,
    shutdown: CancellationToken,
    busy: Arc<AtomicUsize>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(JobQueue::default()),
            shutdown: CancellationToken::new(),
            busy: Arc::new(AtomicUsize::new(0)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `size` workers. Calling it again while workers run is a no-op.
    #[instrument(skip(self, runner))]
    pub fn start<R: JobRunner>(&self, size: usize, runner: Weak<R>) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }

        for worker in 0..size {
            let queue = self.queue.clone();
            let shutdown = self.shutdown.clone();
            let busy = self.busy.clone();
            let runner = runner.clone();

            handles.push(tokio::spawn(async move {
                while let Some(task) = queue.next(&shutdown).await {
                    if task.is_cancelled() {
                        task.settle();
                        continue;
                    }
                    let Some(runner) = runner.upgrade() else {
                        task.settle();
                        break;
                    };

                    busy.fetch_add(1, Ordering::SeqCst);
                    runner.run(task).await;
                    busy.fetch_sub(1, Ordering::SeqCst);
                }
                debug!(worker, "Download worker stopped");
            }));
        }

        debug!(workers = size, "Started download workers");
    }

    pub fn enqueue(&self, task: Arc<DownloadTask>) {
        self.queue.push(task);
    }

    pub fn remove_queued(&self, task: &Arc<DownloadTask>) -> bool {
        self.queue.remove(task)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    /// Stop accepting work. Running tasks finish their current step.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
