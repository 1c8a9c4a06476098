//! Download tasks and progress streams
//!
//! A [`DownloadTask`] is shared by every caller that asked for the same
//! message while it was in flight. Each caller observes it through its own
//! [`ProgressStream`]: a snapshot of the current state followed by live
//! events, ending with exactly one terminal event.

use crate::cache::entry::MessageId;
use crate::cache::stats::DownloadProgress;
use crate::error::PlaybackError;
use futures::Stream;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 128;

/// Lifecycle of a download task.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadState {
    Queued,
    Downloading { percent: u8, attempt: u32 },
    Completed { path: PathBuf },
    Failed { error: PlaybackError },
    Cancelled,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Completed { .. } | DownloadState::Failed { .. } | DownloadState::Cancelled
        )
    }
}

/// Event delivered to download observers.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    Queued,
    Progress(DownloadProgress),
    Completed { path: PathBuf },
    Failed { error: PlaybackError },
    Cancelled,
}

impl DownloadEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadEvent::Completed { .. } | DownloadEvent::Failed { .. } | DownloadEvent::Cancelled
        )
    }
}

/// Terminal result of a download, as returned by [`ProgressStream::wait`].
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Completed(PathBuf),
    Failed(PlaybackError),
    Cancelled,
}

impl DownloadOutcome {
    /// Convert into the cached path, or the error that prevented caching.
    pub fn into_result(self, message_id: &MessageId) -> crate::Result<PathBuf> {
        match self {
            DownloadOutcome::Completed(path) => Ok(path),
            DownloadOutcome::Failed(error) => Err(error),
            DownloadOutcome::Cancelled => Err(PlaybackError::Cancelled(message_id.to_string())),
        }
    }
}

struct TaskProgress {
    state: DownloadState,
    progress: DownloadProgress,
    attempt_started: Instant,
}

/// One in-flight download, shared by every caller requesting the message.
pub struct DownloadTask {
    id: Uuid,
    message_id: MessageId,
    url: String,
    progress: Mutex<TaskProgress>,
    events: broadcast::Sender<DownloadEvent>,
    terminal: watch::Sender<Option<DownloadEvent>>,
    settled: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl DownloadTask {
    pub fn new(message_id: MessageId, url: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (terminal, _) = watch::channel(None);
        let (settled, _) = watch::channel(false);

        Self {
            id: Uuid::new_v4(),
            progress: Mutex::new(TaskProgress {
                state: DownloadState::Queued,
                progress: DownloadProgress::new(message_id.clone()),
                attempt_started: Instant::now(),
            }),
            message_id,
            url: url.into(),
            events,
            terminal,
            settled,
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> DownloadState {
        self.progress.lock().state.clone()
    }

    pub fn progress(&self) -> DownloadProgress {
        self.progress.lock().progress.clone()
    }

    /// Attach a new observer.
    pub fn subscribe(&self) -> ProgressStream {
        // Snapshot and subscription happen under the same lock that guards
        // publishing, so no event falls between the two.
        let guard = self.progress.lock();
        let snapshot = match &guard.state {
            DownloadState::Queued => DownloadEvent::Queued,
            DownloadState::Downloading { .. } => DownloadEvent::Progress(guard.progress.clone()),
            DownloadState::Completed { path } => DownloadEvent::Completed { path: path.clone() },
            DownloadState::Failed { error } => DownloadEvent::Failed {
                error: error.clone(),
            },
            DownloadState::Cancelled => DownloadEvent::Cancelled,
        };

        ProgressStream {
            message_id: self.message_id.clone(),
            pending: VecDeque::from([snapshot]),
            events: Some(self.events.subscribe()),
            terminal: Some(self.terminal.subscribe()),
            last_percent: None,
            done: false,
        }
    }

    /// Enter `Downloading` for a new attempt.
    pub(crate) fn start_attempt(&self, attempt: u32) {
        let mut guard = self.progress.lock();
        if guard.state.is_terminal() {
            return;
        }
        guard.progress.begin_attempt(attempt, None);
        guard.attempt_started = Instant::now();
        guard.state = DownloadState::Downloading {
            percent: guard.progress.percent,
            attempt,
        };
        let _ = self.events.send(DownloadEvent::Progress(guard.progress.clone()));
    }

    pub(crate) fn set_content_length(&self, total_bytes: Option<u64>) {
        self.progress.lock().progress.total_bytes = total_bytes;
    }

    /// Record bytes written in the current attempt; publishes when the
    /// percentage advanced.
    pub(crate) fn record_bytes(&self, downloaded_bytes: u64) -> Option<u8> {
        let mut guard = self.progress.lock();
        if guard.state.is_terminal() {
            return None;
        }
        let started = guard.attempt_started;
        if !guard.progress.update(downloaded_bytes, started) {
            return None;
        }

        let percent = guard.progress.percent;
        guard.state = DownloadState::Downloading {
            percent,
            attempt: guard.progress.attempt,
        };
        let _ = self.events.send(DownloadEvent::Progress(guard.progress.clone()));
        Some(percent)
    }

    /// Publish the terminal event. Only the first call has any effect.
    pub(crate) fn finish(&self, event: DownloadEvent) -> bool {
        let mut guard = self.progress.lock();
        if guard.state.is_terminal() {
            return false;
        }

        guard.state = match &event {
            DownloadEvent::Completed { path } => DownloadState::Completed { path: path.clone() },
            DownloadEvent::Failed { error } => DownloadState::Failed {
                error: error.clone(),
            },
            DownloadEvent::Cancelled => DownloadState::Cancelled,
            DownloadEvent::Queued | DownloadEvent::Progress(_) => return false,
        };

        self.terminal.send_replace(Some(event.clone()));
        let _ = self.events.send(event);
        true
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Mark that no worker touches this task's files any more.
    pub(crate) fn settle(&self) {
        self.settled.send_replace(true);
    }

    /// Wait until [`settle`](Self::settle) was called.
    pub(crate) async fn wait_settled(&self) {
        let mut rx = self.settled.subscribe();
        let _ = rx.wait_for(|settled| *settled).await;
    }
}

impl std::fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTask")
            .field("id", &self.id)
            .field("message_id", &self.message_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Ordered view of one download for one caller.
///
/// Yields the current state first, then live events. Progress never moves
/// backwards, and the stream ends after the terminal event.
pub struct ProgressStream {
    message_id: MessageId,
    pending: VecDeque<DownloadEvent>,
    events: Option<broadcast::Receiver<DownloadEvent>>,
    terminal: Option<watch::Receiver<Option<DownloadEvent>>>,
    last_percent: Option<u8>,
    done: bool,
}

impl ProgressStream {
    /// A stream that reports an already cached file.
    pub fn completed(message_id: MessageId, path: PathBuf) -> Self {
        Self {
            message_id,
            pending: VecDeque::from([DownloadEvent::Completed { path }]),
            events: None,
            terminal: None,
            last_percent: None,
            done: false,
        }
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Next event, or `None` after the terminal event was delivered.
    pub async fn next(&mut self) -> Option<DownloadEvent> {
        loop {
            if self.done {
                return None;
            }

            let event = match self.pending.pop_front() {
                Some(event) => event,
                None => self.receive().await,
            };

            if let DownloadEvent::Progress(progress) = &event {
                if self.last_percent.map_or(false, |last| progress.percent < last) {
                    continue;
                }
                self.last_percent = Some(progress.percent);
            }

            if event.is_terminal() {
                self.done = true;
                self.events = None;
            }
            return Some(event);
        }
    }

    async fn receive(&mut self) -> DownloadEvent {
        let Some(events) = self.events.as_mut() else {
            return self.recorded_terminal();
        };

        loop {
            match events.recv().await {
                Ok(event) => return event,
                // Terminal events are kept by the watch channel, so dropped
                // progress updates are harmless.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return self.recorded_terminal(),
            }
        }
    }

    fn recorded_terminal(&self) -> DownloadEvent {
        self.terminal
            .as_ref()
            .and_then(|rx| rx.borrow().clone())
            .unwrap_or(DownloadEvent::Cancelled)
    }

    /// Drain the stream and return its terminal result.
    pub async fn wait(mut self) -> DownloadOutcome {
        while let Some(event) = self.next().await {
            match event {
                DownloadEvent::Completed { path } => return DownloadOutcome::Completed(path),
                DownloadEvent::Failed { error } => return DownloadOutcome::Failed(error),
                DownloadEvent::Cancelled => return DownloadOutcome::Cancelled,
                DownloadEvent::Queued | DownloadEvent::Progress(_) => {}
            }
        }
        DownloadOutcome::Cancelled
    }

    /// Adapt into a [`Stream`] for use with stream combinators.
    pub fn into_stream(self) -> impl Stream<Item = DownloadEvent> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|event| (event, stream))
        })
    }
}

impl std::fmt::Debug for ProgressStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStream")
            .field("message_id", &self.message_id)
            .field("done", &self.done)
            .finish()
    }
}
