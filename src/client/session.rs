//! Stream sessions
//!
//! A session binds one in-flight completion to one cancellation token, one
//! read loop and one append-only text buffer. The loop is the only writer of
//! the buffer; everything else observes it through `watch` receivers.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::ConsumerError;
use crate::streaming::{FrameError, SseDecoder, SseFrame};

/// Callback invoked for every frame dropped because its JSON did not decode
pub type SkipHook = Arc<dyn Fn(&FrameError) + Send + Sync>;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Stopped,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }
}

/// Per-session tuning
#[derive(Clone, Default)]
pub struct SessionOptions {
    /// Fail the session if no chunk arrives within this window
    pub idle_timeout: Option<Duration>,
    /// Diagnostic hook for skipped frames
    pub skip_hook: Option<SkipHook>,
    /// Publish the text buffer into this channel instead of a private one.
    /// The channel is reset to an empty string when the session starts.
    pub publish_to: Option<Arc<watch::Sender<String>>>,
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("idle_timeout", &self.idle_timeout)
            .field("skip_hook", &self.skip_hook.is_some())
            .field("publish_to", &self.publish_to.is_some())
            .finish()
    }
}

/// Final account of a session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub id: Uuid,
    /// Always one of the terminal states
    pub state: SessionState,
    /// Accumulated text at the moment the session ended
    pub text: String,
    /// Set for `Stopped` and `Failed`
    pub error: Option<ConsumerError>,
    /// Number of non-empty deltas appended
    pub deltas: usize,
    /// Number of frames dropped because they failed to decode
    pub skipped_frames: u64,
}

impl SessionReport {
    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }

    /// The full text for a completed session, the error otherwise
    pub fn into_result(self) -> Result<String, ConsumerError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.text),
        }
    }
}

/// Handle to one running session
///
/// Dropping the handle cancels the session.
pub struct StreamSession {
    id: Uuid,
    cancel: CancellationToken,
    text: watch::Receiver<String>,
    state: watch::Receiver<SessionState>,
    skipped: Arc<AtomicU64>,
    task: Option<JoinHandle<SessionReport>>,
}

impl StreamSession {
    /// Start a session whose byte stream is produced by `open`.
    ///
    /// `open` runs inside the session task as the `Requesting` phase; it
    /// receives the session's cancellation token so it can abandon the
    /// request early.
    pub fn spawn<F, Fut, S, E>(options: SessionOptions, open: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<S, ConsumerError>> + Send + 'static,
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        let text_tx = options
            .publish_to
            .clone()
            .unwrap_or_else(|| Arc::new(watch::channel(String::new()).0));
        text_tx.send_replace(String::new());
        let text = text_tx.subscribe();

        let (state_tx, state) = watch::channel(SessionState::Idle);
        let skipped = Arc::new(AtomicU64::new(0));

        let read_loop = ReadLoop {
            id,
            cancel: cancel.clone(),
            text: text_tx,
            state: state_tx,
            skipped: skipped.clone(),
            idle_timeout: options.idle_timeout,
            skip_hook: options.skip_hook,
            deltas: 0,
        };
        let task = tokio::spawn(read_loop.run(open));

        Self {
            id,
            cancel,
            text,
            state,
            skipped,
            task: Some(task),
        }
    }

    /// Start a session over an already-open byte stream.
    pub fn from_stream<S, E>(stream: S, options: SessionOptions) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        Self::spawn(options, move |_| async move { Ok::<_, ConsumerError>(stream) })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request cooperative cancellation.
    ///
    /// The read loop stops at its next suspension point; no buffer update
    /// happens after it observes the request.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Snapshot of the accumulated text
    pub fn text(&self) -> String {
        self.text.borrow().clone()
    }

    /// Receiver notified after every appended delta
    pub fn subscribe_text(&self) -> watch::Receiver<String> {
        self.text.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn skipped_frames(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Wait for the read loop to end and return its report.
    pub async fn finish(mut self) -> SessionReport {
        let joined = match self.task.take() {
            Some(task) => task.await,
            None => return self.snapshot(ConsumerError::Transport("session already finished".into())),
        };

        match joined {
            Ok(report) => report,
            Err(e) => self.snapshot(ConsumerError::Transport(format!("session task failed: {}", e))),
        }
    }

    fn snapshot(&self, error: ConsumerError) -> SessionReport {
        SessionReport {
            id: self.id,
            state: SessionState::Failed,
            text: self.text(),
            error: Some(error),
            deltas: 0,
            skipped_frames: self.skipped_frames(),
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("skipped_frames", &self.skipped_frames())
            .finish()
    }
}

/// Whether the loop should keep reading after a frame
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Done,
}

/// State owned by the session task
struct ReadLoop {
    id: Uuid,
    cancel: CancellationToken,
    text: Arc<watch::Sender<String>>,
    state: watch::Sender<SessionState>,
    skipped: Arc<AtomicU64>,
    idle_timeout: Option<Duration>,
    skip_hook: Option<SkipHook>,
    deltas: usize,
}

impl ReadLoop {
    async fn run<F, Fut, S, E>(mut self, open: F) -> SessionReport
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<S, ConsumerError>>,
        S: Stream<Item = Result<Bytes, E>>,
        E: fmt::Display,
    {
        self.state.send_replace(SessionState::Requesting);
        debug!(session_id = %self.id, "Opening stream");

        let token = self.cancel.clone();
        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => Err(ConsumerError::AbortedByUser),
            opened = open(self.cancel.clone()) => opened,
        };

        let stream = match opened {
            Ok(stream) => stream,
            Err(error) => return self.finish(Err(error)),
        };

        self.state.send_replace(SessionState::Streaming);

        let mut reader = StreamReader::new(self.id, stream);
        let mut decoder = SseDecoder::new();
        let result = self.pump(&mut reader, &mut decoder).await;
        reader.release();

        self.finish(result)
    }

    async fn pump<S, E>(
        &mut self,
        reader: &mut StreamReader<S>,
        decoder: &mut SseDecoder,
    ) -> Result<(), ConsumerError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: fmt::Display,
    {
        loop {
            if self.cancel.is_cancelled() {
                return Err(ConsumerError::AbortedByUser);
            }

            let idle_timeout = self.idle_timeout;
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ConsumerError::AbortedByUser),
                next = reader.next_chunk(idle_timeout) => next?,
            };

            match next {
                Some(bytes) => {
                    for frame in decoder.decode(&bytes) {
                        if self.apply(frame)? == Flow::Done {
                            return Ok(());
                        }
                    }
                }
                None => {
                    if let Some(frame) = decoder.finish() {
                        self.apply(frame)?;
                    }
                    return Ok(());
                }
            }
        }
    }

    fn apply(&mut self, frame: Result<SseFrame, FrameError>) -> Result<Flow, ConsumerError> {
        if self.cancel.is_cancelled() {
            return Err(ConsumerError::AbortedByUser);
        }

        match frame {
            Ok(SseFrame::Data(chunk)) => {
                if let Some(content) = chunk.content().filter(|c| !c.is_empty()) {
                    self.text.send_modify(|buffer| buffer.push_str(content));
                    self.deltas += 1;
                }
                Ok(Flow::Continue)
            }
            Ok(SseFrame::Done) => Ok(Flow::Done),
            Ok(SseFrame::Ignored) => Ok(Flow::Continue),
            Err(error) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                debug!(session_id = %self.id, error = %error, "Skipping undecodable frame");
                if let Some(hook) = &self.skip_hook {
                    hook(&error);
                }
                Ok(Flow::Continue)
            }
        }
    }

    fn finish(self, result: Result<(), ConsumerError>) -> SessionReport {
        let (state, error) = match result {
            Ok(()) => (SessionState::Completed, None),
            Err(ConsumerError::AbortedByUser) => {
                (SessionState::Stopped, Some(ConsumerError::AbortedByUser))
            }
            Err(error) => (SessionState::Failed, Some(error)),
        };

        let text = self.text.borrow().clone();
        let skipped_frames = self.skipped.load(Ordering::Relaxed);

        match &error {
            None => info!(
                session_id = %self.id,
                deltas = %self.deltas,
                skipped_frames = %skipped_frames,
                chars = %text.chars().count(),
                "Stream completed"
            ),
            Some(ConsumerError::AbortedByUser) => info!(
                session_id = %self.id,
                deltas = %self.deltas,
                "Stream stopped by user"
            ),
            Some(error) => warn!(
                session_id = %self.id,
                deltas = %self.deltas,
                error = %error,
                "Stream failed"
            ),
        }

        self.state.send_replace(state);

        SessionReport {
            id: self.id,
            state,
            text,
            error,
            deltas: self.deltas,
            skipped_frames,
        }
    }
}

/// Owns the underlying byte stream and releases it exactly once.
struct StreamReader<S> {
    session_id: Uuid,
    inner: Option<Pin<Box<S>>>,
}

impl<S> StreamReader<S> {
    fn new(session_id: Uuid, stream: S) -> Self {
        Self {
            session_id,
            inner: Some(Box::pin(stream)),
        }
    }

    /// Drop the underlying stream. Returns `false` if it was already released.
    fn release(&mut self) -> bool {
        match self.inner.take() {
            Some(stream) => {
                drop(stream);
                debug!(session_id = %self.session_id, "Released stream reader");
                true
            }
            None => false,
        }
    }
}

impl<S, E> StreamReader<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: fmt::Display,
{
    /// Pull the next chunk; `Ok(None)` at end of stream.
    async fn next_chunk(
        &mut self,
        idle_timeout: Option<Duration>,
    ) -> Result<Option<Bytes>, ConsumerError> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(None);
        };

        let next = match idle_timeout {
            Some(limit) => tokio::time::timeout(limit, inner.next())
                .await
                .map_err(|_| {
                    ConsumerError::Transport(format!(
                        "no data received for {} ms",
                        limit.as_millis()
                    ))
                })?,
            None => inner.next().await,
        };

        match next {
            Some(Ok(bytes)) => Ok(Some(bytes)),
            Some(Err(e)) => Err(ConsumerError::transport(e)),
            None => Ok(None),
        }
    }
}

impl<S> Drop for StreamReader<S> {
    fn drop(&mut self) {
        self.release();
    }
}
