//! Dashboard-facing consumer
//!
//! Wraps a [`RelayClient`] with the state the dashboard renders: the running
//! analysis text, the last error message and whether a stream is active.
//! Requests are serialized: starting a new one stops the previous one.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::analysis::{chat_request, threat_analysis_request, CountryProfile, Threat};
use crate::client::{ConsumerError, RelayClient, SessionReport};
use crate::completion::{ChatMessage, CompletionRequest};

/// Cloneable handle that stops whichever session is currently active
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    active: Arc<Mutex<Option<(Uuid, CancellationToken)>>>,
}

impl StopHandle {
    /// Cancel the active session. Returns `false` if nothing was running.
    pub fn stop(&self) -> bool {
        match self.lock().as_ref() {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    fn install(&self, id: Uuid, token: CancellationToken) {
        let previous = self.lock().replace((id, token));
        if let Some((_, token)) = previous {
            token.cancel();
        }
    }

    fn clear(&self, id: Uuid) {
        let mut active = self.lock();
        if matches!(active.as_ref(), Some((current, _)) if *current == id) {
            *active = None;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<(Uuid, CancellationToken)>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Stateful consumer backing the analysis panel and the chat box
pub struct StreamConsumer {
    client: RelayClient,
    stop: StopHandle,
    analysis: Arc<watch::Sender<String>>,
    error: Option<String>,
}

impl StreamConsumer {
    pub fn new(client: RelayClient) -> Self {
        Self {
            client,
            stop: StopHandle::default(),
            analysis: Arc::new(watch::channel(String::new()).0),
            error: None,
        }
    }

    pub fn client(&self) -> &RelayClient {
        &self.client
    }

    /// Handle for stopping the active stream from another task
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stop the active stream, if any
    pub fn stop(&self) -> bool {
        self.stop.stop()
    }

    pub fn is_streaming(&self) -> bool {
        self.stop.is_active()
    }

    /// Current analysis text
    pub fn analysis(&self) -> String {
        self.analysis.borrow().clone()
    }

    /// Receiver updated after every analysis delta
    pub fn subscribe_analysis(&self) -> watch::Receiver<String> {
        self.analysis.subscribe()
    }

    /// Human-readable message for the last failed or stopped request
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Reset the analysis panel
    pub fn clear(&mut self) {
        self.analysis.send_replace(String::new());
        self.error = None;
    }

    /// Stream a threat analysis for `country` into the analysis buffer
    pub async fn analyze_threats(
        &mut self,
        country: &CountryProfile,
        threats: &[Threat],
    ) -> SessionReport {
        let request = threat_analysis_request(self.client.model(), country, threats);
        let publish_to = Some(self.analysis.clone());
        self.run(request, publish_to, "Analysis").await
    }

    /// Stream a chat reply; the analysis buffer is left untouched
    pub async fn chat(&mut self, messages: Vec<ChatMessage>) -> Result<String, ConsumerError> {
        let request = chat_request(self.client.model(), messages);
        self.run(request, None, "Chat").await.into_result()
    }

    async fn run(
        &mut self,
        request: CompletionRequest,
        publish_to: Option<Arc<watch::Sender<String>>>,
        label: &str,
    ) -> SessionReport {
        self.error = None;

        let session = self.client.start_with(request, publish_to);
        self.stop.install(session.id(), session.cancellation_token());

        let report = session.finish().await;
        self.stop.clear(report.id);

        self.error = report.error.as_ref().map(|error| match error {
            ConsumerError::AbortedByUser => format!("{} was stopped by user", label),
            other => other.to_string(),
        });

        report
    }
}
